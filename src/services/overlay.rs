use crate::error::{BlockerError, Result};
use crate::events::WindowGeometry;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Цвет заливки, когда картинка не задана или не загрузилась (ARGB)
pub const FALLBACK_COLOR: u32 = 0xFF00_0000;
/// Сторона квадратной текстуры заливки
pub const FALLBACK_SIZE: u32 = 32;

/// Прямоугольник, который нужно закрыть оверлеем
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl OverlayRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Геометрия окна, расширенная на `padding` с каждой стороны (тени, рамки WM)
    pub fn around(geometry: &WindowGeometry, padding: u32) -> Self {
        let pad = i32::try_from(padding).unwrap_or(i32::MAX);
        Self::new(
            geometry.x.saturating_sub(pad),
            geometry.y.saturating_sub(pad),
            geometry.width.saturating_add(padding.saturating_mul(2)),
            geometry.height.saturating_add(padding.saturating_mul(2)),
        )
    }
}

impl fmt::Display for OverlayRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
    }
}

/// Чем закрывать окно
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayTexture {
    Image {
        path: PathBuf,
        width: u32,
        height: u32,
        pixels: image::RgbaImage,
    },
    Solid {
        color: u32,
        size: u32,
    },
}

impl OverlayTexture {
    pub fn solid() -> Self {
        OverlayTexture::Solid {
            color: FALLBACK_COLOR,
            size: FALLBACK_SIZE,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let pixels = image::open(path)
            .map_err(|e| BlockerError::ImageLoadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .to_rgba8();

        Ok(OverlayTexture::Image {
            path: path.to_path_buf(),
            width: pixels.width(),
            height: pixels.height(),
            pixels,
        })
    }
}

impl fmt::Display for OverlayTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayTexture::Image {
                path,
                width,
                height,
                ..
            } => write!(f, "{} ({}x{})", path.display(), width, height),
            OverlayTexture::Solid { color, size } => {
                write!(f, "solid #{:08x} ({}x{})", color, size, size)
            }
        }
    }
}

/// Текстура оверлея с отслеживанием времени изменения файла
#[derive(Debug)]
pub struct OverlayImage {
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
    texture: Arc<OverlayTexture>,
}

impl Default for OverlayImage {
    fn default() -> Self {
        Self {
            path: None,
            modified: None,
            texture: Arc::new(OverlayTexture::solid()),
        }
    }
}

impl OverlayImage {
    pub fn new(path: Option<&Path>) -> Self {
        let mut image = Self::default();
        image.update(path);
        image
    }

    /// Дешёвая копия для отрисовки без удержания блокировки
    pub fn texture(&self) -> Arc<OverlayTexture> {
        Arc::clone(&self.texture)
    }

    /// Перечитывает картинку, если изменился путь или mtime файла.
    /// Возвращает true, если текстура была перезагружена.
    pub fn update(&mut self, path: Option<&Path>) -> bool {
        let modified = path.and_then(modified_time);

        if self.path.as_deref() == path && self.modified == modified {
            debug!("Картинка оверлея не изменилась");
            return false;
        }

        let texture = match path {
            Some(path) => match OverlayTexture::load(path) {
                Ok(texture) => {
                    info!("Загружена текстура оверлея: {}", texture);
                    texture
                }
                Err(e) => {
                    warn!("{}. Используем сплошную заливку", e);
                    OverlayTexture::solid()
                }
            },
            None => {
                info!("Картинка не задана, используем сплошную заливку");
                OverlayTexture::solid()
            }
        };

        self.texture = Arc::new(texture);
        self.path = path.map(Path::to_path_buf);
        self.modified = modified;
        true
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Внешний потребитель кадров: рисует оверлей поверх окна
pub trait OverlayConsumer {
    fn draw(&mut self, texture: &OverlayTexture, rect: OverlayRect);
}

/// Потребитель по умолчанию для демона: только пишет в лог
#[derive(Debug, Default)]
pub struct LogConsumer {
    draw_count: u64,
}

impl LogConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draw_count(&self) -> u64 {
        self.draw_count
    }
}

impl OverlayConsumer for LogConsumer {
    fn draw(&mut self, texture: &OverlayTexture, rect: OverlayRect) {
        self.draw_count += 1;
        crate::trace_if_enabled!("Рисуем {} поверх {}", texture, rect);
    }
}
