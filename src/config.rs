use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Имена классов окон, которые нужно перекрывать
    #[serde(default)]
    pub windows: Vec<String>,
    pub logging: LoggingConfig,
    pub overlay: OverlayConfig,
    pub tracker: TrackerConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverlayConfig {
    /// Пусто - рисуем сплошной чёрный прямоугольник
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub padding: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerConfig {
    pub capacity: usize,
    pub debounce_frames: u32,
    pub poll_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    /// 0 - переподключаться бесконечно
    pub max_reconnects: u32,
    #[serde(default)]
    pub evict_on_unblock: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderConfig {
    pub frame_rate: u32,
}

/// Внешние настройки источника: картинка и список блокируемых окон
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockerSettings {
    pub file: Option<PathBuf>,
    pub windows: Vec<String>,
}

impl BlockerSettings {
    pub fn new(windows: Vec<String>) -> Self {
        Self {
            file: None,
            windows,
        }
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Пустой путь означает отсутствие картинки
    pub fn image_path(&self) -> Option<&Path> {
        self.file
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            windows: Vec::new(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            overlay: OverlayConfig {
                file: None,
                padding: 50,
            },
            tracker: TrackerConfig {
                capacity: 128,
                debounce_frames: 4,
                poll_timeout_ms: 100,
                reconnect_delay_ms: 1000,
                max_reconnects: 0,
                evict_on_unblock: false,
            },
            render: RenderConfig { frame_rate: 30 },
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("X11_BLOCKER_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        if self.tracker.capacity == 0 {
            anyhow::bail!("tracker.capacity должно быть больше 0");
        }

        if self.tracker.debounce_frames == 0 {
            anyhow::bail!("tracker.debounce_frames должно быть больше 0");
        }

        if self.tracker.poll_timeout_ms < 10 {
            anyhow::bail!("tracker.poll_timeout_ms должно быть минимум 10");
        }

        if self.render.frame_rate == 0 || self.render.frame_rate > 240 {
            anyhow::bail!("render.frame_rate должно быть в диапазоне 1..=240");
        }

        for (i, window) in self.windows.iter().enumerate() {
            if window.trim().is_empty() {
                anyhow::bail!("Пустое имя окна в списке windows (#{})", i + 1);
            }
        }

        Ok(())
    }

    pub fn settings(&self) -> BlockerSettings {
        let settings = BlockerSettings::new(self.windows.clone());
        match &self.overlay.file {
            Some(file) => settings.with_file(file.clone()),
            None => settings,
        }
    }
}
