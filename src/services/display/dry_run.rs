use crate::error::{BlockerError, Result};
use crate::events::{VisibilityState, WindowEvent, WindowGeometry, WindowHandle};
use crate::services::geometry::GeometryFetcher;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::info;

use super::r#trait::DisplayConnection;

/// Шаг сценария
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    Event(WindowEvent),
    /// Эмуляция разрыва соединения с X-сервером
    #[cfg(test)]
    Disconnect,
}

#[derive(Debug, Clone)]
struct ScriptedWindow {
    class_name: Option<String>,
    geometry: WindowGeometry,
}

/// Дисплей без X-сервера: отдаёт заранее записанный сценарий событий.
///
/// Используется в режиме `--dry-run` и в тестах.
pub struct ScriptedDisplay {
    steps: VecDeque<ScriptStep>,
    windows: HashMap<WindowHandle, ScriptedWindow>,
    pace: Duration,
    next_due: Instant,
    demo: Option<DemoScenario>,
}

impl Default for ScriptedDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDisplay {
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
            windows: HashMap::new(),
            pace: Duration::ZERO,
            next_due: Instant::now(),
            demo: None,
        }
    }

    /// Бесконечный демонстрационный сценарий для режима сухого запуска
    pub fn demo(blocked: &[String]) -> Self {
        info!("Dry-run режим - X11 заменён сценарием событий");

        let class_name = blocked
            .first()
            .cloned()
            .unwrap_or_else(|| "skype".to_string());

        let mut display = Self::new().with_pace(Duration::from_millis(500));
        display.demo = Some(DemoScenario {
            class_name,
            generation: 0,
        });
        display
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn add_window(
        &mut self,
        handle: WindowHandle,
        class_name: Option<&str>,
        geometry: WindowGeometry,
    ) {
        self.windows.insert(
            handle,
            ScriptedWindow {
                class_name: class_name.map(str::to_string),
                geometry,
            },
        );
    }

    fn refill(&mut self) {
        if let Some(demo) = self.demo.as_mut() {
            let (windows, steps) = demo.next_cycle();
            // Окна прошлого цикла к этому моменту уничтожены
            self.windows.clear();
            for (handle, class_name, geometry) in windows {
                self.add_window(handle, Some(&class_name), geometry);
            }
            self.steps.extend(steps);
        }
    }
}

#[cfg(test)]
impl ScriptedDisplay {
    pub fn with_window(
        mut self,
        handle: WindowHandle,
        class_name: &str,
        geometry: WindowGeometry,
    ) -> Self {
        self.add_window(handle, Some(class_name), geometry);
        self
    }

    pub fn set_geometry(&mut self, handle: WindowHandle, geometry: WindowGeometry) {
        if let Some(window) = self.windows.get_mut(&handle) {
            window.geometry = geometry;
        }
    }

    /// Окно пропадает с сервера: запросы к нему начинают падать
    pub fn vanish(&mut self, handle: WindowHandle) {
        self.windows.remove(&handle);
    }

    pub fn push(&mut self, event: WindowEvent) {
        self.steps.push_back(ScriptStep::Event(event));
    }

    pub fn then(mut self, event: WindowEvent) -> Self {
        self.push(event);
        self
    }

    pub fn then_disconnect(mut self) -> Self {
        self.steps.push_back(ScriptStep::Disconnect);
        self
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl GeometryFetcher for ScriptedDisplay {
    fn fetch(&self, handle: WindowHandle) -> Result<WindowGeometry> {
        match self.windows.get(&handle) {
            Some(window) => Ok(window.geometry),
            None => BlockerError::geometry_failed(handle, "BadWindow"),
        }
    }
}

impl DisplayConnection for ScriptedDisplay {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<WindowEvent>> {
        if self.steps.is_empty() {
            self.refill();
        }

        if self.steps.is_empty() {
            std::thread::sleep(timeout);
            return Ok(None);
        }

        let now = Instant::now();
        if now < self.next_due {
            let wait = (self.next_due - now).min(timeout);
            std::thread::sleep(wait);
            if Instant::now() < self.next_due {
                return Ok(None);
            }
        }
        self.next_due = Instant::now() + self.pace;

        match self.steps.pop_front() {
            Some(ScriptStep::Event(event)) => Ok(Some(event)),
            #[cfg(test)]
            Some(ScriptStep::Disconnect) => {
                Err(crate::blocker_error!(disconnected, "сценарий: соединение закрыто"))
            }
            None => Ok(None),
        }
    }

    fn class_name(&self, handle: WindowHandle) -> Result<Option<String>> {
        Ok(self
            .windows
            .get(&handle)
            .and_then(|window| window.class_name.clone()))
    }
}

/// Цикл жизни одного блокируемого и одного постороннего окна
struct DemoScenario {
    class_name: String,
    generation: u32,
}

impl DemoScenario {
    fn next_cycle(&mut self) -> (Vec<(WindowHandle, String, WindowGeometry)>, Vec<ScriptStep>) {
        let base = 0x0100_0000 + self.generation * 0x10;
        self.generation += 1;

        let blocked = WindowHandle::new(base + 1);
        let other = WindowHandle::new(base + 2);

        let windows = vec![
            (
                blocked,
                self.class_name.clone(),
                WindowGeometry::new(100, 200, 300, 150),
            ),
            (
                other,
                "xterm".to_string(),
                WindowGeometry::new(400, 400, 640, 480),
            ),
        ];

        let steps = [
            WindowEvent::Create { handle: blocked },
            WindowEvent::Map { handle: blocked },
            WindowEvent::Map { handle: other },
            WindowEvent::Configure { handle: blocked },
            // Быстрый unmap/map как при анимации - оверлей не должен мигать
            WindowEvent::Unmap { handle: blocked },
            WindowEvent::Map { handle: blocked },
            WindowEvent::VisibilityChange {
                handle: blocked,
                state: VisibilityState::PartiallyObscured,
            },
            WindowEvent::Unmap { handle: blocked },
            WindowEvent::Destroy { handle: other },
            WindowEvent::Destroy { handle: blocked },
        ]
        .into_iter()
        .map(ScriptStep::Event)
        .collect();

        (windows, steps)
    }
}
