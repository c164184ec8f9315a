use crate::debug_if_enabled;
use crate::error::{BlockerError, Result};
use crate::events::{WindowEvent, WindowHandle};
use crate::services::block_list::SharedBlockList;
use crate::services::display::DisplayConnection;
use crate::services::window_table::SharedWindowTable;
use std::fmt;
use tracing::{debug, info, warn};

/// Чем закончилась обработка одного события
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Новое окно взято под наблюдение
    Admitted { index: usize },
    /// Уже отслеживаемое окно обновлено и снова видимо
    Updated { index: usize },
    /// Unmap: скрытие отложено на `debounce` кадров
    PendingHide { debounce: u32 },
    Removed,
    /// Окно нам не интересно
    Ignored,
    /// Событие отброшено из-за ошибки, состояние не изменилось
    Dropped { reason: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Admitted { index } => write!(f, "admitted #{}", index),
            Outcome::Updated { index } => write!(f, "updated #{}", index),
            Outcome::PendingHide { debounce } => write!(f, "pending-hide ({})", debounce),
            Outcome::Removed => write!(f, "removed"),
            Outcome::Ignored => write!(f, "ignored"),
            Outcome::Dropped { reason } => write!(f, "dropped: {}", reason),
        }
    }
}

/// Конечный автомат отслеживания окон.
///
/// Переводит события дисплея в изменения таблицы окон. Ошибки одного события
/// не выходят за пределы `handle_event`, кроме разрыва соединения.
#[derive(Debug, Clone)]
pub struct Tracker {
    table: SharedWindowTable,
    block_list: SharedBlockList,
    debounce_frames: u32,
}

impl Tracker {
    pub fn new(table: SharedWindowTable, block_list: SharedBlockList, debounce_frames: u32) -> Self {
        Self {
            table,
            block_list,
            debounce_frames,
        }
    }

    pub fn table(&self) -> &SharedWindowTable {
        &self.table
    }

    /// Обработать одно событие.
    ///
    /// `Err` возвращается только для `EventStreamDisconnected`; всё остальное
    /// логируется и превращается в `Outcome::Dropped`.
    pub fn handle_event<D>(&self, event: &WindowEvent, display: &D) -> Result<Outcome>
    where
        D: DisplayConnection + ?Sized,
    {
        debug_if_enabled!("Событие окна: {}", event);

        let result = match *event {
            WindowEvent::Unmap { handle } => Ok(self.unmap(handle)),
            WindowEvent::Destroy { handle } => Ok(self.destroy(handle)),
            _ if event.is_admission() => self.admit(event.handle(), display),
            _ => Ok(Outcome::Ignored),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_disconnect() => Err(e),
            Err(e) => {
                match &e {
                    BlockerError::CapacityExceeded { .. } => {
                        warn!("Окно {} не добавлено: {}", event.handle(), e)
                    }
                    _ => debug!("Событие {} пропущено: {}", event, e),
                }
                Ok(Outcome::Dropped {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Create/Map/Configure/VisibilityChange
    fn admit<D>(&self, handle: WindowHandle, display: &D) -> Result<Outcome>
    where
        D: DisplayConnection + ?Sized,
    {
        // Блок-лист проверяется только при первом появлении окна
        let class_name = match self.table.get(handle) {
            Some(tracked) => tracked.class_name,
            None => match display.class_name(handle)? {
                Some(class_name) if self.block_list.contains(&class_name) => class_name,
                _ => return Ok(Outcome::Ignored),
            },
        };

        // Запрос к серверу идёт без блокировки таблицы
        let geometry = display.fetch(handle)?;

        self.table.with(|table| {
            let is_new = !table.contains(handle);
            let index = table.upsert(handle, &class_name)?;
            let window = table
                .entry_mut(index)
                .ok_or_else(|| BlockerError::Internal(format!("запись #{} пропала", index)))?;
            window.arm(geometry, self.debounce_frames);

            if is_new {
                info!("Окно взято под наблюдение: {}", window);
                Ok(Outcome::Admitted { index })
            } else {
                debug_if_enabled!("Окно обновлено: {}", window);
                Ok(Outcome::Updated { index })
            }
        })
    }

    fn unmap(&self, handle: WindowHandle) -> Outcome {
        self.table.with(|table| match table.get_mut(handle) {
            Some(window) => {
                window.begin_hide(self.debounce_frames);
                info!("Окно ожидает скрытия: {}", window);
                Outcome::PendingHide {
                    debounce: window.unmap_debounce,
                }
            }
            None => Outcome::Ignored,
        })
    }

    fn destroy(&self, handle: WindowHandle) -> Outcome {
        match self.table.with(|table| table.remove(handle)) {
            Some(window) => {
                info!("Окно удалено: {}", window);
                Outcome::Removed
            }
            None => Outcome::Ignored,
        }
    }
}
