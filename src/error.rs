use crate::events::WindowHandle;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockerError {
    #[error("Не удалось подключиться к X-серверу: {0}")]
    Connect(#[from] x11rb::errors::ConnectError),

    #[error("Таблица окон заполнена (вместимость {capacity})")]
    CapacityExceeded { capacity: usize },

    #[error("Не удалось получить геометрию окна {handle}: {reason}")]
    GeometryQueryFailed { handle: WindowHandle, reason: String },

    #[error("Не удалось загрузить изображение {path:?}: {reason}")]
    ImageLoadFailed { path: PathBuf, reason: String },

    #[error("Соединение с X-сервером потеряно: {0}")]
    EventStreamDisconnected(String),

    #[error("Внутренняя ошибка: {0}")]
    Internal(String),
}

impl BlockerError {
    pub fn geometry_failed<T>(handle: WindowHandle, reason: impl ToString) -> Result<T> {
        Err(BlockerError::GeometryQueryFailed {
            handle,
            reason: reason.to_string(),
        })
    }

    /// Ошибки, после которых слушатель событий не может продолжать работу
    pub fn is_disconnect(&self) -> bool {
        matches!(self, BlockerError::EventStreamDisconnected(_))
    }
}

pub type Result<T> = std::result::Result<T, BlockerError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! blocker_error {
    (disconnected, $($arg:tt)*) => {
        $crate::error::BlockerError::EventStreamDisconnected(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::BlockerError::Internal(format!($($arg)*))
    };
}
