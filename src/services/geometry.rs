use crate::error::Result;
use crate::events::{WindowGeometry, WindowHandle};

/// Запрос текущей геометрии окна у дисплейного сервера.
///
/// Окно может исчезнуть между уведомлением и запросом, поэтому ошибка
/// `GeometryQueryFailed` для вызывающего - штатная ситуация, а не авария.
pub trait GeometryFetcher {
    fn fetch(&self, handle: WindowHandle) -> Result<WindowGeometry>;
}
