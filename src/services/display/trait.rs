use crate::config::Config;
use crate::error::Result;
use crate::events::{WindowEvent, WindowHandle};
use crate::services::geometry::GeometryFetcher;
use std::time::Duration;

/// Source of window lifecycle events from the display server
pub trait DisplayConnection: GeometryFetcher + Send {
    /// Wait up to `timeout` for the next window event.
    ///
    /// `Ok(None)` means the timeout elapsed; the caller uses it to check for shutdown.
    /// `EventStreamDisconnected` means the connection is gone for good.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<WindowEvent>>;

    /// Class name used for block-list matching, `None` if the window has none
    fn class_name(&self, handle: WindowHandle) -> Result<Option<String>>;
}

/// Factory used by the supervisor to (re)open a connection
pub type DisplayFactory = Box<dyn Fn() -> Result<Box<dyn DisplayConnection>> + Send + Sync>;

/// Factory function to create an appropriate display connection based on the dry_run flag
pub fn create_display_factory(config: &Config, dry_run: bool) -> DisplayFactory {
    if dry_run {
        let windows = config.windows.clone();
        Box::new(move || {
            Ok(Box::new(super::dry_run::ScriptedDisplay::demo(&windows))
                as Box<dyn DisplayConnection>)
        })
    } else {
        Box::new(|| {
            Ok(Box::new(super::x11::X11Display::connect()?) as Box<dyn DisplayConnection>)
        })
    }
}
