use crate::blocker_error;
use crate::error::{BlockerError, Result};
use crate::events::{VisibilityState, WindowEvent, WindowGeometry, WindowHandle};
use crate::services::geometry::GeometryFetcher;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::errors::ReplyError;
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ConnectionExt as _, EventMask, Visibility, Window,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

pub struct X11Display {
    conn: RustConnection,
    root: Window,
}

impl X11Display {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| blocker_error!(internal, "Экран {} не найден", screen_num))?;

        // Уведомления о создании/отображении/удалении всех окон верхнего уровня
        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new()
                .event_mask(EventMask::SUBSTRUCTURE_NOTIFY | EventMask::VISIBILITY_CHANGE),
        )
        .map_err(|e| blocker_error!(disconnected, "{}", e))?;
        conn.flush()
            .map_err(|e| blocker_error!(disconnected, "{}", e))?;

        info!("Подключено к X11: screen={} root=0x{:08x}", screen_num, root);
        Ok(Self { conn, root })
    }

    fn translate(&self, event: Event) -> Option<WindowEvent> {
        let event = match event {
            Event::CreateNotify(e) => {
                self.watch_visibility(e.window);
                WindowEvent::Create {
                    handle: WindowHandle(e.window),
                }
            }
            Event::MapNotify(e) => WindowEvent::Map {
                handle: WindowHandle(e.window),
            },
            Event::UnmapNotify(e) => WindowEvent::Unmap {
                handle: WindowHandle(e.window),
            },
            Event::DestroyNotify(e) => WindowEvent::Destroy {
                handle: WindowHandle(e.window),
            },
            Event::ConfigureNotify(e) => WindowEvent::Configure {
                handle: WindowHandle(e.window),
            },
            Event::VisibilityNotify(e) => WindowEvent::VisibilityChange {
                handle: WindowHandle(e.window),
                state: visibility_state(e.state),
            },
            Event::Error(e) => {
                debug!("Ошибка X11 в очереди событий: {:?}", e);
                return None;
            }
            _ => return None,
        };
        Some(event)
    }

    /// VisibilityNotify приходит только при подписке на само окно
    fn watch_visibility(&self, window: Window) {
        let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::VISIBILITY_CHANGE);
        match self.conn.change_window_attributes(window, &aux) {
            // Окно может исчезнуть раньше, чем запрос дойдёт до сервера
            Ok(cookie) => cookie.ignore_error(),
            Err(e) => debug!("Не удалось подписаться на видимость 0x{:08x}: {}", window, e),
        }
        if let Err(e) = self.conn.flush() {
            debug!("Не удалось отправить запрос X-серверу: {}", e);
        }
    }
}

/// Ждать данных на дескрипторе не дольше `timeout`, не просыпаясь впустую
fn wait_readable(fd: RawFd, timeout: Duration) -> Result<()> {
    let millis = libc::c_int::try_from(timeout.as_millis().max(1)).unwrap_or(libc::c_int::MAX);
    let mut poll_fd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    // SAFETY: один pollfd на стеке, дескриптор открыт на время вызова
    let rc = unsafe { libc::poll(&mut poll_fd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(blocker_error!(disconnected, "poll: {}", err));
        }
    }
    Ok(())
}

fn visibility_state(state: Visibility) -> VisibilityState {
    if state == Visibility::UNOBSCURED {
        VisibilityState::Unobscured
    } else if state == Visibility::PARTIALLY_OBSCURED {
        VisibilityState::PartiallyObscured
    } else {
        VisibilityState::FullyObscured
    }
}

fn reply_error(handle: WindowHandle, e: ReplyError) -> BlockerError {
    match e {
        ReplyError::ConnectionError(e) => blocker_error!(disconnected, "{}", e),
        ReplyError::X11Error(e) => BlockerError::GeometryQueryFailed {
            handle,
            reason: format!("{:?}", e.error_kind),
        },
    }
}

impl GeometryFetcher for X11Display {
    fn fetch(&self, handle: WindowHandle) -> Result<WindowGeometry> {
        let geometry = self
            .conn
            .get_geometry(handle.value())
            .map_err(|e| blocker_error!(disconnected, "{}", e))?
            .reply()
            .map_err(|e| reply_error(handle, e))?;

        // GetGeometry отдаёт координаты относительно родителя, переводим в корневые
        let absolute = self
            .conn
            .translate_coordinates(handle.value(), geometry.root, 0, 0)
            .map_err(|e| blocker_error!(disconnected, "{}", e))?
            .reply()
            .map_err(|e| reply_error(handle, e))?;

        Ok(WindowGeometry::new(
            i32::from(absolute.dst_x),
            i32::from(absolute.dst_y),
            u32::from(geometry.width),
            u32::from(geometry.height),
        )
        .with_border(u32::from(geometry.border_width)))
    }
}

impl super::r#trait::DisplayConnection for X11Display {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<WindowEvent>> {
        let deadline = Instant::now() + timeout;

        loop {
            let polled = self
                .conn
                .poll_for_event()
                .map_err(|e| blocker_error!(disconnected, "{}", e))?;

            if let Some(event) = polled {
                if let Some(event) = self.translate(event) {
                    return Ok(Some(event));
                }
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            wait_readable(self.conn.stream().as_raw_fd(), deadline - now)?;
        }
    }

    fn class_name(&self, handle: WindowHandle) -> Result<Option<String>> {
        let reply = self
            .conn
            .get_property(
                false,
                handle.value(),
                AtomEnum::WM_CLASS,
                AtomEnum::STRING,
                0,
                1024,
            )
            .map_err(|e| blocker_error!(disconnected, "{}", e))?
            .reply();

        let prop = match reply {
            Ok(prop) => prop,
            Err(ReplyError::X11Error(e)) => {
                debug!("WM_CLASS недоступен для {}: {:?}", handle, e.error_kind);
                return Ok(None);
            }
            Err(ReplyError::ConnectionError(e)) => {
                return Err(blocker_error!(disconnected, "{}", e))
            }
        };

        // WM_CLASS = "instance\0class\0"; блок-лист сравнивается с instance
        Ok(prop
            .value
            .split(|&b| b == 0)
            .next()
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned()))
    }
}

impl Drop for X11Display {
    fn drop(&mut self) {
        info!("Закрываем соединение с X11 (root=0x{:08x})", self.root);
    }
}
