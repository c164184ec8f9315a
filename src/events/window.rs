use serde::{Deserialize, Serialize};
use std::fmt;

/// Идентификатор окна, выданный X-сервером
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowHandle(pub u32);

impl WindowHandle {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Геометрия окна в координатах корневого окна
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub border_width: u32,
}

impl WindowGeometry {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            border_width: 0,
        }
    }

    pub fn with_border(mut self, border_width: u32) -> Self {
        self.border_width = border_width;
        self
    }
}

impl fmt::Display for WindowGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "x:{} y:{} w:{} h:{} bw:{}",
            self.x, self.y, self.width, self.height, self.border_width
        )
    }
}

/// Состояние видимости из VisibilityNotify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VisibilityState {
    Unobscured,
    PartiallyObscured,
    FullyObscured,
}

/// Событие жизненного цикла окна
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Create { handle: WindowHandle },
    Map { handle: WindowHandle },
    Unmap { handle: WindowHandle },
    Destroy { handle: WindowHandle },
    Configure { handle: WindowHandle },
    VisibilityChange {
        handle: WindowHandle,
        state: VisibilityState,
    },
}

impl WindowEvent {
    pub fn handle(&self) -> WindowHandle {
        match *self {
            WindowEvent::Create { handle }
            | WindowEvent::Map { handle }
            | WindowEvent::Unmap { handle }
            | WindowEvent::Destroy { handle }
            | WindowEvent::Configure { handle }
            | WindowEvent::VisibilityChange { handle, .. } => handle,
        }
    }

    /// Create/Map/Configure/VisibilityChange одинаково (пере)активируют окно
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            WindowEvent::Create { .. }
                | WindowEvent::Map { .. }
                | WindowEvent::Configure { .. }
                | WindowEvent::VisibilityChange { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WindowEvent::Create { .. } => "create",
            WindowEvent::Map { .. } => "map",
            WindowEvent::Unmap { .. } => "unmap",
            WindowEvent::Destroy { .. } => "destroy",
            WindowEvent::Configure { .. } => "configure",
            WindowEvent::VisibilityChange { .. } => "visibility",
        }
    }
}

impl fmt::Display for WindowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowEvent::VisibilityChange { handle, state } => {
                write!(f, "{}({}, {:?})", self.kind(), handle, state)
            }
            _ => write!(f, "{}({})", self.kind(), self.handle()),
        }
    }
}
