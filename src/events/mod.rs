pub mod window;

pub use window::{VisibilityState, WindowEvent, WindowGeometry, WindowHandle};
