//! Display connection: responsibility and boundaries
//!
//! This module and its submodules are responsible ONLY for talking to the display
//! server: subscribing to window lifecycle notifications, translating them into
//! `WindowEvent`s and answering class-name and geometry queries.
//! It MUST NOT decide which windows are tracked; admission and debounce belong to
//! the tracker.

mod dry_run;
mod x11;
mod r#trait;

#[cfg(test)]
pub use self::dry_run::ScriptedDisplay;
pub use self::r#trait::{create_display_factory, DisplayConnection, DisplayFactory};
