pub mod block_list;
pub mod blocker;
pub mod display;
pub mod geometry;
pub mod overlay;
pub mod tracker;
pub mod window_table;

pub use blocker::BlockerSource;
pub use display::create_display_factory;
pub use overlay::LogConsumer;
