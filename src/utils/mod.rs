//! Helpers shared by the CLI layer.

pub mod format;
pub mod logger;

pub use format::{format_bytes, format_duration, truncate};
pub use logger::init_logger;
