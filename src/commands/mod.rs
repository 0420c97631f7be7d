//! Command-line surface of the `sbox` binary.

pub mod daemon;
pub mod parser;

pub use daemon::dispatch;
pub use parser::*;
