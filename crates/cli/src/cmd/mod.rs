//! CLI command implementations

pub mod limits;
pub mod watch;
