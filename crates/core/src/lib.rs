//! # trellis-core
//!
//! Environment configuration and logging shared by the trellis migration
//! engine and its command line tool.

pub mod config;
pub mod logging;

pub use config::*;
pub use logging::init_logging;
