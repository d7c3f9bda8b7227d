//! Infrastructure module - logging, configuration, paths

pub mod config;
pub mod logging;
pub mod paths;

pub use config::Settings;
pub use logging::{debug_log, init_tracing, is_debug_mode, set_debug_mode, LoggingGuard};
