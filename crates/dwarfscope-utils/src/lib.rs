//! # dwarfscope utilities
//!
//! Logging setup shared by the dwarfscope binaries.

pub mod logging;

pub use logging::{
    init_logging, init_logging_with_config, init_logging_with_level, LogConfig, LogFormat, LogLevel, LoggingError,
    LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
