//! Shared utilities for the Avalanche finality subsystem.
//!
//! - [`logging`]: tracing subscriber setup driven by [`LogConfig`]

pub mod logging;

pub use logging::{LogConfig, LogFormat, LogLevel, LoggingError};
