//! Telemetry initialization
//!
//! Structured logging through `tracing`. Output is human-readable by default and JSON
//! when `LOG_FORMAT=json`.

mod init_basic;

pub use init_basic::{init_telemetry, shutdown_telemetry};
