//! capturer: in-process capture of stdout and stderr.
//!
//! [`capture`] runs a closure with the process standard streams redirected
//! into pipes and returns what was written as three artifacts: stdout only,
//! stderr only, and both streams combined in the order their chunks arrived.
//!
//! - [`data_capture`]: redirection, pumps, tee and the capture session
//! - [`configuration`]: TOML-loadable [`CaptureConfig`]
//! - [`error_handling`]: [`CaptureError`] and [`ConfigError`]

pub mod configuration;
pub mod data_capture;
pub mod error_handling;

pub use configuration::config::CaptureConfig;
pub use data_capture::{capture, capture_with, ChunkRecord, OutputResult, StdStream};
pub use error_handling::types::{CaptureError, ConfigError};
