//! Fallback for targets without descriptor-level redirection.

use crate::configuration::config::CaptureConfig;
use crate::error_handling::types::CaptureError;

use super::types::OutputResult;

pub fn capture<F: FnOnce()>(f: F) -> Result<OutputResult, CaptureError> {
    capture_with(&CaptureConfig::default(), f)
}

/// Always fails with [`CaptureError::Unsupported`] without running `f`.
pub fn capture_with<F: FnOnce()>(_config: &CaptureConfig, _f: F) -> Result<OutputResult, CaptureError> {
    log::warn!("stdio capture requested on a platform without descriptor redirection");
    Err(CaptureError::Unsupported)
}
