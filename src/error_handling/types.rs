use std::fmt;

use crate::data_capture::types::{OutputResult, StdStream};

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures of a capture session.
///
/// Whatever the variant, the session has already tried to put both standard
/// streams back before the error reaches the caller.
#[derive(Debug)]
pub enum CaptureError {
    /// The capture configuration was rejected before any stream was touched.
    Config(ConfigError),
    /// The stream could not be swapped for a pipe; nothing was left redirected.
    RedirectionError(StdStream, std::io::Error),
    /// Another capture already holds the stream.
    AlreadyRedirected(StdStream),
    /// Descriptor-level redirection is not available on this platform.
    Unsupported,
    /// The original stream could not be put back. The descriptor was pointed
    /// at `/dev/null` instead, so later writes are discarded rather than reach
    /// a stale pipe. Carries
    /// the output if the pumps still managed to drain.
    RestorationError(StdStream, std::io::Error, Option<Box<OutputResult>>),
    /// A pump failed to read its pipe before end-of-stream; its partial
    /// buffer is discarded.
    DrainError(String, std::io::Error),
    /// A relay failed to hand a chunk to one of its sinks.
    WriteError(String, std::io::Error),
}

impl CaptureError {
    /// Best-effort output salvaged from a failed restoration.
    pub fn partial_output(&self) -> Option<&OutputResult> {
        match self {
            CaptureError::RestorationError(_, _, partial) => partial.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Config(e) => write!(f, "Invalid capture configuration: {}", e),
            CaptureError::RedirectionError(s, e) => write!(f, "Failed to redirect {}: {}", s, e),
            CaptureError::AlreadyRedirected(s) => {
                write!(f, "{} is already redirected by another capture", s)
            }
            CaptureError::Unsupported => {
                write!(f, "Stream redirection is not supported on this platform")
            }
            CaptureError::RestorationError(s, e, _) => write!(f, "Failed to restore {}: {}", s, e),
            CaptureError::DrainError(name, e) => write!(f, "Pump {} failed to drain: {}", name, e),
            CaptureError::WriteError(name, e) => write!(f, "Pump {} failed to relay: {}", name, e),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CaptureError::Config(e) => Some(e),
            CaptureError::RedirectionError(_, e)
            | CaptureError::RestorationError(_, e, _)
            | CaptureError::DrainError(_, e)
            | CaptureError::WriteError(_, e) => Some(e),
            CaptureError::AlreadyRedirected(_) | CaptureError::Unsupported => None,
        }
    }
}

impl From<ConfigError> for CaptureError {
    fn from(err: ConfigError) -> Self {
        CaptureError::Config(err)
    }
}
