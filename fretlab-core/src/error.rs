//! # Error Types
//!
//! Typed failures surfaced by the core crate. Only [`AudioError`] is meant to
//! reach the end user; the other kinds are absorbed by callers or indicate a
//! programming mistake.

use thiserror::Error;

/// Result alias that carries the umbrella [`FretlabError`] type.
pub type Result<T> = std::result::Result<T, FretlabError>;

/// The input or output audio device could not be used.
///
/// Covers a missing device, a denied permission, an unsupported sample format
/// and any failure while building or starting a stream. Not retryable without
/// user action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl AudioError {
    pub fn unavailable<T: Into<String>>(reason: T) -> Self {
        Self::DeviceUnavailable(reason.into())
    }
}

/// A (string, fret) coordinate outside the fretboard.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("position out of range: string {string}, fret {fret}")]
    RangeViolation { string: usize, fret: usize },
}

/// A note name that is not one of the twelve pitch-class spellings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown note name: {0:?}")]
pub struct UnknownNote(pub String);

/// The configuration file could not be read or parsed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Common error type for the core crate.
#[derive(Debug, Error)]
pub enum FretlabError {
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Position(#[from] PositionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
