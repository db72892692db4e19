//! Error types for the audio tunnel

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    #[error("Device busy")]
    DeviceBusy,
}

/// Clip framing and decode errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Clip text has odd length: {0}")]
    OddLength(usize),

    #[error("Invalid hex character {character:?} at index {index}")]
    InvalidHex { character: char, index: usize },

    #[error("Clip is empty")]
    EmptyClip,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid server address: {0:?}")]
    InvalidAddress(String),

    #[error("Failed to parse settings: {0}")]
    Parse(String),

    #[error("Failed to access settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("No settings directory available")]
    NoSettingsDir,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
