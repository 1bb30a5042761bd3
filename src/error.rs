//! Audio engine error types

use std::path::PathBuf;

use thiserror::Error;

use crate::session::StreamRole;

/// Errors that can occur during audio operations
///
/// Nothing here is fatal to the engine: a failed decode skips playback,
/// a failed stream open leaves that role silent.
#[derive(Error, Debug)]
pub enum AudioError {
    /// Could not read the sound file at all
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File was readable but no decodable audio track was found
    #[error("no audio track found in {path}")]
    NoAudioTrack { path: PathBuf },

    /// Container/codec not recognized by the decoder
    #[error("unsupported audio format in {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// Decoder gave up mid-file
    #[error("failed to decode {path}: {reason}")]
    DecodeFailed { path: PathBuf, reason: String },

    /// Failed to enumerate audio devices
    #[error("failed to enumerate audio devices: {0}")]
    DeviceEnumeration(String),

    /// Requested device index does not exist
    #[error("audio device not found: {0}")]
    DeviceNotFound(String),

    /// No system default device for the requested direction
    #[error("no default audio device: {0}")]
    NoDefaultDevice(String),

    /// Failed to get a device configuration
    #[error("failed to get device config: {0}")]
    DeviceConfig(String),

    /// Failed to build a stream for the given role
    #[error("failed to build {role} stream: {reason}")]
    StreamBuild { role: StreamRole, reason: String },

    /// Stream was built but refused to start
    #[error("failed to start {role} stream: {reason}")]
    StreamStart { role: StreamRole, reason: String },
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
