//! Error types for the broadcast engine

use std::io;

/// Result type alias for broadcast engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the broadcast engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Media identifier does not resolve to a file
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// Media file exists but cannot be read
    #[error("Source unreadable: {id}: {source}")]
    SourceUnreadable {
        id: String,
        #[source]
        source: io::Error,
    },

    /// Mixer could not be started or produced no audio
    #[error("Mixer failure: {0}")]
    MixerFailure(String),

    /// Control text that maps to no command
    #[error("Invalid command: {0:?}")]
    InvalidCommand(String),

    /// Throttle rate must be strictly positive
    #[error("Invalid bitrate: {0} bytes/s")]
    InvalidBitrate(u64),

    /// An effect is already audible
    #[error("An effect is already playing")]
    SpliceInProgress,

    /// Effect requested while nothing plays
    #[error("Nothing is playing")]
    NotPlaying,

    /// A stop arrived while the operation was in flight
    #[error("Operation cancelled by stop")]
    Cancelled,

    /// The controller task is gone
    #[error("Broadcast controller is not running")]
    ControllerClosed,

    /// Configuration error (from spotconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a mixer failure from any message
    pub fn mixer(msg: impl Into<String>) -> Self {
        Self::MixerFailure(msg.into())
    }

    /// Map an IO error raised while touching a media file
    pub fn from_media_io(id: impl Into<String>, err: io::Error) -> Self {
        let id = id.into();
        if err.kind() == io::ErrorKind::NotFound {
            Self::SourceNotFound(id)
        } else {
            Self::SourceUnreadable { id, source: err }
        }
    }
}
