use thiserror::Error;

use crate::common::types::AnyError;

/// Failures surfaced by the playback engine.
///
/// The `Display` text of every variant is the user-facing sentence the
/// front-end posts verbatim, so the wording here matches what members see
/// in chat.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("You need to be in a voice channel to use this command!")]
    NotInVoiceChannel,

    #[error("I need permission to {0} in this voice channel!")]
    MissingPermission(&'static str),

    #[error("This voice channel is full!")]
    ChannelFull,

    #[error("Nothing is currently playing!")]
    NothingPlaying,

    #[error("The queue is empty!")]
    EmptyQueue,

    #[error("Volume must be between 0 and 100!")]
    InvalidVolume(i64),

    #[error("Could not find any songs with that query!")]
    NoResults,

    #[error("Could not get song URL!")]
    MissingUrl,

    #[error("Failed to connect to voice channel {channel} after {attempts} attempts")]
    ConnectFailed { channel: String, attempts: u32 },

    #[error("Failed to download song: {0}")]
    Download(#[source] AnyError),

    #[error("Downloaded file is not accessible")]
    UnreadableDownload,

    #[error("Search failed: {0}")]
    Search(#[source] AnyError),

    #[error("Voice transport error: {0}")]
    Transport(#[source] AnyError),
}

impl PlaybackError {
    /// User input errors are reported as-is and never retried.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::NotInVoiceChannel
                | Self::MissingPermission(_)
                | Self::ChannelFull
                | Self::NothingPlaying
                | Self::EmptyQueue
                | Self::InvalidVolume(_)
        )
    }
}

/// Failures surfaced by the generation pipeline.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation backend returned status {status}")]
    BackendStatus { status: u16 },

    #[error("generation backend timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("generation request failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<GenerationError>,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation worker dropped the request")]
    WorkerGone,
}

impl GenerationError {
    /// Transient failures are retried with backoff before being surfaced.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::BackendStatus { status } => *status == 429 || (500..600).contains(status),
            Self::Http(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_error_classification() {
        assert!(PlaybackError::NotInVoiceChannel.is_user_error());
        assert!(PlaybackError::InvalidVolume(150).is_user_error());
        assert!(
            !PlaybackError::ConnectFailed {
                channel: "General".into(),
                attempts: 3
            }
            .is_user_error()
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            GenerationError::Timeout(std::time::Duration::from_secs(30)).is_transient()
        );
        assert!(GenerationError::BackendStatus { status: 503 }.is_transient());
        assert!(!GenerationError::BackendStatus { status: 400 }.is_transient());
        assert!(!GenerationError::WorkerGone.is_transient());
    }
}
