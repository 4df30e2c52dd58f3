//! ytgrab - A Rust CLI tool for downloading YouTube videos, subtitles and audio
//!
//! This library turns a submitted download form into independent download tasks.
//! Stream resolution is delegated to yt-dlp, caption retrieval to the platform's
//! caption tracks and audio compression to ffmpeg; the orchestrator sequences those
//! calls on worker tasks and reports progress back to the presentation layer.

pub mod cli;
pub mod config;
pub mod orchestrator;
pub mod output;
pub mod request;
pub mod resolver;
pub mod subtitles;
pub mod task;
pub mod transcode;
pub mod utils;
pub mod ytdlp;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use orchestrator::{Completion, Orchestrator, TaskHandle, TaskOutcome};
pub use request::{DownloadForm, DownloadKind, DownloadRequest, LanguagePreference, Resolution};
pub use task::{ProgressEvent, ProgressReporter, TaskId, TaskStatus};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Terminal failure kinds of a download task
///
/// Every error raised inside a task is folded into one of these at the task
/// boundary, so nothing library-specific reaches the presentation layer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Subtitles unavailable: {0}")]
    Unavailable(String),

    #[error("Transcoding failed: {0}")]
    TranscodeError(String),
}

impl DownloadError {
    /// Short human-readable text for the status line
    pub fn user_message(&self) -> String {
        match self {
            DownloadError::InvalidRequest(detail) => format!("Please check the input: {}", detail),
            DownloadError::NetworkError(_) => "Network problem, please try again".to_string(),
            DownloadError::NotFound(_) => "The video could not be found".to_string(),
            DownloadError::UnsupportedFormat(detail) => format!("Format not offered: {}", detail),
            DownloadError::Unavailable(detail) => format!("No subtitles available ({})", detail),
            DownloadError::TranscodeError(_) => "Audio conversion failed (is ffmpeg installed?)".to_string(),
        }
    }

    /// Stable kind name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::InvalidRequest(_) => "InvalidRequest",
            DownloadError::NetworkError(_) => "NetworkError",
            DownloadError::NotFound(_) => "NotFound",
            DownloadError::UnsupportedFormat(_) => "UnsupportedFormat",
            DownloadError::Unavailable(_) => "Unavailable",
            DownloadError::TranscodeError(_) => "TranscodeError",
        }
    }

    /// Fold an arbitrary error into the closed taxonomy
    pub fn classify(error: anyhow::Error) -> Self {
        if let Some(known) = error.downcast_ref::<DownloadError>() {
            return known.clone();
        }

        for cause in error.chain() {
            if let Some(known) = cause.downcast_ref::<DownloadError>() {
                return known.clone();
            }
            if cause.downcast_ref::<reqwest::Error>().is_some() {
                return DownloadError::NetworkError(format!("{:#}", error));
            }
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::NotFound {
                    return DownloadError::NotFound(format!("{:#}", error));
                }
                return DownloadError::NetworkError(format!("{:#}", error));
            }
        }

        DownloadError::NetworkError(format!("{:#}", error))
    }
}
