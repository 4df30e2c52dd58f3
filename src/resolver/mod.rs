use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod youtube;

use crate::request::Resolution;
use crate::task::TaskTracker;
use crate::Result;

/// Which kind of stream a task needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSelection {
    /// Video with audio, at the requested resolution or the nearest one offered
    Video(Option<Resolution>),
    /// Best audio-only stream
    Audio,
}

/// Stream chosen for a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStream {
    /// Original URL that was resolved
    pub url: String,

    pub video_id: String,

    /// Title of the video if the platform reported one
    pub title: Option<String>,

    /// Resolution actually chosen; `None` for audio streams
    pub resolution: Option<Resolution>,

    /// Backend-specific selector identifying the stream(s) to fetch
    pub format_selector: String,

    /// Container the download should end up in, if the backend merges streams
    pub merge_format: Option<String>,

    /// Expected bytes across all fetched streams, if known
    pub expected_size: Option<u64>,
}

/// Enumerates streams behind a URL and downloads the chosen one
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Pick the stream matching `selection`, falling back to the nearest resolution
    async fn resolve(&self, url: &str, selection: StreamSelection) -> Result<ResolvedStream>;

    /// Download the stream into `staging_dir` and return the downloaded file
    ///
    /// Byte progress is reported through `tracker`, scaled into `0..=ceiling`.
    async fn download(
        &self,
        stream: &ResolvedStream,
        staging_dir: &Path,
        tracker: &TaskTracker,
        ceiling: u8,
    ) -> Result<PathBuf>;
}

/// Choose a resolution from those offered
///
/// Prefers the highest offered resolution not above the request; when every
/// offered stream is above it, takes the lowest one. No request means best.
pub fn select_resolution(available: &[Resolution], requested: Option<Resolution>) -> Option<Resolution> {
    let best = available.iter().copied().max()?;
    let Some(requested) = requested else {
        return Some(best);
    };

    available
        .iter()
        .copied()
        .filter(|r| *r <= requested)
        .max()
        .or_else(|| available.iter().copied().min())
}
