use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod formatters;
pub mod youtube;

use crate::request::LanguagePreference;
use crate::{DownloadError, Result};

/// One timed caption line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionEntry {
    /// Start time in seconds
    pub start: f64,

    /// Duration in seconds
    pub duration: f64,

    pub text: String,
}

/// A caption track in one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    /// Language code of the track
    pub language: String,

    /// Generated by speech recognition rather than authored
    pub auto_generated: bool,

    /// Title of the video, when the fetcher knows it
    pub title: Option<String>,

    pub entries: Vec<CaptionEntry>,
}

impl Caption {
    /// File name suffix naming the language actually used
    pub fn file_suffix(&self) -> String {
        if self.auto_generated {
            format!("_auto_{}", self.language)
        } else {
            format!("_{}", self.language)
        }
    }
}

/// Retrieves caption tracks for a video
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubtitleFetcher: Send + Sync {
    /// Caption in exactly `language`, or `None` when the video has no such track
    async fn fetch(&self, video_id: &str, language: &str) -> Result<Option<Caption>>;

    /// First available caption track, whatever its language
    async fn fetch_any(&self, video_id: &str) -> Result<Option<Caption>>;
}

/// Walk the preference list until a language is available
///
/// Queries the fetcher at most once per candidate language. Errors other than
/// "no such track" end the walk immediately.
pub async fn fetch_with_fallback(
    fetcher: &dyn SubtitleFetcher,
    video_id: &str,
    preference: &LanguagePreference,
) -> Result<Caption> {
    let languages = match preference {
        LanguagePreference::Any => {
            return fetcher.fetch_any(video_id).await?.ok_or_else(|| {
                DownloadError::Unavailable(format!("{} has no caption tracks", video_id)).into()
            });
        }
        LanguagePreference::Ordered(languages) => languages,
    };

    for (attempt, language) in languages.iter().enumerate() {
        match fetcher.fetch(video_id, language).await? {
            Some(caption) => {
                if attempt > 0 {
                    tracing::info!(
                        "Subtitles for {} not available in {}, using {}",
                        video_id,
                        languages[0],
                        caption.language
                    );
                }
                return Ok(caption);
            }
            None => tracing::debug!("No {} captions for {}", language, video_id),
        }
    }

    Err(DownloadError::Unavailable(format!("tried {}", languages.join(", "))).into())
}
