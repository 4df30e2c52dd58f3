use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

use super::{Caption, CaptionEntry, SubtitleFetcher};
use crate::ytdlp::{CaptionFormat, VideoInfo, YtDlp};
use crate::{DownloadError, Result};

/// Caption formats we can parse, most preferred first
const PREFERRED_EXTS: [&str; 2] = ["json3", "vtt"];

/// How long a track listing is reused; caption URLs in it are signed and expire
const LISTING_TTL: Duration = Duration::from_secs(60);

struct CachedListing {
    info: Arc<VideoInfo>,
    fetched_at: Instant,
}

/// YouTube caption fetcher: track listing through yt-dlp, track download over HTTP
pub struct YtDlpSubtitleFetcher {
    ytdlp: YtDlp,
    client: Client,
    /// Listing of the last probed video, reused across fallback attempts
    listing: Mutex<Option<CachedListing>>,
    listing_ttl: Duration,
}

impl YtDlpSubtitleFetcher {
    pub fn new(ytdlp: YtDlp) -> Self {
        Self {
            ytdlp,
            client: Client::new(),
            listing: Mutex::new(None),
            listing_ttl: LISTING_TTL,
        }
    }

    pub fn with_listing_ttl(mut self, ttl: Duration) -> Self {
        self.listing_ttl = ttl;
        self
    }

    async fn listing(&self, video_id: &str) -> Result<Arc<VideoInfo>> {
        let mut cached = self.listing.lock().await;
        let fresh = cached
            .as_ref()
            .filter(|c| c.info.id == video_id && c.fetched_at.elapsed() < self.listing_ttl);
        if let Some(listing) = fresh {
            return Ok(listing.info.clone());
        }

        let info = Arc::new(self.ytdlp.probe(&watch_url(video_id)).await?);
        *cached = Some(CachedListing {
            info: info.clone(),
            fetched_at: Instant::now(),
        });
        Ok(info)
    }

    async fn download_track(
        &self,
        info: &VideoInfo,
        language: &str,
        auto_generated: bool,
        formats: &[CaptionFormat],
    ) -> Result<Option<Caption>> {
        let Some(format) = pick_format(formats) else {
            tracing::debug!("No parseable caption format for {} ({})", info.id, language);
            return Ok(None);
        };

        tracing::debug!(
            "Downloading {} captions for {} ({}, auto: {})",
            language,
            info.id,
            format.ext,
            auto_generated
        );

        let body = self
            .client
            .get(&format.url)
            .send()
            .await
            .context("Failed to request caption track")?
            .error_for_status()
            .context("Caption track request was rejected")?
            .text()
            .await
            .context("Failed to read caption track")?;

        let entries = match format.ext.as_str() {
            "json3" => parse_json3(&body)?,
            _ => parse_vtt(&body),
        };

        Ok(Some(Caption {
            language: language.to_string(),
            auto_generated,
            title: info.title.clone(),
            entries,
        }))
    }
}

impl Default for YtDlpSubtitleFetcher {
    fn default() -> Self {
        Self::new(YtDlp::default())
    }
}

#[async_trait]
impl SubtitleFetcher for YtDlpSubtitleFetcher {
    async fn fetch(&self, video_id: &str, language: &str) -> Result<Option<Caption>> {
        let info = self.listing(video_id).await?;

        // Authored tracks first, then the generated track of the same language
        if let Some(formats) = info.subtitles.get(language) {
            if let Some(caption) = self.download_track(&info, language, false, formats).await? {
                return Ok(Some(caption));
            }
        }
        // Generated listings also carry machine translations, which pick_format skips;
        // the spoken-language track may only be listed as `<lang>-orig`
        for key in [language.to_string(), format!("{}-orig", language)] {
            if let Some(formats) = info.automatic_captions.get(&key) {
                if let Some(caption) = self.download_track(&info, language, true, formats).await? {
                    return Ok(Some(caption));
                }
            }
        }

        Ok(None)
    }

    async fn fetch_any(&self, video_id: &str) -> Result<Option<Caption>> {
        let info = self.listing(video_id).await?;

        if let Some(language) = first_track(&info.subtitles, false) {
            return self
                .download_track(&info, &language, false, &info.subtitles[&language])
                .await;
        }
        if let Some(key) = first_track(&info.automatic_captions, true) {
            let language = key.strip_suffix("-orig").unwrap_or(&key);
            return self
                .download_track(&info, language, true, &info.automatic_captions[&key])
                .await;
        }

        Ok(None)
    }
}

fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", urlencoding::encode(video_id))
}

/// Parseable, untranslated format of a track
fn pick_format(formats: &[CaptionFormat]) -> Option<&CaptionFormat> {
    PREFERRED_EXTS
        .iter()
        .find_map(|ext| formats.iter().find(|f| f.ext == *ext && !is_translation(f)))
}

/// Machine translation of another track, marked by a `tlang` query parameter
fn is_translation(format: &CaptionFormat) -> bool {
    match Url::parse(&format.url) {
        Ok(url) => url.query_pairs().any(|(key, _)| key == "tlang"),
        Err(_) => format.url.contains("tlang="),
    }
}

/// Deterministic pick of the first track in a listing
///
/// Generated listings contain machine translations into every language; the
/// `-orig` entry is the spoken language and is preferred there.
fn first_track(tracks: &HashMap<String, Vec<CaptionFormat>>, generated: bool) -> Option<String> {
    let mut languages: Vec<&String> = tracks
        .iter()
        .filter(|(_, formats)| pick_format(formats).is_some())
        .map(|(language, _)| language)
        .collect();
    languages.sort();

    if generated {
        if let Some(original) = languages.iter().find(|l| l.ends_with("-orig")) {
            return Some((*original).clone());
        }
    }

    languages.first().map(|l| (*l).clone())
}

#[derive(Debug, Deserialize)]
struct Json3 {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
struct Json3Event {
    #[serde(rename = "tStartMs", default)]
    start_ms: u64,

    #[serde(rename = "dDurationMs", default)]
    duration_ms: u64,

    #[serde(default)]
    segs: Vec<Json3Segment>,
}

#[derive(Debug, Deserialize)]
struct Json3Segment {
    #[serde(default)]
    utf8: String,
}

/// Parse YouTube's json3 timed-text format
pub fn parse_json3(body: &str) -> Result<Vec<CaptionEntry>> {
    let document: Json3 = serde_json::from_str(body)
        .map_err(|e| DownloadError::UnsupportedFormat(format!("malformed json3 captions: {}", e)))?;

    Ok(document
        .events
        .into_iter()
        .filter_map(|event| {
            let text: String = event.segs.iter().map(|seg| seg.utf8.as_str()).collect();
            let text = text.trim();
            (!text.is_empty()).then(|| CaptionEntry {
                start: event.start_ms as f64 / 1000.0,
                duration: event.duration_ms as f64 / 1000.0,
                text: text.to_string(),
            })
        })
        .collect())
}

/// Parse WebVTT cues, dropping inline markup
pub fn parse_vtt(body: &str) -> Vec<CaptionEntry> {
    let mut entries = Vec::new();
    let mut lines = body.lines().peekable();

    while let Some(line) = lines.next() {
        let Some((start, end)) = line.split_once("-->") else {
            continue;
        };
        let (Some(start), Some(end)) = (
            parse_vtt_timestamp(start.trim()),
            end.split_whitespace().next().and_then(parse_vtt_timestamp),
        ) else {
            continue;
        };

        let mut text = Vec::new();
        while let Some(next) = lines.peek() {
            if next.trim().is_empty() {
                break;
            }
            text.push(strip_tags(next).trim().to_string());
            lines.next();
        }

        let text = text.join("\n");
        if !text.trim().is_empty() {
            entries.push(CaptionEntry {
                start,
                duration: (end - start).max(0.0),
                text,
            });
        }
    }

    entries
}

/// `HH:MM:SS.mmm` or `MM:SS.mmm` to seconds
fn parse_vtt_timestamp(value: &str) -> Option<f64> {
    let mut seconds = 0.0;
    for part in value.split(':') {
        seconds = seconds * 60.0 + part.parse::<f64>().ok()?;
    }
    Some(seconds)
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
