use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

use crate::DownloadError;

/// What a single task produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    Video,
    Subtitle,
    Audio,
}

impl DownloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadKind::Video => "video",
            DownloadKind::Subtitle => "subtitle",
            DownloadKind::Audio => "audio",
        }
    }
}

impl fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video resolutions a request may ask for, ordered from lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Resolution {
    P144,
    P240,
    P360,
    P480,
    P720,
    P1080,
    P1440,
    P2160,
}

impl Resolution {
    pub const ALL: [Resolution; 8] = [
        Resolution::P144,
        Resolution::P240,
        Resolution::P360,
        Resolution::P480,
        Resolution::P720,
        Resolution::P1080,
        Resolution::P1440,
        Resolution::P2160,
    ];

    /// Frame height in pixels
    pub fn height(&self) -> u32 {
        match self {
            Resolution::P144 => 144,
            Resolution::P240 => 240,
            Resolution::P360 => 360,
            Resolution::P480 => 480,
            Resolution::P720 => 720,
            Resolution::P1080 => 1080,
            Resolution::P1440 => 1440,
            Resolution::P2160 => 2160,
        }
    }

    /// Exact match on a standard height
    pub fn from_height(height: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.height() == height)
    }

    /// Closest standard resolution for an arbitrary frame height
    ///
    /// Streams with non-16:9 aspect ratios report heights such as 1072 or 608.
    pub fn nearest(height: u32) -> Self {
        Self::ALL
            .into_iter()
            .min_by_key(|r| r.height().abs_diff(height))
            .unwrap_or(Resolution::P720)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p", self.height())
    }
}

impl FromStr for Resolution {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_lowercase();
        let digits = trimmed.strip_suffix('p').unwrap_or(&trimmed);
        digits
            .parse::<u32>()
            .ok()
            .and_then(Resolution::from_height)
            .ok_or_else(|| {
                DownloadError::InvalidRequest(format!(
                    "unknown resolution '{}' (expected one of {})",
                    s.trim(),
                    Resolution::ALL.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", ")
                ))
            })
    }
}

/// Which caption languages a subtitle task may use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanguagePreference {
    /// Languages tried in order; the first one is the requested language
    Ordered(Vec<String>),
    /// First available caption track, language unconstrained
    Any,
}

impl LanguagePreference {
    /// Build a preference from the selector value and a fallback list
    pub fn parse(primary: &str, fallback: &[String]) -> Result<Self, DownloadError> {
        let primary = normalize_language(primary)?;
        let Some(primary) = primary else {
            return Ok(LanguagePreference::Any);
        };

        let mut ordered = vec![primary];
        for lang in fallback {
            match normalize_language(lang)? {
                Some(code) if !ordered.contains(&code) => ordered.push(code),
                Some(_) => {}
                None => {
                    return Err(DownloadError::InvalidRequest(
                        "'all' cannot be used as a fallback language".to_string(),
                    ))
                }
            }
        }

        Ok(LanguagePreference::Ordered(ordered))
    }

    pub fn candidates(&self) -> &[String] {
        match self {
            LanguagePreference::Ordered(langs) => langs,
            LanguagePreference::Any => &[],
        }
    }
}

impl Default for LanguagePreference {
    fn default() -> Self {
        LanguagePreference::Ordered(vec!["ko".to_string(), "en".to_string()])
    }
}

impl fmt::Display for LanguagePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LanguagePreference::Ordered(langs) => f.write_str(&langs.join(" > ")),
            LanguagePreference::Any => f.write_str("any"),
        }
    }
}

/// Map a selector value to a caption language code; `None` means any language
fn normalize_language(value: &str) -> Result<Option<String>, DownloadError> {
    let trimmed = value.trim();
    match trimmed.to_lowercase().as_str() {
        "all" | "any" | "*" => return Ok(None),
        "korean" => return Ok(Some("ko".to_string())),
        "english" => return Ok(Some("en".to_string())),
        _ => {}
    }

    let valid = (2..=12).contains(&trimmed.len())
        && trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !valid {
        return Err(DownloadError::InvalidRequest(format!(
            "'{}' is not a language code",
            trimmed
        )));
    }

    Ok(Some(trimmed.to_string()))
}

/// Caption file layout
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    /// One caption line per text line
    #[default]
    Txt,
    /// SubRip with cue timings
    Srt,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Txt => "txt",
            SubtitleFormat::Srt => "srt",
        }
    }
}

/// One validated unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub kind: DownloadKind,
    pub resolution: Option<Resolution>,
    pub language: LanguagePreference,
    pub subtitle_format: SubtitleFormat,
    /// Output file stem chosen by the user
    pub filename: Option<String>,
    pub directory: PathBuf,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, kind: DownloadKind, directory: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            kind,
            resolution: None,
            language: LanguagePreference::default(),
            subtitle_format: SubtitleFormat::default(),
            filename: None,
            directory: directory.into(),
        }
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_language(mut self, language: LanguagePreference) -> Self {
        self.language = language;
        self
    }

    pub fn with_subtitle_format(mut self, format: SubtitleFormat) -> Self {
        self.subtitle_format = format;
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Check the request without touching the network; returns the video id
    pub fn validate(&self) -> Result<String, DownloadError> {
        if self.url.trim().is_empty() {
            return Err(DownloadError::InvalidRequest("URL is empty".to_string()));
        }

        let video_id = extract_video_id(&self.url)?;

        if self.directory.as_os_str().is_empty() {
            return Err(DownloadError::InvalidRequest(
                "download directory is not set".to_string(),
            ));
        }

        if self.kind == DownloadKind::Subtitle {
            if let LanguagePreference::Ordered(langs) = &self.language {
                if langs.is_empty() {
                    return Err(DownloadError::InvalidRequest(
                        "no subtitle language selected".to_string(),
                    ));
                }
            }
            for lang in self.language.candidates() {
                if normalize_language(lang)?.is_none() {
                    return Err(DownloadError::InvalidRequest(format!(
                        "'{}' cannot be combined with other languages",
                        lang
                    )));
                }
            }
        }

        if let Some(name) = &self.filename {
            if name.trim().is_empty() {
                return Err(DownloadError::InvalidRequest("file name is blank".to_string()));
            }
        }

        Ok(video_id)
    }
}

/// Raw values as entered by the user before validation
#[derive(Debug, Clone, Default)]
pub struct DownloadForm {
    pub url: String,
    pub title: String,
    pub video: bool,
    pub subtitle: bool,
    pub audio: bool,
    pub resolution: String,
    pub language: String,
    pub fallback: Vec<String>,
    pub subtitle_format: SubtitleFormat,
    pub directory: PathBuf,
}

impl DownloadForm {
    /// Validate the form and split it into one request per selected kind
    pub fn into_requests(self) -> Result<Vec<DownloadRequest>, DownloadError> {
        let url = self.url.trim().to_string();
        if url.is_empty() {
            return Err(DownloadError::InvalidRequest("URL is empty".to_string()));
        }
        extract_video_id(&url)?;

        if !(self.video || self.subtitle || self.audio) {
            return Err(DownloadError::InvalidRequest(
                "select at least one of video, subtitle or audio".to_string(),
            ));
        }

        let resolution = if self.video && !self.resolution.trim().is_empty() {
            Some(self.resolution.parse::<Resolution>()?)
        } else {
            None
        };

        let language = if self.subtitle {
            LanguagePreference::parse(&self.language, &self.fallback)?
        } else {
            LanguagePreference::default()
        };

        let title = self.title.trim();
        let filename = (!title.is_empty()).then(|| title.to_string());

        let mut requests = Vec::new();
        for (selected, kind) in [
            (self.subtitle, DownloadKind::Subtitle),
            (self.video, DownloadKind::Video),
            (self.audio, DownloadKind::Audio),
        ] {
            if !selected {
                continue;
            }

            let request = DownloadRequest {
                url: url.clone(),
                kind,
                resolution: if kind == DownloadKind::Video { resolution } else { None },
                language: language.clone(),
                subtitle_format: self.subtitle_format,
                filename: filename.clone(),
                directory: self.directory.clone(),
            };
            request.validate()?;
            requests.push(request);
        }

        Ok(requests)
    }
}

/// Pull the video identifier out of a YouTube URL
pub fn extract_video_id(url: &str) -> Result<String, DownloadError> {
    let invalid = || DownloadError::InvalidRequest(format!("'{}' is not a YouTube video URL", url.trim()));

    let parsed = Url::parse(url.trim()).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }

    let host = parsed.host_str().ok_or_else(invalid)?.to_lowercase();
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .or_else(|| host.strip_prefix("music."))
        .unwrap_or(&host);

    let mut segments = parsed.path_segments().into_iter().flatten().filter(|s| !s.is_empty());

    let id = match host {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "youtube-nocookie.com" => match segments.next() {
            Some("watch") => parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some("shorts" | "embed" | "v" | "live") => segments.next().map(str::to_string),
            _ => None,
        },
        _ => None,
    }
    .ok_or_else(invalid)?;

    let well_formed = !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !well_formed {
        return Err(invalid());
    }

    Ok(id)
}
