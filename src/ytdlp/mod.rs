use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::{DownloadError, Result};

/// Marker yt-dlp prints in front of every progress line we ask for
const PROGRESS_MARKER: &str = "[ytgrab]";

const PROGRESS_TEMPLATE: &str = "download:[ytgrab] %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s";

/// Video metadata as printed by `yt-dlp --dump-json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    pub id: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub formats: Vec<FormatInfo>,

    /// Manually authored caption tracks keyed by language code
    #[serde(default)]
    pub subtitles: HashMap<String, Vec<CaptionFormat>>,

    /// Automatically generated caption tracks keyed by language code
    #[serde(default)]
    pub automatic_captions: HashMap<String, Vec<CaptionFormat>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatInfo {
    pub format_id: String,

    #[serde(default)]
    pub ext: Option<String>,

    #[serde(default)]
    pub height: Option<u32>,

    #[serde(default)]
    pub vcodec: Option<String>,

    #[serde(default)]
    pub acodec: Option<String>,

    #[serde(default)]
    pub filesize: Option<u64>,

    #[serde(default)]
    pub filesize_approx: Option<u64>,

    /// Total bitrate in KBit/s
    #[serde(default)]
    pub tbr: Option<f64>,

    /// Audio bitrate in KBit/s
    #[serde(default)]
    pub abr: Option<f64>,
}

impl FormatInfo {
    pub fn has_video(&self) -> bool {
        self.height.is_some() && !matches!(self.vcodec.as_deref(), Some("none"))
    }

    pub fn has_audio(&self) -> bool {
        self.acodec.as_deref().is_some_and(|codec| codec != "none")
    }

    pub fn size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptionFormat {
    pub ext: String,
    pub url: String,
}

/// One progress sample reported by yt-dlp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub downloaded: u64,
    pub total: Option<u64>,
}

/// Thin driver around the yt-dlp executable
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
    ffmpeg_location: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ffmpeg_location: None,
        }
    }

    pub fn with_ffmpeg_location(mut self, location: Option<PathBuf>) -> Self {
        self.ffmpeg_location = location;
        self
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Fetch video metadata without downloading anything
    pub async fn probe(&self, url: &str) -> Result<VideoInfo> {
        tracing::debug!("Probing video info for: {}", url);

        let output = Command::new(&self.program)
            .args(["--dump-json", "--no-playlist", "--no-warnings", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr).into());
        }

        let info: VideoInfo = serde_json::from_slice(&output.stdout)
            .context("Failed to parse yt-dlp metadata")?;

        tracing::debug!(
            "Probe found {} formats, {} subtitle tracks, {} automatic tracks",
            info.formats.len(),
            info.subtitles.len(),
            info.automatic_captions.len()
        );

        Ok(info)
    }

    /// Download `selector` into `output_template`, feeding progress samples to `on_progress`
    pub async fn download<F>(
        &self,
        url: &str,
        selector: &str,
        output_template: &Path,
        merge_format: Option<&str>,
        mut on_progress: F,
    ) -> Result<()>
    where
        F: FnMut(Transfer) + Send,
    {
        tracing::debug!("Downloading {} with format '{}'", url, selector);

        let mut command = Command::new(&self.program);
        command
            .arg("--format")
            .arg(selector)
            .arg("--output")
            .arg(output_template)
            .args(["--no-playlist", "--no-warnings", "--no-color", "--newline", "--no-part"])
            .args(["--progress-template", PROGRESS_TEMPLATE]);

        if let Some(format) = merge_format {
            command.args(["--merge-output-format", format]);
        }
        if let Some(location) = &self.ffmpeg_location {
            command.arg("--ffmpeg-location").arg(location);
        }

        let mut child = command
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child.stdout.take().context("yt-dlp stdout was not captured")?;
        let mut stderr = child.stderr.take().context("yt-dlp stderr was not captured")?;

        let stderr_task = tokio::spawn(async move {
            let mut buffer = String::new();
            let _ = stderr.read_to_string(&mut buffer).await;
            buffer
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(transfer) = parse_progress_line(&line) {
                on_progress(transfer);
            } else {
                tracing::trace!("yt-dlp: {}", line);
            }
        }

        let status = child.wait().await.context("Failed to wait for yt-dlp")?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(classify_failure(&stderr).into());
        }

        Ok(())
    }

    fn spawn_error(&self, error: std::io::Error) -> anyhow::Error {
        if error.kind() == std::io::ErrorKind::NotFound {
            DownloadError::NotFound(format!(
                "yt-dlp executable '{}' not found; install it from https://github.com/yt-dlp/yt-dlp",
                self.program
            ))
            .into()
        } else {
            anyhow::Error::new(error).context(format!("Failed to run {}", self.program))
        }
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

/// Parse a line produced by our progress template
pub fn parse_progress_line(line: &str) -> Option<Transfer> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let mut fields = rest.split_whitespace().map(parse_byte_count);

    let downloaded = fields.next()??;
    let total = fields.next().flatten();
    let estimate = fields.next().flatten();

    Some(Transfer {
        downloaded,
        total: total.or(estimate),
    })
}

fn parse_byte_count(field: &str) -> Option<u64> {
    field
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
        .map(|value| value as u64)
}

/// Map yt-dlp's stderr onto the error taxonomy
pub fn classify_failure(stderr: &str) -> DownloadError {
    let detail = stderr
        .lines()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()))
        .unwrap_or("yt-dlp exited with an error")
        .trim()
        .to_string();

    let lower = stderr.to_lowercase();

    // Merging streams and extracting audio need ffmpeg; retrying cannot help
    if [
        "ffmpeg is not installed",
        "ffprobe and ffmpeg not found",
        "ffmpeg not found",
        "postprocessing",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
    {
        DownloadError::TranscodeError(detail)
    } else if lower.contains("requested format is not available") || lower.contains("no video formats found") {
        DownloadError::UnsupportedFormat(detail)
    } else if [
        "video unavailable",
        "private video",
        "this video has been removed",
        "http error 404",
        "unsupported url",
        "is not a valid url",
        "does not exist",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
    {
        DownloadError::NotFound(detail)
    } else {
        DownloadError::NetworkError(detail)
    }
}
