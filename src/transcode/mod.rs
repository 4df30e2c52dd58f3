use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::{DownloadError, Result};

/// Compressed audio formats the transcoder can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    M4a,
    Ogg,
    Flac,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
        }
    }

    /// ffmpeg audio encoder for the format
    fn codec(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::M4a => "aac",
            AudioFormat::Ogg => "libvorbis",
            AudioFormat::Flac => "flac",
        }
    }

    fn is_lossless(&self) -> bool {
        matches!(self, AudioFormat::Flac)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converts a downloaded audio stream into a compressed audio file
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert `input` and return the path of the new file, next to the input
    async fn transcode(&self, input: &Path, format: AudioFormat) -> Result<PathBuf>;
}

/// Transcoder backed by the ffmpeg executable
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: String,
    bitrate: String,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>, bitrate: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            bitrate: bitrate.into(),
        }
    }

    /// Check if ffmpeg is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg", "192k")
    }
}

/// Output path for a conversion, never equal to the input
pub fn output_path_for(input: &Path, format: AudioFormat) -> PathBuf {
    let candidate = input.with_extension(format.as_str());
    if candidate != input {
        return candidate;
    }

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    input.with_file_name(format!("{}.converted.{}", stem, format.as_str()))
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, format: AudioFormat) -> Result<PathBuf> {
        let output_path = output_path_for(input, format);
        tracing::debug!(
            "Converting {} to {} ({})",
            input.display(),
            format,
            output_path.display()
        );

        let mut command = Command::new(&self.program);
        command
            .arg("-hide_banner")
            .args(["-loglevel", "error"])
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .args(["-acodec", format.codec()]);

        if !format.is_lossless() {
            command.args(["-ab", &self.bitrate]);
        }

        let output = command
            .args(["-ar", "44100", "-y"])
            .arg(&output_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                DownloadError::TranscodeError(format!("could not run '{}': {}", self.program, e))
            })?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            let _ = fs_err::remove_file(&output_path);
            return Err(DownloadError::TranscodeError(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                error.trim()
            ))
            .into());
        }

        Ok(output_path)
    }
}
