use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::request::{LanguagePreference, Resolution, SubtitleFormat};
use crate::transcode::AudioFormat;

/// Name of the config file picked up from the working directory
const LOCAL_CONFIG: &str = "ytgrab.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Last used download directory
    pub download_dir: PathBuf,

    /// External executables
    pub tools: ToolsConfig,

    /// Initial values of the download form
    pub defaults: FormDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// yt-dlp executable name or path
    pub yt_dlp: String,

    /// ffmpeg executable name or path
    pub ffmpeg: String,

    /// Directory containing ffmpeg, handed to yt-dlp for merging streams
    pub ffmpeg_location: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormDefaults {
    pub resolution: String,
    pub language: String,
    pub fallback: Vec<String>,
    pub subtitle_format: SubtitleFormat,
    pub audio_format: AudioFormat,
    pub audio_bitrate: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            tools: ToolsConfig::default(),
            defaults: FormDefaults::default(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffmpeg_location: None,
        }
    }
}

impl Default for FormDefaults {
    fn default() -> Self {
        Self {
            resolution: "2160p".to_string(),
            language: "ko".to_string(),
            fallback: vec!["en".to_string()],
            subtitle_format: SubtitleFormat::Txt,
            audio_format: AudioFormat::Mp3,
            audio_bitrate: "192k".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs_err::read_to_string(path)
            .context("Failed to read config file")?;

        let config: Config = serde_yaml::from_str(&content)
            .context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(path, content)
            .context("Failed to write config file")?;

        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Get configuration file path
    pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        // First try current directory for easy testing
        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("ytgrab").join("config.yaml"))
    }

    /// Remember a new download directory; returns whether it changed
    pub fn set_download_dir(&mut self, dir: PathBuf) -> bool {
        if self.download_dir == dir {
            return false;
        }
        self.download_dir = dir;
        true
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.download_dir.as_os_str().is_empty() {
            anyhow::bail!("download_dir must not be empty");
        }
        if self.tools.yt_dlp.trim().is_empty() || self.tools.ffmpeg.trim().is_empty() {
            anyhow::bail!("tool paths must not be empty");
        }
        if !self.defaults.resolution.trim().is_empty() {
            self.defaults.resolution.parse::<Resolution>()?;
        }
        LanguagePreference::parse(&self.defaults.language, &self.defaults.fallback)?;

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Download Folder: {}", self.download_dir.display());
        println!("  yt-dlp: {}", self.tools.yt_dlp);
        println!("  ffmpeg: {}", self.tools.ffmpeg);
        if let Some(location) = &self.tools.ffmpeg_location {
            println!("  ffmpeg Location: {}", location.display());
        }
        println!("  Default Resolution: {}", self.defaults.resolution);
        println!(
            "  Subtitle Languages: {} (fallback: {})",
            self.defaults.language,
            if self.defaults.fallback.is_empty() {
                "none".to_string()
            } else {
                self.defaults.fallback.join(", ")
            }
        );
        println!("  Subtitle Format: {}", self.defaults.subtitle_format.extension());
        println!("  Audio: {} @ {}", self.defaults.audio_format, self.defaults.audio_bitrate);
    }
}

/// Platform downloads folder, or `~/Downloads` when the platform has none
fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.defaults.resolution, "2160p");
        assert_eq!(config.defaults.fallback, vec!["en".to_string()]);
    }

    #[test]
    fn test_remembered_directory_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        assert!(config.set_download_dir(PathBuf::from("/srv/media")));
        assert!(!config.set_download_dir(PathBuf::from("/srv/media")));
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.download_dir, PathBuf::from("/srv/media"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs_err::write(&path, "download_dir: /data/yt\ndefaults:\n  language: en\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.download_dir, PathBuf::from("/data/yt"));
        assert_eq!(config.defaults.language, "en");
        assert_eq!(config.defaults.audio_bitrate, "192k");
        assert_eq!(config.tools.yt_dlp, "yt-dlp");
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        fs_err::write(&path, "download_dir: [unclosed").unwrap();
        assert!(Config::load_from(&path).is_err());

        fs_err::write(&path, "defaults:\n  resolution: 999p\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = Path::new("/tmp/custom-ytgrab.yaml");
        assert_eq!(Config::config_path(Some(explicit)).unwrap(), explicit);
    }
}
