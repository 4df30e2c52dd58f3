use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::request::{DownloadForm, SubtitleFormat};

#[derive(Parser)]
#[command(
    name = "ytgrab",
    about = "ytgrab - Download YouTube videos, audio and subtitles",
    version,
    long_about = "Downloads videos at a chosen resolution, audio as mp3 and subtitles as text or SRT from YouTube. Each selected kind runs as its own task with its own progress bar."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file to use instead of the default location
    #[arg(long, global = true, env = "YTGRAB_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download video, subtitles and/or audio for a URL
    Download(DownloadArgs),

    /// Show or change the saved configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Remember a new download folder
        #[arg(long, value_name = "DIR")]
        set_dir: Option<PathBuf>,
    },

    /// Open the download folder in the file manager
    Open,

    /// Check that yt-dlp and ffmpeg are installed
    Check,
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// YouTube URL (youtube.com/watch, youtu.be, shorts, embed)
    #[arg(value_name = "URL")]
    pub url: String,

    /// File name to use instead of the video title
    #[arg(short, long)]
    pub title: Option<String>,

    /// Download the video
    #[arg(long)]
    pub video: bool,

    /// Download subtitles
    #[arg(long)]
    pub subtitle: bool,

    /// Download the audio track as mp3
    #[arg(long)]
    pub audio: bool,

    /// Video resolution (2160p, 1440p, 1080p, 720p, 480p, 360p, 240p, 144p)
    #[arg(short, long, value_name = "RES")]
    pub resolution: Option<String>,

    /// Subtitle language code, or korean / english / all
    #[arg(short, long, value_name = "LANG")]
    pub language: Option<String>,

    /// Languages to try when the first one is missing
    #[arg(long, value_name = "LANG", value_delimiter = ',')]
    pub fallback: Option<Vec<String>>,

    /// Subtitle file format
    #[arg(short, long, value_enum)]
    pub format: Option<SubtitleFormat>,

    /// Download folder (remembered for next time)
    #[arg(short, long, value_name = "DIR")]
    pub dir: Option<PathBuf>,
}

impl DownloadArgs {
    /// Fill the download form, taking unset options from the configuration
    pub fn into_form(self, config: &Config) -> DownloadForm {
        let defaults = &config.defaults;
        DownloadForm {
            url: self.url,
            title: self.title.unwrap_or_default(),
            video: self.video,
            subtitle: self.subtitle,
            audio: self.audio,
            resolution: self.resolution.unwrap_or_else(|| defaults.resolution.clone()),
            language: self.language.unwrap_or_else(|| defaults.language.clone()),
            fallback: self.fallback.unwrap_or_else(|| defaults.fallback.clone()),
            subtitle_format: self.format.unwrap_or(defaults.subtitle_format),
            directory: self.dir.unwrap_or_else(|| config.download_dir.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_download_uses_config_defaults() {
        let cli = parse(&["ytgrab", "download", "https://youtu.be/abc", "--video", "--subtitle"]);
        let Commands::Download(args) = cli.command else {
            panic!("expected download");
        };

        let config = Config::default();
        let form = args.into_form(&config);
        assert!(form.video && form.subtitle && !form.audio);
        assert_eq!(form.resolution, "2160p");
        assert_eq!(form.language, "ko");
        assert_eq!(form.fallback, vec!["en".to_string()]);
        assert_eq!(form.directory, config.download_dir);
    }

    #[test]
    fn test_download_overrides() {
        let cli = parse(&[
            "ytgrab", "download", "https://youtu.be/abc", "--subtitle", "-l", "ja",
            "--fallback", "en,ko", "-f", "srt", "-d", "/tmp/out", "-t", "My clip",
        ]);
        let Commands::Download(args) = cli.command else {
            panic!("expected download");
        };

        let form = args.into_form(&Config::default());
        assert_eq!(form.language, "ja");
        assert_eq!(form.fallback, vec!["en".to_string(), "ko".to_string()]);
        assert_eq!(form.subtitle_format, SubtitleFormat::Srt);
        assert_eq!(form.directory, PathBuf::from("/tmp/out"));
        assert_eq!(form.title, "My clip");
    }

    #[test]
    fn test_global_flags() {
        let cli = parse(&["ytgrab", "--config", "/tmp/y.yaml", "-v", "check"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/y.yaml")));
        assert!(matches!(cli.command, Commands::Check));
    }
}
