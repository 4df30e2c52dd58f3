use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::transcode::FfmpegTranscoder;
use crate::ytdlp::YtDlp;

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Sanitize filename for safe filesystem usage
///
/// Only characters illegal on common filesystems are replaced; non-Latin titles stay intact.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    // Leading dots would hide the file; trailing dots and spaces break Windows
    cleaned
        .trim()
        .trim_start_matches('.')
        .trim_end_matches(|c: char| c == '.' || c == ' ')
        .to_string()
}

/// File stem used when neither the user nor the platform supplies a title
pub fn fallback_filename() -> String {
    format!("download_{}", chrono::Local::now().format("%y%m%d_%H%M"))
}

/// Choose the output file stem: user title, then platform title, then a timestamp
pub fn choose_file_stem(user_title: Option<&str>, platform_title: Option<&str>) -> String {
    [user_title, platform_title]
        .into_iter()
        .flatten()
        .map(sanitize_filename)
        .find(|stem| !stem.is_empty())
        .unwrap_or_else(fallback_filename)
}

/// Check if the current environment has required tools
pub async fn check_dependencies(config: &Config) -> Vec<String> {
    let mut missing = Vec::new();

    let ytdlp = YtDlp::new(config.tools.yt_dlp.clone());
    if !ytdlp.check_availability().await {
        missing.push(format!(
            "{} - required for video, audio and subtitle downloads",
            config.tools.yt_dlp
        ));
    }

    let ffmpeg = FfmpegTranscoder::new(config.tools.ffmpeg.clone(), config.defaults.audio_bitrate.clone());
    if !ffmpeg.check_availability().await {
        missing.push(format!(
            "{} - required for audio extraction and merging video streams",
            config.tools.ffmpeg
        ));
    }

    missing
}

/// Open a directory in the platform file manager
pub fn open_folder(path: &Path) -> Result<()> {
    if !path.is_dir() {
        anyhow::bail!("Folder does not exist: {}", path.display());
    }

    let opener = if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };

    std::process::Command::new(opener)
        .arg(path)
        .spawn()
        .with_context(|| format!("Failed to open {} with {}", path.display(), opener))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1048576), "1.0 MB");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Hello World!"), "Hello World!");
        assert_eq!(sanitize_filename("test/file?name"), "test_file_name");
        assert_eq!(sanitize_filename("  spaced  "), "spaced");
        assert_eq!(sanitize_filename("..hidden."), "hidden");
        assert_eq!(sanitize_filename("유튜브 영상: 1부"), "유튜브 영상_ 1부");
    }

    #[test]
    fn test_choose_file_stem() {
        assert_eq!(choose_file_stem(Some("Mine"), Some("Theirs")), "Mine");
        assert_eq!(choose_file_stem(Some(" ?? "), Some("Theirs")), "__");
        assert_eq!(choose_file_stem(Some("   "), Some("Theirs")), "Theirs");
        assert!(choose_file_stem(None, None).starts_with("download_"));
    }

    #[test]
    fn test_check_dependencies_reports_missing_tools() {
        let mut config = Config::default();
        config.tools.yt_dlp = "ytgrab-test-no-such-yt-dlp".to_string();
        config.tools.ffmpeg = "ytgrab-test-no-such-ffmpeg".to_string();

        let missing = tokio_test::block_on(check_dependencies(&config));
        assert_eq!(missing.len(), 2);
        assert!(missing[0].starts_with("ytgrab-test-no-such-yt-dlp"));
        assert!(missing[1].starts_with("ytgrab-test-no-such-ffmpeg"));
    }

    #[test]
    fn test_open_folder_rejects_missing_dir() {
        assert!(open_folder(Path::new("/definitely/not/here/ytgrab")).is_err());
    }
}
