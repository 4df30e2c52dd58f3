use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{select_resolution, ResolvedStream, StreamResolver, StreamSelection};
use crate::request::Resolution;
use crate::task::TaskTracker;
use crate::ytdlp::{FormatInfo, Transfer, VideoInfo, YtDlp};
use crate::{DownloadError, Result};

/// YouTube stream resolver using yt-dlp
pub struct YtDlpResolver {
    ytdlp: YtDlp,
}

impl YtDlpResolver {
    pub fn new(ytdlp: YtDlp) -> Self {
        Self { ytdlp }
    }

    fn resolve_video(
        &self,
        url: &str,
        info: &VideoInfo,
        requested: Option<Resolution>,
    ) -> Result<ResolvedStream> {
        let video_formats: Vec<&FormatInfo> = info.formats.iter().filter(|f| f.has_video()).collect();

        let mut offered: Vec<Resolution> = video_formats
            .iter()
            .filter_map(|f| f.height)
            .map(Resolution::nearest)
            .collect();
        offered.sort();
        offered.dedup();

        let chosen = select_resolution(&offered, requested).ok_or_else(|| {
            DownloadError::UnsupportedFormat(format!("no video streams offered for {}", info.id))
        })?;

        if let Some(requested) = requested {
            if requested != chosen {
                tracing::info!(
                    "{} is not offered for {}, falling back to {}",
                    requested,
                    info.id,
                    chosen
                );
            }
        }

        // Actual frame height of the chosen class, so odd aspect ratios still match
        let bound = video_formats
            .iter()
            .filter_map(|f| f.height)
            .filter(|h| Resolution::nearest(*h) == chosen)
            .max()
            .unwrap_or_else(|| chosen.height());

        Ok(ResolvedStream {
            url: url.to_string(),
            video_id: info.id.clone(),
            title: info.title.clone(),
            resolution: Some(chosen),
            format_selector: format!("bv*[height<={bound}]+ba/b[height<={bound}]"),
            merge_format: Some("mp4".to_string()),
            expected_size: estimate_video_size(&info.formats, bound),
        })
    }

    fn resolve_audio(&self, url: &str, info: &VideoInfo) -> Result<ResolvedStream> {
        if !info.formats.iter().any(|f| f.has_audio()) {
            return Err(DownloadError::UnsupportedFormat(format!(
                "no audio streams offered for {}",
                info.id
            ))
            .into());
        }

        Ok(ResolvedStream {
            url: url.to_string(),
            video_id: info.id.clone(),
            title: info.title.clone(),
            resolution: None,
            format_selector: "bestaudio/best".to_string(),
            merge_format: None,
            expected_size: best_audio(&info.formats).and_then(FormatInfo::size),
        })
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new(YtDlp::default())
    }
}

#[async_trait]
impl StreamResolver for YtDlpResolver {
    async fn resolve(&self, url: &str, selection: StreamSelection) -> Result<ResolvedStream> {
        let info = self.ytdlp.probe(url).await?;

        match selection {
            StreamSelection::Video(requested) => self.resolve_video(url, &info, requested),
            StreamSelection::Audio => self.resolve_audio(url, &info),
        }
    }

    async fn download(
        &self,
        stream: &ResolvedStream,
        staging_dir: &Path,
        tracker: &TaskTracker,
        ceiling: u8,
    ) -> Result<PathBuf> {
        let template = staging_dir.join(format!("{}.%(ext)s", stream.video_id));
        let mut meter = TransferMeter::new(stream.expected_size);

        self.ytdlp
            .download(
                &stream.url,
                &stream.format_selector,
                &template,
                stream.merge_format.as_deref(),
                |transfer| {
                    if let Some((done, total)) = meter.observe(transfer) {
                        tracker.advance_bytes(done, total, ceiling);
                    }
                },
            )
            .await?;

        find_output(staging_dir, &stream.video_id)
    }
}

/// Best audio-only format, by audio bitrate
fn best_audio(formats: &[FormatInfo]) -> Option<&FormatInfo> {
    formats
        .iter()
        .filter(|f| f.has_audio() && !f.has_video())
        .max_by(|a, b| a.abr.unwrap_or(0.0).total_cmp(&b.abr.unwrap_or(0.0)))
}

/// Expected bytes for `bv*[height<=bound]+ba`
fn estimate_video_size(formats: &[FormatInfo], bound: u32) -> Option<u64> {
    let video = formats
        .iter()
        .filter(|f| f.has_video() && f.height.is_some_and(|h| h <= bound))
        .max_by(|a, b| {
            a.height
                .cmp(&b.height)
                .then(a.tbr.unwrap_or(0.0).total_cmp(&b.tbr.unwrap_or(0.0)))
        })?;

    let video_size = video.size()?;
    if video.has_audio() {
        return Some(video_size);
    }

    Some(video_size + best_audio(formats)?.size()?)
}

/// Locate the finished download for `video_id` in the staging directory
fn find_output(staging_dir: &Path, video_id: &str) -> Result<PathBuf> {
    let prefix = format!("{}.", video_id);
    let mut best: Option<(u64, PathBuf)> = None;

    for entry in fs_err::read_dir(staging_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        // Skip per-format intermediates such as `<id>.f137.mp4` and partial files
        if rest.contains('.') || rest == "part" || rest == "ytdl" {
            continue;
        }

        let size = entry.metadata()?.len();
        if best.as_ref().map_or(true, |(largest, _)| size > *largest) {
            best = Some((size, entry.path()));
        }
    }

    best.map(|(_, path)| path).ok_or_else(|| {
        DownloadError::NotFound(format!("yt-dlp produced no file for {}", video_id)).into()
    })
}

/// Folds per-stream progress samples into overall byte progress
///
/// yt-dlp reports each fetched stream separately, restarting its counter when
/// the next stream begins.
#[derive(Debug, Default)]
struct TransferMeter {
    expected: Option<u64>,
    completed: u64,
    current: u64,
    current_total: Option<u64>,
}

impl TransferMeter {
    fn new(expected: Option<u64>) -> Self {
        Self {
            expected,
            ..Default::default()
        }
    }

    fn observe(&mut self, transfer: Transfer) -> Option<(u64, u64)> {
        if transfer.downloaded < self.current {
            self.completed += self.current_total.unwrap_or(self.current).max(self.current);
        }
        self.current = transfer.downloaded;
        self.current_total = transfer.total.or(self.current_total);

        let done = self.completed + self.current;
        let total = match self.expected {
            Some(expected) => expected,
            None => self.completed + self.current_total?,
        };
        Some((done, total.max(done)))
    }
}
