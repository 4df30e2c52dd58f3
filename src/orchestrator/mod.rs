use anyhow::Context;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::request::{DownloadKind, DownloadRequest, Resolution};
use crate::resolver::youtube::YtDlpResolver;
use crate::resolver::{StreamResolver, StreamSelection};
use crate::subtitles::youtube::YtDlpSubtitleFetcher;
use crate::subtitles::{fetch_with_fallback, formatters, SubtitleFetcher};
use crate::task::{ProgressReporter, TaskId, TaskStatus, TaskTracker};
use crate::transcode::{AudioFormat, FfmpegTranscoder, Transcoder};
use crate::utils::choose_file_stem;
use crate::ytdlp::YtDlp;
use crate::{DownloadError, Result};

/// Share of an audio task's progress bar taken by the raw download
const AUDIO_DOWNLOAD_SHARE: u8 = 90;

/// What a successful task produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Resolution actually downloaded
    Video { resolution: Option<Resolution> },
    /// Caption language actually used
    Subtitle { language: String, auto_generated: bool },
    Audio { format: AudioFormat },
}

/// Terminal result of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub id: TaskId,
    pub kind: DownloadKind,
    pub status: TaskStatus,
    /// Written file, on success
    pub output: Option<PathBuf>,
    pub completion: Option<Completion>,
}

impl TaskOutcome {
    fn failed(id: TaskId, kind: DownloadKind, error: DownloadError) -> Self {
        Self {
            id,
            kind,
            status: TaskStatus::Failed(error),
            output: None,
            completion: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    pub fn error(&self) -> Option<&DownloadError> {
        match &self.status {
            TaskStatus::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// A task running on its own worker
pub struct TaskHandle {
    id: TaskId,
    kind: DownloadKind,
    join: JoinHandle<TaskOutcome>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> TaskOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Worker for task {} stopped: {}", self.id, e);
                TaskOutcome::failed(
                    self.id,
                    self.kind,
                    DownloadError::NetworkError(format!("download worker stopped: {}", e)),
                )
            }
        }
    }
}

/// External collaborators a task may call
#[derive(Clone)]
struct Backends {
    resolver: Arc<dyn StreamResolver>,
    fetcher: Arc<dyn SubtitleFetcher>,
    transcoder: Arc<dyn Transcoder>,
    audio_format: AudioFormat,
}

type ActiveKey = (String, DownloadKind);

/// Keeps a (video, kind) pair marked as in progress until dropped
struct ActiveSlot {
    key: ActiveKey,
    active: Arc<Mutex<HashSet<ActiveKey>>>,
}

impl ActiveSlot {
    fn claim(active: &Arc<Mutex<HashSet<ActiveKey>>>, key: ActiveKey) -> Option<Self> {
        let inserted = active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        inserted.then(|| Self {
            key,
            active: Arc::clone(active),
        })
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Turns download requests into tasks running on worker tasks
pub struct Orchestrator {
    backends: Backends,
    next_id: AtomicU64,
    active: Arc<Mutex<HashSet<ActiveKey>>>,
}

impl Orchestrator {
    pub fn new(
        resolver: Arc<dyn StreamResolver>,
        fetcher: Arc<dyn SubtitleFetcher>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            backends: Backends {
                resolver,
                fetcher,
                transcoder,
                audio_format: AudioFormat::default(),
            },
            next_id: AtomicU64::new(1),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Orchestrator wired to yt-dlp and ffmpeg as configured
    pub fn from_config(config: &Config) -> Self {
        let ytdlp = YtDlp::new(config.tools.yt_dlp.clone())
            .with_ffmpeg_location(config.tools.ffmpeg_location.clone());

        Self::new(
            Arc::new(YtDlpResolver::new(ytdlp.clone())),
            Arc::new(YtDlpSubtitleFetcher::new(ytdlp)),
            Arc::new(FfmpegTranscoder::new(
                config.tools.ffmpeg.clone(),
                config.defaults.audio_bitrate.clone(),
            )),
        )
        .with_audio_format(config.defaults.audio_format)
    }

    pub fn with_audio_format(mut self, format: AudioFormat) -> Self {
        self.backends.audio_format = format;
        self
    }

    /// Validate `request` and start it on a new worker
    ///
    /// Invalid requests are rejected here, before any external call. Must be
    /// called from within a tokio runtime.
    pub fn submit(
        &self,
        request: DownloadRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> std::result::Result<TaskHandle, DownloadError> {
        let video_id = request.validate()?;

        let slot = ActiveSlot::claim(&self.active, (video_id.clone(), request.kind)).ok_or_else(|| {
            DownloadError::InvalidRequest(format!(
                "a {} download for {} is already running",
                request.kind, video_id
            ))
        })?;

        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let kind = request.kind;
        let tracker = TaskTracker::new(id, kind, reporter);
        let backends = self.backends.clone();

        tracing::info!("Task {} queued: {} for {}", id, kind, video_id);

        let join = tokio::spawn(async move {
            let outcome = execute(&backends, &tracker, &request, &video_id).await;
            drop(slot);
            outcome
        });

        Ok(TaskHandle { id, kind, join })
    }

    /// Submit and wait for the outcome
    pub async fn run(
        &self,
        request: DownloadRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> std::result::Result<TaskOutcome, DownloadError> {
        Ok(self.submit(request, reporter)?.wait().await)
    }
}

/// Task boundary: every error is folded into the terminal status here
async fn execute(
    backends: &Backends,
    tracker: &TaskTracker,
    request: &DownloadRequest,
    video_id: &str,
) -> TaskOutcome {
    tracker.start();

    let result = match request.kind {
        DownloadKind::Video => download_video(backends, tracker, request).await,
        DownloadKind::Subtitle => download_subtitle(backends, request, video_id).await,
        DownloadKind::Audio => download_audio(backends, tracker, request).await,
    };

    match result {
        Ok((path, completion)) => {
            tracker.succeed();
            tracing::info!("Task {} finished: {}", tracker.id(), path.display());
            TaskOutcome {
                id: tracker.id(),
                kind: tracker.kind(),
                status: TaskStatus::Succeeded,
                output: Some(path),
                completion: Some(completion),
            }
        }
        Err(e) => {
            let error = DownloadError::classify(e);
            tracing::warn!("Task {} failed with {}: {}", tracker.id(), error.kind(), error);
            tracker.fail(error.clone());
            TaskOutcome::failed(tracker.id(), tracker.kind(), error)
        }
    }
}

async fn download_video(
    backends: &Backends,
    tracker: &TaskTracker,
    request: &DownloadRequest,
) -> Result<(PathBuf, Completion)> {
    let stream = backends
        .resolver
        .resolve(&request.url, StreamSelection::Video(request.resolution))
        .await?;

    let staging = Staging::new(&request.directory)?;
    let downloaded = backends
        .resolver
        .download(&stream, staging.path(), tracker, 100)
        .await?;

    let stem = choose_file_stem(request.filename.as_deref(), stream.title.as_deref());
    let file_name = match downloaded.extension() {
        Some(ext) => format!("{}.{}", stem, ext.to_string_lossy()),
        None => stem,
    };

    let path = staging.commit(&downloaded, &file_name)?;
    Ok((path, Completion::Video { resolution: stream.resolution }))
}

async fn download_audio(
    backends: &Backends,
    tracker: &TaskTracker,
    request: &DownloadRequest,
) -> Result<(PathBuf, Completion)> {
    let stream = backends
        .resolver
        .resolve(&request.url, StreamSelection::Audio)
        .await?;

    let staging = Staging::new(&request.directory)?;
    let raw = backends
        .resolver
        .download(&stream, staging.path(), tracker, AUDIO_DOWNLOAD_SHARE)
        .await?;
    tracker.advance(AUDIO_DOWNLOAD_SHARE);

    let format = backends.audio_format;
    let converted = backends.transcoder.transcode(&raw, format).await?;

    let stem = choose_file_stem(request.filename.as_deref(), stream.title.as_deref());
    let path = staging.commit(&converted, &format!("{}.{}", stem, format.as_str()))?;
    Ok((path, Completion::Audio { format }))
}

async fn download_subtitle(
    backends: &Backends,
    request: &DownloadRequest,
    video_id: &str,
) -> Result<(PathBuf, Completion)> {
    let caption = fetch_with_fallback(backends.fetcher.as_ref(), video_id, &request.language).await?;

    let staging = Staging::new(&request.directory)?;
    let stem = choose_file_stem(request.filename.as_deref(), caption.title.as_deref());
    let file_name = format!(
        "{}{}.{}",
        stem,
        caption.file_suffix(),
        request.subtitle_format.extension()
    );

    let staged = staging.path().join(&file_name);
    fs_err::write(&staged, formatters::render(&caption, request.subtitle_format))?;

    let path = staging.commit(&staged, &file_name)?;
    Ok((
        path,
        Completion::Subtitle {
            language: caption.language,
            auto_generated: caption.auto_generated,
        },
    ))
}

/// Hidden scratch directory inside the target directory
///
/// Finished files are moved into place with a single rename; dropping the
/// staging area removes everything that was not committed.
struct Staging {
    dir: TempDir,
    target_dir: PathBuf,
}

impl Staging {
    fn new(target_dir: &Path) -> Result<Self> {
        fs_err::create_dir_all(target_dir)?;
        let dir = tempfile::Builder::new()
            .prefix(".ytgrab-")
            .tempdir_in(target_dir)
            .with_context(|| format!("Failed to create staging area in {}", target_dir.display()))?;

        Ok(Self {
            dir,
            target_dir: target_dir.to_path_buf(),
        })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn commit(self, staged: &Path, file_name: &str) -> Result<PathBuf> {
        let destination = self.target_dir.join(file_name);
        fs_err::rename(staged, &destination)?;
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::LanguagePreference;
    use crate::resolver::{select_resolution, MockStreamResolver, ResolvedStream};
    use crate::subtitles::{Caption, CaptionEntry, MockSubtitleFetcher};
    use crate::task::RecordingReporter;
    use crate::transcode::MockTranscoder;
    use async_trait::async_trait;
    use mockall::predicate::eq;

    const URL: &str = "https://youtu.be/abc123";

    /// Resolver offering a fixed set of resolutions and writing fake media
    struct FakeResolver {
        offered: Vec<Resolution>,
        fail_download: Option<DownloadError>,
    }

    impl FakeResolver {
        fn offering(offered: &[Resolution]) -> Self {
            Self {
                offered: offered.to_vec(),
                fail_download: None,
            }
        }
    }

    #[async_trait]
    impl StreamResolver for FakeResolver {
        async fn resolve(&self, url: &str, selection: StreamSelection) -> Result<ResolvedStream> {
            let resolution = match selection {
                StreamSelection::Video(requested) => Some(
                    select_resolution(&self.offered, requested)
                        .ok_or_else(|| DownloadError::UnsupportedFormat("no video".into()))?,
                ),
                StreamSelection::Audio => None,
            };

            Ok(ResolvedStream {
                url: url.to_string(),
                video_id: "abc123".to_string(),
                title: Some("Clip".to_string()),
                resolution,
                format_selector: "test".to_string(),
                merge_format: None,
                expected_size: Some(4),
            })
        }

        async fn download(
            &self,
            stream: &ResolvedStream,
            staging_dir: &Path,
            tracker: &TaskTracker,
            ceiling: u8,
        ) -> Result<PathBuf> {
            let ext = if stream.resolution.is_some() { "mp4" } else { "webm" };
            let path = staging_dir.join(format!("{}.{}", stream.video_id, ext));
            for written in 1..=4u64 {
                fs_err::write(&path, vec![0u8; written as usize])?;
                tracker.advance_bytes(written, 4, ceiling);
                if written == 2 {
                    if let Some(err) = &self.fail_download {
                        return Err(err.clone().into());
                    }
                }
            }
            Ok(path)
        }
    }

    fn unused_fetcher() -> Arc<MockSubtitleFetcher> {
        let mut fetcher = MockSubtitleFetcher::new();
        fetcher.expect_fetch().never();
        fetcher.expect_fetch_any().never();
        Arc::new(fetcher)
    }

    fn unused_resolver() -> Arc<MockStreamResolver> {
        let mut resolver = MockStreamResolver::new();
        resolver.expect_resolve().never();
        resolver.expect_download().never();
        Arc::new(resolver)
    }

    fn unused_transcoder() -> Arc<MockTranscoder> {
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_transcode().never();
        Arc::new(transcoder)
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs_err::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn assert_monotonic(percentages: &[u8]) {
        assert!(
            percentages.windows(2).all(|pair| pair[0] <= pair[1]),
            "progress went backwards: {:?}",
            percentages
        );
    }

    #[tokio::test]
    async fn test_empty_url_rejected_without_external_calls() {
        let orchestrator = Orchestrator::new(unused_resolver(), unused_fetcher(), unused_transcoder());
        let reporter = Arc::new(RecordingReporter::new());
        let dir = tempfile::tempdir().unwrap();

        for kind in [DownloadKind::Video, DownloadKind::Subtitle, DownloadKind::Audio] {
            let request = DownloadRequest::new("", kind, dir.path());
            let err = orchestrator.run(request, reporter.clone()).await.unwrap_err();
            assert!(matches!(err, DownloadError::InvalidRequest(_)));
        }

        assert!(reporter.events().is_empty());
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_video_falls_back_to_nearest_resolution() {
        let resolver = Arc::new(FakeResolver::offering(&[Resolution::P720, Resolution::P480]));
        let orchestrator = Orchestrator::new(resolver, unused_fetcher(), unused_transcoder());
        let reporter = Arc::new(RecordingReporter::new());
        let dir = tempfile::tempdir().unwrap();

        let request = DownloadRequest::new(URL, DownloadKind::Video, dir.path())
            .with_resolution(Resolution::P1080);
        let outcome = orchestrator.run(request, reporter.clone()).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.completion, Some(Completion::Video { resolution: Some(Resolution::P720) }));
        assert_eq!(outcome.output, Some(dir.path().join("Clip.mp4")));
        assert_eq!(files_in(dir.path()), vec!["Clip.mp4".to_string()]);

        assert_eq!(
            reporter.statuses(outcome.id),
            vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Succeeded]
        );
        let percentages = reporter.percentages(outcome.id);
        assert_monotonic(&percentages);
        assert_eq!(percentages.last(), Some(&100));
        assert!(percentages.contains(&50));
    }

    #[tokio::test]
    async fn test_subtitle_falls_back_to_english() {
        let mut fetcher = MockSubtitleFetcher::new();
        fetcher.expect_fetch().with(eq("abc123"), eq("ko")).times(1).returning(|_, _| Ok(None));
        fetcher.expect_fetch().with(eq("abc123"), eq("en")).times(1).returning(|_, lang| {
            Ok(Some(Caption {
                language: lang.to_string(),
                auto_generated: false,
                title: Some("Clip".to_string()),
                entries: vec![CaptionEntry { start: 0.0, duration: 1.0, text: "Hello".into() }],
            }))
        });

        let orchestrator = Orchestrator::new(unused_resolver(), Arc::new(fetcher), unused_transcoder());
        let reporter = Arc::new(RecordingReporter::new());
        let dir = tempfile::tempdir().unwrap();

        let request = DownloadRequest::new(URL, DownloadKind::Subtitle, dir.path())
            .with_language(LanguagePreference::Ordered(vec!["ko".into(), "en".into()]));
        let outcome = orchestrator.run(request, reporter.clone()).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(
            outcome.completion,
            Some(Completion::Subtitle { language: "en".into(), auto_generated: false })
        );
        let written = outcome.output.unwrap();
        assert_eq!(written, dir.path().join("Clip_en.txt"));
        assert_eq!(fs_err::read_to_string(written).unwrap(), "Hello\n");

        // no byte-level progress for captions: straight from 0 to 100
        assert_eq!(reporter.percentages(outcome.id), vec![0, 0, 100]);
    }

    #[tokio::test]
    async fn test_subtitle_unavailable() {
        let mut fetcher = MockSubtitleFetcher::new();
        fetcher.expect_fetch().times(2).returning(|_, _| Ok(None));

        let orchestrator = Orchestrator::new(unused_resolver(), Arc::new(fetcher), unused_transcoder());
        let dir = tempfile::tempdir().unwrap();

        let request = DownloadRequest::new(URL, DownloadKind::Subtitle, dir.path());
        let outcome = orchestrator
            .run(request, Arc::new(RecordingReporter::new()))
            .await
            .unwrap();

        assert!(matches!(outcome.error(), Some(DownloadError::Unavailable(_))));
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_audio_without_transcoder_leaves_no_file() {
        let resolver = Arc::new(FakeResolver::offering(&[]));
        let transcoder = Arc::new(FfmpegTranscoder::new("ytgrab-test-no-such-ffmpeg", "192k"));
        let orchestrator = Orchestrator::new(resolver, unused_fetcher(), transcoder);
        let reporter = Arc::new(RecordingReporter::new());
        let dir = tempfile::tempdir().unwrap();

        let request = DownloadRequest::new(URL, DownloadKind::Audio, dir.path());
        let outcome = orchestrator.run(request, reporter.clone()).await.unwrap();

        assert!(matches!(outcome.error(), Some(DownloadError::TranscodeError(_))));
        assert_eq!(outcome.output, None);
        assert!(files_in(dir.path()).is_empty());

        let statuses = reporter.statuses(outcome.id);
        assert_eq!(statuses.len(), 3);
        assert!(matches!(statuses[2], TaskStatus::Failed(DownloadError::TranscodeError(_))));
        assert_monotonic(&reporter.percentages(outcome.id));
    }

    #[tokio::test]
    async fn test_audio_is_transcoded() {
        let resolver = Arc::new(FakeResolver::offering(&[]));
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .withf(|input, format| input.ends_with("abc123.webm") && *format == AudioFormat::Mp3)
            .times(1)
            .returning(|input, format| {
                let output = input.with_extension(format.as_str());
                fs_err::write(&output, b"mp3")?;
                Ok(output)
            });

        let orchestrator = Orchestrator::new(resolver, unused_fetcher(), Arc::new(transcoder));
        let reporter = Arc::new(RecordingReporter::new());
        let dir = tempfile::tempdir().unwrap();

        let request = DownloadRequest::new(URL, DownloadKind::Audio, dir.path()).with_filename("Song");
        let outcome = orchestrator.run(request, reporter.clone()).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.completion, Some(Completion::Audio { format: AudioFormat::Mp3 }));
        assert_eq!(files_in(dir.path()), vec!["Song.mp3".to_string()]);

        let percentages = reporter.percentages(outcome.id);
        assert_monotonic(&percentages);
        assert!(percentages.contains(&AUDIO_DOWNLOAD_SHARE));
        assert_eq!(percentages.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_failed_download_keeps_previous_output() {
        let resolver = Arc::new(FakeResolver {
            offered: vec![Resolution::P720],
            fail_download: Some(DownloadError::NetworkError("connection reset".into())),
        });
        let orchestrator = Orchestrator::new(resolver, unused_fetcher(), unused_transcoder());
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("Clip.mp4"), b"previous").unwrap();

        let request = DownloadRequest::new(URL, DownloadKind::Video, dir.path());
        let outcome = orchestrator
            .run(request, Arc::new(RecordingReporter::new()))
            .await
            .unwrap();

        assert_eq!(
            outcome.error(),
            Some(&DownloadError::NetworkError("connection reset".into()))
        );
        assert_eq!(files_in(dir.path()), vec!["Clip.mp4".to_string()]);
        assert_eq!(fs_err::read(dir.path().join("Clip.mp4")).unwrap(), b"previous");
    }

    #[tokio::test]
    async fn test_resolver_errors_are_classified() {
        let mut resolver = MockStreamResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("yt-dlp blew up").context("probe")));
        resolver.expect_download().never();

        let orchestrator = Orchestrator::new(Arc::new(resolver), unused_fetcher(), unused_transcoder());
        let dir = tempfile::tempdir().unwrap();

        let request = DownloadRequest::new(URL, DownloadKind::Video, dir.path());
        let outcome = orchestrator
            .run(request, Arc::new(RecordingReporter::new()))
            .await
            .unwrap();

        assert!(matches!(outcome.error(), Some(DownloadError::NetworkError(_))));
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_one_active_task_per_video_and_kind() {
        let resolver = Arc::new(FakeResolver::offering(&[Resolution::P720]));
        let orchestrator = Orchestrator::new(resolver, unused_fetcher(), unused_transcoder());
        let reporter = Arc::new(RecordingReporter::new());
        let dir = tempfile::tempdir().unwrap();
        let request = DownloadRequest::new(URL, DownloadKind::Video, dir.path());

        // the current-thread test runtime does not poll the first worker until we await
        let first = orchestrator.submit(request.clone(), reporter.clone()).unwrap();
        let duplicate = orchestrator.submit(request.clone(), reporter.clone());
        assert!(matches!(duplicate, Err(DownloadError::InvalidRequest(_))));

        assert!(first.wait().await.is_success());
        let again = orchestrator.submit(request, reporter.clone()).unwrap();
        assert!(again.wait().await.is_success());
    }

    #[tokio::test]
    async fn test_task_ids_are_unique() {
        let resolver = Arc::new(FakeResolver::offering(&[Resolution::P720]));
        let orchestrator = Orchestrator::new(resolver, unused_fetcher(), unused_transcoder());
        let reporter = Arc::new(RecordingReporter::new());
        let dir = tempfile::tempdir().unwrap();

        let video = orchestrator
            .submit(DownloadRequest::new(URL, DownloadKind::Video, dir.path()), reporter.clone())
            .unwrap();
        let other = orchestrator
            .submit(
                DownloadRequest::new("https://youtu.be/xyz789", DownloadKind::Video, dir.path()),
                reporter.clone(),
            )
            .unwrap();
        assert_ne!(video.id(), other.id());

        let (a, b) = tokio::join!(video.wait(), other.wait());
        assert!(a.is_success() && b.is_success());
        assert_eq!(
            reporter
                .events()
                .iter()
                .filter(|e| e.status.is_terminal())
                .count(),
            2
        );
    }
}
