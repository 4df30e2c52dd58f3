use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::fmt::MakeWriter;

use crate::orchestrator::{Completion, TaskOutcome};
use crate::task::{ProgressEvent, TaskId, TaskStatus};
use crate::utils::format_file_size;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {prefix} {msg}";

/// Terminal rendering of task progress
///
/// One bar per task plus a status line holding the most recent error.
pub struct ConsoleView {
    multi: MultiProgress,
    bars: HashMap<TaskId, ProgressBar>,
    status_line: Option<String>,
}

/// Area the task bars are drawn into; hidden when `quiet`
pub fn progress_area(quiet: bool) -> MultiProgress {
    let target = if quiet {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stderr()
    };
    MultiProgress::with_draw_target(target)
}

/// Log sink that clears the bars while a line is written to stderr
#[derive(Clone)]
pub struct LogWriter {
    multi: MultiProgress,
}

impl LogWriter {
    pub fn new(multi: MultiProgress) -> Self {
        Self { multi }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi.suspend(|| io::stderr().write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl ConsoleView {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: HashMap::new(),
            status_line: None,
        }
    }

    /// Render events until every sender is gone
    pub async fn run(mut self, mut events: UnboundedReceiver<ProgressEvent>) -> Self {
        while let Some(event) = events.recv().await {
            self.handle(&event);
        }
        self
    }

    pub fn handle(&mut self, event: &ProgressEvent) {
        let bar = self.bars.entry(event.task_id).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(100));
            bar.set_style(bar_style());
            bar.set_prefix(format!("{} {}", event.task_id, event.kind));
            bar
        });

        bar.set_position(u64::from(event.percentage));

        match &event.status {
            TaskStatus::Pending => bar.set_message("waiting"),
            TaskStatus::Running => bar.set_message("downloading"),
            TaskStatus::Succeeded => bar.finish_with_message(style("done").green().to_string()),
            TaskStatus::Failed(err) => {
                bar.abandon_with_message(style(err.kind()).red().to_string());
                self.status_line = Some(err.user_message());
            }
        }
    }

    /// Most recent error, if any task failed
    pub fn status_line(&self) -> Option<&str> {
        self.status_line.as_deref()
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// One-line verdict over a finished batch
pub fn summary_message(outcomes: &[TaskOutcome]) -> &'static str {
    if outcomes.iter().all(TaskOutcome::is_success) {
        "All downloads completed"
    } else if outcomes.iter().any(TaskOutcome::is_success) {
        "Some downloads completed"
    } else {
        "No downloads completed"
    }
}

/// Human-readable line for a finished task
pub fn describe_outcome(outcome: &TaskOutcome) -> String {
    match (&outcome.status, &outcome.output) {
        (TaskStatus::Succeeded, Some(path)) => {
            let size = fs_err::metadata(path)
                .map(|m| format_file_size(m.len()))
                .unwrap_or_else(|_| "?".to_string());
            let detail = match &outcome.completion {
                Some(Completion::Video { resolution: Some(resolution) }) => format!(" [{}]", resolution),
                Some(Completion::Subtitle { language, auto_generated: true }) => {
                    format!(" [{}, auto-generated]", language)
                }
                Some(Completion::Subtitle { language, .. }) => format!(" [{}]", language),
                Some(Completion::Audio { format }) => format!(" [{}]", format),
                _ => String::new(),
            };
            format!("{} {}: {} ({}){}", outcome.id, outcome.kind, path.display(), size, detail)
        }
        (TaskStatus::Failed(err), _) => format!("{} {}: {}", outcome.id, outcome.kind, err.user_message()),
        (status, _) => format!("{} {}: {}", outcome.id, outcome.kind, status),
    }
}

/// Print per-task results, the summary and the status line
pub fn print_report(outcomes: &[TaskOutcome], status_line: Option<&str>) {
    for outcome in outcomes {
        if outcome.is_success() {
            println!("{} {}", style("✓").green(), describe_outcome(outcome));
        } else {
            println!("{} {}", style("✗").red(), describe_outcome(outcome));
        }
    }

    println!("{}", style(summary_message(outcomes)).bold());
    if let Some(line) = status_line {
        println!("{} {}", style("Status:").yellow(), line);
    }
}
