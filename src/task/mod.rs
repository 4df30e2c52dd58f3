use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

use crate::request::DownloadKind;
use crate::DownloadError;

/// Identifier of one submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a download task; transitions only move forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed(DownloadError),
}

impl TaskStatus {
    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Succeeded | TaskStatus::Failed(_) => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Whether `next` directly follows this status
    pub fn can_advance_to(&self, next: &TaskStatus) -> bool {
        next.rank() == self.rank() + 1
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => f.write_str("pending"),
            TaskStatus::Running => f.write_str("running"),
            TaskStatus::Succeeded => f.write_str("succeeded"),
            TaskStatus::Failed(err) => write!(f, "failed ({})", err.kind()),
        }
    }
}

/// One progress notification delivered to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub kind: DownloadKind,
    pub percentage: u8,
    pub status: TaskStatus,
}

/// Receiver side of the `report(task_id, percentage, status)` contract
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl ProgressReporter for UnboundedSender<ProgressEvent> {
    fn report(&self, event: ProgressEvent) {
        // The view may already be gone at shutdown; in-flight tasks are abandoned.
        let _ = self.send(event);
    }
}

#[derive(Debug)]
struct TrackerState {
    percentage: u8,
    status: TaskStatus,
}

/// Runtime state of one download task
///
/// Owned by the worker running the task. Enforces the delivery guarantees of
/// the reporter contract: percentages never decrease, statuses only move
/// forward and at most one terminal event is emitted.
pub struct TaskTracker {
    id: TaskId,
    kind: DownloadKind,
    reporter: Arc<dyn ProgressReporter>,
    state: Mutex<TrackerState>,
}

impl TaskTracker {
    /// Create the tracker and announce the task as pending
    pub fn new(id: TaskId, kind: DownloadKind, reporter: Arc<dyn ProgressReporter>) -> Self {
        let tracker = Self {
            id,
            kind,
            reporter,
            state: Mutex::new(TrackerState {
                percentage: 0,
                status: TaskStatus::Pending,
            }),
        };
        tracker.emit(0, TaskStatus::Pending);
        tracker
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> DownloadKind {
        self.kind
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status.clone()
    }

    pub fn percentage(&self) -> u8 {
        self.lock().percentage
    }

    pub fn start(&self) -> bool {
        self.transition(TaskStatus::Running)
    }

    pub fn succeed(&self) -> bool {
        self.transition(TaskStatus::Succeeded)
    }

    pub fn fail(&self, error: DownloadError) -> bool {
        self.transition(TaskStatus::Failed(error))
    }

    /// Report a percentage; values below the last reported one are ignored
    pub fn advance(&self, percentage: u8) {
        let percentage = percentage.min(100);
        let (value, status) = {
            let mut state = self.lock();
            if state.status != TaskStatus::Running || percentage <= state.percentage {
                return;
            }
            state.percentage = percentage;
            (state.percentage, state.status.clone())
        };
        self.emit(value, status);
    }

    /// Report byte progress scaled into `0..=ceiling`
    pub fn advance_bytes(&self, transferred: u64, total: u64, ceiling: u8) {
        if total == 0 {
            return;
        }
        let ratio = (transferred.min(total) as f64) / (total as f64);
        let scaled = (ratio * f64::from(ceiling.min(100))).floor() as u8;
        self.advance(scaled);
    }

    fn transition(&self, next: TaskStatus) -> bool {
        let (value, status) = {
            let mut state = self.lock();
            if !state.status.can_advance_to(&next) {
                tracing::warn!(
                    "Task {} ignored transition {} -> {}",
                    self.id,
                    state.status,
                    next
                );
                return false;
            }
            if next == TaskStatus::Succeeded {
                state.percentage = 100;
            }
            state.status = next;
            (state.percentage, state.status.clone())
        };
        self.emit(value, status);
        true
    }

    fn emit(&self, percentage: u8, status: TaskStatus) {
        self.reporter.report(ProgressEvent {
            task_id: self.id,
            kind: self.kind,
            percentage,
            status,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reporter that keeps every event, handy for assertions and batch summaries
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Status sequence for one task with consecutive repeats collapsed
    pub fn statuses(&self, id: TaskId) -> Vec<TaskStatus> {
        let mut seen: Vec<TaskStatus> = Vec::new();
        for event in self.events().into_iter().filter(|e| e.task_id == id) {
            if seen.last() != Some(&event.status) {
                seen.push(event.status);
            }
        }
        seen
    }

    pub fn percentages(&self, id: TaskId) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter(|e| e.task_id == id)
            .map(|e| e.percentage)
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
