use std::path::PathBuf;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info};

/// One-way notifications from a worker to its consumer (typically the UI).
/// Events for a given job arrive in the order they happened; the terminal
/// `QueueFinished` is always the last event of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Progress(String),
    Error { context: String, message: String },
    LoginRequired(String),
    JobStarted { id: i64, title: String },
    JobSucceeded { id: i64, artifact: Option<PathBuf> },
    JobFailed { id: i64, message: String },
    QueueFinished,
}

/// Sending half of a worker's event channel. Each emission is mirrored
/// into tracing so headless runs still leave a trail.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: UnboundedSender<WorkerEvent>,
}

impl EventSender {
    pub fn send(&self, event: WorkerEvent) {
        // A closed receiver means the consumer is gone; the worker still
        // runs to completion and persists its results.
        let _ = self.tx.send(event);
    }

    pub fn progress(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.send(WorkerEvent::Progress(message));
    }

    pub fn error(&self, context: impl Into<String>, message: impl Into<String>) {
        let context = context.into();
        let message = message.into();
        error!(context = %context, "{message}");
        self.send(WorkerEvent::Error { context, message });
    }
}

pub fn event_channel() -> (EventSender, UnboundedReceiver<WorkerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}
