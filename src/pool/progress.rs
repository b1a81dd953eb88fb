//! Progress reporting for parallel execution
//!
//! The pool owns a [`ProgressReporter`] and feeds it every state change.
//! The reporter throttles those changes to the configured cadence and hands
//! [`ProgressSnapshot`]s to an injected [`ProgressSink`].

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Point-in-time view of a run
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Tasks finished, successfully or not
    pub completed: usize,
    /// Tasks that returned an error or panicked
    pub failed: usize,
    /// Tasks submitted in total
    pub total: usize,
    /// Time since the run started
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Get completion percentage
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.completed as f64 / self.total as f64) * 100.0
    }

    /// Get estimated time remaining
    pub fn eta(&self) -> Option<Duration> {
        if self.completed == 0 {
            return None;
        }
        let per_task = self.elapsed.div_f64(self.completed as f64);
        let remaining = self.total.saturating_sub(self.completed);
        Some(per_task.mul_f64(remaining as f64))
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Receiver of progress updates
///
/// Implementations must be cheap; they are called from the coordinating task.
pub trait ProgressSink: Send + Sync {
    /// Called once before any task is dispatched
    fn start(&self, _total: usize) {}

    /// Called on state changes, at most once per progress interval
    fn update(&self, snapshot: &ProgressSnapshot);

    /// Called once after the last task finished
    fn finish(&self, snapshot: &ProgressSnapshot) {
        self.update(snapshot);
    }
}

/// Sink that drops every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _snapshot: &ProgressSnapshot) {}
}

/// Terminal progress bar with percentage and ETA
pub struct TerminalProgress {
    bar: Mutex<Option<ProgressBar>>,
    message: String,
}

impl TerminalProgress {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            bar: Mutex::new(None),
            message: message.into(),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) ETA {eta} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new("Processing")
    }
}

impl ProgressSink for TerminalProgress {
    fn start(&self, total: usize) {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(Self::style());
        bar.set_message(self.message.clone());
        *self.bar.lock().unwrap_or_else(|p| p.into_inner()) = Some(bar);
    }

    fn update(&self, snapshot: &ProgressSnapshot) {
        let guard = self.bar.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(bar) = guard.as_ref() {
            bar.set_position(snapshot.completed as u64);
            if snapshot.failed > 0 {
                bar.set_message(format!("{} | {} failed", self.message, snapshot.failed));
            }
        }
    }

    fn finish(&self, snapshot: &ProgressSnapshot) {
        let guard = self.bar.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(bar) = guard.as_ref() {
            bar.set_position(snapshot.completed as u64);
            bar.finish_with_message(format!(
                "{}: {} done, {} failed",
                self.message,
                snapshot.completed - snapshot.failed,
                snapshot.failed
            ));
        }
    }
}

/// Sink that forwards snapshots over a channel
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressSnapshot>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressSnapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn update(&self, snapshot: &ProgressSnapshot) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(snapshot.clone());
    }
}

/// Tracks task completions and throttles delivery to a sink
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    interval: Duration,
    total: usize,
    completed: usize,
    failed: usize,
    start_time: Instant,
    last_emit: Option<Instant>,
}

impl ProgressReporter {
    pub fn start(sink: Arc<dyn ProgressSink>, interval: Duration, total: usize) -> Self {
        sink.start(total);
        Self {
            sink,
            interval,
            total,
            completed: 0,
            failed: 0,
            start_time: Instant::now(),
            last_emit: None,
        }
    }

    /// Record one finished task and notify the sink if the interval has passed
    pub fn task_finished(&mut self, failed: bool) {
        self.completed += 1;
        if failed {
            self.failed += 1;
        }

        let due = self
            .last_emit
            .map_or(true, |last| last.elapsed() >= self.interval);
        if due && !self.snapshot().is_complete() {
            self.last_emit = Some(Instant::now());
            self.sink.update(&self.snapshot());
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed,
            failed: self.failed,
            total: self.total,
            elapsed: self.start_time.elapsed(),
        }
    }

    /// Deliver the final snapshot
    pub fn finish(self) {
        self.sink.finish(&self.snapshot());
    }
}
