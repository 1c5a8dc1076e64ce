// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Progress reporting for long-running jobs
//!
//! Progress is advisory. Sinks must not block, and any update may be dropped
//! or superseded without affecting the job itself.

use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Stage of a long-running job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStage {
    Idle,
    Estimating,
    Scanning,
    Enumerating,
    Hashing,
    Planning,
    Applying,
    Reverting,
    Cancelling,
    Completed,
    Error,
}

/// A single progress update
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub stage: JobStage,
    /// 0..1 within the current stage
    pub stage_progress: f64,
    pub files_processed: u64,
    pub files_total: u64,
    pub bytes_processed: u64,
    pub actions_done: u64,
    pub actions_total: u64,
    /// Items (or actions) per second
    pub throughput: f64,
    pub eta: Option<Duration>,
    pub message: Option<String>,
    pub errors: u64,
    pub skipped: u64,
}

impl Progress {
    pub fn new(stage: JobStage) -> Self {
        Self {
            stage,
            stage_progress: 0.0,
            files_processed: 0,
            files_total: 0,
            bytes_processed: 0,
            actions_done: 0,
            actions_total: 0,
            throughput: 0.0,
            eta: None,
            message: None,
            errors: 0,
            skipped: 0,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Receiver of progress updates
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn report(&self, progress: &Progress) {
        self(progress)
    }
}

/// No-op sink for silent operation
pub struct SilentSink;

impl ProgressSink for SilentSink {
    fn report(&self, _progress: &Progress) {}
}

/// Replace-latest sink backed by a watch channel
pub struct LatestSink {
    tx: watch::Sender<Option<Progress>>,
}

impl LatestSink {
    pub fn channel() -> (Self, watch::Receiver<Option<Progress>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl ProgressSink for LatestSink {
    fn report(&self, progress: &Progress) {
        self.tx.send_replace(Some(progress.clone()));
    }
}

/// Rate limiter for progress emission
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// Whether an update should be emitted now. `force` always passes.
    pub fn ready(&mut self, force: bool) -> bool {
        let now = Instant::now();
        let due = match self.last {
            Some(last) => now.duration_since(last) >= self.interval,
            None => true,
        };
        if force || due {
            self.last = Some(now);
            true
        } else {
            false
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

/// Throughput and ETA once a rate baseline exists
pub fn rate(done: u64, total: u64, started: Instant) -> (f64, Option<Duration>) {
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed <= 0.0 || done == 0 {
        return (0.0, None);
    }
    let throughput = done as f64 / elapsed;
    let eta = if total > done {
        Some(Duration::from_secs_f64((total - done) as f64 / throughput))
    } else {
        None
    };
    (throughput, eta)
}

/// Fraction in 0..1, treating an empty total as complete
pub fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        (done as f64 / total as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_throttle_drops_rapid_updates_but_not_forced() {
        let mut throttle = Throttle::new(Duration::from_secs(60));
        assert!(throttle.ready(false));
        assert!(!throttle.ready(false));
        assert!(throttle.ready(true));
    }

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: &Progress| seen.lock().unwrap().push(p.stage);
        sink.report(&Progress::new(JobStage::Scanning));
        sink.report(&Progress::new(JobStage::Completed));
        assert_eq!(*seen.lock().unwrap(), vec![JobStage::Scanning, JobStage::Completed]);
    }

    #[test]
    fn test_latest_sink_keeps_only_newest() {
        let (sink, rx) = LatestSink::channel();
        sink.report(&Progress::new(JobStage::Scanning).with_message("one"));
        sink.report(&Progress::new(JobStage::Scanning).with_message("two"));
        let latest = rx.borrow().clone().unwrap();
        assert_eq!(latest.message.as_deref(), Some("two"));
    }

    #[test]
    fn test_rate_without_baseline() {
        let (throughput, eta) = rate(0, 10, Instant::now());
        assert_eq!(throughput, 0.0);
        assert!(eta.is_none());
        assert_eq!(fraction(0, 0), 1.0);
        assert_eq!(fraction(5, 10), 0.5);
    }
}
