//! Run reporting.
//!
//! Workers never touch shared counters. Each finished task is sent as a
//! [`TaskOutcome`] over a channel to one [`ProgressTracker`], which owns the
//! totals and is the only caller of [`Reporter::progress`].

use crate::backup::detect::{bytes_to_mib, ChangeRecord, RunTotals};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::run::RunReport;
use getset::{CopyGetters, Getters};
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Sink for the three kinds of run output.
pub trait Reporter: Sync {
    fn detection_summary(&self, totals: &RunTotals, elapsed: Duration);
    fn progress(&self, progress: &Progress);
    fn completed(&self, report: &RunReport);
}

/// Live metrics emitted once per completed file.
#[derive(Clone, Debug, PartialEq, Getters, CopyGetters)]
pub struct Progress {
    /// Fraction in `0.0..=1.0` of all scanned bytes archived so far
    #[getset(get_copy = "pub")]
    percent_complete: f64,
    #[getset(get_copy = "pub")]
    elapsed_minutes: f64,
    /// Naive linear estimate of the whole run; 0 until anything is done
    #[getset(get_copy = "pub")]
    estimated_total_minutes: f64,
    #[getset(get_copy = "pub")]
    done_count: usize,
    #[getset(get_copy = "pub")]
    changed_count: usize,
    #[getset(get = "pub")]
    relative_path: PathBuf,
    #[getset(get_copy = "pub")]
    failed: bool,
}

impl Progress {
    pub fn compute(
        totals: &RunTotals,
        elapsed: Duration,
        relative_path: PathBuf,
        failed: bool,
    ) -> Self {
        let percent_complete = if totals.total_bytes == 0 {
            0.0
        } else {
            bytes_to_mib(totals.done_bytes) / bytes_to_mib(totals.total_bytes)
        };
        let elapsed_minutes = elapsed.as_secs_f64() / 60.0;
        let estimated_total_minutes = if percent_complete > 0.0 {
            elapsed_minutes / percent_complete
        } else {
            0.0
        };

        Self {
            percent_complete,
            elapsed_minutes,
            estimated_total_minutes,
            done_count: totals.done_count,
            changed_count: totals.changed_count,
            relative_path,
            failed,
        }
    }
}

/// A file that could not be archived. The run carries on without it.
#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct ArchiveFailure {
    relative_path: PathBuf,
    error: Error,
}

#[derive(Debug)]
pub struct TaskOutcome {
    record: ChangeRecord,
    result: Result<PathBuf>,
}

impl TaskOutcome {
    pub fn new(record: ChangeRecord, result: Result<PathBuf>) -> Self {
        Self { record, result }
    }
}

/// Single writer for the `done_*` counters.
pub struct ProgressTracker<'r> {
    reporter: &'r dyn Reporter,
    totals: RunTotals,
    started: Instant,
    failures: Vec<ArchiveFailure>,
}

impl<'r> ProgressTracker<'r> {
    pub fn new(reporter: &'r dyn Reporter, totals: RunTotals, started: Instant) -> Self {
        Self {
            reporter,
            totals,
            started,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: TaskOutcome) {
        let TaskOutcome { record, result } = outcome;
        self.totals.done_count += 1;
        self.totals.done_bytes += record.size_bytes();

        let failed = result.is_err();
        let progress = Progress::compute(
            &self.totals,
            self.started.elapsed(),
            record.relative_path().clone(),
            failed,
        );
        self.reporter.progress(&progress);

        if let Err(error) = result {
            warn!("Backup failed {}: {}", record.relative_path().display(), error);
            self.failures.push(ArchiveFailure {
                relative_path: record.relative_path().clone(),
                error,
            });
        }
    }

    /// Drains `rx` until every sender is dropped.
    pub fn consume(mut self, rx: Receiver<TaskOutcome>) -> (RunTotals, Vec<ArchiveFailure>) {
        for outcome in rx {
            self.record(outcome);
        }
        (self.totals, self.failures)
    }
}

fn round_to_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}

/// Logs everything through `tracing` at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn detection_summary(&self, totals: &RunTotals, elapsed: Duration) {
        info!(
            "Found {} changes ({:.0} MB) of {} ({:.0} MB) in: {}",
            totals.changed_count,
            totals.changed_size_mib(),
            totals.files_scanned,
            totals.total_size_mib(),
            humantime::format_duration(round_to_millis(elapsed))
        );
    }

    fn progress(&self, progress: &Progress) {
        info!(
            "{:0.2}% ({:0.1} of {:0.1} min)    {} of {}    {}",
            progress.percent_complete() * 100.0,
            progress.elapsed_minutes(),
            progress.estimated_total_minutes(),
            progress.done_count(),
            progress.changed_count(),
            progress.relative_path().display()
        );
    }

    fn completed(&self, report: &RunReport) {
        info!(
            "Completed {} files ({:.0} MB) in: {}",
            report.totals().changed_count,
            report.totals().changed_size_mib(),
            humantime::format_duration(round_to_millis(*report.elapsed()))
        );
        if !report.failures().is_empty() {
            warn!("{} files failed to back up", report.failures().len());
        }
    }
}
