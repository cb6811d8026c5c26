//! Retention scheduler.
//!
//! Creates automatic snapshots when a fiscal book's schedule falls due and
//! prunes the oldest unprotected automatic snapshots beyond the retention
//! count. Each book is evaluated under its own lock, the same lock manual
//! operations take, so pruning never races a manual delete.

use super::config::{Frequency, ScheduleConfig};
use super::registry::ScheduleRegistry;
use crate::error::{Result, SnapshotError};
use crate::locks::BookGuard;
use crate::snapshots::{CaptureRequest, SnapshotManager};
use crate::types::{CreationSource, FiscalBookId, Snapshot, SnapshotId};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, tick, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Snapshot created by a schedule, and what pruning removed afterwards.
#[derive(Clone, Debug)]
pub struct TriggerOutcome {
    pub snapshot: Snapshot,
    /// Pruned snapshot ids, oldest first.
    pub pruned: Vec<SnapshotId>,
}

/// A fiscal book whose scheduled run failed.
#[derive(Debug)]
pub struct ScheduleFailure {
    pub fiscal_book_id: FiscalBookId,
    pub error: SnapshotError,
}

/// Result of one scheduler pass.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Enabled schedules looked at.
    pub evaluated: usize,
    pub created: Vec<SnapshotId>,
    pub pruned: Vec<SnapshotId>,
    pub failures: Vec<ScheduleFailure>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Evaluates schedules against the snapshot store.
#[derive(Clone)]
pub struct Scheduler {
    manager: Arc<SnapshotManager>,
    registry: Arc<ScheduleRegistry>,
}

impl Scheduler {
    pub fn new(manager: Arc<SnapshotManager>, registry: Arc<ScheduleRegistry>) -> Self {
        Self { manager, registry }
    }

    /// Run every schedule due at the store clock's current time.
    pub fn run_due(&self) -> RunReport {
        self.run_due_at(self.manager.clock().now())
    }

    /// Run every schedule due at `now`.
    ///
    /// A failing book is logged and reported; the other books still run.
    pub fn run_due_at(&self, now: DateTime<Utc>) -> RunReport {
        let mut report = RunReport::default();

        for (book, config) in self.registry.enabled() {
            report.evaluated += 1;

            match self.evaluate(&book, &config, now) {
                Ok(Some(outcome)) => {
                    report.created.push(outcome.snapshot.id);
                    report.pruned.extend(outcome.pruned);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(book = %book, error = %error, "scheduled snapshot failed");
                    report.failures.push(ScheduleFailure {
                        fiscal_book_id: book,
                        error,
                    });
                }
            }
        }

        if !report.created.is_empty() || !report.failures.is_empty() {
            info!(
                evaluated = report.evaluated,
                created = report.created.len(),
                pruned = report.pruned.len(),
                failed = report.failures.len(),
                "scheduler pass finished"
            );
        }

        report
    }

    /// Take the automatic snapshot that precedes a status change.
    ///
    /// Returns `None` unless the book's schedule is enabled with the
    /// before-status-change frequency.
    pub fn trigger_before_status_change(
        &self,
        book: &FiscalBookId,
    ) -> Result<Option<TriggerOutcome>> {
        let config = match self.registry.get(book) {
            Some(config)
                if config.enabled && config.frequency == Frequency::BeforeStatusChange =>
            {
                config
            }
            _ => return Ok(None),
        };

        let guard = self.manager.lock_book(book)?;
        let now = self.manager.clock().now();
        self.trigger_locked(&guard, book, &config, now).map(Some)
    }

    /// Background thread running [`run_due`](Self::run_due) every `interval`.
    pub fn spawn(self, interval: Duration) -> Result<SchedulerHandle> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let ticker = tick(interval);

        let thread = thread::Builder::new()
            .name("snapshot-scheduler".to_string())
            .spawn(move || {
                debug!(?interval, "scheduler started");
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            self.run_due();
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("scheduler stopped");
            })?;

        Ok(SchedulerHandle {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    // --- Private Helpers ---

    fn evaluate(
        &self,
        book: &FiscalBookId,
        config: &ScheduleConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<TriggerOutcome>> {
        let today = now.date_naive();
        if !config.falls_on(today) {
            return Ok(None);
        }

        let guard = self.manager.lock_book(book)?;

        // Protected automatic snapshots still mark the period as done.
        let already_taken = self
            .manager
            .index()
            .list_book(book)
            .iter()
            .filter(|s| s.creation_source == CreationSource::Scheduled)
            .any(|s| config.same_period(s.created_at.date_naive(), today));
        if already_taken {
            debug!(book = %book, %today, "schedule already satisfied for this period");
            return Ok(None);
        }

        self.trigger_locked(&guard, book, config, now).map(Some)
    }

    fn trigger_locked(
        &self,
        guard: &BookGuard,
        book: &FiscalBookId,
        config: &ScheduleConfig,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome> {
        let today = now.date_naive();
        let snapshot = self.manager.capture_locked(
            guard,
            book,
            CaptureRequest {
                name: Some(format!("Automatic snapshot {}", today.format("%Y-%m-%d"))),
                description: Some(format!("Created by the {} schedule", config.frequency.as_str())),
                tags: config.auto_tags.clone(),
                source: CreationSource::Scheduled,
                capture_metadata: false,
                timeout: self.manager.io_timeout(),
                created_at: Some(now),
            },
        )?;

        let pruned = self.prune_locked(guard, book, config.retention_count)?;
        Ok(TriggerOutcome { snapshot, pruned })
    }

    /// Delete unprotected automatic snapshots beyond `retention_count`,
    /// oldest first.
    fn prune_locked(
        &self,
        guard: &BookGuard,
        book: &FiscalBookId,
        retention_count: u32,
    ) -> Result<Vec<SnapshotId>> {
        // Newest first.
        let candidates: Vec<SnapshotId> = self
            .manager
            .index()
            .list_book(book)
            .into_iter()
            .filter(|s| s.creation_source == CreationSource::Scheduled && !s.is_protected)
            .map(|s| s.id)
            .collect();

        let keep = retention_count as usize;
        let mut pruned = Vec::new();
        for id in candidates.into_iter().skip(keep).rev() {
            self.manager.delete_locked(guard, &id)?;
            pruned.push(id);
        }

        if !pruned.is_empty() {
            info!(book = %book, count = pruned.len(), retention_count, "automatic snapshots pruned");
        }
        Ok(pruned)
    }
}

/// Handle to a running background scheduler. Dropping it stops the thread.
pub struct SchedulerHandle {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the scheduler and wait for an in-flight pass to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
