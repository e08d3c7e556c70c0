//! Status poller for online DDL jobs
//!
//! Waits until every job carrying a correlation tag has reached a terminal
//! state. The wait is best effort: job failures, timeouts and query errors are
//! logged and reported in the [`WaitReport`], never returned as errors, so the
//! calling migration always resumes.
//!
//! Polling follows a capped exponential backoff (2s, 4s, 8s, 16s, 30s, 30s, ...
//! with the defaults) and is bounded by a number of polls derived from the
//! timeout and that schedule.

use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::connection::SchemaConnection;
use crate::error::error_chain;
use crate::job::{fetch_jobs, JobRecord, JobStatus};

/// Timing of a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
        }
    }
}

impl PollSettings {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_interval, self.max_interval)
    }

    /// Number of polls after which the sleeps alone exceed the timeout
    pub fn max_polls(&self) -> usize {
        let mut backoff = self.backoff();
        let mut slept = Duration::ZERO;
        let mut polls: usize = 1;
        while slept <= self.timeout {
            if backoff.is_capped() {
                // Every remaining sleep is `max`.
                let remaining = (self.timeout - slept).as_nanos();
                let steps = remaining / backoff.max.as_nanos() + 1;
                return polls.saturating_add(usize::try_from(steps).unwrap_or(usize::MAX));
            }
            let delay = backoff.next().unwrap_or(backoff.max);
            slept = slept.saturating_add(delay);
            polls = polls.saturating_add(1);
        }
        polls
    }
}

/// Capped exponential backoff: `initial` first, then `min(previous * 2, max)`
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        // A zero interval would never grow.
        let floor = Duration::from_millis(1);
        Self {
            next: initial.max(floor),
            max: max.max(floor),
        }
    }

    /// True once every further delay equals `max`
    fn is_capped(&self) -> bool {
        self.next == self.max
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}

/// Ids of jobs already classified terminal within one migration unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    ids: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already present
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// True when every record has been seen terminal (vacuously for none)
    pub fn covers(&self, records: &[JobRecord]) -> bool {
        records.iter().all(|record| self.contains(&record.id))
    }
}

/// How a wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every job for the tag is terminal
    Complete { total: usize },
    /// The timeout elapsed with jobs still pending
    TimedOut { pending: usize },
    /// A status query failed; the wait was abandoned
    Errored {
        /// The error with its source chain
        message: String,
    },
}

impl WaitOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, WaitOutcome::Complete { .. })
    }
}

/// Everything a wait observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitReport {
    pub outcome: WaitOutcome,
    /// Status queries issued
    pub polls: usize,
    /// Delays slept between polls, in order
    pub sleeps: Vec<Duration>,
    /// Job ids that became terminal during this wait, in the order logged
    pub newly_terminal: Vec<String>,
    pub elapsed: Duration,
}

enum PollState {
    Polling,
    Done(WaitOutcome),
}

/// Polls `SHOW VITESS_MIGRATIONS` until the jobs of a tag are terminal
#[derive(Debug, Clone, Default)]
pub struct StatusPoller {
    settings: PollSettings,
}

impl StatusPoller {
    pub fn new(settings: PollSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Wait for every job tagged `correlation_tag`
    ///
    /// `seen` carries the terminal jobs already reported by earlier waits of
    /// the same unit; they are neither re-logged nor waited on again.
    pub async fn wait(
        &self,
        conn: &mut dyn SchemaConnection,
        correlation_tag: &str,
        seen: &mut SeenSet,
    ) -> WaitReport {
        let start = Instant::now();
        let max_polls = self.settings.max_polls();
        let mut backoff = self.settings.backoff();
        let mut report = WaitReport {
            outcome: WaitOutcome::TimedOut { pending: 0 },
            polls: 0,
            sleeps: Vec::new(),
            newly_terminal: Vec::new(),
            elapsed: Duration::ZERO,
        };

        let mut state = PollState::Polling;
        while let PollState::Polling = state {
            report.polls += 1;
            state = match fetch_jobs(conn, correlation_tag).await {
                Ok(records) => {
                    self.observe(&records, seen, &mut report.newly_terminal);
                    self.next_state(&records, seen, start, report.polls >= max_polls)
                }
                Err(e) => {
                    let chain = error_chain(&e);
                    error!(
                        tag = %correlation_tag,
                        "Error while waiting for online DDL: {}", e
                    );
                    error!(tag = %correlation_tag, "{}", chain);
                    PollState::Done(WaitOutcome::Errored { message: chain })
                }
            };

            if let PollState::Polling = state {
                let delay = backoff.next().unwrap_or(self.settings.max_interval);
                info!(
                    tag = %correlation_tag,
                    "Waiting {} seconds for online DDL to complete...",
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                report.sleeps.push(delay);
            }
            if let PollState::Done(outcome) = &state {
                report.outcome = outcome.clone();
            }
        }

        report.elapsed = start.elapsed();
        report
    }

    /// Log every job not yet seen terminal, recording the ones that now are
    fn observe(&self, records: &[JobRecord], seen: &mut SeenSet, newly_terminal: &mut Vec<String>) {
        for record in records {
            if seen.contains(&record.id) {
                continue;
            }
            info!(
                migration_id = %record.id,
                status = %record.status,
                "Online DDL job {} checking status, {}",
                record.id,
                record.detail_message()
            );

            match record.status {
                JobStatus::Complete => info!(
                    migration_id = %record.id,
                    "Online DDL job {} completed successfully at {}",
                    record.id,
                    format_timestamp(record.completed_at)
                ),
                JobStatus::Failed => error!(
                    migration_id = %record.id,
                    "Online DDL job {} failed: {} at {}",
                    record.id,
                    record.message.as_deref().unwrap_or(""),
                    format_timestamp(record.completed_at)
                ),
                JobStatus::Cancelled => warn!(
                    migration_id = %record.id,
                    "Online DDL job {} was cancelled at {}",
                    record.id,
                    format_timestamp(record.cancelled_at)
                ),
                _ => {
                    info!(
                        migration_id = %record.id,
                        "Online DDL job {} is still {}", record.id, record.status
                    );
                    continue;
                }
            }

            seen.insert(record.id.clone());
            newly_terminal.push(record.id.clone());
        }
    }

    fn next_state(
        &self,
        records: &[JobRecord],
        seen: &SeenSet,
        start: Instant,
        last_poll: bool,
    ) -> PollState {
        if seen.covers(records) {
            info!("Online DDL jobs all completed successfully");
            return PollState::Done(WaitOutcome::Complete {
                total: records.len(),
            });
        }

        if start.elapsed() > self.settings.timeout || last_poll {
            let pending = records
                .iter()
                .filter(|record| !seen.contains(&record.id))
                .count();
            warn!(
                pending,
                "Online DDL did not complete within {} seconds. Timing out.",
                self.settings.timeout.as_secs()
            );
            return PollState::Done(WaitOutcome::TimedOut { pending });
        }

        PollState::Polling
    }
}

fn format_timestamp(timestamp: Option<chrono::NaiveDateTime>) -> String {
    timestamp
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown time".to_string())
}
