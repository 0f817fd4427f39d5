//! Cron-driven job runner.
//!
//! The scheduler owns an explicit list of `(job, schedule)` pairs. One loop
//! sleeps until the earliest upcoming fire time, then spawns the handler for
//! every job due at that instant. Schedules are evaluated in local time.
//!
//! A job never runs twice at once: a firing that finds the previous run of the
//! same job still in flight is skipped.

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use recruit_common::error::AppError;
use recruit_common::rules::normalize_cron;
use recruit_common::types::ScheduleJob;

/// Callback invoked when a job fires.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job_key: &str);
}

pub struct Scheduler {
    jobs: Vec<(ScheduleJob, cron::Schedule)>,
    handler: Arc<dyn JobHandler>,
    running: HashMap<String, Arc<AtomicBool>>,
}

/// Clears a job's in-flight flag when its run ends, panics included.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(jobs: Vec<ScheduleJob>, handler: Arc<dyn JobHandler>) -> Result<Self, AppError> {
        let jobs = jobs
            .into_iter()
            .map(|job| {
                let schedule = cron::Schedule::from_str(&normalize_cron(&job.cron_expression))
                    .map_err(|e| {
                        AppError::Config(format!(
                            "invalid cron expression '{}' for job {}: {}",
                            job.cron_expression, job.job_key, e
                        ))
                    })?;
                Ok((job, schedule))
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        let running = jobs
            .iter()
            .map(|(job, _)| (job.job_key.clone(), Arc::new(AtomicBool::new(false))))
            .collect();

        Ok(Self {
            jobs,
            handler,
            running,
        })
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Earliest fire time strictly after `after`, with every job due then.
    pub fn next_due(&self, after: DateTime<Local>) -> Option<(DateTime<Local>, Vec<String>)> {
        let upcoming: Vec<(DateTime<Local>, &str)> = self
            .jobs
            .iter()
            .filter_map(|(job, schedule)| {
                schedule
                    .after(&after)
                    .next()
                    .map(|at| (at, job.job_key.as_str()))
            })
            .collect();

        let earliest = upcoming.iter().map(|(at, _)| *at).min()?;
        let due = upcoming
            .into_iter()
            .filter(|(at, _)| *at == earliest)
            .map(|(_, key)| key.to_string())
            .collect();
        Some((earliest, due))
    }

    /// Spawn the handler for `job_key` unless its previous run is still going.
    fn fire(&self, job_key: String) {
        let Some(flag) = self.running.get(&job_key) else {
            return;
        };
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(job = %job_key, "Previous run still in progress, skipping this firing");
            return;
        }

        tracing::info!(job = %job_key, "Schedule job fired");
        let guard = RunGuard(flag.clone());
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let _guard = guard;
            handler.run(&job_key).await;
        });
    }

    /// Run until `shutdown` resolves. Jobs already started keep running.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        if self.jobs.is_empty() {
            tracing::info!("No schedule jobs configured, scheduler idle");
            shutdown.await;
            return;
        }

        tracing::info!(jobs = self.jobs.len(), "Scheduler started");
        let mut last_fired: Option<DateTime<Local>> = None;

        loop {
            let now = Local::now();
            let base = match last_fired {
                Some(fired) if fired > now => fired,
                _ => now,
            };
            let Some((at, due)) = self.next_due(base) else {
                tracing::warn!("No upcoming fire times, scheduler stopped");
                shutdown.await;
                return;
            };

            let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
            tracing::debug!(next = %at, jobs = ?due, "Waiting for next schedule");

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {
                    last_fired = Some(at);
                    for job_key in due {
                        self.fire(job_key);
                    }
                }
            }
        }
    }
}
