//! In-process cadence for the periodic workers.
//!
//! Due times come from the injected [`Clock`], so tests drive the schedule
//! with a [`ManualClock`](crate::clock::ManualClock) and call [`Scheduler::tick`]
//! directly. [`Scheduler::run`] is the production loop: tick, then sleep for
//! the poll interval or until shutdown.
//!
//! Every job is due at construction and then every `interval` after it last
//! ran. Within a tick jobs run one after another; a job's failure is
//! reported and does not stop the others.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Notify;
use tracing::{error, info};

use super::{Worker, WorkerReport};
use crate::clock::Clock;
use crate::error::Result;

struct Job {
    worker: Arc<dyn Worker>,
    interval: Duration,
    next_due: Mutex<DateTime<Utc>>,
}

impl Job {
    /// Claim this slot if due, moving the next due time forward.
    fn take_if_due(&self, now: DateTime<Utc>) -> bool {
        let mut next_due = self.next_due.lock().unwrap_or_else(|e| e.into_inner());
        if *next_due > now {
            return false;
        }
        *next_due = now + self.interval;
        true
    }
}

/// One job's result from a tick.
#[derive(Debug)]
pub struct TickResult {
    pub worker: &'static str,
    pub result: Result<WorkerReport>,
}

#[derive(Clone)]
pub struct Scheduler {
    jobs: Vec<Arc<Job>>,
    clock: Arc<dyn Clock>,
    poll_interval: std::time::Duration,
    shutdown: Arc<Notify>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, poll_interval: std::time::Duration) -> Self {
        Self {
            jobs: Vec::new(),
            clock,
            poll_interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Add a job running `worker` every `interval`.
    pub fn with_job(mut self, worker: Arc<dyn Worker>, interval: Duration) -> Self {
        let job = Job {
            worker,
            interval,
            next_due: Mutex::new(self.clock.now()),
        };
        self.jobs.push(Arc::new(job));
        self
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.worker.name()).collect()
    }

    /// Run every job that is due now.
    pub async fn tick(&self) -> Vec<TickResult> {
        let now = self.clock.now();
        let mut results = Vec::new();
        for job in self.jobs.iter() {
            if !job.take_if_due(now) {
                continue;
            }
            let worker = job.worker.name();
            let result = job.worker.run_once().await;
            if let Err(ref e) = result {
                error!(worker, error = %e, "worker invocation failed");
            }
            results.push(TickResult { worker, result });
        }
        results
    }

    /// Tick until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<()> {
        info!(jobs = ?self.job_names(), "scheduler started");
        loop {
            self.tick().await;
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("scheduler shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
