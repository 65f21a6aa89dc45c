//! Fixed-rate periodic job execution
//!
//! Every scheduled job gets its own timer task and cancel signal. When the
//! timer fires the task waits for a worker permit, so at most `pool_size`
//! jobs execute at once across the scheduler. A job's executions never
//! overlap: a tick that comes due while the previous run is still going is
//! skipped.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Work executed on every tick of a scheduled job
#[async_trait]
pub trait Runnable: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn run(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Cancellable handle to a scheduled job
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    name: String,
    period: Duration,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

struct JobControl {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Worker-pool-backed periodic job scheduler
pub struct JobScheduler {
    pool_size: usize,
    permits: Arc<Semaphore>,
    jobs: DashMap<JobId, JobControl>,
    /// Tasks of jobs cancelled without interrupt, until their last run ends
    draining: DashMap<JobId, JoinHandle<()>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl JobScheduler {
    /// Create a scheduler running at most `pool_size` jobs at a time
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            pool_size,
            permits: Arc::new(Semaphore::new(pool_size)),
            jobs: DashMap::new(),
            draining: DashMap::new(),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Run `runnable` now and then every `period` until cancelled
    pub fn schedule(
        &self,
        runnable: Arc<dyn Runnable>,
        period: Duration,
    ) -> Result<JobHandle, ScheduleError> {
        if self.is_shutdown() {
            return Err(ScheduleError::Shutdown);
        }
        if period.is_zero() {
            return Err(ScheduleError::ZeroPeriod(runnable.name().to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ScheduleError::NoRuntime)?;

        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let name = runnable.name().to_string();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = runtime.spawn(run_periodic(
            runnable,
            period,
            Arc::clone(&self.permits),
            cancel_rx,
        ));
        self.jobs.insert(id, JobControl { cancel_tx, task });

        // Lost a race with shutdown: it may have drained the table before the insert
        if self.is_shutdown() {
            if let Some((_, control)) = self.jobs.remove(&id) {
                control.task.abort();
            }
            return Err(ScheduleError::Shutdown);
        }

        tracing::debug!(job = %id, name = %name, period = ?period, "Job scheduled");
        Ok(JobHandle { id, name, period })
    }

    /// Stop future executions of a job.
    ///
    /// With `interrupt_if_running` an in-flight execution is aborted at its
    /// next await point; otherwise it is allowed to finish unless the
    /// scheduler shuts down first. Returns false if the job was already
    /// cancelled.
    pub fn cancel(&self, handle: &JobHandle, interrupt_if_running: bool) -> bool {
        let Some((_, control)) = self.jobs.remove(&handle.id) else {
            return false;
        };
        if interrupt_if_running {
            control.task.abort();
        } else {
            let _ = control.cancel_tx.send(true);
            self.draining.retain(|_, task| !task.is_finished());
            if !control.task.is_finished() {
                self.draining.insert(handle.id, control.task);
            }
        }
        tracing::debug!(job = %handle.id, name = %handle.name, "Job cancelled");
        true
    }

    pub fn is_active(&self, handle: &JobHandle) -> bool {
        self.jobs.contains_key(&handle.id)
    }

    /// Number of live jobs
    pub fn active_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Cancel every job, stop the pool and wait for all job tasks to end
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.permits.close();

        let ids: Vec<JobId> = self.jobs.iter().map(|entry| *entry.key()).collect();
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, control)) = self.jobs.remove(&id) {
                control.task.abort();
                tasks.push(control.task);
            }
        }
        let stopped = tasks.len();

        let draining: Vec<JobId> = self.draining.iter().map(|entry| *entry.key()).collect();
        for id in draining {
            if let Some((_, task)) = self.draining.remove(&id) {
                task.abort();
                tasks.push(task);
            }
        }

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::warn!(error = %e, "Job task panicked before shutdown");
                }
            }
        }

        tracing::info!(jobs = stopped, "Job scheduler stopped");
    }
}

async fn run_periodic(
    runnable: Arc<dyn Runnable>,
    period: Duration,
    permits: Arc<Semaphore>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel_rx.changed() => break,
        }

        let permit = tokio::select! {
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                // Pool closed by shutdown
                Err(_) => break,
            },
            _ = cancel_rx.changed() => break,
        };

        if let Err(panic) = AssertUnwindSafe(runnable.run()).catch_unwind().await {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(name = %runnable.name(), panic = %message, "Job execution panicked");
        }
        drop(permit);

        if *cancel_rx.borrow() {
            break;
        }
    }
}

/// Scheduling errors
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Scheduler is shut down")]
    Shutdown,

    #[error("Job {0} has a zero period")]
    ZeroPeriod(String),

    #[error("No async runtime available to run jobs")]
    NoRuntime,
}
