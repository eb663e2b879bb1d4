use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ShutdownError;

/// A background job run on its own cadence.
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Current interval, or `None` while the job is disabled. Re-read on every
    /// tick so configuration changes apply without a restart.
    async fn interval(&self) -> Option<Duration>;

    async fn run(&self);
}

pub struct WorkerHandle {
    cancel_tx: broadcast::Sender<()>,
    joins: Vec<(&'static str, JoinHandle<()>)>,
}

impl WorkerHandle {
    /// Spawns one task per job. Each task wakes every `tick` to check whether
    /// its job is due, and exits at the next wake-up after [`stop`](Self::stop).
    pub fn spawn(jobs: Vec<Arc<dyn PeriodicJob>>, tick: Duration) -> Self {
        let (cancel_tx, _) = broadcast::channel(1);
        let joins = jobs
            .into_iter()
            .map(|job| {
                let name = job.name();
                let cancel_rx = cancel_tx.subscribe();
                (name, tokio::spawn(run_periodic(job, cancel_rx, tick)))
            })
            .collect();
        Self { cancel_tx, joins }
    }

    /// Signals every worker and waits up to `grace` in total for them to
    /// finish their current unit of work. Workers still running after that
    /// are aborted.
    pub async fn stop(self, grace: Duration) -> Result<(), ShutdownError> {
        let _ = self.cancel_tx.send(());
        let deadline = Instant::now() + grace;
        let mut first_error = None;
        for (name, mut join) in self.joins {
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(())) => debug!(worker = name, "worker stopped"),
                Ok(Err(e)) => {
                    warn!(worker = name, error = %e, "worker ended abnormally");
                    first_error.get_or_insert(ShutdownError::from(e));
                }
                Err(_) => {
                    warn!(worker = name, "worker did not stop in time, aborting");
                    join.abort();
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn run_periodic(
    job: Arc<dyn PeriodicJob>,
    mut cancel_rx: broadcast::Receiver<()>,
    tick: Duration,
) {
    let mut last_run: Option<Instant> = None;
    loop {
        if let Some(every) = job.interval().await {
            if last_run.map_or(true, |at| at.elapsed() >= every) {
                job.run().await;
                last_run = Some(Instant::now());
            }
        }
        tokio::select! {
            _ = cancel_rx.recv() => {
                info!(worker = job.name(), "worker shutdown requested");
                break;
            }
            _ = tokio::time::sleep(tick) => {}
        }
    }
}
