pub mod eviction_sweep;
pub mod poller;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::config::Config;
use crate::services::nozzle_client::NozzleClient;
use crate::store::Store;

use self::poller::Poller;

/// Timeout for a single scheduled job invocation.
const WORKER_TIMEOUT: Duration = Duration::from_secs(30);

/// How long shutdown waits for pollers to notice the signal.
#[cfg(test)]
const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);
#[cfg(not(test))]
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerName {
    EvictionSweep,
}

impl WorkerName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EvictionSweep => "eviction_sweep",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: WorkerName,
    pub cron: String,
    pub enabled: bool,
}

/// One poller per expanded nozzle address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerSpec {
    pub addr: String,
    pub index: usize,
    /// `X-CF-APP-INSTANCE` value when running as a platform application.
    pub instance: Option<String>,
}

pub struct WorkerManager {
    store: Arc<Store>,
    client: Arc<NozzleClient>,
    shutdown_rx: broadcast::Receiver<()>,
    config: Config,
}

impl WorkerManager {
    pub fn new(
        store: Arc<Store>,
        client: Arc<NozzleClient>,
        shutdown_rx: broadcast::Receiver<()>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            client,
            shutdown_rx,
            config: config.clone(),
        }
    }

    pub fn planned_pollers(&self) -> Vec<PollerSpec> {
        let app_guid = self
            .config
            .platform
            .as_ref()
            .map(|p| p.nozzle_app_guid.as_str());

        self.config
            .nozzle_addrs
            .iter()
            .enumerate()
            .map(|(index, addr)| PollerSpec {
                addr: addr.clone(),
                index,
                instance: app_guid.map(|guid| format!("{guid}:{index}")),
            })
            .collect()
    }

    pub fn planned_jobs(&self) -> Vec<JobSpec> {
        vec![JobSpec {
            name: WorkerName::EvictionSweep,
            cron: self.config.worker.eviction_cron.clone(),
            enabled: !self.config.worker.eviction_cron.trim().is_empty(),
        }]
    }

    /// Spawn the pollers and the job scheduler, then block until shutdown is signalled.
    pub async fn start(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let handles: Vec<_> = self
            .planned_pollers()
            .into_iter()
            .map(|spec| {
                let poller = Poller::new(
                    spec.addr,
                    spec.index,
                    spec.instance,
                    self.config.rate_interval,
                    self.client.clone(),
                    self.store.clone(),
                );
                tokio::spawn(poller.run(self.shutdown_rx.resubscribe()))
            })
            .collect();
        tracing::info!(pollers = handles.len(), "Pollers spawned");

        let mut scheduler = JobScheduler::new().await?;
        let jobs = self.register_jobs(&scheduler).await;
        scheduler.start().await?;

        tracing::info!(jobs = jobs.len(), "Worker manager started");
        let _ = self.shutdown_rx.recv().await;

        tracing::info!(
            drain_ms = DRAIN_TIMEOUT.as_millis() as u64,
            "Worker manager shutting down"
        );
        if tokio::time::timeout(DRAIN_TIMEOUT, join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!("Pollers did not stop within drain timeout");
        }
        let _ = scheduler.shutdown().await;
        Ok(())
    }

    /// Add every enabled job to `scheduler`, returning the ones that were scheduled.
    async fn register_jobs(&self, scheduler: &JobScheduler) -> Vec<(WorkerName, Uuid)> {
        let mut registered = Vec::new();
        for spec in self.planned_jobs() {
            if !spec.enabled {
                tracing::info!(name = spec.name.as_str(), "Skipping disabled worker");
                continue;
            }

            let name_str = spec.name.as_str();
            let id = match spec.name {
                WorkerName::EvictionSweep => {
                    let store = self.store.clone();
                    add_job(scheduler, &spec.cron, name_str, move || {
                        let store = store.clone();
                        async move {
                            eviction_sweep::run(&store, Utc::now().timestamp()).await;
                        }
                    })
                    .await
                }
            };
            if let Some(id) = id {
                tracing::info!(name = name_str, cron = %spec.cron, "Registered worker");
                registered.push((spec.name, id));
            }
        }
        registered
    }
}

/// Add a job to the scheduler with an overlap guard and timeout wrapper.
async fn add_job<Fut, F>(
    scheduler: &JobScheduler,
    cron: &str,
    name: &'static str,
    mut run: F,
) -> Option<Uuid>
where
    F: FnMut() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(false));

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let guard = running.clone();

        if guard
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(
                worker = name,
                "Skipping worker invocation: previous run still in progress"
            );
            return Box::pin(async {});
        }

        let fut = run();
        Box::pin(async move {
            if tokio::time::timeout(WORKER_TIMEOUT, fut).await.is_err() {
                tracing::error!(
                    worker = name,
                    timeout_secs = WORKER_TIMEOUT.as_secs(),
                    "Worker timed out"
                );
            }
            guard.store(false, Ordering::SeqCst);
        })
    });

    let job = match job {
        Ok(job) => job,
        Err(err) => {
            tracing::error!(error = %err, cron, worker = name, "Failed to create worker job");
            return None;
        }
    };
    match scheduler.add(job).await {
        Ok(id) => Some(id),
        Err(err) => {
            tracing::error!(error = %err, cron, worker = name, "Failed to add worker job");
            None
        }
    }
}
