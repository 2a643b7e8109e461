//! Scheduler module: one probe loop per target, plus reporting.

mod report;

pub use report::*;

use crate::config::{MonitorConfig, PingSettings};
use crate::db::{HostTarget, MetricsStore, ServiceTarget, Targets};
use crate::probe::{remaining_cadence, run_connectivity_probe, ProbeError, ServiceProber};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};

/// Owns the probe workers and produces reports from the store they feed.
pub struct Supervisor {
    config: Arc<MonitorConfig>,
    store: MetricsStore,
    stop_chans: Arc<RwLock<HashMap<String, broadcast::Sender<()>>>>,
    targets: RwLock<Targets>,
}

impl Supervisor {
    pub fn new(config: Arc<MonitorConfig>, store: MetricsStore) -> Self {
        Self {
            config,
            store,
            stop_chans: Arc::new(RwLock::new(HashMap::new())),
            targets: RwLock::new(Targets::default()),
        }
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    /// Targets handed to the last `start`.
    pub async fn targets(&self) -> Targets {
        self.targets.read().await.clone()
    }

    /// Spawn one detached worker per target. Returns how many were started.
    pub async fn start(&self, targets: &Targets) -> Result<usize, ProbeError> {
        let prober = ServiceProber::new(self.config.service_method, self.config.service_timeout)?;

        tracing::info!(
            "Starting {} service and {} host probers against the {} store",
            targets.services.len(),
            targets.hosts.len(),
            self.store.backend_name()
        );
        if targets.is_empty() {
            tracing::warn!("No targets configured; nothing will be probed");
        }

        let mut started = 0;
        for service in &targets.services {
            if self.add_service(service.clone(), prober.clone()).await {
                started += 1;
            }
        }
        for host in &targets.hosts {
            if self.add_host(host.clone()).await {
                started += 1;
            }
        }

        *self.targets.write().await = targets.clone();
        Ok(started)
    }

    /// Start the workers, idle until `shutdown` resolves, then stop them.
    pub async fn run_until<F>(&self, targets: &Targets, shutdown: F) -> Result<(), ProbeError>
    where
        F: Future<Output = ()>,
    {
        self.start(targets).await?;
        shutdown.await;
        self.shutdown().await;
        Ok(())
    }

    async fn add_service(&self, target: ServiceTarget, prober: ServiceProber) -> bool {
        let key = format!("service:{}", target.name);
        let Some((stop_tx, stop_rx)) = self.register(&key).await else {
            return false;
        };

        let store = self.store.clone();
        let cadence = self.config.cadence;
        let stop_chans = self.stop_chans.clone();

        tokio::spawn(async move {
            let name = target.name.clone();
            if let Err(e) = run_service_loop(prober, target, store, cadence, stop_rx).await {
                tracing::error!("Service prober for {} terminated: {}", name, e);
            }
            release(&stop_chans, &key, &stop_tx).await;
        });
        true
    }

    async fn add_host(&self, target: HostTarget) -> bool {
        let key = format!("host:{}", target.address);
        let Some((stop_tx, stop_rx)) = self.register(&key).await else {
            return false;
        };

        let store = self.store.clone();
        let cadence = self.config.cadence;
        let ping = self.config.ping.clone();
        let stop_chans = self.stop_chans.clone();

        tokio::spawn(async move {
            run_connectivity_loop(target, ping, store, cadence, stop_rx).await;
            release(&stop_chans, &key, &stop_tx).await;
        });
        true
    }

    /// Reserve a stop channel for a worker; `None` if one is already running.
    async fn register(&self, key: &str) -> Option<(broadcast::Sender<()>, broadcast::Receiver<()>)> {
        let mut stop_chans = self.stop_chans.write().await;
        if stop_chans.contains_key(key) {
            tracing::warn!("Supervisor: {} is already being probed", key);
            return None;
        }
        let (stop_tx, stop_rx) = broadcast::channel(1);
        stop_chans.insert(key.to_string(), stop_tx.clone());
        tracing::info!("Supervisor: Adding worker {}", key);
        Some((stop_tx, stop_rx))
    }

    /// Number of workers that have not exited.
    pub async fn running_workers(&self) -> usize {
        self.stop_chans.read().await.len()
    }

    /// Signal every worker to stop after its current cycle.
    pub async fn shutdown(&self) {
        let mut stop_chans = self.stop_chans.write().await;
        for (key, stop_tx) in stop_chans.drain() {
            let _ = stop_tx.send(());
            tracing::info!("Supervisor: Stopped worker {}", key);
        }
    }

    /// Render the current aggregates to the configured report file.
    pub async fn report(&self) -> Result<Report, ReportError> {
        write_report(&self.store, &self.config.report_file).await
    }
}

/// Drop a finished worker's entry unless a newer worker already owns the key.
async fn release(
    stop_chans: &RwLock<HashMap<String, broadcast::Sender<()>>>,
    key: &str,
    stop_tx: &broadcast::Sender<()>,
) {
    let mut stop_chans = stop_chans.write().await;
    if stop_chans.get(key).is_some_and(|current| current.same_channel(stop_tx)) {
        stop_chans.remove(key);
    }
}

/// Random 0-100 ms delay before a worker's first probe.
fn start_jitter() -> Duration {
    Duration::from_millis(rand::random::<u64>() % 100)
}

/// Sleep for `wait`; `true` if a stop arrived first.
async fn wait_or_stop(wait: Duration, stop_rx: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = stop_rx.recv() => true,
        _ = tokio::time::sleep(wait) => false,
    }
}

/// Probe one service forever, at most once per `cadence`.
///
/// Returns `Err` only for an unexpected probe failure.
async fn run_service_loop(
    prober: ServiceProber,
    target: ServiceTarget,
    store: MetricsStore,
    cadence: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) -> Result<(), ProbeError> {
    if wait_or_stop(start_jitter(), &mut stop_rx).await {
        return Ok(());
    }

    loop {
        let start = Instant::now();

        let result = prober.probe(&target).await?;
        tracing::debug!(
            "{} {}: {} ({} us)",
            result.service_name,
            result.address,
            result.status_code,
            result.elapsed_us
        );

        if let Err(e) = store.record_service_probe(result).await {
            tracing::warn!("Failed to store sample for service {}: {}", target.name, e);
        }

        if wait_or_stop(remaining_cadence(cadence, start.elapsed()), &mut stop_rx).await {
            return Ok(());
        }
    }
}

/// Ping one host forever, at most once per `cadence`.
async fn run_connectivity_loop(
    target: HostTarget,
    ping: PingSettings,
    store: MetricsStore,
    cadence: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    if wait_or_stop(start_jitter(), &mut stop_rx).await {
        return;
    }

    loop {
        let start = Instant::now();

        let result = run_connectivity_probe(&target.address, &ping).await;
        tracing::debug!(
            "{}: loss {}% in {} ms ({:?})",
            result.address,
            result.packet_loss,
            result.total_time_ms,
            result.exit_code
        );

        if let Err(e) = store.record_connectivity_probe(result).await {
            tracing::warn!("Failed to store sample for host {}: {}", target.address, e);
        }

        if wait_or_stop(remaining_cadence(cadence, start.elapsed()), &mut stop_rx).await {
            return;
        }
    }
}
