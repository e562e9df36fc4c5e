//! Worker supervision.
//!
//! The supervisor owns a handle to every background task and one shared
//! readiness bitmask. Each worker sets its bit once its loop is running and
//! clears it on exit; callers wait on the mask with a bounded timeout.
//! Ticks touch disk and take ledger locks, so they run on the blocking pool.

use crate::config::NodeConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use vex_core::{CoreError, KeyProvider, Ledger};
use vex_types::now_millis;

/// Set once the ledger is open.
pub const LEDGER_READY: u32 = 1 << 0;

/// Background tasks run by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Worker {
    BlockProducer,
    HealthMonitor,
    MempoolSweeper,
    BroadcastRetrier,
}

impl Worker {
    pub fn bit(self) -> u32 {
        match self {
            Worker::BlockProducer => 1 << 1,
            Worker::HealthMonitor => 1 << 2,
            Worker::MempoolSweeper => 1 << 3,
            Worker::BroadcastRetrier => 1 << 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Worker::BlockProducer => "block-producer",
            Worker::HealthMonitor => "health-monitor",
            Worker::MempoolSweeper => "mempool-sweeper",
            Worker::BroadcastRetrier => "broadcast-retrier",
        }
    }
}

/// Shared readiness bitmask. Waiters are woken on every change.
#[derive(Debug, Clone)]
pub struct Readiness(Arc<watch::Sender<u32>>);

impl Default for Readiness {
    fn default() -> Self {
        let (sender, _) = watch::channel(0);
        Self(Arc::new(sender))
    }
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, bits: u32) {
        self.0.send_modify(|current| *current |= bits);
    }

    pub fn clear(&self, bits: u32) {
        self.0.send_modify(|current| *current &= !bits);
    }

    pub fn bits(&self) -> u32 {
        *self.0.borrow()
    }

    pub fn contains(&self, mask: u32) -> bool {
        self.bits() & mask == mask
    }

    /// Wait until every bit of `mask` is set. Returns false on timeout.
    pub async fn wait_for(&self, mask: u32, timeout: Duration) -> bool {
        let mut changes = self.0.subscribe();
        let ready = tokio::time::timeout(timeout, changes.wait_for(|bits| bits & mask == mask)).await;
        matches!(ready, Ok(Ok(_)))
    }
}

/// Periods and limits for the workers.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub block_interval: Duration,
    pub health_interval: Duration,
    pub sweep_interval: Duration,
    pub retry_interval: Duration,
    pub pool_ttl: Duration,
    pub readiness_timeout: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        let block_interval = Duration::from_millis(config.consensus.block_interval_ms);
        Self {
            block_interval,
            health_interval: Duration::from_secs(config.supervisor.health_interval_secs),
            sweep_interval: Duration::from_secs(config.mempool.sweep_interval_secs),
            retry_interval: block_interval,
            pool_ttl: Duration::from_secs(config.mempool.ttl_secs),
            readiness_timeout: Duration::from_secs(config.supervisor.readiness_timeout_secs),
        }
    }
}

struct WorkerHandle {
    worker: Worker,
    handle: JoinHandle<()>,
}

/// Owns the node's background workers.
pub struct Supervisor {
    ledger: Arc<Ledger>,
    keys: Option<Arc<dyn KeyProvider>>,
    settings: SupervisorSettings,
    readiness: Readiness,
    shutdown: watch::Sender<bool>,
    workers: Vec<WorkerHandle>,
}

impl Supervisor {
    /// Without `keys` the node never produces blocks.
    pub fn new(ledger: Arc<Ledger>, keys: Option<Arc<dyn KeyProvider>>, settings: SupervisorSettings) -> Self {
        let readiness = Readiness::new();
        readiness.set(LEDGER_READY);
        let (shutdown, _) = watch::channel(false);
        Self {
            ledger,
            keys,
            settings,
            readiness,
            shutdown,
            workers: Vec::new(),
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    /// Bits that must be set before the node counts as ready.
    pub fn expected_mask(&self) -> u32 {
        let mut mask = LEDGER_READY
            | Worker::HealthMonitor.bit()
            | Worker::MempoolSweeper.bit()
            | Worker::BroadcastRetrier.bit();
        if self.keys.is_some() {
            mask |= Worker::BlockProducer.bit();
        }
        mask
    }

    /// Workers currently owned.
    pub fn workers(&self) -> Vec<Worker> {
        self.workers.iter().map(|w| w.worker).collect()
    }

    /// Spawn every worker. Must run inside a tokio runtime.
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }

        if let Some(keys) = self.keys.clone() {
            let ledger = self.ledger.clone();
            self.spawn(Worker::BlockProducer, self.settings.block_interval, move || {
                produce(&ledger, keys.as_ref())
            });
        }

        let ledger = self.ledger.clone();
        let keys = self.keys.clone();
        self.spawn(Worker::HealthMonitor, self.settings.health_interval, move || {
            check_health(&ledger, keys.as_deref())
        });

        let ledger = self.ledger.clone();
        let ttl = self.settings.pool_ttl;
        self.spawn(Worker::MempoolSweeper, self.settings.sweep_interval, move || {
            match ledger.pool().clear_expired(ttl) {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Expired transactions swept"),
                Err(e) => error!(error = %e, "Mempool sweep failed"),
            }
        });

        let ledger = self.ledger.clone();
        self.spawn(Worker::BroadcastRetrier, self.settings.retry_interval, move || {
            if ledger.pending_broadcasts() > 0 {
                let delivered = ledger.retry_broadcasts();
                debug!(delivered, pending = ledger.pending_broadcasts(), "Broadcast retry");
            }
        });

        info!(workers = self.workers.len(), "Supervisor started");
    }

    fn spawn<F>(&mut self, worker: Worker, period: Duration, tick: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let tick = Arc::new(tick);
        let readiness = self.readiness.clone();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            readiness.set(worker.bit());
            debug!(worker = worker.name(), "Worker running");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let tick = tick.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || (*tick)()).await {
                            error!(worker = worker.name(), error = %e, "Worker tick panicked");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            readiness.clear(worker.bit());
            debug!(worker = worker.name(), "Worker stopped");
        });
        self.workers.push(WorkerHandle { worker, handle });
    }

    /// Wait until every expected worker reports ready.
    pub async fn wait_until_ready(&self) -> anyhow::Result<()> {
        let mask = self.expected_mask();
        if self.readiness.wait_for(mask, self.settings.readiness_timeout).await {
            Ok(())
        } else {
            anyhow::bail!(
                "Node not ready after {:?} (readiness {:#07b}, expected {:#07b})",
                self.settings.readiness_timeout,
                self.readiness.bits(),
                mask
            )
        }
    }

    /// Signal every worker to stop and wait for them.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        for WorkerHandle { worker, handle } in self.workers.drain(..) {
            if let Err(e) = handle.await {
                warn!(worker = worker.name(), error = %e, "Worker ended abnormally");
            }
        }
        info!("Supervisor stopped");
    }
}

fn produce(ledger: &Ledger, keys: &dyn KeyProvider) {
    match ledger.produce_block(keys) {
        Ok(_) => {}
        Err(CoreError::NotSelectedValidator { selected, .. }) => {
            debug!(%selected, "Another validator was selected");
        }
        Err(e @ (CoreError::InsufficientStake { .. } | CoreError::NoActiveValidator)) => {
            warn!(error = %e, "Cannot produce blocks");
        }
        Err(e) => error!(error = %e, "Block production failed"),
    }
}

fn check_health(ledger: &Ledger, keys: Option<&dyn KeyProvider>) {
    let now = now_millis();
    let registry = ledger.consensus().registry();

    if let Some(keys) = keys {
        let address = keys.address();
        if registry.validator(&address).is_some() {
            if let Err(e) = registry.touch(&address, now) {
                warn!(error = %e, "Failed to refresh validator activity");
            }
        }
    }

    let valid = ledger.is_chain_valid();
    if !valid {
        error!("Local chain failed validation");
    }
    debug!(
        height = ledger.len().saturating_sub(1),
        pool = ledger.pool().len(),
        pending_broadcasts = ledger.pending_broadcasts(),
        active_validators = registry.active_validators(now).len(),
        valid,
        "Health check"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LoggingNetwork;
    use tempfile::TempDir;
    use vex_core::{GenesisConfig, LedgerConfig};
    use vex_crypto::Keypair;
    use vex_storage::{Database, StateStore};
    use vex_txpool::{PoolConfig, TransactionPool};

    fn open_ledger(temp: &TempDir, key: &Keypair) -> Arc<Ledger> {
        let db = Arc::new(Database::open(temp.path()).unwrap());
        let state = Arc::new(StateStore::open(db).unwrap());
        let pool = Arc::new(TransactionPool::new(PoolConfig::default(), state.clone()));
        let config = LedgerConfig {
            genesis: GenesisConfig {
                alloc: Vec::new(),
                stake: 1_000,
            },
            ..LedgerConfig::default()
        };
        Arc::new(Ledger::open(config, state, pool, Arc::new(LoggingNetwork::new()), Some(key)).unwrap())
    }

    fn fast_settings() -> SupervisorSettings {
        SupervisorSettings {
            block_interval: Duration::from_millis(20),
            health_interval: Duration::from_millis(20),
            sweep_interval: Duration::from_millis(20),
            retry_interval: Duration::from_millis(20),
            pool_ttl: Duration::from_secs(3600),
            readiness_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_readiness_wait() {
        let readiness = Readiness::new();
        assert!(!readiness.wait_for(0b11, Duration::from_millis(30)).await);

        let setter = readiness.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            setter.set(0b01);
            setter.set(0b10);
        });
        assert!(readiness.wait_for(0b11, Duration::from_secs(2)).await);

        readiness.clear(0b01);
        assert_eq!(readiness.bits(), 0b10);
    }

    #[tokio::test]
    async fn test_readiness_wakes_waiter_without_polling() {
        let readiness = Readiness::new();
        let waiter = {
            let readiness = readiness.clone();
            tokio::spawn(async move { readiness.wait_for(0b100, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;

        let started = std::time::Instant::now();
        readiness.set(0b100);
        assert!(waiter.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(readiness.wait_for(0, Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_slow_tick_does_not_stall_runtime() {
        let temp = TempDir::new().unwrap();
        let key = Keypair::generate();
        let mut supervisor = Supervisor::new(open_ledger(&temp, &key), None, fast_settings());
        supervisor.spawn(Worker::HealthMonitor, Duration::from_millis(5), || {
            std::thread::sleep(Duration::from_millis(300));
        });
        assert!(supervisor
            .readiness()
            .wait_for(Worker::HealthMonitor.bit(), Duration::from_secs(2))
            .await);

        // The test runtime has a single thread; a tick run inline would hold it
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(started.elapsed() < Duration::from_millis(200));

        supervisor.shutdown().await;
        assert!(!supervisor.readiness().contains(Worker::HealthMonitor.bit()));
    }

    #[tokio::test]
    async fn test_validator_node_produces_blocks() {
        let temp = TempDir::new().unwrap();
        let key = Keypair::generate();
        let ledger = open_ledger(&temp, &key);

        let mut supervisor = Supervisor::new(ledger.clone(), Some(Arc::new(key)), fast_settings());
        supervisor.start();
        supervisor.wait_until_ready().await.unwrap();
        assert_eq!(supervisor.workers().len(), 4);

        tokio::time::sleep(Duration::from_millis(150)).await;
        supervisor.shutdown().await;

        assert!(ledger.len() > 1);
        assert!(ledger.is_chain_valid());
        assert_eq!(supervisor.readiness().bits(), LEDGER_READY);
        assert!(supervisor.workers().is_empty());
    }

    #[tokio::test]
    async fn test_observer_node_never_produces() {
        let temp = TempDir::new().unwrap();
        let key = Keypair::generate();
        let ledger = open_ledger(&temp, &key);

        let mut supervisor = Supervisor::new(ledger.clone(), None, fast_settings());
        assert_eq!(supervisor.expected_mask() & Worker::BlockProducer.bit(), 0);
        supervisor.start();
        supervisor.wait_until_ready().await.unwrap();
        assert!(!supervisor.workers().contains(&Worker::BlockProducer));

        tokio::time::sleep(Duration::from_millis(80)).await;
        supervisor.shutdown().await;
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_not_ready_before_start() {
        let temp = TempDir::new().unwrap();
        let key = Keypair::generate();
        let ledger = open_ledger(&temp, &key);

        let mut settings = fast_settings();
        settings.readiness_timeout = Duration::from_millis(30);
        let supervisor = Supervisor::new(ledger, None, settings);
        assert!(supervisor.readiness().contains(LEDGER_READY));
        assert!(supervisor.wait_until_ready().await.is_err());
    }
}
