use crate::config::NodeConfig;
use crate::metrics::Metrics;
use anyhow::{bail, Context, Result};
use forge_chain::{
    ChainClient, FundingContract, JsonRpcProvider, SimulatedChain, DEFAULT_CHAIN_ID,
};
use forge_escrow::{EscrowServices, ReconciliationReport};
use forge_storage::{ForgeStorage, MemoryStorage, Snapshot};
use forge_types::{Address, Wei};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const SIMULATED_CONTRACT: [u8; 20] = [0x5f; 20];
const SIMULATED_ACCOUNT: [u8; 20] = [0xf3; 20];
const SIMULATED_FUNDING_ETH: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    pub account: Option<String>,
    pub projects: usize,
    pub milestones: usize,
    pub releases: usize,
    pub contributions: usize,
    pub pending_contributions: usize,
    pub active_watches: usize,
}

/// Escrow services wired to storage, chain, metrics and snapshots
pub struct ForgeNode {
    config: NodeConfig,
    storage: Arc<MemoryStorage>,
    chain: Arc<dyn ChainClient>,
    account: Address,
    simulated: Option<Arc<SimulatedChain>>,
    services: EscrowServices,
    metrics: Option<Arc<Metrics>>,
}

impl ForgeNode {
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let start = Instant::now();
        config.validate()?;
        info!(name = %config.node.name, data_dir = ?config.node.data_dir, "🧬 Initializing escrow node");

        std::fs::create_dir_all(&config.node.data_dir)
            .with_context(|| format!("creating data dir {:?}", config.node.data_dir))?;

        let storage = Arc::new(MemoryStorage::new());
        let snapshot_path = config.snapshot_path();
        if snapshot_path.exists() {
            let snapshot = Snapshot::load_from_file(&snapshot_path)
                .await
                .with_context(|| format!("loading snapshot {:?}", snapshot_path))?;
            snapshot.restore_into(&storage).await?;
        } else {
            info!(path = ?snapshot_path, "No snapshot found, starting empty");
        }

        let (chain, account, simulated) = Self::connect_chain(&config).await?;

        let services = EscrowServices::new(
            storage.clone() as Arc<dyn ForgeStorage>,
            chain.clone(),
            config.monitor_config(),
        );
        let metrics = if config.metrics.enabled {
            Some(Arc::new(Metrics::new()?))
        } else {
            None
        };

        info!(
            account = %account,
            simulated = simulated.is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "✅ Escrow node initialized"
        );

        Ok(Self {
            config,
            storage,
            chain,
            account,
            simulated,
            services,
            metrics,
        })
    }

    async fn connect_chain(
        config: &NodeConfig,
    ) -> Result<(Arc<dyn ChainClient>, Address, Option<Arc<SimulatedChain>>)> {
        if config.chain.simulate {
            let contract = match &config.chain.contract_address {
                Some(address) => Address::parse(address)?,
                None => Address::from_bytes(SIMULATED_CONTRACT),
            };
            let account = match &config.chain.account {
                Some(address) => Address::parse(address)?,
                None => Address::from_bytes(SIMULATED_ACCOUNT),
            };
            let chain_id = config.chain.chain_id.unwrap_or(DEFAULT_CHAIN_ID);

            let sim = Arc::new(SimulatedChain::new(contract, account).with_chain_id(chain_id));
            sim.fund(account, Wei::from_eth(SIMULATED_FUNDING_ETH)).await;
            let client = FundingContract::new(sim.clone(), contract, Some(chain_id));
            let connected = client.connect().await?;
            warn!(contract = %contract, account = %connected, "⚠️ Running against a simulated chain");
            return Ok((Arc::new(client), connected, Some(sim)));
        }

        let contract = match &config.chain.contract_address {
            Some(address) => Address::parse(address)?,
            None => bail!("chain.contract_address is required"),
        };
        let provider = JsonRpcProvider::new(config.chain.rpc_url.clone(), config.request_timeout())?;
        let client = FundingContract::new(provider, contract, config.chain.chain_id);
        let connected = client.connect().await?;

        if let Some(expected) = &config.chain.account {
            let expected = Address::parse(expected)?;
            if expected != connected {
                bail!(
                    "provider account {} does not match configured account {}",
                    connected,
                    expected
                );
            }
        }

        info!(rpc_url = %config.chain.rpc_url, contract = %contract, account = %connected, "🔗 Connected to funding contract");
        Ok((Arc::new(client), connected, None))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn services(&self) -> &EscrowServices {
        &self.services
    }

    pub fn storage(&self) -> &Arc<MemoryStorage> {
        &self.storage
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    /// The in-process chain, when running with `simulate`
    pub fn simulated(&self) -> Option<&Arc<SimulatedChain>> {
        self.simulated.as_ref()
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        let stats = self.storage.get_stats().await?;
        Ok(NodeStatus {
            name: self.config.node.name.clone(),
            account: Some(self.account.to_string()),
            projects: stats.project_count,
            milestones: stats.milestone_count,
            releases: stats.release_count,
            contributions: stats.contribution_count,
            pending_contributions: stats.pending_contributions,
            active_watches: self.services.monitor.active_watches().await,
        })
    }

    pub async fn save_snapshot(&self) -> Result<PathBuf> {
        let path = self.config.snapshot_path();
        let snapshot = Snapshot::create(&self.storage).await?;
        snapshot.save_to_file(&path).await?;
        Ok(path)
    }

    /// One reconciliation pass over contributions pending for at least `min_age`
    pub async fn reconcile(&self, min_age: chrono::Duration) -> Result<ReconciliationReport> {
        Ok(self.services.reconciler.reconcile_pending(min_age).await?)
    }

    /// Resume pending watches, run the background tasks until `shutdown`
    /// resolves, then stop them and write a final snapshot.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let resumed = self
            .services
            .monitor
            .start_monitoring_pending_transactions()
            .await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = vec![
            self.services.monitor.spawn(stop_rx.clone()),
            self.spawn_snapshot_loop(stop_rx.clone()),
        ];
        if let Some(metrics) = &self.metrics {
            tasks.push(self.spawn_metrics_listener(metrics.clone(), stop_rx.clone()));
        }

        info!(
            resumed,
            poll_interval_secs = self.config.monitor.poll_interval_secs,
            snapshot_interval_secs = self.config.storage.snapshot_interval_secs,
            "✅ NODE READY"
        );

        shutdown.await;
        info!("🛑 Shutting down gracefully");

        let _ = stop_tx.send(true);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        let path = self.save_snapshot().await?;
        info!(path = ?path, "💾 Final snapshot written");

        if let Some(metrics) = &self.metrics {
            debug!(metrics = %metrics.gather(), "📊 Final metrics");
        }
        Ok(())
    }

    fn spawn_snapshot_loop(&self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let storage = self.storage.clone();
        let path = self.config.snapshot_path();
        let period = Duration::from_secs(self.config.storage.snapshot_interval_secs);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let result = match Snapshot::create(&storage).await {
                            Ok(snapshot) => snapshot.save_to_file(&path).await,
                            Err(e) => Err(e),
                        };
                        if let Err(e) = result {
                            error!(error = %e, path = ?path, "❌ Periodic snapshot failed");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    fn spawn_metrics_listener(
        &self,
        metrics: Arc<Metrics>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let mut events = self.services.events.subscribe();
        let monitor = self.services.monitor.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => {
                            metrics.observe(&event);
                            metrics.active_watches.set(monitor.active_watches().await as i64);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Metrics listener lagged behind the event bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
