//! The replica: local tables plus the background sync machinery.

use crate::catchup;
use crate::config::ReplicaConfig;
use crate::error::{EngineError, EngineResult};
use crate::online::OnlineDetector;
use crate::policy::{AllowAll, WritePolicy};
use crate::progress;
use crate::pull;
use crate::queue::{self, DeadLetter, MutationQueue};
use crate::state::{self, StatePublisher, SyncState};
use crate::table::{Origin, SyncedTable};
use crate::transport::{RemoteEndpoint, ResilientTransport};
use relaydb_protocol::{MutationBatch, NodeInfo};
use relaydb_storage::StorageDriver;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

fn is_reserved(table: &str) -> bool {
    table.starts_with('_')
}

/// A local replica of the synced dataset.
///
/// Opening a replica spawns its sync loop: bootstrap pull, catch-up, then
/// steady-state queue draining and feed polling. Writes through
/// [`Replica::table`] handles are accepted at any point, online or not.
/// Once synced they queue durably and drain when connectivity allows;
/// before that they bypass the queue and go straight to the remote.
///
/// Dropping the replica stops the sync loop; local data stays intact.
pub struct Replica<D: StorageDriver + Clone, R: RemoteEndpoint> {
    driver: D,
    config: ReplicaConfig,
    origin: Origin,
    queue: Arc<MutationQueue<D>>,
    drain: Arc<Notify>,
    direct: mpsc::UnboundedSender<MutationBatch>,
    state_rx: watch::Receiver<SyncState>,
    policy: Arc<dyn WritePolicy>,
    sync_task: JoinHandle<()>,
    direct_task: JoinHandle<()>,
    _endpoint: std::marker::PhantomData<R>,
}

impl<D: StorageDriver + Clone, R: RemoteEndpoint> Replica<D, R> {
    /// Opens a replica over `driver`, syncing through `endpoint`.
    ///
    /// Must be called within a tokio runtime. Creates the bookkeeping
    /// tables and every schema table if they do not exist yet.
    pub fn open(
        driver: D,
        endpoint: R,
        detector: OnlineDetector,
        config: ReplicaConfig,
    ) -> EngineResult<Self> {
        for table in &config.schema {
            if is_reserved(table) {
                return Err(EngineError::ReservedTable(table.clone()));
            }
            driver.ensure_table(table)?;
        }
        driver.ensure_table(progress::PROGRESS_TABLE)?;

        let queue = Arc::new(MutationQueue::open(driver.clone())?);
        let transport = Arc::new(ResilientTransport::new(
            endpoint,
            detector,
            config.backoff.clone(),
        ));
        let (publisher, state_rx) = StatePublisher::new();
        let drain = Arc::new(Notify::new());
        let origin = Origin {
            db_name: config.db_name.clone(),
            node: NodeInfo::generate(config.node_name.clone()),
        };

        let sync_task = tokio::spawn(sync_loop(
            driver.clone(),
            config.clone(),
            Arc::clone(&queue),
            Arc::clone(&transport),
            publisher,
            Arc::clone(&drain),
        ));
        let (direct, direct_rx) = mpsc::unbounded_channel();
        let direct_task = tokio::spawn(direct_send(driver.clone(), transport, direct_rx));

        Ok(Self {
            driver,
            config,
            origin,
            queue,
            drain,
            direct,
            state_rx,
            policy: Arc::new(AllowAll),
            sync_task,
            direct_task,
            _endpoint: std::marker::PhantomData,
        })
    }

    /// Installs a write policy consulted by every table handle created
    /// afterwards.
    pub fn with_policy(mut self, policy: Arc<dyn WritePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Returns a handle to one synced table.
    pub fn table(&self, name: &str) -> EngineResult<SyncedTable<D>> {
        if is_reserved(name) {
            return Err(EngineError::ReservedTable(name.to_string()));
        }
        if !self.config.schema.iter().any(|t| t == name) {
            return Err(EngineError::UnknownTable(name.to_string()));
        }
        Ok(SyncedTable::new(
            name.to_string(),
            self.driver.clone(),
            self.origin.clone(),
            Arc::clone(&self.drain),
            Arc::clone(&self.policy),
            self.state_rx.clone(),
            self.direct.clone(),
        ))
    }

    /// An observer of the sync lifecycle state.
    pub fn sync_state(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    /// Waits until the replica has fully caught up once.
    pub async fn wait_for_sync(&self) {
        let mut rx = self.state_rx.clone();
        state::wait_for_synced(&mut rx).await;
    }

    /// Nudges the queue drainer to run now rather than on its next tick.
    pub fn flush(&self) {
        self.drain.notify_one();
    }

    /// Batches the remote rejected, with their reasons.
    pub fn dead_letters(&self) -> EngineResult<Vec<DeadLetter>> {
        self.queue.dead_letters()
    }

    /// The number of captured batches not yet confirmed by the remote.
    pub fn pending_batches(&self) -> EngineResult<usize> {
        Ok(self.queue.pending()?.len())
    }
}

impl<D: StorageDriver + Clone, R: RemoteEndpoint> Drop for Replica<D, R> {
    fn drop(&mut self) {
        self.sync_task.abort();
        self.direct_task.abort();
    }
}

/// Forwards writes captured before the replica is synced straight to the
/// remote.
///
/// A confirmed or duplicated batch needs no local bookkeeping: the write
/// is already applied, and the catch-up pass replays its committed form.
/// A rejection is undone and dead-lettered like a queued one.
async fn direct_send<D, R>(
    driver: D,
    transport: Arc<ResilientTransport<R>>,
    mut batches: mpsc::UnboundedReceiver<MutationBatch>,
) where
    D: StorageDriver,
    R: RemoteEndpoint,
{
    while let Some(batch) = batches.recv().await {
        let outcome = transport.send(vec![batch.clone()]).await;
        for rejection in &outcome.failed {
            if let Err(e) = queue::dead_letter(&driver, &batch, &rejection.reason) {
                error!(error = %e, "failed to resolve a rejected direct send");
            }
        }
    }
}

async fn sync_loop<D, R>(
    driver: D,
    config: ReplicaConfig,
    queue: Arc<MutationQueue<D>>,
    transport: Arc<ResilientTransport<R>>,
    publisher: StatePublisher,
    drain: Arc<Notify>,
) where
    D: StorageDriver + Clone,
    R: RemoteEndpoint,
{
    // Bootstrap: stream the bulk snapshot until every table is complete.
    loop {
        match progress::resume_state(&driver, &config.schema) {
            Ok(resume) if resume.is_empty() => break,
            Ok(resume) => {
                publisher.set(SyncState::Pulling);
                let mut chunks = transport.pull(&resume).await;
                match pull::consume(&driver, &config.schema, &mut chunks).await {
                    Ok(true) => break,
                    Ok(false) => warn!("pull stream ended early, resuming"),
                    Err(e) => warn!(error = %e, "pull attempt failed, resuming"),
                }
            }
            Err(e) => error!(error = %e, "failed to read pull progress"),
        }
        tokio::time::sleep(config.backoff.base_delay).await;
    }

    publisher.set(SyncState::GettingLatest);
    if let Err(e) = catch_up(&driver, &transport).await {
        error!(error = %e, "catch-up failed");
    }
    publisher.set(SyncState::Synced);
    // A second pass closes the window between the first pass finishing
    // and the state flip being observed.
    if let Err(e) = catch_up(&driver, &transport).await {
        error!(error = %e, "catch-up failed");
    }
    info!(db = %config.db_name, "replica synced");

    let mut ticker = tokio::time::interval(config.catchup_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = drain.notified() => {
                if let Err(e) = drain_queue(&queue, &transport, config.send_group).await {
                    error!(error = %e, "queue drain failed");
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = drain_queue(&queue, &transport, config.send_group).await {
                    error!(error = %e, "queue drain failed");
                }
                if let Err(e) = catch_up(&driver, &transport).await {
                    error!(error = %e, "catch-up failed");
                }
            }
        }
    }
}

/// Sends the pending backlog in small groups and applies the remote's
/// verdicts after each one.
async fn drain_queue<D, R>(
    queue: &MutationQueue<D>,
    transport: &ResilientTransport<R>,
    send_group: usize,
) -> EngineResult<()>
where
    D: StorageDriver,
    R: RemoteEndpoint,
{
    let pending = queue.pending()?;
    for group in pending.chunks(send_group.max(1)) {
        let outcome = transport.send(group.to_vec()).await;
        for confirmation in &outcome.succeeded {
            queue.confirm(confirmation.id, confirmation.server_timestamp_ms)?;
        }
        for id in &outcome.duplicated {
            queue.confirm_duplicate(*id)?;
        }
        for rejection in &outcome.failed {
            queue.reject(rejection.id, &rejection.reason)?;
        }
    }
    Ok(())
}

/// Polls the catch-up feed once and replays whatever arrived.
async fn catch_up<D, R>(driver: &D, transport: &ResilientTransport<R>) -> EngineResult<()>
where
    D: StorageDriver,
    R: RemoteEndpoint,
{
    let since = progress::last_server_timestamp(driver)?;
    let committed = transport.get(since).await;
    catchup::apply_committed(driver, &committed)
}
