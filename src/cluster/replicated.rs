use crate::cluster::master_strategy::{MasterStrategy, PAXOS_TOPIC};
use crate::cluster::status::{ContactTracker, SlaveTracker};
use crate::cluster::{ClusterOptionsValidated, Role, RoleChangeListener, RoleSnapshot, ServerStatus, SlaveRecord};
use crate::commitlog::TxId;
use crate::model::{EntityKind, ModelObject, Snapshot, Tx};
use crate::repository::{
    ExecError, LocalStatus, RepositoryClient, RepositoryEvent, TailItem, TxTail, WaitError,
};
use crate::store::ModelError;
use crate::time;
use crate::transport::{ClientError, ClusterService, ForwardError, PeerClients, PingInfo, StreamFrame};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, Instant};

const STREAM_BUFFER: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Nothing can be written right now, try again later.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    /// The node we sent the write to is no longer master. A new election has started.
    #[error("Not master")]
    NotMaster,

    #[error("Local repository failure")]
    Io(#[source] ExecError),

    /// The master committed the transaction but it was not applied here in time.
    #[error("Tx {0} was committed but is not visible locally yet")]
    Timeout(TxId),
}

impl From<ExecError> for RepositoryError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Model(model_error) => RepositoryError::Model(model_error),
            e => RepositoryError::Io(e),
        }
    }
}

#[derive(Debug)]
pub(crate) enum ControlEvent {
    /// Start a new election. Ignored if `epoch` is set and an election has happened since.
    ChooseMaster { epoch: Option<u64>, reason: String },
    /// The slave finished bootstrapping from its master.
    SlaveUp { epoch: u64 },
}

/// State shared by the public repository handle, the RPC server and the cluster controller.
pub(crate) struct ClusterShared {
    pub logger: slog::Logger,
    pub self_id: String,
    pub repository_id: String,
    pub options: ClusterOptionsValidated,
    pub local: RepositoryClient,
    pub peers: Arc<PeerClients>,
    pub strategy: MasterStrategy,
    pub role: RoleChangeListener,
    pub epoch: Arc<AtomicU64>,
    pub control_tx: mpsc::UnboundedSender<ControlEvent>,
    pub slaves: Arc<SlaveTracker>,
    pub master_contact: Arc<ContactTracker>,
}

impl ClusterShared {
    pub fn choose_master(&self, epoch: Option<u64>, reason: impl Into<String>) {
        let _ = self.control_tx.send(ControlEvent::ChooseMaster {
            epoch,
            reason: reason.into(),
        });
    }

    fn is_master(&self) -> bool {
        matches!(self.role.current(), RoleSnapshot::Master { .. })
    }

    async fn forward(&self, epoch: u64, master_id: &str, tx: Tx) -> Result<TxId, RepositoryError> {
        let client = self
            .peers
            .get(master_id)
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;
        let tx = match tx.request_id {
            Some(_) => tx,
            None => tx.with_request_id(new_request_id(&self.self_id)),
        };

        let deadline = Instant::now() + self.options.cluster_timeout;
        let mut failures = 0;
        let tx_id = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = match tokio::time::timeout(remaining, client.forward_transaction(&tx)).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(RepositoryError::Unavailable(format!(
                        "Master {} did not answer within {:?}",
                        master_id, self.options.cluster_timeout
                    )))
                }
            };

            match result {
                Ok(tx_id) => break tx_id,
                Err(ClientError::Conflict(e)) => return Err(RepositoryError::Model(e)),
                Err(ClientError::NotMaster) => {
                    self.choose_master(Some(epoch), format!("{} is no longer master", master_id));
                    return Err(RepositoryError::NotMaster);
                }
                Err(e) => {
                    failures += 1;
                    let delay = self.options.slave_write_backoff.delay(failures);
                    if Instant::now() + delay >= deadline {
                        return Err(RepositoryError::Unavailable(format!(
                            "Unable to forward transaction to master {}: {}",
                            master_id, e
                        )));
                    }
                    slog::warn!(
                        self.logger,
                        "Forwarding to master {} failed, retrying in {:?}: {}",
                        master_id,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.local.monitor().wait_for(tx_id, remaining).await {
            Ok(()) => Ok(tx_id),
            Err(WaitError::Timeout(tx_id)) => Err(RepositoryError::Timeout(tx_id)),
            Err(WaitError::Closed) => Err(RepositoryError::Unavailable("Local repository has shut down".into())),
        }
    }
}

fn new_request_id(self_id: &str) -> String {
    let nonce: u64 = rand::thread_rng().gen();
    format!("{}-{}-{:016x}", self_id, time::epoch_millis(), nonce)
}

#[async_trait::async_trait]
impl ClusterService for ClusterShared {
    async fn forward_transaction(&self, from: &str, tx: Tx) -> Result<TxId, ForwardError> {
        if !self.is_master() {
            return Err(ForwardError::NotMaster);
        }

        match self.local.exec(tx).await {
            Ok(tx_id) => Ok(tx_id),
            Err(ExecError::Model(e)) => Err(ForwardError::Conflict(e)),
            Err(e) => {
                slog::error!(self.logger, "Unable to execute tx forwarded by {}: {}", from, e);
                Err(ForwardError::ServerFault(e.to_string()))
            }
        }
    }

    async fn open_tx_stream(&self, from: &str, tx_id: TxId, repository_id: &str) -> mpsc::Receiver<StreamFrame> {
        let (frames, rx) = mpsc::channel(STREAM_BUFFER);
        let epoch = self.epoch.load(Ordering::SeqCst);

        if !self.is_master() || repository_id != self.repository_id {
            let _ = frames.try_send(StreamFrame::NotMaster);
            return rx;
        }

        let tail = match self.local.tail(tx_id).await {
            Ok(tail) => tail,
            Err(e) => {
                slog::info!(self.logger, "Slave {} asked for tx {} which cannot be served: {}", from, tx_id, e);
                let _ = frames.try_send(StreamFrame::ResyncRequired(e.to_string()));
                return rx;
            }
        };

        slog::info!(self.logger, "Slave {} streaming from tx {}", from, tx_id);
        let since = self.slaves.connected(from, tx_id);
        let streamer = TxStreamer {
            logger: self.logger.clone(),
            slave_id: from.to_string(),
            since,
            tail,
            frames,
            heartbeat: self.options.stream_heartbeat,
            epoch: self.epoch.clone(),
            serving_epoch: epoch,
            slaves: self.slaves.clone(),
        };
        tokio::spawn(streamer.run());
        rx
    }

    async fn latest_snapshot(&self, from: &str) -> Result<Snapshot, String> {
        if !self.is_master() {
            return Err("Not master".to_string());
        }

        let snapshot = self.local.current_snapshot().await;
        slog::info!(self.logger, "Sending snapshot {} to {}", snapshot.tx_id, from);
        Ok(snapshot)
    }

    async fn deliver(&self, from: &str, topic: &str, payload: Vec<u8>) -> Result<Vec<u8>, String> {
        match topic {
            PAXOS_TOPIC => self.strategy.deliver(from, &payload).map(|_| Vec::new()),
            _ => Err(format!("Unknown topic '{}'", topic)),
        }
    }

    fn ping(&self) -> PingInfo {
        PingInfo {
            node_id: self.self_id.clone(),
            role: self.role.current().role().to_string(),
            next_tx_id: self.local.monitor().applied_up_to(),
        }
    }
}

/// Feeds one slave's stream from the local log until the slave goes away or this node stops
/// being master.
struct TxStreamer {
    logger: slog::Logger,
    slave_id: String,
    since: DateTime<Utc>,
    tail: TxTail,
    frames: mpsc::Sender<StreamFrame>,
    heartbeat: Duration,
    epoch: Arc<AtomicU64>,
    serving_epoch: u64,
    slaves: Arc<SlaveTracker>,
}

impl TxStreamer {
    async fn run(mut self) {
        let error = loop {
            if self.epoch.load(Ordering::SeqCst) != self.serving_epoch {
                let _ = self.frames.send(StreamFrame::NotMaster).await;
                break Some("Master stepped down".to_string());
            }

            let frame = match self.tail.next(self.heartbeat).await {
                Ok(TailItem::Record(record)) => StreamFrame::Tx(record),
                Ok(TailItem::Idle(next_tx_id)) => StreamFrame::Heartbeat(next_tx_id),
                Err(e) => {
                    slog::warn!(self.logger, "Stream to {} cannot continue: {}", self.slave_id, e);
                    let _ = self.frames.send(StreamFrame::ResyncRequired(e.to_string())).await;
                    break Some(e.to_string());
                }
            };

            if self.frames.send(frame).await.is_err() {
                break None;
            }
            self.slaves.contacted(&self.slave_id, self.since, self.tail.position());
        };

        slog::info!(self.logger, "Slave {} disconnected", self.slave_id);
        self.slaves.disconnected(&self.slave_id, self.since, error);
    }
}

/// ReplicatedRepository is the cluster-wide repository. Writes go to the master, directly
/// or forwarded by a slave; reads are served from the local copy.
#[derive(Clone)]
pub struct ReplicatedRepository {
    shared: Arc<ClusterShared>,
}

impl ReplicatedRepository {
    pub(crate) fn new(shared: Arc<ClusterShared>) -> Self {
        ReplicatedRepository { shared }
    }

    /// Execute a transaction on the master. On a slave this returns once the transaction is
    /// visible locally, so a caller always reads its own writes.
    pub async fn exec(&self, tx: Tx) -> Result<TxId, RepositoryError> {
        let shared = &self.shared;
        let epoch = shared.epoch.load(Ordering::SeqCst);
        match shared.role.current() {
            RoleSnapshot::Master { .. } => Ok(shared.local.exec(tx).await?),
            RoleSnapshot::Slave { master_id, up: true } => shared.forward(epoch, &master_id, tx).await,
            RoleSnapshot::Slave { master_id, up: false } => Err(RepositoryError::Unavailable(format!(
                "Still synchronising with master {}",
                master_id
            ))),
            RoleSnapshot::Electing | RoleSnapshot::NotConnected => {
                Err(RepositoryError::Unavailable("No master elected".to_string()))
            }
        }
    }

    pub async fn find(&self, kind: EntityKind, id: &str) -> Option<ModelObject> {
        self.shared.local.find(kind, id).await
    }

    pub async fn list(&self, kind: EntityKind, offset: usize, limit: Option<usize>) -> Vec<ModelObject> {
        self.shared.local.list(kind, offset, limit).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.shared.local.subscribe()
    }

    pub fn role_listener(&self) -> RoleChangeListener {
        self.shared.role.clone()
    }

    pub fn role(&self) -> RoleSnapshot {
        self.shared.role.current()
    }

    /// The master this node currently follows, or itself when master.
    pub fn master_id(&self) -> Option<String> {
        let role = self.shared.role.current();
        role.master_id(&self.shared.self_id).map(String::from)
    }

    pub fn node_id(&self) -> &str {
        &self.shared.self_id
    }

    pub async fn local_status(&self) -> LocalStatus {
        self.shared.local.status().await
    }

    /// This node, followed by its slaves when master or its master when slave.
    pub fn status(&self) -> Vec<ServerStatus> {
        let shared = &self.shared;
        let now = Utc::now();
        let role = shared.role.current();

        let mut statuses = vec![ServerStatus {
            id: shared.self_id.clone(),
            role: role.role(),
            ms_since_last_contact: None,
            connected: true,
            error_message: None,
        }];
        match role {
            RoleSnapshot::Master { .. } => {
                statuses.extend(shared.slaves.list().iter().map(|slave| slave.to_status(now)));
            }
            RoleSnapshot::Slave { master_id, .. } => {
                let contact = shared.master_contact.get();
                statuses.push(ServerStatus {
                    id: master_id,
                    role: Role::Master,
                    ms_since_last_contact: contact.last_contact.map(|t| (now - t).num_milliseconds()),
                    connected: contact.connected,
                    error_message: contact.error_message,
                });
            }
            RoleSnapshot::Electing | RoleSnapshot::NotConnected => {}
        }
        statuses
    }

    /// Slaves known to this node while it is master.
    pub fn slaves(&self) -> Vec<SlaveRecord> {
        if self.shared.is_master() {
            self.shared.slaves.list()
        } else {
            Vec::new()
        }
    }

    /// Abandon the current master and elect again.
    pub fn choose_master(&self) {
        self.shared.choose_master(None, "Requested");
    }
}
