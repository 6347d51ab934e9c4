use crate::commitlog::{Log, LogCursor, LogRecord, TxId};
use crate::model::{CommittedRequest, Database, EntityKind, ModelObject, Queue, Snapshot, Tx, TxOperation, User};
use crate::repository::options::RepositoryOptionsValidated;
use crate::repository::snapshots::{SnapshotFiles, StagedSnapshot};
use crate::store::{ModelError, VersionedStore};
use crate::time;
use std::collections::{HashMap, VecDeque};
use std::io;
use tokio::sync::{broadcast, watch};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Transaction log I/O error")]
    Io(#[from] io::Error),

    #[error("Malformed transaction")]
    Serialization(#[from] serde_json::Error),

    #[error("Replicated tx {actual} does not follow local log tail {expected}")]
    OutOfSequence { expected: TxId, actual: TxId },
}

/// Fatal errors while opening a repository. The node must not serve data after one of these.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Unable to read snapshot")]
    UnreadableSnapshot(#[source] io::Error),

    #[error("Snapshot {snapshot} is older than the oldest retained log record {first}")]
    SnapshotBehindLog { snapshot: TxId, first: TxId },

    #[error("Snapshot {snapshot} is newer than the end of the log {next}")]
    SnapshotAheadOfLog { snapshot: TxId, next: TxId },

    #[error("Transaction log I/O error during recovery")]
    Io(#[from] io::Error),
}

/// A committed change, published to subscribers after it has been applied.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepositoryEvent {
    pub tx_id: TxId,
    pub operation: TxOperation,
    pub object: ModelObject,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LocalStatus {
    pub first_tx_id: TxId,
    pub next_tx_id: TxId,
    pub last_snapshot_tx_id: TxId,
    pub users: usize,
    pub databases: usize,
    pub queues: usize,
    /// Nothing was ever committed on this node.
    pub empty: bool,
}

/// A snapshot taken from the live state, to be written off the actor's thread.
pub(crate) struct PendingSnapshot {
    generation: u64,
    snapshot: Snapshot,
    files: SnapshotFiles,
}

pub(crate) struct WrittenSnapshot {
    generation: u64,
    tx_id: TxId,
    result: Result<StagedSnapshot, io::Error>,
}

/// Identifies a pending snapshot, so its outcome can be reported even if writing it panics.
#[derive(Copy, Clone, Debug)]
pub(crate) struct SnapshotTicket {
    generation: u64,
    tx_id: TxId,
}

impl PendingSnapshot {
    pub fn ticket(&self) -> SnapshotTicket {
        SnapshotTicket {
            generation: self.generation,
            tx_id: self.snapshot.tx_id,
        }
    }

    pub fn write(self) -> WrittenSnapshot {
        WrittenSnapshot {
            generation: self.generation,
            tx_id: self.snapshot.tx_id,
            result: self.files.stage(&self.snapshot, self.generation),
        }
    }
}

impl SnapshotTicket {
    pub fn failed(self, error: io::Error) -> WrittenSnapshot {
        WrittenSnapshot {
            generation: self.generation,
            tx_id: self.tx_id,
            result: Err(error),
        }
    }
}

/// LocalRepository applies transactions to this node's stores and makes them durable in the
/// transaction log and snapshot files. It is single threaded; the repository actor owns it.
pub(crate) struct LocalRepository<L: Log> {
    logger: slog::Logger,
    log: L,
    snapshots: SnapshotFiles,
    options: RepositoryOptionsValidated,

    users: VersionedStore<User>,
    databases: VersionedStore<Database>,
    queues: VersionedStore<Queue>,
    ledger: RequestLedger,

    last_snapshot_tx_id: TxId,
    snapshot_in_progress: bool,
    // Bumped whenever local history is replaced, so a snapshot written for the old history
    // can be recognized and discarded.
    snapshot_generation: u64,

    events: broadcast::Sender<RepositoryEvent>,
    applied: watch::Sender<TxId>,
    applied_rx: watch::Receiver<TxId>,
}

impl<L: Log> LocalRepository<L> {
    /// Load the latest snapshot and replay the log forward from it.
    pub fn recover(
        logger: slog::Logger,
        mut log: L,
        snapshots: SnapshotFiles,
        options: RepositoryOptionsValidated,
    ) -> Result<Self, StartupError> {
        let snapshot = snapshots
            .load_latest()
            .map_err(StartupError::UnreadableSnapshot)?
            .unwrap_or_else(|| Snapshot::empty(TxId::default()));

        if snapshot.tx_id < log.first_id() {
            return Err(StartupError::SnapshotBehindLog {
                snapshot: snapshot.tx_id,
                first: log.first_id(),
            });
        }
        if snapshot.tx_id > log.next_id() {
            if log.next_id() != TxId::default() {
                return Err(StartupError::SnapshotAheadOfLog {
                    snapshot: snapshot.tx_id,
                    next: log.next_id(),
                });
            }
            // Snapshot restored without its log. Trust it and start the log where it ends.
            slog::warn!(logger, "Log is empty, restarting it at snapshot {}", snapshot.tx_id);
            log.reset(snapshot.tx_id)?;
        }

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (applied, applied_rx) = watch::channel(snapshot.tx_id);
        let ledger = RequestLedger::restore(options.request_ledger_capacity, snapshot.requests);
        let mut repository = LocalRepository {
            logger,
            log,
            snapshots,
            options,
            users: VersionedStore::from_objects(snapshot.users),
            databases: VersionedStore::from_objects(snapshot.databases),
            queues: VersionedStore::from_objects(snapshot.queues),
            ledger,
            last_snapshot_tx_id: snapshot.tx_id,
            snapshot_in_progress: false,
            snapshot_generation: 0,
            events,
            applied,
            applied_rx,
        };

        repository.replay(snapshot.tx_id)?;
        Ok(repository)
    }

    fn replay(&mut self, from: TxId) -> Result<(), StartupError> {
        let mut cursor = self.log.cursor(from)?;
        let mut replayed = 0u64;
        let mut skipped = 0u64;

        while let Some(record) = cursor.next()? {
            replayed += 1;
            let result = Tx::from_json(&record.payload)
                .map_err(ExecError::from)
                .and_then(|tx| self.apply(record.id, tx, false).map_err(ExecError::from));
            if let Err(e) = result {
                skipped += 1;
                slog::warn!(self.logger, "Skipping tx {} during replay: {}", record.id, e);
            }
        }

        self.mark_applied();
        slog::info!(
            self.logger,
            "Recovered repository from snapshot {} ({} txs replayed, {} skipped, next tx {})",
            from,
            replayed,
            skipped,
            self.log.next_id()
        );

        Ok(())
    }

    /// Append the transaction to the log and apply it. The record stays in the log even if
    /// the transaction fails validation.
    pub fn exec(&mut self, tx: Tx) -> Result<TxId, ExecError> {
        if let Some(tx_id) = tx.request_id.as_deref().and_then(|r| self.ledger.get(r)) {
            slog::debug!(self.logger, "Request {:?} already committed as tx {}", tx.request_id, tx_id);
            return Ok(tx_id);
        }

        let payload = tx.to_json()?;
        let tx_id = self.log.append(time::epoch_millis(), &payload)?;
        if self.options.sync_writes {
            self.log.sync()?;
        }

        let result = self.apply(tx_id, tx, true);
        self.mark_applied();
        result?;

        Ok(tx_id)
    }

    /// Append a record received from the master. It must land exactly at the local tail so
    /// both logs keep assigning the same ids.
    pub fn apply_replicated(&mut self, record: LogRecord) -> Result<TxId, ExecError> {
        let expected = self.log.next_id();
        if record.id != expected {
            return Err(ExecError::OutOfSequence {
                expected,
                actual: record.id,
            });
        }

        let tx_id = self.log.append(record.timestamp, &record.payload)?;
        if self.options.sync_writes {
            self.log.sync()?;
        }

        let result = Tx::from_json(&record.payload)
            .map_err(ExecError::from)
            .and_then(|tx| self.apply(tx_id, tx, true).map_err(ExecError::from));
        self.mark_applied();
        result?;

        Ok(tx_id)
    }

    fn apply(&mut self, tx_id: TxId, tx: Tx, notify: bool) -> Result<(), ModelError> {
        let Tx {
            operation,
            object,
            request_id,
        } = tx;

        let object = match operation {
            TxOperation::Create => self.create(object)?,
            TxOperation::Update => self.update(object)?,
            TxOperation::Delete => self.delete(object)?,
        };

        if let Some(request_id) = request_id {
            self.ledger.record(request_id, tx_id);
        }
        if notify {
            let _ = self.events.send(RepositoryEvent {
                tx_id,
                operation,
                object,
            });
        }

        Ok(())
    }

    fn create(&mut self, object: ModelObject) -> Result<ModelObject, ModelError> {
        match object {
            ModelObject::User(o) => self.users.create(o).map(ModelObject::from),
            ModelObject::Database(o) => self.databases.create(o).map(ModelObject::from),
            ModelObject::Queue(o) => self.queues.create(o).map(ModelObject::from),
        }
    }

    fn update(&mut self, object: ModelObject) -> Result<ModelObject, ModelError> {
        match object {
            ModelObject::User(o) => self.users.update(o).map(ModelObject::from),
            ModelObject::Database(o) => self.databases.update(o).map(ModelObject::from),
            ModelObject::Queue(o) => self.queues.update(o).map(ModelObject::from),
        }
    }

    fn delete(&mut self, object: ModelObject) -> Result<ModelObject, ModelError> {
        match object {
            ModelObject::User(o) => self.users.delete(&o.id).map(ModelObject::from),
            ModelObject::Database(o) => self.databases.delete(&o.id).map(ModelObject::from),
            ModelObject::Queue(o) => self.queues.delete(&o.id).map(ModelObject::from),
        }
    }

    fn mark_applied(&mut self) {
        let next_id = self.log.next_id();
        let _ = self.applied.send(next_id);
    }

    pub fn find(&self, kind: EntityKind, id: &str) -> Option<ModelObject> {
        match kind {
            EntityKind::User => self.users.find(id).map(ModelObject::from),
            EntityKind::Database => self.databases.find(id).map(ModelObject::from),
            EntityKind::Queue => self.queues.find(id).map(ModelObject::from),
        }
    }

    pub fn list(&self, kind: EntityKind, offset: usize, limit: Option<usize>) -> Vec<ModelObject> {
        match kind {
            EntityKind::User => to_objects(self.users.list(offset, limit)),
            EntityKind::Database => to_objects(self.databases.list(offset, limit)),
            EntityKind::Queue => to_objects(self.queues.list(offset, limit)),
        }
    }

    pub fn open_cursor(&self, from: TxId) -> Result<Box<dyn LogCursor>, io::Error> {
        self.log.cursor(from)
    }

    pub fn next_tx_id(&self) -> TxId {
        self.log.next_id()
    }

    /// True if this node has never committed anything.
    pub fn is_empty(&self) -> bool {
        self.log.next_id() == TxId::default()
            && self.users.is_empty()
            && self.databases.is_empty()
            && self.queues.is_empty()
    }

    pub fn status(&self) -> LocalStatus {
        LocalStatus {
            first_tx_id: self.log.first_id(),
            next_tx_id: self.log.next_id(),
            last_snapshot_tx_id: self.last_snapshot_tx_id,
            users: self.users.len(),
            databases: self.databases.len(),
            queues: self.queues.len(),
            empty: self.is_empty(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<RepositoryEvent> {
        self.events.clone()
    }

    /// Watermark of applied transactions: every tx with a lower id has been applied.
    pub fn applied_watermark(&self) -> watch::Receiver<TxId> {
        self.applied_rx.clone()
    }

    /// The full in-memory state at the current log tail.
    pub fn current_snapshot(&self) -> Snapshot {
        Snapshot {
            tx_id: self.log.next_id(),
            users: self.users.list(0, None),
            databases: self.databases.list(0, None),
            queues: self.queues.list(0, None),
            requests: self.ledger.entries(),
        }
    }

    fn has_changes_since_snapshot(&self) -> bool {
        self.log.next_id() > self.last_snapshot_tx_id
    }

    /// Snapshot synchronously. A NOP if a snapshot is already being written or nothing was
    /// applied since the last one.
    pub fn checkpoint(&mut self) -> Result<Option<TxId>, io::Error> {
        if self.snapshot_in_progress || !self.has_changes_since_snapshot() {
            return Ok(None);
        }

        let tx_id = self.snapshots.write(&self.current_snapshot())?;
        self.last_snapshot_tx_id = tx_id;
        slog::info!(self.logger, "Wrote snapshot {}", tx_id);

        Ok(Some(tx_id))
    }

    /// Called after every write. Checkpoints inline once the log has grown by more than half
    /// its maximum size since the last snapshot, because past that point the log may drop
    /// records the latest snapshot does not cover. Returns true if an asynchronous snapshot
    /// should be scheduled instead.
    pub fn maintain_snapshots(&mut self) -> bool {
        if !self.has_changes_since_snapshot() {
            return false;
        }

        let since_snapshot = self.log.next_id().distance_from(self.last_snapshot_tx_id);
        if since_snapshot > self.log.max_size() / 2 {
            if let Err(e) = self.checkpoint() {
                slog::error!(self.logger, "Inline snapshot failed: {}", e);
            }
            return false;
        }

        !self.snapshot_in_progress
    }

    pub fn begin_snapshot(&mut self) -> Option<PendingSnapshot> {
        if self.snapshot_in_progress || !self.has_changes_since_snapshot() {
            return None;
        }

        self.snapshot_in_progress = true;
        Some(PendingSnapshot {
            generation: self.snapshot_generation,
            snapshot: self.current_snapshot(),
            files: self.snapshots.clone(),
        })
    }

    /// Makes a snapshot written off the actor visible, unless local history was replaced
    /// while it was being written. Only a current snapshot ever renames over or prunes files.
    pub fn finish_snapshot(&mut self, written: WrittenSnapshot) {
        if written.generation != self.snapshot_generation {
            slog::info!(self.logger, "Discarding stale snapshot {}", written.tx_id);
            if let Ok(staged) = written.result {
                if let Err(e) = self.snapshots.discard(staged) {
                    slog::error!(self.logger, "Unable to remove stale snapshot {}: {}", written.tx_id, e);
                }
            }
            return;
        }

        self.snapshot_in_progress = false;
        match written.result.and_then(|staged| self.snapshots.commit(staged)) {
            Ok(tx_id) => {
                self.last_snapshot_tx_id = std::cmp::max(self.last_snapshot_tx_id, tx_id);
                slog::info!(self.logger, "Wrote snapshot {}", tx_id);
            }
            Err(e) => slog::error!(self.logger, "Snapshot {} failed: {}", written.tx_id, e),
        }
    }

    /// Replace all local state with the snapshot and restart the log at its tx id.
    pub fn install_snapshot(&mut self, snapshot: Snapshot) -> Result<(), ExecError> {
        // An empty log next to the new snapshot file is the state recovery knows how to
        // resume from, so get there before replacing the snapshot files.
        self.log.reset(TxId::default())?;
        self.snapshots.replace_all(&snapshot)?;
        self.log.reset(snapshot.tx_id)?;

        self.users = VersionedStore::from_objects(snapshot.users);
        self.databases = VersionedStore::from_objects(snapshot.databases);
        self.queues = VersionedStore::from_objects(snapshot.queues);
        self.ledger = RequestLedger::restore(self.options.request_ledger_capacity, snapshot.requests);

        self.last_snapshot_tx_id = snapshot.tx_id;
        self.snapshot_in_progress = false;
        self.snapshot_generation += 1;
        self.mark_applied();

        slog::info!(self.logger, "Installed snapshot {}", snapshot.tx_id);
        Ok(())
    }
}

fn to_objects<T: Into<ModelObject>>(objects: Vec<T>) -> Vec<ModelObject> {
    objects.into_iter().map(Into::into).collect()
}

/// Bounded memory of request ids that were committed, oldest evicted first.
struct RequestLedger {
    capacity: usize,
    tx_ids: HashMap<String, TxId>,
    order: VecDeque<String>,
}

impl RequestLedger {
    fn new(capacity: usize) -> Self {
        RequestLedger {
            capacity,
            tx_ids: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn restore(capacity: usize, requests: Vec<CommittedRequest>) -> Self {
        let mut ledger = RequestLedger::new(capacity);
        for request in requests {
            ledger.record(request.request_id, request.tx_id);
        }
        ledger
    }

    fn entries(&self) -> Vec<CommittedRequest> {
        self.order
            .iter()
            .filter_map(|request_id| {
                self.tx_ids.get(request_id).map(|tx_id| CommittedRequest {
                    request_id: request_id.clone(),
                    tx_id: *tx_id,
                })
            })
            .collect()
    }

    fn get(&self, request_id: &str) -> Option<TxId> {
        self.tx_ids.get(request_id).copied()
    }

    fn record(&mut self, request_id: String, tx_id: TxId) {
        if self.capacity == 0 || self.tx_ids.contains_key(&request_id) {
            return;
        }

        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.tx_ids.remove(&oldest);
            }
        }
        self.order.push_back(request_id.clone());
        self.tx_ids.insert(request_id, tx_id);
    }
}
