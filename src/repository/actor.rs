use crate::commitlog::{Log, LogCursor, LogRecord, TxId};
use crate::model::{EntityKind, ModelObject, Snapshot, Tx};
use crate::repository::local::{ExecError, LocalRepository, LocalStatus, RepositoryEvent, WrittenSnapshot};
use crate::repository::snapshot_timer::SnapshotTimerHandle;
use crate::repository::tx_monitor::{TxMonitor, TxTail};
use crate::time::{Clock, RealClock};
use std::error::Error;
use std::fmt;
use std::io;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Duration;

pub(crate) fn create<L: Log>(
    logger: slog::Logger,
    buffer_size: usize,
    repository: LocalRepository<L>,
    snapshot_interval: Duration,
) -> (RepositoryClient, RepositoryActor<L>) {
    create_with_clock(logger, buffer_size, repository, snapshot_interval, RealClock)
}

pub(crate) fn create_with_clock<L: Log, C: Clock>(
    logger: slog::Logger,
    buffer_size: usize,
    repository: LocalRepository<L>,
    snapshot_interval: Duration,
    clock: C,
) -> (RepositoryClient, RepositoryActor<L, C>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let client = RepositoryClient {
        sender: tx,
        events: repository.event_sender(),
        monitor: TxMonitor::new(repository.applied_watermark()),
    };
    let actor = RepositoryActor {
        logger,
        receiver: rx,
        self_client: client.weak(),
        repository,
        clock,
        snapshot_interval,
        snapshot_timer: None,
    };

    (client, actor)
}

// Disk interaction is synchronous on the actor, except writing asynchronous snapshots, which
// happens on the blocking pool and comes back as an event.
pub(crate) enum Event {
    Exec(Tx, Callback<TxId, ExecError>),
    ApplyReplicated(LogRecord, Callback<TxId, ExecError>),
    InstallSnapshot(Snapshot, Callback<(), ExecError>),
    Find(EntityKind, String, Reply<Option<ModelObject>>),
    List(EntityKind, usize, Option<usize>, Reply<Vec<ModelObject>>),
    OpenCursor(TxId, Callback<Box<dyn LogCursor>, io::Error>),
    Checkpoint(Callback<Option<TxId>, io::Error>),
    CurrentSnapshot(Reply<Snapshot>),
    Status(Reply<LocalStatus>),
    ScheduledSnapshot,
    SnapshotWritten(WrittenSnapshot),
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Exec(..) => "Exec",
            Event::ApplyReplicated(..) => "ApplyReplicated",
            Event::InstallSnapshot(..) => "InstallSnapshot",
            Event::Find(..) => "Find",
            Event::List(..) => "List",
            Event::OpenCursor(..) => "OpenCursor",
            Event::Checkpoint(..) => "Checkpoint",
            Event::CurrentSnapshot(..) => "CurrentSnapshot",
            Event::Status(..) => "Status",
            Event::ScheduledSnapshot => "ScheduledSnapshot",
            Event::SnapshotWritten(..) => "SnapshotWritten",
        };
        write!(f, "{}", name)
    }
}

pub(crate) struct Callback<O, E: Error>(oneshot::Sender<Result<O, E>>);

impl<O, E: Error> Callback<O, E> {
    pub fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}

pub(crate) struct Reply<T>(oneshot::Sender<T>);

impl<T> Reply<T> {
    pub fn send(self, message: T) {
        let _ = self.0.send(message);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Repository actor has exited")]
pub(crate) struct ActorExited;

/// RepositoryClient is the handle to a local repository. The actor runs as long as any
/// client is alive.
#[derive(Clone)]
pub(crate) struct RepositoryClient {
    sender: mpsc::Sender<Event>,
    events: broadcast::Sender<RepositoryEvent>,
    monitor: TxMonitor,
}

impl RepositoryClient {
    pub async fn exec(&self, tx: Tx) -> Result<TxId, ExecError> {
        let (tx_cb, rx) = oneshot::channel();
        self.send(Event::Exec(tx, Callback(tx_cb))).await;
        Self::await_reply(rx).await
    }

    pub async fn apply_replicated(&self, record: LogRecord) -> Result<TxId, ExecError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::ApplyReplicated(record, Callback(tx))).await;
        Self::await_reply(rx).await
    }

    pub async fn install_snapshot(&self, snapshot: Snapshot) -> Result<(), ExecError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::InstallSnapshot(snapshot, Callback(tx))).await;
        Self::await_reply(rx).await
    }

    pub async fn find(&self, kind: EntityKind, id: impl Into<String>) -> Option<ModelObject> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Find(kind, id.into(), Reply(tx))).await;
        Self::await_reply(rx).await
    }

    pub async fn list(&self, kind: EntityKind, offset: usize, limit: Option<usize>) -> Vec<ModelObject> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::List(kind, offset, limit, Reply(tx))).await;
        Self::await_reply(rx).await
    }

    pub async fn open_cursor(&self, from: TxId) -> Result<Box<dyn LogCursor>, io::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::OpenCursor(from, Callback(tx))).await;
        Self::await_reply(rx).await
    }

    /// Follow the log from `from` as transactions are applied.
    pub async fn tail(&self, from: TxId) -> Result<TxTail, io::Error> {
        let cursor = self.open_cursor(from).await?;
        Ok(TxTail::new(cursor, self.monitor.watermark()))
    }

    pub async fn checkpoint(&self) -> Result<Option<TxId>, io::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Checkpoint(Callback(tx))).await;
        Self::await_reply(rx).await
    }

    pub async fn current_snapshot(&self) -> Snapshot {
        let (tx, rx) = oneshot::channel();
        self.send(Event::CurrentSnapshot(Reply(tx))).await;
        Self::await_reply(rx).await
    }

    pub async fn status(&self) -> LocalStatus {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Status(Reply(tx))).await;
        Self::await_reply(rx).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.events.subscribe()
    }

    pub fn monitor(&self) -> &TxMonitor {
        &self.monitor
    }

    pub fn weak(&self) -> WeakRepositoryClient {
        WeakRepositoryClient {
            sender: self.sender.downgrade(),
        }
    }

    async fn send(&self, event: Event) {
        self.sender
            .send(event)
            .await
            .expect("Repository actor is dead while a client is alive");
    }

    async fn await_reply<T>(rx: oneshot::Receiver<T>) -> T {
        rx.await.expect("Repository actor dropped our callback")
    }
}

/// WeakRepositoryClient does not keep the actor alive. Used by tasks the actor spawns for itself.
#[derive(Clone)]
pub(crate) struct WeakRepositoryClient {
    sender: mpsc::WeakSender<Event>,
}

impl WeakRepositoryClient {
    #[cfg(test)]
    pub(crate) fn from_sender(sender: &mpsc::Sender<Event>) -> Self {
        WeakRepositoryClient {
            sender: sender.downgrade(),
        }
    }

    pub async fn scheduled_snapshot(&self) -> Result<(), ActorExited> {
        self.send(Event::ScheduledSnapshot).await
    }

    pub async fn snapshot_written(&self, written: WrittenSnapshot) -> Result<(), ActorExited> {
        self.send(Event::SnapshotWritten(written)).await
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        let sender = self.sender.upgrade().ok_or(ActorExited)?;
        sender.send(event).await.map_err(|_| ActorExited)
    }
}

/// RepositoryActor serializes every access to a LocalRepository.
pub(crate) struct RepositoryActor<L: Log, C: Clock = RealClock> {
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    self_client: WeakRepositoryClient,
    repository: LocalRepository<L>,
    clock: C,
    snapshot_interval: Duration,
    snapshot_timer: Option<SnapshotTimerHandle>,
}

impl<L: Log, C: Clock> RepositoryActor<L, C> {
    pub async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
        }
        slog::info!(self.logger, "Repository actor exiting");
    }

    // This must NOT be async. Long running work is spawned and reports back as an event.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Exec(tx, callback) => {
                let result = self.repository.exec(tx);
                self.after_write();
                callback.send(result);
            }
            Event::ApplyReplicated(record, callback) => {
                let result = self.repository.apply_replicated(record);
                self.after_write();
                callback.send(result);
            }
            Event::InstallSnapshot(snapshot, callback) => {
                self.snapshot_timer = None;
                callback.send(self.repository.install_snapshot(snapshot));
            }
            Event::Find(kind, id, reply) => reply.send(self.repository.find(kind, &id)),
            Event::List(kind, offset, limit, reply) => reply.send(self.repository.list(kind, offset, limit)),
            Event::OpenCursor(from, callback) => callback.send(self.repository.open_cursor(from)),
            Event::Checkpoint(callback) => callback.send(self.repository.checkpoint()),
            Event::CurrentSnapshot(reply) => reply.send(self.repository.current_snapshot()),
            Event::Status(reply) => reply.send(self.repository.status()),
            Event::ScheduledSnapshot => {
                self.snapshot_timer = None;
                self.start_snapshot();
            }
            Event::SnapshotWritten(written) => self.repository.finish_snapshot(written),
        }
    }

    fn after_write(&mut self) {
        if self.repository.maintain_snapshots() && self.snapshot_timer.is_none() {
            slog::debug!(self.logger, "Snapshot scheduled in {:?}", self.snapshot_interval);
            self.snapshot_timer = Some(SnapshotTimerHandle::spawn(
                self.snapshot_interval,
                self.self_client.clone(),
                self.clock.clone(),
            ));
        }
    }

    fn start_snapshot(&mut self) {
        let pending = match self.repository.begin_snapshot() {
            Some(pending) => pending,
            None => return,
        };

        let ticket = pending.ticket();
        let client = self.self_client.clone();
        tokio::spawn(async move {
            let written = match tokio::task::spawn_blocking(move || pending.write()).await {
                Ok(written) => written,
                Err(e) => ticket.failed(io::Error::new(io::ErrorKind::Other, e.to_string())),
            };
            let _ = client.snapshot_written(written).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::InMemoryLog;
    use crate::model::User;
    use crate::repository::local::tests::test_logger;
    use crate::repository::options::{RepositoryOptions, RepositoryOptionsValidated};
    use crate::repository::snapshots::SnapshotFiles;
    use crate::store::ModelError;
    use crate::time;
    use std::convert::TryFrom;
    use std::path::Path;

    fn spawn_repository<C: Clock>(dir: &Path, clock: C) -> RepositoryClient {
        let options = RepositoryOptionsValidated::try_from(RepositoryOptions {
            sync_writes: Some(false),
            ..RepositoryOptions::default()
        })
        .unwrap();
        let snapshots = SnapshotFiles::open(dir, 3).unwrap();
        let repository =
            LocalRepository::recover(test_logger(), InMemoryLog::new(1 << 20), snapshots, options).unwrap();
        let (client, actor) =
            create_with_clock(test_logger(), 16, repository, Duration::from_secs(60), clock);
        tokio::spawn(actor.run_event_loop());

        client
    }

    fn user(id: &str, version: u64) -> User {
        User {
            id: id.into(),
            version,
            ..User::default()
        }
    }

    #[tokio::test]
    async fn exec_and_query_through_actor() {
        let dir = tempfile::tempdir().unwrap();
        let client = spawn_repository(dir.path(), RealClock);

        let tx_id = client.exec(Tx::create(user("alice", 0))).await.unwrap();
        client.monitor().wait_for(tx_id, Duration::from_secs(1)).await.unwrap();

        assert_eq!(client.find(EntityKind::User, "alice").await.unwrap().version(), 0);
        assert_eq!(client.list(EntityKind::User, 0, None).await.len(), 1);
        assert!(matches!(
            client.exec(Tx::create(user("alice", 0))).await,
            Err(ExecError::Model(ModelError::DuplicateId { .. }))
        ));

        let status = client.status().await;
        assert_eq!(status.users, 1);
        assert!(!status.empty);
    }

    #[tokio::test]
    async fn write_schedules_snapshot_after_interval() {
        let dir = tempfile::tempdir().unwrap();
        let (clock, mut handle) = time::manual_clock();
        let client = spawn_repository(dir.path(), clock);
        let files = SnapshotFiles::open(dir.path(), 3).unwrap();

        client.exec(Tx::create(user("alice", 0))).await.unwrap();
        client.exec(Tx::create(user("bob", 0))).await.unwrap();

        for _ in 0..59 {
            handle.advance(Duration::from_secs(1));
            tokio::task::yield_now().await;
        }
        assert!(files.list().unwrap().is_empty());

        handle.advance(Duration::from_secs(1));
        let next_tx_id = client.status().await.next_tx_id;
        let mut written = false;
        for _ in 0..100 {
            if files.list().unwrap() == vec![next_tx_id] {
                written = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(written, "snapshot was not written");

        for _ in 0..100 {
            if client.status().await.last_snapshot_tx_id == next_tx_id {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Actor never recorded the snapshot");
    }

    #[tokio::test]
    async fn checkpoint_and_install() {
        let dir = tempfile::tempdir().unwrap();
        let client = spawn_repository(dir.path(), RealClock);
        assert!(client.status().await.empty);
        assert_eq!(client.checkpoint().await.unwrap(), None);

        client.exec(Tx::create(user("alice", 0))).await.unwrap();
        let snapshot_id = client.checkpoint().await.unwrap().unwrap();
        assert_eq!(client.current_snapshot().await.tx_id, snapshot_id);

        let mut snapshot = Snapshot::empty(TxId::new(1000));
        snapshot.users.push(user("carol", 2));
        client.install_snapshot(snapshot.clone()).await.unwrap();

        assert_eq!(client.current_snapshot().await, snapshot);
        assert_eq!(client.monitor().applied_up_to(), TxId::new(1000));
        assert!(client.find(EntityKind::User, "alice").await.is_none());
    }

    #[tokio::test]
    async fn subscribers_see_committed_changes() {
        let dir = tempfile::tempdir().unwrap();
        let client = spawn_repository(dir.path(), RealClock);
        let mut events = client.subscribe();

        let tx_id = client.exec(Tx::create(user("alice", 0))).await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.tx_id, tx_id);
        assert_eq!(event.object.id(), "alice");
    }

    #[tokio::test]
    async fn tail_reads_new_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let client = spawn_repository(dir.path(), RealClock);
        let mut tail = client.tail(TxId::default()).await.unwrap();

        let tx_id = client.exec(Tx::create(user("alice", 0))).await.unwrap();
        match tail.next(Duration::from_secs(5)).await.unwrap() {
            crate::repository::tx_monitor::TailItem::Record(record) => {
                assert_eq!(record.id, tx_id);
                assert_eq!(Tx::from_json(&record.payload).unwrap(), Tx::create(user("alice", 0)));
            }
            other => panic!("Unexpected {:?}", other),
        }
    }
}
