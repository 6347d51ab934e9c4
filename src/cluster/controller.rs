use crate::cluster::downloaders::{DownloadEnd, SnapshotDownloader, TxDownloader};
use crate::cluster::master_strategy::{MasterFound, MasterStrategy, PaxosElectionConfig};
use crate::cluster::membership::ClusterMembership;
use crate::cluster::replicated::{ClusterShared, ControlEvent, ReplicatedRepository};
use crate::cluster::status::{self, ContactTracker, RoleNotifier, SlaveTracker};
use crate::cluster::{ClusterOptionsValidated, MasterStrategyKind, RoleSnapshot};
use crate::paxos::PaxosError;
use crate::repository::RepositoryClient;
use crate::transport::PeerClients;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

#[derive(Debug, thiserror::Error)]
pub enum ClusterSetupError {
    #[error("Fixed master strategy requires a fixed master")]
    MissingFixedMaster,

    #[error(transparent)]
    Election(#[from] PaxosError),
}

pub(crate) struct ClusterConfig {
    pub logger: slog::Logger,
    pub self_id: String,
    pub repository_id: String,
    /// Every configured node id, this node included.
    pub members: Vec<String>,
    pub options: ClusterOptionsValidated,
    pub local: RepositoryClient,
    pub peers: Arc<PeerClients>,
}

/// Wire up a node's cluster layer. The controller does nothing until its event loop is spawned,
/// and `shared` is what the RPC server serves.
pub(crate) fn create(
    config: ClusterConfig,
    shutdown: CancellationToken,
) -> Result<(ReplicatedRepository, Arc<ClusterShared>, ClusterController), ClusterSetupError> {
    let (found_tx, found_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (notifier, role) = status::role_channel();

    let strategy = match config.options.master_strategy {
        MasterStrategyKind::Fixed => {
            let master_id = config
                .options
                .fixed_master
                .clone()
                .ok_or(ClusterSetupError::MissingFixedMaster)?;
            MasterStrategy::fixed(master_id, found_tx)
        }
        MasterStrategyKind::Paxos => {
            let monitor = config.local.monitor().clone();
            let election = PaxosElectionConfig {
                logger: config.logger.clone(),
                self_id: config.self_id.clone(),
                preferred_master: config.options.fixed_master.clone(),
                election_timeout: config.options.election_timeout,
                election_jitter: config.options.election_jitter,
                peers: config.peers.clone(),
                round_hint: Box::new(move || monitor.applied_up_to().as_u64()),
            };
            MasterStrategy::paxos(election, found_tx)?
        }
    };

    let membership = ClusterMembership::new(
        config.logger.clone(),
        config.options.server_registry,
        &config.self_id,
        config.members,
        config.peers.clone(),
    );

    let shared = Arc::new(ClusterShared {
        logger: config.logger.clone(),
        self_id: config.self_id,
        repository_id: config.repository_id,
        options: config.options,
        local: config.local,
        peers: config.peers,
        strategy,
        role,
        epoch: Arc::new(AtomicU64::new(0)),
        control_tx,
        slaves: Arc::new(SlaveTracker::default()),
        master_contact: Arc::new(ContactTracker::default()),
    });

    let controller = ClusterController {
        logger: config.logger,
        shared: shared.clone(),
        membership: Arc::new(membership),
        notifier,
        control_rx,
        found_rx,
        shutdown,
        current_master: None,
        slave_session: None,
        election_timer: None,
    };

    Ok((ReplicatedRepository::new(shared.clone()), shared, controller))
}

/// ClusterController owns this node's role. Every role transition happens on its event loop,
/// each election under a new epoch; events tagged with an older epoch are dropped.
pub(crate) struct ClusterController {
    logger: slog::Logger,
    shared: Arc<ClusterShared>,
    membership: Arc<ClusterMembership>,
    notifier: RoleNotifier,
    control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    found_rx: mpsc::UnboundedReceiver<MasterFound>,
    shutdown: CancellationToken,
    current_master: Option<String>,
    // Dropping a guard stops the task it belongs to.
    slave_session: Option<DropGuard>,
    election_timer: Option<DropGuard>,
}

impl ClusterController {
    pub async fn run_event_loop(mut self) {
        slog::info!(self.logger, "Cluster controller starting");
        self.transition_to_electing(None, "Startup");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(event) = self.control_rx.recv() => self.handle_control(event),
                Some(found) = self.found_rx.recv() => self.handle_found(found),
            }
        }

        self.slave_session = None;
        self.election_timer = None;
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.notifier.notify_new_role(RoleSnapshot::NotConnected);
        slog::info!(self.logger, "Cluster controller stopped");
    }

    fn current_epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    fn handle_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::ChooseMaster { epoch, reason } => self.transition_to_electing(epoch, &reason),
            ControlEvent::SlaveUp { epoch } => {
                if epoch != self.current_epoch() {
                    return;
                }
                if let Some(master_id) = &self.current_master {
                    slog::info!(self.logger, "Caught up with master {}", master_id);
                    self.notifier.notify_new_role(RoleSnapshot::Slave {
                        master_id: master_id.clone(),
                        up: true,
                    });
                }
            }
        }
    }

    fn transition_to_electing(&mut self, epoch: Option<u64>, reason: &str) {
        let current = self.current_epoch();
        if let Some(epoch) = epoch {
            if epoch != current {
                slog::debug!(self.logger, "Ignoring stale election request from epoch {}: {}", epoch, reason);
                return;
            }
        }

        let epoch = current + 1;
        self.shared.epoch.store(epoch, Ordering::SeqCst);
        slog::info!(self.logger, "Choosing master (epoch {}): {}", epoch, reason);

        self.slave_session = None;
        self.current_master = None;
        self.shared.slaves.clear();
        self.notifier.notify_new_role(RoleSnapshot::Electing);

        let shared = self.shared.clone();
        let membership = self.membership.clone();
        tokio::spawn(async move {
            let discovery = membership.discover().await;
            if shared.epoch.load(Ordering::SeqCst) == epoch {
                slog::debug!(shared.logger, "Electing among {:?}", discovery.nodes);
                shared.strategy.elect(epoch, discovery);
            }
        });

        // Discovery may have missed nodes that were still starting up. Try again if nothing is
        // decided in time.
        let cancel = CancellationToken::new();
        let timer = cancel.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(shared.options.cluster_timeout) => {
                    shared.choose_master(Some(epoch), "Election timed out");
                }
                _ = timer.cancelled() => {}
            }
        });
        self.election_timer = Some(cancel.drop_guard());
    }

    fn handle_found(&mut self, found: MasterFound) {
        let epoch = self.current_epoch();
        if found.epoch != epoch {
            slog::debug!(
                self.logger,
                "Ignoring master {} found in stale epoch {}",
                found.master_id,
                found.epoch
            );
            return;
        }
        if self.current_master.as_deref() == Some(found.master_id.as_str()) {
            return;
        }

        self.election_timer = None;
        self.current_master = Some(found.master_id.clone());
        if found.master_id == self.shared.self_id {
            self.transition_to_master();
        } else {
            self.transition_to_slave(epoch, found.master_id);
        }
    }

    fn transition_to_master(&mut self) {
        slog::info!(self.logger, "This node is now master");
        self.notifier.notify_new_role(RoleSnapshot::Master { up_since: Utc::now() });
    }

    fn transition_to_slave(&mut self, epoch: u64, master_id: String) {
        slog::info!(self.logger, "Following master {}", master_id);
        self.notifier.notify_new_role(RoleSnapshot::Slave {
            master_id: master_id.clone(),
            up: false,
        });

        let cancel = CancellationToken::new();
        let session = SlaveSession {
            logger: self.logger.new(slog::o!("master" => master_id.clone())),
            shared: self.shared.clone(),
            epoch,
            master_id,
            cancel: cancel.clone(),
        };
        tokio::spawn(session.run());
        self.slave_session = Some(cancel.drop_guard());
    }
}

/// SlaveSession bootstraps from the master and then follows its transaction stream. When the
/// master is lost it asks the controller for a new election.
struct SlaveSession {
    logger: slog::Logger,
    shared: Arc<ClusterShared>,
    epoch: u64,
    master_id: String,
    cancel: CancellationToken,
}

impl SlaveSession {
    async fn run(self) {
        let shared = &self.shared;
        let client = match shared.peers.get(&self.master_id) {
            Ok(client) => client.clone(),
            Err(e) => {
                slog::error!(self.logger, "Cannot follow master: {}", e);
                shared.choose_master(Some(self.epoch), e.to_string());
                return;
            }
        };
        shared.master_contact.reset();

        let snapshots = SnapshotDownloader {
            logger: self.logger.clone(),
            client: client.clone(),
            local: shared.local.clone(),
            backoff: shared.options.slave_snapshot_download_backoff,
            contact: shared.master_contact.clone(),
            cancel: self.cancel.clone(),
        };
        if shared.local.status().await.empty {
            slog::info!(self.logger, "Local repository is empty, fetching snapshot");
            if let Err(end) = snapshots.run().await {
                self.ended(end);
                return;
            }
        } else if let Err(e) = shared.local.checkpoint().await {
            slog::warn!(self.logger, "Checkpoint before following master failed: {}", e);
        }

        let _ = shared.control_tx.send(ControlEvent::SlaveUp { epoch: self.epoch });

        let downloader = TxDownloader {
            logger: self.logger.clone(),
            client,
            local: shared.local.clone(),
            repository_id: shared.repository_id.clone(),
            backoff: shared.options.slave_tx_download_backoff,
            read_timeout: shared.options.stream_read_timeout,
            contact: shared.master_contact.clone(),
            snapshots,
            cancel: self.cancel.clone(),
        };
        let end = downloader.run().await;
        self.ended(end);
    }

    fn ended(&self, end: DownloadEnd) {
        match end {
            DownloadEnd::Cancelled => {}
            DownloadEnd::NotMaster => {
                self.shared
                    .choose_master(Some(self.epoch), format!("{} is no longer master", self.master_id));
            }
            DownloadEnd::GaveUp(error) => {
                self.shared
                    .choose_master(Some(self.epoch), format!("Lost master {}: {}", self.master_id, error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::cluster::{ClusterOptions, RepositoryError, Role, ServerRegistryKind};
    use crate::commitlog::InMemoryLog;
    use crate::model::{EntityKind, Tx, User};
    use crate::repository::{
        create_actor, test_logger, LocalRepository, RepositoryOptions, RepositoryOptionsValidated, SnapshotFiles,
    };
    use crate::transport::ClusterCredentials;
    use std::convert::TryFrom;
    use std::net::SocketAddr;
    use std::path::Path;
    use tokio::time::Duration;

    fn spawn_local(dir: &Path) -> RepositoryClient {
        let repository_options = RepositoryOptionsValidated::try_from(RepositoryOptions {
            sync_writes: Some(false),
            ..RepositoryOptions::default()
        })
        .unwrap();
        let snapshots = SnapshotFiles::open(dir, 3).unwrap();
        let local =
            LocalRepository::recover(test_logger(), InMemoryLog::new(1 << 20), snapshots, repository_options).unwrap();
        let (local, actor) = create_actor(test_logger(), 16, local, Duration::from_secs(60));
        tokio::spawn(actor.run_event_loop());
        local
    }

    fn lone_node(dir: &Path, strategy: MasterStrategyKind) -> (ReplicatedRepository, ClusterController) {
        let local = spawn_local(dir);
        let members: Vec<(String, SocketAddr)> = vec![("a".into(), "127.0.0.1:1".parse().unwrap())];
        let credentials = ClusterCredentials {
            cluster_name: "c".into(),
            password: "p".into(),
        };
        let peers = PeerClients::new("a", members, &credentials, Duration::from_millis(100)).unwrap();

        let options = ClusterOptions {
            master_strategy: Some(strategy),
            fixed_master: Some("a".into()),
            election_timeout: Some(Duration::from_millis(200)),
            election_jitter: Some(Duration::from_millis(20)),
            ..ClusterOptions::default()
        };
        let config = ClusterConfig {
            logger: test_logger(),
            self_id: "a".into(),
            repository_id: "c".into(),
            members: vec!["a".into()],
            options: ClusterOptionsValidated::try_from(options).unwrap(),
            local,
            peers,
        };
        let (repository, _shared, controller) = create(config, CancellationToken::new()).unwrap();
        (repository, controller)
    }

    async fn wait_for_master(repository: &ReplicatedRepository) {
        let mut listener = repository.role_listener();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !matches!(listener.current(), RoleSnapshot::Master { .. }) {
                listener.next().await;
            }
        })
        .await
        .expect("Node never became master");
    }

    fn user(id: &str) -> User {
        User {
            id: id.into(),
            ..User::default()
        }
    }

    #[tokio::test]
    async fn lone_paxos_node_becomes_master_and_accepts_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (repository, controller) = lone_node(dir.path(), MasterStrategyKind::Paxos);
        assert!(matches!(
            repository.exec(Tx::create(user("alice"))).await,
            Err(RepositoryError::Unavailable(_))
        ));

        tokio::spawn(controller.run_event_loop());
        wait_for_master(&repository).await;
        assert_eq!(repository.master_id().as_deref(), Some("a"));

        repository.exec(Tx::create(user("alice"))).await.unwrap();
        assert!(repository.find(EntityKind::User, "alice").await.is_some());

        let status = repository.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].role, Role::Master);
    }

    #[tokio::test]
    async fn fixed_master_on_itself() {
        let dir = tempfile::tempdir().unwrap();
        let (repository, controller) = lone_node(dir.path(), MasterStrategyKind::Fixed);
        tokio::spawn(controller.run_event_loop());
        wait_for_master(&repository).await;
        assert!(repository.slaves().is_empty());
    }

    #[tokio::test]
    async fn stale_events_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (repository, mut controller) = lone_node(dir.path(), MasterStrategyKind::Fixed);
        controller.transition_to_electing(None, "test");
        let epoch = controller.current_epoch();
        controller.handle_found(MasterFound {
            epoch,
            master_id: "a".into(),
        });
        assert!(matches!(repository.role(), RoleSnapshot::Master { .. }));

        controller.transition_to_electing(Some(epoch - 1), "stale");
        assert_eq!(controller.current_epoch(), epoch);
        controller.handle_found(MasterFound {
            epoch: epoch - 1,
            master_id: "b".into(),
        });
        assert!(matches!(repository.role(), RoleSnapshot::Master { .. }));

        controller.transition_to_electing(Some(epoch), "master lost");
        assert_eq!(controller.current_epoch(), epoch + 1);
        assert_eq!(repository.role(), RoleSnapshot::Electing);
    }

    #[tokio::test]
    async fn unreachable_master_sends_the_slave_back_to_electing() {
        let dir = tempfile::tempdir().unwrap();
        let local = spawn_local(dir.path());
        let members: Vec<(String, SocketAddr)> = vec![
            ("a".into(), "127.0.0.1:1".parse().unwrap()),
            ("b".into(), "127.0.0.1:2".parse().unwrap()),
        ];
        let credentials = ClusterCredentials {
            cluster_name: "c".into(),
            password: "p".into(),
        };
        let peers = PeerClients::new("a", members, &credentials, Duration::from_millis(100)).unwrap();

        let quick = BackoffPolicy::fixed(Duration::from_millis(10), Duration::from_millis(10)).with_max_failures(2);
        let options = ClusterOptions {
            master_strategy: Some(MasterStrategyKind::Fixed),
            server_registry: Some(ServerRegistryKind::Static),
            fixed_master: Some("b".into()),
            slave_snapshot_download_backoff: Some(quick),
            slave_tx_download_backoff: Some(quick),
            ..ClusterOptions::default()
        };
        let config = ClusterConfig {
            logger: test_logger(),
            self_id: "a".into(),
            repository_id: "c".into(),
            members: vec!["a".into(), "b".into()],
            options: ClusterOptionsValidated::try_from(options).unwrap(),
            local,
            peers,
        };
        let shutdown = CancellationToken::new();
        let (_repository, shared, controller) = create(config, shutdown.clone()).unwrap();
        tokio::spawn(controller.run_event_loop());

        // Startup is epoch 1. Every time the slave gives up on b, a new election starts.
        tokio::time::timeout(Duration::from_secs(5), async {
            while shared.epoch.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Slave never gave up on its master");
        shutdown.cancel();
    }
}
