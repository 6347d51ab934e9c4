use crate::cluster::membership::Discovery;
use crate::paxos::{Envelope, HintedSequenceGenerator, Paxos, PaxosError, PaxosMessage, PaxosTransport};
use crate::transport::PeerClients;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};

pub(crate) const PAXOS_TOPIC: &str = "paxos";

/// Emitted once the cluster has settled on a master during election `epoch`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MasterFound {
    pub epoch: u64,
    pub master_id: String,
}

/// MasterStrategy turns a discovered node set into a `MasterFound`.
pub(crate) enum MasterStrategy {
    Fixed {
        master_id: String,
        found_tx: mpsc::UnboundedSender<MasterFound>,
    },
    Paxos(PaxosElection),
}

impl MasterStrategy {
    pub fn fixed(master_id: String, found_tx: mpsc::UnboundedSender<MasterFound>) -> Self {
        MasterStrategy::Fixed { master_id, found_tx }
    }

    pub fn paxos(config: PaxosElectionConfig, found_tx: mpsc::UnboundedSender<MasterFound>) -> Result<Self, PaxosError> {
        PaxosElection::new(config, found_tx).map(MasterStrategy::Paxos)
    }

    /// Start electing a master among `discovery.nodes`. The outcome arrives later on the
    /// `MasterFound` channel.
    pub fn elect(&self, epoch: u64, discovery: Discovery) {
        match self {
            MasterStrategy::Fixed { master_id, found_tx } => {
                let _ = found_tx.send(MasterFound {
                    epoch,
                    master_id: master_id.clone(),
                });
            }
            MasterStrategy::Paxos(election) => election.elect(epoch, discovery),
        }
    }

    /// Handle an election message another node delivered to us.
    pub fn deliver(&self, from: &str, payload: &[u8]) -> Result<(), String> {
        match self {
            MasterStrategy::Fixed { .. } => Err("This node does not take part in Paxos elections".to_string()),
            MasterStrategy::Paxos(election) => election.deliver(from, payload),
        }
    }
}

type RoundHint = Box<dyn Fn() -> u64 + Send>;
type ElectionPaxos = Paxos<String, DeliverTransport, HintedSequenceGenerator<RoundHint>>;

pub(crate) struct PaxosElectionConfig {
    pub logger: slog::Logger,
    pub self_id: String,
    pub preferred_master: Option<String>,
    pub election_timeout: Duration,
    pub election_jitter: Duration,
    pub peers: Arc<PeerClients>,
    /// Hint for sequence numbers, normally the node's applied tx id.
    pub round_hint: RoundHint,
}

pub(crate) struct PaxosElection {
    logger: slog::Logger,
    self_id: String,
    preferred_master: Option<String>,
    election_timeout: Duration,
    election_jitter: Duration,
    paxos: Arc<ElectionPaxos>,
    epoch: Arc<AtomicU64>,
    found_tx: mpsc::UnboundedSender<MasterFound>,
    // Dropping the guard stops the current proposal loop.
    round: Mutex<Option<DropGuard>>,
}

impl PaxosElection {
    fn new(config: PaxosElectionConfig, found_tx: mpsc::UnboundedSender<MasterFound>) -> Result<Self, PaxosError> {
        let (chosen_tx, chosen_rx) = mpsc::unbounded_channel();
        let transport = DeliverTransport {
            logger: config.logger.clone(),
            self_id: config.self_id.clone(),
            peers: config.peers,
        };
        let generator = HintedSequenceGenerator::new(config.self_id.clone(), config.round_hint);
        let paxos = Paxos::new(
            config.self_id.clone(),
            vec![config.self_id.clone()],
            transport,
            generator,
            chosen_tx,
        )?;

        let epoch = Arc::new(AtomicU64::new(0));
        tokio::spawn(forward_chosen(
            config.logger.clone(),
            chosen_rx,
            epoch.clone(),
            found_tx.clone(),
        ));

        Ok(PaxosElection {
            logger: config.logger,
            self_id: config.self_id,
            preferred_master: config.preferred_master,
            election_timeout: config.election_timeout,
            election_jitter: config.election_jitter,
            paxos: Arc::new(paxos),
            epoch,
            found_tx,
            round: Mutex::new(None),
        })
    }

    fn elect(&self, epoch: u64, discovery: Discovery) {
        self.epoch.store(epoch, Ordering::SeqCst);
        let mut round = self.round.lock().expect("Election round mutex poison");
        *round = None;

        if let Some(master_id) = discovery.known_master {
            slog::info!(self.logger, "Node {} is already master, joining it", master_id);
            let _ = self.found_tx.send(MasterFound { epoch, master_id });
            return;
        }

        let changed = match self.paxos.set_nodes(discovery.nodes.iter().cloned()) {
            Ok(changed) => changed,
            Err(e) => {
                slog::error!(self.logger, "Unable to start election: {}", e);
                return;
            }
        };
        if !changed {
            if let Some(master_id) = self.paxos.chosen() {
                slog::info!(self.logger, "Node set unchanged, master is still {}", master_id);
                let _ = self.found_tx.send(MasterFound { epoch, master_id });
                return;
            }
        }

        let first_delay = match &self.preferred_master {
            Some(preferred) if preferred == &self.self_id => Duration::from_millis(0),
            Some(preferred) if discovery.nodes.contains(preferred) => {
                self.election_timeout + random_jitter(self.election_jitter)
            }
            _ => random_jitter(self.election_jitter),
        };

        let cancel = CancellationToken::new();
        let task = ElectionRound {
            logger: self.logger.clone(),
            self_id: self.self_id.clone(),
            paxos: self.paxos.clone(),
            first_delay,
            retry_delay: self.election_timeout,
            jitter: self.election_jitter,
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());
        *round = Some(cancel.drop_guard());
    }

    fn deliver(&self, from: &str, payload: &[u8]) -> Result<(), String> {
        let envelope: Envelope<String> =
            serde_json::from_slice(payload).map_err(|e| format!("Malformed election message: {}", e))?;
        if envelope.from != from {
            return Err(format!("Election message from {} relayed by {}", envelope.from, from));
        }

        if !self.paxos.handle_in_view(&envelope.from, &envelope.view, envelope.message) {
            slog::debug!(
                self.logger,
                "Ignoring election message from {} for node set {:?}",
                envelope.from,
                envelope.view
            );
        }
        Ok(())
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

async fn forward_chosen(
    logger: slog::Logger,
    mut chosen_rx: mpsc::UnboundedReceiver<String>,
    epoch: Arc<AtomicU64>,
    found_tx: mpsc::UnboundedSender<MasterFound>,
) {
    while let Some(master_id) = chosen_rx.recv().await {
        slog::info!(logger, "Paxos chose {} as master", master_id);
        let found = MasterFound {
            epoch: epoch.load(Ordering::SeqCst),
            master_id,
        };
        if found_tx.send(found).is_err() {
            return;
        }
    }
}

/// Proposes this node until some value is chosen.
struct ElectionRound {
    logger: slog::Logger,
    self_id: String,
    paxos: Arc<ElectionPaxos>,
    first_delay: Duration,
    retry_delay: Duration,
    jitter: Duration,
    cancel: CancellationToken,
}

impl ElectionRound {
    async fn run(self) {
        let mut delay = self.first_delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => return,
            }

            if self.paxos.chosen().is_some() {
                return;
            }
            let n = self.paxos.propose(self.self_id.clone());
            slog::info!(self.logger, "Proposed myself as master with {}", n);

            delay = self.retry_delay + random_jitter(self.jitter);
        }
    }
}

/// Sends Paxos messages as `Deliver` calls on the "paxos" topic. Sends are spawned so the
/// engine never waits on the network.
struct DeliverTransport {
    logger: slog::Logger,
    self_id: String,
    peers: Arc<PeerClients>,
}

impl PaxosTransport<String> for DeliverTransport {
    fn send(&self, to: &str, view: &[String], message: PaxosMessage<String>) {
        let envelope = Envelope {
            from: self.self_id.clone(),
            view: view.to_vec(),
            message,
        };
        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                slog::error!(self.logger, "Unable to encode election message: {}", e);
                return;
            }
        };
        let client = match self.peers.get(to) {
            Ok(client) => client.clone(),
            Err(e) => {
                slog::warn!(self.logger, "Dropping election message: {}", e);
                return;
            }
        };

        let logger = self.logger.clone();
        tokio::spawn(async move {
            if let Err(e) = client.deliver(PAXOS_TOPIC, payload).await {
                slog::debug!(logger, "Election message to {} failed: {}", client.peer_id(), e);
            }
        });
    }
}
