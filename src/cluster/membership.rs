use crate::cluster::{Role, ServerRegistryKind};
use crate::transport::PeerClients;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Result of one round of discovery.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Discovery {
    /// Nodes that take part in the election, always including this node.
    pub nodes: BTreeSet<String>,
    /// A live node that already claims to be master, if exactly one does.
    pub known_master: Option<String>,
}

/// ClusterMembership finds the set of nodes an election runs over.
pub(crate) struct ClusterMembership {
    logger: slog::Logger,
    kind: ServerRegistryKind,
    self_id: String,
    members: BTreeSet<String>,
    peers: Arc<PeerClients>,
}

impl ClusterMembership {
    pub fn new(
        logger: slog::Logger,
        kind: ServerRegistryKind,
        self_id: &str,
        members: impl IntoIterator<Item = String>,
        peers: Arc<PeerClients>,
    ) -> Self {
        let mut members: BTreeSet<String> = members.into_iter().collect();
        members.insert(self_id.to_string());

        ClusterMembership {
            logger,
            kind,
            self_id: self_id.to_string(),
            members,
            peers,
        }
    }

    pub async fn discover(&self) -> Discovery {
        match self.kind {
            ServerRegistryKind::Static => Discovery {
                nodes: self.members.clone(),
                known_master: None,
            },
            ServerRegistryKind::Probing => self.ping_members().await,
        }
    }

    async fn ping_members(&self) -> Discovery {
        let pings: Vec<_> = self
            .peers
            .iter()
            .map(|peer| {
                let peer = peer.clone();
                tokio::spawn(async move {
                    let result = peer.ping().await;
                    (peer.peer_id().to_string(), result)
                })
            })
            .collect();

        let mut nodes = BTreeSet::new();
        nodes.insert(self.self_id.clone());
        let mut masters = Vec::new();
        for ping in pings {
            let (peer_id, result) = match ping.await {
                Ok(answer) => answer,
                Err(e) => {
                    slog::error!(self.logger, "Ping task failed: {}", e);
                    continue;
                }
            };

            match result {
                Ok(info) if info.node_id == peer_id => {
                    if info.role == Role::Master.to_string() {
                        masters.push(peer_id.clone());
                    }
                    nodes.insert(peer_id);
                }
                Ok(info) => {
                    slog::warn!(
                        self.logger,
                        "Member {} answered ping as {}, ignoring it",
                        peer_id,
                        info.node_id
                    );
                }
                Err(e) => {
                    slog::debug!(self.logger, "Member {} did not answer ping: {}", peer_id, e);
                }
            }
        }

        slog::info!(self.logger, "Discovered nodes {:?}, masters {:?}", nodes, masters);
        let known_master = if masters.len() == 1 { masters.pop() } else { None };
        Discovery { nodes, known_master }
    }
}
