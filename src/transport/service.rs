use crate::commitlog::{LogRecord, TxId};
use crate::model::{Snapshot, Tx};
use crate::store::ModelError;
use tokio::sync::mpsc;

/// One frame of a master's transaction stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum StreamFrame {
    Tx(LogRecord),
    /// Nothing new; the master's log ends at this id.
    Heartbeat(TxId),
    NotMaster,
    /// The master cannot serve the requested position; the slave must reload a snapshot.
    ResyncRequired(String),
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ForwardError {
    #[error(transparent)]
    Conflict(ModelError),

    #[error("Not master")]
    NotMaster,

    #[error("{0}")]
    ServerFault(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct PingInfo {
    pub node_id: String,
    pub role: String,
    pub next_tx_id: TxId,
}

/// ClusterService is what a node exposes to its peers. The RPC server authenticates and
/// decodes requests, then hands them to this.
#[async_trait::async_trait]
pub(crate) trait ClusterService: Send + Sync + 'static {
    async fn forward_transaction(&self, from: &str, tx: Tx) -> Result<TxId, ForwardError>;

    /// Frames for the stream, in order. The stream ends when the receiver is exhausted.
    async fn open_tx_stream(&self, from: &str, tx_id: TxId, repository_id: &str) -> mpsc::Receiver<StreamFrame>;

    async fn latest_snapshot(&self, from: &str) -> Result<Snapshot, String>;

    async fn deliver(&self, from: &str, topic: &str, payload: Vec<u8>) -> Result<Vec<u8>, String>;

    fn ping(&self) -> PingInfo;
}
