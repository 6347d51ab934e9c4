use crate::commitlog::{LogRecord, TxId};
use crate::grpc::grpc_cluster_client::GrpcClusterClient;
use crate::grpc::{
    proto_deliver_result, proto_forward_tx_error, proto_forward_tx_result, proto_snapshot_result, proto_tx_frame,
    ProtoDeliverReq, ProtoForwardTxReq, ProtoPingReq, ProtoSnapshotReq, ProtoStreamTxReq, ProtoTxFrame,
};
use crate::model::{Snapshot, Tx};
use crate::store::ModelError;
use crate::transport::{PingInfo, StreamFrame};
use base64::Engine;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Streaming};

pub(crate) const AUTHORIZATION_HEADER: &str = "authorization";
pub(crate) const REFERER_HEADER: &str = "referer";

/// Shared secret every node of a cluster presents to its peers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterCredentials {
    pub cluster_name: String,
    pub password: String,
}

impl ClusterCredentials {
    pub(crate) fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.cluster_name, self.password);
        format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ClientError {
    #[error("Unknown peer [{0}]")]
    UnknownPeer(String),

    #[error("Invalid peer address [{0}]")]
    InvalidAddress(String),

    #[error("Unable to connect")]
    Connect(#[from] tonic::transport::Error),

    #[error("RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("RPC timed out")]
    Timeout,

    #[error("Rejected by master")]
    Conflict(#[source] ModelError),

    #[error("Peer is not master")]
    NotMaster,

    #[error("Peer fault: {0}")]
    ServerFault(String),

    #[error("Malformed response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// True for errors that say nothing about the peer's answer, only that we could not get one.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Connect(_) | ClientError::Rpc(_) | ClientError::Timeout | ClientError::InvalidResponse(_)
        )
    }
}

/// ClusterClient talks to one peer. The channel connects lazily and reconnects on its own,
/// so a client can be created for a peer that is not up yet.
#[derive(Clone)]
pub(crate) struct ClusterClient {
    peer_id: String,
    inner: GrpcClusterClient<Channel>,
    authorization: AsciiMetadataValue,
    referer: AsciiMetadataValue,
    rpc_timeout: Duration,
}

impl ClusterClient {
    pub fn new(
        self_id: &str,
        peer_id: &str,
        address: SocketAddr,
        credentials: &ClusterCredentials,
        rpc_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let url = format!("http://{}", address);
        let endpoint = Endpoint::from_shared(url.clone()).map_err(|_| ClientError::InvalidAddress(url))?;
        let channel = endpoint.connect_lazy()?;

        let authorization = AsciiMetadataValue::from_str(&credentials.header_value())
            .map_err(|_| ClientError::InvalidAddress("credentials are not valid ASCII".into()))?;
        let referer =
            AsciiMetadataValue::from_str(self_id).map_err(|_| ClientError::InvalidAddress(format!("node id {}", self_id)))?;

        Ok(ClusterClient {
            peer_id: peer_id.to_string(),
            inner: GrpcClusterClient::new(channel),
            authorization,
            referer,
            rpc_timeout,
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub async fn forward_transaction(&self, tx: &Tx) -> Result<TxId, ClientError> {
        let tx_json = tx
            .to_json()
            .map_err(|e| ClientError::InvalidResponse(format!("unable to encode tx: {}", e)))?;
        let request = self.request(ProtoForwardTxReq { tx_json });

        let mut client = self.inner.clone();
        let reply = self.timed(client.forward_transaction(request)).await?.into_inner();
        convert_forward_result(reply.result)
    }

    /// Open the master's tx stream at `from`. No timeout applies to the stream itself; callers
    /// bound each read.
    pub async fn stream_transactions(&self, from: TxId, repository_id: &str) -> Result<TxStream, ClientError> {
        let request = self.request(ProtoStreamTxReq {
            tx_id: from.as_u64(),
            repository_id: repository_id.to_string(),
        });

        let mut client = self.inner.clone();
        let stream = self.timed(client.stream_transactions(request)).await?.into_inner();
        Ok(TxStream { inner: stream })
    }

    pub async fn latest_snapshot(&self) -> Result<Snapshot, ClientError> {
        let request = self.request(ProtoSnapshotReq {});

        let mut client = self.inner.clone();
        let reply = self.timed(client.latest_snapshot(request)).await?.into_inner();
        match reply.result {
            Some(proto_snapshot_result::Result::Ok(ok)) => {
                let snapshot = Snapshot::from_gzip_json(&ok.snapshot_gz)
                    .map_err(|e| ClientError::InvalidResponse(format!("unreadable snapshot: {}", e)))?;
                if snapshot.tx_id.as_u64() != ok.tx_id {
                    return Err(ClientError::InvalidResponse(format!(
                        "snapshot claims tx id {} but contains {}",
                        ok.tx_id, snapshot.tx_id
                    )));
                }
                Ok(snapshot)
            }
            Some(proto_snapshot_result::Result::Err(fault)) => Err(ClientError::ServerFault(fault.message)),
            None => Err(missing("LatestSnapshot result")),
        }
    }

    pub async fn deliver(&self, topic: &str, payload: Vec<u8>) -> Result<Vec<u8>, ClientError> {
        let request = self.request(ProtoDeliverReq {
            topic: topic.to_string(),
            payload,
        });

        let mut client = self.inner.clone();
        let reply = self.timed(client.deliver(request)).await?.into_inner();
        match reply.result {
            Some(proto_deliver_result::Result::Ok(ok)) => Ok(ok.response),
            Some(proto_deliver_result::Result::Err(fault)) => Err(ClientError::ServerFault(fault.message)),
            None => Err(missing("Deliver result")),
        }
    }

    pub async fn ping(&self) -> Result<PingInfo, ClientError> {
        let request = self.request(ProtoPingReq {});

        let mut client = self.inner.clone();
        let reply = self.timed(client.ping(request)).await?.into_inner();
        Ok(PingInfo {
            node_id: reply.node_id,
            role: reply.role,
            next_tx_id: TxId::new(reply.next_tx_id),
        })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        let metadata = request.metadata_mut();
        metadata.insert(AUTHORIZATION_HEADER, self.authorization.clone());
        metadata.insert(REFERER_HEADER, self.referer.clone());
        request
    }

    async fn timed<F, T>(&self, call: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, tonic::Status>>,
    {
        match tokio::time::timeout(self.rpc_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

fn convert_forward_result(result: Option<proto_forward_tx_result::Result>) -> Result<TxId, ClientError> {
    let err = match result {
        Some(proto_forward_tx_result::Result::Ok(ok)) => return Ok(TxId::new(ok.tx_id)),
        Some(proto_forward_tx_result::Result::Err(err)) => err.err,
        None => return Err(missing("ForwardTransaction result")),
    };

    match err {
        Some(proto_forward_tx_error::Err::Conflict(conflict)) => match serde_json::from_slice(&conflict.error_json) {
            Ok(model_error) => Err(ClientError::Conflict(model_error)),
            Err(_) => Err(ClientError::ServerFault(conflict.message)),
        },
        Some(proto_forward_tx_error::Err::NotMaster(_)) => Err(ClientError::NotMaster),
        Some(proto_forward_tx_error::Err::ServerFault(fault)) => Err(ClientError::ServerFault(fault.message)),
        None => Err(missing("ForwardTransaction error")),
    }
}

fn missing(what: &str) -> ClientError {
    ClientError::InvalidResponse(format!("{} is missing", what))
}

pub(crate) struct TxStream {
    inner: Streaming<ProtoTxFrame>,
}

impl TxStream {
    /// The next frame, or None when the master closed the stream.
    pub async fn next(&mut self) -> Result<Option<StreamFrame>, ClientError> {
        match self.inner.message().await? {
            Some(frame) => convert_frame(frame).map(Some),
            None => Ok(None),
        }
    }
}

fn convert_frame(frame: ProtoTxFrame) -> Result<StreamFrame, ClientError> {
    match frame.frame {
        Some(proto_tx_frame::Frame::Tx(record)) => Ok(StreamFrame::Tx(LogRecord {
            id: TxId::new(record.tx_id),
            timestamp: record.timestamp,
            payload: record.tx_json.into(),
        })),
        Some(proto_tx_frame::Frame::Heartbeat(heartbeat)) => Ok(StreamFrame::Heartbeat(TxId::new(heartbeat.next_tx_id))),
        Some(proto_tx_frame::Frame::NotMaster(_)) => Ok(StreamFrame::NotMaster),
        Some(proto_tx_frame::Frame::ResyncRequired(resync)) => Ok(StreamFrame::ResyncRequired(resync.message)),
        None => Err(missing("Tx frame")),
    }
}

/// Clients for every other member of the cluster, keyed by node id.
pub(crate) struct PeerClients {
    clients: HashMap<String, ClusterClient>,
}

impl PeerClients {
    pub fn new(
        self_id: &str,
        members: impl IntoIterator<Item = (String, SocketAddr)>,
        credentials: &ClusterCredentials,
        rpc_timeout: Duration,
    ) -> Result<Arc<Self>, ClientError> {
        let mut clients = HashMap::new();
        for (peer_id, address) in members {
            if peer_id == self_id {
                continue;
            }
            let client = ClusterClient::new(self_id, &peer_id, address, credentials, rpc_timeout)?;
            clients.insert(peer_id, client);
        }

        Ok(Arc::new(PeerClients { clients }))
    }

    pub fn get(&self, peer_id: &str) -> Result<&ClusterClient, ClientError> {
        self.clients
            .get(peer_id)
            .ok_or_else(|| ClientError::UnknownPeer(peer_id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterClient> {
        self.clients.values()
    }
}
