use crate::commitlog::TxId;
use crate::grpc::grpc_cluster_server::{GrpcCluster, GrpcClusterServer};
use crate::grpc::{
    proto_deliver_result, proto_forward_tx_error, proto_forward_tx_result, proto_snapshot_result, proto_tx_frame,
    ProtoConflict, ProtoDeliverReq, ProtoDeliverResult, ProtoDeliverSuccess, ProtoForwardTxError, ProtoForwardTxReq,
    ProtoForwardTxResult, ProtoForwardTxSuccess, ProtoHeartbeat, ProtoNotMaster, ProtoPingReq, ProtoPingResult,
    ProtoResyncRequired, ProtoServerFault, ProtoSnapshotReq, ProtoSnapshotResult, ProtoSnapshotSuccess,
    ProtoStreamTxReq, ProtoTxFrame, ProtoTxRecord,
};
use crate::model::{Snapshot, Tx};
use crate::transport::client::{AUTHORIZATION_HEADER, REFERER_HEADER};
use crate::transport::{ClusterCredentials, ClusterService, ForwardError, RpcServerShutdownSignal, StreamFrame};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

const STREAM_BUFFER: usize = 16;

/// RpcServer is the type that implements the cluster gRPC interface.
pub(crate) struct RpcServer<S> {
    logger: slog::Logger,
    authorization: String,
    service: Arc<S>,
}

impl<S: ClusterService> RpcServer<S> {
    pub fn new(logger: slog::Logger, credentials: &ClusterCredentials, service: Arc<S>) -> Self {
        RpcServer {
            logger,
            authorization: credentials.header_value(),
            service,
        }
    }

    pub async fn run(self, socket_addr: SocketAddr, shutdown_signal: RpcServerShutdownSignal) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GrpcClusterServer::new(self))
            .serve_with_shutdown(socket_addr, shutdown_signal)
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
    }

    /// Check credentials and return the id of the calling node.
    fn authenticate<T>(&self, request: &Request<T>) -> Result<String, Status> {
        let metadata = request.metadata();
        let authorized = metadata
            .get(AUTHORIZATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map_or(false, |value| value == self.authorization);
        if !authorized {
            return Err(Status::unauthenticated("Invalid cluster credentials"));
        }

        match metadata.get(REFERER_HEADER).and_then(|value| value.to_str().ok()) {
            Some(referer) if !referer.is_empty() => Ok(referer.to_string()),
            _ => Err(Status::invalid_argument("Missing referer")),
        }
    }

    async fn handle_forward_transaction(
        &self,
        from: &str,
        rpc_request: ProtoForwardTxReq,
    ) -> Result<ProtoForwardTxResult, Status> {
        let app_input = Self::convert_forward_transaction_input(rpc_request)?;
        let app_result = self.service.forward_transaction(from, app_input).await;
        let rpc_reply = Self::convert_forward_transaction_result(app_result);
        Ok(rpc_reply)
    }

    fn convert_forward_transaction_input(rpc_request: ProtoForwardTxReq) -> Result<Tx, Status> {
        Tx::from_json(&rpc_request.tx_json).map_err(|e| Status::invalid_argument(format!("Malformed tx: {}", e)))
    }

    fn convert_forward_transaction_result(app_result: Result<TxId, ForwardError>) -> ProtoForwardTxResult {
        let err = match app_result {
            Ok(tx_id) => {
                return ProtoForwardTxResult {
                    result: Some(proto_forward_tx_result::Result::Ok(ProtoForwardTxSuccess {
                        tx_id: tx_id.as_u64(),
                    })),
                }
            }
            Err(ForwardError::Conflict(model_error)) => {
                proto_forward_tx_error::Err::Conflict(ProtoConflict {
                    message: model_error.to_string(),
                    error_json: serde_json::to_vec(&model_error).unwrap_or_default(),
                })
            }
            Err(ForwardError::NotMaster) => proto_forward_tx_error::Err::NotMaster(ProtoNotMaster {
                // Empty
            }),
            Err(ForwardError::ServerFault(message)) => {
                proto_forward_tx_error::Err::ServerFault(ProtoServerFault { message })
            }
        };

        ProtoForwardTxResult {
            result: Some(proto_forward_tx_result::Result::Err(ProtoForwardTxError { err: Some(err) })),
        }
    }

    async fn handle_stream_transactions(
        &self,
        from: &str,
        rpc_request: ProtoStreamTxReq,
    ) -> Result<ReceiverStream<Result<ProtoTxFrame, Status>>, Status> {
        if rpc_request.repository_id.is_empty() {
            return Err(Status::invalid_argument("Missing repository id"));
        }

        let mut frames = self
            .service
            .open_tx_stream(from, TxId::new(rpc_request.tx_id), &rpc_request.repository_id)
            .await;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if tx.send(Ok(Self::convert_frame(frame))).await.is_err() {
                    // Slave went away. Dropping `frames` ends the producer too.
                    return;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    fn convert_frame(frame: StreamFrame) -> ProtoTxFrame {
        let frame = match frame {
            StreamFrame::Tx(record) => proto_tx_frame::Frame::Tx(ProtoTxRecord {
                tx_id: record.id.as_u64(),
                timestamp: record.timestamp,
                tx_json: record.payload.to_vec(),
            }),
            StreamFrame::Heartbeat(next_tx_id) => proto_tx_frame::Frame::Heartbeat(ProtoHeartbeat {
                next_tx_id: next_tx_id.as_u64(),
            }),
            StreamFrame::NotMaster => proto_tx_frame::Frame::NotMaster(ProtoNotMaster {
                // Empty
            }),
            StreamFrame::ResyncRequired(message) => {
                proto_tx_frame::Frame::ResyncRequired(ProtoResyncRequired { message })
            }
        };

        ProtoTxFrame { frame: Some(frame) }
    }

    async fn handle_latest_snapshot(&self, from: &str) -> Result<ProtoSnapshotResult, Status> {
        let app_result = self.service.latest_snapshot(from).await;
        let rpc_reply = Self::convert_latest_snapshot_result(app_result);
        Ok(rpc_reply)
    }

    fn convert_latest_snapshot_result(app_result: Result<Snapshot, String>) -> ProtoSnapshotResult {
        let encoded = app_result.and_then(|snapshot| {
            snapshot
                .to_gzip_json()
                .map(|snapshot_gz| (snapshot.tx_id, snapshot_gz))
                .map_err(|e| format!("Unable to encode snapshot: {}", e))
        });

        let result = match encoded {
            Ok((tx_id, snapshot_gz)) => proto_snapshot_result::Result::Ok(ProtoSnapshotSuccess {
                tx_id: tx_id.as_u64(),
                snapshot_gz,
            }),
            Err(message) => proto_snapshot_result::Result::Err(ProtoServerFault { message }),
        };

        ProtoSnapshotResult { result: Some(result) }
    }

    async fn handle_deliver(&self, from: &str, rpc_request: ProtoDeliverReq) -> Result<ProtoDeliverResult, Status> {
        if rpc_request.topic.is_empty() {
            return Err(Status::invalid_argument("Missing topic"));
        }

        let app_result = self
            .service
            .deliver(from, &rpc_request.topic, rpc_request.payload)
            .await;

        let result = match app_result {
            Ok(response) => proto_deliver_result::Result::Ok(ProtoDeliverSuccess { response }),
            Err(message) => proto_deliver_result::Result::Err(ProtoServerFault { message }),
        };
        Ok(ProtoDeliverResult { result: Some(result) })
    }

    fn handle_ping(&self) -> ProtoPingResult {
        let info = self.service.ping();
        ProtoPingResult {
            node_id: info.node_id,
            role: info.role,
            next_tx_id: info.next_tx_id.as_u64(),
        }
    }
}

#[async_trait::async_trait]
impl<S: ClusterService> GrpcCluster for RpcServer<S> {
    async fn forward_transaction(
        &self,
        rpc_request_wrapped: Request<ProtoForwardTxReq>,
    ) -> Result<Response<ProtoForwardTxResult>, Status> {
        let from = self.authenticate(&rpc_request_wrapped)?;
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {} {:?}", from, rpc_request);
        let rpc_result = self.handle_forward_transaction(&from, rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    type StreamTransactionsStream = ReceiverStream<Result<ProtoTxFrame, Status>>;

    async fn stream_transactions(
        &self,
        rpc_request_wrapped: Request<ProtoStreamTxReq>,
    ) -> Result<Response<Self::StreamTransactionsStream>, Status> {
        let from = self.authenticate(&rpc_request_wrapped)?;
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {} {:?}", from, rpc_request);
        let rpc_result = self.handle_stream_transactions(&from, rpc_request).await;

        rpc_result.map(Response::new)
    }

    async fn latest_snapshot(
        &self,
        rpc_request_wrapped: Request<ProtoSnapshotReq>,
    ) -> Result<Response<ProtoSnapshotResult>, Status> {
        let from = self.authenticate(&rpc_request_wrapped)?;

        slog::debug!(self.logger, "ServerWire - {} LatestSnapshot", from);
        let rpc_result = self.handle_latest_snapshot(&from).await;

        rpc_result.map(Response::new)
    }

    async fn deliver(&self, rpc_request_wrapped: Request<ProtoDeliverReq>) -> Result<Response<ProtoDeliverResult>, Status> {
        let from = self.authenticate(&rpc_request_wrapped)?;
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {} Deliver {}", from, rpc_request.topic);
        let rpc_result = self.handle_deliver(&from, rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn ping(&self, rpc_request_wrapped: Request<ProtoPingReq>) -> Result<Response<ProtoPingResult>, Status> {
        self.authenticate(&rpc_request_wrapped)?;

        Ok(Response::new(self.handle_ping()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::LogRecord;
    use crate::model::{EntityKind, ModelObject, Queue};
    use crate::repository::test_logger;
    use crate::store::ModelError;
    use crate::transport::PingInfo;
    use std::str::FromStr;
    use tonic::metadata::AsciiMetadataValue;

    struct FixedService;

    #[async_trait::async_trait]
    impl ClusterService for FixedService {
        async fn forward_transaction(&self, _from: &str, tx: Tx) -> Result<TxId, ForwardError> {
            match tx.object {
                ModelObject::Queue(q) if q.id == "taken" => Err(ForwardError::Conflict(ModelError::DuplicateId {
                    kind: EntityKind::Queue,
                    id: q.id,
                })),
                _ => Ok(TxId::new(7)),
            }
        }

        async fn open_tx_stream(&self, _from: &str, tx_id: TxId, _repository_id: &str) -> mpsc::Receiver<StreamFrame> {
            let (tx, rx) = mpsc::channel(4);
            tx.send(StreamFrame::Heartbeat(tx_id)).await.unwrap();
            rx
        }

        async fn latest_snapshot(&self, _from: &str) -> Result<Snapshot, String> {
            Err("not master".into())
        }

        async fn deliver(&self, _from: &str, _topic: &str, payload: Vec<u8>) -> Result<Vec<u8>, String> {
            Ok(payload)
        }

        fn ping(&self) -> PingInfo {
            PingInfo {
                node_id: "a".into(),
                role: "MASTER".into(),
                next_tx_id: TxId::new(3),
            }
        }
    }

    fn ascii(value: &str) -> AsciiMetadataValue {
        AsciiMetadataValue::from_str(value).unwrap()
    }

    fn server() -> RpcServer<FixedService> {
        let credentials = ClusterCredentials {
            cluster_name: "c".into(),
            password: "p".into(),
        };
        RpcServer::new(test_logger(), &credentials, Arc::new(FixedService))
    }

    fn authorized<T>(server: &RpcServer<FixedService>, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert(AUTHORIZATION_HEADER, ascii(&server.authorization));
        request.metadata_mut().insert(REFERER_HEADER, ascii("b"));
        request
    }

    #[tokio::test]
    async fn rejects_bad_credentials() {
        let server = server();

        let status = server.ping(Request::new(ProtoPingReq {})).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);

        let mut request = Request::new(ProtoPingReq {});
        request
            .metadata_mut()
            .insert(AUTHORIZATION_HEADER, ascii(&server.authorization));
        let status = server.ping(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let reply = server.ping(authorized(&server, ProtoPingReq {})).await.unwrap();
        assert_eq!(reply.into_inner().role, "MASTER");
    }

    #[tokio::test]
    async fn forward_transaction_conflict() {
        let server = server();
        let tx = Tx::create(Queue {
            id: "taken".into(),
            ..Queue::default()
        });
        let request = authorized(
            &server,
            ProtoForwardTxReq {
                tx_json: tx.to_json().unwrap(),
            },
        );

        let reply = server.forward_transaction(request).await.unwrap().into_inner();
        match reply.result {
            Some(proto_forward_tx_result::Result::Err(ProtoForwardTxError {
                err: Some(proto_forward_tx_error::Err::Conflict(conflict)),
            })) => {
                let error: ModelError = serde_json::from_slice(&conflict.error_json).unwrap();
                assert!(matches!(error, ModelError::DuplicateId { .. }));
            }
            other => panic!("Unexpected {:?}", other),
        }

        let malformed = authorized(&server, ProtoForwardTxReq { tx_json: b"nope".to_vec() });
        let status = server.forward_transaction(malformed).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn stream_frames_are_converted() {
        use tokio_stream::StreamExt;

        let server = server();
        let request = authorized(
            &server,
            ProtoStreamTxReq {
                tx_id: 5,
                repository_id: "c".into(),
            },
        );

        let mut stream = server.stream_transactions(request).await.unwrap().into_inner();
        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(
            frame.frame,
            Some(proto_tx_frame::Frame::Heartbeat(ProtoHeartbeat { next_tx_id: 5 }))
        );
        assert!(stream.next().await.is_none());

        let record = RpcServer::<FixedService>::convert_frame(StreamFrame::Tx(LogRecord {
            id: TxId::new(9),
            timestamp: 1,
            payload: b"x".to_vec().into(),
        }));
        assert!(matches!(record.frame, Some(proto_tx_frame::Frame::Tx(ProtoTxRecord { tx_id: 9, .. }))));
    }

    #[tokio::test]
    async fn snapshot_fault() {
        let server = server();
        let reply = server
            .latest_snapshot(authorized(&server, ProtoSnapshotReq {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            reply.result,
            Some(proto_snapshot_result::Result::Err(ProtoServerFault {
                message: "not master".into()
            }))
        );
    }
}
