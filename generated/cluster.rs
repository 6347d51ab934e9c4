// -- ForwardTransaction --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoForwardTxReq {
    /// JSON encoded transaction.
    #[prost(bytes = "vec", tag = "1")]
    pub tx_json: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoForwardTxResult {
    #[prost(oneof = "proto_forward_tx_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_forward_tx_result::Result>,
}
/// Nested message and enum types in `ProtoForwardTxResult`.
pub mod proto_forward_tx_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoForwardTxSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoForwardTxError),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoForwardTxSuccess {
    #[prost(uint64, tag = "1")]
    pub tx_id: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoForwardTxError {
    #[prost(oneof = "proto_forward_tx_error::Err", tags = "1, 2, 3")]
    pub err: ::core::option::Option<proto_forward_tx_error::Err>,
}
/// Nested message and enum types in `ProtoForwardTxError`.
pub mod proto_forward_tx_error {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Err {
        #[prost(message, tag = "1")]
        Conflict(super::ProtoConflict),
        #[prost(message, tag = "2")]
        NotMaster(super::ProtoNotMaster),
        #[prost(message, tag = "3")]
        ServerFault(super::ProtoServerFault),
    }
}
/// Business validation failure.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoConflict {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
    /// JSON encoded model error, if the server could provide one.
    #[prost(bytes = "vec", tag = "2")]
    pub error_json: ::prost::alloc::vec::Vec<u8>,
}
/// Empty
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoNotMaster {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoServerFault {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
}
// -- StreamTransactions --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoStreamTxReq {
    #[prost(uint64, tag = "1")]
    pub tx_id: u64,
    #[prost(string, tag = "2")]
    pub repository_id: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTxFrame {
    #[prost(oneof = "proto_tx_frame::Frame", tags = "1, 2, 3, 4")]
    pub frame: ::core::option::Option<proto_tx_frame::Frame>,
}
/// Nested message and enum types in `ProtoTxFrame`.
pub mod proto_tx_frame {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Frame {
        #[prost(message, tag = "1")]
        Tx(super::ProtoTxRecord),
        #[prost(message, tag = "2")]
        Heartbeat(super::ProtoHeartbeat),
        #[prost(message, tag = "3")]
        NotMaster(super::ProtoNotMaster),
        #[prost(message, tag = "4")]
        ResyncRequired(super::ProtoResyncRequired),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTxRecord {
    #[prost(uint64, tag = "1")]
    pub tx_id: u64,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    #[prost(bytes = "vec", tag = "3")]
    pub tx_json: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoHeartbeat {
    #[prost(uint64, tag = "1")]
    pub next_tx_id: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoResyncRequired {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
}
// -- LatestSnapshot --

/// Empty
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoSnapshotReq {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoSnapshotResult {
    #[prost(oneof = "proto_snapshot_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_snapshot_result::Result>,
}
/// Nested message and enum types in `ProtoSnapshotResult`.
pub mod proto_snapshot_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoSnapshotSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoServerFault),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoSnapshotSuccess {
    #[prost(uint64, tag = "1")]
    pub tx_id: u64,
    /// Gzip compressed JSON snapshot.
    #[prost(bytes = "vec", tag = "2")]
    pub snapshot_gz: ::prost::alloc::vec::Vec<u8>,
}
// -- Deliver --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoDeliverReq {
    #[prost(string, tag = "1")]
    pub topic: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoDeliverResult {
    #[prost(oneof = "proto_deliver_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_deliver_result::Result>,
}
/// Nested message and enum types in `ProtoDeliverResult`.
pub mod proto_deliver_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoDeliverSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoServerFault),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoDeliverSuccess {
    #[prost(bytes = "vec", tag = "1")]
    pub response: ::prost::alloc::vec::Vec<u8>,
}
// -- Ping --

/// Empty
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPingReq {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPingResult {
    #[prost(string, tag = "1")]
    pub node_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub role: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub next_tx_id: u64,
}
#[doc = r" Generated client implementations."]
pub mod grpc_cluster_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = " Node to node API of a replicated repository. Every call carries `authorization` (basic"]
    #[doc = " credentials for the shared cluster name/password) and `referer` (sender node id) metadata."]
    pub struct GrpcClusterClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl GrpcClusterClient<tonic::transport::Channel> {
        #[doc = r" Attempt to create a new client by connecting to a given endpoint."]
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> GrpcClusterClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::ResponseBody: Body + HttpBody + Send + 'static,
        T::Error: Into<StdError>,
        <T::ResponseBody as HttpBody>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = tonic::client::Grpc::with_interceptor(inner, interceptor);
            Self { inner }
        }
        #[doc = " A slave forwards a transaction to the master."]
        pub async fn forward_transaction(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoForwardTxReq>,
        ) -> Result<tonic::Response<super::ProtoForwardTxResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/cluster.GrpcCluster/ForwardTransaction");
            self.inner.unary(request.into_request(), path, codec).await
        }
        #[doc = " A slave streams committed transactions from the master starting at `tx_id`."]
        pub async fn stream_transactions(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoStreamTxReq>,
        ) -> Result<tonic::Response<tonic::codec::Streaming<super::ProtoTxFrame>>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/cluster.GrpcCluster/StreamTransactions");
            self.inner
                .server_streaming(request.into_request(), path, codec)
                .await
        }
        #[doc = " A slave downloads the master's full state."]
        pub async fn latest_snapshot(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoSnapshotReq>,
        ) -> Result<tonic::Response<super::ProtoSnapshotResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/cluster.GrpcCluster/LatestSnapshot");
            self.inner.unary(request.into_request(), path, codec).await
        }
        #[doc = " Generic message delivery between nodes (master election)."]
        pub async fn deliver(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoDeliverReq>,
        ) -> Result<tonic::Response<super::ProtoDeliverResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/cluster.GrpcCluster/Deliver");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn ping(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoPingReq>,
        ) -> Result<tonic::Response<super::ProtoPingResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/cluster.GrpcCluster/Ping");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
    impl<T: Clone> Clone for GrpcClusterClient<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }
    impl<T> std::fmt::Debug for GrpcClusterClient<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "GrpcClusterClient {{ ... }}")
        }
    }
}
#[doc = r" Generated server implementations."]
pub mod grpc_cluster_server {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = "Generated trait containing gRPC methods that should be implemented for use with GrpcClusterServer."]
    #[async_trait]
    pub trait GrpcCluster: Send + Sync + 'static {
        #[doc = " A slave forwards a transaction to the master."]
        async fn forward_transaction(
            &self,
            request: tonic::Request<super::ProtoForwardTxReq>,
        ) -> Result<tonic::Response<super::ProtoForwardTxResult>, tonic::Status>;
        #[doc = "Server streaming response type for the StreamTransactions method."]
        type StreamTransactionsStream: futures_core::Stream<Item = Result<super::ProtoTxFrame, tonic::Status>>
            + Send
            + Sync
            + 'static;
        #[doc = " A slave streams committed transactions from the master starting at `tx_id`."]
        async fn stream_transactions(
            &self,
            request: tonic::Request<super::ProtoStreamTxReq>,
        ) -> Result<tonic::Response<Self::StreamTransactionsStream>, tonic::Status>;
        #[doc = " A slave downloads the master's full state."]
        async fn latest_snapshot(
            &self,
            request: tonic::Request<super::ProtoSnapshotReq>,
        ) -> Result<tonic::Response<super::ProtoSnapshotResult>, tonic::Status>;
        #[doc = " Generic message delivery between nodes (master election)."]
        async fn deliver(
            &self,
            request: tonic::Request<super::ProtoDeliverReq>,
        ) -> Result<tonic::Response<super::ProtoDeliverResult>, tonic::Status>;
        async fn ping(
            &self,
            request: tonic::Request<super::ProtoPingReq>,
        ) -> Result<tonic::Response<super::ProtoPingResult>, tonic::Status>;
    }
    #[doc = " Node to node API of a replicated repository. Every call carries `authorization` (basic"]
    #[doc = " credentials for the shared cluster name/password) and `referer` (sender node id) metadata."]
    #[derive(Debug)]
    pub struct GrpcClusterServer<T: GrpcCluster> {
        inner: _Inner<T>,
    }
    struct _Inner<T>(Arc<T>, Option<tonic::Interceptor>);
    impl<T: GrpcCluster> GrpcClusterServer<T> {
        pub fn new(inner: T) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, None);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, Some(interceptor.into()));
            Self { inner }
        }
    }
    impl<T, B> Service<http::Request<B>> for GrpcClusterServer<T>
    where
        T: GrpcCluster,
        B: HttpBody + Send + Sync + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = Never;
        type Future = BoxFuture<Self::Response, Self::Error>;
        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = self.inner.clone();
            match req.uri().path() {
                "/cluster.GrpcCluster/ForwardTransaction" => {
                    #[allow(non_camel_case_types)]
                    struct ForwardTransactionSvc<T: GrpcCluster>(pub Arc<T>);
                    impl<T: GrpcCluster> tonic::server::UnaryService<super::ProtoForwardTxReq>
                        for ForwardTransactionSvc<T>
                    {
                        type Response = super::ProtoForwardTxResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoForwardTxReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).forward_transaction(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = ForwardTransactionSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/cluster.GrpcCluster/StreamTransactions" => {
                    #[allow(non_camel_case_types)]
                    struct StreamTransactionsSvc<T: GrpcCluster>(pub Arc<T>);
                    impl<T: GrpcCluster>
                        tonic::server::ServerStreamingService<super::ProtoStreamTxReq>
                        for StreamTransactionsSvc<T>
                    {
                        type Response = super::ProtoTxFrame;
                        type ResponseStream = T::StreamTransactionsStream;
                        type Future =
                            BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoStreamTxReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).stream_transactions(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1;
                        let inner = inner.0;
                        let method = StreamTransactionsSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.server_streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/cluster.GrpcCluster/LatestSnapshot" => {
                    #[allow(non_camel_case_types)]
                    struct LatestSnapshotSvc<T: GrpcCluster>(pub Arc<T>);
                    impl<T: GrpcCluster> tonic::server::UnaryService<super::ProtoSnapshotReq> for LatestSnapshotSvc<T> {
                        type Response = super::ProtoSnapshotResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoSnapshotReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).latest_snapshot(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = LatestSnapshotSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/cluster.GrpcCluster/Deliver" => {
                    #[allow(non_camel_case_types)]
                    struct DeliverSvc<T: GrpcCluster>(pub Arc<T>);
                    impl<T: GrpcCluster> tonic::server::UnaryService<super::ProtoDeliverReq> for DeliverSvc<T> {
                        type Response = super::ProtoDeliverResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoDeliverReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).deliver(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = DeliverSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/cluster.GrpcCluster/Ping" => {
                    #[allow(non_camel_case_types)]
                    struct PingSvc<T: GrpcCluster>(pub Arc<T>);
                    impl<T: GrpcCluster> tonic::server::UnaryService<super::ProtoPingReq> for PingSvc<T> {
                        type Response = super::ProtoPingResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoPingReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).ping(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = PingSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(tonic::body::BoxBody::empty())
                        .unwrap())
                }),
            }
        }
    }
    impl<T: GrpcCluster> Clone for GrpcClusterServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self { inner }
        }
    }
    impl<T: GrpcCluster> Clone for _Inner<T> {
        fn clone(&self) -> Self {
            Self(self.0.clone(), self.1.clone())
        }
    }
    impl<T: std::fmt::Debug> std::fmt::Debug for _Inner<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }
    impl<T: GrpcCluster> tonic::transport::NamedService for GrpcClusterServer<T> {
        const NAME: &'static str = "cluster.GrpcCluster";
    }
}
