mod client;
mod server;
mod service;
mod shutdown;

pub use client::ClusterCredentials;

pub(crate) use client::ClientError;
pub(crate) use client::ClusterClient;
pub(crate) use client::PeerClients;
pub(crate) use client::TxStream;
pub(crate) use server::RpcServer;
pub(crate) use service::ClusterService;
pub(crate) use service::ForwardError;
pub(crate) use service::PingInfo;
pub(crate) use service::StreamFrame;
pub(crate) use shutdown::shutdown_signal;
pub(crate) use shutdown::RpcServerShutdownHandle;
pub(crate) use shutdown::RpcServerShutdownSignal;
