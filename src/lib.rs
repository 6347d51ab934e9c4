mod api;
mod backoff;
mod cluster;
mod commitlog;
mod model;
mod paxos;
mod repository;
mod store;
mod time;
mod transport;
mod grpc {
    include!("../generated/cluster.rs");
}

pub use api::try_create_node;
pub use api::ClusterNode;
pub use api::MemberInfo;
pub use api::NodeConfig;
pub use api::NodeCreationError;
pub use backoff::BackoffKind;
pub use backoff::BackoffPolicy;
pub use cluster::ClusterOptions;
pub use cluster::ClusterSetupError;
pub use cluster::MasterStrategyKind;
pub use cluster::ReplicatedRepository;
pub use cluster::RepositoryError;
pub use cluster::Role;
pub use cluster::RoleChangeListener;
pub use cluster::RoleSnapshot;
pub use cluster::ServerRegistryKind;
pub use cluster::ServerStatus;
pub use cluster::SlaveRecord;
pub use commitlog::InMemoryLog;
pub use commitlog::Log;
pub use commitlog::LogCursor;
pub use commitlog::LogRecord;
pub use commitlog::SegmentedDiskLog;
pub use commitlog::StorageConfig;
pub use commitlog::TxId;
pub use model::CommittedRequest;
pub use model::Database;
pub use model::EntityKind;
pub use model::ModelObject;
pub use model::Queue;
pub use model::Snapshot;
pub use model::Tx;
pub use model::TxOperation;
pub use model::User;
pub use model::Versioned;
pub use paxos::Paxos;
pub use paxos::PaxosError;
pub use paxos::PaxosMessage;
pub use paxos::PaxosTransport;
pub use paxos::SequenceGenerator;
pub use paxos::SequenceNo;
pub use repository::ExecError;
pub use repository::LocalStatus;
pub use repository::LogOptions;
pub use repository::RepositoryEvent;
pub use repository::RepositoryOptions;
pub use repository::StartupError;
pub use repository::WaitError;
pub use store::ModelError;
pub use store::VersionedStore;
pub use transport::ClusterCredentials;

// `crate::{root_mod}` holds no code, only `mod` and `pub use` statements. Modules are never
// `pub`; everything public is exported through an individual use statement.
