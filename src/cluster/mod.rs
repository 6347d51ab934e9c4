//! Master/slave replication of the repository: electing a master, forwarding writes to it and
//! streaming its transactions to every slave.
mod controller;
mod downloaders;
mod master_strategy;
mod membership;
mod options;
mod replicated;
mod status;

pub use controller::ClusterSetupError;
pub use options::ClusterOptions;
pub use options::MasterStrategyKind;
pub use options::ServerRegistryKind;
pub use replicated::ReplicatedRepository;
pub use replicated::RepositoryError;
pub use status::Role;
pub use status::RoleChangeListener;
pub use status::RoleSnapshot;
pub use status::ServerStatus;
pub use status::SlaveRecord;

pub(crate) use controller::create;
pub(crate) use controller::ClusterConfig;
pub(crate) use options::ClusterOptionsValidated;
