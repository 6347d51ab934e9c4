//! Single node, crash recoverable transaction application: the stores, the transaction log and
//! snapshot files behind an actor.
mod actor;
mod local;
mod options;
mod snapshot_timer;
mod snapshots;
mod tx_monitor;

pub use local::ExecError;
pub use local::LocalStatus;
pub use local::RepositoryEvent;
pub use local::StartupError;
pub use options::LogOptions;
pub use options::RepositoryOptions;
pub use tx_monitor::WaitError;

pub(crate) use actor::create as create_actor;
pub(crate) use actor::RepositoryClient;
pub(crate) use local::LocalRepository;
pub(crate) use options::LogOptionsValidated;
pub(crate) use options::RepositoryOptionsValidated;
pub(crate) use snapshots::SnapshotFiles;
pub(crate) use tx_monitor::TailItem;
pub(crate) use tx_monitor::TxTail;

#[cfg(test)]
pub(crate) use actor::create_with_clock as create_actor_with_clock;
#[cfg(test)]
pub(crate) use local::tests::test_logger;
