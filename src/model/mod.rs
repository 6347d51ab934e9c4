//! Versioned entities tracked by the repository and the transactions that mutate them.
mod objects;
mod snapshot;
mod tx;

pub use objects::Database;
pub use objects::EntityKind;
pub use objects::ModelObject;
pub use objects::Queue;
pub use objects::User;
pub use objects::Versioned;
pub use snapshot::CommittedRequest;
pub use snapshot::Snapshot;
pub use tx::Tx;
pub use tx::TxOperation;
