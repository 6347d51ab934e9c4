//! Wiring a cluster node together from its configuration.
mod types;
mod wiring;

pub use types::MemberInfo;
pub use wiring::try_create_node;
pub use wiring::ClusterNode;
pub use wiring::NodeConfig;
pub use wiring::NodeCreationError;
