use crate::api::types::MemberInfo;
use crate::cluster::{self, ClusterConfig, ClusterOptions, ClusterOptionsValidated, ClusterSetupError, MasterStrategyKind};
use crate::commitlog::{SegmentedDiskLog, StorageConfig};
use crate::repository::{
    self, LocalRepository, LogOptions, LogOptionsValidated, RepositoryOptions, RepositoryOptionsValidated,
    SnapshotFiles, StartupError,
};
use crate::transport::{self, ClientError, ClusterCredentials, PeerClients, RpcServer, RpcServerShutdownHandle};
use crate::ReplicatedRepository;
use std::convert::TryFrom;
use std::io;
use std::path::PathBuf;
use tokio_util::sync::{CancellationToken, DropGuard};

const ACTOR_QUEUE_SIZE: usize = 64;

pub struct NodeConfig {
    pub node_id: String,
    pub cluster_members: Vec<MemberInfo>,
    /// Holds this node's `log/` and `snapshots/` directories.
    pub data_directory: PathBuf,
    /// Every member must be configured with the same credentials. The cluster name also
    /// identifies the repository being replicated.
    pub credentials: ClusterCredentials,
    pub logger: slog::Logger,
    pub repository_options: RepositoryOptions,
    pub log_options: LogOptions,
    pub cluster_options: ClusterOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeCreationError {
    #[error("Illegal options for configuring node: {0}")]
    IllegalOptions(String),

    #[error("My node ID not in cluster config")]
    MeNotInCluster,

    #[error("Transaction log initialization failure")]
    LogInitialization(#[source] io::Error),

    #[error("Snapshot directory initialization failure")]
    SnapshotInitialization(#[source] io::Error),

    #[error("Unable to recover local repository")]
    Recovery(#[from] StartupError),

    #[error("Invalid cluster info")]
    InvalidClusterInfo(#[from] ClientError),

    #[error("Unable to set up cluster")]
    Cluster(#[from] ClusterSetupError),
}

/// A running cluster node. Dropping it stops the node's RPC server and cluster controller.
pub struct ClusterNode {
    pub repository: ReplicatedRepository,
    _server_shutdown: RpcServerShutdownHandle,
    _controller_shutdown: DropGuard,
}

pub async fn try_create_node(config: NodeConfig) -> Result<ClusterNode, NodeCreationError> {
    let root_logger = config.logger.new(slog::o!("NodeId" => config.node_id.clone()));

    let repository_options = RepositoryOptionsValidated::try_from(config.repository_options)
        .map_err(|e| NodeCreationError::IllegalOptions(e.to_string()))?;
    let log_options = LogOptionsValidated::try_from(config.log_options)
        .map_err(|e| NodeCreationError::IllegalOptions(e.to_string()))?;
    let cluster_options = ClusterOptionsValidated::try_from(config.cluster_options)
        .map_err(|e| NodeCreationError::IllegalOptions(e.to_string()))?;
    check_master_is_member(&cluster_options, &config.cluster_members)?;

    let my_member_info = my_info(&config.node_id, &config.cluster_members).ok_or(NodeCreationError::MeNotInCluster)?;
    let my_server_addr = my_member_info.socket_addr();

    let log = SegmentedDiskLog::open(StorageConfig {
        directory: config.data_directory.join("log"),
        segment_size: log_options.segment_size,
        max_size: log_options.max_size,
    })
    .map_err(NodeCreationError::LogInitialization)?;
    let snapshots = SnapshotFiles::open(
        config.data_directory.join("snapshots"),
        repository_options.snapshot_retention,
    )
    .map_err(NodeCreationError::SnapshotInitialization)?;

    let snapshot_interval = repository_options.snapshot_interval;
    let local = LocalRepository::recover(root_logger.clone(), log, snapshots, repository_options)?;
    let (local_client, repository_actor) =
        repository::create_actor(root_logger.clone(), ACTOR_QUEUE_SIZE, local, snapshot_interval);
    tokio::spawn(repository_actor.run_event_loop());

    let peers = PeerClients::new(
        &config.node_id,
        config
            .cluster_members
            .iter()
            .map(|member| (member.node_id.clone(), member.socket_addr())),
        &config.credentials,
        cluster_options.rpc_timeout,
    )?;

    let controller_shutdown = CancellationToken::new();
    let (repository, shared, controller) = cluster::create(
        ClusterConfig {
            logger: root_logger.clone(),
            self_id: config.node_id.clone(),
            repository_id: config.credentials.cluster_name.clone(),
            members: config.cluster_members.into_iter().map(|member| member.node_id).collect(),
            options: cluster_options,
            local: local_client,
            peers,
        },
        controller_shutdown.clone(),
    )?;

    let (server_shutdown_handle, server_shutdown_signal) = transport::shutdown_signal();
    let server = RpcServer::new(root_logger.clone(), &config.credentials, shared);
    tokio::spawn(server.run(my_server_addr, server_shutdown_signal));

    tokio::spawn(controller.run_event_loop());

    Ok(ClusterNode {
        repository,
        _server_shutdown: server_shutdown_handle,
        _controller_shutdown: controller_shutdown.drop_guard(),
    })
}

fn my_info<'a>(node_id: &str, cluster_members: &'a [MemberInfo]) -> Option<&'a MemberInfo> {
    cluster_members.iter().find(|member| member.node_id == node_id)
}

fn check_master_is_member(options: &ClusterOptionsValidated, members: &[MemberInfo]) -> Result<(), NodeCreationError> {
    let master = match &options.fixed_master {
        Some(master) => master,
        None => return Ok(()),
    };
    if my_info(master, members).is_none() {
        let role = match options.master_strategy {
            MasterStrategyKind::Fixed => "Fixed",
            MasterStrategyKind::Paxos => "Preferred",
        };
        return Err(NodeCreationError::IllegalOptions(format!(
            "{} master '{}' is not a cluster member",
            role, master
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_logger;
    use std::net::Ipv4Addr;

    fn config(node_id: &str, fixed_master: Option<&str>) -> NodeConfig {
        NodeConfig {
            node_id: node_id.to_string(),
            cluster_members: vec![MemberInfo::new("a", Ipv4Addr::LOCALHOST, 1)],
            data_directory: PathBuf::from("unused"),
            credentials: ClusterCredentials {
                cluster_name: "c".into(),
                password: "p".into(),
            },
            logger: test_logger(),
            repository_options: RepositoryOptions::default(),
            log_options: LogOptions::default(),
            cluster_options: ClusterOptions {
                fixed_master: fixed_master.map(String::from),
                ..ClusterOptions::default()
            },
        }
    }

    #[tokio::test]
    async fn rejects_unknown_node() {
        let result = try_create_node(config("z", None)).await;
        assert!(matches!(result, Err(NodeCreationError::MeNotInCluster)));
    }

    #[tokio::test]
    async fn rejects_master_outside_cluster() {
        let result = try_create_node(config("a", Some("b"))).await;
        assert!(matches!(result, Err(NodeCreationError::IllegalOptions(_))));
    }
}
