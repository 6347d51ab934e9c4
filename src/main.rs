use qrepo::{ClusterCredentials, ClusterNode, ClusterOptions, MemberInfo, NodeConfig, RoleSnapshot, Tx, User};
use slog::Drain;
use std::error::Error;
use std::net::Ipv4Addr;
use tokio::time::Duration;

const PORT_BASE: u16 = 7710;
const NUM_NODES: usize = 3;

/// Starts a three node cluster on localhost, writes a user through a slave and prints what
/// every node sees.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger();
    let data = std::env::temp_dir().join("qrepo-demo");

    let mut nodes = Vec::with_capacity(NUM_NODES);
    for i in 0..NUM_NODES {
        let node = qrepo::try_create_node(NodeConfig {
            node_id: node_id(i),
            cluster_members: (0..NUM_NODES)
                .map(|j| MemberInfo::new(node_id(j), Ipv4Addr::LOCALHOST, PORT_BASE + j as u16))
                .collect(),
            data_directory: data.join(node_id(i)),
            credentials: ClusterCredentials {
                cluster_name: "demo".to_string(),
                password: "demo-password".to_string(),
            },
            logger: logger.clone(),
            repository_options: Default::default(),
            log_options: Default::default(),
            cluster_options: ClusterOptions::default(),
        })
        .await?;
        nodes.push(node);
    }

    let slave = wait_for_slave(&nodes).await.ok_or("No node became an active slave")?;
    let tx_id = slave
        .repository
        .exec(Tx::create(User {
            id: format!("user-{}", chrono::Utc::now().timestamp_millis()),
            ..User::default()
        }))
        .await?;
    slog::info!(logger, "Wrote tx {} through {}", tx_id, slave.repository.node_id());

    tokio::time::sleep(Duration::from_secs(1)).await;
    for node in &nodes {
        let status = node.repository.local_status().await;
        slog::info!(
            logger,
            "{} is {}: {} users, next tx {}",
            node.repository.node_id(),
            node.repository.role().role(),
            status.users,
            status.next_tx_id
        );
    }

    Ok(())
}

async fn wait_for_slave(nodes: &[ClusterNode]) -> Option<&ClusterNode> {
    for _ in 0..60 {
        let slave = nodes
            .iter()
            .find(|node| matches!(node.repository.role(), RoleSnapshot::Slave { up: true, .. }));
        if slave.is_some() {
            return slave;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    None
}

fn node_id(i: usize) -> String {
    format!("node-{}", i)
}

fn create_root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
