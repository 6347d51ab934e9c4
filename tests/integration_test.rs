use qrepo::{
    ClusterCredentials, ClusterNode, ClusterOptions, EntityKind, MasterStrategyKind, MemberInfo, NodeConfig,
    RepositoryError, Role, RoleSnapshot, ServerRegistryKind, Tx, TxId, User,
};
use slog::Drain;
use std::error::Error;
use std::net::Ipv4Addr;
use std::path::Path;
use tokio::time::{Duration, Instant};

#[tokio::test]
async fn fixed_master_replicates_writes_made_through_a_slave() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let options = ClusterOptions {
        master_strategy: Some(MasterStrategyKind::Fixed),
        server_registry: Some(ServerRegistryKind::Static),
        fixed_master: Some(node_id(0)),
        ..fast_options()
    };
    let nodes = create_nodes(dir.path(), 3, 7810, &options).await?;

    let master_id = wait_for_stable_cluster(&nodes, Duration::from_secs(20)).await;
    assert_eq!(master_id, node_id(0));

    let slave = &nodes[1].repository;
    let tx_id = slave.exec(Tx::create(user("alice"))).await?;
    // Visible on the slave that forwarded it as soon as exec returns.
    assert_eq!(slave.find(EntityKind::User, "alice").await.unwrap().version(), 0);

    for node in &nodes {
        wait_for_tx(node, tx_id, Duration::from_secs(10)).await;
        assert!(node.repository.find(EntityKind::User, "alice").await.is_some());
    }

    // Conflicts come back to the caller unchanged.
    let duplicate = nodes[2].repository.exec(Tx::create(user("alice"))).await;
    assert!(matches!(duplicate, Err(RepositoryError::Model(_))));

    let status = nodes[0].repository.status();
    assert_eq!(status[0].role, Role::Master);
    assert_eq!(status.len(), 3);
    assert_eq!(nodes[0].repository.slaves().len(), 2);

    let status = nodes[1].repository.status();
    assert_eq!(status[1].id, node_id(0));
    assert!(status[1].connected);

    Ok(())
}

#[tokio::test]
async fn survivors_elect_a_new_master() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let options = fast_options();
    let mut nodes = create_nodes(dir.path(), 3, 7820, &options).await?;

    let master_id = wait_for_stable_cluster(&nodes, Duration::from_secs(20)).await;
    let master_index = nodes
        .iter()
        .position(|node| node.repository.node_id() == master_id)
        .unwrap();
    let tx_id = nodes[master_index].repository.exec(Tx::create(user("bob"))).await?;
    for node in &nodes {
        wait_for_tx(node, tx_id, Duration::from_secs(10)).await;
    }

    println!("Stopping master {}", master_id);
    drop(nodes.remove(master_index));

    let new_master_id = wait_for_stable_cluster(&nodes, Duration::from_secs(30)).await;
    assert_ne!(new_master_id, master_id);

    // The new master carries everything the old one committed.
    let new_master = nodes
        .iter()
        .find(|node| node.repository.node_id() == new_master_id)
        .unwrap();
    assert!(new_master.repository.find(EntityKind::User, "bob").await.is_some());

    let slave = nodes
        .iter()
        .find(|node| node.repository.node_id() != new_master_id)
        .unwrap();
    slave.repository.exec(Tx::create(user("carol"))).await?;
    assert!(slave.repository.find(EntityKind::User, "carol").await.is_some());

    Ok(())
}

#[tokio::test]
async fn slave_write_fails_when_master_is_gone() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let options = ClusterOptions {
        master_strategy: Some(MasterStrategyKind::Fixed),
        server_registry: Some(ServerRegistryKind::Static),
        fixed_master: Some(node_id(0)),
        cluster_timeout: Some(Duration::from_secs(2)),
        rpc_timeout: Some(Duration::from_millis(500)),
        ..fast_options()
    };
    let mut nodes = create_nodes(dir.path(), 3, 7830, &options).await?;
    wait_for_stable_cluster(&nodes, Duration::from_secs(20)).await;

    drop(nodes.remove(0));

    let start = Instant::now();
    let result = nodes[0].repository.exec(Tx::create(user("dave"))).await;
    assert!(
        matches!(
            result,
            Err(RepositoryError::Unavailable(_)) | Err(RepositoryError::NotMaster)
        ),
        "Unexpected result {:?}",
        result
    );
    assert!(start.elapsed() < Duration::from_secs(5));

    Ok(())
}

#[tokio::test]
async fn restarted_node_recovers_its_data() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let options = fast_options();

    let nodes = create_nodes(dir.path(), 1, 7840, &options).await?;
    wait_for_stable_cluster(&nodes, Duration::from_secs(10)).await;
    let mut last = TxId::default();
    for i in 0..100 {
        last = nodes[0].repository.exec(Tx::create(user(&format!("user-{}", i)))).await?;
    }
    drop(nodes);
    // Give the old server time to release its port.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let nodes = create_nodes(dir.path(), 1, 7841, &options).await?;
    let status = nodes[0].repository.local_status().await;
    assert_eq!(status.users, 100);
    assert!(status.next_tx_id > last);

    Ok(())
}

fn fast_options() -> ClusterOptions {
    ClusterOptions {
        stream_heartbeat: Some(Duration::from_millis(200)),
        stream_read_timeout: Some(Duration::from_secs(2)),
        election_timeout: Some(Duration::from_millis(500)),
        election_jitter: Some(Duration::from_millis(200)),
        rpc_timeout: Some(Duration::from_secs(1)),
        cluster_timeout: Some(Duration::from_secs(5)),
        ..ClusterOptions::default()
    }
}

async fn create_nodes(
    directory: &Path,
    num_nodes: usize,
    port_base: u16,
    options: &ClusterOptions,
) -> Result<Vec<ClusterNode>, Box<dyn Error>> {
    let mut nodes = Vec::with_capacity(num_nodes);
    for i in 0..num_nodes {
        let node = qrepo::try_create_node(NodeConfig {
            node_id: node_id(i),
            cluster_members: (0..num_nodes)
                .map(|j| MemberInfo::new(node_id(j), Ipv4Addr::LOCALHOST, port_base + j as u16))
                .collect(),
            data_directory: directory.join(node_id(i)),
            credentials: ClusterCredentials {
                cluster_name: "test-cluster".to_string(),
                password: "secret".to_string(),
            },
            logger: create_root_logger_for_stdout(),
            repository_options: Default::default(),
            log_options: Default::default(),
            cluster_options: options.clone(),
        })
        .await?;
        nodes.push(node);
    }

    Ok(nodes)
}

fn node_id(i: usize) -> String {
    format!("node-{}", i)
}

fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        ..User::default()
    }
}

/// Wait until one node is master and every other node is an up-to-date slave of it.
async fn wait_for_stable_cluster(nodes: &[ClusterNode], timeout: Duration) -> String {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(master_id) = stable_master(nodes) {
            return master_id;
        }
        sleep(Duration::from_millis(100)).await;
    }

    for node in nodes {
        println!("{} is {:?}", node.repository.node_id(), node.repository.role());
    }
    panic!("Cluster did not settle within {:?}", timeout);
}

fn stable_master(nodes: &[ClusterNode]) -> Option<String> {
    let master = nodes
        .iter()
        .find(|node| matches!(node.repository.role(), RoleSnapshot::Master { .. }))?;
    let master_id = master.repository.node_id().to_string();

    let all_following = nodes.iter().all(|node| match node.repository.role() {
        RoleSnapshot::Master { .. } => node.repository.node_id() == master_id,
        RoleSnapshot::Slave { master_id: followed, up } => up && followed == master_id,
        _ => false,
    });
    if all_following {
        Some(master_id)
    } else {
        None
    }
}

async fn wait_for_tx(node: &ClusterNode, tx_id: TxId, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while node.repository.local_status().await.next_tx_id <= tx_id {
        if Instant::now() > deadline {
            panic!("{} never applied tx {}", node.repository.node_id(), tx_id);
        }
        sleep(Duration::from_millis(50)).await;
    }
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}
