use crate::backoff::BackoffPolicy;
use std::convert::TryFrom;
use std::str::FromStr;
use tokio::time::Duration;

/// How the cluster decides who is master.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MasterStrategyKind {
    /// The configured `fixed_master` is always master.
    Fixed,
    /// Nodes agree on a master through Paxos. A configured `fixed_master` is only preferred.
    Paxos,
}

impl FromStr for MasterStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(MasterStrategyKind::Fixed),
            "paxos" => Ok(MasterStrategyKind::Paxos),
            _ => Err(format!("Unknown master strategy '{}'", s)),
        }
    }
}

/// How a node finds out which cluster members take part in an election.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ServerRegistryKind {
    /// Every configured member.
    Static,
    /// Configured members that answer a ping, plus this node.
    Probing,
}

impl FromStr for ServerRegistryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(ServerRegistryKind::Static),
            "probing" => Ok(ServerRegistryKind::Probing),
            _ => Err(format!("Unknown server registry '{}'", s)),
        }
    }
}

#[derive(Clone, Default)]
pub struct ClusterOptions {
    pub master_strategy: Option<MasterStrategyKind>,
    pub server_registry: Option<ServerRegistryKind>,
    /// Master for `MasterStrategyKind::Fixed`, preferred master for Paxos.
    pub fixed_master: Option<String>,

    /// Upper bound on a write forwarded by a slave, including waiting for it to be applied locally.
    pub cluster_timeout: Option<Duration>,
    pub rpc_timeout: Option<Duration>,
    /// How often an idle master stream sends a heartbeat.
    pub stream_heartbeat: Option<Duration>,
    /// A slave that hears nothing for this long treats the stream as broken.
    pub stream_read_timeout: Option<Duration>,
    /// How long a Paxos round may take before this node proposes again.
    pub election_timeout: Option<Duration>,
    /// Random delay added before proposing, so nodes rarely duel.
    pub election_jitter: Option<Duration>,

    pub slave_tx_download_backoff: Option<BackoffPolicy>,
    pub slave_snapshot_download_backoff: Option<BackoffPolicy>,
    pub slave_write_backoff: Option<BackoffPolicy>,
}

#[derive(Clone, Debug)]
pub(crate) struct ClusterOptionsValidated {
    pub master_strategy: MasterStrategyKind,
    pub server_registry: ServerRegistryKind,
    pub fixed_master: Option<String>,
    pub cluster_timeout: Duration,
    pub rpc_timeout: Duration,
    pub stream_heartbeat: Duration,
    pub stream_read_timeout: Duration,
    pub election_timeout: Duration,
    pub election_jitter: Duration,
    pub slave_tx_download_backoff: BackoffPolicy,
    pub slave_snapshot_download_backoff: BackoffPolicy,
    pub slave_write_backoff: BackoffPolicy,
}

impl ClusterOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.master_strategy == MasterStrategyKind::Fixed && self.fixed_master.is_none() {
            return Err("Fixed master strategy requires a fixed master");
        }
        if self.rpc_timeout > self.cluster_timeout {
            return Err("RPC timeout must not exceed the cluster timeout");
        }
        if self.stream_read_timeout <= self.stream_heartbeat {
            return Err("Stream read timeout must be greater than the stream heartbeat");
        }
        if self.election_jitter >= self.election_timeout {
            return Err("Election jitter must be less than the election timeout");
        }
        for policy in [
            &self.slave_tx_download_backoff,
            &self.slave_snapshot_download_backoff,
            &self.slave_write_backoff,
        ]
        .iter()
        {
            if policy.base > policy.max_delay {
                return Err("Backoff base delay must not exceed its max delay");
            }
            if policy.max_failures == 0 {
                return Err("Backoff must allow at least one failure");
            }
        }

        Ok(())
    }
}

impl TryFrom<ClusterOptions> for ClusterOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ClusterOptions) -> Result<Self, Self::Error> {
        let values = ClusterOptionsValidated {
            master_strategy: options.master_strategy.unwrap_or(MasterStrategyKind::Paxos),
            server_registry: options.server_registry.unwrap_or(ServerRegistryKind::Probing),
            fixed_master: options.fixed_master,
            cluster_timeout: options.cluster_timeout.unwrap_or(Duration::from_secs(10)),
            rpc_timeout: options.rpc_timeout.unwrap_or(Duration::from_secs(3)),
            stream_heartbeat: options.stream_heartbeat.unwrap_or(Duration::from_secs(1)),
            stream_read_timeout: options.stream_read_timeout.unwrap_or(Duration::from_secs(5)),
            election_timeout: options.election_timeout.unwrap_or(Duration::from_secs(2)),
            election_jitter: options.election_jitter.unwrap_or(Duration::from_millis(500)),
            slave_tx_download_backoff: options
                .slave_tx_download_backoff
                .unwrap_or_else(|| BackoffPolicy::exponential(Duration::from_millis(500), Duration::from_secs(8))),
            slave_snapshot_download_backoff: options
                .slave_snapshot_download_backoff
                .unwrap_or_else(|| BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(16))),
            slave_write_backoff: options
                .slave_write_backoff
                .unwrap_or_else(|| BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(2))),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ClusterOptionsValidated::try_from(ClusterOptions::default()).unwrap();
        assert_eq!(options.cluster_timeout, Duration::from_secs(10));
        assert_eq!(options.master_strategy, MasterStrategyKind::Paxos);
        assert_eq!(options.server_registry, ServerRegistryKind::Probing);
    }

    #[test]
    fn rejects_inconsistent_values() {
        let options = ClusterOptions {
            stream_heartbeat: Some(Duration::from_secs(5)),
            stream_read_timeout: Some(Duration::from_secs(5)),
            ..ClusterOptions::default()
        };
        assert!(ClusterOptionsValidated::try_from(options).is_err());

        let options = ClusterOptions {
            master_strategy: Some(MasterStrategyKind::Fixed),
            ..ClusterOptions::default()
        };
        assert!(ClusterOptionsValidated::try_from(options).is_err());

        let options = ClusterOptions {
            slave_write_backoff: Some(BackoffPolicy::fixed(Duration::from_secs(3), Duration::from_secs(1))),
            ..ClusterOptions::default()
        };
        assert!(ClusterOptionsValidated::try_from(options).is_err());

        let options = ClusterOptions {
            slave_tx_download_backoff: Some(
                BackoffPolicy::fixed(Duration::from_millis(100), Duration::from_secs(1)).with_max_failures(0),
            ),
            ..ClusterOptions::default()
        };
        assert!(ClusterOptionsValidated::try_from(options).is_err());
    }

    #[test]
    fn kinds_from_str() {
        assert_eq!("Paxos".parse::<MasterStrategyKind>().unwrap(), MasterStrategyKind::Paxos);
        assert_eq!("fixed".parse::<MasterStrategyKind>().unwrap(), MasterStrategyKind::Fixed);
        assert_eq!("STATIC".parse::<ServerRegistryKind>().unwrap(), ServerRegistryKind::Static);
        assert!("zookeeper".parse::<ServerRegistryKind>().is_err());
    }
}
