use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Default)]
pub struct RepositoryOptions {
    /// How long after a write an asynchronous snapshot is taken.
    pub snapshot_interval: Option<Duration>,
    /// Number of snapshot files kept on disk.
    pub snapshot_retention: Option<usize>,
    /// fsync the log after every local write.
    pub sync_writes: Option<bool>,
    /// Number of recent request ids remembered for de-duplicating retried writes.
    pub request_ledger_capacity: Option<usize>,
}

#[derive(Clone, Debug)]
pub(crate) struct RepositoryOptionsValidated {
    pub snapshot_interval: Duration,
    pub snapshot_retention: usize,
    pub sync_writes: bool,
    pub request_ledger_capacity: usize,
}

impl RepositoryOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.snapshot_retention == 0 {
            return Err("Snapshot retention must keep at least one snapshot");
        }
        if self.snapshot_interval == Duration::from_secs(0) {
            return Err("Snapshot interval must be greater than zero");
        }

        Ok(())
    }
}

impl TryFrom<RepositoryOptions> for RepositoryOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RepositoryOptions) -> Result<Self, Self::Error> {
        let values = RepositoryOptionsValidated {
            snapshot_interval: options.snapshot_interval.unwrap_or(Duration::from_secs(60)),
            snapshot_retention: options.snapshot_retention.unwrap_or(3),
            sync_writes: options.sync_writes.unwrap_or(true),
            request_ledger_capacity: options.request_ledger_capacity.unwrap_or(10_000),
        };

        values.validate()?;
        Ok(values)
    }
}

#[derive(Clone, Default)]
pub struct LogOptions {
    pub segment_size: Option<u64>,
    pub max_size: Option<u64>,
}

#[derive(Clone, Debug)]
pub(crate) struct LogOptionsValidated {
    pub segment_size: u64,
    pub max_size: u64,
}

impl TryFrom<LogOptions> for LogOptionsValidated {
    type Error = &'static str;

    fn try_from(options: LogOptions) -> Result<Self, Self::Error> {
        let values = LogOptionsValidated {
            segment_size: options.segment_size.unwrap_or(8 * 1024 * 1024),
            max_size: options.max_size.unwrap_or(64 * 1024 * 1024),
        };

        if values.segment_size == 0 {
            return Err("Log segment size must be greater than zero");
        }
        if values.segment_size > values.max_size {
            return Err("Log segment size must not exceed the maximum log size");
        }

        Ok(values)
    }
}
