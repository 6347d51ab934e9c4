use crate::backoff::BackoffPolicy;
use crate::cluster::status::ContactTracker;
use crate::repository::{ExecError, RepositoryClient};
use crate::transport::{ClusterClient, StreamFrame};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a download loop stopped for good.
#[derive(Debug, Eq, PartialEq)]
pub(super) enum DownloadEnd {
    Cancelled,
    /// The master told us it is no longer master.
    NotMaster,
    /// Backoff budget exhausted.
    GaveUp(String),
}

/// SnapshotDownloader fetches the master's latest snapshot and installs it locally.
pub(super) struct SnapshotDownloader {
    pub logger: slog::Logger,
    pub client: ClusterClient,
    pub local: RepositoryClient,
    pub backoff: BackoffPolicy,
    pub contact: Arc<ContactTracker>,
    pub cancel: CancellationToken,
}

impl SnapshotDownloader {
    pub async fn run(&self) -> Result<(), DownloadEnd> {
        let mut failures = 0;
        loop {
            let downloaded = tokio::select! {
                result = self.client.latest_snapshot() => result,
                _ = self.cancel.cancelled() => return Err(DownloadEnd::Cancelled),
            };

            let error = match downloaded {
                Ok(snapshot) => {
                    self.contact.contacted();
                    let tx_id = snapshot.tx_id;
                    match self.local.install_snapshot(snapshot).await {
                        Ok(()) => {
                            slog::info!(self.logger, "Installed snapshot {} from {}", tx_id, self.client.peer_id());
                            return Ok(());
                        }
                        Err(e) => format!("Unable to install snapshot {}: {}", tx_id, e),
                    }
                }
                Err(e) => format!("Snapshot download from {} failed: {}", self.client.peer_id(), e),
            };

            failures += 1;
            slog::warn!(self.logger, "{} (attempt {})", error, failures);
            self.contact.failed(error.clone());
            if self.backoff.is_exhausted(failures) {
                return Err(DownloadEnd::GaveUp(error));
            }
            if !self.backoff.sleep(failures, None, &self.cancel).await {
                return Err(DownloadEnd::Cancelled);
            }
        }
    }
}

enum SessionEnd {
    Cancelled,
    NotMaster,
    Resync(String),
    Failed(String),
}

/// TxDownloader follows the master's transaction stream and applies it locally, for as long
/// as the master keeps serving it.
pub(super) struct TxDownloader {
    pub logger: slog::Logger,
    pub client: ClusterClient,
    pub local: RepositoryClient,
    pub repository_id: String,
    pub backoff: BackoffPolicy,
    pub read_timeout: Duration,
    pub contact: Arc<ContactTracker>,
    pub snapshots: SnapshotDownloader,
    pub cancel: CancellationToken,
}

impl TxDownloader {
    pub async fn run(&self) -> DownloadEnd {
        let mut failures = 0;
        loop {
            match self.session(&mut failures).await {
                SessionEnd::Cancelled => return DownloadEnd::Cancelled,
                SessionEnd::NotMaster => return DownloadEnd::NotMaster,
                SessionEnd::Resync(reason) => {
                    slog::warn!(self.logger, "Resynchronising from snapshot: {}", reason);
                    if let Err(end) = self.snapshots.run().await {
                        return end;
                    }
                }
                SessionEnd::Failed(error) => {
                    failures += 1;
                    slog::warn!(self.logger, "Tx stream failed: {} (attempt {})", error, failures);
                    self.contact.failed(error.clone());
                    if self.backoff.is_exhausted(failures) {
                        return DownloadEnd::GaveUp(error);
                    }
                    if !self.backoff.sleep(failures, None, &self.cancel).await {
                        return DownloadEnd::Cancelled;
                    }
                }
            }
        }
    }

    // One stream from open to failure. Any frame received resets `failures`.
    async fn session(&self, failures: &mut u32) -> SessionEnd {
        let from = self.local.status().await.next_tx_id;
        let opened = tokio::select! {
            result = self.client.stream_transactions(from, &self.repository_id) => result,
            _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return SessionEnd::Failed(format!("Unable to open tx stream: {}", e)),
        };
        slog::debug!(self.logger, "Streaming transactions from {} at {}", self.client.peer_id(), from);

        loop {
            let next = tokio::select! {
                result = tokio::time::timeout(self.read_timeout, stream.next()) => result,
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
            };
            let frame = match next {
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => return SessionEnd::Failed("Master closed the tx stream".to_string()),
                Ok(Err(e)) => return SessionEnd::Failed(e.to_string()),
                Err(_) => {
                    return SessionEnd::Failed(format!("Nothing received from master for {:?}", self.read_timeout))
                }
            };

            *failures = 0;
            self.contact.contacted();

            match frame {
                StreamFrame::Tx(record) => {
                    let tx_id = record.id;
                    match self.local.apply_replicated(record).await {
                        Ok(_) => {}
                        Err(ExecError::OutOfSequence { expected, actual }) => {
                            return SessionEnd::Resync(format!("Expected tx {} but master sent {}", expected, actual));
                        }
                        Err(ExecError::Io(e)) => return SessionEnd::Failed(format!("Local write failed: {}", e)),
                        // Logged and skipped, the master made the same decision.
                        Err(e) => slog::warn!(self.logger, "Skipping replicated tx {}: {}", tx_id, e),
                    }
                }
                StreamFrame::Heartbeat(_) => {}
                StreamFrame::NotMaster => return SessionEnd::NotMaster,
                StreamFrame::ResyncRequired(reason) => return SessionEnd::Resync(reason),
            }
        }
    }
}
