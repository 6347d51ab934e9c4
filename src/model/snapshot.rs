use crate::commitlog::TxId;
use crate::model::{Database, EntityKind, ModelObject, Queue, User};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io;
use std::io::{Read, Write};

/// Snapshot is the full repository state after applying every transaction with an id lower
/// than `tx_id` to an empty state.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tx_id: TxId,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub databases: Vec<Database>,
    #[serde(default)]
    pub queues: Vec<Queue>,
    /// Most recent forwarded requests and the tx they committed as, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<CommittedRequest>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedRequest {
    pub request_id: String,
    pub tx_id: TxId,
}

impl Snapshot {
    pub fn empty(tx_id: TxId) -> Self {
        Snapshot {
            tx_id,
            ..Snapshot::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.databases.is_empty() && self.queues.is_empty()
    }

    pub fn objects(&self, kind: EntityKind) -> Vec<ModelObject> {
        match kind {
            EntityKind::User => self.users.iter().cloned().map(ModelObject::from).collect(),
            EntityKind::Database => self.databases.iter().cloned().map(ModelObject::from).collect(),
            EntityKind::Queue => self.queues.iter().cloned().map(ModelObject::from).collect(),
        }
    }

    /// Gzip compressed JSON, the format a slave downloads.
    pub fn to_gzip_json(&self) -> io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, self)?;
        encoder.flush()?;
        encoder.finish()
    }

    pub fn from_gzip_json(bytes: &[u8]) -> io::Result<Self> {
        let mut json = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut json)?;
        let snapshot = serde_json::from_slice(&json)?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_transfer_format() {
        let snapshot = Snapshot {
            tx_id: TxId::new(42),
            users: vec![User {
                id: "alice".into(),
                version: 2,
                ..User::default()
            }],
            databases: vec![],
            queues: vec![Queue {
                id: "db1/q1".into(),
                database: "db1".into(),
                max_size: 1024,
                ..Queue::default()
            }],
            requests: vec![CommittedRequest {
                request_id: "node-1-1700000000000-00000000000000ff".into(),
                tx_id: TxId::new(24),
            }],
        };

        let bytes = snapshot.to_gzip_json().unwrap();
        // gzip magic
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert_eq!(Snapshot::from_gzip_json(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn snapshots_without_requests_still_load() {
        let snapshot: Snapshot = serde_json::from_str(r#"{"txId":7,"users":[]}"#).unwrap();
        assert_eq!(snapshot, Snapshot::empty(TxId::new(7)));
    }

    #[test]
    fn garbage_is_an_io_error() {
        assert!(Snapshot::from_gzip_json(b"not gzip").is_err());
    }
}
