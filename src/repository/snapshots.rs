use crate::commitlog::TxId;
use crate::model::Snapshot;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const PREFIX: &str = "snapshot-";
const SUFFIX: &str = ".json";
const TMP_SUFFIX: &str = ".tmp";

/// A snapshot written to a temp file, waiting to be committed or discarded.
#[derive(Debug)]
pub(crate) struct StagedSnapshot {
    pub tx_id: TxId,
    path: PathBuf,
}

/// SnapshotFiles is the directory of `snapshot-<tx id as 16 hex>.json` files. The file with the
/// highest tx id is the latest.
#[derive(Clone, Debug)]
pub(crate) struct SnapshotFiles {
    directory: PathBuf,
    retention: usize,
}

impl SnapshotFiles {
    pub fn open(directory: impl Into<PathBuf>, retention: usize) -> Result<Self, io::Error> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        // Leftovers of writes interrupted by a crash.
        for entry in fs::read_dir(&directory)? {
            let path = entry?.path();
            let is_tmp = path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.starts_with(PREFIX) && name.ends_with(TMP_SUFFIX));
            if is_tmp {
                fs::remove_file(&path)?;
            }
        }

        Ok(SnapshotFiles {
            directory,
            retention: std::cmp::max(retention, 1),
        })
    }

    /// Tx ids of all snapshot files, oldest first.
    pub fn list(&self) -> Result<Vec<TxId>, io::Error> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let name = entry?.file_name();
            let name = match name.to_str() {
                Some(name) => name,
                None => continue,
            };
            if let Some(hex) = name.strip_prefix(PREFIX).and_then(|n| n.strip_suffix(SUFFIX)) {
                if let Some(id) = TxId::from_hex(hex) {
                    ids.push(id);
                }
            }
        }
        ids.sort();

        Ok(ids)
    }

    pub fn load(&self, tx_id: TxId) -> Result<Snapshot, io::Error> {
        let file = File::open(self.path(tx_id))?;
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))?;
        if snapshot.tx_id != tx_id {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Snapshot file for {} contains tx id {}", tx_id, snapshot.tx_id),
            ));
        }

        Ok(snapshot)
    }

    pub fn load_latest(&self) -> Result<Option<Snapshot>, io::Error> {
        match self.list()?.last() {
            Some(id) => self.load(*id).map(Some),
            None => Ok(None),
        }
    }

    /// Write the snapshot to a temp file, rename it into place, then prune old snapshots
    /// beyond the retention count.
    pub fn write(&self, snapshot: &Snapshot) -> Result<TxId, io::Error> {
        let tmp_path = self.path(snapshot.tx_id).with_extension("json.tmp");
        write_synced(&tmp_path, snapshot)?;
        self.commit(StagedSnapshot {
            tx_id: snapshot.tx_id,
            path: tmp_path,
        })
    }

    /// First half of `write`: the snapshot is durable in a temp file tagged with `generation`
    /// but is not visible to `list` or `load_latest` until committed.
    pub fn stage(&self, snapshot: &Snapshot, generation: u64) -> Result<StagedSnapshot, io::Error> {
        let path = self
            .path(snapshot.tx_id)
            .with_extension(format!("json.{}{}", generation, TMP_SUFFIX));
        write_synced(&path, snapshot)?;

        Ok(StagedSnapshot {
            tx_id: snapshot.tx_id,
            path,
        })
    }

    pub fn commit(&self, staged: StagedSnapshot) -> Result<TxId, io::Error> {
        fs::rename(&staged.path, self.path(staged.tx_id))?;
        self.prune()?;
        Ok(staged.tx_id)
    }

    pub fn discard(&self, staged: StagedSnapshot) -> Result<(), io::Error> {
        match fs::remove_file(&staged.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Write the snapshot and delete every other snapshot file. Used when the local history
    /// is replaced wholesale, where older and newer files would describe a different history.
    pub fn replace_all(&self, snapshot: &Snapshot) -> Result<TxId, io::Error> {
        let tx_id = self.write(snapshot)?;
        for id in self.list()? {
            if id != tx_id {
                self.remove(id)?;
            }
        }

        Ok(tx_id)
    }

    pub fn remove(&self, tx_id: TxId) -> Result<(), io::Error> {
        match fs::remove_file(self.path(tx_id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn prune(&self) -> Result<(), io::Error> {
        let ids = self.list()?;
        if ids.len() > self.retention {
            for id in &ids[..ids.len() - self.retention] {
                self.remove(*id)?;
            }
        }

        Ok(())
    }

    fn path(&self, tx_id: TxId) -> PathBuf {
        snapshot_path(&self.directory, tx_id)
    }
}

fn write_synced(path: &Path, snapshot: &Snapshot) -> Result<(), io::Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, snapshot)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

fn snapshot_path(directory: &Path, tx_id: TxId) -> PathBuf {
    directory.join(format!("{}{}{}", PREFIX, tx_id.to_hex(), SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;

    fn snapshot(id: u64) -> Snapshot {
        Snapshot {
            tx_id: TxId::new(id),
            users: vec![User {
                id: format!("user-{}", id),
                ..User::default()
            }],
            ..Snapshot::default()
        }
    }

    #[test]
    fn file_names_are_hex_tx_ids() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::open(dir.path(), 3).unwrap();
        files.write(&snapshot(0x1f)).unwrap();

        assert!(dir.path().join("snapshot-000000000000001f.json").exists());
        assert_eq!(files.load(TxId::new(0x1f)).unwrap(), snapshot(0x1f));
    }

    #[test]
    fn latest_wins_and_old_files_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::open(dir.path(), 2).unwrap();
        assert_eq!(files.load_latest().unwrap(), None);

        for id in [10u64, 300, 20, 4000].iter() {
            files.write(&snapshot(*id)).unwrap();
        }

        assert_eq!(files.list().unwrap(), vec![TxId::new(300), TxId::new(4000)]);
        assert_eq!(files.load_latest().unwrap(), Some(snapshot(4000)));
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        fs::write(dir.path().join("snapshot-xyz.json"), b"{}").unwrap();
        let files = SnapshotFiles::open(dir.path(), 2).unwrap();

        assert!(files.list().unwrap().is_empty());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::open(dir.path(), 2).unwrap();
        fs::write(snapshot_path(dir.path(), TxId::new(5)), b"{not json").unwrap();

        assert!(files.load_latest().is_err());
    }

    #[test]
    fn replace_all_drops_other_histories() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::open(dir.path(), 5).unwrap();
        files.write(&snapshot(100)).unwrap();
        files.write(&snapshot(900)).unwrap();

        files.replace_all(&snapshot(50)).unwrap();

        assert_eq!(files.list().unwrap(), vec![TxId::new(50)]);
    }

    #[test]
    fn staged_snapshot_is_invisible_until_committed() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::open(dir.path(), 1).unwrap();
        files.write(&snapshot(10)).unwrap();

        let staged = files.stage(&snapshot(20), 3).unwrap();
        assert_eq!(files.list().unwrap(), vec![TxId::new(10)]);

        files.commit(staged).unwrap();
        assert_eq!(files.list().unwrap(), vec![TxId::new(20)]);

        let staged = files.stage(&snapshot(30), 4).unwrap();
        files.discard(staged).unwrap();
        assert_eq!(files.list().unwrap(), vec![TxId::new(20)]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn open_removes_interrupted_writes() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::open(dir.path(), 2).unwrap();
        let staged = files.stage(&snapshot(20), 1).unwrap();
        drop(staged);

        let files = SnapshotFiles::open(dir.path(), 2).unwrap();
        assert!(files.list().unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
