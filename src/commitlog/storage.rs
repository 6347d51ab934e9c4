use crate::commitlog::record;
use crate::commitlog::{Log, LogCursor, LogRecord, TxId};
use bytes::Bytes;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const SEGMENT_SUFFIX: &str = ".seg";

// Generic config for initializing a disk-based commit log, independent of data model.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub directory: PathBuf,
    /// A new segment file is started once the active one would grow past this.
    pub segment_size: u64,
    /// Oldest segments are deleted while the log is bigger than this.
    pub max_size: u64,
}

/// SegmentedDiskLog stores records in segment files named after the id of their first record.
/// See `record.rs` for the record layout.
pub struct SegmentedDiskLog {
    config: StorageConfig,
    segments: Vec<Segment>,
    active: File,
}

#[derive(Copy, Clone, Debug)]
struct Segment {
    first_id: TxId,
    len: u64,
}

impl Segment {
    fn end(&self) -> TxId {
        self.first_id.plus(self.len)
    }
}

impl SegmentedDiskLog {
    pub fn open(config: StorageConfig) -> Result<Self, io::Error> {
        if config.segment_size > config.max_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Log segment size must not exceed the maximum log size",
            ));
        }
        fs::create_dir_all(&config.directory)?;

        let mut segments = Vec::new();
        for first_id in list_segments(&config.directory)? {
            let len = fs::metadata(segment_path(&config.directory, first_id))?.len();
            segments.push(Segment { first_id, len });
        }

        if segments.is_empty() {
            File::create(segment_path(&config.directory, TxId::default()))?;
            segments.push(Segment {
                first_id: TxId::default(),
                len: 0,
            });
        }

        for pair in segments.windows(2) {
            if pair[0].end() != pair[1].first_id {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "Log segments are not contiguous: {:?} ends at {:?} but next segment starts at {:?}",
                        pair[0].first_id,
                        pair[0].end(),
                        pair[1].first_id
                    ),
                ));
            }
        }

        // A crash mid-append can leave a partial record at the tail. Cut it off.
        let last = segments.len() - 1;
        let last_path = segment_path(&config.directory, segments[last].first_id);
        let valid_len = scan_valid_len(&last_path)?;
        if valid_len != segments[last].len {
            OpenOptions::new().write(true).open(&last_path)?.set_len(valid_len)?;
            segments[last].len = valid_len;
        }

        let active = OpenOptions::new().append(true).open(&last_path)?;

        Ok(SegmentedDiskLog {
            config,
            segments,
            active,
        })
    }

    fn last_segment(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }

    fn total_size(&self) -> u64 {
        self.next_id().distance_from(self.first_id())
    }

    fn roll_segment(&mut self) -> Result<(), io::Error> {
        self.active.sync_data()?;
        let first_id = self.next_id();
        self.active = OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(&self.config.directory, first_id))?;
        self.segments.push(Segment { first_id, len: 0 });
        Ok(())
    }

    /// Walks the headers of the segment holding `id` until it reaches or passes it.
    fn is_record_boundary(&self, id: TxId) -> Result<bool, io::Error> {
        let segment = match self.segments.iter().rev().find(|segment| segment.first_id <= id) {
            Some(segment) => *segment,
            None => return Ok(false),
        };
        let target = id.distance_from(segment.first_id);
        let mut file = File::open(segment_path(&self.config.directory, segment.first_id))?;

        let mut offset = 0u64;
        while offset < target {
            let mut header_bytes = [0u8; record::HEADER_SIZE];
            if !read_fully(&mut file, &mut header_bytes)? {
                return Ok(false);
            }
            let header = record::decode_header(&header_bytes)?;
            offset += record::encoded_len(header.data_size);
            file.seek(SeekFrom::Start(offset))?;
        }

        Ok(offset == target)
    }

    fn drop_oldest_segments(&mut self) -> Result<(), io::Error> {
        while self.total_size() > self.config.max_size && self.segments.len() > 1 {
            let oldest = self.segments.remove(0);
            fs::remove_file(segment_path(&self.config.directory, oldest.first_id))?;
        }
        Ok(())
    }
}

impl Log for SegmentedDiskLog {
    fn append(&mut self, timestamp: i64, payload: &[u8]) -> Result<TxId, io::Error> {
        let bytes = record::encode(timestamp, payload);

        let last = *self.last_segment();
        if last.len > 0 && last.len + bytes.len() as u64 > self.config.segment_size {
            self.roll_segment()?;
        }

        let id = self.next_id();
        self.active.write_all(&bytes)?;
        let last_index = self.segments.len() - 1;
        self.segments[last_index].len += bytes.len() as u64;

        self.drop_oldest_segments()?;
        Ok(id)
    }

    fn cursor(&self, from: TxId) -> Result<Box<dyn LogCursor>, io::Error> {
        if from < self.first_id() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Tx {:?} is older than the oldest retained tx {:?}", from, self.first_id()),
            ));
        }
        if from > self.next_id() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Tx {:?} is past the end of the log {:?}", from, self.next_id()),
            ));
        }

        if from < self.next_id() && !self.is_record_boundary(from)? {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Tx {:?} does not start a record", from),
            ));
        }

        Ok(Box::new(DiskCursor {
            directory: self.config.directory.clone(),
            position: from,
            segment: None,
        }))
    }

    fn sync(&mut self) -> Result<(), io::Error> {
        self.active.sync_data()
    }

    fn first_id(&self) -> TxId {
        self.segments[0].first_id
    }

    fn next_id(&self) -> TxId {
        self.last_segment().end()
    }

    fn reset(&mut self, first_id: TxId) -> Result<(), io::Error> {
        for segment in self.segments.drain(..) {
            fs::remove_file(segment_path(&self.config.directory, segment.first_id))?;
        }

        self.active = OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(&self.config.directory, first_id))?;
        self.segments.push(Segment { first_id, len: 0 });
        Ok(())
    }

    fn max_size(&self) -> u64 {
        self.config.max_size
    }
}

struct DiskCursor {
    directory: PathBuf,
    position: TxId,
    // Open segment file and the id of its first record.
    segment: Option<(TxId, File)>,
}

impl DiskCursor {
    fn open_segment_for(&mut self, id: TxId) -> Result<(), io::Error> {
        let first_id = list_segments(&self.directory)?
            .into_iter()
            .filter(|first| *first <= id)
            .last()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("No log segment contains tx {:?}", id),
                )
            })?;

        let file = File::open(segment_path(&self.directory, first_id))?;
        self.segment = Some((first_id, file));
        Ok(())
    }
}

impl LogCursor for DiskCursor {
    fn next(&mut self) -> Result<Option<LogRecord>, io::Error> {
        loop {
            if self.segment.is_none() {
                self.open_segment_for(self.position)?;
            }
            let (first_id, file) = match self.segment.as_mut() {
                Some(segment) => segment,
                None => return Ok(None),
            };

            let offset = self.position.distance_from(*first_id);
            file.seek(SeekFrom::Start(offset))?;

            let mut header_bytes = [0u8; record::HEADER_SIZE];
            if !read_fully(file, &mut header_bytes)? {
                // End of this segment. Continue into the next one if it has been started.
                if *first_id != self.position && segment_path(&self.directory, self.position).exists() {
                    self.segment = None;
                    continue;
                }
                return Ok(None);
            }

            let header = record::decode_header(&header_bytes)?;
            let available = file.metadata()?.len().saturating_sub(offset);
            if record::encoded_len(header.data_size) > available {
                // Record is still being written.
                return Ok(None);
            }
            let mut data = vec![0u8; header.data_size];
            if !read_fully(file, &mut data)? {
                return Ok(None);
            }
            record::verify(&header_bytes, &header, &data)?;

            let id = self.position;
            self.position = id.plus(record::encoded_len(data.len()));

            return Ok(Some(LogRecord {
                id,
                timestamp: header.timestamp,
                payload: Bytes::from(data),
            }));
        }
    }

    fn position(&self) -> TxId {
        self.position
    }
}

/// Fill `buf` or return false if the file ends first.
fn read_fully(file: &mut File, buf: &mut [u8]) -> Result<bool, io::Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Length of the prefix of a segment file made up of complete, checksummed records.
fn scan_valid_len(path: &Path) -> Result<u64, io::Error> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut valid_len = 0u64;
    loop {
        let mut header_bytes = [0u8; record::HEADER_SIZE];
        if !read_fully(&mut file, &mut header_bytes)? {
            return Ok(valid_len);
        }
        let header = match record::decode_header(&header_bytes) {
            Ok(header) => header,
            Err(_) => return Ok(valid_len),
        };
        if valid_len + record::encoded_len(header.data_size) > file_len {
            return Ok(valid_len);
        }
        let mut data = vec![0u8; header.data_size];
        if !read_fully(&mut file, &mut data)? {
            return Ok(valid_len);
        }
        if record::verify(&header_bytes, &header, &data).is_err() {
            return Ok(valid_len);
        }
        valid_len += record::encoded_len(data.len());
    }
}

fn segment_path(directory: &Path, first_id: TxId) -> PathBuf {
    directory.join(format!("{}{}", first_id.to_hex(), SEGMENT_SUFFIX))
}

fn list_segments(directory: &Path) -> Result<Vec<TxId>, io::Error> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(directory)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(hex) = name.strip_suffix(SEGMENT_SUFFIX) {
            if let Some(id) = TxId::from_hex(hex) {
                ids.push(id);
            }
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path, segment_size: u64, max_size: u64) -> StorageConfig {
        StorageConfig {
            directory: dir.to_path_buf(),
            segment_size,
            max_size,
        }
    }

    fn read_all(cursor: &mut Box<dyn LogCursor>) -> Vec<LogRecord> {
        let mut records = Vec::new();
        while let Some(record) = cursor.next().unwrap() {
            records.push(record);
        }
        records
    }

    #[test]
    fn reopen_keeps_records_and_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut ids = Vec::new();
        {
            let mut log = SegmentedDiskLog::open(config(dir.path(), 1 << 20, 1 << 24)).unwrap();
            for i in 0..20u8 {
                ids.push(log.append(i as i64, &[i; 5]).unwrap());
            }
            log.sync().unwrap();
        }

        let mut log = SegmentedDiskLog::open(config(dir.path(), 1 << 20, 1 << 24)).unwrap();
        let records = read_all(&mut log.cursor(TxId::default()).unwrap());
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), ids);
        assert_eq!(records[3].timestamp, 3);
        assert_eq!(&records[3].payload[..], &[3u8; 5]);

        let next = log.append(99, b"more").unwrap();
        assert!(next > *ids.last().unwrap());
    }

    #[test]
    fn torn_tail_is_cut_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let good_end;
        {
            let mut log = SegmentedDiskLog::open(config(dir.path(), 1 << 20, 1 << 24)).unwrap();
            log.append(0, b"complete").unwrap();
            good_end = log.next_id();
        }

        // Half a record, as if the process died mid-write.
        let partial = record::encode(1, b"never finished");
        let mut file = OpenOptions::new()
            .append(true)
            .open(segment_path(dir.path(), TxId::default()))
            .unwrap();
        file.write_all(&partial[..10]).unwrap();
        drop(file);

        let mut log = SegmentedDiskLog::open(config(dir.path(), 1 << 20, 1 << 24)).unwrap();
        assert_eq!(log.next_id(), good_end);
        assert_eq!(read_all(&mut log.cursor(TxId::default()).unwrap()).len(), 1);
        assert_eq!(log.append(2, b"after").unwrap(), good_end);
    }

    #[test]
    fn segments_roll_and_old_ones_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let per_record = record::encoded_len(100);
        let mut log = SegmentedDiskLog::open(config(dir.path(), per_record * 2, per_record * 5)).unwrap();

        let mut ids = Vec::new();
        for _ in 0..10 {
            ids.push(log.append(0, &[7u8; 100]).unwrap());
        }

        assert!(list_segments(dir.path()).unwrap().len() > 1);
        assert!(log.first_id() > TxId::default());
        assert!(log.next_id().distance_from(log.first_id()) <= per_record * 5);
        assert_eq!(
            log.cursor(TxId::default()).err().unwrap().kind(),
            io::ErrorKind::NotFound
        );

        // A cursor from the oldest retained record crosses segment boundaries.
        let records = read_all(&mut log.cursor(log.first_id()).unwrap());
        assert_eq!(records.last().unwrap().id, ids[9]);
        assert_eq!(records.first().unwrap().id, log.first_id());
    }

    #[test]
    fn cursor_sees_appends_made_after_it_reached_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let per_record = record::encoded_len(3);
        let mut log = SegmentedDiskLog::open(config(dir.path(), per_record * 2, 1 << 20)).unwrap();
        let mut cursor = log.cursor(TxId::default()).unwrap();
        assert!(cursor.next().unwrap().is_none());

        for _ in 0..5 {
            log.append(0, b"abc").unwrap();
        }
        assert_eq!(read_all(&mut cursor).len(), 5);
        assert_eq!(cursor.position(), log.next_id());
    }

    #[test]
    fn misaligned_cursor_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = SegmentedDiskLog::open(config(dir.path(), 1 << 20, 1 << 24)).unwrap();
        log.append(0, b"abcdefgh").unwrap();
        log.append(0, b"ijklmnop").unwrap();

        assert!(log.cursor(TxId::new(3)).is_err());
    }

    #[test]
    fn every_offset_inside_a_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = SegmentedDiskLog::open(config(dir.path(), 1 << 20, 1 << 24)).unwrap();
        let payload = br#"{"operation":"create","kind":"user","object":{"id":"alice","version":0}}"#;
        let first = log.append(crate::time::epoch_millis(), payload).unwrap();
        let second = log.append(crate::time::epoch_millis(), payload).unwrap();

        let mut accepted = Vec::new();
        for k in 1..second.distance_from(first) {
            match log.cursor(first.plus(k)) {
                Ok(_) => accepted.push(k),
                Err(e) => assert_eq!(e.kind(), io::ErrorKind::InvalidInput, "offset {}", k),
            }
        }
        assert!(accepted.is_empty(), "Accepted offsets {:?}", accepted);

        // Boundaries still work, including the second segment-relative record.
        assert_eq!(log.cursor(second).unwrap().next().unwrap().unwrap().id, second);
        assert!(log.cursor(log.next_id()).unwrap().next().unwrap().is_none());
    }

    #[test]
    fn boundaries_are_found_in_later_segments() {
        let dir = tempfile::tempdir().unwrap();
        let per_record = record::encoded_len(10);
        let mut log = SegmentedDiskLog::open(config(dir.path(), per_record * 2, 1 << 20)).unwrap();
        let ids: Vec<TxId> = (0..6)
            .map(|_| log.append(crate::time::epoch_millis(), &[b'x'; 10]).unwrap())
            .collect();

        for id in &ids {
            assert_eq!(log.cursor(*id).unwrap().next().unwrap().unwrap().id, *id);
        }
        assert!(log.cursor(ids[4].plus(7)).is_err());
    }

    #[test]
    fn reset_starts_a_fresh_log_at_id() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = SegmentedDiskLog::open(config(dir.path(), 1 << 20, 1 << 24)).unwrap();
            log.append(0, b"old").unwrap();
            log.reset(TxId::new(4096)).unwrap();
            assert_eq!(log.append(0, b"new").unwrap(), TxId::new(4096));
        }

        let log = SegmentedDiskLog::open(config(dir.path(), 1 << 20, 1 << 24)).unwrap();
        assert_eq!(log.first_id(), TxId::new(4096));
        assert_eq!(list_segments(dir.path()).unwrap(), vec![TxId::new(4096)]);
    }
}
