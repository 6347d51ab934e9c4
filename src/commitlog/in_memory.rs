use crate::commitlog::record;
use crate::commitlog::{Log, LogCursor, LogRecord, TxId};
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, RwLock};

// Volatile log for tests and throwaway nodes. Ids follow the same byte arithmetic as the disk
// log. Clones share the same records, which lets a test "reopen" a log after dropping the
// repository that owned it.
#[derive(Clone)]
pub struct InMemoryLog {
    state: Arc<RwLock<State>>,
    max_size: u64,
}

struct State {
    first_id: TxId,
    next_id: TxId,
    records: VecDeque<LogRecord>,
}

impl InMemoryLog {
    pub fn new(max_size: u64) -> Self {
        InMemoryLog {
            state: Arc::new(RwLock::new(State {
                first_id: TxId::default(),
                next_id: TxId::default(),
                records: VecDeque::new(),
            })),
            max_size,
        }
    }
}

impl State {
    fn index_of(&self, id: TxId) -> Result<Option<usize>, io::Error> {
        if id < self.first_id {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Tx {:?} is older than the oldest retained tx {:?}", id, self.first_id),
            ));
        }
        if id == self.next_id {
            return Ok(None);
        }
        if id > self.next_id {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Tx {:?} is past the end of the log {:?}", id, self.next_id),
            ));
        }

        self.records
            .binary_search_by_key(&id, |r| r.id)
            .map(Some)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("{:?} is not a record boundary", id)))
    }
}

impl Log for InMemoryLog {
    fn append(&mut self, timestamp: i64, payload: &[u8]) -> Result<TxId, io::Error> {
        let mut state = self.state.write().expect("InMemoryLog lock poison");

        let id = state.next_id;
        state.next_id = id.plus(record::encoded_len(payload.len()));
        state.records.push_back(LogRecord {
            id,
            timestamp,
            payload: Bytes::copy_from_slice(payload),
        });

        while state.next_id.distance_from(state.first_id) > self.max_size && state.records.len() > 1 {
            state.records.pop_front();
            let new_first = state.records.front().map(|r| r.id).unwrap_or(state.next_id);
            state.first_id = new_first;
        }

        Ok(id)
    }

    fn cursor(&self, from: TxId) -> Result<Box<dyn LogCursor>, io::Error> {
        self.state.read().expect("InMemoryLog lock poison").index_of(from)?;

        Ok(Box::new(InMemoryCursor {
            state: self.state.clone(),
            position: from,
        }))
    }

    fn sync(&mut self) -> Result<(), io::Error> {
        Ok(())
    }

    fn first_id(&self) -> TxId {
        self.state.read().expect("InMemoryLog lock poison").first_id
    }

    fn next_id(&self) -> TxId {
        self.state.read().expect("InMemoryLog lock poison").next_id
    }

    fn reset(&mut self, first_id: TxId) -> Result<(), io::Error> {
        let mut state = self.state.write().expect("InMemoryLog lock poison");
        state.records.clear();
        state.first_id = first_id;
        state.next_id = first_id;
        Ok(())
    }

    fn max_size(&self) -> u64 {
        self.max_size
    }
}

struct InMemoryCursor {
    state: Arc<RwLock<State>>,
    position: TxId,
}

impl LogCursor for InMemoryCursor {
    fn next(&mut self) -> Result<Option<LogRecord>, io::Error> {
        let state = self.state.read().expect("InMemoryLog lock poison");
        match state.index_of(self.position)? {
            None => Ok(None),
            Some(index) => {
                let record = state.records[index].clone();
                self.position = record.id.plus(record::encoded_len(record.payload.len()));
                Ok(Some(record))
            }
        }
    }

    fn position(&self) -> TxId {
        self.position
    }
}
