use crate::commitlog::{LogCursor, LogRecord, TxId};
use std::io;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("Timed out waiting for tx {0} to be applied")]
    Timeout(TxId),

    #[error("Repository closed")]
    Closed,
}

/// TxMonitor waits for transactions to become visible in the local repository.
#[derive(Clone)]
pub(crate) struct TxMonitor {
    applied: watch::Receiver<TxId>,
}

impl TxMonitor {
    pub fn new(applied: watch::Receiver<TxId>) -> Self {
        TxMonitor { applied }
    }

    pub fn watermark(&self) -> watch::Receiver<TxId> {
        self.applied.clone()
    }

    /// The id the next applied transaction will have.
    pub fn applied_up_to(&self) -> TxId {
        *self.applied.borrow()
    }

    /// Wait until the transaction `tx_id` (or a later one) has been applied locally. The
    /// timeout bounds the whole wait, however many times the watermark moves.
    pub async fn wait_for(&self, tx_id: TxId, timeout: Duration) -> Result<(), WaitError> {
        let deadline = Instant::now() + timeout;
        let mut applied = self.applied.clone();

        loop {
            if *applied.borrow_and_update() > tx_id {
                return Ok(());
            }

            match tokio::time::timeout_at(deadline, applied.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(WaitError::Closed),
                Err(_) => return Err(WaitError::Timeout(tx_id)),
            }
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
pub(crate) enum TailItem {
    Record(LogRecord),
    /// Nothing new within the idle timeout. Carries the current tail.
    Idle(TxId),
}

/// TxTail follows the log from a position, waking when new transactions are applied.
/// Cursor reads touch disk, so they run on the blocking pool.
pub(crate) struct TxTail {
    // Lent to the blocking pool while a read is in flight.
    cursor: Option<Box<dyn LogCursor>>,
    position: TxId,
    applied: watch::Receiver<TxId>,
}

impl TxTail {
    pub fn new(cursor: Box<dyn LogCursor>, applied: watch::Receiver<TxId>) -> Self {
        TxTail {
            position: cursor.position(),
            cursor: Some(cursor),
            applied,
        }
    }

    pub fn position(&self) -> TxId {
        self.position
    }

    async fn read_next(&mut self) -> Result<Option<LogRecord>, io::Error> {
        let mut cursor = self
            .cursor
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Log cursor lost by an interrupted read"))?;
        let (cursor, result) = tokio::task::spawn_blocking(move || {
            let result = cursor.next();
            (cursor, result)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        self.position = cursor.position();
        self.cursor = Some(cursor);
        result
    }

    pub async fn next(&mut self, idle_timeout: Duration) -> Result<TailItem, io::Error> {
        let deadline = Instant::now() + idle_timeout;
        loop {
            // Mark the watermark seen before reading, so an append that lands after the read
            // still wakes us.
            self.applied.borrow_and_update();
            if let Some(record) = self.read_next().await? {
                return Ok(TailItem::Record(record));
            }

            match tokio::time::timeout_at(deadline, self.applied.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Repository closed"));
                }
                Err(_) => return Ok(TailItem::Idle(self.position)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::{InMemoryLog, Log};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Takes a while to produce its only record, like a cold disk read.
    struct SlowCursor {
        position: TxId,
    }

    impl LogCursor for SlowCursor {
        fn next(&mut self) -> Result<Option<LogRecord>, io::Error> {
            if self.position > TxId::default() {
                return Ok(None);
            }
            std::thread::sleep(std::time::Duration::from_millis(200));
            let id = self.position;
            self.position = id.plus(10);
            Ok(Some(LogRecord {
                id,
                timestamp: 0,
                payload: Bytes::from_static(b"slow"),
            }))
        }

        fn position(&self) -> TxId {
            self.position
        }
    }

    #[tokio::test]
    async fn wait_for_returns_once_applied() {
        let (tx, rx) = watch::channel(TxId::new(0));
        let monitor = TxMonitor::new(rx);

        let mut waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_for(TxId::new(100), Duration::from_secs(5)).await })
        };

        tx.send(TxId::new(50)).unwrap();
        tx.send(TxId::new(100)).unwrap();
        tokio::time::timeout(Duration::from_millis(20), &mut waiter)
            .await
            .expect_err("Expected timeout");

        tx.send(TxId::new(130)).unwrap();
        waiter.await.unwrap().unwrap();

        // Already applied.
        monitor.wait_for(TxId::new(0), Duration::from_millis(1)).await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        let (tx, rx) = watch::channel(TxId::new(0));
        let monitor = TxMonitor::new(rx);

        tx.send(TxId::new(10)).unwrap();
        let result = monitor.wait_for(TxId::new(10), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(WaitError::Timeout(id)) if id == TxId::new(10)));
    }

    #[tokio::test]
    async fn slow_reads_do_not_stall_other_tasks() {
        let (_tx, rx) = watch::channel(TxId::default());
        let mut tail = TxTail::new(Box::new(SlowCursor { position: TxId::default() }), rx);

        let ticked = Arc::new(AtomicBool::new(false));
        let ticker = {
            let ticked = ticked.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticked.store(true, Ordering::SeqCst);
            })
        };

        // The test runtime has a single thread, so the ticker only runs if the read yields it.
        match tail.next(Duration::from_secs(5)).await.unwrap() {
            TailItem::Record(record) => assert_eq!(record.id, TxId::default()),
            other => panic!("Unexpected {:?}", other),
        }
        assert!(ticked.load(Ordering::SeqCst));
        assert_eq!(tail.position(), TxId::new(10));
        ticker.await.unwrap();
    }

    #[tokio::test]
    async fn tail_follows_appends() {
        let mut log = InMemoryLog::new(1 << 20);
        let first = log.append(1, b"one").unwrap();
        let (tx, rx) = watch::channel(log.next_id());

        let mut tail = TxTail::new(log.cursor(TxId::default()).unwrap(), rx);
        match tail.next(Duration::from_millis(10)).await.unwrap() {
            TailItem::Record(record) => assert_eq!(record.id, first),
            other => panic!("Unexpected {:?}", other),
        }
        assert_eq!(
            tail.next(Duration::from_millis(10)).await.unwrap(),
            TailItem::Idle(log.next_id())
        );

        let mut writer = log.clone();
        let appender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let id = writer.append(2, b"two").unwrap();
            tx.send(writer.next_id()).unwrap();
            id
        });

        let item = tail.next(Duration::from_secs(5)).await.unwrap();
        let second = appender.await.unwrap();
        match item {
            TailItem::Record(record) => assert_eq!(record.id, second),
            other => panic!("Unexpected {:?}", other),
        }
    }
}
