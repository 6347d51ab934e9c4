#[cfg(test)]
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Millis since epoch, the timestamp stamped onto log records.
pub(crate) fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait::async_trait]
pub(crate) trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

#[derive(Copy, Clone)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Clock whose time only moves when a test advances its handle.
#[cfg(test)]
pub(crate) fn manual_clock() -> (ManualClock, ManualClockHandle) {
    let (tx, rx) = watch::channel(Instant::now());
    (ManualClock { now: rx }, ManualClockHandle { now: tx })
}

#[cfg(test)]
#[derive(Clone)]
pub(crate) struct ManualClock {
    now: watch::Receiver<Instant>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        while *self.now.borrow() < deadline {
            if self.now.changed().await.is_err() {
                // Handle dropped, so the deadline is never reached.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) struct ManualClockHandle {
    now: watch::Sender<Instant>,
}

#[cfg(test)]
impl ManualClockHandle {
    pub(crate) fn now(&self) -> Instant {
        *self.now.borrow()
    }

    pub(crate) fn advance(&mut self, duration: Duration) {
        let next = self.now() + duration;
        let _ = self.now.send(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn sleeper_wakes_only_once_its_deadline_is_reached() {
        let step = Duration::from_millis(100);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut clock, mut handle) = manual_clock();
        let deadline = handle.now() + step * 3;

        tokio::spawn(async move {
            clock.sleep_until(deadline).await;
            let _ = tx.send(clock.now());
        });

        handle.advance(step);
        handle.advance(step);
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect_err("Sleeper woke before its deadline");

        handle.advance(step * 2);
        let woke_at = rx.recv().await.unwrap();
        assert!(woke_at >= deadline);
    }

    #[test]
    fn epoch_millis_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(epoch_millis() > 1_577_836_800_000);
    }
}
