use crate::repository::actor::WeakRepositoryClient;
use crate::time::Clock;
use tokio::time::{Duration, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Fires one `ScheduledSnapshot` event at the actor after a delay, unless the handle was
/// dropped first.
pub(crate) struct SnapshotTimerHandle {
    _cancel_on_drop: DropGuard,
}

struct SnapshotTimerTask<C: Clock> {
    deadline: Instant,
    actor_client: WeakRepositoryClient,
    clock: C,
    cancel: CancellationToken,
}

impl SnapshotTimerHandle {
    pub fn spawn<C: Clock>(delay: Duration, actor_client: WeakRepositoryClient, clock: C) -> Self {
        let (task, handle) = SnapshotTimerTask::new(delay, actor_client, clock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock> SnapshotTimerTask<C> {
    fn new(delay: Duration, actor_client: WeakRepositoryClient, clock: C) -> (Self, SnapshotTimerHandle) {
        let cancel = CancellationToken::new();
        // Deadline is fixed at creation, not when the task is first polled.
        let deadline = clock.now() + delay;

        let task = SnapshotTimerTask {
            deadline,
            actor_client,
            clock,
            cancel: cancel.clone(),
        };
        let handle = SnapshotTimerHandle {
            _cancel_on_drop: cancel.drop_guard(),
        };

        (task, handle)
    }

    async fn run(mut self) {
        tokio::select! {
            _ = self.clock.sleep_until(self.deadline) => {
                let _ = self.actor_client.scheduled_snapshot().await;
            }
            _ = self.cancel.cancelled() => {}
        }
    }
}
