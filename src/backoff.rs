use std::str::FromStr;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FIXED" => Ok(BackoffKind::Fixed),
            "LINEAR" => Ok(BackoffKind::Linear),
            "EXPONENTIAL" => Ok(BackoffKind::Exponential),
            _ => Err(format!("Unknown backoff policy '{}'", s)),
        }
    }
}

/// Consecutive failures a policy tolerates unless told otherwise.
pub const DEFAULT_MAX_FAILURES: u32 = 6;

/// BackoffPolicy maps a count of consecutive failures to how long to wait before retrying,
/// and to whether the retry loop should give up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BackoffPolicy {
    pub kind: BackoffKind,
    pub base: Duration,
    pub max_delay: Duration,
    pub max_failures: u32,
}

impl BackoffPolicy {
    pub fn fixed(base: Duration, max_delay: Duration) -> Self {
        BackoffPolicy {
            kind: BackoffKind::Fixed,
            base,
            max_delay,
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }

    pub fn linear(base: Duration, max_delay: Duration) -> Self {
        BackoffPolicy {
            kind: BackoffKind::Linear,
            base,
            max_delay,
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }

    pub fn exponential(base: Duration, max_delay: Duration) -> Self {
        BackoffPolicy {
            kind: BackoffKind::Exponential,
            base,
            max_delay,
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }

    pub fn with_max_failures(self, max_failures: u32) -> Self {
        BackoffPolicy { max_failures, ..self }
    }

    /// Delay after `failure_count` consecutive failures. Counts below 1 are treated as 1.
    pub fn delay_ms(&self, failure_count: u32) -> u64 {
        std::cmp::min(self.uncapped_delay_ms(failure_count), self.max_delay_ms())
    }

    pub fn delay(&self, failure_count: u32) -> Duration {
        Duration::from_millis(self.delay_ms(failure_count))
    }

    /// True once `failure_count` reaches the failure budget. Retry loops give up and escalate
    /// at this point instead of retrying forever.
    pub fn is_exhausted(&self, failure_count: u32) -> bool {
        failure_count >= self.max_failures
    }

    /// Sleep for the delay (optionally capped further), waking early if `cancel` fires.
    /// Returns false if woken early; the caller decides what that means.
    pub async fn sleep(&self, failure_count: u32, cap: Option<Duration>, cancel: &CancellationToken) -> bool {
        let mut delay = self.delay(failure_count);
        if let Some(cap) = cap {
            delay = std::cmp::min(delay, cap);
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }

    fn max_delay_ms(&self) -> u64 {
        self.max_delay.as_millis() as u64
    }

    fn uncapped_delay_ms(&self, failure_count: u32) -> u64 {
        let failure_count = std::cmp::max(failure_count, 1) as u64;
        let base = self.base.as_millis() as u64;
        match self.kind {
            BackoffKind::Fixed => base,
            BackoffKind::Linear => base.saturating_mul(failure_count),
            BackoffKind::Exponential => {
                let factor = 1u64.checked_shl((failure_count - 1) as u32).unwrap_or(u64::MAX);
                base.saturating_mul(factor)
            }
        }
    }
}
