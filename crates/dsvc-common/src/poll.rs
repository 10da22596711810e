//! Bounded poll-with-backoff.
//!
//! Every retry loop in the helper (liveness confirmation, termination
//! polling, PID-file deletion) runs through [`poll_until`], so the
//! bounded-retry contract is enforced in one place. Waiting goes through a
//! [`Clock`] so tests can run the loops without wall-clock time.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::trace;

/// Retry policy: wait `initial_delay`, try, then wait `interval` between
/// further tries, for at most `max_attempts` tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(initial_delay: Duration, interval: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            interval,
            max_attempts,
        }
    }

    /// First try immediately, then every `interval`.
    pub const fn immediate(interval: Duration, max_attempts: u32) -> Self {
        Self::new(Duration::ZERO, interval, max_attempts)
    }

    /// Delay before the given 1-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            self.initial_delay
        } else {
            self.interval
        }
    }

    /// Worst-case wall time spent sleeping when every attempt fails.
    pub fn worst_case(&self) -> Duration {
        match self.max_attempts {
            0 => Duration::ZERO,
            n => self.initial_delay + self.interval * (n - 1),
        }
    }
}

/// Result of a poll that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The predicate produced a value on the given attempt.
    Ready { value: T, attempts: u32 },
    /// Every attempt ran without producing a value.
    Exhausted { attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Ready { attempts, .. } | PollOutcome::Exhausted { attempts } => *attempts,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            PollOutcome::Ready { value, .. } => Some(value),
            PollOutcome::Exhausted { .. } => None,
        }
    }
}

/// Source of delays for retry loops.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that returns immediately and records every requested delay.
#[derive(Debug, Default)]
pub struct ManualClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Sum of all requested delays.
    pub fn elapsed(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

/// Runs `attempt` until it yields `Some`, errors, or the policy runs out.
///
/// The closure receives the 1-based attempt number. An `Err` ends the poll
/// immediately and is returned as-is. Zero delays are not handed to the clock.
pub async fn poll_until<T, E, F>(
    policy: &PollPolicy,
    clock: &dyn Clock,
    mut attempt: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut(u32) -> Result<Option<T>, E>,
{
    for n in 1..=policy.max_attempts {
        let delay = policy.delay_before(n);
        if !delay.is_zero() {
            clock.sleep(delay).await;
        }

        trace!("Poll attempt {}/{}", n, policy.max_attempts);
        if let Some(value) = attempt(n)? {
            return Ok(PollOutcome::Ready { value, attempts: n });
        }
    }

    Ok(PollOutcome::Exhausted {
        attempts: policy.max_attempts,
    })
}
