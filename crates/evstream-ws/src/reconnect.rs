//! Reconnection scheduling with exponential backoff.
//!
//! delay = min(min_delay * 2^attempt, max_delay) + jitter, where `attempt`
//! counts consecutive failures and resets the moment a connection opens.

use std::time::Duration;

use tracing::{debug, warn};

use crate::machine::{Effect, TimerId, TimerIds, TimerKind};

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the uniform jitter added on top (0 = none).
    pub jitter_ms: u64,
    /// Maximum scheduled attempts (0 = infinite).
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_delay_ms: 1000,
            max_delay_ms: 30000,
            jitter_ms: 0,
            max_attempts: 0,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given attempt, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        // Cap the exponent; min_delay * 2^32 already exceeds any sane max.
        let exponent = attempt.min(32);
        let delay = self.min_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Delay for the given attempt, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + Duration::from_millis(rand_jitter(self.jitter_ms))
    }
}

/// Owns the attempt counter and the pending reconnect timer.
#[derive(Debug)]
pub struct ReconnectScheduler {
    policy: BackoffPolicy,
    attempt: u32,
    pending: Option<TimerId>,
}

impl ReconnectScheduler {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            pending: None,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_exhausted(&self) -> bool {
        self.policy.max_attempts > 0 && self.attempt >= self.policy.max_attempts
    }

    /// Schedule the next attempt. Returns the delay, or `None` if a reconnect
    /// is already pending or attempts are exhausted.
    pub fn schedule(&mut self, timers: &mut TimerIds, fx: &mut Vec<Effect>) -> Option<Duration> {
        if self.pending.is_some() {
            debug!("Reconnect already pending");
            return None;
        }
        if self.is_exhausted() {
            warn!(attempt = self.attempt, "Max reconnection attempts reached");
            return None;
        }

        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;

        let id = timers.next();
        self.pending = Some(id);
        fx.push(Effect::ArmTimer {
            id,
            kind: TimerKind::Reconnect,
            after: delay,
        });
        warn!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );
        Some(delay)
    }

    /// Cancel the pending reconnect, if any.
    pub fn cancel(&mut self, fx: &mut Vec<Effect>) {
        if let Some(id) = self.pending.take() {
            debug!(?id, "Cancelled pending reconnect");
            fx.push(Effect::CancelTimer(id));
        }
    }

    /// Handle the reconnect timer. Returns `true` if the attempt should run.
    pub fn on_due(&mut self, id: TimerId) -> bool {
        if self.pending != Some(id) {
            return false;
        }
        self.pending = None;
        true
    }

    /// Connection opened.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Generate random jitter in `0..=bound` ms.
fn rand_jitter(bound: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if bound == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % (bound + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduled_delay(fx: &[Effect]) -> Option<Duration> {
        fx.iter().find_map(|e| match e {
            Effect::ArmTimer {
                kind: TimerKind::Reconnect,
                after,
                ..
            } => Some(*after),
            _ => None,
        })
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (0..7)
            .map(|a| policy.base_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, [1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_backoff_huge_attempt_saturates() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_millis(30000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = BackoffPolicy {
            jitter_ms: 250,
            ..BackoffPolicy::default()
        };
        for attempt in 0..10 {
            let d = policy.delay(attempt);
            assert!(d >= policy.base_delay(attempt));
            assert!(d >= Duration::from_millis(policy.min_delay_ms));
            assert!(d <= Duration::from_millis(policy.max_delay_ms + 250));
        }
    }

    #[test]
    fn test_schedule_increments_and_reset() {
        let mut sched = ReconnectScheduler::new(BackoffPolicy::default());
        let mut timers = TimerIds::default();

        let mut fx = Vec::new();
        assert_eq!(
            sched.schedule(&mut timers, &mut fx),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(scheduled_delay(&fx), Some(Duration::from_millis(1000)));
        assert_eq!(sched.attempt(), 1);

        // Not twice for the same failure
        let mut fx = Vec::new();
        assert_eq!(sched.schedule(&mut timers, &mut fx), None);
        assert!(fx.is_empty());

        sched.cancel(&mut fx);
        let mut fx = Vec::new();
        assert_eq!(
            sched.schedule(&mut timers, &mut fx),
            Some(Duration::from_millis(2000))
        );

        sched.reset();
        assert_eq!(sched.attempt(), 0);
    }

    #[test]
    fn test_on_due_only_for_pending_timer() {
        let mut sched = ReconnectScheduler::new(BackoffPolicy::default());
        let mut timers = TimerIds::default();
        let mut fx = Vec::new();
        sched.schedule(&mut timers, &mut fx);
        let id = match fx[0] {
            Effect::ArmTimer { id, .. } => id,
            _ => panic!("expected timer"),
        };

        assert!(!sched.on_due(timers.next()));
        assert!(sched.on_due(id));
        assert!(!sched.on_due(id), "must not fire twice");
    }

    #[test]
    fn test_cancelled_timer_does_not_fire() {
        let mut sched = ReconnectScheduler::new(BackoffPolicy::default());
        let mut timers = TimerIds::default();
        let mut fx = Vec::new();
        sched.schedule(&mut timers, &mut fx);
        let id = match fx[0] {
            Effect::ArmTimer { id, .. } => id,
            _ => panic!("expected timer"),
        };

        let mut fx = Vec::new();
        sched.cancel(&mut fx);
        assert_eq!(fx, vec![Effect::CancelTimer(id)]);
        assert!(!sched.on_due(id));
    }

    #[test]
    fn test_max_attempts() {
        let mut sched = ReconnectScheduler::new(BackoffPolicy {
            max_attempts: 2,
            ..BackoffPolicy::default()
        });
        let mut timers = TimerIds::default();
        for _ in 0..2 {
            let mut fx = Vec::new();
            assert!(sched.schedule(&mut timers, &mut fx).is_some());
            sched.cancel(&mut fx);
        }
        let mut fx = Vec::new();
        assert!(sched.is_exhausted());
        assert_eq!(sched.schedule(&mut timers, &mut fx), None);
    }
}
