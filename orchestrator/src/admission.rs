//! Admission control for source start-up.
//!
//! Starting many watches at once can flood a backend with simultaneous
//! connects. An [`AdmissionPolicy`] spreads start-ups out by handing each new
//! source a delay that its handle waits out before connecting.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// How source start-ups are spaced out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Every source connects immediately.
    Unlimited,

    /// One source every `interval_ms`.
    Ramp { interval_ms: u64 },

    /// Up to `burst` sources immediately, then one every `refill_ms`.
    TokenBucket { burst: u32, refill_ms: u64 },
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::TokenBucket {
            burst: 8,
            refill_ms: 250,
        }
    }
}

impl AdmissionPolicy {
    /// Spacing between admissions once any burst is used up.
    fn emission_interval(self) -> Duration {
        match self {
            Self::Unlimited => Duration::ZERO,
            Self::Ramp { interval_ms } => Duration::from_millis(interval_ms),
            Self::TokenBucket { refill_ms, .. } => Duration::from_millis(refill_ms),
        }
    }

    /// How far ahead of its slot an admission may go.
    fn burst_tolerance(self) -> Duration {
        match self {
            Self::TokenBucket { burst, .. } => {
                self.emission_interval() * burst.saturating_sub(1)
            }
            _ => Duration::ZERO,
        }
    }
}

/// Hands out admission delays according to a policy.
///
/// Delays are computed against a theoretical arrival time, so sources added
/// long after start-up are admitted immediately once the bucket has refilled.
#[derive(Debug, Clone)]
pub struct AdmissionControl {
    policy: AdmissionPolicy,
    next_slot: Option<Instant>,
}

impl AdmissionControl {
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self {
            policy,
            next_slot: None,
        }
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Reserve the next admission and return how long to wait for it.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        let interval = self.policy.emission_interval();
        if interval.is_zero() {
            return Duration::ZERO;
        }

        let slot = self.next_slot.map_or(now, |slot| slot.max(now));
        let earliest = slot
            .checked_sub(self.policy.burst_tolerance())
            .map_or(now, |earliest| earliest.max(now));

        self.next_slot = Some(slot + interval);
        earliest - now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn delays(policy: AdmissionPolicy, count: usize, now: Instant) -> Vec<Duration> {
        let mut control = AdmissionControl::new(policy);
        (0..count).map(|_| control.next_delay(now)).collect()
    }

    #[test]
    fn test_unlimited_never_delays() {
        let now = Instant::now();
        assert_eq!(
            delays(AdmissionPolicy::Unlimited, 3, now),
            vec![Duration::ZERO; 3]
        );
    }

    #[test]
    fn test_ramp_spaces_every_start() {
        let now = Instant::now();
        let ms = Duration::from_millis;
        assert_eq!(
            delays(AdmissionPolicy::Ramp { interval_ms: 100 }, 4, now),
            vec![ms(0), ms(100), ms(200), ms(300)]
        );
    }

    #[test]
    fn test_token_bucket_allows_burst() {
        let now = Instant::now();
        let ms = Duration::from_millis;
        let policy = AdmissionPolicy::TokenBucket {
            burst: 3,
            refill_ms: 1000,
        };
        assert_eq!(
            delays(policy, 5, now),
            vec![ms(0), ms(0), ms(0), ms(1000), ms(2000)]
        );
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let start = Instant::now();
        let mut control = AdmissionControl::new(AdmissionPolicy::TokenBucket {
            burst: 2,
            refill_ms: 100,
        });

        control.next_delay(start);
        control.next_delay(start);
        assert_eq!(control.next_delay(start), Duration::from_millis(100));

        // Long after start-up the bucket is full again.
        let later = start + Duration::from_secs(10);
        assert_eq!(control.next_delay(later), Duration::ZERO);
        assert_eq!(control.next_delay(later), Duration::ZERO);
    }

    #[test]
    fn test_policy_from_toml_shape() {
        let policy: AdmissionPolicy =
            serde_json::from_str(r#"{"policy":"ramp","interval_ms":50}"#).unwrap();
        assert_eq!(policy, AdmissionPolicy::Ramp { interval_ms: 50 });
    }
}
