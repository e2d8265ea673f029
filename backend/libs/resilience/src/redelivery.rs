//! Transport-level redelivery policy and its alignment with the subscriber
//! host's poison threshold.
//!
//! Two independent counters decide when a failing message stops cycling:
//! the transport's delivery budget and the host's poison threshold. The host
//! must be the one that decides, so the transport budget has to leave room
//! for the threshold to be reached.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Deliveries after which the transport dead-letters on its own.
    /// `None` means the transport never gives up.
    pub max_deliveries: Option<u32>,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// How long the transport keeps an undelivered message
    pub message_ttl: Option<Duration>,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_deliveries: None,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            message_ttl: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyAlignment {
    Aligned,
    /// The transport dead-letters before the host escalates
    PrematureDeadLetter {
        max_deliveries: u32,
        poison_threshold: u32,
    },
    /// The message expires before the host sees enough failures to escalate
    EscalationUnreachable {
        time_to_threshold: Duration,
        message_ttl: Duration,
    },
}

impl PolicyAlignment {
    pub fn is_aligned(&self) -> bool {
        matches!(self, PolicyAlignment::Aligned)
    }
}

impl RedeliveryPolicy {
    /// Budget that lets the host escalate on the threshold-th failure and
    /// keeps one spare delivery.
    pub fn for_poison_threshold(poison_threshold: u32) -> Self {
        Self {
            max_deliveries: Some(poison_threshold.saturating_add(1)),
            ..Default::default()
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Whether the transport should hand the message out again after
    /// `delivery_count` deliveries (1-based).
    pub fn allows_redelivery(&self, delivery_count: u32) -> bool {
        match self.max_deliveries {
            Some(max) => delivery_count < max,
            None => true,
        }
    }

    /// Delay before redelivering after `delivery_count` failed deliveries.
    /// Doubles from `min_backoff`, capped at `max_backoff`.
    pub fn backoff_for(&self, delivery_count: u32) -> Duration {
        let exponent = delivery_count.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.min_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn check_alignment(&self, poison_threshold: u32) -> PolicyAlignment {
        if let Some(max) = self.max_deliveries {
            if max < poison_threshold {
                return PolicyAlignment::PrematureDeadLetter {
                    max_deliveries: max,
                    poison_threshold,
                };
            }
        }

        if let Some(ttl) = self.message_ttl {
            let time_to_threshold: Duration = (1..poison_threshold).map(|n| self.backoff_for(n)).sum();
            if time_to_threshold > ttl {
                return PolicyAlignment::EscalationUnreachable {
                    time_to_threshold,
                    message_ttl: ttl,
                };
            }
        }

        PolicyAlignment::Aligned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_for_threshold_is_aligned() {
        let policy = RedeliveryPolicy::for_poison_threshold(5);
        assert_eq!(policy.max_deliveries, Some(6));
        assert!(policy.check_alignment(5).is_aligned());
    }

    #[test]
    fn test_short_budget_dead_letters_prematurely() {
        let policy = RedeliveryPolicy {
            max_deliveries: Some(3),
            ..Default::default()
        };
        assert_eq!(
            policy.check_alignment(5),
            PolicyAlignment::PrematureDeadLetter {
                max_deliveries: 3,
                poison_threshold: 5
            }
        );
    }

    #[test]
    fn test_unbounded_is_aligned() {
        assert!(RedeliveryPolicy::unbounded().check_alignment(5).is_aligned());
    }

    #[test]
    fn test_ttl_shorter_than_schedule_is_unreachable() {
        let policy = RedeliveryPolicy {
            max_deliveries: Some(10),
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
            message_ttl: Some(Duration::from_secs(30)),
        };
        // 10 + 20 + 40 + 60 = 130s before the 5th delivery
        assert_eq!(
            policy.check_alignment(5),
            PolicyAlignment::EscalationUnreachable {
                time_to_threshold: Duration::from_secs(130),
                message_ttl: Duration::from_secs(30),
            }
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RedeliveryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(6), Duration::from_secs(32));
        assert_eq!(policy.backoff_for(7), Duration::from_secs(60));
        assert_eq!(policy.backoff_for(500), Duration::from_secs(60));
    }

    #[test]
    fn test_allows_redelivery() {
        let policy = RedeliveryPolicy::for_poison_threshold(2);
        assert!(policy.allows_redelivery(1));
        assert!(policy.allows_redelivery(2));
        assert!(!policy.allows_redelivery(3));
        assert!(RedeliveryPolicy::unbounded().allows_redelivery(u32::MAX));
    }
}
