use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Failure classes for secondary (post-resolution) media fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureClass {
    Aborted,
    Network,
    Decode,
    Unsupported,
    Unknown,
}

impl FailureClass {
    /// Only transport-level failures can succeed on a second attempt.
    pub fn is_transient(self) -> bool {
        matches!(self, FailureClass::Aborted | FailureClass::Network)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Retry rule for media fetches. Distinct from job polling: this applies to
/// files of jobs that have already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// `attempt` is the 1-based number of the attempt that just failed.
    pub fn decide(&self, class: FailureClass, attempt: u32) -> RetryDecision {
        if !class.is_transient() || attempt > self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay_for(attempt))
    }

    /// Delay grows with the attempt number: `attempt * base_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_retried_up_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(FailureClass::Network, 1),
            RetryDecision::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            policy.decide(FailureClass::Aborted, 2),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(policy.decide(FailureClass::Network, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_terminal_classes_never_retried() {
        let policy = RetryPolicy::default();
        for class in [
            FailureClass::Decode,
            FailureClass::Unsupported,
            FailureClass::Unknown,
        ] {
            assert_eq!(policy.decide(class, 1), RetryDecision::GiveUp, "{}", class);
        }
    }

    #[test]
    fn test_zero_cap_disables_retries() {
        let policy = RetryPolicy::new(0, Duration::from_millis(250));
        assert_eq!(policy.decide(FailureClass::Network, 1), RetryDecision::GiveUp);
    }
}
