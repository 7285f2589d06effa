//! Attempt-counting and backoff policy for page fetches.
//!
//! The policy is a pure function of the attempt number and what the attempt
//! produced; it never touches the network. The fetcher applies the returned
//! [`Action`].
//!
//! # Strategy
//!
//! | Outcome | Action |
//! |---------|--------|
//! | 200 | done |
//! | 403 | rotate identity (and the session on the final attempt), wait `base × 5 × attempt` |
//! | 404 | give up, remember the URL as invalid |
//! | 429 | wait `base × 3 × attempt`, retry unchanged |
//! | 5xx, timeout, connect error | wait `base × 2^(attempt-1) × (1 + jitter)` |
//! | anything else | give up |
//!
//! Through a proxy, 403/429 and transport errors also count against the proxy.

use std::time::Duration;

/// What an attempt produced, stripped down to what the policy needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Status(u16),
    Timeout,
    ConnectError,
    OtherError,
}

/// What the fetcher should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Return the response.
    Done,
    /// Try again after `delay`, unless this was the last attempt.
    Retry {
        delay: Duration,
        rotate_identity: bool,
        reset_session: bool,
    },
    /// Stop now.
    GiveUp { mark_invalid: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Decide what follows attempt number `attempt` (1-based).
    ///
    /// `jitter` is a factor in `[0, 1)` supplied by the caller so the policy
    /// stays deterministic under test.
    pub fn decide(&self, attempt: u32, outcome: Outcome, jitter: f64) -> Action {
        let attempt = attempt.max(1);
        match outcome {
            Outcome::Status(200) => Action::Done,
            Outcome::Status(403) => Action::Retry {
                delay: self.base_delay.saturating_mul(5 * attempt),
                rotate_identity: true,
                reset_session: attempt >= self.max_attempts,
            },
            Outcome::Status(404) => Action::GiveUp { mark_invalid: true },
            Outcome::Status(429) => Action::Retry {
                delay: self.base_delay.saturating_mul(3 * attempt),
                rotate_identity: false,
                reset_session: false,
            },
            Outcome::Status(s) if (500..600).contains(&s) => self.transient(attempt, jitter),
            Outcome::Timeout | Outcome::ConnectError | Outcome::OtherError => {
                self.transient(attempt, jitter)
            }
            Outcome::Status(_) => Action::GiveUp { mark_invalid: false },
        }
    }

    fn transient(&self, attempt: u32, jitter: f64) -> Action {
        let exp = 1u32 << (attempt - 1).min(16);
        let jitter = jitter.clamp(0.0, 1.0);
        Action::Retry {
            delay: self.base_delay.saturating_mul(exp).mul_f64(1.0 + jitter),
            rotate_identity: false,
            reset_session: false,
        }
    }

    /// Whether a proxy that produced `outcome` should be reported as failing.
    pub fn penalizes_proxy(outcome: Outcome) -> bool {
        matches!(
            outcome,
            Outcome::Status(403) | Outcome::Status(429) | Outcome::Timeout | Outcome::ConnectError
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1))
    }

    fn delay_of(action: Action) -> Duration {
        match action {
            Action::Retry { delay, .. } => delay,
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn test_success_is_done() {
        assert_eq!(policy().decide(1, Outcome::Status(200), 0.5), Action::Done);
    }

    #[test]
    fn test_404_gives_up_and_marks_invalid() {
        assert_eq!(
            policy().decide(1, Outcome::Status(404), 0.0),
            Action::GiveUp { mark_invalid: true }
        );
    }

    #[test]
    fn test_other_client_errors_give_up_quietly() {
        assert_eq!(
            policy().decide(1, Outcome::Status(400), 0.0),
            Action::GiveUp { mark_invalid: false }
        );
        assert_eq!(
            policy().decide(2, Outcome::Status(410), 0.0),
            Action::GiveUp { mark_invalid: false }
        );
    }

    #[test]
    fn test_429_backoff_grows_linearly() {
        let p = policy();
        let d1 = delay_of(p.decide(1, Outcome::Status(429), 0.9));
        let d2 = delay_of(p.decide(2, Outcome::Status(429), 0.0));
        assert_eq!(d1, Duration::from_secs(3));
        assert_eq!(d2, Duration::from_secs(6));
    }

    #[test]
    fn test_403_rotates_and_resets_session_on_last_attempt() {
        let p = policy();
        assert_eq!(
            p.decide(1, Outcome::Status(403), 0.0),
            Action::Retry {
                delay: Duration::from_secs(5),
                rotate_identity: true,
                reset_session: false,
            }
        );
        assert_eq!(
            p.decide(3, Outcome::Status(403), 0.0),
            Action::Retry {
                delay: Duration::from_secs(15),
                rotate_identity: true,
                reset_session: true,
            }
        );
    }

    #[test]
    fn test_transient_errors_use_jittered_exponential_delay() {
        let p = policy();
        assert_eq!(delay_of(p.decide(1, Outcome::Timeout, 0.0)), Duration::from_secs(1));
        assert_eq!(delay_of(p.decide(2, Outcome::ConnectError, 0.0)), Duration::from_secs(2));
        assert_eq!(delay_of(p.decide(3, Outcome::Status(503), 0.5)), Duration::from_secs(6));
    }

    #[test]
    fn test_penalizes_proxy() {
        assert!(RetryPolicy::penalizes_proxy(Outcome::Status(403)));
        assert!(RetryPolicy::penalizes_proxy(Outcome::Status(429)));
        assert!(RetryPolicy::penalizes_proxy(Outcome::Timeout));
        assert!(!RetryPolicy::penalizes_proxy(Outcome::Status(404)));
        assert!(!RetryPolicy::penalizes_proxy(Outcome::Status(500)));
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
