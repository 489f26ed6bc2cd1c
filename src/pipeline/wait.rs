//! Fixed-delay polling with a bounded number of attempts

use std::future::Future;
use std::time::Duration;
use tracing::trace;

use crate::utils::SoloResult;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Result of a single readiness check
pub enum Attempt<T, S> {
    /// The condition holds
    Done(T),
    /// Not yet; `S` is what was observed, reported if attempts run out
    Pending(S),
}

/// Attempts ran out before the condition held
#[derive(Debug, Clone, PartialEq)]
pub struct Exhausted<S> {
    pub attempts: u32,
    pub last: Option<S>,
}

/// Run `check` until it reports `Done`, sleeping `policy.delay` between tries.
///
/// Errors from `check` are returned immediately; running out of attempts is
/// reported in the inner `Err` so callers can build a descriptive error.
pub async fn poll_until<T, S, F, Fut>(
    policy: PollPolicy,
    mut check: F,
) -> SoloResult<Result<T, Exhausted<S>>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SoloResult<Attempt<T, S>>>,
{
    let mut last = None;
    for attempt in 1..=policy.max_attempts {
        match check(attempt).await? {
            Attempt::Done(value) => return Ok(Ok(value)),
            Attempt::Pending(observed) => {
                trace!(attempt, max = policy.max_attempts, "Condition not met yet");
                last = Some(observed);
            }
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Ok(Err(Exhausted {
        attempts: policy.max_attempts,
        last,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SoloError;

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_done_on_third_attempt() {
        let result = poll_until(fast(5), |attempt| async move {
            if attempt == 3 {
                Ok(Attempt::Done(attempt))
            } else {
                Ok(Attempt::Pending(attempt))
            }
        })
        .await
        .unwrap();
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_observation() {
        let result: Result<(), Exhausted<u32>> =
            poll_until(fast(4), |attempt| async move { Ok(Attempt::Pending(attempt * 10)) })
                .await
                .unwrap();
        assert_eq!(
            result,
            Err(Exhausted {
                attempts: 4,
                last: Some(40)
            })
        );
    }

    #[tokio::test]
    async fn test_check_error_stops_polling() {
        let mut calls = 0;
        let result: SoloResult<Result<(), Exhausted<()>>> = poll_until(fast(10), |_| {
            calls += 1;
            async { Err(SoloError::RemoteConfigNotLoaded) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_policy_has_at_least_one_attempt() {
        assert_eq!(PollPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
