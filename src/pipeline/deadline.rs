//! Deadline race with a compensating action

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::utils::SoloResult;

/// How a deadline-guarded operation ended
#[derive(Debug)]
pub enum DeadlineOutcome<T> {
    /// The operation finished before the deadline
    Completed(SoloResult<T>),
    /// The deadline fired first and the compensating action ran once
    Expired {
        compensation: SoloResult<()>,
        /// Set when the operation still finished while compensation ran
        late_result: Option<SoloResult<T>>,
    },
}

impl<T> DeadlineOutcome<T> {
    pub fn timed_out(&self) -> bool {
        matches!(self, DeadlineOutcome::Expired { .. })
    }
}

/// Race `operation` against `deadline`.
///
/// The timeout decision is made exactly once. When the deadline wins, the
/// compensating action is started while the operation keeps being polled;
/// the race ends when the compensation completes. The operation is never
/// preempted before that point.
pub async fn race_deadline<T, Op, Comp, CompFut>(
    deadline: Duration,
    operation: Op,
    compensate: Comp,
) -> DeadlineOutcome<T>
where
    Op: Future<Output = SoloResult<T>>,
    Comp: FnOnce() -> CompFut,
    CompFut: Future<Output = SoloResult<()>>,
{
    tokio::pin!(operation);

    tokio::select! {
        result = &mut operation => return DeadlineOutcome::Completed(result),
        _ = tokio::time::sleep(deadline) => {}
    }

    warn!(?deadline, "Deadline reached, running compensating action");
    let compensation = compensate();
    tokio::pin!(compensation);

    let (compensation, late_result) = tokio::select! {
        done = &mut compensation => (done, None),
        result = &mut operation => {
            info!("Operation finished while compensating action was running");
            ((&mut compensation).await, Some(result))
        }
    };

    DeadlineOutcome::Expired {
        compensation,
        late_result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SoloError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_completes_before_deadline() {
        let compensations = AtomicUsize::new(0);
        let outcome = race_deadline(
            Duration::from_secs(5),
            async { Ok::<_, SoloError>(7) },
            || async {
                compensations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert!(!outcome.timed_out());
        assert!(matches!(outcome, DeadlineOutcome::Completed(Ok(7))));
        assert_eq!(compensations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_runs_compensation_once() {
        let compensations = AtomicUsize::new(0);
        let outcome = race_deadline(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, SoloError>(())
            },
            || async {
                compensations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert!(outcome.timed_out());
        match outcome {
            DeadlineOutcome::Expired {
                compensation,
                late_result,
            } => {
                assert!(compensation.is_ok());
                assert!(late_result.is_none());
            }
            DeadlineOutcome::Completed(_) => panic!("expected expiry"),
        }
        assert_eq!(compensations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_operation_may_finish_during_compensation() {
        let outcome = race_deadline(
            Duration::from_millis(5),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, SoloError>("done")
            },
            || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            },
        )
        .await;

        match outcome {
            DeadlineOutcome::Expired { late_result, .. } => {
                assert!(matches!(late_result, Some(Ok("done"))));
            }
            DeadlineOutcome::Completed(_) => panic!("expected expiry"),
        }
    }
}
