//! Interpreter for phase lists

use futures::future::{BoxFuture, join_all};
use indicatif::MultiProgress;
use tracing::{debug, info, warn};

use super::phase::{ConcurrentPhase, Phase, PhaseAction};
use crate::utils::progress::PhaseProgress;
use crate::utils::SoloResult;

/// Checked before every phase; an error aborts the pipeline
pub trait Watchdog: Send + Sync {
    fn check(&self) -> SoloResult<()>;
}

/// Titles of the phases that ran and the ones that were bypassed
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PipelineReport {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
}

impl PipelineReport {
    pub fn ran(&self, title: &str) -> bool {
        self.executed.iter().any(|t| t == title)
    }

    pub fn was_skipped(&self, title: &str) -> bool {
        self.skipped.iter().any(|t| t == title)
    }
}

/// An ordered list of phases over a context `C`
pub struct Pipeline<C> {
    title: String,
    phases: Vec<Phase<C>>,
    show_progress: bool,
}

impl<C: Send + Sync> Pipeline<C> {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            phases: Vec::new(),
            show_progress: false,
        }
    }

    pub fn phase(mut self, phase: Phase<C>) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn phases(mut self, phases: impl IntoIterator<Item = Phase<C>>) -> Self {
        self.phases.extend(phases);
        self
    }

    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub async fn run(&self, ctx: &mut C) -> SoloResult<PipelineReport> {
        self.execute(ctx, None).await
    }

    /// Run with a watchdog consulted before each phase
    pub async fn run_watched(
        &self,
        ctx: &mut C,
        watchdog: &dyn Watchdog,
    ) -> SoloResult<PipelineReport> {
        self.execute(ctx, Some(watchdog)).await
    }

    async fn execute(
        &self,
        ctx: &mut C,
        watchdog: Option<&dyn Watchdog>,
    ) -> SoloResult<PipelineReport> {
        info!(pipeline = %self.title, phases = self.phases.len(), "Starting pipeline");
        let mut report = PipelineReport::default();
        run_phases(&self.phases, ctx, watchdog, &mut report, self.show_progress).await?;
        info!(
            pipeline = %self.title,
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            "Pipeline finished"
        );
        Ok(report)
    }
}

fn run_phases<'a, C: Send + Sync>(
    phases: &'a [Phase<C>],
    ctx: &'a mut C,
    watchdog: Option<&'a dyn Watchdog>,
    report: &'a mut PipelineReport,
    show_progress: bool,
) -> BoxFuture<'a, SoloResult<()>> {
    Box::pin(async move {
        for phase in phases {
            if let Some(watchdog) = watchdog {
                watchdog.check()?;
            }

            if phase.should_skip(ctx) {
                debug!(phase = %phase.title, "Skipping phase");
                PhaseProgress::start(&phase.title, show_progress).finish_skipped();
                report.skipped.push(phase.title.clone());
                continue;
            }

            info!(phase = %phase.title, "Running phase");
            let progress = PhaseProgress::start(&phase.title, show_progress);
            let result = match &phase.action {
                PhaseAction::Run(run) => run(ctx).await,
                PhaseAction::Sequential(children) => {
                    run_phases(children, ctx, watchdog, report, show_progress).await
                }
                PhaseAction::Concurrent(children) => {
                    run_concurrent(children, ctx, report, show_progress).await
                }
            };

            match result {
                Ok(()) => {
                    progress.finish_success();
                    report.executed.push(phase.title.clone());
                }
                Err(e) => {
                    progress.finish_error(&e.to_string());
                    warn!(phase = %phase.title, error = %e, "Phase failed, aborting pipeline");
                    return Err(e);
                }
            }
        }
        Ok(())
    })
}

async fn run_concurrent<C: Send + Sync>(
    children: &[ConcurrentPhase<C>],
    ctx: &C,
    report: &mut PipelineReport,
    show_progress: bool,
) -> SoloResult<()> {
    let multi = MultiProgress::new();

    let mut runnable = Vec::with_capacity(children.len());
    for child in children {
        if child.should_skip(ctx) {
            debug!(phase = %child.title, "Skipping concurrent phase");
            report.skipped.push(child.title.clone());
        } else {
            runnable.push(child);
        }
    }

    let results = join_all(runnable.iter().map(|child| {
        let progress = PhaseProgress::start_in(&multi, &child.title, show_progress);
        async move {
            let result = child.run(ctx).await;
            match &result {
                Ok(()) => progress.finish_success(),
                Err(e) => progress.finish_error(&e.to_string()),
            }
            result
        }
    }))
    .await;

    let mut first_error = None;
    for (child, result) in runnable.iter().zip(results) {
        match result {
            Ok(()) => report.executed.push(child.title.clone()),
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(e) => warn!(phase = %child.title, error = %e, "Concurrent phase also failed"),
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SoloError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Ctx {
        log: Mutex<Vec<String>>,
        flag: bool,
    }

    impl Ctx {
        fn push(&self, entry: &str) {
            self.log.lock().unwrap().push(entry.to_string());
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    fn step(name: &'static str) -> Phase<Ctx> {
        Phase::new(name, move |ctx: &mut Ctx| {
            Box::pin(async move {
                ctx.push(name);
                Ok::<(), SoloError>(())
            })
        })
    }

    fn failing(name: &'static str) -> Phase<Ctx> {
        Phase::new(name, move |_ctx: &mut Ctx| {
            Box::pin(async move { Err::<(), _>(SoloError::MissingArgument(name.to_string())) })
        })
    }

    fn delayed(name: &'static str, millis: u64) -> ConcurrentPhase<Ctx> {
        ConcurrentPhase::new(name, move |ctx: &Ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                ctx.push(name);
                Ok::<(), SoloError>(())
            })
        })
    }

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let pipeline = Pipeline::new("ordered")
            .phase(step("one"))
            .phase(step("two"))
            .phase(step("three"));
        let mut ctx = Ctx::default();

        let report = pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.entries(), vec!["one", "two", "three"]);
        assert_eq!(report.executed, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_skipped_phase_is_not_executed() {
        let pipeline = Pipeline::new("skip")
            .phase(Phase::new("set flag", |ctx: &mut Ctx| {
                Box::pin(async move {
                    ctx.flag = true;
                    Ok::<(), SoloError>(())
                })
            }))
            .phase(step("guarded").skip_if(|ctx: &Ctx| ctx.flag))
            .phase(step("after"));
        let mut ctx = Ctx::default();

        let report = pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.entries(), vec!["after"]);
        assert!(report.was_skipped("guarded"));
        assert!(!report.ran("guarded"));
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_phases() {
        let pipeline = Pipeline::new("abort")
            .phase(step("one"))
            .phase(Phase::sequential(
                "group",
                vec![step("inner"), failing("boom"), step("never")],
            ))
            .phase(step("also never"));
        let mut ctx = Ctx::default();

        let err = pipeline.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, SoloError::MissingArgument(ref a) if a == "boom"));
        assert_eq!(ctx.entries(), vec!["one", "inner"]);
    }

    #[tokio::test]
    async fn test_concurrent_group_waits_for_all() {
        let pipeline = Pipeline::new("concurrent")
            .phase(Phase::concurrent(
                "install",
                vec![delayed("slow", 30), delayed("fast", 1)],
            ))
            .phase(step("after"));
        let mut ctx = Ctx::default();

        let report = pipeline.run(&mut ctx).await.unwrap();
        // started together, so the fast one finishes first
        assert_eq!(ctx.entries(), vec!["fast", "slow", "after"]);
        assert!(report.ran("slow") && report.ran("fast") && report.ran("install"));
    }

    #[tokio::test]
    async fn test_concurrent_group_surfaces_first_failure_after_all_finish() {
        let failing_child = ConcurrentPhase::new("bad", |_ctx: &Ctx| {
            Box::pin(async move { Err::<(), _>(SoloError::MissingArgument("bad".to_string())) })
        });
        let pipeline = Pipeline::new("concurrent failure")
            .phase(Phase::concurrent(
                "install",
                vec![failing_child, delayed("slow", 20)],
            ))
            .phase(step("after"));
        let mut ctx = Ctx::default();

        let err = pipeline.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, SoloError::MissingArgument(ref a) if a == "bad"));
        // the sibling still ran to completion, the next phase did not
        assert_eq!(ctx.entries(), vec!["slow"]);
    }

    struct Tripwire(AtomicBool);

    impl Watchdog for Tripwire {
        fn check(&self) -> SoloResult<()> {
            if self.0.load(Ordering::SeqCst) {
                return Err(SoloError::LeaseLost {
                    namespace: "solo".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_watchdog_aborts_before_next_phase() {
        let wire = std::sync::Arc::new(Tripwire(AtomicBool::new(false)));
        let trip = wire.clone();
        let pipeline = Pipeline::new("watched")
            .phase(Phase::new("trip", move |ctx: &mut Ctx| {
                trip.0.store(true, Ordering::SeqCst);
                Box::pin(async move {
                    ctx.push("trip");
                    Ok::<(), SoloError>(())
                })
            }))
            .phase(step("never"));
        let mut ctx = Ctx::default();

        let err = pipeline.run_watched(&mut ctx, wire.as_ref()).await.unwrap_err();
        assert!(matches!(err, SoloError::LeaseLost { .. }));
        assert_eq!(ctx.entries(), vec!["trip"]);
    }
}
