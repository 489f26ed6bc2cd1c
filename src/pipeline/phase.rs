//! Pipeline phases as data

use futures::future::BoxFuture;

use crate::utils::SoloResult;

/// Future returned by a phase action
pub type PhaseFuture<'a> = BoxFuture<'a, SoloResult<()>>;

type RunFn<C> = Box<dyn for<'a> Fn(&'a mut C) -> PhaseFuture<'a> + Send + Sync>;
type SharedRunFn<C> = Box<dyn for<'a> Fn(&'a C) -> PhaseFuture<'a> + Send + Sync>;
type SkipFn<C> = Box<dyn Fn(&C) -> bool + Send + Sync>;

/// What a phase does when it is not skipped
pub enum PhaseAction<C> {
    /// A single step with exclusive access to the context
    Run(RunFn<C>),
    /// Sub-phases run in order; the first failure aborts the rest
    Sequential(Vec<Phase<C>>),
    /// Sub-phases started together over a shared context
    Concurrent(Vec<ConcurrentPhase<C>>),
}

/// One named step of a pipeline
pub struct Phase<C> {
    pub title: String,
    skip: Option<SkipFn<C>>,
    pub action: PhaseAction<C>,
}

impl<C> Phase<C> {
    pub fn new<F>(title: impl Into<String>, run: F) -> Self
    where
        F: for<'a> Fn(&'a mut C) -> PhaseFuture<'a> + Send + Sync + 'static,
    {
        Self {
            title: title.into(),
            skip: None,
            action: PhaseAction::Run(Box::new(run)),
        }
    }

    pub fn sequential(title: impl Into<String>, phases: Vec<Phase<C>>) -> Self {
        Self {
            title: title.into(),
            skip: None,
            action: PhaseAction::Sequential(phases),
        }
    }

    pub fn concurrent(title: impl Into<String>, phases: Vec<ConcurrentPhase<C>>) -> Self {
        Self {
            title: title.into(),
            skip: None,
            action: PhaseAction::Concurrent(phases),
        }
    }

    /// Bypass the phase when `predicate` holds for the context
    pub fn skip_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Box::new(predicate));
        self
    }

    pub fn should_skip(&self, ctx: &C) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip(ctx))
    }
}

/// A leaf phase run inside a concurrent group; it only reads the context
pub struct ConcurrentPhase<C> {
    pub title: String,
    skip: Option<SkipFn<C>>,
    run: SharedRunFn<C>,
}

impl<C> ConcurrentPhase<C> {
    pub fn new<F>(title: impl Into<String>, run: F) -> Self
    where
        F: for<'a> Fn(&'a C) -> PhaseFuture<'a> + Send + Sync + 'static,
    {
        Self {
            title: title.into(),
            skip: None,
            run: Box::new(run),
        }
    }

    pub fn skip_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Box::new(predicate));
        self
    }

    pub fn should_skip(&self, ctx: &C) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip(ctx))
    }

    pub fn run<'a>(&self, ctx: &'a C) -> PhaseFuture<'a> {
        (self.run)(ctx)
    }
}
