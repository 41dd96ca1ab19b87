use std::fmt;
use std::sync::Arc;

use strand_core::error::Result;
use tracing::debug;

use super::{Step, StepConfig};
use crate::context::Context;
use crate::executor::{run_sequence, ExecutionScope};

/// Branch selector, evaluated once on entry.
pub type Predicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Runs one of two step lists depending on a predicate over the context.
#[derive(Clone)]
pub struct ConditionalStep {
    predicate: Predicate,
    when_true: Vec<Arc<Step>>,
    when_false: Vec<Arc<Step>>,
}

impl ConditionalStep {
    pub fn new<P>(predicate: P) -> Self
    where
        P: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            when_true: Vec::new(),
            when_false: Vec::new(),
        }
    }

    pub fn when_true(&self) -> &[Arc<Step>] {
        &self.when_true
    }

    pub fn when_false(&self) -> &[Arc<Step>] {
        &self.when_false
    }

    pub fn then_step(mut self, step: Step) -> Self {
        self.when_true.push(Arc::new(step));
        self
    }

    pub fn else_step(mut self, step: Step) -> Self {
        self.when_false.push(Arc::new(step));
        self
    }

    pub fn when_true_all(mut self, steps: Vec<Step>) -> Self {
        self.when_true.extend(steps.into_iter().map(Arc::new));
        self
    }

    pub fn when_false_all(mut self, steps: Vec<Step>) -> Self {
        self.when_false.extend(steps.into_iter().map(Arc::new));
        self
    }

    pub(crate) fn push_true(&mut self, step: Step) {
        self.when_true.push(Arc::new(step));
    }

    pub(crate) fn push_false(&mut self, step: Step) {
        self.when_false.push(Arc::new(step));
    }

    pub(crate) async fn run(
        &self,
        config: &StepConfig,
        ctx: &mut Context,
        scope: &ExecutionScope,
    ) -> Result<()> {
        let chosen = (self.predicate)(ctx);
        let branch = if chosen { &self.when_true } else { &self.when_false };
        debug!(step = %config.name, branch = chosen, steps = branch.len(), "Conditional branch selected");
        run_sequence(branch, ctx, scope).await
    }
}

impl fmt::Debug for ConditionalStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalStep")
            .field("when_true", &self.when_true)
            .field("when_false", &self.when_false)
            .finish_non_exhaustive()
    }
}
