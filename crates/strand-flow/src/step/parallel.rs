use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use strand_core::error::{Result, StepFailure, StepFailures, StrandError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{Step, StepConfig};
use crate::context::Context;
use crate::executor::{run_step, ExecutionScope};

/// Fans sub-steps out over isolated child contexts and merges them back.
///
/// At most `max_concurrency` sub-steps run at once. Children are merged in
/// declared order once every launched sub-step has finished, so later
/// sub-steps win key conflicts regardless of completion order.
#[derive(Debug, Clone)]
pub struct ParallelStep {
    steps: Vec<Arc<Step>>,
    max_concurrency: Option<usize>,
    fail_fast: bool,
}

impl ParallelStep {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into_iter().map(Arc::new).collect(),
            max_concurrency: None,
            fail_fast: false,
        }
    }

    pub fn sub_step(mut self, step: Step) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Bound on simultaneously running sub-steps. Zero is treated as one.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Stop launching sub-steps after the first failure and report only that failure.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn steps(&self) -> &[Arc<Step>] {
        &self.steps
    }

    pub(crate) fn push(&mut self, step: Step) {
        self.steps.push(Arc::new(step));
    }

    pub(crate) fn set_max_concurrency(&mut self, limit: usize) {
        self.max_concurrency = Some(limit);
    }

    pub(crate) fn set_fail_fast(&mut self, fail_fast: bool) {
        self.fail_fast = fail_fast;
    }

    fn worker_limit(&self, scope: &ExecutionScope) -> usize {
        let n = self.steps.len();
        self.max_concurrency
            .or(scope.default_max_concurrency)
            .unwrap_or(n)
            .clamp(1, n.max(1))
    }

    pub(crate) async fn run(
        &self,
        config: &StepConfig,
        ctx: &mut Context,
        scope: &ExecutionScope,
    ) -> Result<()> {
        let n = self.steps.len();
        if n == 0 {
            return Ok(());
        }

        let limit = self.worker_limit(scope);
        let semaphore = Arc::new(Semaphore::new(limit));
        // Cancelled by the run token, or by the first failure when failing fast.
        let halt = scope.cancel.child_token();

        debug!(step = %config.name, sub_steps = n, limit, fail_fast = self.fail_fast, "Fanning out");

        let mut workers: JoinSet<(usize, Context, Result<()>)> = JoinSet::new();
        for (index, sub) in self.steps.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = halt.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => permit
                    .map_err(|_| StrandError::Step("parallel worker pool closed".into()))?,
            };

            let sub = Arc::clone(sub);
            let mut child = ctx.create_child();
            let scope = scope.clone();
            let halt = halt.clone();
            let fail_fast = self.fail_fast;

            workers.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(run_step(&sub, &mut child, &scope))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(StrandError::in_step(
                            sub.name(),
                            StrandError::Step(format!("panicked: {}", panic_message(&panic))),
                        ))
                    });
                if outcome.is_err() && fail_fast {
                    halt.cancel();
                }
                (index, child, outcome)
            });
        }

        // Barrier: every launched sub-step finishes before anything is merged.
        let mut children: Vec<Option<Context>> = (0..n).map(|_| None).collect();
        let mut outcomes: Vec<Option<Result<()>>> = (0..n).map(|_| None).collect();
        let mut first_failure: Option<usize> = None;
        while let Some(joined) = workers.join_next().await {
            let (index, child, outcome) = joined
                .map_err(|e| StrandError::Step(format!("parallel worker did not complete: {e}")))?;
            if outcome.is_err() && first_failure.is_none() {
                first_failure = Some(index);
            }
            children[index] = Some(child);
            outcomes[index] = Some(outcome);
        }

        let skipped = outcomes.iter().filter(|o| o.is_none()).count();
        if skipped > 0 {
            warn!(step = %config.name, skipped, "Sub-steps not launched");
        }

        for child in children.into_iter().flatten() {
            ctx.absorb(child);
        }

        if scope.cancel.is_cancelled() {
            return Err(StrandError::Cancelled);
        }

        if self.fail_fast {
            if let Some(index) = first_failure {
                if let Some(Some(Err(e))) = outcomes.get_mut(index).map(Option::take) {
                    return Err(e);
                }
            }
            return Ok(());
        }

        let failures: Vec<StepFailure> = outcomes
            .into_iter()
            .zip(&self.steps)
            .filter_map(|(outcome, sub)| match outcome {
                Some(Err(e)) => Some(StepFailure {
                    step: sub.name().to_string(),
                    error: unwrap_step_error(sub.name(), e),
                }),
                _ => None,
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StrandError::ParallelAggregate {
                step: config.name.clone(),
                failures: StepFailures(failures),
            })
        }
    }
}

/// Drop the outer wrapper naming `step`; the aggregate already records it.
fn unwrap_step_error(step: &str, error: StrandError) -> StrandError {
    match error {
        StrandError::StepExecution { step: s, source } if s == step => *source,
        other => other,
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
