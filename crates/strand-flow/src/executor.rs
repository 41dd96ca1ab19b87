//! Step interpreter: sequencing, retries, timeouts, and the can-fail policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use strand_core::config::RetryConfig;
use strand_core::error::{Result, StrandError};
use strand_core::event::EventBus;
use strand_core::traits::{Model, Tool};
use strand_core::types::{FlowEvent, StreamCallback, StreamChunk};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::registries::Registries;
use crate::step::{CapabilityRef, Step, StepKind};

/// Everything a step needs from the run that owns it. Cheap to clone into workers.
#[derive(Clone)]
pub(crate) struct ExecutionScope {
    pub flow: Arc<str>,
    pub cancel: CancellationToken,
    pub retry: RetryConfig,
    pub default_timeout: Option<Duration>,
    pub default_max_concurrency: Option<usize>,
    pub registries: Registries,
    pub events: Option<Arc<EventBus>>,
    pub stream: Option<StreamCallback>,
}

impl ExecutionScope {
    pub fn resolve_tool(&self, tool: &CapabilityRef<dyn Tool>) -> Result<Arc<dyn Tool>> {
        match tool {
            CapabilityRef::Direct(t) => Ok(Arc::clone(t)),
            CapabilityRef::Named(name) => self.registries.tools.get(name),
        }
    }

    pub fn resolve_model(&self, model: &CapabilityRef<dyn Model>) -> Result<Arc<dyn Model>> {
        match model {
            CapabilityRef::Direct(m) => Ok(Arc::clone(m)),
            CapabilityRef::Named(name) => self.registries.models.get(name),
        }
    }

    fn publish(&self, event: FlowEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

/// Run steps in order, stopping at the first unrecovered failure.
pub(crate) async fn run_sequence(
    steps: &[Arc<Step>],
    ctx: &mut Context,
    scope: &ExecutionScope,
) -> Result<()> {
    for step in steps {
        run_step(step, ctx, scope).await?;
    }
    Ok(())
}

/// Run one step, applying its can-fail policy.
pub(crate) fn run_step<'a>(
    step: &'a Step,
    ctx: &'a mut Context,
    scope: &'a ExecutionScope,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        match execute_step(step, ctx, scope).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Cancellation of the run is never swallowed.
                let recovered = step.config().can_fail && !scope.cancel.is_cancelled();
                scope.publish(FlowEvent::StepFailed {
                    flow: scope.flow.to_string(),
                    step: step.name().to_string(),
                    error: e.to_string(),
                    recovered,
                });
                if recovered {
                    warn!(flow = %scope.flow, step = %step.name(), error = %e, "Step failed, continuing");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    })
}

/// Run one step with its retry budget. Errors come back tagged with the step name.
async fn execute_step(step: &Step, ctx: &mut Context, scope: &ExecutionScope) -> Result<()> {
    let config = step.config();
    if scope.cancel.is_cancelled() {
        return Err(StrandError::in_step(&config.name, StrandError::Cancelled));
    }
    if let Some(missing) = config.inputs.iter().find(|key| !ctx.has(key)) {
        return Err(StrandError::in_step(
            &config.name,
            StrandError::Validation(format!("required input '{missing}' is not in context")),
        ));
    }

    scope.publish(FlowEvent::StepStarted {
        flow: scope.flow.to_string(),
        step: config.name.clone(),
    });
    let start = Instant::now();
    debug!(flow = %scope.flow, step = %config.name, kind = step.kind().label(), "Step started");

    let mut attempt = 0u32;
    loop {
        // A retried attempt starts from the context as it was before the failed one.
        let snapshot = (attempt < config.retries).then(|| ctx.clone());
        match attempt_step(step, ctx, scope).await {
            Ok(()) => break,
            Err(e) => {
                let retryable = is_retryable(&e) && !scope.cancel.is_cancelled();
                if !retryable || attempt >= config.retries {
                    return Err(attribute(&config.name, e));
                }
                if let Some(snapshot) = snapshot {
                    *ctx = snapshot;
                }
                let backoff = calculate_backoff(attempt, &scope.retry);
                warn!(
                    step = %config.name,
                    attempt = attempt + 1,
                    max_retries = config.retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Step attempt failed, retrying"
                );
                scope.publish(FlowEvent::StepRetrying {
                    flow: scope.flow.to_string(),
                    step: config.name.clone(),
                    attempt: attempt + 1,
                    error: e.to_string(),
                });
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = scope.cancel.cancelled() => {
                        return Err(StrandError::in_step(&config.name, StrandError::Cancelled));
                    }
                }
                attempt += 1;
            }
        }
    }

    let elapsed_ms = start.elapsed().as_millis() as u64;
    info!(flow = %scope.flow, step = %config.name, elapsed_ms, "Step completed");
    scope.publish(FlowEvent::StepCompleted {
        flow: scope.flow.to_string(),
        step: config.name.clone(),
        elapsed_ms,
    });
    if let Some(sink) = &scope.stream {
        let content = output_snapshot(step, ctx).to_string();
        sink(StreamChunk::delta(content).for_step(config.name.clone()));
    }
    Ok(())
}

/// One attempt, bounded by the step deadline and the run's cancellation.
async fn attempt_step(step: &Step, ctx: &mut Context, scope: &ExecutionScope) -> Result<()> {
    let config = step.config();
    // Containers are bounded by their own timeout or the flow deadline only.
    let default_timeout = match step.kind() {
        StepKind::Parallel(_) | StepKind::Conditional(_) => None,
        _ => scope.default_timeout,
    };
    let work = dispatch(step, ctx, scope);
    let bounded = async {
        match config.timeout.or(default_timeout) {
            Some(limit) => tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
                Err(StrandError::DeadlineExceeded {
                    scope: format!("step '{}'", config.name),
                    timeout_ms: limit.as_millis() as u64,
                })
            }),
            None => work.await,
        }
    };
    tokio::select! {
        result = bounded => result,
        _ = scope.cancel.cancelled() => Err(StrandError::Cancelled),
    }
}

async fn dispatch(step: &Step, ctx: &mut Context, scope: &ExecutionScope) -> Result<()> {
    let config = step.config();
    match step.kind() {
        StepKind::Tool(s) => s.run(config, ctx, scope).await,
        StepKind::Model(s) => s.run(config, ctx, scope).await,
        StepKind::Custom(s) => s.run(config, ctx, scope).await,
        StepKind::Parallel(s) => s.run(config, ctx, scope).await,
        StepKind::Conditional(s) => s.run(config, ctx, scope).await,
    }
}

/// Tag an error with its step unless it already names that step.
fn attribute(step: &str, e: StrandError) -> StrandError {
    if matches!(&e, StrandError::ParallelAggregate { step: s, .. } if s == step) {
        e
    } else {
        StrandError::in_step(step, e)
    }
}

/// Errors another attempt cannot fix are not retried.
fn is_retryable(e: &StrandError) -> bool {
    !matches!(
        e,
        StrandError::Cancelled
            | StrandError::Validation(_)
            | StrandError::ContextKeyNotFound(_)
            | StrandError::ContextType { .. }
            | StrandError::NotFound { .. }
    )
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

/// JSON object of the step's declared outputs that are present in the context.
fn output_snapshot(step: &Step, ctx: &Context) -> serde_json::Value {
    let config = step.config();
    let keys: Vec<&str> = match step.kind() {
        StepKind::Tool(_) | StepKind::Model(_) => {
            let mut keys = vec![config.output_key()];
            keys.extend(config.outputs.iter().skip(1).map(String::as_str));
            keys
        }
        _ => config.outputs.iter().map(String::as_str).collect(),
    };
    let map = keys
        .into_iter()
        .filter_map(|key| ctx.get(key).map(|v| (key.to_string(), v.to_json())))
        .collect();
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        let first = calculate_backoff(0, &config).as_millis();
        assert!((80..=120).contains(&first));
        let third = calculate_backoff(2, &config).as_millis();
        assert!((320..=480).contains(&third));
        let capped = calculate_backoff(30, &config).as_millis();
        assert!(capped <= 1_200);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&StrandError::Step("flaky".into())));
        assert!(is_retryable(&StrandError::DeadlineExceeded {
            scope: "step 's'".into(),
            timeout_ms: 10,
        }));
        assert!(!is_retryable(&StrandError::Cancelled));
        assert!(!is_retryable(&StrandError::ContextKeyNotFound("k".into())));
    }
}
