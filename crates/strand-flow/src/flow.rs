use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strand_core::config::EngineConfig;
use strand_core::error::{Result, StrandError};
use strand_core::event::EventBus;
use strand_core::types::{FlowEvent, RunId, StreamCallback, StreamChunk};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument, Span};

use crate::context::Context;
use crate::executor::{run_sequence, ExecutionScope};
use crate::registries::Registries;
use crate::step::Step;
use crate::validator::{DependencyValidator, ResolvedDependency};

/// Descriptive tag for how a flow's steps are arranged. Execution always
/// follows the declared step sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPattern {
    #[default]
    Sequential,
    Parallel,
    Hybrid,
}

/// What a flow needs from its environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Every required model must accept media.
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub models: Vec<String>,
    /// Default bound for parallel steps that declare none.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Deadline for a whole run.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ResourceRequirements {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

/// Flow identity and declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub pattern: ExecutionPattern,
    #[serde(default)]
    pub requirements: ResourceRequirements,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
}

impl FlowMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            description: String::new(),
            category: String::new(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            pattern: ExecutionPattern::default(),
            requirements: ResourceRequirements::default(),
            input_schema: None,
            output_schema: None,
        }
    }
}

/// Lifecycle of a flow.
///
/// `Uninitialized → Initialized → Executing → Completed | Failed`, and any
/// state to `Shutdown`. Completed and failed flows may run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    Uninitialized,
    Initialized,
    Executing,
    Completed,
    Failed,
    Shutdown,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

struct Lifecycle {
    state: FlowState,
    config: Option<EngineConfig>,
    registries: Option<Registries>,
    events: Option<Arc<EventBus>>,
    validated: bool,
    in_flight: usize,
}

/// Snapshot taken when a run is admitted.
struct Admission {
    config: EngineConfig,
    registries: Registries,
    events: Arc<EventBus>,
    needs_validation: bool,
}

/// Releases an admitted run even if its future is dropped mid-flight.
struct ReleaseGuard<'a> {
    flow: &'a Flow,
    succeeded: bool,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.flow.release(self.succeeded);
    }
}

/// A named, validated sequence of steps.
pub struct Flow {
    metadata: FlowMetadata,
    steps: Vec<Arc<Step>>,
    lifecycle: Mutex<Lifecycle>,
    shutdown: CancellationToken,
    shared_events: Option<Arc<EventBus>>,
}

impl Flow {
    pub(crate) fn new(
        metadata: FlowMetadata,
        steps: Vec<Step>,
        shared_events: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            metadata,
            steps: steps.into_iter().map(Arc::new).collect(),
            lifecycle: Mutex::new(Lifecycle {
                state: FlowState::Uninitialized,
                config: None,
                registries: None,
                events: None,
                validated: false,
                in_flight: 0,
            }),
            shutdown: CancellationToken::new(),
            shared_events,
        }
    }

    // ── Metadata ────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    pub fn description(&self) -> &str {
        &self.metadata.description
    }

    pub fn category(&self) -> &str {
        &self.metadata.category
    }

    pub fn tags(&self) -> &[String] {
        &self.metadata.tags
    }

    pub fn dependencies(&self) -> &[String] {
        &self.metadata.dependencies
    }

    pub fn pattern(&self) -> ExecutionPattern {
        self.metadata.pattern
    }

    pub fn requirements(&self) -> &ResourceRequirements {
        &self.metadata.requirements
    }

    pub fn input_schema(&self) -> Option<&serde_json::Value> {
        self.metadata.input_schema.as_ref()
    }

    pub fn output_schema(&self) -> Option<&serde_json::Value> {
        self.metadata.output_schema.as_ref()
    }

    pub fn metadata(&self) -> &FlowMetadata {
        &self.metadata
    }

    pub fn steps(&self) -> &[Arc<Step>] {
        &self.steps
    }

    // ── Lifecycle ───────────────────────────────────────────────

    pub fn state(&self) -> FlowState {
        self.lifecycle.lock().state
    }

    /// Bind engine configuration and registries. Allowed exactly once.
    pub fn initialize(&self, config: EngineConfig, registries: Registries) -> Result<()> {
        let mut lc = self.lifecycle.lock();
        match lc.state {
            FlowState::Uninitialized => {}
            FlowState::Shutdown => return Err(StrandError::ShutDown(self.name().to_string())),
            _ => return Err(StrandError::AlreadyInitialized(self.name().to_string())),
        }
        let events = self
            .shared_events
            .clone()
            .unwrap_or_else(|| Arc::new(EventBus::new(config.event_capacity.max(1))));
        lc.config = Some(config);
        lc.registries = Some(registries);
        lc.events = Some(events);
        lc.state = FlowState::Initialized;
        info!(flow = %self.name(), version = %self.version(), "Flow initialized");
        Ok(())
    }

    /// Resolve dependencies and check requirements against the bound registries.
    pub fn validate(&self) -> Result<Vec<ResolvedDependency>> {
        let (registries, strict) = {
            let lc = self.lifecycle.lock();
            match (&lc.registries, &lc.config) {
                (Some(registries), Some(config)) => {
                    (registries.clone(), config.strict_dependencies)
                }
                _ => return Err(StrandError::NotInitialized(self.name().to_string())),
            }
        };
        let resolved = DependencyValidator::new(&registries)
            .strict(strict)
            .validate(self)?;
        self.lifecycle.lock().validated = true;
        Ok(resolved)
    }

    /// Subscribe to run and step events.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<FlowEvent>> {
        self.lifecycle
            .lock()
            .events
            .as_ref()
            .map(|events| events.subscribe())
            .ok_or_else(|| StrandError::NotInitialized(self.name().to_string()))
    }

    /// Stop accepting runs and cancel those in flight. Idempotent.
    pub fn shutdown(&self) {
        let mut lc = self.lifecycle.lock();
        if lc.state == FlowState::Shutdown {
            return;
        }
        lc.state = FlowState::Shutdown;
        self.shutdown.cancel();
        info!(flow = %self.name(), in_flight = lc.in_flight, "Flow shut down");
    }

    // ── Execution ───────────────────────────────────────────────

    /// Run the flow on a JSON object and return the final context.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        input: serde_json::Value,
    ) -> Result<Context> {
        self.ensure_runnable()?;
        let run_id = RunId::new();
        let span = self.run_span(&run_id);
        let ctx = Context::from_json_object(input, span.clone())?;
        self.run(cancel, ctx, run_id, span, None).await
    }

    /// Run the flow on an existing context.
    pub async fn execute_context(&self, cancel: &CancellationToken, ctx: Context) -> Result<Context> {
        let run_id = RunId::new();
        let span = self.run_span(&run_id);
        self.run(cancel, ctx, run_id, span, None).await
    }

    /// Run the flow, forwarding model deltas and step results to `callback`.
    ///
    /// A final chunk with `done = true` carries the resulting context as JSON.
    pub async fn execute_streaming(
        &self,
        cancel: &CancellationToken,
        input: serde_json::Value,
        callback: StreamCallback,
    ) -> Result<()> {
        self.ensure_runnable()?;
        let run_id = RunId::new();
        let span = self.run_span(&run_id);
        let ctx = Context::from_json_object(input, span.clone())?;
        let ctx = self
            .run(cancel, ctx, run_id, span, Some(Arc::clone(&callback)))
            .await?;
        callback(StreamChunk {
            step: None,
            content: ctx.to_json().to_string(),
            done: true,
        });
        Ok(())
    }

    fn run_span(&self, run_id: &RunId) -> Span {
        info_span!("flow", flow = %self.name(), run_id = %run_id)
    }

    fn ensure_runnable(&self) -> Result<()> {
        match self.lifecycle.lock().state {
            FlowState::Uninitialized => Err(StrandError::NotInitialized(self.name().to_string())),
            FlowState::Shutdown => Err(StrandError::ShutDown(self.name().to_string())),
            _ => Ok(()),
        }
    }

    fn admit(&self) -> Result<Admission> {
        let mut lc = self.lifecycle.lock();
        match lc.state {
            FlowState::Uninitialized => {
                return Err(StrandError::NotInitialized(self.name().to_string()))
            }
            FlowState::Shutdown => return Err(StrandError::ShutDown(self.name().to_string())),
            _ => {}
        }
        let (Some(config), Some(registries), Some(events)) =
            (lc.config.clone(), lc.registries.clone(), lc.events.clone())
        else {
            return Err(StrandError::NotInitialized(self.name().to_string()));
        };
        lc.state = FlowState::Executing;
        lc.in_flight += 1;
        Ok(Admission {
            config,
            registries,
            events,
            needs_validation: !lc.validated,
        })
    }

    fn release(&self, succeeded: bool) {
        let mut lc = self.lifecycle.lock();
        lc.in_flight = lc.in_flight.saturating_sub(1);
        if lc.state != FlowState::Shutdown && lc.in_flight == 0 {
            lc.state = if succeeded {
                FlowState::Completed
            } else {
                FlowState::Failed
            };
        }
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        mut ctx: Context,
        run_id: RunId,
        span: Span,
        stream: Option<StreamCallback>,
    ) -> Result<Context> {
        let admission = self.admit()?;
        let mut release = ReleaseGuard {
            flow: self,
            succeeded: false,
        };
        if admission.needs_validation {
            if let Err(e) = self.validate() {
                error!(parent: &span, error = %e, "Flow dependencies invalid");
                return Err(e);
            }
        }

        // The run token fires on caller cancellation or flow shutdown.
        let run_cancel = self.shutdown.child_token();
        let _run_guard = run_cancel.clone().drop_guard();
        {
            let caller = cancel.clone();
            let run = run_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => run.cancel(),
                    _ = run.cancelled() => {}
                }
            });
        }

        let events = admission.events;
        let scope = ExecutionScope {
            flow: Arc::from(self.name()),
            cancel: run_cancel,
            retry: admission.config.retry.clone(),
            default_timeout: admission.config.default_step_timeout(),
            default_max_concurrency: self
                .requirements()
                .max_concurrency
                .or(admission.config.default_max_concurrency()),
            registries: admission.registries,
            events: Some(Arc::clone(&events)),
            stream,
        };

        events.publish(FlowEvent::RunStarted {
            flow: self.name().to_string(),
            run_id: run_id.clone(),
        });
        info!(parent: &span, steps = self.steps.len(), pattern = ?self.pattern(), "Flow run started");
        let start = Instant::now();

        let result = {
            let work = run_sequence(&self.steps, &mut ctx, &scope).instrument(span.clone());
            match self.requirements().timeout() {
                Some(limit) => tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
                    Err(StrandError::DeadlineExceeded {
                        scope: format!("flow '{}'", self.name()),
                        timeout_ms: limit.as_millis() as u64,
                    })
                }),
                None => work.await,
            }
        };

        release.succeeded = result.is_ok();
        drop(release);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => {
                info!(parent: &span, elapsed_ms, keys = ctx.len(), "Flow run completed");
                events.publish(FlowEvent::RunCompleted {
                    flow: self.name().to_string(),
                    run_id,
                    elapsed_ms,
                    finished_at: chrono::Utc::now(),
                });
            }
            Err(e) => {
                error!(parent: &span, elapsed_ms, error = %e, "Flow run failed");
                events.publish(FlowEvent::RunFailed {
                    flow: self.name().to_string(),
                    run_id,
                    error: e.to_string(),
                });
            }
        }
        result.map(|()| ctx)
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.metadata.name)
            .field("version", &self.metadata.version)
            .field("state", &self.state())
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl Drop for Flow {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
