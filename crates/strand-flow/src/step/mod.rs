//! Steps: the units of work a flow executes.
//!
//! A [`Step`] pairs shared configuration ([`StepConfig`]) with one variant
//! from a closed set ([`StepKind`]). The executor dispatches on the variant
//! with a single `match`; steps hold no execution state.

pub mod conditional;
pub mod custom;
pub mod model;
pub mod parallel;
pub mod tool;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use conditional::{ConditionalStep, Predicate};
pub use custom::{CustomStep, StepFn};
pub use model::ModelStep;
pub use parallel::ParallelStep;
pub use tool::ToolStep;

/// A capability given either directly or by registry name.
pub enum CapabilityRef<T: ?Sized> {
    Direct(Arc<T>),
    Named(String),
}

impl<T: ?Sized> CapabilityRef<T> {
    /// The registry name, for by-name references.
    pub fn registry_name(&self) -> Option<&str> {
        match self {
            Self::Direct(_) => None,
            Self::Named(name) => Some(name),
        }
    }
}

impl<T: ?Sized> Clone for CapabilityRef<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Direct(c) => Self::Direct(Arc::clone(c)),
            Self::Named(name) => Self::Named(name.clone()),
        }
    }
}

impl<T: ?Sized> fmt::Debug for CapabilityRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(_) => f.write_str("Direct(..)"),
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}

/// Configuration shared by every step variant.
#[derive(Debug, Clone, Default)]
pub struct StepConfig {
    pub name: String,
    pub description: String,
    /// Per-attempt deadline. `None` falls back to the engine default.
    pub timeout: Option<Duration>,
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// A failing can-fail step is logged and skipped instead of aborting.
    pub can_fail: bool,
    /// Keys that must be present before the step runs.
    pub inputs: Vec<String>,
    /// Keys the step provides.
    pub outputs: Vec<String>,
}

impl StepConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Where single-output steps write: the first declared output, else the step name.
    pub fn output_key(&self) -> &str {
        self.outputs.first().map(String::as_str).unwrap_or(&self.name)
    }
}

/// The closed set of step shapes.
pub enum StepKind {
    Tool(ToolStep),
    Model(ModelStep),
    Custom(CustomStep),
    Parallel(ParallelStep),
    Conditional(ConditionalStep),
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tool(_) => "tool",
            Self::Model(_) => "model",
            Self::Custom(_) => "custom",
            Self::Parallel(_) => "parallel",
            Self::Conditional(_) => "conditional",
        }
    }
}

impl fmt::Debug for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tool(s) => f.debug_tuple("Tool").field(s).finish(),
            Self::Model(s) => f.debug_tuple("Model").field(s).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
            Self::Parallel(s) => f.debug_tuple("Parallel").field(s).finish(),
            Self::Conditional(s) => f.debug_tuple("Conditional").field(s).finish(),
        }
    }
}

impl From<ToolStep> for StepKind {
    fn from(s: ToolStep) -> Self {
        Self::Tool(s)
    }
}

impl From<ModelStep> for StepKind {
    fn from(s: ModelStep) -> Self {
        Self::Model(s)
    }
}

impl From<CustomStep> for StepKind {
    fn from(s: CustomStep) -> Self {
        Self::Custom(s)
    }
}

impl From<ParallelStep> for StepKind {
    fn from(s: ParallelStep) -> Self {
        Self::Parallel(s)
    }
}

impl From<ConditionalStep> for StepKind {
    fn from(s: ConditionalStep) -> Self {
        Self::Conditional(s)
    }
}

/// A named unit of work.
#[derive(Debug)]
pub struct Step {
    config: StepConfig,
    kind: StepKind,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: impl Into<StepKind>) -> Self {
        let kind = kind.into();
        let mut config = StepConfig::new(name);
        match &kind {
            StepKind::Tool(t) => config.inputs.push(t.input_key().to_string()),
            StepKind::Model(m) => config.inputs.push(m.input_key().to_string()),
            _ => {}
        }
        Self { config, kind }
    }

    /// A step reading `input_key`, calling `tool`, and writing its output key.
    pub fn tool(
        name: impl Into<String>,
        tool: Arc<dyn strand_core::traits::Tool>,
        input_key: impl Into<String>,
    ) -> Self {
        Self::new(name, ToolStep::new(CapabilityRef::Direct(tool), input_key))
    }

    /// Like [`Step::tool`], resolving the tool from the registry at run time.
    pub fn tool_named(
        name: impl Into<String>,
        tool_name: impl Into<String>,
        input_key: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            ToolStep::new(CapabilityRef::Named(tool_name.into()), input_key),
        )
    }

    /// A step sending the text under `input_key` to `model`.
    pub fn model(
        name: impl Into<String>,
        model: Arc<dyn strand_core::traits::Model>,
        input_key: impl Into<String>,
    ) -> Self {
        Self::new(name, ModelStep::new(CapabilityRef::Direct(model), input_key))
    }

    /// Like [`Step::model`], resolving the model from the registry at run time.
    pub fn model_named(
        name: impl Into<String>,
        model_name: impl Into<String>,
        input_key: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            ModelStep::new(CapabilityRef::Named(model_name.into()), input_key),
        )
    }

    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: for<'a> Fn(
                tokio_util::sync::CancellationToken,
                &'a mut crate::context::Context,
            ) -> futures::future::BoxFuture<'a, strand_core::error::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, CustomStep::new(func))
    }

    pub fn parallel(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::new(name, ParallelStep::new(steps))
    }

    pub fn conditional<P>(
        name: impl Into<String>,
        predicate: P,
        when_true: Vec<Step>,
        when_false: Vec<Step>,
    ) -> Self
    where
        P: Fn(&crate::context::Context) -> bool + Send + Sync + 'static,
    {
        Self::new(
            name,
            ConditionalStep::new(predicate)
                .when_true_all(when_true)
                .when_false_all(when_false),
        )
    }

    // ── Chain modifiers ─────────────────────────────────────────

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    pub fn can_fail(mut self, can_fail: bool) -> Self {
        self.config.can_fail = can_fail;
        self
    }

    /// Declare a key that must be present before the step runs.
    pub fn requires(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.config.inputs.contains(&key) {
            self.config.inputs.push(key);
        }
        self
    }

    /// Declare a provided key. The first one is the write target of tool and model steps.
    pub fn output(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.config.outputs.contains(&key) {
            self.config.outputs.push(key);
        }
        self
    }

    /// Apply a variant-specific change to a model step.
    pub fn with_model(mut self, f: impl FnOnce(ModelStep) -> ModelStep) -> Self {
        self.kind = match self.kind {
            StepKind::Model(m) => StepKind::Model(f(m)),
            other => other,
        };
        self
    }

    /// Apply a variant-specific change to a parallel step.
    pub fn with_parallel(mut self, f: impl FnOnce(ParallelStep) -> ParallelStep) -> Self {
        self.kind = match self.kind {
            StepKind::Parallel(p) => StepKind::Parallel(f(p)),
            other => other,
        };
        self
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut StepKind {
        &mut self.kind
    }

    pub(crate) fn config_mut(&mut self) -> &mut StepConfig {
        &mut self.config
    }

    /// Registry names of tools referenced by this step and its children.
    pub fn named_tools(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.visit(&mut |step| {
            if let StepKind::Tool(t) = &step.kind {
                if let Some(name) = t.tool().registry_name() {
                    names.push(name.to_string());
                }
            }
        });
        names
    }

    /// Registry names of models referenced by this step and its children.
    pub fn named_models(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.visit(&mut |step| {
            if let StepKind::Model(m) = &step.kind {
                if let Some(name) = m.model().registry_name() {
                    names.push(name.to_string());
                }
            }
        });
        names
    }

    /// Depth-first walk over this step and every nested sub-step.
    fn visit(&self, f: &mut dyn FnMut(&Step)) {
        f(self);
        match &self.kind {
            StepKind::Parallel(p) => p.steps().iter().for_each(|s| s.visit(f)),
            StepKind::Conditional(c) => c
                .when_true()
                .iter()
                .chain(c.when_false())
                .for_each(|s| s.visit(f)),
            _ => {}
        }
    }
}
