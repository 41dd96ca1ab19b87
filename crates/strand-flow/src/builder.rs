//! Fluent construction of flows.
//!
//! ```ignore
//! let flow = FlowBuilder::new("caption")
//!     .step("describe")
//!     .model(model, "prompt")
//!     .media("image")
//!     .output("caption")
//!     .done()
//!     .build()?;
//! ```
//!
//! Chain calls never fail on their own. The first misuse (a modifier with no
//! open step, a variant option on the wrong variant, a step left open) is
//! recorded and returned by [`FlowBuilder::build`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use strand_core::error::{Result, StrandError};
use strand_core::event::EventBus;
use strand_core::traits::{Model, Tool};
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::flow::{ExecutionPattern, Flow, FlowMetadata};
use crate::step::{
    CapabilityRef, ConditionalStep, CustomStep, ModelStep, ParallelStep, Step, StepKind, ToolStep,
};

pub struct FlowBuilder {
    metadata: FlowMetadata,
    steps: Vec<Step>,
    /// Name given to `step()` that has no variant yet.
    pending: Option<String>,
    /// Step under construction.
    current: Option<Step>,
    error: Option<String>,
    events: Option<Arc<EventBus>>,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: FlowMetadata::new(name),
            steps: Vec::new(),
            pending: None,
            current: None,
            error: None,
            events: None,
        }
    }

    // ── Flow metadata ───────────────────────────────────────────

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = version.into();
        self
    }

    /// Flow description. Step descriptions use [`FlowBuilder::description`].
    pub fn about(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.metadata.category = category.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }

    /// Declare a dependency on a flow, model, or tool by name.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        push_unique(&mut self.metadata.dependencies, name.into());
        self
    }

    pub fn pattern(mut self, pattern: ExecutionPattern) -> Self {
        self.metadata.pattern = pattern;
        self
    }

    pub fn needs_vision(mut self) -> Self {
        self.metadata.requirements.vision = true;
        self
    }

    pub fn needs_tool(mut self, name: impl Into<String>) -> Self {
        push_unique(&mut self.metadata.requirements.tools, name.into());
        self
    }

    pub fn needs_model(mut self, name: impl Into<String>) -> Self {
        push_unique(&mut self.metadata.requirements.models, name.into());
        self
    }

    /// Default bound for parallel steps in this flow.
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.metadata.requirements.max_concurrency = Some(limit);
        self
    }

    /// Deadline for a whole run of this flow.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.metadata.requirements.timeout_secs = Some(secs);
        self
    }

    pub fn input_schema(mut self, schema: serde_json::Value) -> Self {
        self.metadata.input_schema = Some(schema);
        self
    }

    pub fn output_schema(mut self, schema: serde_json::Value) -> Self {
        self.metadata.output_schema = Some(schema);
        self
    }

    /// Publish run events on a shared bus instead of a per-flow one.
    pub fn event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    // ── Step slot ───────────────────────────────────────────────

    /// Open a new step. A variant method must follow.
    pub fn step(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if let Some(open) = self.open_step_name() {
            self.fail(format!(
                "step '{open}' must be closed with done() before step '{name}'"
            ));
            return self;
        }
        self.pending = Some(name);
        self
    }

    pub fn tool(self, tool: Arc<dyn Tool>, input_key: impl Into<String>) -> Self {
        self.begin("tool", ToolStep::new(CapabilityRef::Direct(tool), input_key))
    }

    pub fn tool_named(self, tool: impl Into<String>, input_key: impl Into<String>) -> Self {
        self.begin(
            "tool_named",
            ToolStep::new(CapabilityRef::Named(tool.into()), input_key),
        )
    }

    pub fn model(self, model: Arc<dyn Model>, input_key: impl Into<String>) -> Self {
        self.begin("model", ModelStep::new(CapabilityRef::Direct(model), input_key))
    }

    pub fn model_named(self, model: impl Into<String>, input_key: impl Into<String>) -> Self {
        self.begin(
            "model_named",
            ModelStep::new(CapabilityRef::Named(model.into()), input_key),
        )
    }

    pub fn custom<F>(self, func: F) -> Self
    where
        F: for<'a> Fn(CancellationToken, &'a mut Context) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.begin("custom", CustomStep::new(func))
    }

    /// Start a parallel step; add children with [`FlowBuilder::sub_step`].
    pub fn parallel(self) -> Self {
        self.begin("parallel", ParallelStep::new(Vec::new()))
    }

    /// Start a conditional step; add branches with `when_true` / `when_false`.
    pub fn conditional<P>(self, predicate: P) -> Self
    where
        P: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.begin("conditional", ConditionalStep::new(predicate))
    }

    // ── Modifiers for any step ──────────────────────────────────

    pub fn description(self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.configure("description", |step| step.config_mut().description = description)
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.configure("timeout", |step| step.config_mut().timeout = Some(timeout))
    }

    pub fn retries(self, retries: u32) -> Self {
        self.configure("retries", |step| step.config_mut().retries = retries)
    }

    pub fn can_fail(self, can_fail: bool) -> Self {
        self.configure("can_fail", |step| step.config_mut().can_fail = can_fail)
    }

    pub fn requires(self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.configure("requires", |step| push_unique(&mut step.config_mut().inputs, key))
    }

    pub fn output(self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.configure("output", |step| push_unique(&mut step.config_mut().outputs, key))
    }

    // ── Variant options ─────────────────────────────────────────

    pub fn media(self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.configure_model("media", |m| m.media(key))
    }

    pub fn system_prompt(self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.configure_model("system_prompt", |m| m.system_prompt(prompt))
    }

    pub fn temperature(self, temperature: f32) -> Self {
        self.configure_model("temperature", |m| m.temperature(temperature))
    }

    pub fn max_tokens(self, max_tokens: u32) -> Self {
        self.configure_model("max_tokens", |m| m.max_tokens(max_tokens))
    }

    pub fn sub_step(self, step: Step) -> Self {
        self.configure_variant("sub_step", "parallel", |kind| match kind {
            StepKind::Parallel(p) => {
                p.push(step);
                true
            }
            _ => false,
        })
    }

    pub fn max_concurrency(self, limit: usize) -> Self {
        self.configure_variant("max_concurrency", "parallel", |kind| match kind {
            StepKind::Parallel(p) => {
                p.set_max_concurrency(limit);
                true
            }
            _ => false,
        })
    }

    pub fn fail_fast(self, fail_fast: bool) -> Self {
        self.configure_variant("fail_fast", "parallel", |kind| match kind {
            StepKind::Parallel(p) => {
                p.set_fail_fast(fail_fast);
                true
            }
            _ => false,
        })
    }

    pub fn when_true(self, step: Step) -> Self {
        self.configure_variant("when_true", "conditional", |kind| match kind {
            StepKind::Conditional(c) => {
                c.push_true(step);
                true
            }
            _ => false,
        })
    }

    pub fn when_false(self, step: Step) -> Self {
        self.configure_variant("when_false", "conditional", |kind| match kind {
            StepKind::Conditional(c) => {
                c.push_false(step);
                true
            }
            _ => false,
        })
    }

    /// Close the open step and append it to the flow.
    pub fn done(mut self) -> Self {
        match (self.current.take(), self.pending.take()) {
            (Some(step), _) => self.steps.push(step),
            (None, Some(name)) => self.fail(format!("step '{name}' has no kind")),
            (None, None) => self.fail("done() called with no open step".to_string()),
        }
        self
    }

    /// Add an already-built step.
    pub fn add_step(mut self, step: Step) -> Self {
        if let Some(open) = self.open_step_name() {
            self.fail(format!("step '{open}' must be closed with done() first"));
            return self;
        }
        self.steps.push(step);
        self
    }

    pub fn build(mut self) -> Result<Flow> {
        if let Some(message) = self.error.take() {
            return Err(self.invalid(message));
        }
        if let Some(open) = self.open_step_name() {
            return Err(self.invalid(format!("step '{open}' was never closed with done()")));
        }
        if self.steps.is_empty() {
            return Err(self.invalid("a flow needs at least one step".to_string()));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name()) {
                return Err(self.invalid(format!("duplicate step name '{}'", step.name())));
            }
        }

        // Registry-resolved capabilities become requirements checked before the first run.
        for step in &self.steps {
            for tool in step.named_tools() {
                push_unique(&mut self.metadata.requirements.tools, tool);
            }
            for model in step.named_models() {
                push_unique(&mut self.metadata.requirements.models, model);
            }
        }

        Ok(Flow::new(self.metadata, self.steps, self.events))
    }

    // ── Internals ───────────────────────────────────────────────

    fn open_step_name(&self) -> Option<String> {
        self.current
            .as_ref()
            .map(|s| s.name().to_string())
            .or_else(|| self.pending.clone())
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    fn invalid(&self, message: String) -> StrandError {
        StrandError::Validation(format!("flow '{}': {message}", self.metadata.name))
    }

    fn begin(mut self, method: &str, kind: impl Into<StepKind>) -> Self {
        match self.pending.take() {
            Some(name) => self.current = Some(Step::new(name, kind)),
            None => self.fail(match &self.current {
                Some(step) => format!("{method}() called on step '{}' which already has a kind", step.name()),
                None => format!("{method}() called before step()"),
            }),
        }
        self
    }

    fn configure(mut self, method: &str, f: impl FnOnce(&mut Step)) -> Self {
        match self.current.as_mut() {
            Some(step) => f(step),
            None => self.fail(format!("{method}() called with no open step")),
        }
        self
    }

    fn configure_model(self, method: &str, f: impl FnOnce(ModelStep) -> ModelStep) -> Self {
        self.configure_variant(method, "model", |kind| match kind {
            StepKind::Model(m) => {
                *m = f(m.clone());
                true
            }
            _ => false,
        })
    }

    /// Apply a variant-only option. `f` returns false when the open step is another variant.
    fn configure_variant(
        mut self,
        method: &str,
        variant: &str,
        f: impl FnOnce(&mut StepKind) -> bool,
    ) -> Self {
        let outcome = self
            .current
            .as_mut()
            .map(|step| (step.name().to_string(), step.kind().label(), f(step.kind_mut())));
        match outcome {
            Some((_, _, true)) => {}
            Some((name, label, false)) => self.fail(format!(
                "{method}() applies to {variant} steps, but step '{name}' is a {label} step"
            )),
            None => self.fail(format!("{method}() called with no open step")),
        }
        self
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_test_utils::{EchoTool, MockModel};

    fn noop<'a>(_cancel: CancellationToken, _ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn build_err(builder: FlowBuilder) -> String {
        match builder.build() {
            Err(StrandError::Validation(msg)) => msg,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected build to fail"),
        }
    }

    #[test]
    fn test_builds_flow_with_metadata() {
        let flow = FlowBuilder::new("caption")
            .version("2.1.0")
            .about("Caption an image")
            .category("vision")
            .tag("demo")
            .needs_vision()
            .step("echo")
            .tool(Arc::new(EchoTool), "in")
            .output("out")
            .retries(1)
            .done()
            .build()
            .unwrap();

        assert_eq!(flow.name(), "caption");
        assert_eq!(flow.version(), "2.1.0");
        assert_eq!(flow.description(), "Caption an image");
        assert_eq!(flow.category(), "vision");
        assert_eq!(flow.tags(), ["demo"]);
        assert!(flow.requirements().vision);
        assert_eq!(flow.steps().len(), 1);
        assert_eq!(flow.steps()[0].config().retries, 1);
    }

    #[test]
    fn test_zero_steps_rejected() {
        let msg = build_err(FlowBuilder::new("empty"));
        assert!(msg.contains("at least one step"));
    }

    #[test]
    fn test_open_step_rejected() {
        let msg = build_err(
            FlowBuilder::new("f")
                .step("a")
                .tool(Arc::new(EchoTool), "in"),
        );
        assert!(msg.contains("never closed"));
    }

    #[test]
    fn test_step_without_kind_rejected() {
        let msg = build_err(FlowBuilder::new("f").step("a").done());
        assert!(msg.contains("has no kind"));
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let msg = build_err(
            FlowBuilder::new("f")
                .step("a")
                .custom(noop)
                .done()
                .step("a")
                .custom(noop)
                .done(),
        );
        assert!(msg.contains("duplicate step name 'a'"));
    }

    #[test]
    fn test_variant_option_on_wrong_variant() {
        let msg = build_err(
            FlowBuilder::new("f")
                .step("a")
                .tool(Arc::new(EchoTool), "in")
                .media("img")
                .done(),
        );
        assert!(msg.contains("media() applies to model steps"));
    }

    #[test]
    fn test_modifier_without_step() {
        let msg = build_err(
            FlowBuilder::new("f")
                .retries(3)
                .step("a")
                .custom(noop)
                .done(),
        );
        assert!(msg.contains("retries() called with no open step"));
    }

    #[test]
    fn test_step_opened_twice() {
        let msg = build_err(
            FlowBuilder::new("f")
                .step("a")
                .custom(noop)
                .step("b")
                .custom(noop)
                .done(),
        );
        assert!(msg.contains("must be closed with done()"));
    }

    #[test]
    fn test_model_options_applied() {
        let flow = FlowBuilder::new("f")
            .step("ask")
            .model(Arc::new(MockModel::new("m")), "prompt")
            .media("img")
            .system_prompt("be brief")
            .temperature(0.1)
            .max_tokens(32)
            .done()
            .build()
            .unwrap();
        match flow.steps()[0].kind() {
            StepKind::Model(m) => assert_eq!(m.media_keys(), ["img"]),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_parallel_and_conditional_children() {
        let flow = FlowBuilder::new("f")
            .step("fan")
            .parallel()
            .sub_step(Step::custom("a", noop))
            .sub_step(Step::custom("b", noop))
            .max_concurrency(1)
            .fail_fast(true)
            .done()
            .step("branch")
            .conditional(|ctx| ctx.has("flag"))
            .when_true(Step::custom("yes", noop))
            .when_false(Step::custom("no", noop))
            .done()
            .build()
            .unwrap();

        match flow.steps()[0].kind() {
            StepKind::Parallel(p) => assert_eq!(p.steps().len(), 2),
            other => panic!("unexpected kind: {other:?}"),
        }
        match flow.steps()[1].kind() {
            StepKind::Conditional(c) => {
                assert_eq!(c.when_true()[0].name(), "yes");
                assert_eq!(c.when_false()[0].name(), "no");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_named_capabilities_become_requirements() {
        let flow = FlowBuilder::new("f")
            .step("search")
            .tool_named("web_search", "q")
            .done()
            .step("answer")
            .model_named("gpt", "q")
            .done()
            .build()
            .unwrap();
        assert_eq!(flow.requirements().tools, vec!["web_search"]);
        assert_eq!(flow.requirements().models, vec!["gpt"]);
    }
}
