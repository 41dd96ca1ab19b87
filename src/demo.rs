//! Built-in demo flow: normalize text, analyze it in parallel, then summarize.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use strand_core::error::{Result, StrandError};
use strand_core::registry::{ModelRegistry, ToolRegistry};
use strand_core::traits::{Model, Tool};
use strand_core::types::{ModelCapabilities, ModelRequest, ModelResponse, Role, StreamCallback, StreamChunk};
use strand_flow::{Flow, FlowBuilder, Registries, Step};

pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the input unchanged"
    }

    fn execute(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move { Ok(input) })
    }
}

pub struct WordCountTool;

impl Tool for WordCountTool {
    fn name(&self) -> &str {
        "word_count"
    }

    fn description(&self) -> &str {
        "Count whitespace-separated words"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "string" })
    }

    fn execute(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let text = input.as_str().ok_or_else(|| StrandError::ToolExecution {
                tool: "word_count".into(),
                message: format!("expected a string, got {input}"),
            })?;
            Ok(Value::from(text.split_whitespace().count()))
        })
    }
}

/// Offline model that answers with a fixed template around the prompt.
pub struct TemplateModel;

impl TemplateModel {
    fn answer(request: &ModelRequest) -> String {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default();
        let last_line = prompt.lines().last().unwrap_or_default();
        format!("Summary: {last_line}")
    }
}

impl Model for TemplateModel {
    fn name(&self) -> &str {
        "template"
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            streaming: true,
            system_role: true,
            ..ModelCapabilities::default()
        }
    }

    fn generate(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelResponse>> {
        Box::pin(async move { Ok(ModelResponse::text(Self::answer(&request))) })
    }

    fn generate_streaming(
        &self,
        request: ModelRequest,
        on_chunk: StreamCallback,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let answer = Self::answer(&request);
            for word in answer.split_inclusive(' ') {
                on_chunk(StreamChunk::delta(word));
            }
            Ok(())
        })
    }
}

/// Registries holding the demo tools and model.
pub fn registries() -> Result<Registries> {
    let tools = Arc::new(ToolRegistry::default());
    tools.register_tool(EchoTool)?;
    tools.register_tool(WordCountTool)?;
    let models = Arc::new(ModelRegistry::default());
    models.register_model(TemplateModel)?;
    Ok(Registries::empty().with_tools(tools).with_models(models))
}

pub fn flow() -> Result<Flow> {
    FlowBuilder::new("text-pipeline")
        .about("Normalize text, count its words, and summarize long inputs")
        .category("demo")
        .tag("example")
        .input_schema(serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        }))
        .step("normalize")
        .custom(|_cancel, ctx| {
            Box::pin(async move {
                let normalized = ctx
                    .get_string("text")?
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase();
                ctx.set_string("normalized", normalized);
                Ok(())
            })
        })
        .requires("text")
        .output("normalized")
        .done()
        .step("analyze")
        .parallel()
        .sub_step(Step::tool_named("count", "word_count", "normalized").output("word_count"))
        .sub_step(Step::tool_named("copy", "echo", "normalized").output("echoed"))
        .done()
        .step("summarize")
        .conditional(|ctx| ctx.get_int("word_count").map(|n| n > 3).unwrap_or(false))
        .when_true(
            Step::model_named("summary", "template", "normalized")
                .output("summary")
                .with_model(|m| m.system_prompt("Summarize in one line.")),
        )
        .when_false(Step::custom("passthrough", |_cancel, ctx| {
            Box::pin(async move {
                let text = ctx.get_string("normalized")?.to_string();
                ctx.set_string("summary", text);
                Ok(())
            })
        }))
        .done()
        .build()
}
