use std::sync::Arc;

use strand_core::error::{Result, StrandError};
use strand_core::traits::Tool;
use tracing::debug;

use super::{CapabilityRef, StepConfig};
use crate::context::{Context, ContextValue};
use crate::executor::ExecutionScope;

/// Invokes a tool on one context value.
///
/// The value under `input_key` is handed to the tool as JSON; the result is
/// converted back and written to the step's output key.
#[derive(Debug, Clone)]
pub struct ToolStep {
    tool: CapabilityRef<dyn Tool>,
    input_key: String,
}

impl ToolStep {
    pub fn new(tool: CapabilityRef<dyn Tool>, input_key: impl Into<String>) -> Self {
        Self {
            tool,
            input_key: input_key.into(),
        }
    }

    pub fn tool(&self) -> &CapabilityRef<dyn Tool> {
        &self.tool
    }

    pub fn input_key(&self) -> &str {
        &self.input_key
    }

    pub(crate) async fn run(
        &self,
        config: &StepConfig,
        ctx: &mut Context,
        scope: &ExecutionScope,
    ) -> Result<()> {
        let tool: Arc<dyn Tool> = scope.resolve_tool(&self.tool)?;
        let input = ctx
            .get(&self.input_key)
            .ok_or_else(|| StrandError::ContextKeyNotFound(self.input_key.clone()))?
            .to_json();

        debug!(step = %config.name, tool = %tool.name(), input_key = %self.input_key, "Invoking tool");

        let output = tokio::select! {
            result = tool.execute(input) => result?,
            _ = scope.cancel.cancelled() => return Err(StrandError::Cancelled),
        };

        ctx.set(config.output_key(), ContextValue::from_json(output));
        Ok(())
    }
}
