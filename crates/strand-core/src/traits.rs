use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Text and multimodal generation backend.
pub trait Model: Send + Sync + 'static {
    /// Model name (used for registry lookup).
    fn name(&self) -> &str;

    /// What the model supports.
    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities::default()
    }

    /// Generate a complete response.
    fn generate(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelResponse>>;

    /// Generate a response, delivering text through `on_chunk` as it arrives.
    ///
    /// The default implementation calls `generate` and emits the first text
    /// part as a single chunk.
    fn generate_streaming(
        &self,
        request: ModelRequest,
        on_chunk: StreamCallback,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let response = self.generate(request).await?;
            if let Some(text) = response.first_text() {
                on_chunk(StreamChunk::delta(text));
            }
            Ok(())
        })
    }
}

/// An external capability invoked with JSON input.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used for registry lookup).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    /// Execute the tool.
    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Named lookup of models, tools, or flows.
pub trait Registry<T>: Send + Sync {
    /// Look up an entry by name.
    fn get(&self, name: &str) -> Result<T>;

    /// Whether an entry with this name exists.
    fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }
}
