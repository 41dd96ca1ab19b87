//! Mock tools and models for exercising flows without external services.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use strand_core::error::{Result, StrandError};
use strand_core::traits::{Model, Tool};
use strand_core::types::{
    ModelCapabilities, ModelRequest, ModelResponse, Role, StreamCallback, StreamChunk,
};

fn render(input: &Value) -> String {
    match input {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Returns `"echo: <input>"`.
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input back"
    }

    fn execute(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move { Ok(Value::String(format!("echo: {}", render(&input)))) })
    }
}

/// Always fails with `message`.
pub struct FailingTool {
    name: String,
    message: String,
}

impl FailingTool {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            Err(StrandError::ToolExecution {
                tool: self.name.clone(),
                message: self.message.clone(),
            })
        })
    }
}

/// Sleeps for `delay`, then returns its input unchanged.
pub struct SlowTool {
    delay: Duration,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn execute(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(input)
        })
    }
}

/// Fails a fixed number of times, then echoes. Counts every call.
#[derive(Clone)]
pub struct FlakyTool {
    failures_left: Arc<AtomicU32>,
    calls: Arc<AtomicU32>,
}

impl FlakyTool {
    pub fn new(failures: u32) -> Self {
        Self {
            failures_left: Arc::new(AtomicU32::new(failures)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn execute(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(StrandError::ToolExecution {
                    tool: "flaky".into(),
                    message: "transient failure".into(),
                });
            }
            Ok(Value::String(format!("echo: {}", render(&input))))
        })
    }
}

/// Scripted model.
///
/// Replies with queued responses in order, then with `"reply: <last user text>"`.
/// Every request is recorded for inspection.
#[derive(Clone)]
pub struct MockModel {
    name: String,
    capabilities: ModelCapabilities,
    responses: Arc<Mutex<VecDeque<String>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
    calls: Arc<AtomicUsize>,
}

impl MockModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: ModelCapabilities::default(),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_vision(mut self) -> Self {
        self.capabilities.vision = true;
        self
    }

    pub fn with_streaming(mut self) -> Self {
        self.capabilities.streaming = true;
        self
    }

    pub fn with_system_role(mut self) -> Self {
        self.capabilities.system_role = true;
        self
    }

    /// Queue a response. An empty string produces a reply with no text.
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.responses.lock().push_back(response.into());
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &ModelRequest) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if let Some(scripted) = self.responses.lock().pop_front() {
            return scripted;
        }
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default();
        format!("reply: {last_user}")
    }
}

impl Model for MockModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    fn generate(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelResponse>> {
        Box::pin(async move {
            let reply = self.next_reply(&request);
            if reply.is_empty() {
                return Ok(ModelResponse::default());
            }
            Ok(ModelResponse::text(reply))
        })
    }

    /// Emits the reply one word at a time.
    fn generate_streaming(
        &self,
        request: ModelRequest,
        on_chunk: StreamCallback,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let reply = self.next_reply(&request);
            for (i, word) in reply.split(' ').enumerate() {
                let delta = if i == 0 {
                    word.to_string()
                } else {
                    format!(" {word}")
                };
                on_chunk(StreamChunk::delta(delta));
                tokio::task::yield_now().await;
            }
            Ok(())
        })
    }
}

/// Collects stream chunks delivered to a callback.
#[derive(Clone, Default)]
pub struct ChunkRecorder {
    chunks: Arc<Mutex<Vec<StreamChunk>>>,
}

impl ChunkRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> StreamCallback {
        let chunks = Arc::clone(&self.chunks);
        Arc::new(move |chunk| chunks.lock().push(chunk))
    }

    pub fn chunks(&self) -> Vec<StreamChunk> {
        self.chunks.lock().clone()
    }
}
