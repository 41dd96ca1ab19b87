use std::sync::Arc;

use parking_lot::Mutex;
use strand_core::error::{Result, StrandError};
use strand_core::traits::Model;
use strand_core::types::{
    ContentPart, MediaData, Message, ModelCapabilities, ModelRequest, StreamCallback, StreamChunk,
};
use tracing::debug;

use super::{CapabilityRef, StepConfig};
use crate::context::{Context, ContextValue};
use crate::executor::ExecutionScope;

/// Sends a prompt (text plus optional media) to a model and writes the reply.
#[derive(Debug, Clone)]
pub struct ModelStep {
    model: CapabilityRef<dyn Model>,
    input_key: String,
    media_keys: Vec<String>,
    system_prompt: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl ModelStep {
    pub fn new(model: CapabilityRef<dyn Model>, input_key: impl Into<String>) -> Self {
        Self {
            model,
            input_key: input_key.into(),
            media_keys: Vec::new(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Attach the media stored under `key`. Absent keys are skipped at run time.
    pub fn media(mut self, key: impl Into<String>) -> Self {
        self.media_keys.push(key.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &CapabilityRef<dyn Model> {
        &self.model
    }

    pub fn input_key(&self) -> &str {
        &self.input_key
    }

    pub fn media_keys(&self) -> &[String] {
        &self.media_keys
    }

    pub(crate) async fn run(
        &self,
        config: &StepConfig,
        ctx: &mut Context,
        scope: &ExecutionScope,
    ) -> Result<()> {
        let model: Arc<dyn Model> = scope.resolve_model(&self.model)?;
        let caps = model.capabilities();
        let request = self.compose(ctx, &caps)?;

        let media_parts: usize = request.messages.iter().map(Message::media_count).sum();
        if media_parts > 0 && !caps.vision {
            return Err(StrandError::Validation(format!(
                "model '{}' does not accept media but step '{}' attaches {} item(s)",
                model.name(),
                config.name,
                media_parts
            )));
        }

        debug!(
            step = %config.name,
            model = %model.name(),
            media = media_parts,
            streaming = scope.stream.is_some() && caps.streaming,
            "Calling model"
        );

        let text = match (&scope.stream, caps.streaming) {
            (Some(sink), true) => {
                let collected = Arc::new(Mutex::new(String::new()));
                let on_chunk = forward_deltas(&config.name, sink, Arc::clone(&collected));
                tokio::select! {
                    result = model.generate_streaming(request, on_chunk) => result?,
                    _ = scope.cancel.cancelled() => return Err(StrandError::Cancelled),
                }
                let text = std::mem::take(&mut *collected.lock());
                text
            }
            _ => {
                let response = tokio::select! {
                    result = model.generate(request) => result?,
                    _ = scope.cancel.cancelled() => return Err(StrandError::Cancelled),
                };
                response.first_text().unwrap_or_default().to_string()
            }
        };

        // An empty reply leaves the output key untouched.
        if !text.is_empty() {
            ctx.set_string(config.output_key(), text);
        }
        Ok(())
    }

    /// Build the request from the context: system prompt, input text, media.
    fn compose(&self, ctx: &Context, caps: &ModelCapabilities) -> Result<ModelRequest> {
        let input = ctx.get_string(&self.input_key)?;

        let mut messages = Vec::with_capacity(2);
        let text = match &self.system_prompt {
            Some(system) if caps.system_role => {
                messages.push(Message::system(system.clone()));
                input.to_string()
            }
            Some(system) => format!("{system}\n\n{input}"),
            None => input.to_string(),
        };

        let mut user = Message::user(text);
        for key in &self.media_keys {
            for media in media_under(ctx, key)? {
                user.parts.push(ContentPart::Media { media });
            }
        }
        messages.push(user);

        Ok(ModelRequest {
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
    }
}

/// Media stored under `key`: a single item or an array of items.
fn media_under(ctx: &Context, key: &str) -> Result<Vec<MediaData>> {
    match ctx.get(key) {
        None => {
            debug!(key, "Media key absent, skipping");
            Ok(Vec::new())
        }
        Some(ContextValue::Media(media)) => Ok(vec![media.clone()]),
        Some(ContextValue::Array(items)) => items
            .iter()
            .map(|item| match item {
                ContextValue::Media(media) => Ok(media.clone()),
                other => Err(StrandError::ContextType {
                    key: key.to_string(),
                    expected: strand_core::types::ValueKind::Media,
                    actual: other.kind(),
                }),
            })
            .collect(),
        Some(other) => Err(StrandError::ContextType {
            key: key.to_string(),
            expected: strand_core::types::ValueKind::Media,
            actual: other.kind(),
        }),
    }
}

/// Collect every delta and forward it to the run's stream callback, tagged with the step.
fn forward_deltas(step: &str, sink: &StreamCallback, collected: Arc<Mutex<String>>) -> StreamCallback {
    let sink = Arc::clone(sink);
    let step = step.to_string();
    Arc::new(move |chunk: StreamChunk| {
        if chunk.content.is_empty() {
            return;
        }
        collected.lock().push_str(&chunk.content);
        sink(StreamChunk::delta(chunk.content).for_step(step.clone()));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_test_utils::MockModel;

    fn step() -> ModelStep {
        let model: Arc<dyn Model> = Arc::new(MockModel::new("mock"));
        ModelStep::new(CapabilityRef::Direct(model), "prompt")
    }

    #[test]
    fn test_compose_text_only() {
        let mut ctx = Context::new();
        ctx.set_string("prompt", "hello");
        let request = step()
            .temperature(0.2)
            .max_tokens(64)
            .compose(&ctx, &ModelCapabilities::default())
            .unwrap();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].text(), "hello");
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(64));
    }

    #[test]
    fn test_system_prompt_uses_role_when_supported() {
        let mut ctx = Context::new();
        ctx.set_string("prompt", "hello");
        let caps = ModelCapabilities {
            system_role: true,
            ..ModelCapabilities::default()
        };
        let request = step().system_prompt("be brief").compose(&ctx, &caps).unwrap();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].text(), "be brief");
        assert_eq!(request.messages[1].text(), "hello");
    }

    #[test]
    fn test_system_prompt_prepended_without_role() {
        let mut ctx = Context::new();
        ctx.set_string("prompt", "hello");
        let request = step()
            .system_prompt("be brief")
            .compose(&ctx, &ModelCapabilities::default())
            .unwrap();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].text(), "be brief\n\nhello");
    }

    #[test]
    fn test_absent_media_keys_are_skipped() {
        let mut ctx = Context::new();
        ctx.set_string("prompt", "describe");
        ctx.set_media("img", MediaData::from_url("https://x.test/a.png"));
        let request = step()
            .media("img")
            .media("missing")
            .compose(&ctx, &ModelCapabilities::default())
            .unwrap();
        assert_eq!(request.messages[0].media_count(), 1);
    }

    #[test]
    fn test_media_arrays_are_expanded() {
        let mut ctx = Context::new();
        ctx.set_string("prompt", "describe");
        ctx.set_array(
            "frames",
            vec![
                MediaData::from_url("https://x.test/1.jpg").into(),
                MediaData::from_url("https://x.test/2.jpg").into(),
            ],
        );
        let request = step()
            .media("frames")
            .compose(&ctx, &ModelCapabilities::default())
            .unwrap();
        assert_eq!(request.messages[0].media_count(), 2);
    }

    #[test]
    fn test_non_media_value_is_type_error() {
        let mut ctx = Context::new();
        ctx.set_string("prompt", "describe");
        ctx.set_int("img", 3);
        let err = step()
            .media("img")
            .compose(&ctx, &ModelCapabilities::default())
            .unwrap_err();
        assert!(matches!(err, StrandError::ContextType { .. }));
    }

    #[test]
    fn test_missing_prompt() {
        let err = step()
            .compose(&Context::new(), &ModelCapabilities::default())
            .unwrap_err();
        assert!(matches!(err, StrandError::ContextKeyNotFound(k) if k == "prompt"));
    }
}
