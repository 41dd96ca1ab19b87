use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a single flow execution.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of value stored under a context key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Bytes,
    Int,
    Float,
    Bool,
    Array,
    Object,
    Media,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Array => "array",
            Self::Object => "object",
            Self::Media => "media",
        };
        f.write_str(name)
    }
}

/// A media descriptor: an image, audio clip, document, etc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaData {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl MediaData {
    /// Describe remote media, guessing the MIME type from the URL path.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();
        Self {
            url,
            data: None,
            mime_type,
            size: 0,
            metadata: HashMap::new(),
        }
    }

    /// Describe inline media. `size` is taken from the byte length.
    pub fn from_bytes(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            url: String::new(),
            size: data.len() as u64,
            data: Some(data),
            mime_type: mime_type.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Role in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single part of a multi-part message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Media { media: MediaData },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Media { .. } => None,
        }
    }
}

/// A message sent to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![ContentPart::text(text)],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![ContentPart::text(text)],
        }
    }

    pub fn with_media(mut self, media: MediaData) -> Self {
        self.parts.push(ContentPart::Media { media });
        self
    }

    /// Concatenate all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn media_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, ContentPart::Media { .. }))
            .count()
    }
}

/// A generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Token usage reported by a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A generation response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
            usage: None,
        }
    }

    /// Text of the first content part, if that part is text.
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().and_then(ContentPart::as_text)
    }
}

/// What a model can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub streaming: bool,
    pub tools: bool,
    pub vision: bool,
    pub system_role: bool,
}

/// A discrete piece of streamed progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Step that produced the chunk, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub content: String,
    pub done: bool,
}

impl StreamChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            step: None,
            content: content.into(),
            done: false,
        }
    }

    pub fn for_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }
}

/// Receiver of streamed chunks.
pub type StreamCallback = Arc<dyn Fn(StreamChunk) + Send + Sync>;

/// Flow event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// A flow run started.
    RunStarted { flow: String, run_id: RunId },
    /// A step started.
    StepStarted { flow: String, step: String },
    /// A step attempt failed and will be retried.
    StepRetrying {
        flow: String,
        step: String,
        attempt: u32,
        error: String,
    },
    /// A step completed.
    StepCompleted {
        flow: String,
        step: String,
        elapsed_ms: u64,
    },
    /// A step failed. `recovered` is true when the step was marked can-fail.
    StepFailed {
        flow: String,
        step: String,
        error: String,
        recovered: bool,
    },
    /// A flow run completed.
    RunCompleted {
        flow: String,
        run_id: RunId,
        elapsed_ms: u64,
        finished_at: DateTime<Utc>,
    },
    /// A flow run failed.
    RunFailed {
        flow: String,
        run_id: RunId,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_from_url_guesses_mime() {
        let media = MediaData::from_url("https://cdn.example.com/cat.png?size=large");
        assert_eq!(media.mime_type, "image/png");
        assert!(media.is_image());
        assert!(media.data.is_none());

        let unknown = MediaData::from_url("https://example.com/blob");
        assert_eq!(unknown.mime_type, "application/octet-stream");
    }

    #[test]
    fn test_media_from_bytes_sets_size() {
        let media = MediaData::from_bytes(vec![1, 2, 3], "audio/wav").with_metadata("lang", "en");
        assert_eq!(media.size, 3);
        assert_eq!(media.metadata.get("lang").map(String::as_str), Some("en"));
    }

    #[test]
    fn test_message_text_and_media() {
        let msg = Message::user("describe this").with_media(MediaData::from_url("a.jpg"));
        assert_eq!(msg.text(), "describe this");
        assert_eq!(msg.media_count(), 1);
    }

    #[test]
    fn test_first_text() {
        let resp = ModelResponse {
            content: vec![
                ContentPart::Media {
                    media: MediaData::from_url("x.png"),
                },
                ContentPart::text("later"),
            ],
            usage: None,
        };
        assert_eq!(resp.first_text(), None);
        assert_eq!(ModelResponse::text("hi").first_text(), Some("hi"));
    }

    #[test]
    fn test_content_part_serialization() {
        let json = serde_json::to_value(ContentPart::text("hello")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "text": "hello"}));
    }
}
