//! Wire types for the upstream chat-completions API and for the browser.

use serde::{Deserialize, Serialize};

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a conversation, as sent by the browser and forwarded upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Body of a streaming `POST /chat/completions` call.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
}

/// One `data:` payload of the upstream SSE stream.
///
/// Every field is optional on the wire. Azure sends an initial chunk carrying
/// only content-filter results and an empty `choices` array.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatCompletionChunk {
    pub id: Option<String>,
    pub model: Option<String>,
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    /// Delta of the first choice, if the chunk has any choices.
    pub fn into_delta(self) -> Option<UpstreamDelta> {
        self.choices.into_iter().next().map(|choice| choice.delta)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: UpstreamDelta,
    pub finish_reason: Option<String>,
}

/// Incremental message update. Only `content` matters to the relay; tool
/// calls and other fields are ignored during decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UpstreamDelta {
    pub role: Option<String>,
    pub content: Option<String>,
}

impl UpstreamDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            role: None,
            content: Some(content.into()),
        }
    }
}

/// The `delta` object sent to the browser.
///
/// Exactly one of `content` and `reasoning_content` is set; the constructors
/// are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    role: Role,
}

impl ClientDelta {
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn reasoning_content(&self) -> Option<&str> {
        self.reasoning_content.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

/// One NDJSON line of the `/chat/stream` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientEvent {
    Delta { delta: ClientDelta },
    Error { error: String },
}

impl ClientEvent {
    /// Visible answer text.
    pub fn delta_answer(text: impl Into<String>) -> Self {
        ClientEvent::Delta {
            delta: ClientDelta {
                content: Some(text.into()),
                reasoning_content: None,
                role: Role::Assistant,
            },
        }
    }

    /// Reasoning text from inside a `<think>` block.
    pub fn delta_reasoning(text: impl Into<String>) -> Self {
        ClientEvent::Delta {
            delta: ClientDelta {
                content: None,
                reasoning_content: Some(text.into()),
                role: Role::Assistant,
            },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ClientEvent::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ClientEvent::Error { .. })
    }

    /// Serializes the event as one JSON line terminated by `\n`.
    pub fn to_json_line(&self) -> String {
        // Both variants are plain strings and options, so encoding cannot fail.
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"));
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn answer_line_has_null_reasoning() {
        assert_eq!(
            ClientEvent::delta_answer("Hi").to_json_line(),
            "{\"delta\":{\"content\":\"Hi\",\"reasoning_content\":null,\"role\":\"assistant\"}}\n"
        );
    }

    #[test]
    fn reasoning_line_has_null_content() {
        assert_eq!(
            ClientEvent::delta_reasoning("hmm").to_json_line(),
            "{\"delta\":{\"content\":null,\"reasoning_content\":\"hmm\",\"role\":\"assistant\"}}\n"
        );
    }

    #[test]
    fn error_line_keeps_non_ascii() {
        assert_eq!(
            ClientEvent::error("délai dépassé").to_json_line(),
            "{\"error\":\"délai dépassé\"}\n"
        );
    }

    #[test]
    fn chunk_with_extra_fields_decodes() {
        let raw = r#"{"id":"c1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"role":"assistant","content":"<think>","tool_calls":[]},"finish_reason":null,"logprobs":null}]}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(raw).unwrap();
        let delta = chunk.into_delta().unwrap();
        assert_eq!(delta.content.as_deref(), Some("<think>"));
        assert_eq!(delta.role.as_deref(), Some("assistant"));
    }

    #[test]
    fn filter_results_chunk_has_no_delta() {
        let raw = r#"{"choices":[],"prompt_filter_results":[{"prompt_index":0}]}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(raw).unwrap();
        assert!(chunk.into_delta().is_none());
    }

    #[test]
    fn messages_use_lowercase_roles() {
        let json = serde_json::to_string(&ChatMessage::system("be brief")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"be brief"}"#);
        let back: ChatMessage = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(back, ChatMessage::user("hi"));
    }
}
