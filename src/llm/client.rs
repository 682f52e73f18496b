//! Streaming client for an OpenAI-compatible chat-completions endpoint.

use std::fmt::Display;
use std::sync::Arc;

use async_stream::stream;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use tracing::{debug, warn};

use super::types::{ChatCompletionChunk, ChatCompletionRequest, ChatMessage};
use super::{ChatError, ChatService, DeltaStream};
use crate::auth::TokenProvider;

/// Sentinel `data:` payload that ends an OpenAI-style SSE stream.
const DONE: &str = "[DONE]";

/// Calls `{base_url}/chat/completions?api-version=...` with `stream: true`.
///
/// Cheap to clone; the HTTP connection pool and token provider are shared.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_version: String,
    tokens: Arc<dyn TokenProvider>,
}

impl UpstreamClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_version: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            api_version: api_version.into(),
            tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Sends the request and returns the decoded delta stream.
    ///
    /// Token, transport and non-2xx failures are returned here, before any
    /// delta is produced.
    pub async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, ChatError> {
        let token = self.tokens.token().await?;
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        debug!(model = %self.model, messages = messages.len(), "starting upstream completion");
        let response = self
            .http
            .post(self.completions_url())
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_owned());
            warn!(status = status.as_u16(), "upstream rejected completion request");
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(decode_sse(response.bytes_stream()))
    }
}

impl ChatService for UpstreamClient {
    fn stream_conversation(&self, messages: Vec<ChatMessage>) -> DeltaStream {
        let client = self.clone();
        stream::once(async move { client.stream_chat(&messages).await })
            .try_flatten()
            .boxed()
    }
}

/// Decodes an SSE byte stream of chat-completion chunks into deltas.
///
/// Stops at `[DONE]` or at the end of the body. Chunks without choices are
/// skipped. The first transport or decode error is yielded and ends the
/// stream.
pub fn decode_sse<S, B, E>(bytes: S) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(stream! {
        let mut events = std::pin::pin!(bytes.eventsource());
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    yield Err(ChatError::Sse(e.to_string()));
                    return;
                }
            };

            let data = event.data.trim();
            if data == DONE {
                debug!("upstream sent [DONE]");
                break;
            }
            if data.is_empty() {
                continue;
            }

            match serde_json::from_str::<ChatCompletionChunk>(data) {
                Ok(chunk) => {
                    if let Some(delta) = chunk.into_delta() {
                        yield Ok(delta);
                    }
                }
                Err(e) => {
                    yield Err(ChatError::Decode(e));
                    return;
                }
            }
        }
    })
}
