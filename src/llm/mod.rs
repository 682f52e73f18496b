//! Upstream model access and reasoning/answer separation.
//!
//! - [`client`]: streaming chat-completions client over SSE
//! - [`transformer`]: `<think>` marker classification
//! - [`types`]: wire types on both sides

use futures::stream::BoxStream;
use thiserror::Error;

use crate::auth::CredentialError;

pub mod client;
pub mod transformer;
pub mod types;

pub use client::UpstreamClient;
pub use transformer::{ThinkClassifier, ThinkState, transform};
pub use types::{ChatMessage, ClientEvent, Role, UpstreamDelta};

/// Failures while talking to the upstream model.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream event stream broke: {0}")]
    Sse(String),

    #[error("malformed upstream chunk: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Ordered upstream deltas for one completion.
pub type DeltaStream = BoxStream<'static, Result<UpstreamDelta, ChatError>>;

/// Source of streamed completions. The HTTP layer only depends on this, so
/// tests can swap in a scripted service.
pub trait ChatService: Send + Sync {
    /// Starts a streaming completion for `messages`.
    ///
    /// Nothing is sent until the returned stream is first polled. Failures
    /// before the first delta surface as the stream's first item.
    fn stream_conversation(&self, messages: Vec<ChatMessage>) -> DeltaStream;
}
