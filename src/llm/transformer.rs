//! Splits a model's token stream into answer and reasoning events.
//!
//! Reasoning models wrap their deliberation in `<think>` ... `</think>`. The
//! markers arrive as standalone content fragments, so classification is an
//! exact string match per fragment: a marker split across two fragments is
//! passed through as ordinary text.

use std::fmt::Display;

use async_stream::stream;
use futures::{Stream, StreamExt};
use tracing::{debug, error};

use super::types::{ClientEvent, UpstreamDelta};

/// Fragment that switches the classifier into reasoning mode.
pub const THINK_OPEN: &str = "<think>";

/// Fragment that switches the classifier back to answer mode.
pub const THINK_CLOSE: &str = "</think>";

/// Where the classifier currently routes text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkState {
    #[default]
    Answering,
    Thinking,
}

/// Per-stream marker state machine.
///
/// One instance per response stream; it is never shared between requests.
#[derive(Debug, Default)]
pub struct ThinkClassifier {
    state: ThinkState,
}

impl ThinkClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ThinkState {
        self.state
    }

    /// Feeds one fragment through the state machine.
    ///
    /// Markers only change state. Empty or absent fragments produce nothing.
    pub fn classify(&mut self, content: Option<&str>) -> Option<ClientEvent> {
        match content? {
            THINK_OPEN => {
                self.state = ThinkState::Thinking;
                None
            }
            THINK_CLOSE => {
                self.state = ThinkState::Answering;
                None
            }
            "" => None,
            text => Some(match self.state {
                ThinkState::Thinking => ClientEvent::delta_reasoning(text),
                ThinkState::Answering => ClientEvent::delta_answer(text),
            }),
        }
    }
}

/// Turns upstream deltas into client events.
///
/// The output preserves order and is lazy: nothing is pulled from `upstream`
/// until the returned stream is polled. The first upstream error is logged
/// and becomes a single trailing [`ClientEvent::Error`]; nothing is read
/// after it. A clean upstream end simply ends the output.
///
/// Dropping the returned stream drops `upstream`, which is how a client
/// disconnect releases the upstream connection.
pub fn transform<S, E>(upstream: S) -> impl Stream<Item = ClientEvent> + Send
where
    S: Stream<Item = Result<UpstreamDelta, E>> + Send,
    E: Display + Send,
{
    stream! {
        let mut classifier = ThinkClassifier::new();
        let mut upstream = std::pin::pin!(upstream);
        while let Some(item) = upstream.next().await {
            match item {
                Ok(delta) => {
                    if let Some(event) = classifier.classify(delta.content.as_deref()) {
                        yield event;
                    }
                }
                Err(e) => {
                    error!(error = %e, "upstream stream failed");
                    yield ClientEvent::error(e.to_string());
                    return;
                }
            }
        }
        debug!(state = ?classifier.state(), "upstream stream ended");
    }
}
