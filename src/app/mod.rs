//! HTTP surface of the chat relay: the chat page and the streaming endpoint.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::context::Context;
use crate::llm::{ChatMessage, ChatService, transform};
use crate::middleware::LoggerMiddleware;
use crate::{Response, Router, StatusCode};

/// Content type of the `/chat/stream` response: one JSON object per line.
pub const NDJSON: &str = "application/x-ndjson";

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// Shared state handed to the handlers as a router extension.
pub struct ChatState {
    pub service: Arc<dyn ChatService>,
    pub system_prompt: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
}

/// Builds the application router around `service`.
pub fn router(service: Arc<dyn ChatService>, system_prompt: impl Into<String>) -> Router {
    let mut router = Router::new();
    router.layer(Arc::new(LoggerMiddleware));
    router.extension(ChatState {
        service,
        system_prompt: system_prompt.into(),
    });
    router.get("/", index);
    router.post("/chat/stream", chat_stream);
    router
}

async fn index(_ctx: Context) -> Response {
    Response::new(StatusCode::Ok)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(INDEX_HTML)
}

fn bad_request(message: String) -> Response {
    Response::json(StatusCode::BadRequest, &json!({ "error": message }))
}

async fn chat_stream(ctx: Context) -> Response {
    let Some(state) = ctx.extension::<ChatState>() else {
        return Response::json(
            StatusCode::InternalServerError,
            &json!({ "error": "chat service not configured" }),
        );
    };

    let request: ChatRequest = match ctx.json() {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "rejecting chat request");
            return bad_request(format!("invalid request body: {e}"));
        }
    };

    let mut conversation = Vec::with_capacity(request.messages.len() + 1);
    conversation.push(ChatMessage::system(state.system_prompt.as_str()));
    conversation.extend(request.messages);
    debug!(messages = conversation.len(), "streaming chat completion");

    let events = transform(state.service.stream_conversation(conversation))
        .map(|event| Bytes::from(event.to_json_line()));

    Response::new(StatusCode::Ok)
        .header("Content-Type", NDJSON)
        .header("Cache-Control", "no-cache")
        .stream(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;
    use crate::llm::{ChatError, ClientEvent, DeltaStream, Role, UpstreamDelta};
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Replays a fixed script and records the conversation it was given.
    struct ScriptedService {
        script: Mutex<Option<Vec<Result<UpstreamDelta, ChatError>>>>,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl ScriptedService {
        fn new(script: Vec<Result<UpstreamDelta, ChatError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(Some(script)),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl ChatService for ScriptedService {
        fn stream_conversation(&self, messages: Vec<ChatMessage>) -> DeltaStream {
            *self.seen.lock().unwrap() = messages;
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            stream::iter(script).boxed()
        }
    }

    fn post(path: &str, body: &str) -> Request {
        let raw = format!(
            "POST {path} HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req.with_body(Bytes::copy_from_slice(body.as_bytes()))
    }

    async fn body_lines(response: Response) -> Vec<ClientEvent> {
        let (_, body) = response.into_parts();
        let bytes = body.collect().await;
        std::str::from_utf8(&bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn streams_classified_events() {
        let service = ScriptedService::new(vec![
            Ok(UpstreamDelta::text("<think>")),
            Ok(UpstreamDelta::text("hmm")),
            Ok(UpstreamDelta::text("</think>")),
            Ok(UpstreamDelta::text("Hello")),
        ]);
        let app = router(service.clone(), "Be brief.");

        let response = app
            .handle(post("/chat/stream", r#"{"messages":[{"role":"user","content":"hi"}]}"#))
            .await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.headers().get("content-type"), Some(NDJSON));
        assert!(response.is_streaming());

        let events = body_lines(response).await;
        assert_eq!(
            events,
            vec![
                ClientEvent::delta_reasoning("hmm"),
                ClientEvent::delta_answer("Hello"),
            ]
        );

        let seen = service.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![ChatMessage::system("Be brief."), ChatMessage::user("hi")]
        );
    }

    #[tokio::test]
    async fn upstream_failure_becomes_error_line() {
        let service = ScriptedService::new(vec![
            Ok(UpstreamDelta::text("partial")),
            Err(ChatError::Status {
                status: 429,
                body: "slow down".into(),
            }),
        ]);
        let response = router(service, "sys")
            .handle(post("/chat/stream", r#"{"messages":[]}"#))
            .await;
        assert_eq!(response.status(), StatusCode::Ok);

        let events = body_lines(response).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ClientEvent::delta_answer("partial"));
        assert_eq!(
            events[1],
            ClientEvent::error("upstream returned HTTP 429: slow down")
        );
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let app = router(ScriptedService::new(vec![]), "sys");
        for body in ["not json", r#"{"msgs":[]}"#, r#"{"messages":[{"role":"robot","content":"x"}]}"#] {
            let response = app.handle(post("/chat/stream", body)).await;
            assert_eq!(response.status(), StatusCode::BadRequest, "body: {body}");
            let (_, body) = response.into_parts();
            let value: serde_json::Value = serde_json::from_slice(&body.collect().await).unwrap();
            assert!(value["error"].as_str().unwrap().starts_with("invalid request body"));
        }
    }

    #[tokio::test]
    async fn index_serves_chat_page() {
        let app = router(ScriptedService::new(vec![]), "sys");
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        let response = app.handle(req).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(
            response.headers().get("content-type"),
            Some("text/html; charset=utf-8")
        );
        assert!(response.headers().contains("x-request-id"));
        let (_, body) = response.into_parts();
        assert!(std::str::from_utf8(&body.collect().await).unwrap().contains("/chat/stream"));
    }

    #[tokio::test]
    async fn wrong_method_on_stream_endpoint() {
        let app = router(ScriptedService::new(vec![]), "sys");
        let (req, _) = Request::parse(b"GET /chat/stream HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        let response = app.handle(req).await;
        assert_eq!(response.status(), StatusCode::MethodNotAllowed);
        assert_eq!(response.headers().get("allow"), Some("POST"));
    }

    #[test]
    fn chat_request_roles_decode() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"a"},{"role":"assistant","content":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(req.messages[1].role, Role::Assistant);
    }
}
