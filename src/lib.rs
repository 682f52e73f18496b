//! # chatrelay
//!
//! A streaming chat backend for reasoning models, built on a small async
//! HTTP/1.1 server.
//!
//! The browser posts a conversation to `/chat/stream`; the relay forwards it
//! to an OpenAI-compatible chat-completions endpoint, reads the SSE reply and
//! answers with newline-delimited JSON. Text the model emits between
//! `<think>` and `</think>` arrives as `reasoning_content`, everything else as
//! `content`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chatrelay::auth::ApiKeyCredential;
//! use chatrelay::llm::UpstreamClient;
//! use chatrelay::{Request, Server, app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let upstream = UpstreamClient::new(
//!         reqwest::Client::new(),
//!         "https://example.services.ai.azure.com/models",
//!         "DeepSeek-R1",
//!         "preview",
//!         Arc::new(ApiKeyCredential::new("key")),
//!     );
//!     let router = Arc::new(app::router(Arc::new(upstream), "You are a helpful assistant."));
//!
//!     Server::bind("127.0.0.1:50505")
//!         .await?
//!         .run(move |req: Request| {
//!             let router = Arc::clone(&router);
//!             async move { router.handle(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod auth;
pub mod config;
pub mod context;
pub mod http;
pub mod llm;
pub mod middleware;
pub mod router;
pub mod server;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
