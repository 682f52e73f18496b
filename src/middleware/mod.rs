//! Middleware pipeline: composable logic that runs around route dispatch.
//!
//! Each [`Middleware`] receives the [`Context`] and a [`Next`] cursor. It may
//! pass the request on, answer it directly, or decorate the downstream
//! response. The router's dispatch function sits at the end of the chain.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;
use uuid::Uuid;

use crate::{Response, context::Context};

/// Boxed future returned by middleware and the terminal endpoint.
pub type BoxResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// The function the chain ends in, usually route dispatch.
pub type Endpoint = Arc<dyn Fn(Context) -> BoxResponseFuture + Send + Sync + 'static>;

/// The core middleware trait.
///
/// Implementations are shared across connection tasks, so they must be
/// `Send + Sync` and must not hold locks across `.await` points.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> BoxResponseFuture;
}

/// Cursor into the remaining middleware chain for one request.
///
/// `Next` is consumed by [`Next::run`], so each layer can forward at most once.
pub struct Next {
    middlewares: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    endpoint: Endpoint,
}

impl Next {
    pub fn new(middlewares: Arc<[Arc<dyn Middleware>]>, endpoint: Endpoint) -> Self {
        Self {
            middlewares,
            index: 0,
            endpoint,
        }
    }

    /// Invokes the next layer, or the endpoint once every layer has run.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(middleware) => {
                self.index += 1;
                middleware.handle(ctx, self).await
            }
            None => (self.endpoint)(ctx).await,
        }
    }
}

/// Logs every request and tags it with an id.
///
/// The id comes from an incoming `X-Request-Id` header when present,
/// otherwise a fresh UUID v4, and is echoed back on the response. The log
/// line is emitted when the handler returns, i.e. when a streamed response
/// *starts*, not when it finishes.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxResponseFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();
            let request_id = ctx
                .request()
                .headers()
                .get("x-request-id")
                .map(str::to_owned)
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            let mut response = next.run(ctx).await;
            response.set_header("X-Request-Id", request_id.as_str());

            tracing::info!(
                request_id = %request_id,
                streaming = response.is_streaming(),
                "{} {} - {} ({:?})",
                method,
                path,
                response.status().as_u16(),
                start.elapsed()
            );

            response
        })
    }
}
