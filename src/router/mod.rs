//! Request routing: map exact paths and methods to handler functions.
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so
//! `/chat/stream/` and `/chat/stream` are the same route. Routes are matched in
//! registration order. A path that exists under a different method answers
//! `405 Method Not Allowed` with an `Allow` header; an unknown path answers
//! `404 Not Found`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, Extensions};
use crate::middleware::{BoxResponseFuture, Endpoint, Middleware, Next};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async handler stored by the router.
pub type Handler = Arc<dyn Fn(Context) -> BoxResponseFuture + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is
/// `Send + Sync + 'static` implements it through the blanket impl.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

fn normalize(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

struct Route {
    method: Method,
    path: String,
    handler: Handler,
}

/// What dispatch decided for one request.
enum Resolution {
    Found(Handler),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// HTTP request router with a middleware chain in front of dispatch.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use chatrelay::middleware::LoggerMiddleware;
/// use chatrelay::context::Context;
/// use chatrelay::{Response, Router, StatusCode};
///
/// let mut router = Router::new();
/// router.layer(Arc::new(LoggerMiddleware));
/// router.get("/health", |_ctx: Context| async { Response::new(StatusCode::NoContent) });
/// ```
pub struct Router {
    routes: Vec<Route>,
    middlewares: Arc<[Arc<dyn Middleware>]>,
    extensions: Extensions,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            middlewares: Arc::from(Vec::new()),
            extensions: Extensions::new(),
        }
    }

    /// Register a handler for `GET` requests on `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    /// Register a handler for `POST` requests on `path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, handler);
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            path: normalize(path).to_owned(),
            handler,
        });
    }

    /// Appends a middleware. Layers run in the order they were added.
    pub fn layer(&mut self, middleware: Arc<dyn Middleware>) {
        let mut chain = self.middlewares.to_vec();
        chain.push(middleware);
        self.middlewares = Arc::from(chain);
    }

    /// Makes `value` available to handlers through [`Context::extension`].
    pub fn extension<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.extensions.insert(value);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn resolve(&self, method: &Method, path: &str) -> Resolution {
        let path = normalize(path);
        let mut allowed = Vec::new();
        for route in self.routes.iter().filter(|r| r.path == path) {
            if &route.method == method {
                return Resolution::Found(Arc::clone(&route.handler));
            }
            if !allowed.contains(&route.method) {
                allowed.push(route.method.clone());
            }
        }
        if allowed.is_empty() {
            Resolution::NotFound
        } else {
            Resolution::MethodNotAllowed(allowed)
        }
    }

    /// Runs `request` through the middleware chain and the matching route.
    pub async fn handle(&self, request: Request) -> Response {
        let endpoint: Endpoint = match self.resolve(request.method(), request.path()) {
            Resolution::Found(handler) => handler,
            Resolution::MethodNotAllowed(allowed) => {
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                Arc::new(move |_ctx: Context| -> BoxResponseFuture {
                    let allow = allow.clone();
                    Box::pin(async move {
                        Response::new(StatusCode::MethodNotAllowed).header("Allow", allow)
                    })
                })
            }
            Resolution::NotFound => {
                Arc::new(|_ctx: Context| -> BoxResponseFuture {
                    Box::pin(async { Response::new(StatusCode::NotFound) })
                })
            }
        };

        let ctx = Context::new(request, self.extensions.clone());
        Next::new(Arc::clone(&self.middlewares), endpoint)
            .run(ctx)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    #[test]
    fn trailing_slash_is_normalized() {
        assert_eq!(normalize("/chat/stream/"), "/chat/stream");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn len_tracks_registrations() {
        let mut router = Router::new();
        assert!(router.is_empty());
        router.get("/", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        router.post("/chat/stream", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        assert_eq!(router.len(), 2);
    }

    #[tokio::test]
    async fn empty_router_returns_404() {
        let router = Router::new();
        let res = router.handle(make_request("GET", "/")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn matching_route_runs() {
        let mut router = Router::new();
        router.post("/chat/stream", |_ctx: Context| async {
            Response::new(StatusCode::Ok).body("streamed")
        });
        let res = router.handle(make_request("POST", "/chat/stream/")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn wrong_method_returns_405_with_allow() {
        let mut router = Router::new();
        router.post("/chat/stream", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        let res = router.handle(make_request("GET", "/chat/stream")).await;
        assert_eq!(res.status(), StatusCode::MethodNotAllowed);
        assert_eq!(res.headers().get("allow"), Some("POST"));
    }

    #[tokio::test]
    async fn first_registration_wins() {
        let mut router = Router::new();
        router.get("/", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        router.get("/", |_ctx: Context| async { Response::new(StatusCode::NoContent) });
        let res = router.handle(make_request("GET", "/")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn handlers_see_extensions() {
        let mut router = Router::new();
        router.extension(String::from("relay"));
        router.get("/name", |ctx: Context| async move {
            let name = ctx.extension::<String>().map(|s| s.to_string()).unwrap_or_default();
            Response::new(StatusCode::Ok).body(name)
        });
        let res = router.handle(make_request("GET", "/name")).await;
        let (_, body) = res.into_parts();
        assert_eq!(body.collect().await.as_ref(), b"relay");
    }

    #[tokio::test]
    async fn middleware_wraps_unmatched_routes_too() {
        let mut router = Router::new();
        router.layer(Arc::new(crate::middleware::LoggerMiddleware));
        let res = router.handle(make_request("GET", "/missing")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert!(res.headers().contains("x-request-id"));
    }
}
