//! HTTP/1.1 response builder.
//!
//! A response body is either fully buffered or a stream of byte chunks. Full
//! bodies go out with `Content-Length`; streamed bodies go out with
//! `Transfer-Encoding: chunked`, one chunk per stream item, so NDJSON lines
//! reach the browser as soon as they are produced.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::{BoxStream, Stream};
use serde::Serialize;

use super::{Headers, StatusCode};

/// Terminating chunk of a chunked body.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Frames `data` as a single chunk of a chunked body.
///
/// An empty `data` would read as the terminating chunk, so callers must skip
/// empty items.
pub fn encode_chunk(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(data.len() + 12);
    buf.put(format!("{:X}\r\n", data.len()).as_bytes());
    buf.put(data);
    buf.put(&b"\r\n"[..]);
    buf.freeze()
}

/// Response payload.
pub enum Body {
    Full(Bytes),
    Stream(BoxStream<'static, Bytes>),
}

impl Body {
    /// Drains the body into one buffer. Mostly useful in tests.
    pub async fn collect(self) -> Bytes {
        match self {
            Body::Full(bytes) => bytes,
            Body::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.put(chunk);
                }
                buf.freeze()
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// An HTTP/1.1 response.
///
/// # Examples
///
/// ```
/// use chatrelay::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "text/html; charset=utf-8")
///     .body("<h1>chat</h1>");
///
/// let (head, _body) = response.into_parts();
/// let text = std::str::from_utf8(&head).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 13\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
}

impl Response {
    /// Creates a response with an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Full(Bytes::new()),
            keep_alive: true,
        }
    }

    /// Serializes `value` as the JSON body.
    ///
    /// Falls back to a bare `500` if `value` cannot be serialized.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status)
                .header("Content-Type", "application/json")
                .body(body),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize response body");
                Self::new(StatusCode::InternalServerError)
            }
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a header in place, replacing earlier values. Used by middleware
    /// decorating a downstream response.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Sets a fully buffered body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

    /// Sets a streamed body. Each item is written as one chunk.
    #[must_use]
    pub fn stream<S>(mut self, stream: S) -> Self
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        self.body = Body::Stream(stream.boxed());
        self
    }

    /// Controls the `Connection` header. Streamed responses always close.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Stream(_))
    }

    /// Whether the connection may be reused after this response.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive && !self.is_streaming()
    }

    /// Splits the response into its serialized head and its body.
    ///
    /// The head carries the status line, the handler's headers, a default
    /// `Content-Type` for non-empty full bodies, `Connection`, and either
    /// `Content-Length` or `Transfer-Encoding: chunked`.
    pub fn into_parts(mut self) -> (Bytes, Body) {
        let keep_alive = self.is_keep_alive();
        self.headers
            .set("Connection", if keep_alive { "keep-alive" } else { "close" });

        match &self.body {
            Body::Full(bytes) => {
                if !bytes.is_empty() && !self.headers.contains("content-type") {
                    self.headers.insert("Content-Type", "text/plain; charset=utf-8");
                }
                self.headers.set("Content-Length", bytes.len().to_string());
            }
            Body::Stream(_) => {
                self.headers.remove("content-length");
                self.headers.set("Transfer-Encoding", "chunked");
            }
        }

        let mut head = BytesMut::with_capacity(64 + self.headers.len() * 48);
        head.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            head.put(format!("{name}: {value}\r\n").as_bytes());
        }
        head.put(&b"\r\n"[..]);

        (head.freeze(), self.body)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
