//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler
//! function. Buffered responses keep the connection alive; streamed responses
//! are written with chunked transfer encoding, flushed chunk by chunk, and
//! close the connection when the stream ends.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    Body, StatusCode,
    request::{Request, RequestError},
    response::{LAST_CHUNK, Response, encode_chunk},
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request (head plus body) buffered before answering `413`.
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// The relay's HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use chatrelay::server::Server;
/// use chatrelay::http::{Request, Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:0").await?;
///     server
///         .run(|_req: Request| async { Response::new(StatusCode::Ok).body("up") })
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves forever.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until_shutdown(handler, std::future::pending())
            .await
    }

    /// Serves until `shutdown` resolves.
    ///
    /// Shutdown stops accepting new connections; connections already being
    /// served run to completion on their own tasks.
    pub async fn run_until_shutdown<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "chatrelay listening");
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Writes an error response that ends the connection.
async fn reject(stream: &mut TcpStream, status: StatusCode, message: String) -> std::io::Result<()> {
    let (head, body) = Response::new(status).body(message).keep_alive(false).into_parts();
    stream.write_all(&head).await?;
    if let Body::Full(bytes) = body {
        stream.write_all(&bytes).await?;
    }
    stream.flush().await
}

/// Serves one TCP connection.
///
/// Loops over requests while the connection is keep-alive. Returns `Ok` when
/// the peer hangs up, including in the middle of a streamed response.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Bytes left over from the previous request may already hold the next
        // one, so parse before reading.
        let parsed = if buf.is_empty() {
            Err(RequestError::Incomplete)
        } else {
            Request::parse(&buf)
        };

        let (request, body_offset) = match parsed {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                if !fill(&mut stream, &mut buf, peer_addr).await? {
                    return Ok(());
                }
                if buf.len() > MAX_REQUEST_SIZE {
                    warn!(peer = %peer_addr, "request too large, sending 413");
                    return reject(&mut stream, StatusCode::PayloadTooLarge, "Request entity too large".into()).await;
                }
                continue;
            }
            Err(e @ RequestError::ChunkedBody) => {
                warn!(peer = %peer_addr, error = %e, "rejecting chunked upload");
                return reject(&mut stream, StatusCode::LengthRequired, e.to_string()).await;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                return reject(&mut stream, StatusCode::BadRequest, format!("Bad Request: {e}")).await;
            }
        };

        let content_length = match request.content_length() {
            Ok(n) => n,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                return reject(&mut stream, StatusCode::BadRequest, format!("Bad Request: {e}")).await;
            }
        };
        let total_needed = match body_offset.checked_add(content_length) {
            Some(total) if total <= MAX_REQUEST_SIZE => total,
            _ => {
                warn!(peer = %peer_addr, content_length, "declared body too large, sending 413");
                return reject(&mut stream, StatusCode::PayloadTooLarge, "Request entity too large".into()).await;
            }
        };
        if buf.len() < total_needed {
            if !fill(&mut stream, &mut buf, peer_addr).await? {
                return Ok(());
            }
            continue;
        }

        let mut consumed = buf.split_to(total_needed);
        let body = consumed.split_off(body_offset).freeze();
        let request = request.with_body(body);
        let request_keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request).await;
        let keep_alive = request_keep_alive && response.is_keep_alive();
        let response = response.keep_alive(keep_alive);
        let (head, body) = response.into_parts();
        stream.write_all(&head).await?;

        match body {
            Body::Full(bytes) => {
                stream.write_all(&bytes).await?;
                stream.flush().await?;
            }
            Body::Stream(mut chunks) => {
                stream.flush().await?;
                loop {
                    // Watch the socket while waiting for the next chunk so a
                    // disconnect is noticed even when the producer is idle.
                    // EOF counts as a disconnect.
                    let chunk = tokio::select! {
                        biased;
                        chunk = chunks.next() => chunk,
                        read = stream.read_buf(&mut buf) => {
                            match read {
                                Ok(n) if n > 0 && buf.len() <= MAX_REQUEST_SIZE => continue,
                                Ok(_) => debug!(peer = %peer_addr, "client went away mid-stream"),
                                Err(e) => debug!(peer = %peer_addr, error = %e, "client went away mid-stream"),
                            }
                            // Returning drops `chunks`, and with it the upstream request.
                            return Ok(());
                        }
                    };
                    let Some(chunk) = chunk else { break };
                    if chunk.is_empty() {
                        continue;
                    }
                    let written = async {
                        stream.write_all(&encode_chunk(&chunk)).await?;
                        stream.flush().await
                    };
                    if let Err(e) = written.await {
                        debug!(peer = %peer_addr, error = %e, "client went away mid-stream");
                        return Ok(());
                    }
                }
                stream.write_all(LAST_CHUNK).await?;
                stream.flush().await?;
                debug!(peer = %peer_addr, "stream finished");
            }
        }

        if !keep_alive {
            debug!(peer = %peer_addr, "closing connection");
            return Ok(());
        }
    }
}

/// Reads more bytes into `buf`. Returns `false` once the peer has hung up.
async fn fill(stream: &mut TcpStream, buf: &mut BytesMut, peer_addr: SocketAddr) -> std::io::Result<bool> {
    if stream.read_buf(buf).await? == 0 {
        debug!(peer = %peer_addr, "connection closed by peer");
        return Ok(false);
    }
    Ok(true)
}
