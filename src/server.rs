//! TCP server for the benchmark endpoints and the signaling relay.
//!
//! Accepts connections and serves one request per connection, either on a
//! task of its own (concurrent model) or inline in the accept loop
//! (sequential model). No read or write timeouts are applied: a stalled
//! client holds its task, or under the sequential model the whole server,
//! until it disconnects.

use crate::config::{Config, Model};
use crate::http::response;
use crate::http::{read_request, route, ParseError, Request, Response, Route};
use crate::metrics::LatencyRecorder;
use crate::pages;
use crate::workload;
use crate::ws::{handshake, session, FrameError, HandshakeError, SignalingHub};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, trace};

/// Server instance
pub struct Server {
    config: Config,
    recorder: Arc<LatencyRecorder>,
    hub: Arc<SignalingHub>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Server {
            config,
            recorder: LatencyRecorder::new(),
            hub: SignalingHub::new(),
        })
    }

    /// Bind the listening socket with address reuse and the configured backlog.
    pub fn bind(&self) -> std::io::Result<TcpListener> {
        let listener = create_listener(self.config.listen, self.config.backlog)?;
        TcpListener::from_std(listener)
    }

    /// Accept connections forever under the configured model.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(
            address = %listener.local_addr()?,
            model = self.config.model.label(),
            "Server listening"
        );

        match self.config.model {
            Model::Concurrent => self.run_concurrent(listener).await,
            Model::Sequential => self.run_sequential(listener).await,
        }
    }

    async fn run_concurrent(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            debug!(peer = %addr, error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// One connection at a time: the next accept waits for the current
    /// connection to finish, compute and WebSocket sessions included.
    async fn run_sequential(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");
                    if let Err(e) = self.handle_connection(stream).await {
                        debug!(peer = %addr, error = %e, "Connection error");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Serve a single connection from request head to close.
    async fn handle_connection(&self, stream: TcpStream) -> Result<(), ConnectionError> {
        let timer = self.recorder.begin();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let request = match read_request(&mut reader).await {
            Ok(request) => request,
            Err(ParseError::Empty) => {
                trace!("Empty request, closing");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let route = route(&request);
        trace!(method = %request.method, path = %request.path, ?route, "Routing request");

        if route == Route::WebSocketUpgrade {
            return self.upgrade(&request, reader, writer).await;
        }

        self.respond(route, &request, &mut writer).await?;
        // count the request before the client can observe the close
        drop(timer);
        writer.shutdown().await?;
        Ok(())
    }

    async fn respond(
        &self,
        route: Route,
        request: &Request,
        writer: &mut OwnedWriteHalf,
    ) -> std::io::Result<()> {
        let model = self.config.model;
        let response = match route {
            Route::Root => Response::ok(response::TEXT_HTML, pages::index(model)),
            Route::Hello => Response::ok(
                response::TEXT_PLAIN,
                format!("Hello from {} server\n", model.label()),
            ),
            Route::Compute => {
                let ms = request.query_i64("ms", self.config.compute_default_ms);
                burn(model, Duration::from_millis(ms.max(0) as u64)).await?;
                Response::ok(response::TEXT_PLAIN, format!("compute:{}ms\n", ms))
            }
            Route::Io => {
                let bytes = request
                    .query_i64("bytes", self.config.io_default_bytes)
                    .max(0) as u64;
                let head = response::head(response::Status::Ok, response::OCTET_STREAM, bytes);
                writer.write_all(&head).await?;
                return workload::stream_filler(writer, bytes).await;
            }
            Route::Metrics => Response::ok(
                response::APPLICATION_JSON,
                self.recorder.snapshot(model.label()).to_json(),
            ),
            Route::MethodNotAllowed => Response::method_not_allowed(),
            Route::NotFound | Route::WebSocketUpgrade => Response::not_found(),
        };
        response.write_to(writer).await
    }

    /// Complete the handshake and run the relay session until the peer leaves.
    async fn upgrade(
        &self,
        request: &Request,
        mut reader: BufReader<OwnedReadHalf>,
        mut writer: OwnedWriteHalf,
    ) -> Result<(), ConnectionError> {
        let accept = handshake::negotiate(request)?;
        writer
            .write_all(&handshake::switching_protocols(&accept))
            .await?;
        writer.flush().await?;

        let room = request
            .query_param("room")
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.config.default_room)
            .to_string();
        debug!(room = %room, "WebSocket session started");

        session::run(
            &self.hub,
            &room,
            &mut reader,
            writer,
            self.config.max_frame_bytes,
        )
        .await?;
        debug!(
            room = %room,
            remaining = self.hub.room_size(&room),
            "WebSocket session ended"
        );
        Ok(())
    }

    /// Get a reference to the recorder for testing
    #[cfg(test)]
    pub fn recorder(&self) -> &Arc<LatencyRecorder> {
        &self.recorder
    }
}

/// Run a `/compute` burn under `model`.
///
/// Concurrent burns move to the blocking pool, one thread each, so runtime
/// workers stay free for other connections. Sequential burns hold the only
/// thread.
async fn burn(model: Model, duration: Duration) -> std::io::Result<()> {
    match model {
        Model::Concurrent => tokio::task::spawn_blocking(move || workload::cpu_burn(duration))
            .await
            .map_err(std::io::Error::other),
        Model::Sequential => {
            workload::cpu_burn(duration);
            Ok(())
        }
    }
}

fn create_listener(addr: SocketAddr, backlog: i32) -> std::io::Result<std::net::TcpListener> {
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Per-connection failures. None of them reach the accept loop.
#[derive(Debug)]
pub enum ConnectionError {
    Request(ParseError),
    Handshake(HandshakeError),
    Frame(FrameError),
    Io(std::io::Error),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Request(e) => write!(f, "Malformed request: {}", e),
            ConnectionError::Handshake(e) => write!(f, "Handshake rejected: {}", e),
            ConnectionError::Frame(e) => write!(f, "WebSocket session error: {}", e),
            ConnectionError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<ParseError> for ConnectionError {
    fn from(e: ParseError) -> Self {
        ConnectionError::Request(e)
    }
}

impl From<HandshakeError> for ConnectionError {
    fn from(e: HandshakeError) -> Self {
        ConnectionError::Handshake(e)
    }
}

impl From<FrameError> for ConnectionError {
    fn from(e: FrameError) -> Self {
        ConnectionError::Frame(e)
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e)
    }
}
