//! TCP server for GET/POST file transfers.
//!
//! One tokio task per accepted connection. Each task owns its socket and
//! waits for the next request with an idle deadline of
//! `idle_base / live_connections`, recomputed before every request.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    content_length_header, decode_request, is_close, Method, Request, Status, GREETING,
};
use crate::registry::{ConnectionRegistry, Registration, TimeoutPolicy};
use crate::session::{ConnState, Role, Session};
use crate::stream::FramedStream;
use crate::transfer::TransferSession;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// State shared by every connection task
struct Shared {
    root: PathBuf,
    registry: Arc<ConnectionRegistry>,
    policy: TimeoutPolicy,
    chunk_size: usize,
    max_line_length: usize,
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
}

/// Why a connection ended
#[derive(Debug)]
pub enum Disconnect {
    /// Client sent CLOSE
    Closed,
    /// No request before the idle deadline
    Timeout(Duration),
    /// Peer went away without CLOSE
    Reset,
    /// Unrecoverable error on this connection
    Failed(Error),
}

impl Disconnect {
    pub fn reason(&self) -> &'static str {
        match self {
            Disconnect::Closed => "closed",
            Disconnect::Timeout(_) => "timeout",
            Disconnect::Reset => "reset",
            Disconnect::Failed(_) => "error",
        }
    }
}

impl From<Result<()>> for Disconnect {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Disconnect::Closed,
            Err(Error::Timeout(after)) => Disconnect::Timeout(after),
            Err(Error::ConnectionReset) => Disconnect::Reset,
            Err(e) => Disconnect::Failed(e),
        }
    }
}

impl Server {
    /// Bind the listening socket. Must run inside a tokio runtime.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let std_listener = create_listener(addr, config.backlog)?;
        let server = Server {
            listener: TcpListener::from_std(std_listener)?,
            shared: Arc::new(Shared {
                root: config.root,
                registry: ConnectionRegistry::new(),
                policy: TimeoutPolicy::new(config.idle_base),
                chunk_size: config.chunk_size,
                max_line_length: config.max_line_length,
            }),
        };

        info!(
            address = %server.local_addr()?,
            root = %server.shared.root.display(),
            idle_base = ?config.idle_base,
            chunk_size = config.chunk_size,
            "Server listening"
        );
        Ok(server)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Live connection registry
    #[cfg(test)]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.shared.registry)
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let registration = self.shared.registry.register(stream.as_raw_fd(), peer);
                    info!(
                        peer = %registration.info().peer,
                        conn_id = registration.id(),
                        fd = registration.info().fd,
                        live = self.shared.registry.len(),
                        "New connection"
                    );

                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        handle_connection(stream, peer, registration, shared).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Run one connection to completion and log how it ended.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registration: Registration,
    shared: Arc<Shared>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let mut conn = FramedStream::with_max_line(stream, shared.max_line_length);
    let mut session = Session::new(Role::Server, peer);

    let outcome = Disconnect::from(serve(&mut conn, &mut session, &shared).await);
    let last_state = session.state();
    session.close();
    let _ = conn.shutdown().await;

    let age_ms = registration.age().num_milliseconds();
    match &outcome {
        Disconnect::Failed(e) => warn!(
            peer = %peer,
            conn_id = registration.id(),
            reason = outcome.reason(),
            state = ?last_state,
            error = %e,
            requests = session.requests(),
            age_ms,
            "Host disconnected"
        ),
        Disconnect::Timeout(after) => info!(
            peer = %peer,
            conn_id = registration.id(),
            reason = outcome.reason(),
            after = ?after,
            requests = session.requests(),
            age_ms,
            "Host disconnected"
        ),
        _ => info!(
            peer = %peer,
            conn_id = registration.id(),
            reason = outcome.reason(),
            requests = session.requests(),
            age_ms,
            "Host disconnected"
        ),
    }
}

/// Greeting, then request/response cycles until CLOSE or failure.
async fn serve<S>(conn: &mut FramedStream<S>, session: &mut Session, shared: &Shared) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.write_line(GREETING).await?;
    session.ready()?;
    session.await_request()?;

    loop {
        let deadline = shared.policy.deadline(shared.registry.len());

        let line = read_control_line(conn, deadline).await?;
        if let Ok(line) = &line {
            debug!(peer = %session.peer(), request = %line, "Request line");
            if is_close(line) {
                session.close();
                return Ok(());
            }
        }

        // Every request line is followed by its header line
        let header = read_control_line(conn, deadline).await?;

        let decoded = match (line, header) {
            (Ok(line), Ok(header)) => decode_request(&line).map(|r| r.with_header(header)),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        let request = match decoded {
            Ok(request) => request,
            Err(e) => {
                warn!(peer = %session.peer(), error = %e, "Rejecting request");
                send_status(conn, Status::BadRequest).await?;
                continue;
            }
        };

        if session.begin(&request)? == ConnState::Closed {
            return Ok(());
        }

        match request.method {
            Method::Get => handle_get(conn, &request, shared).await?,
            Method::Post => handle_post(conn, &request, shared).await?,
            Method::Close => unreachable!("CLOSE ends the session in begin()"),
        }

        session.complete()?;
    }
}

/// Read one control line under the idle deadline.
///
/// An overlong line is skipped up to its terminator and handed back as the
/// inner `MalformedRequest` so the caller can reject it and keep the
/// connection.
async fn read_control_line<S>(
    conn: &mut FramedStream<S>,
    deadline: Duration,
) -> Result<std::result::Result<String, Error>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(deadline, conn.read_line()).await {
        Err(_) => Err(Error::Timeout(deadline)),
        Ok(Ok(Some(line))) => Ok(Ok(line)),
        Ok(Ok(None)) => Err(Error::ConnectionReset),
        Ok(Err(e @ Error::MalformedRequest(_))) => {
            let skipped = timeout(deadline, conn.discard_line())
                .await
                .map_err(|_| Error::Timeout(deadline))??;
            debug!(skipped, "Discarded overlong line");
            Ok(Err(e))
        }
        Ok(Err(e)) => Err(e),
    }
}

async fn send_status<S>(conn: &mut FramedStream<S>, status: Status) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.write_raw(status.line()).await?;
    conn.flush().await
}

/// Stream the requested file back, or reply NOT_FOUND.
async fn handle_get<S>(conn: &mut FramedStream<S>, request: &Request, shared: &Shared) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(path) = resolve_under_root(&shared.root, &request.path) else {
        warn!(path = %request.path, "Refusing path outside root");
        return send_status(conn, Status::NotFound).await;
    };

    let mut source = match TransferSession::open_source(&path).await {
        Ok(source) => source,
        Err(Error::FileNotFound { path, source }) => {
            info!(path = %path.display(), error = %source, "File not found");
            return send_status(conn, Status::NotFound).await;
        }
        Err(e) => return Err(e),
    };

    conn.write_raw(Status::Ok.line()).await?;
    conn.write_line(&content_length_header(source.expected())).await?;

    info!(path = %path.display(), bytes = source.expected(), "Sending file");
    let sent = source.stream_file_to_peer(conn, shared.chunk_size).await?;
    info!(path = %path.display(), bytes = sent, chunks = source.chunks(), "File sent successfully");
    Ok(())
}

/// Acknowledge, receive the announced payload, acknowledge again.
async fn handle_post<S>(conn: &mut FramedStream<S>, request: &Request, shared: &Shared) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let len = match request.content_length() {
        Ok(Some(len)) => len,
        Ok(None) => {
            warn!(path = %request.path, "POST without Content-Length");
            return send_status(conn, Status::BadRequest).await;
        }
        Err(e) => {
            warn!(path = %request.path, error = %e, "POST with bad Content-Length");
            return send_status(conn, Status::BadRequest).await;
        }
    };

    let Some(path) = resolve_under_root(&shared.root, &request.path) else {
        warn!(path = %request.path, "Refusing path outside root");
        return send_status(conn, Status::NotFound).await;
    };

    let mut destination = match TransferSession::create_destination(&path, len).await {
        Ok(destination) => destination,
        Err(Error::FileNotFound { path, source }) => {
            warn!(path = %path.display(), error = %source, "Cannot create destination");
            return send_status(conn, Status::NotFound).await;
        }
        Err(e) => return Err(e),
    };

    send_status(conn, Status::Ok).await?;
    if len > 0 {
        conn.skip_separator().await?;
    }
    let received = destination
        .receive_file_from_peer(conn, shared.chunk_size)
        .await?;
    info!(
        path = %path.display(),
        bytes = received,
        chunks = destination.chunks(),
        "File received successfully"
    );
    send_status(conn, Status::Ok).await
}

/// Join a request path under `root`.
///
/// Root and prefix components are dropped so absolute paths stay inside the
/// root; any `..` component is refused.
fn resolve_under_root(root: &Path, requested: &str) -> Option<PathBuf> {
    let mut joined = root.to_path_buf();
    let mut pushed = false;

    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                pushed = true;
            }
            Component::ParentDir => return None,
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    pushed.then_some(joined)
}

/// Create a TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
