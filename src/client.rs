//! Client request driver.
//!
//! Opens one connection, runs every queued command over it in order, then
//! sends CLOSE. All I/O is sequential: each request waits for its full
//! response before the next one is sent.

use crate::commands::{ClientCommand, CommandSource};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    content_length_header, is_not_found, is_ok, parse_content_length, Method, Request,
};
use crate::session::{Role, Session};
use crate::stream::FramedStream;
use crate::transfer::TransferSession;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Result of a GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOutcome {
    /// File written locally
    Received { bytes: u64 },
    /// Server replied with a non-OK status; nothing was written
    Refused { status: String },
}

/// Result of a POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    /// Server acknowledged the payload
    Uploaded { bytes: u64, attempts: u32 },
    /// Server refused the request before any payload was sent
    Refused { status: String },
}

/// A connected client
pub struct Client {
    conn: FramedStream<TcpStream>,
    session: Session,
    config: ClientConfig,
}

impl Client {
    /// Connect and consume the greeting.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let addr = config.addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| Error::ConnectFailed {
                addr: addr.clone(),
                source,
            })?;
        let peer = stream.peer_addr()?;
        info!(server = %peer, "Connection established");

        let mut conn = FramedStream::with_max_line(stream, config.max_line_length);
        let mut session = Session::new(Role::Client, peer);

        let greeting = conn.expect_line().await?;
        info!(message = %greeting, "Server");
        session.ready()?;
        session.await_request()?;

        Ok(Self {
            conn,
            session,
            config,
        })
    }

    async fn send_request(&mut self, request: &Request) -> Result<()> {
        debug!(method = %request.method, path = %request.path, "Sending request");
        self.conn.write_raw(&request.encode()).await?;
        self.conn.flush().await
    }

    async fn read_status(&mut self) -> Result<String> {
        let status = self.conn.expect_line().await?;
        info!(status = %status, "Server");
        Ok(status)
    }

    /// Fetch `path` from the server into the local root.
    pub async fn get(&mut self, path: &str) -> Result<GetOutcome> {
        let request = Request::new(Method::Get, path);
        self.session.begin(&request)?;
        self.send_request(&request).await?;

        let status = self.read_status().await?;
        let outcome = if is_ok(&status) {
            let len = parse_content_length(&self.conn.expect_line().await?)?;
            let local = self.config.root.join(path);

            let mut destination = TransferSession::create_destination(&local, len).await?;
            let bytes = destination
                .receive_file_from_peer(&mut self.conn, self.config.chunk_size)
                .await?;
            info!(
                path = %local.display(),
                bytes,
                chunks = destination.chunks(),
                "File received successfully"
            );
            GetOutcome::Received { bytes }
        } else if is_not_found(&status) {
            info!(path, "File not found on server");
            GetOutcome::Refused { status }
        } else {
            warn!(path, status = %status, "GET refused");
            GetOutcome::Refused { status }
        };

        self.session.complete()?;
        Ok(outcome)
    }

    /// Upload `path` from the local root, re-sending the whole request while
    /// the server's final status is not OK, up to `max_attempts` times.
    pub async fn post(&mut self, path: &str) -> Result<PostOutcome> {
        let local = self.config.root.join(path);
        let request = Request::new(Method::Post, path);
        self.session.begin(&request)?;

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;

            // Reopened per attempt so the announced length matches the bytes sent
            let mut source = TransferSession::open_source(&local).await?;
            let framed = request
                .clone()
                .with_header(content_length_header(source.expected()));
            self.send_request(&framed).await?;

            let status = self.read_status().await?;
            if !is_ok(&status) {
                warn!(path, status = %status, "POST refused");
                break PostOutcome::Refused { status };
            }

            info!(path = %local.display(), bytes = source.expected(), "Sending file");
            let bytes = source
                .stream_file_to_peer(&mut self.conn, self.config.chunk_size)
                .await?;

            let status = self.read_status().await?;
            if is_ok(&status) {
                info!(path, bytes, chunks = source.chunks(), attempts, "File sent successfully");
                break PostOutcome::Uploaded { bytes, attempts };
            }

            warn!(
                path,
                attempt = attempts,
                max_attempts = self.config.max_attempts,
                status = %status,
                "Upload not acknowledged"
            );
            if attempts >= self.config.max_attempts {
                return Err(Error::UploadFailed {
                    path: path.to_string(),
                    attempts,
                });
            }
        };

        self.session.complete()?;
        Ok(outcome)
    }

    /// Run one queued command.
    pub async fn execute(&mut self, command: &ClientCommand) -> Result<()> {
        match command.method {
            Method::Get => self.get(&command.path).await.map(|_| ()),
            Method::Post => self.post(&command.path).await.map(|_| ()),
            Method::Close => Ok(()),
        }
    }

    /// Send CLOSE and drop the connection.
    pub async fn close(mut self) -> Result<()> {
        let request = Request::new(Method::Close, "");
        self.send_request(&request).await?;
        self.session.begin(&request)?;
        // Server may already have closed its end
        let _ = self.conn.shutdown().await;
        debug!(requests = self.session.requests(), "Connection closed");
        Ok(())
    }
}

/// Connect, run every command from the configured commands file, close.
pub async fn run(config: ClientConfig) -> Result<()> {
    let commands_path = config.commands.clone();
    let mut client = Client::connect(config).await?;
    let commands = CommandSource::load(&commands_path).await?;

    let mut executed = 0u64;
    for command in commands {
        client.execute(&command).await?;
        executed += 1;
    }

    client.close().await?;
    info!(commands = executed, "All commands executed");
    Ok(())
}
