//! Chunked file transfer between the filesystem and a framed connection.
//!
//! Both roles use the same two operations: the sender streams a file it
//! opened for reading, the receiver writes an announced number of payload
//! bytes into a truncated destination. Each chunk is at most `chunk_size`
//! bytes.

use crate::error::{Error, Result};
use crate::stream::FramedStream;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Chunk size used when none is configured
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Which way the bytes flow relative to the local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// File -> peer
    Send,
    /// Peer -> file
    Receive,
}

/// An open file paired with a direction and a byte counter.
///
/// Lives for exactly one GET/POST exchange.
#[derive(Debug)]
pub struct TransferSession {
    file: File,
    path: PathBuf,
    direction: Direction,
    expected: u64,
    transferred: u64,
    chunks: u64,
}

impl TransferSession {
    /// Open `path` for streaming to the peer.
    pub async fn open_source(path: &Path) -> Result<Self> {
        let not_found = |source| Error::FileNotFound {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).await.map_err(not_found)?;
        let metadata = file.metadata().await.map_err(not_found)?;
        if !metadata.is_file() {
            return Err(not_found(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            direction: Direction::Send,
            expected: metadata.len(),
            transferred: 0,
            chunks: 0,
        })
    }

    /// Create or truncate `path` to receive `expected` bytes from the peer.
    pub async fn create_destination(path: &Path, expected: u64) -> Result<Self> {
        let file = File::create(path).await.map_err(|source| Error::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            direction: Direction::Receive,
            expected,
            transferred: 0,
            chunks: 0,
        })
    }

    #[cfg(test)]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Payload size announced to (or by) the peer.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    #[cfg(test)]
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Stream the file to the peer in chunks.
    ///
    /// Stops at end of file or once the announced length has been sent,
    /// whichever comes first. A file that shrinks below its announced length
    /// leaves the peer short of bytes and is reported as an error.
    pub async fn stream_file_to_peer<S>(
        &mut self,
        conn: &mut FramedStream<S>,
        chunk_size: usize,
    ) -> Result<u64>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug_assert_eq!(self.direction, Direction::Send);
        let mut buf = vec![0u8; chunk_size.max(1)];

        while self.transferred < self.expected {
            let left = self.expected - self.transferred;
            let want = buf.len().min(usize::try_from(left).unwrap_or(usize::MAX));

            let n = self.file.read(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }

            conn.write_raw(&buf[..n]).await?;
            self.transferred += n as u64;
            self.chunks += 1;
            trace!(path = %self.path.display(), chunk = self.chunks, bytes = n, "Sent chunk");
        }
        conn.flush().await?;

        if self.transferred < self.expected {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "'{}' shrank during transfer ({} of {} bytes)",
                    self.path.display(),
                    self.transferred,
                    self.expected
                ),
            )));
        }

        debug!(
            path = %self.path.display(),
            bytes = self.transferred,
            chunks = self.chunks,
            "File sent"
        );
        Ok(self.transferred)
    }

    /// Receive the announced payload from the peer into the file.
    pub async fn receive_file_from_peer<S>(
        &mut self,
        conn: &mut FramedStream<S>,
        chunk_size: usize,
    ) -> Result<u64>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug_assert_eq!(self.direction, Direction::Receive);
        let mut buf = vec![0u8; chunk_size.max(1)];
        conn.expect_raw(self.expected - self.transferred);

        loop {
            let n = conn.read_raw(&mut buf).await?;
            if n == 0 {
                break;
            }

            self.file
                .write_all(&buf[..n])
                .await
                .map_err(|source| Error::FileWriteError {
                    path: self.path.clone(),
                    source,
                })?;
            self.transferred += n as u64;
            self.chunks += 1;
            trace!(path = %self.path.display(), chunk = self.chunks, bytes = n, "Received chunk");
        }

        self.file
            .flush()
            .await
            .map_err(|source| Error::FileWriteError {
                path: self.path.clone(),
                source,
            })?;

        debug!(
            path = %self.path.display(),
            bytes = self.transferred,
            chunks = self.chunks,
            "File received"
        );
        Ok(self.transferred)
    }
}
