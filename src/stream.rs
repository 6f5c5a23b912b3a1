//! Streaming Handles
//!
//! Several daemon operations are long-lived: `cat` and `log` return a byte
//! stream, `events` returns a stream of [`EventMessage`], `attach_guest`
//! opens a duplex console and `copy_to_guest` uploads arbitrary content.
//! The types here are transport-neutral; each transport adapts its wire
//! stream into them.

use crate::error::{Error, Result};
use crate::types::EventMessage;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Chunk size used when uploading content to a guest
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Raw bytes streamed out of a guest (file contents, console log)
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Daemon events, ending when the subscription is closed
pub type EventStream = BoxStream<'static, Result<EventMessage>>;

/// Content uploaded into a guest
pub type Content = Box<dyn AsyncRead + Send + Unpin + 'static>;

/// Collect a byte stream into a single buffer
pub async fn read_to_end(mut stream: ByteStream) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}

/// Split an `AsyncRead` into chunks of at most [`COPY_CHUNK_SIZE`] bytes
///
/// The stream ends after EOF or after yielding the first read error.
pub(crate) fn reader_chunks(reader: Content) -> BoxStream<'static, std::io::Result<Bytes>> {
    stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = vec![0u8; COPY_CHUNK_SIZE];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

/// Interactive console attached to a guest
///
/// Input written with [`GuestStream::send`] is forwarded to the guest;
/// output is read with [`GuestStream::next_chunk`]. Closing the input half
/// (or dropping the handle) tells the daemon the session is over.
pub struct GuestStream {
    input: Option<mpsc::Sender<Bytes>>,
    output: ByteStream,
}

impl GuestStream {
    pub(crate) fn new(input: mpsc::Sender<Bytes>, output: ByteStream) -> Self {
        Self {
            input: Some(input),
            output,
        }
    }

    /// Forward bytes to the guest console
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| Error::Transport("attach input already closed".to_string()))?;
        input
            .send(data.into())
            .await
            .map_err(|_| Error::Transport("attach session closed by daemon".to_string()))
    }

    /// Next chunk of console output, `None` once the session ended
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        self.output.next().await
    }

    /// Half-close: no more input will be sent
    pub fn close_input(&mut self) {
        self.input.take();
    }

    /// Whether input can still be sent
    pub fn is_input_open(&self) -> bool {
        self.input.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Split into the raw input sender and output stream
    pub fn into_parts(self) -> (Option<mpsc::Sender<Bytes>>, ByteStream) {
        (self.input, self.output)
    }
}

impl std::fmt::Debug for GuestStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestStream")
            .field("input_open", &self.is_input_open())
            .finish_non_exhaustive()
    }
}
