use std::io;
use std::path::Path;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::TransferError;

/// Size of a single pull from an [`AsyncRead`] transport.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Upper bound on up-front allocation for a single read request.
const MAX_PREALLOC: usize = 8 * 1024 * 1024;

enum Transport {
    Reader(Pin<Box<dyn AsyncRead + Send>>),
    Channel(mpsc::Receiver<io::Result<Vec<u8>>>),
    Closed,
}

/// Sequential, pull-based byte stream over an inbound transport.
///
/// Arrivals from the transport rarely line up with the lengths the caller
/// asks for, so surplus bytes are held in `pending` until the next read.
/// `cursor` marks how much of `pending` has already been handed out.
pub struct ByteSource {
    transport: Transport,
    pending: Vec<u8>,
    cursor: usize,
    position: u64,
}

impl ByteSource {
    /// Wraps any async reader (socket, file, pipe).
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            transport: Transport::Reader(Box::pin(reader)),
            pending: Vec::new(),
            cursor: 0,
            position: 0,
        }
    }

    /// Wraps a channel of arrivals; the stream ends when every sender is dropped.
    pub fn from_channel(rx: mpsc::Receiver<io::Result<Vec<u8>>>) -> Self {
        Self {
            transport: Transport::Channel(rx),
            pending: Vec::new(),
            cursor: 0,
            position: 0,
        }
    }

    /// Creates a channel-fed source and the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<io::Result<Vec<u8>>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::from_channel(rx))
    }

    /// Serves reads from an in-memory buffer.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            transport: Transport::Closed,
            pending: data,
            cursor: 0,
            position: 0,
        }
    }

    /// Opens a file on disk as a source.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::from_reader(file))
    }

    /// Reads up to `max_len` bytes.
    ///
    /// Waits for further arrivals until `max_len` bytes are available or the
    /// transport ends. A short read is returned only at end of stream; a read
    /// that finds no bytes at all fails with
    /// [`TransferError::UnexpectedEndOfStream`].
    pub async fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransferError> {
        let mut out = Vec::with_capacity(max_len.min(MAX_PREALLOC));

        while out.len() < max_len {
            if self.buffered() == 0 {
                match self.pull().await? {
                    Some(arrival) => {
                        self.pending = arrival;
                        self.cursor = 0;
                    }
                    None => break,
                }
                continue;
            }

            let take = self.buffered().min(max_len - out.len());
            out.extend_from_slice(&self.pending[self.cursor..self.cursor + take]);
            self.cursor += take;
            if self.cursor == self.pending.len() {
                self.pending.clear();
                self.cursor = 0;
            }
        }

        if out.is_empty() && max_len > 0 {
            return Err(TransferError::UnexpectedEndOfStream {
                expected: max_len as u64,
            });
        }

        self.position += out.len() as u64;
        Ok(out)
    }

    /// Number of bytes handed out so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Releases the underlying transport and drops buffered bytes.
    ///
    /// Subsequent reads behave as end of stream.
    pub fn close(&mut self) {
        self.transport = Transport::Closed;
        self.pending = Vec::new();
        self.cursor = 0;
    }

    /// Returns `true` once the transport is released and nothing is buffered.
    pub fn is_closed(&self) -> bool {
        matches!(self.transport, Transport::Closed) && self.buffered() == 0
    }

    fn buffered(&self) -> usize {
        self.pending.len() - self.cursor
    }

    async fn pull(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        let arrival = match &mut self.transport {
            Transport::Reader(reader) => {
                let mut buf = vec![0u8; READ_BUFFER_SIZE];
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    None
                } else {
                    buf.truncate(n);
                    Some(buf)
                }
            }
            Transport::Channel(rx) => match rx.recv().await {
                Some(Ok(bytes)) => Some(bytes),
                Some(Err(e)) => return Err(e.into()),
                None => None,
            },
            Transport::Closed => None,
        };

        if arrival.is_none() {
            self.transport = Transport::Closed;
        }
        Ok(arrival)
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transport = match self.transport {
            Transport::Reader(_) => "reader",
            Transport::Channel(_) => "channel",
            Transport::Closed => "closed",
        };
        f.debug_struct("ByteSource")
            .field("transport", &transport)
            .field("pending", &self.buffered())
            .field("position", &self.position)
            .finish()
    }
}
