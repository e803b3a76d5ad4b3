use std::time::Duration;

use bytes::{Buf, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::trace;

use crate::error::TransportError;

/// Size of the length prefix in bytes.
pub const LEN_PREFIX: usize = 4;

/// Maximum frame body size (1 MB). Account messages are tiny; anything larger
/// is a desynchronized or hostile peer.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A framed, buffered connection.
///
/// Reads accumulate in `buffer` and a frame is only consumed once it is
/// complete, so `read_frame` can be dropped mid-way (e.g. by a read deadline)
/// without losing bytes.
#[derive(Debug)]
pub struct Connection<S> {
    stream: BufWriter<S>,
    buffer: BytesMut,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Read the next frame and decode it.
    ///
    /// Returns `TransportError::PeerClosed` when the stream ends, whether or
    /// not a partial frame was buffered.
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<T, TransportError> {
        loop {
            if let Some(value) = self.parse_frame()? {
                return Ok(value);
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if !self.buffer.is_empty() {
                    trace!("stream ended with {} buffered bytes", self.buffer.len());
                }
                return Err(TransportError::PeerClosed);
            }
        }
    }

    /// `read_frame` bounded by a deadline. On expiry the connection is left
    /// intact and a later read resumes where this one stopped.
    pub async fn read_frame_timeout<T: DeserializeOwned>(
        &mut self,
        deadline: Duration,
    ) -> Result<T, TransportError> {
        match tokio::time::timeout(deadline, self.read_frame()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    pub async fn write_frame<T: Serialize>(&mut self, value: &T) -> Result<(), TransportError> {
        let body = serde_json::to_vec(value)?;
        if body.is_empty() || body.len() > MAX_FRAME_SIZE {
            return Err(TransportError::Protocol(format!(
                "refusing to send frame of {} bytes",
                body.len()
            )));
        }

        self.stream.write_u32(body.len() as u32).await?;
        self.stream.write_all(&body).await?;
        self.stream.flush().await?;
        trace!("wrote frame of {} bytes", body.len());
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    /// Try to decode one complete frame from the buffer.
    fn parse_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        if self.buffer.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut prefix = &self.buffer[..LEN_PREFIX];
        let len = prefix.get_u32() as usize;

        if len == 0 || len > MAX_FRAME_SIZE {
            return Err(TransportError::Protocol(format!("invalid frame length {}", len)));
        }

        let total = LEN_PREFIX + len;
        if self.buffer.len() < total {
            self.buffer.reserve(total - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(LEN_PREFIX);
        let body = self.buffer.split_to(len);
        let value = serde_json::from_slice(&body)?;
        Ok(Some(value))
    }
}
