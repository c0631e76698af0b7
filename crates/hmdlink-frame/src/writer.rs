use std::io::{ErrorKind, Write};

use bytes::{Buf, BytesMut};
use hmdlink_transport::TcpLink;
use tracing::trace;

use crate::codec::{encode_packet, FrameConfig, Packet};
use crate::error::{FrameError, Result};
use crate::message_type::MessageType;
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes packets to any `Write` stream without ever splitting a frame.
///
/// Encoded bytes stay queued until the stream accepts them. A write that
/// fails partway through a frame (typically the send timeout expiring) keeps
/// the unwritten tail: [`FrameWriter::resume`] continues from the exact byte
/// where the stream stopped, and the next [`FrameWriter::send`] writes that
/// tail ahead of its own frame. The peer never sees a truncated header or
/// payload followed by a fresh one.
pub struct FrameWriter<T> {
    inner: T,
    queued: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            queued: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.send(packet.message_type, packet.payload.as_ref())
    }

    /// Queue one packet and write everything queued.
    ///
    /// An oversized payload is rejected before anything is queued. On an I/O
    /// error the frame stays queued; nothing is lost until the writer is
    /// dropped.
    pub fn send(&mut self, message_type: MessageType, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_packet_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_packet_size,
            });
        }

        encode_packet(message_type, payload, &mut self.queued)?;
        self.resume()
    }

    /// Write whatever an earlier failed call left queued, then flush.
    pub fn resume(&mut self) -> Result<()> {
        while !self.queued.is_empty() {
            match self.inner.write(&self.queued) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => self.queued.advance(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    trace!(pending = self.queued.len(), error = %err, "write stopped mid-frame");
                    return Err(FrameError::Io(err));
                }
            }
        }

        self.flush()
    }

    /// Bytes accepted by `send` but not yet written.
    pub fn pending(&self) -> usize {
        self.queued.len()
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<TcpLink> {
    /// Writer over a `TcpLink`; the configured write timeout becomes the
    /// socket send timeout.
    pub fn with_config_tcp(inner: TcpLink, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
