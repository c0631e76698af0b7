use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use hmdlink_transport::TcpLink;

use crate::codec::{FrameConfig, Packet};
use crate::decoder::{DecoderStats, FrameDecoder};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete packets from any `Read` stream.
///
/// Handles partial reads internally, callers always get complete packets.
/// Corrupt or unknown packets are dropped by the inner [`FrameDecoder`] and
/// reading continues.
pub struct FrameReader<T> {
    inner: T,
    decoder: FrameDecoder,
    ready: VecDeque<Packet>,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new packet reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new packet reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(config.max_packet_size),
            ready: VecDeque::new(),
            config,
        }
    }

    /// Read the next complete packet (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                return Ok(packet);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.ready.extend(self.decoder.feed(&chunk[..read]));
        }
    }

    /// Decoder counters (packets, unknown types, resets).
    pub fn stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current packet reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<TcpLink> {
    /// Create a packet reader for a `TcpLink` and apply read timeout from config.
    pub fn with_config_tcp(inner: TcpLink, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: hmdlink_transport::TransportError) -> FrameError {
    match err {
        hmdlink_transport::TransportError::Io(io) => FrameError::Io(io),
        hmdlink_transport::TransportError::Connect { source, .. }
        | hmdlink_transport::TransportError::Resolve { source, .. } => FrameError::Io(source),
    }
}
