use std::collections::VecDeque;

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::codec::{decode_packet, Packet, HEADER_SIZE};
use crate::error::FrameError;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Counters describing what the decoder has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Complete packets produced.
    pub packets: u64,
    /// Packets skipped because their type byte is unknown.
    pub unknown_types: u64,
    /// Full buffer resets caused by corrupt lengths or overflow.
    pub resets: u64,
}

/// Per-connection reassembly buffer.
///
/// Bytes are appended with [`FrameDecoder::push`] as they arrive off the
/// socket; [`FrameDecoder::decode`] drains every complete packet and keeps an
/// incomplete trailing packet for the next call. Corruption discards the
/// whole buffer: data loss is acceptable, misframed payloads are not.
///
/// The buffer never holds more than [`FrameDecoder::buffer_limit`] bytes.
/// When a push would cross it, complete packets are split off first and held
/// until the next `decode`, so only bytes that cannot belong to any valid
/// packet are ever discarded.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    ready: VecDeque<Packet>,
    max_packet_size: usize,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            ready: VecDeque::new(),
            max_packet_size,
            stats: DecoderStats::default(),
        }
    }

    /// Largest number of bytes the buffer may hold before it is reset.
    ///
    /// One maximal packet plus one more header always fits.
    pub fn buffer_limit(&self) -> usize {
        self.max_packet_size.saturating_add(2 * HEADER_SIZE)
    }

    /// Append received bytes.
    ///
    /// Large pushes are taken in slices no bigger than the free space, with
    /// complete packets split off in between.
    pub fn push(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = self.buffer_limit().saturating_sub(self.buf.len());
            if room == 0 {
                self.split_complete();
                if self.buf.len() >= self.buffer_limit() {
                    warn!(
                        buffered = self.buf.len(),
                        limit = self.buffer_limit(),
                        "reassembly buffer overflow; discarding buffered bytes"
                    );
                    self.reset();
                }
                continue;
            }
            let take = room.min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
        }
    }

    /// Drain every complete packet received so far.
    pub fn decode(&mut self) -> Vec<Packet> {
        self.split_complete();
        self.ready.drain(..).collect()
    }

    /// Push then decode.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Packet> {
        self.push(data);
        self.decode()
    }

    /// Number of unconsumed bytes held for the next call.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Move complete packets from the buffer to the ready queue.
    fn split_complete(&mut self) {
        loop {
            match decode_packet(&mut self.buf, self.max_packet_size) {
                Ok(Some(packet)) => {
                    self.stats.packets += 1;
                    self.ready.push_back(packet);
                }
                Ok(None) => break,
                Err(FrameError::UnknownMessageType { byte, length }) => {
                    self.stats.unknown_types += 1;
                    warn!(
                        type_byte = format_args!("0x{byte:02x}"),
                        length, "dropping packet with unknown message type"
                    );
                }
                Err(err) => {
                    warn!(error = %err, buffered = self.buf.len(), "stream corruption; resetting buffer");
                    self.reset();
                    break;
                }
            }
        }
    }

    fn reset(&mut self) {
        debug!(discarded = self.buf.len(), "reassembly buffer reset");
        self.buf.clear();
        self.stats.resets += 1;
    }
}
