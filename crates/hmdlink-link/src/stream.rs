use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use hmdlink_frame::{FrameConfig, FrameDecoder, FrameError, FrameWriter, MessageType, Packet};
use hmdlink_settings::{Setting, SettingsProvider};
use hmdlink_transport::{is_idle_timeout, PeerAddress, TcpLink};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{LinkError, Result};
use crate::router::Link;
use crate::worker::join_bounded;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Connection parameters for [`StreamTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub peer: PeerAddress,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub send_timeout: Duration,
    pub max_packet_size: usize,
    /// Attempts after the first failed send.
    pub max_send_retries: u32,
    pub join_timeout: Duration,
    pub inbound_queue_capacity: usize,
}

impl TransportConfig {
    /// Read every `transport.*` setting.
    pub fn from_settings(settings: &dyn SettingsProvider) -> Result<Self> {
        let port = settings.number(Setting::PeerPort)?;
        let port = u16::try_from(port as i64)
            .map_err(|_| LinkError::InvalidConfig(format!("peer port {port} out of range")))?;

        Ok(Self {
            peer: PeerAddress::new(settings.text(Setting::PeerHost)?, port),
            connect_timeout: millis(settings, Setting::ConnectTimeoutMs)?,
            read_timeout: millis(settings, Setting::ReadTimeoutMs)?,
            send_timeout: millis(settings, Setting::SendTimeoutMs)?,
            max_packet_size: settings.number(Setting::MaxPacketSize)? as usize,
            max_send_retries: settings.number(Setting::MaxSendRetries)? as u32,
            join_timeout: millis(settings, Setting::JoinTimeoutMs)?,
            inbound_queue_capacity: settings.number(Setting::InboundQueueCapacity)? as usize,
        })
    }

    /// Defaults aimed at `peer`.
    pub fn for_peer(peer: PeerAddress) -> Self {
        Self {
            peer,
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_millis(100),
            send_timeout: Duration::from_millis(500),
            max_packet_size: hmdlink_frame::DEFAULT_MAX_PACKET_SIZE,
            max_send_retries: 3,
            join_timeout: Duration::from_secs(1),
            inbound_queue_capacity: 1024,
        }
    }

    fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_packet_size: self.max_packet_size,
            read_timeout: Some(self.read_timeout),
            write_timeout: Some(self.send_timeout),
        }
    }
}

fn millis(settings: &dyn SettingsProvider, setting: Setting) -> Result<Duration> {
    let ms = settings.number(setting)?;
    if !ms.is_finite() || ms <= 0.0 {
        return Err(LinkError::InvalidConfig(format!("{setting} must be positive")));
    }
    Ok(Duration::from_millis(ms as u64))
}

/// Connection state reported to the status observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

pub type StatusObserver = Arc<dyn Fn(LinkStatus) + Send + Sync>;

/// Snapshot of transport counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub unknown_types: u64,
    pub buffer_resets: u64,
    pub packets_sent: u64,
    pub send_retries: u64,
    pub send_failures: u64,
}

#[derive(Default)]
struct Counters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    unknown_types: AtomicU64,
    buffer_resets: AtomicU64,
    packets_sent: AtomicU64,
    send_retries: AtomicU64,
    send_failures: AtomicU64,
}

struct Shared {
    running: AtomicBool,
    connected: AtomicBool,
    counters: Counters,
    observer: Option<StatusObserver>,
}

impl Shared {
    /// Flip to disconnected, notifying once.
    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Some(observer) = &self.observer {
                observer(LinkStatus::Disconnected);
            }
        }
    }
}

/// One client connection to the perception unit.
///
/// A dedicated thread reads the socket, reassembles packets and hands them to
/// the inbound queue in receipt order. [`StreamTransport::send_packet`] may be called
/// from any thread while the receive loop runs; the read and write halves are
/// independent socket handles.
pub struct StreamTransport {
    config: TransportConfig,
    link: TcpLink,
    writer: Mutex<FrameWriter<TcpLink>>,
    shared: Arc<Shared>,
    receive_loop: Mutex<Option<JoinHandle<()>>>,
}

impl StreamTransport {
    /// Connect once, with the configured hard timeout, and start receiving.
    ///
    /// Failure is returned to the caller; nothing retries automatically.
    pub fn connect(
        config: TransportConfig,
        observer: Option<StatusObserver>,
    ) -> Result<(Self, Receiver<Packet>)> {
        let link = TcpLink::connect(&config.peer, config.connect_timeout)?;
        Self::start(config, link, observer)
    }

    /// Run the transport over an already connected socket.
    pub fn start(
        config: TransportConfig,
        link: TcpLink,
        observer: Option<StatusObserver>,
    ) -> Result<(Self, Receiver<Packet>)> {
        let frame_config = config.frame_config();
        let writer = FrameWriter::with_config_tcp(link.try_clone()?, frame_config)?;
        let reader = link.try_clone()?;
        reader.set_read_timeout(Some(config.read_timeout))?;

        let (inbound_tx, inbound_rx) = bounded(config.inbound_queue_capacity.max(1));
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            connected: AtomicBool::new(true),
            counters: Counters::default(),
            observer,
        });

        info!(peer = %config.peer, "perception link connected");
        if let Some(observer) = &shared.observer {
            observer(LinkStatus::Connected);
        }

        let receive_loop = ReceiveLoop {
            reader,
            decoder: FrameDecoder::new(config.max_packet_size),
            inbound: inbound_tx,
            shared: Arc::clone(&shared),
            enqueue_timeout: config.read_timeout,
        };
        let handle = thread::Builder::new()
            .name("hmdlink-receive".into())
            .spawn(move || receive_loop.run())
            .map_err(|source| LinkError::Spawn {
                name: "receive".into(),
                source,
            })?;

        Ok((
            Self {
                config,
                link,
                writer: Mutex::new(writer),
                shared,
                receive_loop: Mutex::new(Some(handle)),
            },
            inbound_rx,
        ))
    }

    /// Frame and write one packet, retrying up to the configured count.
    ///
    /// The writer stays locked across retries and each retry resumes the
    /// frame from the first unwritten byte, so other packets never land in
    /// the middle of it. After the last failed attempt the link is marked
    /// disconnected and the message abandoned.
    pub fn send_packet(&self, message_type: MessageType, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(LinkError::Disconnected);
        }

        let counters = &self.shared.counters;
        let mut writer = self.writer.lock();
        let mut outcome = writer.send(message_type, payload);
        let mut retry = 0;
        loop {
            match outcome {
                Ok(()) => {
                    counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(err @ FrameError::PayloadTooLarge { .. }) => return Err(err.into()),
                Err(err) if retry < self.config.max_send_retries && self.is_running() => {
                    retry += 1;
                    counters.send_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        packet_type = %message_type,
                        retry,
                        pending = writer.pending(),
                        error = %err,
                        "send stalled; resuming"
                    );
                    outcome = writer.resume();
                }
                Err(err) => {
                    counters.send_failures.fetch_add(1, Ordering::Relaxed);
                    error!(packet_type = %message_type, attempts = retry + 1, error = %err, "send abandoned");
                    self.shared.mark_disconnected();
                    return Err(LinkError::SendFailed {
                        message_type,
                        attempts: retry + 1,
                        source: err,
                    });
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn peer(&self) -> &PeerAddress {
        &self.config.peer
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn stats(&self) -> TransportStats {
        let c = &self.shared.counters;
        TransportStats {
            packets_received: c.packets_received.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            unknown_types: c.unknown_types.load(Ordering::Relaxed),
            buffer_resets: c.buffer_resets.load(Ordering::Relaxed),
            packets_sent: c.packets_sent.load(Ordering::Relaxed),
            send_retries: c.send_retries.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
        }
    }

    /// Stop the receive loop, wait for it boundedly, then release the socket.
    ///
    /// Idempotent. A join timeout is logged and the thread left to exit once
    /// the socket closes under it.
    pub fn shutdown(&self) {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        if let Some(handle) = self.receive_loop.lock().take() {
            join_bounded(handle, self.config.join_timeout, "receive");
        }
        if was_running {
            if let Err(err) = self.link.shutdown() {
                debug!(error = %err, "socket shutdown");
            }
            self.shared.mark_disconnected();
            info!(peer = %self.config.peer, "perception link closed");
        }
    }
}

impl Link for StreamTransport {
    fn send(&self, message_type: MessageType, payload: &[u8]) -> Result<()> {
        self.send_packet(message_type, payload)
    }

    fn is_connected(&self) -> bool {
        StreamTransport::is_connected(self)
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ReceiveLoop {
    reader: TcpLink,
    decoder: FrameDecoder,
    inbound: Sender<Packet>,
    shared: Arc<Shared>,
    enqueue_timeout: Duration,
}

impl ReceiveLoop {
    fn run(mut self) {
        debug!("receive loop started");
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        while self.shared.running.load(Ordering::SeqCst) {
            let read = match self.reader.read(&mut chunk) {
                Ok(0) => {
                    info!("peer closed the stream");
                    break;
                }
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_idle_timeout(&err) => continue,
                Err(err) => {
                    if self.shared.running.load(Ordering::SeqCst) {
                        error!(error = %err, "stream read failed");
                    }
                    break;
                }
            };

            self.shared
                .counters
                .bytes_received
                .fetch_add(read as u64, Ordering::Relaxed);
            let packets = self.decoder.feed(&chunk[..read]);
            self.publish_decoder_stats();

            for packet in packets {
                if !self.enqueue(packet) {
                    debug!("inbound consumer gone; stopping receive loop");
                    self.shared.mark_disconnected();
                    return;
                }
            }
        }

        self.shared.mark_disconnected();
        debug!("receive loop stopped");
    }

    /// Blocks while the queue is full, rechecking the run flag.
    fn enqueue(&self, mut packet: Packet) -> bool {
        loop {
            match self.inbound.send_timeout(packet, self.enqueue_timeout) {
                Ok(()) => {
                    self.shared
                        .counters
                        .packets_received
                        .fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(SendTimeoutError::Timeout(returned)) => {
                    if !self.shared.running.load(Ordering::SeqCst) {
                        return false;
                    }
                    packet = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    fn publish_decoder_stats(&self) {
        let stats = self.decoder.stats();
        let counters = &self.shared.counters;
        counters
            .unknown_types
            .store(stats.unknown_types, Ordering::Relaxed);
        counters.buffer_resets.store(stats.resets, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;

    use bytes::BytesMut;
    use hmdlink_frame::{encode_packet, FrameReader};
    use hmdlink_settings::SettingsRegistry;

    use super::*;

    fn loopback() -> (TcpListener, TransportConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = TransportConfig::for_peer(listener.local_addr().unwrap().into());
        config.read_timeout = Duration::from_millis(20);
        config.join_timeout = Duration::from_millis(500);
        (listener, config)
    }

    #[test]
    fn config_from_default_settings() {
        let config = TransportConfig::from_settings(&SettingsRegistry::new()).unwrap();
        assert_eq!(config.peer.to_string(), "192.168.137.2:5005");
        assert_eq!(config.read_timeout, Duration::from_millis(100));
        assert_eq!(config.max_packet_size, 0x00FF_FFFF);
        assert_eq!(config.max_send_retries, 3);
    }

    #[test]
    fn receives_packets_split_across_writes() {
        let (listener, config) = loopback();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut wire = BytesMut::new();
            encode_packet(MessageType::Log, br#"{"level":"info","message":"a"}"#, &mut wire)
                .unwrap();
            encode_packet(MessageType::GazeCalibration, b"{}", &mut wire).unwrap();
            for piece in [&wire[..3], &wire[3..20], &wire[20..]] {
                stream.write_all(piece).unwrap();
                stream.flush().unwrap();
                thread::sleep(Duration::from_millis(5));
            }
            thread::sleep(Duration::from_millis(100));
        });

        let (transport, inbound) = StreamTransport::connect(config, None).unwrap();
        let first = inbound.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = inbound.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.message_type, MessageType::Log);
        assert_eq!(second.message_type, MessageType::GazeCalibration);
        assert_eq!(transport.stats().packets_received, 2);

        peer.join().unwrap();
        transport.shutdown();
    }

    #[test]
    fn send_reaches_peer() {
        let (listener, config) = loopback();
        let peer = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let link = TcpLink::from_stream(stream).unwrap();
            FrameReader::new(link).read_packet().unwrap()
        });

        let (transport, _inbound) = StreamTransport::connect(config, None).unwrap();
        transport
            .send_packet(MessageType::GazeDistance, &1.5f32.to_le_bytes())
            .unwrap();

        let packet = peer.join().unwrap();
        assert_eq!(packet.message_type, MessageType::GazeDistance);
        assert_eq!(packet.payload.as_ref(), &1.5f32.to_le_bytes());
        assert_eq!(transport.stats().packets_sent, 1);
    }

    #[test]
    fn peer_close_marks_disconnected_once() {
        let (listener, config) = loopback();
        let downs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&downs);
        let observer: StatusObserver = Arc::new(move |status: LinkStatus| {
            if status == LinkStatus::Disconnected {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let peer = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });
        let (transport, inbound) = StreamTransport::connect(config, Some(observer)).unwrap();
        peer.join().unwrap();

        // The loop drops its sender when it exits.
        assert!(inbound.recv_timeout(Duration::from_secs(2)).is_err());
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send_packet(MessageType::Control, b"{}"),
            Err(LinkError::Disconnected)
        ));

        transport.shutdown();
        assert_eq!(downs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_is_bounded_and_idempotent() {
        let (listener, config) = loopback();
        let peer = thread::spawn(move || listener.accept().map(|(stream, _)| stream).unwrap());

        let (transport, _inbound) = StreamTransport::connect(config, None).unwrap();
        let _held_open = peer.join().unwrap();

        let started = std::time::Instant::now();
        transport.shutdown();
        transport.shutdown();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!transport.is_connected());
    }

    #[test]
    fn connect_failure_is_reported() {
        let (listener, config) = loopback();
        drop(listener);
        assert!(matches!(
            StreamTransport::connect(config, None),
            Err(LinkError::Transport(_))
        ));
    }

    #[test]
    fn oversized_send_is_not_retried() {
        let (listener, mut config) = loopback();
        config.max_packet_size = 8;
        let peer = thread::spawn(move || listener.accept().map(|(stream, _)| stream).unwrap());

        let (transport, _inbound) = StreamTransport::connect(config, None).unwrap();
        let _held_open = peer.join().unwrap();

        let err = transport
            .send_packet(MessageType::SceneMarkers, &[0u8; 32])
            .unwrap_err();
        assert!(matches!(err, LinkError::Frame(FrameError::PayloadTooLarge { .. })));
        assert!(transport.is_connected());
        assert_eq!(transport.stats().send_retries, 0);
    }

    #[test]
    fn stalled_send_resumes_without_misframing() {
        let (listener, mut config) = loopback();
        config.send_timeout = Duration::from_millis(50);
        config.max_send_retries = 50;
        let peer = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            // Let the socket buffers fill so the first write times out mid-frame.
            thread::sleep(Duration::from_millis(300));
            let mut reader = FrameReader::new(TcpLink::from_stream(stream).unwrap());
            (reader.read_packet().unwrap(), reader.read_packet().unwrap())
        });

        let (transport, _inbound) = StreamTransport::connect(config, None).unwrap();
        let preview = vec![0x5a; hmdlink_frame::DEFAULT_MAX_PACKET_SIZE];
        transport.send_packet(MessageType::EyePreview, &preview).unwrap();
        transport
            .send_packet(MessageType::GazeDistance, &0.75f32.to_le_bytes())
            .unwrap();

        let (first, second) = peer.join().unwrap();
        assert_eq!(first.message_type, MessageType::EyePreview);
        assert!(first.payload.as_ref() == preview.as_slice());
        assert_eq!(second.message_type, MessageType::GazeDistance);
        assert_eq!(second.payload.as_ref(), &0.75f32.to_le_bytes());

        let stats = transport.stats();
        assert!(stats.send_retries > 0);
        assert_eq!(stats.send_failures, 0);
        assert_eq!(stats.packets_sent, 2);
        assert!(transport.is_connected());
        transport.shutdown();
    }

    #[test]
    fn send_abandoned_after_retries_marks_disconnected() {
        let (listener, mut config) = loopback();
        config.send_timeout = Duration::from_millis(30);
        config.max_send_retries = 2;
        let peer = thread::spawn(move || listener.accept().map(|(stream, _)| stream).unwrap());

        let (transport, _inbound) = StreamTransport::connect(config, None).unwrap();
        // Accepted but never read.
        let _held_open = peer.join().unwrap();

        let preview = vec![0u8; hmdlink_frame::DEFAULT_MAX_PACKET_SIZE];
        let err = transport
            .send_packet(MessageType::EyePreview, &preview)
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::SendFailed {
                message_type: MessageType::EyePreview,
                attempts: 3,
                ..
            }
        ));

        let stats = transport.stats();
        assert_eq!(stats.send_retries, 2);
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.packets_sent, 0);
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send_packet(MessageType::Control, b"{}"),
            Err(LinkError::Disconnected)
        ));
        transport.shutdown();
    }
}
