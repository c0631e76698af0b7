use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use hmdlink::frame::{encode_packet, FrameConfig, FrameReader, FrameWriter, MessageType, Packet};
use hmdlink::link::{
    ControlCommand, Endpoint, EventTopic, HeadsetEvent, Message, MessageRouter, OperatingMode,
    RouteTable, StreamTransport, TransportConfig,
};
use hmdlink::settings::{Setting, SettingsRegistry};
use hmdlink::tracking::{AxisFit, CalibratedGazeModel, DistanceFit, EyePair, EyeVectorSample};
use hmdlink::transport::{PeerAddress, TcpLink};
use hmdlink::HeadsetController;
use parking_lot::Mutex;

fn loopback() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn gyro(gx: f32, gy: f32, gz: f32) -> Vec<u8> {
    [gx, gy, gz].iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn frame_reader(stream: TcpStream) -> FrameReader<TcpLink> {
    let link = TcpLink::from_stream(stream).expect("wrap stream");
    let config = FrameConfig {
        read_timeout: Some(Duration::from_secs(5)),
        ..FrameConfig::default()
    };
    FrameReader::with_config_tcp(link, config).expect("reader")
}

#[test]
fn packets_split_across_reads_reach_the_handler_in_order() {
    let (listener, port) = loopback();

    let mut wire = BytesMut::new();
    encode_packet(MessageType::Imu, &gyro(1.0, 2.0, 3.0), &mut wire).unwrap();
    encode_packet(MessageType::Imu, &gyro(4.0, 5.0, 6.0), &mut wire).unwrap();
    assert_eq!(wire.len(), 32);

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        stream.set_nodelay(true).expect("nodelay");
        for chunk in [&wire[..3], &wire[3..21], &wire[21..]] {
            stream.write_all(chunk).expect("write chunk");
            stream.flush().expect("flush");
            thread::sleep(Duration::from_millis(20));
        }
        stream
    });

    let config = TransportConfig::for_peer(PeerAddress::new("127.0.0.1", port));
    let (transport, inbound) = StreamTransport::connect(config, None).expect("connect");

    let router = MessageRouter::new(RouteTable::for_mode(OperatingMode::Companion));
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    router.register_handler(
        MessageType::Imu,
        Arc::new(move |message: &Message| {
            if let Message::Raw(bytes) = message {
                sink.lock().push(bytes.to_vec());
            }
        }),
    );

    for _ in 0..2 {
        let packet = inbound
            .recv_timeout(Duration::from_secs(5))
            .expect("packet should arrive");
        router.route_packet(Endpoint::Stream, packet).unwrap();
    }

    assert_eq!(
        received.lock().as_slice(),
        &[gyro(1.0, 2.0, 3.0), gyro(4.0, 5.0, 6.0)]
    );
    assert_eq!(transport.stats().packets_received, 2);
    assert_eq!(router.stats().delivered_locally, 2);

    transport.shutdown();
    drop(server.join().expect("server thread"));
}

#[test]
fn controller_exchanges_packets_with_a_perception_unit() {
    let (listener, port) = loopback();
    let settings = SettingsRegistry::new();
    settings.set(Setting::PeerHost, "127.0.0.1").unwrap();
    settings.set(Setting::PeerPort, f64::from(port)).unwrap();

    let mut controller = HeadsetController::new(Arc::new(settings)).expect("controller");
    let link_events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&link_events);
    controller.events().subscribe(
        EventTopic::Link,
        Arc::new(move |event: &HeadsetEvent| sink.lock().push(event.clone())),
    );

    controller.connect().expect("connect");
    assert!(controller.is_connected());
    assert!(matches!(
        link_events.lock().first(),
        Some(HeadsetEvent::LinkUp { .. })
    ));

    let (stream, _) = listener.accept().expect("accept");
    let mut writer = FrameWriter::with_config_tcp(
        TcpLink::from_stream(stream.try_clone().expect("clone")).expect("wrap"),
        FrameConfig::default(),
    )
    .expect("writer");
    let mut reader = frame_reader(stream);

    // IMU from the perception unit drives the published orientation.
    for _ in 0..20 {
        writer.send(MessageType::Imu, &gyro(0.0, 0.0, 1.0)).unwrap();
    }
    assert!(wait_until(|| controller.filter_stats().updates == 20));
    assert!(controller.orientation().z.abs() > 0.0);

    // Control goes the other way as JSON.
    controller.send_control(&ControlCommand::Ping).expect("control");
    let packet = reader.read_packet().expect("control packet");
    assert_eq!(packet.message_type, MessageType::Control);
    let body: serde_json::Value = serde_json::from_slice(&packet.payload).unwrap();
    assert_eq!(body["command"], "ping");

    // Calibrate, then a converging eye pair comes back as a gaze distance.
    let fit = AxisFit {
        yaw: vec![1.0, 0.0],
        pitch: vec![1.0, 0.0],
    };
    let model = CalibratedGazeModel {
        reference: EyePair {
            left: [0.0, 0.0],
            right: [0.0, 0.0],
        },
        angle_fit: EyePair {
            left: fit.clone(),
            right: fit,
        },
        distance_fit: DistanceFit { a: 1.0, b: 0.0 },
    };
    writer
        .send(
            MessageType::GazeCalibration,
            &serde_json::to_vec(&model).unwrap(),
        )
        .unwrap();
    assert!(wait_until(|| controller.has_calibration()));

    let sample = EyeVectorSample {
        left: glam::Vec2::new(1.0f32.to_degrees(), 0.0),
        right: glam::Vec2::ZERO,
    };
    writer.send(MessageType::EyeVectors, &sample.encode()).unwrap();

    let Packet {
        message_type,
        payload,
    } = reader.read_packet().expect("gaze distance packet");
    assert_eq!(message_type, MessageType::GazeDistance);
    let distance = f32::from_le_bytes(payload.as_ref().try_into().expect("4-byte payload"));
    assert!((distance - 1.0).abs() < 1e-4);
    assert!(wait_until(|| controller.gaze_distance().is_some()));

    controller.shutdown();
    assert!(!controller.is_connected());
    assert!(matches!(
        link_events.lock().last(),
        Some(HeadsetEvent::LinkDown)
    ));
}
