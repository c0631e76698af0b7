#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use hmdlink::frame::{encode_packet, FrameReader, MessageType};

fn hmdlink() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_hmdlink"));
    command.args(["--log-level", "error"]);
    command.env_remove("HMDLINK_HOST").env_remove("HMDLINK_PORT");
    command
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("free port")
}

fn connect_with_retry(port: u16, timeout: Duration) -> TcpStream {
    let start = Instant::now();
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return stream,
            Err(err) if start.elapsed() >= timeout => panic!("connect timeout: {err}"),
            Err(_) => thread::sleep(Duration::from_millis(25)),
        }
    }
}

#[test]
fn version_prints_name_and_version() {
    let output = hmdlink().arg("version").output().expect("run version");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("hmdlink {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn settings_json_lists_every_key_with_overrides() {
    let output = hmdlink()
        .args(["--format", "json", "settings", "--set", "imu.beta_still=0.2"])
        .output()
        .expect("run settings");
    assert!(output.status.success());

    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json rows");
    let rows = rows.as_array().expect("array");
    assert_eq!(rows.len(), hmdlink::settings::Setting::ALL.len());

    let beta = rows
        .iter()
        .find(|row| row["key"] == "imu.beta_still")
        .expect("beta_still row");
    assert_eq!(beta["value"], "0.2");
    assert_eq!(beta["default"], "0.1");
}

#[test]
fn invalid_override_exits_with_config_code() {
    let output = hmdlink()
        .args(["settings", "--set", "imu.beta_still=7"])
        .output()
        .expect("run settings");
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid --set"));
}

#[test]
fn send_frames_one_packet_to_the_peer() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let child = hmdlink()
        .args(["send", "--host", "127.0.0.1", "--port", &port.to_string()])
        .args(["--type", "control", "--json", r#"{"command":"ping"}"#])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("send should start");

    let (stream, _) = listener.accept().expect("accept");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    let packet = FrameReader::new(stream).read_packet().expect("packet");
    assert_eq!(packet.message_type, MessageType::Control);
    assert_eq!(packet.payload.as_ref(), br#"{"command":"ping"}"#);

    let output = child.wait_with_output().expect("send should exit");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn send_to_closed_port_is_a_transport_error() {
    let port = free_port();
    let output = hmdlink()
        .args(["send", "--host", "127.0.0.1", "--port", &port.to_string()])
        .args(["--type", "imu", "--data", "x"])
        .output()
        .expect("run send");
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn listen_prints_matching_packets_as_json() {
    let port = free_port();
    let mut child = hmdlink()
        .args(["--format", "json", "listen", "--port", &port.to_string()])
        .args(["--types", "log", "--count", "1"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("listen should start");

    let mut stream = connect_with_retry(port, Duration::from_secs(3));
    let mut wire = BytesMut::new();
    encode_packet(MessageType::Imu, &[0u8; 12], &mut wire).unwrap();
    encode_packet(MessageType::Log, br#"{"level":"info","message":"hi"}"#, &mut wire).unwrap();
    stream.write_all(&wire).expect("write packets");

    let stdout = child.stdout.take().expect("stdout");
    let mut line = String::new();
    BufReader::new(stdout).read_line(&mut line).expect("read line");
    let printed: serde_json::Value = serde_json::from_str(&line).expect("json line");
    assert_eq!(printed["message_type"], "LOG");
    assert_eq!(printed["type_byte"], 0x04);

    let status = child.wait().expect("listen should exit");
    assert!(status.success());
}
