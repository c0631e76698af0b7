//! Simulated perception unit: accepts one headset, sends a gaze calibration,
//! then streams IMU and eye-vector packets at 100 Hz.
//!
//! Run with:
//!   cargo run --example perception-sim
//!
//! In another terminal:
//!   cargo run --features cli -- run --host 127.0.0.1 --interval 500ms

use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use glam::{Vec2, Vec3};
use hmdlink::frame::{FrameReader, FrameWriter, MessageType};
use hmdlink::tracking::{
    AxisFit, CalibratedGazeModel, DistanceFit, EyePair, EyeVectorSample, ImuSample,
};
use hmdlink::transport::TcpLink;

const TICK: Duration = Duration::from_millis(10);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:5005")?;
    eprintln!("Listening on {}", listener.local_addr()?);

    let (stream, addr) = listener.accept()?;
    eprintln!("Headset connected: {addr}");
    let link = TcpLink::from_stream(stream)?;

    // Print whatever the headset sends back.
    let mut reader = FrameReader::new(link.try_clone()?);
    thread::spawn(move || {
        while let Ok(packet) = reader.read_packet() {
            match packet.message_type {
                MessageType::GazeDistance if packet.payload.len() == 4 => {
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(&packet.payload);
                    eprintln!("gaze distance {:.3} m", f32::from_le_bytes(bytes));
                }
                other => eprintln!("{other}: {} bytes", packet.payload.len()),
            }
        }
        eprintln!("Headset disconnected");
    });

    let mut writer = FrameWriter::new(link);
    writer.send(
        MessageType::GazeCalibration,
        &serde_json::to_vec(&calibration())?,
    )?;

    let mut t = 0.0f64;
    loop {
        // Slow yaw sweep with gravity on +z.
        let sample = ImuSample {
            gyro: Vec3::new(0.0, 0.0, (t * 0.5).sin() as f32),
            accel: Vec3::Z,
            mag: Vec3::X,
            timestamp: t,
        };
        // Eyes converge and diverge between roughly 1 m and 7 m.
        let vergence = 2.0 + 1.5 * (t * 0.2).sin() as f32;
        let eyes = EyeVectorSample {
            left: Vec2::new(vergence / 2.0, 0.0),
            right: Vec2::new(-vergence / 2.0, 0.0),
        };

        if writer.send(MessageType::Imu, &sample.encode()).is_err()
            || writer.send(MessageType::EyeVectors, &eyes.encode()).is_err()
        {
            break;
        }
        t += TICK.as_secs_f64();
        thread::sleep(TICK);
    }

    Ok(())
}

/// Identity angle fit; distance ≈ 0.065 m interpupillary baseline / vergence.
fn calibration() -> CalibratedGazeModel {
    let fit = AxisFit {
        yaw: vec![1.0, 0.0],
        pitch: vec![1.0, 0.0],
    };
    CalibratedGazeModel {
        reference: EyePair {
            left: [0.0, 0.0],
            right: [0.0, 0.0],
        },
        angle_fit: EyePair {
            left: fit.clone(),
            right: fit,
        },
        distance_fit: DistanceFit { a: 0.065, b: 0.0 },
    }
}
