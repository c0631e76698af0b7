use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hmdlink::frame::Packet;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct PacketOutput<'a> {
    message_type: &'a str,
    type_byte: u8,
    payload_size: usize,
    payload: String,
    peer: &'a str,
    timestamp: String,
}

pub fn print_packet(packet: &Packet, peer: &str, format: OutputFormat) {
    let payload = packet.payload.as_ref();
    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                message_type: packet.message_type.name(),
                type_byte: packet.message_type.as_u8(),
                payload_size: payload.len(),
                payload: payload_preview(payload),
                peer,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["TYPE", "SIZE", "PEER", "PAYLOAD"]);
            table.add_row(vec![
                packet.message_type.name().to_string(),
                payload.len().to_string(),
                peer.to_string(),
                payload_preview(payload),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "type={} (0x{:02x}) size={} peer={} payload={}",
                packet.message_type,
                packet.message_type.as_u8(),
                payload.len(),
                peer,
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

/// One row of `hmdlink settings`.
#[derive(Serialize)]
pub struct SettingRow {
    pub key: String,
    pub kind: &'static str,
    pub value: String,
    pub default: String,
    pub constraint: String,
    pub summary: &'static str,
}

pub fn print_settings(rows: &[SettingRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table => {
            let mut table = new_table(vec!["KEY", "KIND", "VALUE", "DEFAULT", "CONSTRAINT"]);
            for row in rows {
                table.add_row(vec![
                    row.key.clone(),
                    row.kind.to_string(),
                    row.value.clone(),
                    row.default.clone(),
                    row.constraint.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for row in rows {
                println!("{}={}  # {} ({})", row.key, row.value, row.summary, row.kind);
            }
        }
    }
}

/// Periodic status line printed by `hmdlink run`.
#[derive(Serialize)]
pub struct StatusOutput {
    pub connected: bool,
    /// Degrees.
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub gaze_distance: Option<f32>,
    pub packets_received: u64,
    pub dropped: u64,
}

pub fn print_status(status: &StatusOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(status),
        OutputFormat::Table => {
            let mut table = new_table(vec!["LINK", "YAW", "PITCH", "ROLL", "GAZE", "RX", "DROPPED"]);
            table.add_row(vec![
                link_label(status.connected).to_string(),
                format!("{:.1}", status.yaw),
                format!("{:.1}", status.pitch),
                format!("{:.1}", status.roll),
                gaze_label(status.gaze_distance),
                status.packets_received.to_string(),
                status.dropped.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "link={} yaw={:.1} pitch={:.1} roll={:.1} gaze={} rx={} dropped={}",
                link_label(status.connected),
                status.yaw,
                status.pitch,
                status.roll,
                gaze_label(status.gaze_distance),
                status.packets_received,
                status.dropped
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn link_label(connected: bool) -> &'static str {
    if connected {
        "up"
    } else {
        "down"
    }
}

fn gaze_label(distance: Option<f32>) -> String {
    match distance {
        Some(d) if d.is_finite() => format!("{d:.2} m"),
        Some(_) => "inf".to_string(),
        None => "-".to_string(),
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
