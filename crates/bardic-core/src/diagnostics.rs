use crate::clock::ClockSource;
use crate::ipc::AssistState;
use bardic_domain_track::{TrackStats, TransformReport};
use bardic_ports::settings::AssistSettings;
use bardic_ports::types::{MidiOutputDevice, TimeUs};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum DiagnosticsError {
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

#[derive(Serialize)]
struct AppVersion {
    name: String,
    version: String,
}

#[derive(Serialize)]
struct PlatformInfo {
    os: String,
    arch: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrackSnapshot {
    pub name: String,
    pub stats: TrackStats,
    pub report: TransformReport,
    pub transpose: i32,
    pub start_bar: Option<i64>,
    pub end_bar: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClockSnapshot {
    pub state: AssistState,
    pub source: ClockSource,
    pub time_us: TimeUs,
    pub time_scaling: f64,
    pub paused_us: TimeUs,
    pub sync_error_us: TimeUs,
    pub transport_speed: f64,
}

#[derive(Serialize)]
struct DeviceSnapshot {
    midi_outputs: Vec<MidiOutputDevice>,
}

#[derive(Serialize)]
struct RecentPresses {
    pitches: Vec<u8>,
}

pub struct DiagnosticsSnapshot<'a> {
    pub settings: &'a AssistSettings,
    pub track: Option<TrackSnapshot>,
    pub clock: ClockSnapshot,
    pub midi_outputs: Vec<MidiOutputDevice>,
    pub recent_presses: Vec<u8>,
}

pub fn export_diagnostics(dir: &Path, snapshot: DiagnosticsSnapshot<'_>) -> Result<(), DiagnosticsError> {
    fs::create_dir_all(dir).map_err(|e| DiagnosticsError::Io(e.to_string()))?;

    let app_version = AppVersion {
        name: "Bardic".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let platform = PlatformInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    };

    write_json(&dir.join("app_version.json"), &app_version)?;
    write_json(&dir.join("platform.json"), &platform)?;
    write_json(&dir.join("settings.json"), snapshot.settings)?;
    write_json(&dir.join("track.json"), &snapshot.track)?;
    write_json(&dir.join("clock.json"), &snapshot.clock)?;
    write_json(
        &dir.join("device_snapshot.json"),
        &DeviceSnapshot {
            midi_outputs: snapshot.midi_outputs,
        },
    )?;
    write_json(
        &dir.join("recent_presses.json"),
        &RecentPresses {
            pitches: snapshot.recent_presses,
        },
    )?;

    tracing::info!(dir = %dir.display(), "diagnostics exported");
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), DiagnosticsError> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| DiagnosticsError::Serde(e.to_string()))?;
    fs::write(path, data).map_err(|e| DiagnosticsError::Io(e.to_string()))
}
