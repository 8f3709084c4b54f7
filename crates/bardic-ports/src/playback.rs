use crate::types::*;
use serde::{Deserialize, Serialize};

/// One note of the cleaned track, in track microseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledNote {
    pub pitch: u8,
    pub velocity: u8,
    pub start_us: TimeUs,
    pub end_us: TimeUs,
}

/// What a sound transport is asked to play. Times are track time; the
/// transport advances `time_scaling` track microseconds per wall microsecond.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaybackScore {
    pub notes: Vec<ScheduledNote>,
    pub time_scaling: f64,
    pub end_us: TimeUs,
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// A running sound output for one loaded track.
///
/// `current_time_us` reports track time with scaling and section offset
/// already applied, so the assistant can use it as its clock directly.
pub trait SoundTransport: Send {
    fn start(&mut self) -> Result<(), TransportError>;
    fn start_at(&mut self, time_us: TimeUs) -> Result<(), TransportError>;
    fn stop(&mut self);
    fn set_speed(&mut self, ratio: f64);
    fn current_time_us(&self) -> TimeUs;
    fn is_running(&self) -> bool;

    /// Returns true once after the transport ran past its last event or was
    /// stopped by the device.
    fn poll_finished(&mut self) -> bool;
}

/// Acquires sound transports. Acquisition may block on the device and is
/// only attempted at playback start.
pub trait SoundOutputPort: Send + Sync {
    fn list_outputs(&self) -> Result<Vec<MidiOutputDevice>, TransportError>;

    fn open_transport(&self, score: PlaybackScore) -> Result<Box<dyn SoundTransport>, TransportError>;
}
