use crate::types::TimeUs;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetronomeChange {
    Playing(bool),
    Bpm(u32),
    Visible(bool),
}

/// Link to an external metronome that may drive the playback clock.
pub trait MetronomeLink: Send {
    /// The link is usable at all (signal found, feature available).
    fn is_active(&self) -> bool;
    /// The metronome's own transport is running.
    fn is_playing(&self) -> bool;
    /// Wall time elapsed since the metronome started; negative during its count-in.
    fn current_time_us(&self) -> TimeUs;
    fn bpm(&self) -> u32;
    fn set_bpm(&mut self, bpm: u32);
    fn set_measure(&mut self, beats_per_bar: u32);
    fn stop(&mut self);

    /// Change notifications since the previous call, oldest first.
    fn poll_changes(&mut self) -> Vec<MetronomeChange>;
}
