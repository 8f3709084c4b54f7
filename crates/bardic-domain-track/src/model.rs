use bardic_ports::types::{NoteName, Tick};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub channel: u8,
    pub start_tick: Tick,
    pub duration_ticks: Tick,
}

impl Note {
    pub fn end_tick(&self) -> Tick {
        self.start_tick + self.duration_ticks
    }

    /// Octave index, `pitch / 12` (middle C is octave 5).
    pub fn octave(&self) -> i32 {
        octave_of(self.pitch)
    }

    pub fn name(&self) -> NoteName {
        NoteName::from_pitch(self.pitch)
    }

    pub fn overlaps(&self, start_tick: Tick, end_tick: Tick) -> bool {
        self.start_tick < end_tick && self.end_tick() > start_tick
    }
}

pub fn octave_of(pitch: u8) -> i32 {
    (pitch / 12) as i32
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoPoint {
    pub tick: Tick,
    pub us_per_quarter: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignaturePoint {
    pub tick: Tick,
    pub signature: TimeSignature,
}

/// A single playable track: notes plus the global tempo and meter maps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MidiTrack {
    pub name: String,
    pub ppq: u16,
    pub tempo_map: Vec<TempoPoint>,
    pub time_signatures: Vec<TimeSignaturePoint>,
    /// Sorted by start tick, then pitch.
    pub notes: Vec<Note>,
}

impl MidiTrack {
    pub fn new(name: impl Into<String>, ppq: u16) -> Self {
        Self {
            name: name.into(),
            ppq,
            tempo_map: vec![TempoPoint {
                tick: 0,
                us_per_quarter: 500_000,
            }],
            time_signatures: vec![TimeSignaturePoint {
                tick: 0,
                signature: TimeSignature::default(),
            }],
            notes: Vec::new(),
        }
    }

    pub fn sort_notes(&mut self) {
        sort_notes(&mut self.notes);
    }

    pub fn end_tick(&self) -> Tick {
        self.notes.iter().map(Note::end_tick).max().unwrap_or(0)
    }
}

pub fn sort_notes(notes: &mut [Note]) {
    notes.sort_by(|a, b| {
        a.start_tick
            .cmp(&b.start_tick)
            .then(a.pitch.cmp(&b.pitch))
            .then(a.duration_ticks.cmp(&b.duration_ticks))
    });
}
