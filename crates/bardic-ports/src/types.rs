use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

pub type Tick = i64; // musical time, monotonic in track
pub type TimeUs = i64; // track time in microseconds, negative during lead-in

/// Playable octaves of the instrument, plus its top C.
pub const BASIC_OCTAVE_RANGE: u32 = 3;
pub const EXTENDED_OCTAVE_RANGE: u32 = 5;

/// Octave index (pitch / 12) the game's key layout is centered on.
pub const GAME_DEFAULT_MID_OCTAVE: i32 = 5;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MidiOutputDevice {
    pub id: DeviceId,
    pub name: String,
}

/// Pitch class of a note, C..B.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteName {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl NoteName {
    const ALL: [NoteName; 12] = [
        NoteName::C,
        NoteName::CSharp,
        NoteName::D,
        NoteName::DSharp,
        NoteName::E,
        NoteName::F,
        NoteName::FSharp,
        NoteName::G,
        NoteName::GSharp,
        NoteName::A,
        NoteName::ASharp,
        NoteName::B,
    ];

    pub fn from_pitch(pitch: u8) -> Self {
        Self::ALL[(pitch % 12) as usize]
    }

    pub fn semitone(self) -> u8 {
        self as u8
    }

    pub fn is_half_step(self) -> bool {
        matches!(
            self,
            NoteName::CSharp
                | NoteName::DSharp
                | NoteName::FSharp
                | NoteName::GSharp
                | NoteName::ASharp
        )
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NoteName::C => "C",
            NoteName::CSharp => "C#",
            NoteName::D => "D",
            NoteName::DSharp => "D#",
            NoteName::E => "E",
            NoteName::F => "F",
            NoteName::FSharp => "F#",
            NoteName::G => "G",
            NoteName::GSharp => "G#",
            NoteName::A => "A",
            NoteName::ASharp => "A#",
            NoteName::B => "B",
        };
        f.write_str(name)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type Shared<T> = Arc<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_name_wraps_by_octave() {
        assert_eq!(NoteName::from_pitch(60), NoteName::C);
        assert_eq!(NoteName::from_pitch(73), NoteName::CSharp);
        assert!(NoteName::from_pitch(70).is_half_step());
        assert!(!NoteName::from_pitch(71).is_half_step());
        assert_eq!(NoteName::from_pitch(66).to_string(), "F#");
    }
}
