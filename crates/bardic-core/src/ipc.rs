use bardic_domain_eval::ScoreEvent;
use bardic_domain_track::{TrackStats, TransformReport};
use bardic_ports::types::TimeUs;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssistState {
    Stopped,
    Playing,
    /// Sound-only run, not gated by training mode and not scored.
    PlayingPreview,
    PausedForInput,
}

impl AssistState {
    pub fn is_running(self) -> bool {
        !matches!(self, AssistState::Stopped)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AssistCommand {
    /// `track: None` merges every track of the file.
    LoadMidi { path: String, track: Option<usize> },
    SetSection { start_bar: Option<i64>, end_bar: Option<i64> },
    /// `None` plays at the track's own tempo.
    SetTargetBpm { bpm: Option<u32> },
    Transpose { delta: i32 },
    Start,
    StartPreview,
    Stop,
    ExportDiagnostics { path: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AssistEvent {
    StateChanged {
        state: AssistState,
    },
    TrackChanged {
        name: String,
        stats: TrackStats,
        report: TransformReport,
        valid_basic: bool,
        valid_extended: bool,
        can_play: bool,
    },
    SectionAdjusted {
        start_bar: Option<i64>,
        end_bar: Option<i64>,
    },
    TempoChanged {
        source_bpm: f64,
        target_bpm: Option<u32>,
        time_scaling: f64,
    },
    Transposed {
        offset: i32,
    },
    NowPlaying {
        pitch: u8,
        start_us: TimeUs,
        end_us: TimeUs,
    },
    WaitingForInput {
        pitch: u8,
    },
    Resumed {
        pitch: u8,
    },
    NoteScored {
        event: ScoreEvent,
    },
    SoundUnavailable {
        reason: String,
    },
    PerformanceScore {
        accuracy: f64,
    },
}
