use crate::model::{octave_of, Note, TimeSignature};
use crate::tempo_map::TempoMap;
use bardic_ports::types::{Tick, BASIC_OCTAVE_RANGE, EXTENDED_OCTAVE_RANGE};
use serde::{Deserialize, Serialize};

/// Bar-aligned sub-range of a track. `end_bar` is exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub start_bar: Option<i64>,
    pub end_bar: Option<i64>,
}

impl Section {
    pub fn whole() -> Self {
        Self::default()
    }

    pub fn is_whole(&self) -> bool {
        self.start_bar.is_none() && self.end_bar.is_none()
    }
}

/// Checks whether `[min, max]` fits on an instrument with `octave_range`
/// octaves plus one extra top C. Returns the octave the layout centers on.
pub fn is_octave_range_valid(min: u8, max: u8, octave_range: u32) -> (bool, i32) {
    let min_octave = octave_of(min);
    let max_octave = octave_of(max);
    let span = max_octave - min_octave;
    let range = octave_range as i32;
    let valid = span < range || (span == range && max % 12 == 0);
    (valid, min_octave + span / 2)
}

/// Descriptive statistics of the active part of a track.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackStats {
    pub min_note: Option<u8>,
    pub max_note: Option<u8>,
    pub note_count: usize,
    pub notes_per_beat: usize,
    pub beats_per_minute: f64,
    pub time_signature: TimeSignature,
    pub num_time_signatures: usize,
    pub num_bars: i64,
    pub num_bars_total: i64,
    pub start_bar: i64,
    pub start_tick: Tick,
    pub end_tick: Tick,
}

impl TrackStats {
    pub fn compute(notes: &[Note], tempo: &TempoMap, section: Section) -> Self {
        let mut stats = Self::default();
        stats.update(notes, tempo, section);
        stats
    }

    /// Recomputes every field from scratch. `notes` must be sorted by start.
    pub fn update(&mut self, notes: &[Note], tempo: &TempoMap, section: Section) {
        *self = Self::default();

        let Some(first) = notes.first() else {
            return;
        };
        let track_end = notes.iter().map(Note::end_tick).max().unwrap_or(0);
        self.num_bars_total = if track_end > 0 {
            tempo.bar_of_tick(track_end - 1) + 1
        } else {
            0
        };

        let first_bar = tempo.bar_of_tick(first.start_tick.max(0));
        let start_bar = section.start_bar.unwrap_or(first_bar).max(0);
        let start_tick = tempo.bar_to_tick(start_bar);
        let end_tick = match section.end_bar {
            Some(bar) => tempo.bar_to_tick(bar).min(track_end),
            None => track_end,
        };
        if start_tick >= end_tick {
            return;
        }

        self.start_bar = start_bar;
        self.start_tick = start_tick;
        self.end_tick = end_tick;
        self.num_bars = tempo.bar_of_tick(end_tick - 1) - start_bar + 1;
        self.beats_per_minute = tempo.bpm_at(start_tick);
        self.time_signature = tempo.time_signature_at(start_tick);
        self.num_time_signatures = tempo.time_signatures_between(start_tick, end_tick).len();

        let active: Vec<&Note> = notes
            .iter()
            .filter(|n| n.overlaps(start_tick, end_tick))
            .collect();
        self.note_count = active.len();
        self.min_note = active.iter().map(|n| n.pitch).min();
        self.max_note = active.iter().map(|n| n.pitch).max();
        self.notes_per_beat = notes_per_beat(&active, tempo, start_tick, end_tick);
    }

    pub fn is_valid(&self) -> bool {
        self.start_tick < self.end_tick
    }

    pub fn octave_range_check(&self, octave_range: u32) -> Option<(bool, i32)> {
        match (self.min_note, self.max_note) {
            (Some(min), Some(max)) if self.is_valid() => {
                Some(is_octave_range_valid(min, max, octave_range))
            }
            _ => None,
        }
    }

    pub fn is_valid_basic_mode(&self) -> bool {
        self.octave_range_check(BASIC_OCTAVE_RANGE)
            .is_some_and(|(valid, _)| valid)
    }

    pub fn is_valid_extended_mode(&self) -> bool {
        self.octave_range_check(EXTENDED_OCTAVE_RANGE)
            .is_some_and(|(valid, _)| valid)
    }

    pub fn mid_octave(&self, octave_range: u32) -> Option<i32> {
        self.octave_range_check(octave_range).map(|(_, mid)| mid)
    }

    pub fn notes_per_second(&self) -> f64 {
        self.notes_per_beat as f64 * self.beats_per_minute / 60.0
    }
}

fn notes_per_beat(notes: &[&Note], tempo: &TempoMap, start_tick: Tick, end_tick: Tick) -> usize {
    let mut boundaries = vec![start_tick];
    let mut tick = start_tick;
    while tick < end_tick {
        tick = tempo.next_beat_tick(tick);
        boundaries.push(tick);
    }

    if boundaries.len() < 2 {
        return notes.len();
    }

    let mut buckets = vec![0usize; boundaries.len()];
    for note in notes {
        let idx = boundaries
            .partition_point(|b| *b <= note.start_tick)
            .saturating_sub(1);
        buckets[idx] += 1;
    }
    buckets.into_iter().max().unwrap_or(0)
}
