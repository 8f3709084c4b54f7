use crate::bindings::BindingSlots;
use bardic_domain_track::{MidiTrack, Note, TempoMap, TrackTransformer};
use bardic_ports::settings::AssistSettings;
use bardic_ports::types::TimeUs;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MAX_GRID_LINES: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewerOptions {
    pub ahead_us: TimeUs,
    pub behind_us: TimeUs,
    pub show_grid_lines: bool,
    pub show_bindings: bool,
    pub max_bindings_to_show: usize,
    pub binding_lanes: usize,
}

impl ViewerOptions {
    pub fn from_settings(settings: &AssistSettings) -> Self {
        Self {
            ahead_us: settings.view_ahead_ms as TimeUs * 1000,
            behind_us: settings.view_behind_ms as TimeUs * 1000,
            show_grid_lines: settings.show_bar_lines,
            show_bindings: settings.show_bindings,
            max_bindings_to_show: settings.max_bindings_to_show,
            binding_lanes: settings.lanes(),
        }
    }
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self::from_settings(&AssistSettings::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewNote {
    pub index: usize,
    pub note: Note,
    pub start_us: TimeUs,
    pub end_us: TimeUs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub index: usize,
    pub pitch: u8,
    pub start_us: TimeUs,
    pub end_us: TimeUs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridLineKind {
    Bar,
    Beat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLine {
    pub time_us: TimeUs,
    pub kind: GridLineKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShownBinding {
    pub slot: usize,
    pub pitch: u8,
    /// Start of the nearest upcoming note with this pitch.
    pub start_us: TimeUs,
}

/// Sliding time window over a cleaned track.
///
/// The note cache is built once; `set_time_us` is the only mutator and
/// recomputes everything shown from the cursor.
pub struct TrackViewer {
    notes: Arc<[ViewNote]>,
    tempo: TempoMap,
    options: ViewerOptions,
    time_us: TimeUs,
    range_start: TimeUs,
    range_end: TimeUs,
    shown_notes: Vec<usize>,
    shown_lines: Vec<GridLine>,
    shown_bindings: Vec<ShownBinding>,
    slots: BindingSlots,
    now_playing: Option<NowPlaying>,
    last_notified_start: Option<TimeUs>,
}

impl TrackViewer {
    pub fn new(track: &MidiTrack, tempo: TempoMap, options: ViewerOptions) -> Self {
        let mut notes: Vec<ViewNote> = track
            .notes
            .iter()
            .map(|note| ViewNote {
                index: 0,
                note: *note,
                start_us: tempo.tick_to_micros(note.start_tick),
                end_us: tempo.tick_to_micros(note.end_tick()),
            })
            .collect();
        notes.sort_by_key(|n| (n.start_us, n.note.pitch));
        for (index, note) in notes.iter_mut().enumerate() {
            note.index = index;
        }

        Self {
            notes: notes.into(),
            tempo,
            options,
            time_us: 0,
            range_start: 0,
            range_end: 0,
            shown_notes: Vec::new(),
            shown_lines: Vec::new(),
            shown_bindings: Vec::new(),
            slots: BindingSlots::new(options.binding_lanes),
            now_playing: None,
            last_notified_start: None,
        }
    }

    pub fn from_transformer(transformer: &TrackTransformer, options: ViewerOptions) -> Self {
        Self::new(transformer.cleaned(), transformer.tempo_map().clone(), options)
    }

    /// Moves the window. Returns the note that just became "now playing",
    /// once per distinct note start.
    pub fn set_time_us(&mut self, time_us: TimeUs) -> Option<NowPlaying> {
        self.time_us = time_us;
        self.range_start = time_us - self.options.behind_us;
        self.range_end = time_us + self.options.ahead_us;

        self.shown_notes.clear();
        self.now_playing = None;
        for note in self.notes.iter() {
            if note.start_us >= self.range_end {
                break;
            }
            if note.end_us < self.range_start {
                continue;
            }
            self.shown_notes.push(note.index);
            if self.now_playing.is_none() && note.start_us <= time_us && time_us < note.end_us {
                self.now_playing = Some(NowPlaying {
                    index: note.index,
                    pitch: note.note.pitch,
                    start_us: note.start_us,
                    end_us: note.end_us,
                });
            }
        }

        self.shown_lines = if self.options.show_grid_lines {
            self.grid_lines(self.range_start, self.range_end)
        } else {
            Vec::new()
        };

        self.shown_bindings = if self.options.show_bindings {
            self.update_bindings(time_us)
        } else {
            Vec::new()
        };

        let playing = self.now_playing?;
        if self.last_notified_start == Some(playing.start_us) {
            return None;
        }
        self.last_notified_start = Some(playing.start_us);
        Some(playing)
    }

    /// Lets the same note notify again after a stop/start cycle.
    pub fn reset_notification(&mut self) {
        self.last_notified_start = None;
        self.slots.clear();
    }

    pub fn time_us(&self) -> TimeUs {
        self.time_us
    }

    pub fn range(&self) -> (TimeUs, TimeUs) {
        (self.range_start, self.range_end)
    }

    pub fn notes(&self) -> &[ViewNote] {
        &self.notes
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo
    }

    pub fn shown_notes(&self) -> impl Iterator<Item = &ViewNote> + '_ {
        self.shown_notes.iter().map(|idx| &self.notes[*idx])
    }

    pub fn shown_lines(&self) -> &[GridLine] {
        &self.shown_lines
    }

    pub fn shown_bindings(&self) -> &[ShownBinding] {
        &self.shown_bindings
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        self.now_playing
    }

    pub fn note_after(&self, index: usize) -> Option<&ViewNote> {
        self.notes.get(index + 1)
    }

    /// First note that has not ended by `time_us`.
    pub fn next_note_from(&self, time_us: TimeUs) -> Option<&ViewNote> {
        self.notes.iter().find(|n| n.end_us > time_us)
    }

    fn update_bindings(&mut self, time_us: TimeUs) -> Vec<ShownBinding> {
        let mut upcoming: Vec<(u8, TimeUs)> = Vec::new();
        for note in self.notes.iter().filter(|n| n.end_us > time_us) {
            if upcoming.len() >= self.options.max_bindings_to_show {
                break;
            }
            if !upcoming.iter().any(|(pitch, _)| *pitch == note.note.pitch) {
                upcoming.push((note.note.pitch, note.start_us));
            }
        }

        let pitches: Vec<u8> = upcoming.iter().map(|(pitch, _)| *pitch).collect();
        self.slots
            .assign(&pitches)
            .into_iter()
            .filter_map(|assignment| {
                let (_, start_us) = upcoming.iter().find(|(p, _)| *p == assignment.pitch)?;
                Some(ShownBinding {
                    slot: assignment.slot,
                    pitch: assignment.pitch,
                    start_us: *start_us,
                })
            })
            .collect()
    }

    fn grid_lines(&self, start: TimeUs, end: TimeUs) -> Vec<GridLine> {
        let mut lines = Vec::new();

        if start < 0 {
            // Ticks can't go below zero: walk back from zero with the meter
            // and beat length found there.
            let beats_per_bar = self.tempo.time_signature_at(0).numerator.max(1) as i64;
            let beat_us = self.tempo.tick_to_micros(self.tempo.beat_ticks_at(0));
            if beat_us > 0 {
                let mut before_zero = Vec::new();
                let mut k = 1i64;
                while -k * beat_us >= start && before_zero.len() < MAX_GRID_LINES {
                    let time_us = -k * beat_us;
                    if time_us <= end {
                        let kind = if k % beats_per_bar == 0 {
                            GridLineKind::Bar
                        } else {
                            GridLineKind::Beat
                        };
                        before_zero.push(GridLine { time_us, kind });
                    }
                    k += 1;
                }
                before_zero.reverse();
                lines.extend(before_zero);
            }
        }

        if end < 0 {
            return lines;
        }

        let from = start.max(0);
        let mut tick = self.tempo.micros_to_tick(from);
        if self.tempo.tick_to_bar_beat(tick).tick_in_beat != 0 {
            tick = self.tempo.next_beat_tick(tick);
        }
        if self.tempo.tick_to_micros(tick) < from {
            tick = self.tempo.next_beat_tick(tick);
        }

        while lines.len() < MAX_GRID_LINES {
            let time_us = self.tempo.tick_to_micros(tick);
            if time_us > end {
                break;
            }
            let kind = if self.tempo.tick_to_bar_beat(tick).beat == 0 {
                GridLineKind::Bar
            } else {
                GridLineKind::Beat
            };
            lines.push(GridLine { time_us, kind });
            tick = self.tempo.next_beat_tick(tick);
        }

        lines
    }
}
