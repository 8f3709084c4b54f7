use crate::model::{sort_notes, MidiTrack, Note, TempoPoint};
use crate::stats::{is_octave_range_valid, Section, TrackStats};
use crate::tempo_map::{us_to_ticks, TempoMap};
use bardic_ports::settings::AssistSettings;
use bardic_ports::types::{Tick, BASIC_OCTAVE_RANGE, EXTENDED_OCTAVE_RANGE};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Notes below this pitch are dropped; 0 or less disables the filter.
    pub low_note_floor: i32,
    pub min_note_duration_ms: u32,
    pub tempo_sample_bars: u32,
}

impl TransformOptions {
    pub fn from_settings(settings: &AssistSettings) -> Self {
        Self {
            low_note_floor: settings.low_note_floor,
            min_note_duration_ms: settings.min_note_duration_ms,
            tempo_sample_bars: settings.tempo_sample_bars,
        }
    }
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self::from_settings(&AssistSettings::default())
    }
}

/// What the cleanup pipeline did to the source notes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformReport {
    pub source_notes: usize,
    pub low_notes_removed: usize,
    pub short_notes_removed: usize,
    pub removed_duration_median_ticks: Option<Tick>,
    pub removed_duration_median_ms: Option<f64>,
    pub chord_notes_removed: usize,
    pub overlaps_shortened: usize,
    pub overlaps_removed: usize,
    pub short_notes_removed_after_overlap: usize,
    pub min_duration_ticks: Tick,
    pub source_tempo_events: usize,
    pub unified_bpm: Option<u32>,
    pub output_notes: usize,
}

/// Runs the fixed cleanup pipeline once over `original`.
///
/// Each stage runs exactly once; a later stage may leave work an earlier
/// stage would have done (e.g. a note left short by chord removal is not
/// re-filtered by the low-pitch stage).
pub fn transform_track(original: &MidiTrack, options: &TransformOptions) -> (MidiTrack, TransformReport) {
    let mut track = original.clone();
    track.sort_notes();

    let source_tempo = TempoMap::new(
        original.ppq,
        original.tempo_map.clone(),
        original.time_signatures.clone(),
    );
    let min_ticks = us_to_ticks(
        options.min_note_duration_ms as i64 * 1000,
        source_tempo.us_per_quarter_at(0),
        original.ppq.max(1),
    );

    let mut report = TransformReport {
        source_notes: track.notes.len(),
        min_duration_ticks: min_ticks,
        source_tempo_events: original.tempo_map.len(),
        ..TransformReport::default()
    };

    report.low_notes_removed = filter_low_notes(&mut track.notes, options.low_note_floor);

    let mut removed_durations = Vec::new();
    report.short_notes_removed =
        filter_short_notes(&mut track.notes, min_ticks, Some(&mut removed_durations));
    report.removed_duration_median_ticks = median(&mut removed_durations);
    report.removed_duration_median_ms = report
        .removed_duration_median_ticks
        .map(|ticks| source_tempo.tick_to_micros(ticks) as f64 / 1000.0);

    report.chord_notes_removed = simplify_chords(&mut track.notes);

    let (shortened, removed) = resolve_overlaps(&mut track.notes, min_ticks);
    report.overlaps_shortened = shortened;
    report.overlaps_removed = removed;

    report.short_notes_removed_after_overlap = filter_short_notes(&mut track.notes, min_ticks, None);

    report.unified_bpm = unify_tempo(&mut track, options.tempo_sample_bars);
    report.output_notes = track.notes.len();

    tracing::debug!(
        track = %track.name,
        source_notes = report.source_notes,
        output_notes = report.output_notes,
        low = report.low_notes_removed,
        short = report.short_notes_removed,
        chords = report.chord_notes_removed,
        shortened = report.overlaps_shortened,
        overlap_removed = report.overlaps_removed,
        unified_bpm = ?report.unified_bpm,
        "transformed track"
    );

    (track, report)
}

pub fn filter_low_notes(notes: &mut Vec<Note>, floor: i32) -> usize {
    if floor <= 0 {
        return 0;
    }
    let before = notes.len();
    notes.retain(|n| n.pitch as i32 >= floor);
    before - notes.len()
}

pub fn filter_short_notes(
    notes: &mut Vec<Note>,
    min_ticks: Tick,
    mut removed: Option<&mut Vec<Tick>>,
) -> usize {
    let before = notes.len();
    notes.retain(|n| {
        let keep = n.duration_ticks >= min_ticks;
        if !keep {
            if let Some(out) = removed.as_mut() {
                out.push(n.duration_ticks);
            }
        }
        keep
    });
    before - notes.len()
}

/// Keeps only the highest note of every group sharing a start tick.
/// `notes` must be sorted by start, then pitch.
pub fn simplify_chords(notes: &mut Vec<Note>) -> usize {
    let before = notes.len();
    let mut out: Vec<Note> = Vec::with_capacity(notes.len());
    for note in notes.drain(..) {
        match out.last_mut() {
            Some(last) if last.start_tick == note.start_tick => *last = note,
            _ => out.push(note),
        }
    }
    *notes = out;
    before - notes.len()
}

/// Makes the sequence monophonic. A note overlapping the next one is cut to
/// end where the next begins, unless that would leave it shorter than
/// `min_ticks` while it is the higher of the two: then the next note goes.
pub fn resolve_overlaps(notes: &mut Vec<Note>, min_ticks: Tick) -> (usize, usize) {
    let mut shortened = 0;
    let mut removed = 0;
    let mut out: Vec<Note> = Vec::with_capacity(notes.len());
    for note in notes.drain(..) {
        if let Some(prev) = out.last_mut() {
            if note.start_tick < prev.end_tick() {
                let cut = note.start_tick - prev.start_tick;
                if cut < min_ticks && prev.pitch > note.pitch {
                    removed += 1;
                    continue;
                }
                prev.duration_ticks = cut;
                shortened += 1;
            }
        }
        out.push(note);
    }
    *notes = out;
    (shortened, removed)
}

/// Replaces a multi-tempo map with one constant tempo averaged over up to
/// `sample_bars` bars of a single time signature, starting at the first note.
pub fn unify_tempo(track: &mut MidiTrack, sample_bars: u32) -> Option<u32> {
    if track.tempo_map.len() <= 1 {
        return None;
    }

    let map = TempoMap::new(track.ppq, track.tempo_map.clone(), track.time_signatures.clone());
    let first_tick = track.notes.first().map_or(0, |n| n.start_tick.max(0));
    let end_tick = track.end_tick();
    let start_bar = map.bar_of_tick(first_tick);
    let last_bar = if end_tick > 0 {
        map.bar_of_tick(end_tick - 1)
    } else {
        start_bar
    };
    let signature = map.time_signature_at(map.bar_to_tick(start_bar));

    let mut end_bar = start_bar;
    while end_bar - start_bar < sample_bars.max(1) as i64 && end_bar <= last_bar {
        if map.time_signature_at(map.bar_to_tick(end_bar)) != signature {
            break;
        }
        end_bar += 1;
    }

    let window_start = map.bar_to_tick(start_bar);
    let window_end = map.bar_to_tick(end_bar);
    if window_end <= window_start {
        return None;
    }

    let quarters = (window_end - window_start) as f64 / map.ppq() as f64;
    let window_us = (map.tick_to_micros(window_end) - map.tick_to_micros(window_start)) as f64;
    let bpm = (60_000_000.0 / (window_us / quarters)).round().max(1.0) as u32;

    track.tempo_map = vec![TempoPoint {
        tick: 0,
        us_per_quarter: (60_000_000.0 / bpm as f64).round() as u32,
    }];
    Some(bpm)
}

fn median(values: &mut [Tick]) -> Option<Tick> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2)
    } else {
        Some(values[mid])
    }
}

/// Owns an untouched source track and the cleaned copy derived from it.
#[derive(Clone, Debug)]
pub struct TrackTransformer {
    original: MidiTrack,
    options: TransformOptions,
    cleaned: MidiTrack,
    tempo: TempoMap,
    report: TransformReport,
    section: Section,
    transpose: i32,
    stats: TrackStats,
}

impl TrackTransformer {
    pub fn new(original: MidiTrack, options: TransformOptions) -> Self {
        let (cleaned, report) = transform_track(&original, &options);
        let tempo = tempo_map_of(&cleaned);
        let stats = TrackStats::compute(&cleaned.notes, &tempo, Section::whole());
        Self {
            original,
            options,
            cleaned,
            tempo,
            report,
            section: Section::whole(),
            transpose: 0,
            stats,
        }
    }

    /// Re-runs the pipeline from the original with new options. Section and
    /// transposition are re-applied when they still fit.
    pub fn set_options(&mut self, options: TransformOptions) {
        let (cleaned, report) = transform_track(&self.original, &options);
        self.options = options;
        self.cleaned = cleaned;
        self.report = report;
        self.tempo = tempo_map_of(&self.cleaned);

        let transpose = std::mem::take(&mut self.transpose);
        self.refresh_stats();
        if transpose != 0 && !self.try_transpose_notes(transpose, true) {
            tracing::warn!(transpose, "dropping transposition that no longer fits");
        }
    }

    pub fn original(&self) -> &MidiTrack {
        &self.original
    }

    pub fn cleaned(&self) -> &MidiTrack {
        &self.cleaned
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo
    }

    pub fn report(&self) -> &TransformReport {
        &self.report
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    pub fn stats(&self) -> &TrackStats {
        &self.stats
    }

    pub fn section(&self) -> Section {
        self.section
    }

    pub fn transpose_offset(&self) -> i32 {
        self.transpose
    }

    /// Restricts stats (and playback) to whole bars without touching notes.
    pub fn set_section(&mut self, start_bar: Option<i64>, end_bar: Option<i64>) {
        self.section = Section { start_bar, end_bar };
        self.refresh_stats();
    }

    pub fn try_transpose_notes(&mut self, delta: i32, use_extended_range: bool) -> bool {
        if delta == 0 {
            return true;
        }
        let Some(lowest) = self.cleaned.notes.iter().map(|n| n.pitch).min() else {
            return false;
        };
        let highest = self.cleaned.notes.iter().map(|n| n.pitch).max().unwrap_or(lowest);
        if lowest as i32 + delta < 0 || highest as i32 + delta > 127 {
            return false;
        }

        let range = if use_extended_range {
            EXTENDED_OCTAVE_RANGE
        } else {
            BASIC_OCTAVE_RANGE
        };
        if let (Some(min), Some(max)) = (self.stats.min_note, self.stats.max_note) {
            let (was_valid, _) = is_octave_range_valid(min, max, range);
            let (now_valid, _) = is_octave_range_valid(
                (min as i32 + delta) as u8,
                (max as i32 + delta) as u8,
                range,
            );
            if was_valid && !now_valid {
                return false;
            }
        }

        for note in &mut self.cleaned.notes {
            note.pitch = (note.pitch as i32 + delta) as u8;
        }
        self.transpose += delta;
        self.refresh_stats();
        true
    }

    /// Bar of the last note, scanning from the section start, for which the
    /// range of all notes so far still fits `octave_range`.
    pub fn find_valid_end_bar(&self, octave_range: u32) -> Option<i64> {
        let start_tick = self.section_start_tick();
        let mut min = u8::MAX;
        let mut max = u8::MIN;
        let mut last_valid = None;
        for note in self.cleaned.notes.iter().filter(|n| n.end_tick() > start_tick) {
            min = min.min(note.pitch);
            max = max.max(note.pitch);
            if !is_octave_range_valid(min, max, octave_range).0 {
                break;
            }
            last_valid = Some(self.tempo.bar_of_tick(note.start_tick.max(0)));
        }
        last_valid
    }

    /// A section end that keeps the track playable in `octave_range`, or
    /// `None` when the current section already is (or no cut helps).
    pub fn propose_valid_end_bar(&self, octave_range: u32) -> Option<i64> {
        if self
            .stats
            .octave_range_check(octave_range)
            .is_some_and(|(valid, _)| valid)
        {
            return None;
        }
        let last_bar = self.find_valid_end_bar(octave_range)?;
        let start_bar = self.section.start_bar;
        for end_bar in [last_bar + 1, last_bar] {
            let candidate = Section {
                start_bar,
                end_bar: Some(end_bar),
            };
            let stats = TrackStats::compute(&self.cleaned.notes, &self.tempo, candidate);
            if stats
                .octave_range_check(octave_range)
                .is_some_and(|(valid, _)| valid)
            {
                return Some(end_bar);
            }
        }
        None
    }

    fn section_start_tick(&self) -> Tick {
        match self.section.start_bar {
            Some(bar) => self.tempo.bar_to_tick(bar.max(0)),
            None => i64::MIN,
        }
    }

    fn refresh_stats(&mut self) {
        self.stats.update(&self.cleaned.notes, &self.tempo, self.section);
    }
}

fn tempo_map_of(track: &MidiTrack) -> TempoMap {
    TempoMap::new(track.ppq, track.tempo_map.clone(), track.time_signatures.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, start_tick: Tick, duration_ticks: Tick) -> Note {
        Note {
            pitch,
            velocity: 100,
            channel: 0,
            start_tick,
            duration_ticks,
        }
    }

    #[test]
    fn median_of_even_count_averages_middle() {
        assert_eq!(median(&mut [40, 10, 30, 20]), Some(25));
        assert_eq!(median(&mut [7]), Some(7));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn low_floor_of_zero_keeps_everything() {
        let mut notes = vec![note(10, 0, 100), note(70, 100, 100)];
        assert_eq!(filter_low_notes(&mut notes, 0), 0);
        assert_eq!(filter_low_notes(&mut notes, 20), 1);
        assert_eq!(notes[0].pitch, 70);
    }

    #[test]
    fn overlap_deletes_next_only_when_previous_is_higher_and_cut_too_short() {
        let mut notes = vec![note(72, 0, 1000), note(60, 10, 500)];
        assert_eq!(resolve_overlaps(&mut notes, 50), (0, 1));
        assert_eq!(notes, vec![note(72, 0, 1000)]);

        let mut notes = vec![note(60, 0, 1000), note(72, 10, 500)];
        assert_eq!(resolve_overlaps(&mut notes, 50), (1, 0));
        assert_eq!(notes[0].duration_ticks, 10);
    }
}
