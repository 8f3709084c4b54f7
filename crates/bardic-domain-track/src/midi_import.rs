use crate::model::{
    sort_notes, MidiTrack, Note, TempoPoint, TimeSignature, TimeSignaturePoint,
};
use bardic_ports::types::Tick;
use midly::{Fps, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum MidiImportError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("track {0} not found")]
    TrackNotFound(usize),
}

#[derive(Clone, Debug)]
pub struct ImportedTrack {
    pub index: usize,
    pub name: Option<String>,
    pub notes: Vec<Note>,
}

/// A parsed file: per-track notes plus the global tempo and meter maps.
#[derive(Clone, Debug)]
pub struct ImportedMidi {
    pub ppq: u16,
    pub tempo_map: Vec<TempoPoint>,
    pub time_signatures: Vec<TimeSignaturePoint>,
    pub tracks: Vec<ImportedTrack>,
}

impl ImportedMidi {
    pub fn track(&self, index: usize) -> Result<MidiTrack, MidiImportError> {
        let source = self
            .tracks
            .iter()
            .find(|t| t.index == index)
            .ok_or(MidiImportError::TrackNotFound(index))?;
        let name = source
            .name
            .clone()
            .unwrap_or_else(|| format!("Track {}", index + 1));
        Ok(self.build_track(name, source.notes.clone()))
    }

    /// All tracks folded into one.
    pub fn merged(&self) -> MidiTrack {
        let notes = self
            .tracks
            .iter()
            .flat_map(|t| t.notes.iter().copied())
            .collect();
        self.build_track("Merged".to_string(), notes)
    }

    /// Tracks that carry at least one note.
    pub fn playable_tracks(&self) -> impl Iterator<Item = &ImportedTrack> {
        self.tracks.iter().filter(|t| !t.notes.is_empty())
    }

    fn build_track(&self, name: String, notes: Vec<Note>) -> MidiTrack {
        let mut track = MidiTrack {
            name,
            ppq: self.ppq,
            tempo_map: self.tempo_map.clone(),
            time_signatures: self.time_signatures.clone(),
            notes,
        };
        track.sort_notes();
        track
    }
}

pub fn import_midi_path(path: &Path) -> Result<ImportedMidi, MidiImportError> {
    let data = std::fs::read(path).map_err(|e| MidiImportError::Io(e.to_string()))?;
    import_midi_bytes(&data)
}

pub fn import_midi_bytes(data: &[u8]) -> Result<ImportedMidi, MidiImportError> {
    let smf = Smf::parse(data).map_err(|e| MidiImportError::Parse(e.to_string()))?;
    let (ppq, tempo_override) = match smf.header.timing {
        Timing::Metrical(ticks) => (ticks.as_int(), None),
        Timing::Timecode(fps, ticks_per_frame) => {
            let (ppq, us_per_quarter) = timecode_ppq_and_tempo(fps, ticks_per_frame);
            (ppq, Some(us_per_quarter))
        }
    };
    let ppq = ppq.max(1);

    let mut tempo_points: BTreeMap<Tick, u32> = BTreeMap::new();
    let mut signature_points: BTreeMap<Tick, TimeSignature> = BTreeMap::new();
    let mut tracks = Vec::with_capacity(smf.tracks.len());

    for (index, track) in smf.tracks.iter().enumerate() {
        let mut tick: Tick = 0;
        let mut name: Option<String> = None;
        let mut pairing = NotePairing::default();

        for event in track {
            tick += event.delta.as_int() as Tick;
            match &event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } => {
                            if vel.as_int() == 0 {
                                pairing.note_off(channel, key.as_int(), tick);
                            } else {
                                pairing.note_on(channel, key.as_int(), vel.as_int(), tick);
                            }
                        }
                        MidiMessage::NoteOff { key, .. } => {
                            pairing.note_off(channel, key.as_int(), tick);
                        }
                        _ => {}
                    }
                }
                TrackEventKind::Meta(MetaMessage::Tempo(us_per_quarter)) => {
                    tempo_points.insert(tick, us_per_quarter.as_int());
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denom_power, _, _)) => {
                    signature_points.insert(
                        tick,
                        TimeSignature {
                            numerator: *numerator,
                            denominator: 1u8.checked_shl(*denom_power as u32).unwrap_or(4),
                        },
                    );
                }
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
                    if name.is_none() {
                        let text = String::from_utf8_lossy(raw).trim().to_string();
                        if !text.is_empty() {
                            name = Some(text);
                        }
                    }
                }
                _ => {}
            }
        }

        let mut notes = pairing.finish(tick, ppq as Tick);
        sort_notes(&mut notes);
        tracks.push(ImportedTrack { index, name, notes });
    }

    tracing::debug!(
        tracks = tracks.len(),
        tempo_events = tempo_points.len(),
        time_signatures = signature_points.len(),
        ppq,
        "parsed midi file"
    );

    Ok(ImportedMidi {
        ppq,
        tempo_map: build_tempo_map(tempo_points, tempo_override),
        time_signatures: build_signature_map(signature_points),
        tracks,
    })
}

/// Turns on/off events into notes, one voice per (channel, key).
#[derive(Default)]
struct NotePairing {
    active: HashMap<(u8, u8), (Tick, u8)>,
    notes: Vec<Note>,
}

impl NotePairing {
    fn note_on(&mut self, channel: u8, key: u8, velocity: u8, tick: Tick) {
        // Re-striking a sounding key ends the previous note there.
        self.note_off(channel, key, tick);
        self.active.insert((channel, key), (tick, velocity));
    }

    fn note_off(&mut self, channel: u8, key: u8, tick: Tick) {
        if let Some((start_tick, velocity)) = self.active.remove(&(channel, key)) {
            self.notes.push(Note {
                pitch: key,
                velocity,
                channel,
                start_tick,
                duration_ticks: tick - start_tick,
            });
        }
    }

    fn finish(mut self, last_tick: Tick, default_len: Tick) -> Vec<Note> {
        let end_tick = last_tick.saturating_add(default_len.max(1));
        let mut dangling: Vec<_> = self.active.drain().collect();
        dangling.sort_by_key(|((channel, key), _)| (*channel, *key));
        for ((channel, key), (start_tick, velocity)) in dangling {
            self.notes.push(Note {
                pitch: key,
                velocity,
                channel,
                start_tick,
                duration_ticks: end_tick - start_tick,
            });
        }
        self.notes
    }
}

fn build_tempo_map(
    tempo_points: BTreeMap<Tick, u32>,
    override_us_per_quarter: Option<u32>,
) -> Vec<TempoPoint> {
    if let Some(us_per_quarter) = override_us_per_quarter {
        return vec![TempoPoint {
            tick: 0,
            us_per_quarter,
        }];
    }

    let mut map: Vec<TempoPoint> = tempo_points
        .into_iter()
        .map(|(tick, us_per_quarter)| TempoPoint {
            tick,
            us_per_quarter,
        })
        .collect();

    if map.is_empty() || map[0].tick != 0 {
        map.insert(
            0,
            TempoPoint {
                tick: 0,
                us_per_quarter: 500_000,
            },
        );
    }

    map
}

fn build_signature_map(points: BTreeMap<Tick, TimeSignature>) -> Vec<TimeSignaturePoint> {
    let mut map: Vec<TimeSignaturePoint> = points
        .into_iter()
        .map(|(tick, signature)| TimeSignaturePoint { tick, signature })
        .collect();
    if map.is_empty() || map[0].tick != 0 {
        map.insert(
            0,
            TimeSignaturePoint {
                tick: 0,
                signature: TimeSignature::default(),
            },
        );
    }
    map
}

fn timecode_ppq_and_tempo(fps: Fps, ticks_per_frame: u8) -> (u16, u32) {
    let ticks_per_frame = ticks_per_frame.max(1) as u16;
    match fps {
        Fps::Fps24 => (24 * ticks_per_frame, 1_000_000),
        Fps::Fps25 => (25 * ticks_per_frame, 1_000_000),
        Fps::Fps30 => (30 * ticks_per_frame, 1_000_000),
        Fps::Fps29 => (30 * ticks_per_frame, 1_001_000),
    }
}
