use crate::clock::{ClockInputs, ClockSource, DriftCorrector, PlaybackClock};
use crate::context::AssistContext;
use crate::diagnostics::{
    export_diagnostics, ClockSnapshot, DiagnosticsError, DiagnosticsSnapshot, TrackSnapshot,
};
use crate::input::{note_press_channel, NotePressReceiver};
use crate::ipc::{AssistCommand, AssistEvent, AssistState};
use crate::viewer::{NowPlaying, TrackViewer, ViewerOptions};
use bardic_domain_eval::{ScoreConfig, ScoreEvent, ScoreTracker};
use bardic_domain_track::{
    import_midi_path, octave_of, MidiImportError, MidiTrack, TrackStats, TrackTransformer,
    TransformOptions,
};
use bardic_ports::metronome::MetronomeChange;
use bardic_ports::playback::{PlaybackScore, ScheduledNote, SoundTransport, TransportError};
use bardic_ports::settings::AssistSettings;
use bardic_ports::types::{
    NoteName, TimeUs, BASIC_OCTAVE_RANGE, EXTENDED_OCTAVE_RANGE, GAME_DEFAULT_MID_OCTAVE,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;

const PRESS_QUEUE_CAPACITY: usize = 256;
const RECENT_PRESS_LIMIT: usize = 20;

#[derive(thiserror::Error, Debug)]
pub enum AssistError {
    #[error("midi import failed: {0}")]
    Import(#[from] MidiImportError),
    #[error("sound transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("diagnostics error: {0}")]
    Diagnostics(#[from] DiagnosticsError),
}

/// Where a press was observed. One physical press usually shows up on both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PressPath {
    Signal,
    KeyState,
}

/// The last press that was scored or resumed playback, kept until the other
/// path reports the same key.
#[derive(Clone, Copy, Debug)]
struct CreditedPress {
    pitch: u8,
    path: PressPath,
    time_us: TimeUs,
}

/// A binding lane resolved to the key the player has to press.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BindingHint {
    pub slot: usize,
    /// Track pitch.
    pub pitch: u8,
    pub start_us: TimeUs,
    pub note: NoteName,
    /// Octave relative to the game's middle octave.
    pub octave_offset: i32,
    pub description: Option<String>,
}

/// Playback state machine driving the viewer, the clock and the scorer.
///
/// Everything happens inside `tick`, called once per rendered frame. Host
/// commands go in through the mutators or `handle_command`; notifications
/// come out of `drain_events` in emission order.
pub struct TrackAssistant {
    ctx: AssistContext,
    settings: AssistSettings,
    state: AssistState,
    transformer: Option<TrackTransformer>,
    viewer: Option<TrackViewer>,
    clock: PlaybackClock,
    drift: DriftCorrector,
    score: ScoreTracker,
    scoring_active: bool,
    transport: Option<Box<dyn SoundTransport>>,
    sound_started: bool,
    metronome_seen_playing: bool,
    press_rx: Option<NotePressReceiver>,
    last_press: Option<(u8, TimeUs)>,
    held_pitch: Option<u8>,
    credited_press: Option<CreditedPress>,
    paused_note: Option<NowPlaying>,
    target_bpm: Option<u32>,
    target_bpm_from_user: bool,
    time_scaling: f64,
    octave_shift: i32,
    section_start_us: TimeUs,
    section_end_us: TimeUs,
    events: VecDeque<AssistEvent>,
    recent_presses: VecDeque<u8>,
}

impl TrackAssistant {
    pub fn new(mut ctx: AssistContext, settings: AssistSettings) -> Self {
        let press_rx = match ctx.note_presses.as_mut() {
            Some(source) => {
                let (cb, rx) = note_press_channel(PRESS_QUEUE_CAPACITY);
                match source.subscribe(cb) {
                    Ok(()) => Some(rx),
                    Err(err) => {
                        tracing::warn!(%err, "note press signal unavailable");
                        None
                    }
                }
            }
            None => None,
        };

        let clock = PlaybackClock::new(1.0, settings.paused_timeout_ms as TimeUs * 1000);
        let score = ScoreTracker::new(score_config(&settings));

        Self {
            ctx,
            settings,
            state: AssistState::Stopped,
            transformer: None,
            viewer: None,
            clock,
            drift: DriftCorrector::default(),
            score,
            scoring_active: false,
            transport: None,
            sound_started: false,
            metronome_seen_playing: false,
            press_rx,
            last_press: None,
            held_pitch: None,
            credited_press: None,
            paused_note: None,
            target_bpm: None,
            target_bpm_from_user: false,
            time_scaling: 1.0,
            octave_shift: 0,
            section_start_us: 0,
            section_end_us: 0,
            events: VecDeque::new(),
            recent_presses: VecDeque::with_capacity(RECENT_PRESS_LIMIT),
        }
    }

    pub fn handle_command(&mut self, cmd: AssistCommand) -> Result<(), AssistError> {
        match cmd {
            AssistCommand::LoadMidi { path, track } => {
                self.load_midi_path(Path::new(&path), track)?;
            }
            AssistCommand::SetSection { start_bar, end_bar } => {
                self.set_track_section(start_bar, end_bar);
            }
            AssistCommand::SetTargetBpm { bpm } => {
                self.set_target_bpm(bpm);
            }
            AssistCommand::Transpose { delta } => {
                if !self.try_transpose(delta) {
                    tracing::info!(delta, "transposition rejected");
                }
            }
            AssistCommand::Start => {
                self.start();
            }
            AssistCommand::StartPreview => {
                self.start_preview();
            }
            AssistCommand::Stop => self.stop(),
            AssistCommand::ExportDiagnostics { path } => {
                self.export_diagnostics(Path::new(&path))?;
            }
        }
        Ok(())
    }

    pub fn drain_events(&mut self) -> Vec<AssistEvent> {
        self.events.drain(..).collect()
    }

    pub fn settings(&self) -> &AssistSettings {
        &self.settings
    }

    /// Stops playback and re-derives everything that depends on settings.
    pub fn set_settings(&mut self, settings: AssistSettings) {
        self.stop();
        let options = TransformOptions::from_settings(&settings);
        self.settings = settings;
        self.clock
            .set_paused_timeout_us(self.settings.paused_timeout_ms as TimeUs * 1000);
        self.score.set_config(score_config(&self.settings));
        if let Some(transformer) = self.transformer.as_mut() {
            if *transformer.options() != options {
                transformer.set_options(options);
            }
        }
        self.rebuild(false);
    }

    /// Imports a MIDI file. On failure the current track stays loaded.
    pub fn load_midi_path(&mut self, path: &Path, track: Option<usize>) -> Result<(), AssistError> {
        let imported = import_midi_path(path)?;
        let track = match track {
            Some(index) => imported.track(index)?,
            None => imported.merged(),
        };
        tracing::info!(path = %path.display(), notes = track.notes.len(), "midi loaded");
        self.set_track(track);
        Ok(())
    }

    pub fn set_track(&mut self, track: MidiTrack) {
        self.stop();
        let options = TransformOptions::from_settings(&self.settings);
        self.transformer = Some(TrackTransformer::new(track, options));
        self.target_bpm = None;
        self.target_bpm_from_user = false;
        self.rebuild(true);
    }

    /// Bars are zero-based; the end bar is exclusive. `None`/`None` selects
    /// the whole track.
    pub fn set_track_section(&mut self, start_bar: Option<i64>, end_bar: Option<i64>) {
        self.stop();
        let Some(transformer) = self.transformer.as_mut() else {
            return;
        };
        transformer.set_section(start_bar, end_bar);
        self.rebuild(end_bar.is_none());
    }

    /// `None` (or 0) returns to the track's own tempo, or to the automatic
    /// slow-down when that is enabled.
    pub fn set_target_bpm(&mut self, bpm: Option<u32>) {
        self.stop();
        self.target_bpm = bpm.filter(|bpm| *bpm > 0);
        self.target_bpm_from_user = self.target_bpm.is_some();
        self.rebuild(false);
    }

    pub fn try_transpose(&mut self, delta: i32) -> bool {
        self.stop();
        let use_extended = self.settings.extended_octaves_allowed;
        let Some(transformer) = self.transformer.as_mut() else {
            return false;
        };
        if !transformer.try_transpose_notes(delta, use_extended) {
            return false;
        }
        let offset = transformer.transpose_offset();
        self.events.push_back(AssistEvent::Transposed { offset });
        self.rebuild(false);
        true
    }

    pub fn start(&mut self) -> bool {
        self.start_in(AssistState::Playing)
    }

    pub fn start_preview(&mut self) -> bool {
        self.start_in(AssistState::PlayingPreview)
    }

    pub fn stop(&mut self) {
        self.stop_with(true);
    }

    /// Advances playback by one frame. Never fails: an error inside the
    /// frame stops playback.
    pub fn tick(&mut self, delta_seconds: f64) {
        if !self.state.is_running() {
            self.drain_idle_signals();
            return;
        }
        if let Err(err) = self.tick_inner(delta_seconds) {
            tracing::warn!(%err, "playback tick failed, stopping");
            self.stop();
        }
    }

    /// Synchronous entry for the live press signal. `game_pitch` is relative
    /// to the game's default octave window; 0 means released.
    pub fn on_note_pressed(&mut self, game_pitch: u8) {
        self.record_press(game_pitch);
        if game_pitch == 0 || !self.state.is_running() {
            return;
        }
        if let Some(pitch) = self.to_track_pitch(game_pitch) {
            self.register_press(pitch, PressPath::Signal);
        }
    }

    pub fn state(&self) -> AssistState {
        self.state
    }

    pub fn time_us(&self) -> TimeUs {
        self.clock.time_us()
    }

    pub fn clock_source(&self) -> ClockSource {
        self.clock.source()
    }

    pub fn time_scaling(&self) -> f64 {
        self.time_scaling
    }

    pub fn target_bpm(&self) -> Option<u32> {
        self.target_bpm
    }

    pub fn sync_error_us(&self) -> TimeUs {
        self.drift.sync_error_us()
    }

    pub fn transformer(&self) -> Option<&TrackTransformer> {
        self.transformer.as_ref()
    }

    pub fn stats(&self) -> Option<&TrackStats> {
        self.transformer.as_ref().map(TrackTransformer::stats)
    }

    pub fn viewer(&self) -> Option<&TrackViewer> {
        self.viewer.as_ref()
    }

    /// Section bounds in track microseconds, end exclusive.
    pub fn section_us(&self) -> (TimeUs, TimeUs) {
        (self.section_start_us, self.section_end_us)
    }

    /// Semitones added to a game-relative pitch to get a track pitch.
    pub fn octave_shift(&self) -> i32 {
        self.octave_shift
    }

    pub fn paused_note(&self) -> Option<NowPlaying> {
        self.paused_note
    }

    pub fn is_valid_basic_mode(&self) -> bool {
        self.stats().is_some_and(TrackStats::is_valid_basic_mode)
    }

    pub fn is_valid_extended_mode(&self) -> bool {
        self.stats().is_some_and(TrackStats::is_valid_extended_mode)
    }

    pub fn can_play(&self) -> bool {
        self.viewer.is_some()
            && self
                .stats()
                .is_some_and(|stats| stats.is_valid() && valid_for_mode(stats, &self.settings))
    }

    pub fn binding_hints(&self) -> Vec<BindingHint> {
        let Some(viewer) = self.viewer.as_ref() else {
            return Vec::new();
        };
        viewer
            .shown_bindings()
            .iter()
            .filter_map(|binding| {
                let game_pitch = u8::try_from(binding.pitch as i32 - self.octave_shift)
                    .ok()
                    .filter(|p| *p <= 127)?;
                let note = NoteName::from_pitch(game_pitch);
                let octave_offset = octave_of(game_pitch) - GAME_DEFAULT_MID_OCTAVE;
                let description = self
                    .ctx
                    .bindings
                    .as_ref()
                    .and_then(|source| source.describe(note, octave_offset));
                Some(BindingHint {
                    slot: binding.slot,
                    pitch: binding.pitch,
                    start_us: binding.start_us,
                    note,
                    octave_offset,
                    description,
                })
            })
            .collect()
    }

    pub fn export_diagnostics(&self, dir: &Path) -> Result<(), AssistError> {
        let midi_outputs = match self.ctx.sound_output.as_ref() {
            Some(port) => port.list_outputs()?,
            None => Vec::new(),
        };
        let track = self.transformer.as_ref().map(|transformer| TrackSnapshot {
            name: transformer.original().name.clone(),
            stats: transformer.stats().clone(),
            report: transformer.report().clone(),
            transpose: transformer.transpose_offset(),
            start_bar: transformer.section().start_bar,
            end_bar: transformer.section().end_bar,
        });
        let clock = ClockSnapshot {
            state: self.state,
            source: self.clock.source(),
            time_us: self.clock.time_us(),
            time_scaling: self.time_scaling,
            paused_us: self.clock.paused_us(),
            sync_error_us: self.drift.sync_error_us(),
            transport_speed: self.drift.speed(),
        };
        export_diagnostics(
            dir,
            DiagnosticsSnapshot {
                settings: &self.settings,
                track,
                clock,
                midi_outputs,
                recent_presses: self.recent_presses.iter().copied().collect(),
            },
        )?;
        Ok(())
    }

    fn start_in(&mut self, mode: AssistState) -> bool {
        if !self.can_play() {
            tracing::info!(?mode, "start refused, track is not playable");
            return false;
        }
        self.stop();

        self.paused_note = None;
        self.last_press = None;
        self.held_pitch = None;
        self.credited_press = None;
        self.metronome_seen_playing = false;
        self.drift.reset();
        if let Some(viewer) = self.viewer.as_mut() {
            viewer.reset_notification();
        }
        self.score.on_play_start();
        self.scoring_active = mode == AssistState::Playing && self.settings.score_performance;

        self.open_transport();
        self.sound_started = false;

        let warmup_us = self.settings.warmup_ms as TimeUs * 1000;
        self.clock.set_time_scaling(self.time_scaling);
        self.clock.reset(self.section_start_us - warmup_us);

        self.state = mode;
        tracing::info!(?mode, start_us = self.section_start_us, end_us = self.section_end_us, "playback started");
        self.events.push_back(AssistEvent::StateChanged { state: mode });
        self.tick(0.0);
        true
    }

    fn stop_with(&mut self, stop_metronome: bool) {
        if !self.state.is_running() {
            return;
        }
        if let Some(mut transport) = self.transport.take() {
            transport.stop();
        }
        self.sound_started = false;

        if stop_metronome && self.settings.metronome_link_enabled {
            if let Some(metronome) = self.ctx.metronome.as_mut() {
                if metronome.is_playing() {
                    metronome.stop();
                }
            }
        }

        if self.scoring_active {
            self.scoring_active = false;
            let end_us = self
                .clock
                .time_us()
                .clamp(self.section_start_us, self.section_end_us);
            let duration_us = end_us - self.section_start_us;
            if duration_us > 0 {
                if let Some(ScoreEvent::Finished { accuracy, .. }) =
                    self.score.finalize(end_us, duration_us)
                {
                    tracing::info!(accuracy, "performance scored");
                    self.events.push_back(AssistEvent::PerformanceScore { accuracy });
                }
            }
        }

        self.paused_note = None;
        self.state = AssistState::Stopped;
        tracing::info!(time_us = self.clock.time_us(), "playback stopped");
        self.events.push_back(AssistEvent::StateChanged {
            state: AssistState::Stopped,
        });
    }

    fn tick_inner(&mut self, delta_seconds: f64) -> Result<(), AssistError> {
        if self.poll_metronome() {
            tracing::info!("metronome stopped, stopping playback");
            self.stop_with(false);
            return Ok(());
        }

        if self.sound_started && self.transport.as_mut().is_some_and(|t| t.poll_finished()) {
            tracing::debug!("sound transport finished");
            self.stop();
            return Ok(());
        }

        self.lazy_start_sound()?;

        let metronome_elapsed_us = self.metronome_elapsed_us();
        let transport_us = match self.transport.as_ref() {
            Some(transport) if self.sound_started && transport.is_running() => {
                Some(transport.current_time_us())
            }
            _ => None,
        };
        self.clock.advance(
            delta_seconds,
            ClockInputs {
                transport_us,
                metronome_elapsed_us,
                paused_for_input: self.state == AssistState::PausedForInput,
                section_start_us: self.section_start_us,
            },
        );

        if let (Some(transport_us), Some(elapsed_us)) = (transport_us, metronome_elapsed_us) {
            let expected_us = self.clock.metronome_time_us(elapsed_us, self.section_start_us);
            if let Some(speed) = self.drift.correct(transport_us, expected_us) {
                tracing::trace!(speed, error_us = self.drift.sync_error_us(), "transport speed nudged");
                if let Some(transport) = self.transport.as_mut() {
                    transport.set_speed(speed);
                }
            }
        }

        // Stamped with this frame's time, same as the key state poll below.
        for pitch in self.drain_presses() {
            self.on_note_pressed(pitch);
        }

        let now = self.clock.time_us();
        let notified = self.viewer.as_mut().and_then(|viewer| viewer.set_time_us(now));
        if let Some(playing) = notified {
            self.on_now_playing(playing);
        }

        self.poll_key_state();

        if self.state == AssistState::PausedForInput && self.clock.paused_timed_out() {
            tracing::info!(paused_us = self.clock.paused_us(), "gave up waiting for input");
            self.stop();
        } else if self.state != AssistState::PausedForInput && now >= self.section_end_us {
            tracing::debug!(now, "reached track end");
            self.stop();
        }
        Ok(())
    }

    fn rebuild(&mut self, auto_end_bar: bool) {
        let Some(transformer) = self.transformer.as_mut() else {
            self.viewer = None;
            return;
        };

        if auto_end_bar && self.settings.auto_adjust_end_bar {
            if let Some(end_bar) = transformer.propose_valid_end_bar(self.settings.octave_range()) {
                let start_bar = transformer.section().start_bar;
                transformer.set_section(start_bar, Some(end_bar));
                tracing::info!(end_bar, "section shortened to fit the octave range");
                self.events.push_back(AssistEvent::SectionAdjusted {
                    start_bar,
                    end_bar: Some(end_bar),
                });
            }
        }

        let stats = transformer.stats().clone();
        if self.settings.auto_adjust_bpm && !self.target_bpm_from_user {
            self.target_bpm = auto_target_bpm(&stats, self.settings.auto_adjust_notes_per_second);
        }
        self.time_scaling = match self.target_bpm {
            Some(target) if stats.beats_per_minute > 0.0 => target as f64 / stats.beats_per_minute,
            _ => 1.0,
        };
        self.clock.set_time_scaling(self.time_scaling);

        let tempo = transformer.tempo_map();
        self.section_start_us = tempo.tick_to_micros(stats.start_tick);
        self.section_end_us = tempo.tick_to_micros(stats.end_tick);

        let range = if stats.is_valid_basic_mode() {
            BASIC_OCTAVE_RANGE
        } else {
            EXTENDED_OCTAVE_RANGE
        };
        self.octave_shift = stats
            .mid_octave(range)
            .map(|mid| (mid - GAME_DEFAULT_MID_OCTAVE) * 12)
            .unwrap_or(0);

        let mut viewer =
            TrackViewer::from_transformer(transformer, ViewerOptions::from_settings(&self.settings));
        let _ = viewer.set_time_us(self.section_start_us - self.settings.warmup_ms as TimeUs * 1000);
        viewer.reset_notification();
        self.viewer = Some(viewer);

        let name = transformer.original().name.clone();
        let report = transformer.report().clone();
        let valid_basic = stats.is_valid_basic_mode();
        let valid_extended = stats.is_valid_extended_mode();
        let can_play = stats.is_valid() && valid_for_mode(&stats, &self.settings);
        let effective_bpm = self
            .target_bpm
            .unwrap_or(stats.beats_per_minute.round() as u32);

        if self.settings.metronome_link_enabled {
            if let Some(metronome) = self.ctx.metronome.as_mut() {
                metronome.set_bpm(effective_bpm);
                metronome.set_measure(stats.time_signature.numerator as u32);
            }
        }

        tracing::debug!(
            name = %name,
            notes = stats.note_count,
            start_us = self.section_start_us,
            end_us = self.section_end_us,
            time_scaling = self.time_scaling,
            octave_shift = self.octave_shift,
            can_play,
            "track prepared"
        );
        self.events.push_back(AssistEvent::TempoChanged {
            source_bpm: stats.beats_per_minute,
            target_bpm: self.target_bpm,
            time_scaling: self.time_scaling,
        });
        self.events.push_back(AssistEvent::TrackChanged {
            name,
            stats,
            report,
            valid_basic,
            valid_extended,
            can_play,
        });
    }

    fn open_transport(&mut self) {
        self.transport = None;
        if !self.settings.playback_enabled {
            return;
        }
        let Some(port) = self.ctx.sound_output.as_ref() else {
            return;
        };
        let score = self.playback_score();
        match port.open_transport(score) {
            Ok(transport) => self.transport = Some(transport),
            Err(err) => {
                tracing::warn!(%err, "sound output unavailable, playing without sound");
                self.events.push_back(AssistEvent::SoundUnavailable {
                    reason: err.to_string(),
                });
            }
        }
    }

    fn playback_score(&self) -> PlaybackScore {
        let notes = self
            .viewer
            .iter()
            .flat_map(|viewer| viewer.notes().iter())
            .filter(|n| n.start_us >= self.section_start_us && n.start_us < self.section_end_us)
            .map(|n| ScheduledNote {
                pitch: n.note.pitch,
                velocity: n.note.velocity,
                start_us: n.start_us,
                end_us: n.end_us.min(self.section_end_us),
            })
            .collect();
        PlaybackScore {
            notes,
            time_scaling: self.time_scaling,
            end_us: self.section_end_us,
        }
    }

    fn lazy_start_sound(&mut self) -> Result<(), AssistError> {
        if self.sound_started || self.state == AssistState::PausedForInput {
            return Ok(());
        }
        let now = self.clock.time_us();
        if now < self.section_start_us {
            return Ok(());
        }
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };
        transport.start_at(now)?;
        transport.set_speed(1.0);
        self.sound_started = true;
        self.drift.reset();
        tracing::debug!(now, "sound transport started");
        Ok(())
    }

    fn metronome_elapsed_us(&mut self) -> Option<TimeUs> {
        if !self.settings.metronome_link_enabled {
            return None;
        }
        let metronome = self.ctx.metronome.as_ref()?;
        if metronome.is_active() && metronome.is_playing() {
            self.metronome_seen_playing = true;
            Some(metronome.current_time_us())
        } else {
            None
        }
    }

    /// Returns true when the metronome we were following stopped.
    fn poll_metronome(&mut self) -> bool {
        if !self.settings.metronome_link_enabled {
            return false;
        }
        let Some(metronome) = self.ctx.metronome.as_mut() else {
            return false;
        };
        let mut stopped = false;
        for change in metronome.poll_changes() {
            match change {
                MetronomeChange::Playing(false) => stopped |= self.metronome_seen_playing,
                MetronomeChange::Bpm(bpm) => tracing::debug!(bpm, "metronome tempo changed"),
                other => tracing::trace!(?other, "metronome change"),
            }
        }
        stopped
    }

    fn on_now_playing(&mut self, playing: NowPlaying) {
        if playing.start_us < self.section_start_us || playing.start_us >= self.section_end_us {
            return;
        }
        self.events.push_back(AssistEvent::NowPlaying {
            pitch: playing.pitch,
            start_us: playing.start_us,
            end_us: playing.end_us,
        });

        if self.scoring_active {
            for event in self.score.on_note_playing(playing.pitch, playing.start_us) {
                self.events.push_back(AssistEvent::NoteScored { event });
            }
        }

        if self.state == AssistState::Playing
            && self.settings.training_mode
            && !self.is_already_pressed(playing)
        {
            self.state = AssistState::PausedForInput;
            self.paused_note = Some(playing);
            if self.sound_started {
                if let Some(transport) = self.transport.as_mut() {
                    transport.stop();
                }
                self.sound_started = false;
            }
            tracing::debug!(pitch = playing.pitch, "waiting for input");
            self.events.push_back(AssistEvent::WaitingForInput {
                pitch: playing.pitch,
            });
            self.events.push_back(AssistEvent::StateChanged {
                state: AssistState::PausedForInput,
            });
        }
    }

    fn is_already_pressed(&self, playing: NowPlaying) -> bool {
        let grace_us = self.settings.press_grace_ms as TimeUs * 1000;
        let pressed_recently = self.last_press.is_some_and(|(pitch, time_us)| {
            pitch == playing.pitch && time_us >= playing.start_us - grace_us
        });
        pressed_recently || self.is_track_pitch_held(playing.pitch)
    }

    /// Second press path: the polled key state, counted on its rising edge
    /// while a note is waiting for a press.
    fn poll_key_state(&mut self) {
        if self.ctx.key_state.is_none() || !self.state.is_running() {
            return;
        }
        let target = self
            .paused_note
            .or_else(|| self.viewer.as_ref().and_then(TrackViewer::now_playing));
        let Some(target) = target else {
            self.held_pitch = None;
            return;
        };

        let held = self.is_track_pitch_held(target.pitch);
        let rising = held && self.held_pitch != Some(target.pitch);
        self.held_pitch = held.then_some(target.pitch);

        let waiting = self.paused_note.is_some() || (self.scoring_active && self.score.is_play_pending());
        let echo = self.is_echo(target.pitch, PressPath::KeyState, self.clock.time_us());
        if rising && (waiting || echo) {
            self.register_press(target.pitch, PressPath::KeyState);
        }
    }

    fn register_press(&mut self, pitch: u8, path: PressPath) {
        let now = self.clock.time_us();
        if self.is_echo(pitch, path, now) {
            self.credited_press = None;
            tracing::trace!(pitch, ?path, "press already credited");
            return;
        }
        self.credited_press = Some(CreditedPress {
            pitch,
            path,
            time_us: now,
        });
        self.last_press = Some((pitch, now));

        if self.scoring_active {
            let (next_pitch, next_time_us) = self.next_note_for_press(now);
            for event in self.score.on_note_pressed(pitch, now, next_pitch, next_time_us) {
                self.events.push_back(AssistEvent::NoteScored { event });
            }
        }

        if let Some(paused) = self.paused_note.filter(|note| note.pitch == pitch) {
            self.paused_note = None;
            self.state = AssistState::Playing;
            tracing::debug!(pitch, waited_us = self.clock.paused_us(), "resumed");
            self.events.push_back(AssistEvent::Resumed {
                pitch: paused.pitch,
            });
            self.events.push_back(AssistEvent::StateChanged {
                state: AssistState::Playing,
            });
        }
    }

    /// The same key reported by the other path shortly after it was credited.
    fn is_echo(&self, pitch: u8, path: PressPath, now: TimeUs) -> bool {
        let window_us = self.settings.press_grace_ms as TimeUs * 1000;
        self.credited_press.is_some_and(|c| {
            c.pitch == pitch && c.path != path && (0..=window_us).contains(&(now - c.time_us))
        })
    }

    /// The note a press might belong to if it is not for the current one.
    fn next_note_for_press(&self, now: TimeUs) -> (Option<u8>, Option<TimeUs>) {
        let Some(viewer) = self.viewer.as_ref() else {
            return (None, None);
        };
        let current = self.paused_note.or_else(|| viewer.now_playing());
        let next = match current {
            Some(playing) => viewer.note_after(playing.index),
            None => viewer.next_note_from(now).filter(|n| n.start_us > now),
        };
        match next {
            Some(note) if note.start_us < self.section_end_us => {
                (Some(note.note.pitch), Some(note.start_us))
            }
            _ => (None, None),
        }
    }

    fn is_track_pitch_held(&self, track_pitch: u8) -> bool {
        let Some(reader) = self.ctx.key_state.as_ref() else {
            return false;
        };
        u8::try_from(track_pitch as i32 - self.octave_shift)
            .ok()
            .filter(|p| *p <= 127)
            .is_some_and(|game_pitch| reader.is_pitch_held(game_pitch))
    }

    fn to_track_pitch(&self, game_pitch: u8) -> Option<u8> {
        u8::try_from(game_pitch as i32 + self.octave_shift)
            .ok()
            .filter(|p| *p <= 127)
    }

    fn drain_presses(&mut self) -> Vec<u8> {
        self.press_rx
            .as_mut()
            .map(NotePressReceiver::drain)
            .unwrap_or_default()
    }

    fn drain_idle_signals(&mut self) {
        for pitch in self.drain_presses() {
            self.record_press(pitch);
        }
        if self.settings.metronome_link_enabled {
            if let Some(metronome) = self.ctx.metronome.as_mut() {
                let _ = metronome.poll_changes();
            }
        }
    }

    fn record_press(&mut self, game_pitch: u8) {
        if game_pitch == 0 {
            return;
        }
        if self.recent_presses.len() >= RECENT_PRESS_LIMIT {
            self.recent_presses.pop_front();
        }
        self.recent_presses.push_back(game_pitch);
    }
}

impl Drop for TrackAssistant {
    fn drop(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.stop();
        }
        if let Some(source) = self.ctx.note_presses.as_mut() {
            source.unsubscribe();
        }
    }
}

fn score_config(settings: &AssistSettings) -> ScoreConfig {
    ScoreConfig {
        grace_us: settings.score_grace_ms as TimeUs * 1000,
    }
}

fn valid_for_mode(stats: &TrackStats, settings: &AssistSettings) -> bool {
    stats.is_valid_basic_mode()
        || (settings.extended_octaves_allowed && stats.is_valid_extended_mode())
}

/// Slows the track down until its busiest beat fits `max_notes_per_second`.
pub fn auto_target_bpm(stats: &TrackStats, max_notes_per_second: f32) -> Option<u32> {
    if stats.notes_per_beat == 0 || max_notes_per_second <= 0.0 {
        return None;
    }
    if stats.notes_per_second() <= max_notes_per_second as f64 {
        return None;
    }
    let bpm = (max_notes_per_second as f64 * 60.0 / stats.notes_per_beat as f64).floor();
    Some(bpm.max(1.0) as u32)
}
