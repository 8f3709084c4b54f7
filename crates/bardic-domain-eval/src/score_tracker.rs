use bardic_ports::types::TimeUs;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug)]
pub struct ScoreConfig {
    /// Press/play differences up to this size cost nothing.
    pub grace_us: TimeUs,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self { grace_us: 50_000 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScoreEvent {
    Matched {
        pitch: u8,
        delta_us: TimeUs,
        charged_us: TimeUs,
    },
    Missed {
        pitch: u8,
        charged_us: TimeUs,
    },
    Finished {
        accuracy: f64,
        total_diff_us: TimeUs,
        duration_us: TimeUs,
    },
}

#[derive(Clone, Copy, Debug)]
struct Observed {
    pitch: u8,
    time_us: TimeUs,
}

/// Reconciles two event streams, "this note should be playing now" and
/// "this key was pressed", into an accumulated timing error.
///
/// Each side remembers only its latest event and whether it has already been
/// matched, so one intended note is charged at most once.
#[derive(Debug)]
pub struct ScoreTracker {
    cfg: ScoreConfig,
    last_press: Option<Observed>,
    press_consumed: bool,
    last_play: Option<Observed>,
    play_consumed: bool,
    total_diff_us: TimeUs,
    matched: u32,
    missed: u32,
    finished: bool,
}

impl ScoreTracker {
    pub fn new(cfg: ScoreConfig) -> Self {
        Self {
            cfg,
            last_press: None,
            press_consumed: true,
            last_play: None,
            play_consumed: true,
            total_diff_us: 0,
            matched: 0,
            missed: 0,
            finished: false,
        }
    }

    pub fn set_config(&mut self, cfg: ScoreConfig) {
        self.cfg = cfg;
    }

    pub fn on_play_start(&mut self) {
        *self = Self::new(self.cfg);
    }

    pub fn on_note_pressed(
        &mut self,
        pitch: u8,
        time_us: TimeUs,
        next_pitch: Option<u8>,
        next_time_us: Option<TimeUs>,
    ) -> Vec<ScoreEvent> {
        let mut events = Vec::new();
        if self.finished || pitch == 0 {
            return events;
        }

        self.last_press = Some(Observed { pitch, time_us });
        self.press_consumed = false;

        let Some(play) = self.last_play.filter(|_| !self.play_consumed) else {
            self.drop_unless_next(pitch, next_pitch);
            return events;
        };

        if play.pitch == pitch {
            // Same pitch twice in a row: an early press may belong to the next one.
            let closer_to_next = next_pitch == Some(pitch)
                && next_time_us
                    .is_some_and(|next| (next - time_us).abs() < (time_us - play.time_us).abs());
            if !closer_to_next {
                events.push(self.charge_match(pitch, time_us - play.time_us));
                return events;
            }
        }

        self.drop_unless_next(pitch, next_pitch);
        events
    }

    pub fn on_note_playing(&mut self, pitch: u8, start_us: TimeUs) -> Vec<ScoreEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        if let Some(prev) = self.last_play.filter(|_| !self.play_consumed) {
            events.push(self.charge_miss(prev.pitch, start_us - prev.time_us));
        }

        self.last_play = Some(Observed {
            pitch,
            time_us: start_us,
        });
        self.play_consumed = false;

        if let Some(press) = self.last_press.filter(|_| !self.press_consumed) {
            if press.pitch == pitch {
                events.push(self.charge_match(pitch, press.time_us - start_us));
            }
        }

        events
    }

    /// Closes the session. Fires once; later calls return `None`.
    pub fn finalize(&mut self, end_us: TimeUs, duration_us: TimeUs) -> Option<ScoreEvent> {
        if self.finished {
            return None;
        }
        if let Some(prev) = self.last_play.filter(|_| !self.play_consumed) {
            self.charge_miss(prev.pitch, (end_us - prev.time_us).max(0));
        }
        self.finished = true;

        let accuracy = self.accuracy(duration_us);
        tracing::debug!(
            accuracy,
            total_diff_us = self.total_diff_us,
            matched = self.matched,
            missed = self.missed,
            "performance scored"
        );
        Some(ScoreEvent::Finished {
            accuracy,
            total_diff_us: self.total_diff_us,
            duration_us,
        })
    }

    /// The current play event has not been matched by a press yet.
    pub fn is_play_pending(&self) -> bool {
        self.last_play.is_some() && !self.play_consumed
    }

    pub fn total_diff_us(&self) -> TimeUs {
        self.total_diff_us
    }

    pub fn matched(&self) -> u32 {
        self.matched
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn accuracy(&self, duration_us: TimeUs) -> f64 {
        if duration_us <= 0 {
            return 0.0;
        }
        (1.0 - self.total_diff_us as f64 / duration_us as f64).clamp(0.0, 1.0)
    }

    fn drop_unless_next(&mut self, pitch: u8, next_pitch: Option<u8>) {
        // A press that can't match the upcoming note will never be credited.
        if next_pitch != Some(pitch) {
            self.press_consumed = true;
        }
    }

    fn charge_match(&mut self, pitch: u8, delta_us: TimeUs) -> ScoreEvent {
        let charged_us = if delta_us.abs() <= self.cfg.grace_us {
            0
        } else {
            delta_us.abs()
        };
        self.total_diff_us += charged_us;
        self.matched += 1;
        self.press_consumed = true;
        self.play_consumed = true;
        ScoreEvent::Matched {
            pitch,
            delta_us,
            charged_us,
        }
    }

    fn charge_miss(&mut self, pitch: u8, charged_us: TimeUs) -> ScoreEvent {
        self.total_diff_us += charged_us;
        self.missed += 1;
        self.play_consumed = true;
        ScoreEvent::Missed { pitch, charged_us }
    }
}

impl Default for ScoreTracker {
    fn default() -> Self {
        Self::new(ScoreConfig::default())
    }
}
