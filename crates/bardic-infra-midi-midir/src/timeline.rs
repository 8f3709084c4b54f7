use bardic_ports::playback::PlaybackScore;
use bardic_ports::types::TimeUs;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimelineMessage {
    NoteOn { pitch: u8, velocity: u8 },
    NoteOff { pitch: u8 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TimelineEvent {
    time_us: TimeUs,
    message: TimelineMessage,
}

/// Maps wall time since start onto track time and hands out the note
/// messages that became due.
///
/// Track position is `anchor_track_us + (wall - anchor_wall_us) * rate`,
/// where rate is the score's time scaling times the current speed. A speed
/// change re-anchors at the current position, so it never jumps.
#[derive(Clone, Debug)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
    cursor: usize,
    start_us: TimeUs,
    end_us: TimeUs,
    time_scaling: f64,
    speed: f64,
    anchor_track_us: TimeUs,
    anchor_wall_us: i64,
}

impl Timeline {
    pub fn new(score: &PlaybackScore) -> Self {
        let mut events = Vec::with_capacity(score.notes.len() * 2);
        for note in &score.notes {
            events.push(TimelineEvent {
                time_us: note.start_us,
                message: TimelineMessage::NoteOn {
                    pitch: note.pitch,
                    velocity: note.velocity,
                },
            });
            events.push(TimelineEvent {
                time_us: note.end_us.max(note.start_us),
                message: TimelineMessage::NoteOff { pitch: note.pitch },
            });
        }
        // Offs first at equal times so a repeated pitch re-strikes cleanly.
        events.sort_by_key(|e| (e.time_us, matches!(e.message, TimelineMessage::NoteOn { .. })));

        let start_us = score.notes.iter().map(|n| n.start_us).min().unwrap_or(0);
        let time_scaling = if score.time_scaling.is_finite() && score.time_scaling > 0.0 {
            score.time_scaling
        } else {
            1.0
        };

        Self {
            events,
            cursor: 0,
            start_us,
            end_us: score.end_us,
            time_scaling,
            speed: 1.0,
            anchor_track_us: start_us,
            anchor_wall_us: 0,
        }
    }

    pub fn start_us(&self) -> TimeUs {
        self.start_us
    }

    pub fn rate(&self) -> f64 {
        self.time_scaling * self.speed
    }

    pub fn position_at(&self, wall_us: i64) -> TimeUs {
        let elapsed = (wall_us - self.anchor_wall_us) as f64;
        self.anchor_track_us + (elapsed * self.rate()).round() as TimeUs
    }

    /// Positions the timeline at `track_us`; notes starting before it are
    /// skipped.
    pub fn seek(&mut self, track_us: TimeUs, wall_us: i64) {
        self.anchor_track_us = track_us;
        self.anchor_wall_us = wall_us;
        self.cursor = self.events.partition_point(|e| e.time_us < track_us);
    }

    pub fn set_speed(&mut self, speed: f64, wall_us: i64) {
        if !speed.is_finite() || speed <= 0.0 {
            return;
        }
        self.anchor_track_us = self.position_at(wall_us);
        self.anchor_wall_us = wall_us;
        self.speed = speed;
    }

    pub fn due(&mut self, wall_us: i64) -> Vec<TimelineMessage> {
        let position = self.position_at(wall_us);
        let mut out = Vec::new();
        while let Some(event) = self.events.get(self.cursor) {
            if event.time_us > position {
                break;
            }
            out.push(event.message);
            self.cursor += 1;
        }
        out
    }

    pub fn is_done(&self, wall_us: i64) -> bool {
        self.cursor >= self.events.len() && self.position_at(wall_us) >= self.end_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bardic_ports::playback::ScheduledNote;

    fn score(time_scaling: f64) -> PlaybackScore {
        PlaybackScore {
            notes: vec![
                ScheduledNote {
                    pitch: 60,
                    velocity: 90,
                    start_us: 0,
                    end_us: 500_000,
                },
                ScheduledNote {
                    pitch: 60,
                    velocity: 90,
                    start_us: 500_000,
                    end_us: 1_000_000,
                },
            ],
            time_scaling,
            end_us: 1_000_000,
        }
    }

    #[test]
    fn repeated_pitch_releases_before_restrike() {
        let mut timeline = Timeline::new(&score(1.0));
        timeline.seek(0, 0);
        assert_eq!(
            timeline.due(0),
            vec![TimelineMessage::NoteOn {
                pitch: 60,
                velocity: 90
            }]
        );
        assert_eq!(
            timeline.due(500_000),
            vec![
                TimelineMessage::NoteOff { pitch: 60 },
                TimelineMessage::NoteOn {
                    pitch: 60,
                    velocity: 90
                },
            ]
        );
        assert!(!timeline.is_done(900_000));
        assert_eq!(timeline.due(1_000_000), vec![TimelineMessage::NoteOff { pitch: 60 }]);
        assert!(timeline.is_done(1_000_000));
    }

    #[test]
    fn scaling_stretches_wall_time() {
        let timeline = Timeline::new(&score(0.5));
        assert_eq!(timeline.position_at(1_000_000), 500_000);
    }

    #[test]
    fn speed_change_reanchors_without_jump() {
        let mut timeline = Timeline::new(&score(1.0));
        timeline.seek(0, 0);
        timeline.set_speed(1.25, 400_000);
        assert_eq!(timeline.position_at(400_000), 400_000);
        assert_eq!(timeline.position_at(800_000), 900_000);
    }

    #[test]
    fn seek_skips_earlier_notes() {
        let mut timeline = Timeline::new(&score(1.0));
        timeline.seek(250_000, 0);
        assert_eq!(timeline.due(0), Vec::new());
        assert_eq!(timeline.position_at(250_000), 500_000);
        assert_eq!(timeline.due(250_000).len(), 2);
    }
}
