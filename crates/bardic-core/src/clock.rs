use bardic_ports::types::TimeUs;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockSource {
    Transport,
    Metronome,
    PausedForInput,
    Accumulator,
}

/// Readings gathered for one tick, highest priority first.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClockInputs {
    /// Track time reported by a running sound transport.
    pub transport_us: Option<TimeUs>,
    /// Wall time since the external metronome started.
    pub metronome_elapsed_us: Option<TimeUs>,
    pub paused_for_input: bool,
    pub section_start_us: TimeUs,
}

/// Fuses the competing time sources into one track-time cursor.
///
/// Track time is microseconds under the cleaned tempo map; `time_scaling`
/// only controls how fast wall time moves it. Apart from `reset`, the
/// cursor never goes backwards.
#[derive(Clone, Debug)]
pub struct PlaybackClock {
    time_us: TimeUs,
    time_scaling: f64,
    source: ClockSource,
    paused_us: TimeUs,
    paused_timeout_us: TimeUs,
}

impl PlaybackClock {
    pub fn new(time_scaling: f64, paused_timeout_us: TimeUs) -> Self {
        Self {
            time_us: 0,
            time_scaling: sanitize_scaling(time_scaling),
            source: ClockSource::Accumulator,
            paused_us: 0,
            paused_timeout_us: paused_timeout_us.max(0),
        }
    }

    pub fn reset(&mut self, time_us: TimeUs) {
        self.time_us = time_us;
        self.source = ClockSource::Accumulator;
        self.paused_us = 0;
    }

    pub fn time_us(&self) -> TimeUs {
        self.time_us
    }

    pub fn time_scaling(&self) -> f64 {
        self.time_scaling
    }

    pub fn set_time_scaling(&mut self, time_scaling: f64) {
        self.time_scaling = sanitize_scaling(time_scaling);
    }

    pub fn set_paused_timeout_us(&mut self, timeout_us: TimeUs) {
        self.paused_timeout_us = timeout_us.max(0);
    }

    pub fn source(&self) -> ClockSource {
        self.source
    }

    /// Wall time spent waiting for input since the last resume, capped.
    pub fn paused_us(&self) -> TimeUs {
        self.paused_us
    }

    pub fn paused_timed_out(&self) -> bool {
        self.paused_timeout_us > 0 && self.paused_us >= self.paused_timeout_us
    }

    /// Track time the metronome says we should be at.
    pub fn metronome_time_us(&self, elapsed_us: TimeUs, section_start_us: TimeUs) -> TimeUs {
        section_start_us + (elapsed_us as f64 * self.time_scaling).round() as TimeUs
    }

    pub fn advance(&mut self, delta_seconds: f64, inputs: ClockInputs) -> ClockSource {
        let delta_seconds = if delta_seconds.is_finite() {
            delta_seconds.max(0.0)
        } else {
            0.0
        };

        let (source, target) = if let Some(transport_us) = inputs.transport_us {
            (ClockSource::Transport, transport_us)
        } else if let Some(elapsed_us) = inputs.metronome_elapsed_us {
            (
                ClockSource::Metronome,
                self.metronome_time_us(elapsed_us, inputs.section_start_us),
            )
        } else if inputs.paused_for_input {
            let waited = (delta_seconds * 1_000_000.0).round() as TimeUs;
            self.paused_us = (self.paused_us + waited).min(self.paused_timeout_us);
            (ClockSource::PausedForInput, self.time_us)
        } else {
            let step = (delta_seconds * self.time_scaling * 1_000_000.0).round() as TimeUs;
            (ClockSource::Accumulator, self.time_us + step)
        };

        if source != ClockSource::PausedForInput {
            self.paused_us = 0;
        }
        if source != self.source {
            tracing::debug!(from = ?self.source, to = ?source, time_us = self.time_us, "clock source changed");
        }
        self.source = source;
        self.time_us = self.time_us.max(target);
        source
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new(1.0, 30_000_000)
    }
}

fn sanitize_scaling(time_scaling: f64) -> f64 {
    if time_scaling.is_finite() && time_scaling > 0.0 {
        time_scaling
    } else {
        1.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriftConfig {
    /// Speed change per second of error.
    pub gain_per_second: f64,
    pub deadband_us: TimeUs,
    pub max_deviation: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            gain_per_second: 1.0,
            deadband_us: 1_000,
            max_deviation: 0.25,
        }
    }
}

/// Proportional controller pulling a sound transport towards the
/// metronome's position by adjusting its speed, never by seeking.
#[derive(Clone, Debug)]
pub struct DriftCorrector {
    cfg: DriftConfig,
    speed: f64,
    last_error_us: TimeUs,
}

impl DriftCorrector {
    pub fn new(cfg: DriftConfig) -> Self {
        Self {
            cfg,
            speed: 1.0,
            last_error_us: 0,
        }
    }

    pub fn reset(&mut self) {
        self.speed = 1.0;
        self.last_error_us = 0;
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Expected minus actual position at the last correction. Positive means
    /// the transport is behind.
    pub fn sync_error_us(&self) -> TimeUs {
        self.last_error_us
    }

    /// Returns the new speed when it changed.
    pub fn correct(&mut self, transport_us: TimeUs, expected_us: TimeUs) -> Option<f64> {
        let error_us = expected_us - transport_us;
        self.last_error_us = error_us;

        let speed = if error_us.abs() <= self.cfg.deadband_us {
            1.0
        } else {
            let correction = self.cfg.gain_per_second * error_us as f64 / 1_000_000.0;
            1.0 + correction.clamp(-self.cfg.max_deviation, self.cfg.max_deviation)
        };

        if (speed - self.speed).abs() < 1e-6 {
            return None;
        }
        self.speed = speed;
        Some(speed)
    }
}

impl Default for DriftCorrector {
    fn default() -> Self {
        Self::new(DriftConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_steps_by_scaled_delta() {
        let mut clock = PlaybackClock::new(1.5, 0);
        clock.reset(-2_000_000);
        for i in 1..=10 {
            assert_eq!(clock.advance(0.016, ClockInputs::default()), ClockSource::Accumulator);
            assert_eq!(clock.time_us(), -2_000_000 + i * 24_000);
        }
    }

    #[test]
    fn transport_outranks_metronome() {
        let mut clock = PlaybackClock::default();
        let inputs = ClockInputs {
            transport_us: Some(1_000_000),
            metronome_elapsed_us: Some(5_000_000),
            paused_for_input: true,
            section_start_us: 0,
        };
        assert_eq!(clock.advance(0.1, inputs), ClockSource::Transport);
        assert_eq!(clock.time_us(), 1_000_000);
    }

    #[test]
    fn metronome_time_is_scaled_and_offset() {
        let mut clock = PlaybackClock::new(0.5, 0);
        let inputs = ClockInputs {
            metronome_elapsed_us: Some(2_000_000),
            section_start_us: 4_000_000,
            ..ClockInputs::default()
        };
        assert_eq!(clock.advance(0.1, inputs), ClockSource::Metronome);
        assert_eq!(clock.time_us(), 5_000_000);
    }

    #[test]
    fn paused_clock_holds_and_caps_wait() {
        let mut clock = PlaybackClock::new(1.0, 100_000);
        clock.reset(500);
        let inputs = ClockInputs {
            paused_for_input: true,
            ..ClockInputs::default()
        };
        for _ in 0..20 {
            clock.advance(0.016, inputs);
        }
        assert_eq!(clock.time_us(), 500);
        assert_eq!(clock.paused_us(), 100_000);
        assert!(clock.paused_timed_out());

        clock.advance(0.016, ClockInputs::default());
        assert_eq!(clock.paused_us(), 0);
    }

    #[test]
    fn lagging_source_does_not_rewind() {
        let mut clock = PlaybackClock::default();
        clock.reset(3_000_000);
        clock.advance(
            0.016,
            ClockInputs {
                transport_us: Some(2_990_000),
                ..ClockInputs::default()
            },
        );
        assert_eq!(clock.time_us(), 3_000_000);
    }

    #[test]
    fn drift_correction_is_proportional_and_clamped() {
        let mut drift = DriftCorrector::default();
        assert_eq!(drift.correct(1_000_000, 1_000_500), None);
        let speed = drift.correct(1_000_000, 1_020_000).unwrap_or_default();
        assert!((speed - 1.02).abs() < 1e-9);
        assert_eq!(drift.sync_error_us(), 20_000);
        assert_eq!(drift.correct(2_000_000, 1_000_000), Some(0.75));
        assert_eq!(drift.correct(1_000_000, 1_000_000), Some(1.0));
    }
}
