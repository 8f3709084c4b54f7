use crate::model::{TempoPoint, TimeSignature, TimeSignaturePoint};
use bardic_ports::types::{Tick, TimeUs};
use serde::{Deserialize, Serialize};

/// Position on the bar/beat grid. Bars and beats are zero based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarBeat {
    pub bar: i64,
    pub beat: u32,
    pub tick_in_beat: Tick,
}

/// Tick, wall clock and bar/beat conversions for one track.
#[derive(Clone, Debug)]
pub struct TempoMap {
    ppq: u16,
    segments: Vec<TempoSegment>,
    meters: Vec<MeterSegment>,
}

#[derive(Clone, Copy, Debug)]
struct TempoSegment {
    start_tick: Tick,
    start_us: TimeUs,
    us_per_quarter: u32,
}

#[derive(Clone, Copy, Debug)]
struct MeterSegment {
    start_tick: Tick,
    start_bar: i64,
    signature: TimeSignature,
}

impl TempoMap {
    pub fn new(ppq: u16, mut points: Vec<TempoPoint>, mut signatures: Vec<TimeSignaturePoint>) -> Self {
        let ppq = ppq.max(1);
        points.sort_by_key(|p| p.tick);
        if points.is_empty() || points[0].tick != 0 {
            points.insert(
                0,
                TempoPoint {
                    tick: 0,
                    us_per_quarter: 500_000,
                },
            );
        }

        let mut segments = Vec::with_capacity(points.len());
        let mut current_us = 0i64;
        for (idx, point) in points.iter().enumerate() {
            if idx > 0 {
                let prev = &points[idx - 1];
                let delta_ticks = point.tick - prev.tick;
                current_us += ticks_to_us(delta_ticks, prev.us_per_quarter, ppq);
            }
            segments.push(TempoSegment {
                start_tick: point.tick,
                start_us: current_us,
                us_per_quarter: point.us_per_quarter.max(1),
            });
        }

        signatures.sort_by_key(|p| p.tick);
        if signatures.is_empty() || signatures[0].tick != 0 {
            signatures.insert(
                0,
                TimeSignaturePoint {
                    tick: 0,
                    signature: TimeSignature::default(),
                },
            );
        }

        let mut meters: Vec<MeterSegment> = Vec::with_capacity(signatures.len());
        for point in signatures {
            let signature = sanitize_signature(point.signature);
            let start_bar = match meters.last() {
                None => 0,
                Some(prev) => {
                    if prev.start_tick == point.tick {
                        meters.pop();
                        meters.last().map_or(0, |p| p.bar_at_or_after(point.tick, ppq))
                    } else {
                        prev.bar_at_or_after(point.tick, ppq)
                    }
                }
            };
            meters.push(MeterSegment {
                start_tick: point.tick,
                start_bar,
                signature,
            });
        }

        Self {
            ppq,
            segments,
            meters,
        }
    }

    pub fn ppq(&self) -> u16 {
        self.ppq
    }

    pub fn tempo_event_count(&self) -> usize {
        self.segments.len()
    }

    pub fn tick_to_micros(&self, tick: Tick) -> TimeUs {
        let seg = self.segment_for_tick(tick);
        let delta_ticks = tick - seg.start_tick;
        seg.start_us + ticks_to_us(delta_ticks, seg.us_per_quarter, self.ppq)
    }

    pub fn micros_to_tick(&self, micros: TimeUs) -> Tick {
        let seg = self.segment_for_micros(micros);
        let delta_us = micros - seg.start_us;
        let delta_ticks = us_to_ticks(delta_us, seg.us_per_quarter, self.ppq);
        seg.start_tick + delta_ticks
    }

    pub fn us_per_quarter_at(&self, tick: Tick) -> u32 {
        self.segment_for_tick(tick).us_per_quarter
    }

    pub fn bpm_at(&self, tick: Tick) -> f64 {
        60_000_000.0 / self.us_per_quarter_at(tick) as f64
    }

    pub fn time_signature_at(&self, tick: Tick) -> TimeSignature {
        self.meter_for_tick(tick).signature
    }

    /// Distinct time signatures in effect anywhere in `[start_tick, end_tick)`.
    pub fn time_signatures_between(&self, start_tick: Tick, end_tick: Tick) -> Vec<TimeSignature> {
        let mut out: Vec<TimeSignature> = Vec::new();
        let first = self.meter_for_tick(start_tick).signature;
        out.push(first);
        for meter in &self.meters {
            if meter.start_tick > start_tick
                && meter.start_tick < end_tick
                && !out.contains(&meter.signature)
            {
                out.push(meter.signature);
            }
        }
        out
    }

    pub fn beat_ticks_at(&self, tick: Tick) -> Tick {
        beat_ticks(self.meter_for_tick(tick).signature, self.ppq)
    }

    /// Only meaningful for non-negative ticks.
    pub fn tick_to_bar_beat(&self, tick: Tick) -> BarBeat {
        let meter = self.meter_for_tick(tick);
        let beat = beat_ticks(meter.signature, self.ppq);
        let bar_len = beat * meter.signature.numerator as Tick;
        let rel = tick - meter.start_tick;
        let within = rel.rem_euclid(bar_len);
        BarBeat {
            bar: meter.start_bar + rel.div_euclid(bar_len),
            beat: (within / beat) as u32,
            tick_in_beat: within % beat,
        }
    }

    pub fn bar_beat_to_tick(&self, bar: i64, beat: u32) -> Tick {
        let meter = self.meter_for_bar(bar);
        let beat_len = beat_ticks(meter.signature, self.ppq);
        let bar_len = beat_len * meter.signature.numerator as Tick;
        let tick = meter.start_tick + (bar - meter.start_bar) * bar_len + beat as Tick * beat_len;
        // A meter change mid-bar truncates the bar it lands in.
        match self.meters.iter().find(|m| m.start_tick > meter.start_tick) {
            Some(next) if tick > next.start_tick => next.start_tick,
            _ => tick,
        }
    }

    pub fn bar_to_tick(&self, bar: i64) -> Tick {
        self.bar_beat_to_tick(bar, 0)
    }

    pub fn bar_of_tick(&self, tick: Tick) -> i64 {
        self.tick_to_bar_beat(tick).bar
    }

    /// Tick of the first beat boundary strictly after `tick`.
    pub fn next_beat_tick(&self, tick: Tick) -> Tick {
        let pos = self.tick_to_bar_beat(tick);
        let numerator = self.meter_for_tick(tick).signature.numerator as u32;
        let next = if pos.beat + 1 >= numerator {
            self.bar_to_tick(pos.bar + 1)
        } else {
            self.bar_beat_to_tick(pos.bar, pos.beat + 1)
        };
        if next <= tick {
            // Mid-bar meter change: the next boundary is the change itself.
            self.meters
                .iter()
                .find(|m| m.start_tick > tick)
                .map(|m| m.start_tick)
                .unwrap_or(tick + self.beat_ticks_at(tick))
        } else {
            next
        }
    }

    fn segment_for_tick(&self, tick: Tick) -> TempoSegment {
        let mut current = self.segments[0];
        for seg in &self.segments {
            if seg.start_tick > tick {
                break;
            }
            current = *seg;
        }
        current
    }

    fn segment_for_micros(&self, micros: TimeUs) -> TempoSegment {
        let mut current = self.segments[0];
        for seg in &self.segments {
            if seg.start_us > micros {
                break;
            }
            current = *seg;
        }
        current
    }

    fn meter_for_tick(&self, tick: Tick) -> MeterSegment {
        let mut current = self.meters[0];
        for meter in &self.meters {
            if meter.start_tick > tick {
                break;
            }
            current = *meter;
        }
        current
    }

    fn meter_for_bar(&self, bar: i64) -> MeterSegment {
        let mut current = self.meters[0];
        for meter in &self.meters {
            if meter.start_bar > bar {
                break;
            }
            current = *meter;
        }
        current
    }
}

impl MeterSegment {
    fn bar_at_or_after(&self, tick: Tick, ppq: u16) -> i64 {
        let bar_len = beat_ticks(self.signature, ppq) * self.signature.numerator as Tick;
        let rel = (tick - self.start_tick).max(0);
        let full = rel / bar_len;
        let partial = if rel % bar_len == 0 { 0 } else { 1 };
        self.start_bar + full + partial
    }
}

fn sanitize_signature(signature: TimeSignature) -> TimeSignature {
    let denominator = if signature.denominator == 0 || !signature.denominator.is_power_of_two() {
        4
    } else {
        signature.denominator.min(64)
    };
    TimeSignature {
        numerator: signature.numerator.max(1),
        denominator,
    }
}

pub fn beat_ticks(signature: TimeSignature, ppq: u16) -> Tick {
    (ppq as Tick * 4 / signature.denominator.max(1) as Tick).max(1)
}

pub fn ticks_to_us(ticks: Tick, us_per_quarter: u32, ppq: u16) -> TimeUs {
    let ticks = ticks as i128;
    let us_per_quarter = us_per_quarter as i128;
    let ppq = ppq.max(1) as i128;
    ((ticks * us_per_quarter) / ppq) as TimeUs
}

pub fn us_to_ticks(us: TimeUs, us_per_quarter: u32, ppq: u16) -> Tick {
    let us = us as i128;
    let us_per_quarter = us_per_quarter.max(1) as i128;
    let ppq = ppq as i128;
    ((us * ppq) / us_per_quarter) as Tick
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(tick: Tick, numerator: u8, denominator: u8) -> TimeSignaturePoint {
        TimeSignaturePoint {
            tick,
            signature: TimeSignature {
                numerator,
                denominator,
            },
        }
    }

    #[test]
    fn tempo_change_splits_micros() {
        let map = TempoMap::new(
            480,
            vec![
                TempoPoint {
                    tick: 0,
                    us_per_quarter: 500_000,
                },
                TempoPoint {
                    tick: 960,
                    us_per_quarter: 250_000,
                },
            ],
            Vec::new(),
        );
        assert_eq!(map.tick_to_micros(960), 1_000_000);
        assert_eq!(map.tick_to_micros(1440), 1_250_000);
        assert_eq!(map.micros_to_tick(1_250_000), 1440);
        assert_eq!(map.tick_to_micros(-480), -500_000);
    }

    #[test]
    fn bar_beat_follows_meter_changes() {
        // Two bars of 4/4 then 3/4.
        let map = TempoMap::new(480, Vec::new(), vec![ts(0, 4, 4), ts(3840, 3, 4)]);
        assert_eq!(map.bar_to_tick(2), 3840);
        assert_eq!(map.bar_to_tick(3), 3840 + 1440);
        let pos = map.tick_to_bar_beat(3840 + 480 + 10);
        assert_eq!(
            pos,
            BarBeat {
                bar: 2,
                beat: 1,
                tick_in_beat: 10
            }
        );
        assert_eq!(map.next_beat_tick(3840 + 960), 3840 + 1440);
    }

    #[test]
    fn mid_bar_meter_change_starts_new_bar() {
        let map = TempoMap::new(480, Vec::new(), vec![ts(0, 4, 4), ts(960, 6, 8)]);
        assert_eq!(map.bar_of_tick(960), 1);
        assert_eq!(map.bar_to_tick(1), 960);
        assert_eq!(map.beat_ticks_at(960), 240);
        assert_eq!(map.next_beat_tick(480), 960);
    }
}
