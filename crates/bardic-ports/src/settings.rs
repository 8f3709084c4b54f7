use serde::{Deserialize, Serialize};

fn default_auto_adjust_end_bar() -> bool {
    true
}

fn default_auto_adjust_notes_per_second() -> f32 {
    6.0
}

fn default_min_note_duration_ms() -> u32 {
    50
}

fn default_tempo_sample_bars() -> u32 {
    16
}

fn default_score_performance() -> bool {
    true
}

fn default_warmup_ms() -> u32 {
    2_000
}

fn default_view_ahead_ms() -> u32 {
    4_000
}

fn default_view_behind_ms() -> u32 {
    500
}

fn default_show_bar_lines() -> bool {
    true
}

fn default_show_bindings() -> bool {
    true
}

fn default_max_bindings_to_show() -> usize {
    4
}

fn default_press_grace_ms() -> u32 {
    150
}

fn default_score_grace_ms() -> u32 {
    50
}

fn default_paused_timeout_ms() -> u32 {
    30_000
}

/// Read-only configuration consumed by the assist engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistSettings {
    pub training_mode: bool,
    pub extended_octaves_allowed: bool,
    #[serde(default = "default_auto_adjust_end_bar")]
    pub auto_adjust_end_bar: bool,
    pub auto_adjust_bpm: bool,
    #[serde(default = "default_auto_adjust_notes_per_second")]
    pub auto_adjust_notes_per_second: f32,
    #[serde(default = "default_min_note_duration_ms")]
    pub min_note_duration_ms: u32,
    /// Notes below this pitch are dropped on import; 0 disables.
    pub low_note_floor: i32,
    #[serde(default = "default_tempo_sample_bars")]
    pub tempo_sample_bars: u32,
    pub metronome_link_enabled: bool,
    pub playback_enabled: bool,
    #[serde(default = "default_score_performance")]
    pub score_performance: bool,
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u32,
    #[serde(default = "default_view_ahead_ms")]
    pub view_ahead_ms: u32,
    #[serde(default = "default_view_behind_ms")]
    pub view_behind_ms: u32,
    #[serde(default = "default_show_bar_lines")]
    pub show_bar_lines: bool,
    #[serde(default = "default_show_bindings")]
    pub show_bindings: bool,
    #[serde(default = "default_max_bindings_to_show")]
    pub max_bindings_to_show: usize,
    /// Display lanes for binding hints; 0 means one per shown binding.
    pub binding_lanes: usize,
    #[serde(default = "default_press_grace_ms")]
    pub press_grace_ms: u32,
    #[serde(default = "default_score_grace_ms")]
    pub score_grace_ms: u32,
    #[serde(default = "default_paused_timeout_ms")]
    pub paused_timeout_ms: u32,
}

impl AssistSettings {
    pub fn octave_range(&self) -> u32 {
        if self.extended_octaves_allowed {
            crate::EXTENDED_OCTAVE_RANGE
        } else {
            crate::BASIC_OCTAVE_RANGE
        }
    }

    pub fn lanes(&self) -> usize {
        if self.binding_lanes == 0 {
            self.max_bindings_to_show
        } else {
            self.binding_lanes
        }
    }
}

impl Default for AssistSettings {
    fn default() -> Self {
        Self {
            training_mode: false,
            extended_octaves_allowed: false,
            auto_adjust_end_bar: true,
            auto_adjust_bpm: false,
            auto_adjust_notes_per_second: 6.0,
            min_note_duration_ms: 50,
            low_note_floor: 0,
            tempo_sample_bars: 16,
            metronome_link_enabled: false,
            playback_enabled: false,
            score_performance: true,
            warmup_ms: 2_000,
            view_ahead_ms: 4_000,
            view_behind_ms: 500,
            show_bar_lines: true,
            show_bindings: true,
            max_bindings_to_show: 4,
            binding_lanes: 0,
            press_grace_ms: 150,
            score_grace_ms: 50,
            paused_timeout_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let settings: AssistSettings =
            serde_json::from_str(r#"{ "training_mode": true, "warmup_ms": 500 }"#)
                .expect("settings should parse");
        assert!(settings.training_mode);
        assert_eq!(settings.warmup_ms, 500);
        assert_eq!(settings.min_note_duration_ms, 50);
        assert!(settings.auto_adjust_end_bar);
        assert_eq!(settings.lanes(), 4);
    }
}
