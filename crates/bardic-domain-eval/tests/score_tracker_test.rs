use bardic_domain_eval::{ScoreConfig, ScoreEvent, ScoreTracker};
use pretty_assertions::assert_eq;

const MS: i64 = 1000;

fn tracker() -> ScoreTracker {
    let mut tracker = ScoreTracker::new(ScoreConfig { grace_us: 50 * MS });
    tracker.on_play_start();
    tracker
}

fn accuracy_of(event: Option<ScoreEvent>) -> f64 {
    match event {
        Some(ScoreEvent::Finished { accuracy, .. }) => accuracy,
        other => panic!("expected Finished, got {other:?}"),
    }
}

#[test]
fn early_press_outside_grace_costs_its_offset() {
    // Four notes 500 ms apart; the third is pressed 80 ms early.
    let pitches = [60u8, 62, 64, 65];
    let mut tracker = tracker();

    tracker.on_note_playing(60, 0);
    tracker.on_note_pressed(60, 0, Some(62), Some(500 * MS));
    tracker.on_note_playing(62, 500 * MS);
    tracker.on_note_pressed(62, 500 * MS, Some(64), Some(1000 * MS));
    let early = tracker.on_note_pressed(64, 920 * MS, Some(64), Some(1000 * MS));
    assert!(early.is_empty());
    let matched = tracker.on_note_playing(64, 1000 * MS);
    assert_eq!(
        matched,
        vec![ScoreEvent::Matched {
            pitch: pitches[2],
            delta_us: -80 * MS,
            charged_us: 80 * MS,
        }]
    );
    // Pressed in the same frame the note becomes due, before its play event.
    tracker.on_note_pressed(65, 1500 * MS, Some(65), Some(1500 * MS));
    tracker.on_note_playing(65, 1500 * MS);

    let accuracy = accuracy_of(tracker.finalize(2000 * MS, 2000 * MS));
    assert!((accuracy - (1.0 - 80.0 / 2000.0)).abs() < 1e-9);
    assert_eq!(tracker.matched(), 4);
    assert_eq!(tracker.missed(), 0);
}

#[test]
fn press_within_grace_is_free() {
    let mut tracker = tracker();
    tracker.on_note_playing(60, 0);
    let events = tracker.on_note_pressed(60, 30 * MS, None, None);

    assert_eq!(
        events,
        vec![ScoreEvent::Matched {
            pitch: 60,
            delta_us: 30 * MS,
            charged_us: 0,
        }]
    );
    assert_eq!(tracker.total_diff_us(), 0);
}

#[test]
fn unpressed_note_is_charged_in_full_when_the_next_one_plays() {
    let mut tracker = tracker();
    tracker.on_note_playing(60, 0);
    let events = tracker.on_note_playing(62, 40 * MS);

    assert_eq!(
        events,
        vec![ScoreEvent::Missed {
            pitch: 60,
            charged_us: 40 * MS,
        }]
    );
}

#[test]
fn repeated_presses_are_credited_once() {
    let mut tracker = tracker();
    tracker.on_note_playing(60, 0);
    assert_eq!(tracker.on_note_pressed(60, 100 * MS, Some(62), None).len(), 1);
    assert!(tracker.on_note_pressed(60, 120 * MS, Some(62), None).is_empty());
    assert!(tracker.on_note_pressed(60, 140 * MS, Some(62), None).is_empty());

    assert_eq!(tracker.total_diff_us(), 100 * MS);
    assert!(!tracker.is_play_pending());
}

#[test]
fn wrong_key_does_not_match_a_later_note() {
    let mut tracker = tracker();
    tracker.on_note_playing(60, 0);
    tracker.on_note_pressed(67, 10 * MS, Some(62), Some(500 * MS));
    tracker.on_note_pressed(60, 20 * MS, Some(62), Some(500 * MS));
    let events = tracker.on_note_playing(67, 500 * MS);

    assert!(events.is_empty());
    assert!(tracker.is_play_pending());
}

#[test]
fn repeated_pitch_press_goes_to_the_closer_note() {
    let mut tracker = tracker();
    tracker.on_note_playing(60, 0);
    // Closer to the next 60 at 500 ms than to the current one at 0.
    assert!(tracker
        .on_note_pressed(60, 400 * MS, Some(60), Some(500 * MS))
        .is_empty());
    let events = tracker.on_note_playing(60, 500 * MS);

    assert_eq!(
        events,
        vec![
            ScoreEvent::Missed {
                pitch: 60,
                charged_us: 500 * MS,
            },
            ScoreEvent::Matched {
                pitch: 60,
                delta_us: -100 * MS,
                charged_us: 100 * MS,
            },
        ]
    );
}

#[test]
fn finalize_charges_last_unpressed_note_and_fires_once() {
    let mut tracker = tracker();
    tracker.on_note_playing(60, 1000 * MS);

    let accuracy = accuracy_of(tracker.finalize(1500 * MS, 2000 * MS));
    assert!((accuracy - 0.75).abs() < 1e-9);
    assert!(tracker.finalize(1500 * MS, 2000 * MS).is_none());
    assert!(tracker.on_note_playing(62, 1600 * MS).is_empty());
}

#[test]
fn accuracy_is_clamped() {
    let mut tracker = tracker();
    tracker.on_note_playing(60, 0);
    let accuracy = accuracy_of(tracker.finalize(5000 * MS, 1000 * MS));

    assert_eq!(accuracy, 0.0);
}
