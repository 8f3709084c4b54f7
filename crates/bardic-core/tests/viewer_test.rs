use bardic_core::{GridLine, GridLineKind, TrackViewer, ViewerOptions};
use bardic_domain_track::{MidiTrack, Note, TempoMap, TempoPoint};
use pretty_assertions::assert_eq;

// 480 ppq at 120 bpm: one quarter is 480 ticks and 500 ms.
fn quarter_track(pitches: &[u8]) -> (MidiTrack, TempoMap) {
    let mut track = MidiTrack::new("Viewer", 480);
    track.notes = pitches
        .iter()
        .enumerate()
        .map(|(i, pitch)| Note {
            pitch: *pitch,
            velocity: 100,
            channel: 0,
            start_tick: i as i64 * 480,
            duration_ticks: 480,
        })
        .collect();
    let tempo = TempoMap::new(
        480,
        vec![TempoPoint {
            tick: 0,
            us_per_quarter: 500_000,
        }],
        Vec::new(),
    );
    (track, tempo)
}

fn options(max_bindings: usize) -> ViewerOptions {
    ViewerOptions {
        ahead_us: 1_000_000,
        behind_us: 500_000,
        show_grid_lines: true,
        show_bindings: true,
        max_bindings_to_show: max_bindings,
        binding_lanes: max_bindings,
    }
}

fn shown_pitches(viewer: &TrackViewer) -> Vec<u8> {
    viewer.shown_notes().map(|n| n.note.pitch).collect()
}

#[test]
fn window_selects_overlapping_notes_and_now_playing() {
    let (track, tempo) = quarter_track(&[60, 62, 64, 65, 67, 69, 71, 72]);
    let mut viewer = TrackViewer::new(&track, tempo, options(4));

    let playing = viewer.set_time_us(1_000_000).map(|p| (p.index, p.pitch));
    assert_eq!(playing, Some((2, 64)));
    // The note ending exactly at the window start still shows; the one
    // starting exactly at the window end does not.
    assert_eq!(shown_pitches(&viewer), vec![60, 62, 64, 65]);
}

#[test]
fn same_time_twice_gives_same_view_and_one_notification() {
    let (track, tempo) = quarter_track(&[60, 62, 64, 60, 65, 67, 69, 71]);
    let mut viewer = TrackViewer::new(&track, tempo, options(3));

    assert!(viewer.set_time_us(750_000).is_some());
    let notes = shown_pitches(&viewer);
    let lines = viewer.shown_lines().to_vec();
    let bindings = viewer.shown_bindings().to_vec();

    assert!(viewer.set_time_us(750_000).is_none());
    assert_eq!(shown_pitches(&viewer), notes);
    assert_eq!(viewer.shown_lines(), lines.as_slice());
    assert_eq!(viewer.shown_bindings(), bindings.as_slice());
}

#[test]
fn notification_fires_again_after_reset() {
    let (track, tempo) = quarter_track(&[60, 62]);
    let mut viewer = TrackViewer::new(&track, tempo, options(2));

    assert!(viewer.set_time_us(100_000).is_some());
    assert!(viewer.set_time_us(200_000).is_none());
    viewer.reset_notification();
    assert!(viewer.set_time_us(100_000).is_some());
}

#[test]
fn nothing_plays_during_lead_in() {
    let (track, tempo) = quarter_track(&[60, 62]);
    let mut viewer = TrackViewer::new(&track, tempo, options(2));

    assert_eq!(viewer.set_time_us(-300_000), None);
    assert_eq!(viewer.now_playing(), None);
    assert_eq!(shown_pitches(&viewer), vec![60, 62]);
}

#[test]
fn grid_lines_cross_time_zero() {
    let (track, tempo) = quarter_track(&[60, 62, 64, 65]);
    let mut viewer = TrackViewer::new(&track, tempo, options(2));

    viewer.set_time_us(0);
    let expected = vec![
        GridLine {
            time_us: -500_000,
            kind: GridLineKind::Beat,
        },
        GridLine {
            time_us: 0,
            kind: GridLineKind::Bar,
        },
        GridLine {
            time_us: 500_000,
            kind: GridLineKind::Beat,
        },
        GridLine {
            time_us: 1_000_000,
            kind: GridLineKind::Beat,
        },
    ];
    assert_eq!(viewer.shown_lines(), expected.as_slice());
}

#[test]
fn grid_lines_before_zero_keep_bar_spacing() {
    let (track, tempo) = quarter_track(&[60]);
    let mut viewer = TrackViewer::new(&track, tempo, options(1));

    viewer.set_time_us(-2_000_000);
    let lines: Vec<(i64, GridLineKind)> = viewer
        .shown_lines()
        .iter()
        .map(|l| (l.time_us, l.kind))
        .collect();
    assert_eq!(
        lines,
        vec![
            (-2_500_000, GridLineKind::Beat),
            (-2_000_000, GridLineKind::Bar),
            (-1_500_000, GridLineKind::Beat),
            (-1_000_000, GridLineKind::Beat),
        ]
    );
}

#[test]
fn bindings_keep_lanes_as_the_window_moves() {
    let (track, tempo) = quarter_track(&[60, 62, 64, 65]);
    let mut viewer = TrackViewer::new(&track, tempo, options(2));

    viewer.set_time_us(0);
    let lanes: Vec<(usize, u8)> = viewer.shown_bindings().iter().map(|b| (b.slot, b.pitch)).collect();
    assert_eq!(lanes, vec![(0, 60), (1, 62)]);

    viewer.set_time_us(600_000);
    let lanes: Vec<(usize, u8)> = viewer.shown_bindings().iter().map(|b| (b.slot, b.pitch)).collect();
    assert_eq!(lanes, vec![(1, 62), (0, 64)]);
}

#[test]
fn toggles_disable_lines_and_bindings() {
    let (track, tempo) = quarter_track(&[60, 62]);
    let mut viewer = TrackViewer::new(
        &track,
        tempo,
        ViewerOptions {
            show_grid_lines: false,
            show_bindings: false,
            ..options(2)
        },
    );

    viewer.set_time_us(0);
    assert!(viewer.shown_lines().is_empty());
    assert!(viewer.shown_bindings().is_empty());
    assert_eq!(shown_pitches(&viewer), vec![60, 62]);
}
