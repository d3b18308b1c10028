use face_lock::{
    ActionKind, DetectionRecord, EnrolledIdentity, FaceLockConfig, LockController, LockState,
    MemorySink, Point, Transition,
};

// 2026-01-01 00:00:00 UTC
const EPOCH: f64 = 1_767_225_600.0;

fn landmarks_at(center: Point) -> Vec<Point> {
    let Point { x, y } = center;
    vec![
        Point::new(x - 20.0, y - 20.0),
        Point::new(x + 20.0, y - 20.0),
        Point::new(x, y),
        Point::new(x - 15.0, y + 20.0),
        Point::new(x + 15.0, y + 20.0),
    ]
}

fn record(x: f32, y: f32, similarity: f32, t: f64) -> DetectionRecord {
    let center = Point::new(x, y);
    DetectionRecord::scored(center, landmarks_at(center), similarity, EPOCH + t)
}

fn new_controller(name: &str) -> (LockController<MemorySink>, MemorySink) {
    let sink = MemorySink::new();
    let controller = LockController::new(
        FaceLockConfig::default(),
        EnrolledIdentity::named(name),
        sink.clone(),
    )
    .unwrap();
    (controller, sink)
}

#[test]
fn scenario_a_strong_match_locks_and_opens_session() {
    let (mut controller, sink) = new_controller("alice");
    let outcome = controller.process_frame(&[record(100.0, 100.0, 0.70, 0.0)], EPOCH);

    assert_eq!(outcome.state, LockState::Locked);
    assert_eq!(controller.status().identity.as_deref(), Some("alice"));
    let files = sink.file_names();
    assert_eq!(files, vec!["alice_history_20260101000000.txt".to_string()]);
    assert_eq!(sink.lines(&files[0])[0], "Face Locking History for: alice");
}

#[test]
fn scenario_b_single_movement_event() {
    let (mut controller, _) = new_controller("alice");
    controller.process_frame(&[record(100.0, 100.0, 0.9, 0.0)], EPOCH);
    let outcome = controller.process_frame(&[record(140.0, 100.0, 0.9, 0.1)], EPOCH + 0.1);

    assert_eq!(outcome.events.len(), 1);
    let event = &outcome.events[0];
    assert_eq!(event.kind, ActionKind::Movement);
    assert_eq!(event.magnitude, 40.0);
    assert_eq!(event.description, "moved right");
}

#[test]
fn scenario_c_timeout_releases_and_writes_footer() {
    let (mut controller, sink) = new_controller("alice");
    controller.process_frame(&[record(100.0, 100.0, 0.9, 9.9)], EPOCH + 9.9);
    controller.process_frame(&[record(140.0, 100.0, 0.9, 10.0)], EPOCH + 10.0);

    for t in [11.0, 12.0, 13.0] {
        let outcome = controller.process_frame(&[], EPOCH + t);
        assert_eq!(outcome.state, LockState::Locked);
    }
    let outcome = controller.process_frame(&[], EPOCH + 13.01);
    assert_eq!(outcome.state, LockState::Unlocked);
    assert!(matches!(outcome.transition, Some(Transition::Released { .. })));

    let session = outcome.closed_session.unwrap();
    assert_eq!(session.counts.total(), 1);
    assert_eq!(session.counts.movement, 1);

    let lines = sink.lines(&session.file_name);
    assert!(lines.contains(&"Total actions recorded: 1".to_string()));
    assert_eq!(
        &lines[lines.len() - 3..],
        ["  movement: 1", "  blink: 0", "  smile: 0"]
    );
    assert_eq!(
        lines.iter().filter(|l| l.starts_with("Session ended")).count(),
        1
    );
}

#[test]
fn scenario_d_blink_sequence_yields_one_event() {
    let (mut controller, _) = new_controller("alice");
    let open = |t: f64, ear: f32| {
        let mut r = record(100.0, 100.0, 0.9, t);
        let h = ear * 10.0 / 2.0;
        let eye = vec![
            Point::new(0.0, 0.0),
            Point::new(3.0, -h),
            Point::new(7.0, -h),
            Point::new(10.0, 0.0),
            Point::new(7.0, h),
            Point::new(3.0, h),
        ];
        r.eye_contour = Some(face_lock::types::EyeContour {
            left: eye.clone(),
            right: eye,
        });
        r
    };

    let mut blinks = 0;
    for (i, ear) in [0.30, 0.20, 0.32].into_iter().enumerate() {
        let t = i as f64 * 0.05;
        let outcome = controller.process_frame(&[open(t, ear)], EPOCH + t);
        blinks += outcome
            .events
            .iter()
            .filter(|e| e.kind == ActionKind::Blink)
            .count();
    }
    assert_eq!(blinks, 1);
}

#[test]
fn replay_is_deterministic() {
    let frames: Vec<(Vec<DetectionRecord>, f64)> = vec![
        (vec![record(300.0, 100.0, 0.5, 0.0)], 0.0),
        (
            vec![record(100.0, 100.0, 0.8, 0.1), record(400.0, 100.0, 0.8, 0.1)],
            0.1,
        ),
        (vec![record(150.0, 100.0, 0.6, 0.2)], 0.2),
        (vec![record(155.0, 100.0, 0.3, 0.3)], 0.3),
        (vec![record(90.0, 100.0, 0.7, 0.4)], 0.4),
        (vec![], 5.0),
        (vec![record(400.0, 100.0, 0.9, 5.5)], 5.5),
        (vec![record(440.0, 100.0, 0.9, 5.6)], 5.6),
    ];

    let run = || {
        let (mut controller, sink) = new_controller("alice");
        for (batch, t) in &frames {
            controller.process_frame(batch, EPOCH + t);
        }
        controller.shutdown(EPOCH + 6.0);
        sink.file_names()
            .into_iter()
            .map(|name| (name.clone(), sink.lines(&name)))
            .collect::<Vec<_>>()
    };

    let first = run();
    let second = run();
    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[test]
fn sequence_numbers_strictly_increase() {
    let (mut controller, _) = new_controller("alice");
    let mut sequences = Vec::new();
    let mut x = 100.0;
    for i in 0..12 {
        let t = i as f64 * 0.1;
        // Alternate big jumps and pauses so movement keeps re-arming.
        x += if i % 2 == 0 { 40.0 } else { 1.0 };
        let outcome = controller.process_frame(&[record(x, 100.0, 0.9, t)], EPOCH + t);
        sequences.extend(outcome.events.iter().map(|e| e.sequence));
    }
    assert!(sequences.len() > 2);
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(sequences[0], 1);
}

#[test]
fn target_never_changes_while_locked() {
    let (mut controller, _) = new_controller("alice");
    controller.process_frame(&[record(100.0, 100.0, 0.9, 0.0)], EPOCH);
    assert!(
        controller
            .request_switch(EnrolledIdentity::named("bob"))
            .is_err()
    );
    controller.process_frame(&[record(105.0, 100.0, 0.9, 0.1)], EPOCH + 0.1);
    assert_eq!(controller.status().identity.as_deref(), Some("alice"));
}
