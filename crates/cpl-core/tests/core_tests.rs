use cpl_core::{apply_ladder, digest, Script, Segment, Stage, ToneAction, ToneBudget};

#[test]
fn test_stage_sequence_round_trip() {
    let mut stage = Stage::Prep;
    let mut seen = vec![stage];
    while let Some(next) = stage.next() {
        seen.push(next);
        stage = next;
    }
    assert_eq!(seen, Stage::ORDER.to_vec());
}

#[test]
fn test_script_parses_minimal_segments() {
    let raw = r#"{
        "language": "en",
        "segments": [
            {"segment_id": "s1", "kind": "hook", "text": "Hello there", "target_duration_sec": 2.0},
            {"segment_id": "s2", "kind": "body", "slot": "b1", "text": "More words here"}
        ]
    }"#;
    let script: Script = serde_json::from_str(raw).unwrap();
    assert_eq!(script.segments.len(), 2);
    assert_eq!(script.segments[1].slot.as_deref(), Some("b1"));
    assert!(!script.segments[0].hints.needs_human);
}

#[test]
fn test_ladder_returns_new_list() {
    let segs = vec![
        Segment::new("a", "hook", "word word word word word").with_target(1.0),
        Segment::new("b", "body", "").with_target(1.0),
    ];
    let before = segs.clone();
    let report = apply_ladder(&segs, &ToneBudget::default(), "en");
    assert_eq!(segs, before);
    assert_eq!(report.segments[0].hints.action, Some(ToneAction::Escalate));
    assert!(report.segments[1].hints.needs_human);
    // only the over-budget segment is part of the repair request
    assert_eq!(report.repair.items.len(), 1);
}

#[test]
fn test_digest_is_deterministic() {
    let a = digest("voice", "same text", "model", 0.5, 0.0);
    let b = digest("voice", "same text", "model", 0.5, 0.0);
    assert_eq!(a, b);
}
