//! Record → replay round trip: the player must reproduce the recorded
//! event sequence exactly, in order, with offsets intact.

use hearsay_events::{
    ActionEvent, AsrEvent, DetectedIntent, IntentEvent, IntentSubtype, IntentType, SessionEvent,
    SessionPayload, UtteranceEvent, UtteranceKind,
};
use hearsay_session::{SessionPlayer, SessionRecorder};
use uuid::Uuid;

fn sample_session() -> Vec<SessionPayload> {
    let utterance_id = Uuid::new_v4();
    let intent = DetectedIntent {
        intent_type: IntentType::Imperative,
        subtype: IntentSubtype::Stop,
        confidence: 0.9,
        source_text: "Stop.".into(),
        original_text: "Stop.".into(),
        utterance_id: Some(utterance_id),
    };
    vec![
        SessionPayload::Asr(AsrEvent::partial("a1", "sto", 100)),
        SessionPayload::Asr(AsrEvent::final_("a2", "Stop.", 400)),
        SessionPayload::Utterance(UtteranceEvent {
            id: utterance_id,
            kind: UtteranceKind::Open,
            stable_text: "sto".into(),
            unstable_text: String::new(),
            duration_ms: 0,
            asr_final_offsets: vec![],
            offset_ms: 100,
        }),
        SessionPayload::Utterance(UtteranceEvent {
            id: utterance_id,
            kind: UtteranceKind::Final,
            stable_text: "Stop.".into(),
            unstable_text: String::new(),
            duration_ms: 700,
            asr_final_offsets: vec![400],
            offset_ms: 800,
        }),
        SessionPayload::Intent(IntentEvent {
            intent: intent.clone(),
            utterance_id,
            is_candidate: false,
            transcript_char_start: None,
            transcript_char_end: None,
            offset_ms: 850,
        }),
        SessionPayload::Action(ActionEvent {
            action: IntentSubtype::Stop,
            intent,
            utterance_id,
            offset_ms: 900,
            was_debounced: false,
        }),
    ]
}

#[test]
fn record_then_replay_reproduces_the_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.jsonl");

    let mut recorder = SessionRecorder::create(&path, false).unwrap();
    for payload in sample_session() {
        recorder.record(SessionEvent::now(payload));
    }
    recorder.finalize().unwrap();

    let player = SessionPlayer::load(&path).unwrap();
    assert_eq!(player.skipped(), 0);

    let mut replayed: Vec<(String, i64)> = Vec::new();
    player.replay_headless(|event| replayed.push((event.kind().to_string(), event.offset_ms)));

    assert_eq!(
        replayed,
        vec![
            ("Asr".to_string(), 100),
            ("Asr".to_string(), 400),
            ("Utterance".to_string(), 100),
            ("Utterance".to_string(), 800),
            ("Intent".to_string(), 850),
            ("Action".to_string(), 900),
        ]
    );

    // Downstream event identity survives the round trip.
    let SessionPayload::Intent(intent_event) = &player.events()[4].payload else {
        panic!("expected intent event");
    };
    assert!(!intent_event.is_candidate);
    assert_eq!(intent_event.intent.subtype, IntentSubtype::Stop);
    // The recorder attributed the intent into the running transcript.
    assert_eq!(intent_event.transcript_char_start, Some(0));
    assert_eq!(intent_event.transcript_char_end, Some(5));

    let SessionPayload::Action(action) = &player.events()[5].payload else {
        panic!("expected action event");
    };
    assert!(!action.was_debounced);
    assert_eq!(action.action, IntentSubtype::Stop);
}

#[test]
fn report_from_replayed_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.jsonl");

    let mut recorder = SessionRecorder::create(&path, false).unwrap();
    for payload in sample_session() {
        recorder.record(SessionEvent::now(payload));
    }
    recorder.finalize().unwrap();

    let report = SessionPlayer::load(&path).unwrap().report();
    assert_eq!(report.total_events, 6);
    assert_eq!(report.utterances_finalized, 1);
    assert_eq!(report.final_intents, 1);
    assert_eq!(report.actions_fired, 1);
    assert_eq!(report.intents_by_type["imperative"], 1);
    assert_eq!(report.duration_ms, 800);
}
