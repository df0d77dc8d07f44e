//! Turn coordinator integration tests
//!
//! Scripted model and speech fixtures driven through the full pipeline

use std::sync::Arc;
use std::time::Duration;

use jarvis_voice::config::PipelineConfig;
use jarvis_voice::{
    EventChannel, Phase, SpeechSynthesizer, ToolRegistry, TurnCoordinator, TurnEngine, TurnEvent,
};

mod common;

use common::{
    RecordingDevice, ScriptedModel, ScriptedSpeech, collect_until_ended, eventually, final_text,
    wait_for_turn_end,
};

fn pipeline(
    model: Arc<ScriptedModel>,
    speech: Arc<ScriptedSpeech>,
    device: &RecordingDevice,
) -> (
    TurnCoordinator,
    tokio::sync::mpsc::UnboundedReceiver<TurnEvent>,
) {
    let (observer, events) = EventChannel::new();
    let speech: Arc<dyn SpeechSynthesizer> = speech;
    let coordinator = TurnCoordinator::start(
        TurnEngine::new(model, ToolRegistry::new()),
        Some(speech),
        device.sink(),
        Arc::new(observer),
        PipelineConfig {
            queue_capacity: 4,
            shutdown_timeout: Duration::from_secs(1),
        },
    );
    (coordinator, events)
}

#[tokio::test]
async fn test_spoken_turn_plays_every_frame() {
    let device = RecordingDevice::new();
    let speech = ScriptedSpeech::new(5);
    let (coordinator, mut events) = pipeline(
        ScriptedModel::answers(&["Good evening, Sir."]),
        Arc::clone(&speech),
        &device,
    );

    let turn = coordinator.submit("hello").unwrap();
    let text = wait_for_turn_end(&mut events, turn).await;

    assert_eq!(text.as_deref(), Some("Good evening, Sir."));
    assert_eq!(device.rendered(), vec![1; 5]);
    assert_eq!(speech.sessions(), 1);
    assert_eq!(coordinator.state(), Phase::Idle);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_barge_in_discards_previous_audio() {
    let device = RecordingDevice::gated();
    // First session hands over three frames then never finishes
    let (coordinator, mut events) = pipeline(
        ScriptedModel::answers(&["Certainly, Sir.", "As you wish."]),
        ScriptedSpeech::stalling(3, &[1]),
        &device,
    );
    let sink = Arc::clone(coordinator.sink());

    let first = coordinator.submit("tell me a long story").unwrap();

    // One frame is stuck in the device, two more wait behind it
    eventually(|| sink.pending() == 3).await;
    assert_eq!(coordinator.state(), Phase::Speaking);

    let second = coordinator.submit("never mind").unwrap();
    device.open_gate();

    let seen = collect_until_ended(&mut events, &[first, second]).await;
    assert_eq!(final_text(&seen, first), Some("Certainly, Sir."));
    assert_eq!(final_text(&seen, second), Some("As you wish."));

    let rendered = device.rendered();
    let stale = rendered.iter().filter(|&&m| m == 1).count();
    assert!(stale <= 1, "stale frames played: {rendered:?}");
    assert_eq!(&rendered[stale..], &[2, 2, 2]);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_turns_queue_behind_each_other() {
    let device = RecordingDevice::new();
    let (coordinator, mut events) = pipeline(
        ScriptedModel::answers(&["one", "two", "three"]),
        ScriptedSpeech::new(0),
        &device,
    );

    let turns: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|text| coordinator.submit(*text).unwrap())
        .collect();

    let seen = collect_until_ended(&mut events, &turns).await;
    let answers: Vec<_> = turns.iter().map(|&turn| final_text(&seen, turn)).collect();
    assert_eq!(answers, vec![Some("one"), Some("two"), Some("three")]);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_with_stalled_speech_is_bounded() {
    let device = RecordingDevice::new();
    let (coordinator, mut events) = pipeline(
        ScriptedModel::answers(&["Working on it, Sir."]),
        ScriptedSpeech::stalling(1, &[1]),
        &device,
    );

    coordinator.submit("hello").unwrap();
    // Final text arrives, speech never ends
    assert!(matches!(events.recv().await, Some(TurnEvent::FinalText { .. })));

    let started = std::time::Instant::now();
    coordinator.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(coordinator.submit("again").is_err());
}
