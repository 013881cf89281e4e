//! Integration tests for the streaming pipeline
//! (text stream -> sentences -> synthesis -> playback, gated by the speaker lock)

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use voice_bridge_config::{InterruptionStrategy, SpeakerConfig, StreamingConfig};
use voice_bridge_core::{
    AudioSink, BackendError, SynthesisBackend, TranscriptionBackend, TranscriptionSession,
};
use voice_bridge_pipeline::{
    GateEvent, PipelineEvent, SpeakerGate, StreamingOrchestrator, DRAIN_KEEP_CHUNKS,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_bridge=debug".into()),
        )
        .try_init();
}

struct TestSynth {
    delay: Duration,
}

#[async_trait]
impl SynthesisBackend for TestSynth {
    async fn synthesize(
        &self,
        text: &str,
        _voice_id: &str,
        _speed: f32,
    ) -> Result<Vec<u8>, BackendError> {
        tokio::time::sleep(self.delay).await;
        Ok(text.as_bytes().to_vec())
    }
}

struct TestSink {
    played: Mutex<Vec<String>>,
    playing_until: Mutex<Option<Instant>>,
    play_duration: Duration,
}

impl TestSink {
    fn new(play_duration: Duration) -> Self {
        Self {
            played: Mutex::new(Vec::new()),
            playing_until: Mutex::new(None),
            play_duration,
        }
    }
}

#[async_trait]
impl AudioSink for TestSink {
    fn is_connected(&self) -> bool {
        true
    }

    fn is_playing(&self) -> bool {
        self.playing_until
            .lock()
            .is_some_and(|until| Instant::now() < until)
    }

    async fn play(&self, audio: &[u8]) -> Result<(), BackendError> {
        self.played
            .lock()
            .push(String::from_utf8_lossy(audio).to_string());
        *self.playing_until.lock() = Some(Instant::now() + self.play_duration);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BackendError> {
        *self.playing_until.lock() = None;
        Ok(())
    }
}

struct TestSession;

#[async_trait]
impl TranscriptionSession for TestSession {
    async fn send_audio(&self, _chunk: &[u8]) -> Result<(), BackendError> {
        Ok(())
    }

    async fn finalize(&self) -> Result<String, BackendError> {
        Ok("what is the weather".to_string())
    }

    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

struct TestStt;

#[async_trait]
impl TranscriptionBackend for TestStt {
    async fn open_session(
        &self,
        _speaker_id: &str,
    ) -> Result<Arc<dyn TranscriptionSession>, BackendError> {
        Ok(Arc::new(TestSession))
    }
}

fn streaming_config(strategy: InterruptionStrategy) -> StreamingConfig {
    StreamingConfig {
        min_sentence_length: 10,
        interruption_strategy: strategy,
        ..StreamingConfig::default()
    }
}

/// Streaming text in chunks produces ordered, gap-free playback with the
/// residual flushed at end-of-stream
#[tokio::test]
async fn test_streamed_response_plays_in_sentence_order() {
    init_tracing();

    let sink = Arc::new(TestSink::new(Duration::from_millis(10)));
    let orch = StreamingOrchestrator::new(
        Arc::new(TestSynth {
            delay: Duration::from_millis(5),
        }),
        sink.clone(),
        streaming_config(InterruptionStrategy::Graceful),
        "session-1",
        "voice-1",
        1.0,
    )
    .unwrap();
    let mut events = orch.subscribe();
    orch.start();

    for chunk in ["Hello! ", "How ", "are ", "you? ", "Great!"] {
        orch.process_delta(chunk);
    }
    orch.finish_stream();

    let deadline = Instant::now() + Duration::from_secs(3);
    while sink.played.lock().len() < 2 {
        assert!(Instant::now() < deadline, "playback incomplete");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(
        sink.played.lock().clone(),
        vec!["Hello! How are you?", "Great!"]
    );

    // At least two SentenceReady events were broadcast
    let mut sentences = 0;
    while let Ok(Ok(event)) = timeout(Duration::from_millis(100), events.recv()).await {
        if matches!(event, PipelineEvent::SentenceReady { .. }) {
            sentences += 1;
        }
    }
    assert!(sentences >= 2);
    orch.stop().await;
}

/// A new speaker admission while the agent is talking triggers the drain
/// interruption: at most DRAIN_KEEP_CHUNKS pending chunks survive
#[tokio::test]
async fn test_barge_in_applies_drain_strategy() {
    init_tracing();

    let sink = Arc::new(TestSink::new(Duration::from_millis(150)));
    let orch = Arc::new(
        StreamingOrchestrator::new(
            Arc::new(TestSynth {
                delay: Duration::from_millis(1),
            }),
            sink.clone(),
            streaming_config(InterruptionStrategy::Drain),
            "session-1",
            "voice-1",
            1.0,
        )
        .unwrap(),
    );
    orch.start();

    let gate = SpeakerGate::new(
        Arc::new(TestStt),
        SpeakerConfig {
            silence_threshold_ms: 500,
            silence_poll_ms: 50,
            max_utterance_ms: 5_000,
            ..SpeakerConfig::default()
        },
    );
    orch.watch_gate(gate.subscribe());

    // Long response: many sentences pile up behind a slow sink
    let text: String = (0..8)
        .map(|i| format!("This is sentence number {i}. "))
        .collect();
    orch.process_delta(&text);
    orch.finish_stream();

    // Wait until a healthy backlog exists
    let deadline = Instant::now() + Duration::from_secs(2);
    while orch.playback_stats().queued_depth < 3 {
        assert!(Instant::now() < deadline, "backlog never formed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let before = orch.playback_stats().queued_depth;

    // Barge-in
    let (_audio_tx, audio_rx) = mpsc::channel(4);
    assert!(gate
        .on_speaking_start("spk-2", "Interrupter", audio_rx)
        .await
        .unwrap());

    // The gate broadcast propagates to the orchestrator asynchronously
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let depth = orch.playback_stats().queued_depth;
        if depth <= DRAIN_KEEP_CHUNKS {
            assert!(depth < before);
            break;
        }
        assert!(Instant::now() < deadline, "drain never applied");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    gate.force_unlock();
    orch.stop().await;
}

/// Finalized transcripts reach gate subscribers and the lock returns to idle
#[tokio::test]
async fn test_gate_finalize_reaches_subscribers() {
    init_tracing();

    let gate = SpeakerGate::new(
        Arc::new(TestStt),
        SpeakerConfig {
            silence_threshold_ms: 100,
            silence_poll_ms: 20,
            max_utterance_ms: 5_000,
            ..SpeakerConfig::default()
        },
    );
    let mut events = gate.subscribe();

    let (audio_tx, audio_rx) = mpsc::channel(8);
    assert!(gate.on_speaking_start("spk-1", "Alice", audio_rx).await.unwrap());
    audio_tx.send(vec![0u8; 160]).await.unwrap();
    drop(audio_tx);

    let mut transcript = None;
    let deadline = Instant::now() + Duration::from_secs(2);
    while transcript.is_none() {
        assert!(Instant::now() < deadline, "no transcript event");
        if let Ok(Ok(GateEvent::TranscriptFinal { transcript: t, .. })) =
            timeout(Duration::from_millis(200), events.recv()).await
        {
            transcript = Some(t);
        }
    }

    assert_eq!(transcript.unwrap().text, "what is the weather");
    assert!(!gate.is_locked());
}
