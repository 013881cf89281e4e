//! Streaming response orchestration
//!
//! Wires an incoming text-delta stream through the sentence parser, the
//! synthesis scheduler and the playback sequencer, and maps barge-in
//! signals from the speaker gate onto the configured interruption strategy.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};

use voice_bridge_config::{ChunkingStrategy, InterruptionStrategy, StreamingConfig};
use voice_bridge_core::{AudioSink, SynthesisBackend};

use crate::playback::{PlaybackEvent, PlaybackSequencer, DRAIN_KEEP_CHUNKS};
use crate::sentence::SentenceParser;
use crate::speaker::GateEvent;
use crate::synthesis::{SynthesisEvent, SynthesisScheduler};
use crate::PipelineError;

/// Capacity of the pipeline event broadcast channel
const EVENT_CAPACITY: usize = 128;

/// Events broadcast by the orchestrator
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A complete sentence left the parser
    SentenceReady { sequence: u64, text: String },
    /// Synthesized audio was handed to the playback queue
    AudioReady { sequence: u64 },
    /// A chunk finished playing
    PlaybackFinished {
        sequence: u64,
        queued_ms: u64,
        playback_ms: u64,
    },
    /// The response was interrupted by a barge-in
    Interrupted { strategy: InterruptionStrategy },
    /// A sentence was dropped after synthesis or playback failure
    Error { sequence: u64, message: String },
}

/// Glue between a text-delta source and the three streaming components
pub struct StreamingOrchestrator {
    parser: Mutex<SentenceParser>,
    scheduler: Arc<SynthesisScheduler>,
    sequencer: Arc<PlaybackSequencer>,
    config: StreamingConfig,
    session_id: String,
    voice_id: String,
    speed: f32,
    next_sequence: AtomicU64,
    running: AtomicBool,
    events: broadcast::Sender<PipelineEvent>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamingOrchestrator {
    /// Build an orchestrator over the given backends
    ///
    /// Only sentence chunking is supported; other strategies are accepted by
    /// configuration validation but have no pipeline here.
    pub fn new(
        synthesis: Arc<dyn SynthesisBackend>,
        sink: Arc<dyn AudioSink>,
        config: StreamingConfig,
        session_id: impl Into<String>,
        voice_id: impl Into<String>,
        speed: f32,
    ) -> Result<Self, PipelineError> {
        if config.chunking_strategy != ChunkingStrategy::Sentence {
            return Err(PipelineError::UnsupportedChunking(format!(
                "{:?}",
                config.chunking_strategy
            )));
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            parser: Mutex::new(SentenceParser::new(config.min_sentence_length)),
            scheduler: Arc::new(SynthesisScheduler::new(synthesis, config.clone())),
            sequencer: Arc::new(PlaybackSequencer::new(sink)),
            config,
            session_id: session_id.into(),
            voice_id: voice_id.into(),
            speed,
            next_sequence: AtomicU64::new(0),
            running: AtomicBool::new(false),
            events,
            pumps: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Start scheduler, sequencer and the event pumps between them
    ///
    /// May be called again after `stop` to begin the next response; the
    /// parser and the sequence counter start every run from zero so the
    /// reorder pump and the dispatcher agree on numbering.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Orchestrator already started");
            return;
        }
        self.parser.lock().reset();
        self.next_sequence.store(0, Ordering::SeqCst);

        let (synth_tx, synth_rx) = mpsc::unbounded_channel();
        let (play_tx, play_rx) = mpsc::unbounded_channel();
        self.scheduler.start(synth_tx);
        self.sequencer.start(play_tx);

        let mut pumps = self.pumps.lock();
        pumps.push(tokio::spawn(forward_synthesis(
            synth_rx,
            self.sequencer.clone(),
            self.events.clone(),
        )));
        pumps.push(tokio::spawn(forward_playback(play_rx, self.events.clone())));
    }

    /// Feed a text delta from the response source
    pub fn process_delta(&self, text: &str) {
        let sentences = self.parser.lock().add_chunk(text);
        for sentence in sentences {
            self.dispatch_sentence(sentence);
        }
    }

    /// Signal end-of-stream; flushes any residual text as a final sentence
    pub fn finish_stream(&self) {
        let residual = self.parser.lock().finalize();
        if !residual.is_empty() {
            self.dispatch_sentence(residual);
        }
    }

    /// Consume an entire text-delta stream
    pub async fn speak_stream<S>(&self, mut stream: S)
    where
        S: Stream<Item = String> + Unpin,
    {
        while let Some(delta) = stream.next().await {
            self.process_delta(&delta);
        }
        self.finish_stream();
    }

    /// Apply the configured interruption strategy to playback and synthesis
    ///
    /// Immediate and graceful interruptions leave the sequencer refusing
    /// further work for the rest of this run; call `stop` and `start` before
    /// speaking the next response.
    pub async fn interrupt(&self) {
        let strategy = self.config.interruption_strategy;
        tracing::info!(?strategy, session_id = %self.session_id, "Response interrupted");

        self.sequencer.stop_playback(strategy).await;
        match strategy {
            InterruptionStrategy::Immediate | InterruptionStrategy::Graceful => {
                self.scheduler.cancel_all();
            }
            InterruptionStrategy::Drain => {
                self.scheduler.cancel_after(DRAIN_KEEP_CHUNKS);
            }
        }

        let _ = self.events.send(PipelineEvent::Interrupted { strategy });
    }

    /// React to speaker-gate events; a new admission while this response is
    /// still playing is a barge-in
    pub fn watch_gate(self: &Arc<Self>, mut gate_rx: broadcast::Receiver<GateEvent>) {
        let orchestrator = self.clone();
        self.pumps.lock().push(tokio::spawn(async move {
            loop {
                match gate_rx.recv().await {
                    Ok(GateEvent::SpeakerStarted { speaker_id, .. }) => {
                        tracing::debug!(%speaker_id, "Barge-in from speaker gate");
                        orchestrator.interrupt().await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Gate event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Shut everything down in dependency order
    pub async fn stop(&self) {
        self.scheduler.stop().await;
        self.sequencer.stop().await;
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Scheduler statistics
    pub fn scheduler_stats(&self) -> crate::synthesis::SchedulerStats {
        self.scheduler.stats()
    }

    /// Sequencer statistics
    pub fn playback_stats(&self) -> crate::playback::PlaybackStats {
        self.sequencer.stats()
    }

    fn dispatch_sentence(&self, sentence: String) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(sequence, text = %sentence, "Sentence ready for synthesis");
        let _ = self.events.send(PipelineEvent::SentenceReady {
            sequence,
            text: sentence.clone(),
        });
        self.scheduler.enqueue_sentence(
            sentence,
            &self.session_id,
            &self.voice_id,
            self.speed,
            sequence,
            Default::default(),
        );
    }
}

/// Pump synthesis completions into playback, restoring sentence order
///
/// Synthesis may complete out of order under the concurrency bound, but the
/// sequencer plays whatever it is given FIFO. Out-of-order completions are
/// therefore held back until every earlier sequence has either arrived or
/// failed, so the spoken output is always in sentence order.
async fn forward_synthesis(
    mut rx: mpsc::UnboundedReceiver<SynthesisEvent>,
    sequencer: Arc<PlaybackSequencer>,
    events: broadcast::Sender<PipelineEvent>,
) {
    let mut next_sequence: u64 = 0;
    let mut held: BTreeMap<u64, Option<(Vec<u8>, voice_bridge_core::CorrelationContext)>> =
        BTreeMap::new();

    while let Some(event) = rx.recv().await {
        match event {
            SynthesisEvent::Completed { audio, ctx } => {
                held.insert(ctx.sequence, Some((audio, ctx)));
            }
            SynthesisEvent::Failed { error, ctx, .. } => {
                let _ = events.send(PipelineEvent::Error {
                    sequence: ctx.sequence,
                    message: error,
                });
                // A failed sentence must not hold back the ones behind it
                held.insert(ctx.sequence, None);
            }
        }

        while let Some(entry) = held.remove(&next_sequence) {
            if let Some((audio, ctx)) = entry {
                let sequence = ctx.sequence;
                if sequencer.enqueue_audio(audio, ctx).is_some() {
                    let _ = events.send(PipelineEvent::AudioReady { sequence });
                }
            }
            next_sequence += 1;
        }
    }
}

/// Pump playback events out to subscribers
async fn forward_playback(
    mut rx: mpsc::UnboundedReceiver<PlaybackEvent>,
    events: broadcast::Sender<PipelineEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            PlaybackEvent::Finished {
                ctx,
                queued_ms,
                playback_ms,
            } => {
                let _ = events.send(PipelineEvent::PlaybackFinished {
                    sequence: ctx.sequence,
                    queued_ms,
                    playback_ms,
                });
            }
            PlaybackEvent::Failed { ctx, error } => {
                let _ = events.send(PipelineEvent::Error {
                    sequence: ctx.sequence,
                    message: error,
                });
            }
            PlaybackEvent::Interrupted { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use std::time::{Duration, Instant};
    use tokio::time::timeout;
    use voice_bridge_core::BackendError;

    /// Synthesis backend with per-call latency keyed on text, to force
    /// out-of-order completion
    struct SlowSynth {
        slow_text: Option<String>,
    }

    #[async_trait]
    impl SynthesisBackend for SlowSynth {
        async fn synthesize(
            &self,
            text: &str,
            _voice_id: &str,
            _speed: f32,
        ) -> Result<Vec<u8>, BackendError> {
            let delay = if self.slow_text.as_deref() == Some(text) {
                Duration::from_millis(60)
            } else {
                Duration::from_millis(5)
            };
            tokio::time::sleep(delay).await;
            Ok(text.as_bytes().to_vec())
        }
    }

    struct RecordingSink {
        played: PlMutex<Vec<String>>,
        playing_until: PlMutex<Option<Instant>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                played: PlMutex::new(Vec::new()),
                playing_until: PlMutex::new(None),
            }
        }
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
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
            *self.playing_until.lock() = Some(Instant::now() + Duration::from_millis(10));
            Ok(())
        }

        async fn stop(&self) -> Result<(), BackendError> {
            *self.playing_until.lock() = None;
            Ok(())
        }
    }

    fn orchestrator(
        synth: Arc<dyn SynthesisBackend>,
        sink: Arc<RecordingSink>,
        config: StreamingConfig,
    ) -> StreamingOrchestrator {
        StreamingOrchestrator::new(synth, sink, config, "session-1", "voice-1", 1.0).unwrap()
    }

    async fn wait_played(sink: &RecordingSink, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while sink.played.lock().len() < count {
            assert!(Instant::now() < deadline, "playback never reached {count}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_out_of_order_completion_plays_in_order() {
        let synth = Arc::new(SlowSynth {
            slow_text: Some("First sentence here.".to_string()),
        });
        let sink = Arc::new(RecordingSink::new());
        let mut config = StreamingConfig::default();
        config.max_concurrent_synthesis = 3;

        let orch = orchestrator(synth, sink.clone(), config);
        orch.start();

        orch.process_delta("First sentence here. Second sentence here. Third sentence here.");
        orch.finish_stream();

        wait_played(&sink, 3).await;
        assert_eq!(
            sink.played.lock().clone(),
            vec![
                "First sentence here.",
                "Second sentence here.",
                "Third sentence here."
            ]
        );
        orch.stop().await;
    }

    #[tokio::test]
    async fn test_failed_sentence_is_skipped_not_blocking() {
        struct FailSecond;

        #[async_trait]
        impl SynthesisBackend for FailSecond {
            async fn synthesize(
                &self,
                text: &str,
                _voice_id: &str,
                _speed: f32,
            ) -> Result<Vec<u8>, BackendError> {
                if text.starts_with("Second") {
                    return Err(BackendError::Unavailable("tts down".into()));
                }
                Ok(text.as_bytes().to_vec())
            }
        }

        let sink = Arc::new(RecordingSink::new());
        let orch = orchestrator(Arc::new(FailSecond), sink.clone(), StreamingConfig::default());
        let mut events = orch.subscribe();
        orch.start();

        orch.process_delta("First sentence here. Second sentence here. Third sentence here.");
        orch.finish_stream();

        wait_played(&sink, 2).await;
        assert_eq!(
            sink.played.lock().clone(),
            vec!["First sentence here.", "Third sentence here."]
        );

        let mut saw_error = false;
        while let Ok(Ok(event)) = timeout(Duration::from_millis(200), events.recv()).await {
            if let PipelineEvent::Error { sequence, .. } = event {
                assert_eq!(sequence, 1);
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
        orch.stop().await;
    }

    #[tokio::test]
    async fn test_finish_stream_flushes_residual() {
        let synth = Arc::new(SlowSynth { slow_text: None });
        let sink = Arc::new(RecordingSink::new());
        let mut config = StreamingConfig::default();
        config.min_sentence_length = 10;

        let orch = orchestrator(synth, sink.clone(), config);
        orch.start();

        for delta in ["Hello! ", "How ", "are ", "you? ", "Great!"] {
            orch.process_delta(delta);
        }
        orch.finish_stream();

        wait_played(&sink, 2).await;
        assert_eq!(
            sink.played.lock().clone(),
            vec!["Hello! How are you?", "Great!"]
        );
        orch.stop().await;
    }

    #[tokio::test]
    async fn test_stop_start_cycle_plays_next_response() {
        let synth = Arc::new(SlowSynth { slow_text: None });
        let sink = Arc::new(RecordingSink::new());
        let orch = orchestrator(synth, sink.clone(), StreamingConfig::default());

        orch.start();
        orch.process_delta("First turn sentence.");
        orch.finish_stream();
        wait_played(&sink, 1).await;
        orch.stop().await;

        // The next turn must play even though the previous one already
        // consumed sequence numbers
        orch.start();
        orch.process_delta("Second turn sentence.");
        orch.finish_stream();
        wait_played(&sink, 2).await;

        assert_eq!(
            sink.played.lock().clone(),
            vec!["First turn sentence.", "Second turn sentence."]
        );
        orch.stop().await;
    }

    #[tokio::test]
    async fn test_unsupported_chunking_rejected() {
        let synth = Arc::new(SlowSynth { slow_text: None });
        let sink = Arc::new(RecordingSink::new());
        let mut config = StreamingConfig::default();
        config.chunking_strategy = ChunkingStrategy::Word;

        let result =
            StreamingOrchestrator::new(synth, sink, config, "session-1", "voice-1", 1.0);
        assert!(matches!(
            result,
            Err(PipelineError::UnsupportedChunking(_))
        ));
    }
}
