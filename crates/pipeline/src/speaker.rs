//! Single-speaker admission control and utterance finalization
//!
//! At most one speaker may be transcribed at a time. Admission acquires the
//! lock, streams the speaker's audio to the transcription backend, and arms
//! two watchdogs racing over one stop channel: a silence poller and a hard
//! utterance deadline. Whichever fires first finalizes the utterance; the
//! lock is released on every path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use voice_bridge_config::SpeakerConfig;
use voice_bridge_core::{
    Transcript, TranscriptForwarder, TranscriptionBackend, TranscriptionSession,
};

use crate::PipelineError;

/// Capacity of the gate event broadcast channel
const EVENT_CAPACITY: usize = 64;

/// Why an utterance was finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// No audio for at least the silence threshold
    Silence,
    /// Utterance hit the hard deadline
    Timeout,
    /// Emergency release
    Forced,
}

/// Snapshot of the active speaker lock
#[derive(Debug, Clone)]
pub struct SpeakerLock {
    pub speaker_id: String,
    pub display_name: String,
    pub locked_at: Instant,
    pub last_audio_at: Instant,
}

/// Events broadcast to downstream listeners
///
/// Listeners are best-effort; a lagging or dropped receiver never affects
/// the gate's own state machine.
#[derive(Debug, Clone)]
pub enum GateEvent {
    SpeakerStarted {
        speaker_id: String,
        display_name: String,
    },
    SpeakerStopped {
        speaker_id: String,
        reason: FinalizeReason,
    },
    TranscriptPartial {
        speaker_id: String,
        text: String,
    },
    TranscriptFinal {
        transcript: Transcript,
        reason: FinalizeReason,
    },
}

struct LockState {
    speaker_id: String,
    display_name: String,
    locked_at: Instant,
    last_audio: Arc<Mutex<Instant>>,
    session: Arc<dyn TranscriptionSession>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Admission control for one voice session
pub struct SpeakerGate {
    stt: Arc<dyn TranscriptionBackend>,
    forwarder: Option<Arc<dyn TranscriptForwarder>>,
    config: SpeakerConfig,
    lock: Arc<Mutex<Option<LockState>>>,
    events: broadcast::Sender<GateEvent>,
}

impl SpeakerGate {
    /// Create a gate over a transcription backend
    pub fn new(stt: Arc<dyn TranscriptionBackend>, config: SpeakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            stt,
            forwarder: None,
            config,
            lock: Arc::new(Mutex::new(None)),
            events,
        }
    }

    /// Forward finalized transcripts downstream (e.g. a response webhook)
    pub fn with_forwarder(mut self, forwarder: Arc<dyn TranscriptForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// Subscribe to gate events
    pub fn subscribe(&self) -> broadcast::Receiver<GateEvent> {
        self.events.subscribe()
    }

    /// Whether a speaker currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.lock.lock().is_some()
    }

    /// Snapshot of the current lock, if held
    pub fn current_lock(&self) -> Option<SpeakerLock> {
        self.lock.lock().as_ref().map(|state| SpeakerLock {
            speaker_id: state.speaker_id.clone(),
            display_name: state.display_name.clone(),
            locked_at: state.locked_at,
            last_audio_at: *state.last_audio.lock(),
        })
    }

    /// Admit a speaker and begin transcribing their audio stream
    ///
    /// Returns `Ok(false)` when another speaker already holds the lock; the
    /// second speaker is simply ignored, not queued. A transcription
    /// connection failure aborts the admission and releases the lock.
    pub async fn on_speaking_start(
        &self,
        speaker_id: &str,
        display_name: &str,
        mut audio_rx: mpsc::Receiver<Vec<u8>>,
    ) -> Result<bool, PipelineError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let last_audio = Arc::new(Mutex::new(Instant::now()));

        {
            let mut lock = self.lock.lock();
            if let Some(active) = lock.as_ref() {
                tracing::debug!(
                    speaker_id,
                    active = %active.speaker_id,
                    "Speaker rejected, lock held"
                );
                return Ok(false);
            }
            // Reserve the lock before the async connect so a racing speaker
            // cannot slip in; the session is attached below
            *lock = Some(LockState {
                speaker_id: speaker_id.to_string(),
                display_name: display_name.to_string(),
                locked_at: Instant::now(),
                last_audio: last_audio.clone(),
                session: Arc::new(NullSession),
                stop_tx: stop_tx.clone(),
                tasks: Vec::new(),
            });
        }

        // Fail closed: no speaker stays locked behind a dead STT connection
        let session = match self.stt.open_session(speaker_id).await {
            Ok(session) => session,
            Err(e) => {
                *self.lock.lock() = None;
                tracing::warn!(speaker_id, error = %e, "STT connect failed, admission aborted");
                return Err(PipelineError::Transcription(e.to_string()));
            }
        };

        if let Some(state) = self.lock.lock().as_mut() {
            state.session = session.clone();
        }

        tracing::info!(speaker_id, display_name, "Speaker admitted");
        let _ = self.events.send(GateEvent::SpeakerStarted {
            speaker_id: speaker_id.to_string(),
            display_name: display_name.to_string(),
        });

        // Audio pump: every received frame feeds the transcriber and counts
        // as observed audio for the silence monitor
        let pump = {
            let session = session.clone();
            let last_audio = last_audio.clone();
            let mut stop_rx = stop_rx.clone();
            let speaker = speaker_id.to_string();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        frame = audio_rx.recv() => {
                            let Some(frame) = frame else { break };
                            *last_audio.lock() = Instant::now();
                            if let Err(e) = session.send_audio(&frame).await {
                                tracing::warn!(speaker_id = %speaker, error = %e, "Audio frame dropped");
                            }
                        }
                        _ = stop_rx.changed() => break,
                    }
                }
            })
        };

        // Watchdogs: silence poller and hard deadline racing over the shared
        // stop channel; the first to fire finalizes and cancels the other
        let monitor = {
            let gate = self.clone_refs();
            let last_audio = last_audio.clone();
            let mut stop_rx = stop_rx;
            let speaker = speaker_id.to_string();
            let silence = Duration::from_millis(self.config.silence_threshold_ms);
            let poll = Duration::from_millis(self.config.silence_poll_ms);
            let deadline = Instant::now() + Duration::from_millis(self.config.max_utterance_ms);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop_rx.changed() => return,
                        _ = tokio::time::sleep_until(deadline.into()) => {
                            tracing::info!(speaker_id = %speaker, "Utterance deadline reached");
                            gate.finalize(FinalizeReason::Timeout).await;
                            return;
                        }
                        _ = tokio::time::sleep(poll) => {
                            if last_audio.lock().elapsed() >= silence {
                                tracing::info!(speaker_id = %speaker, "Silence threshold reached");
                                gate.finalize(FinalizeReason::Silence).await;
                                return;
                            }
                        }
                    }
                }
            })
        };

        if let Some(state) = self.lock.lock().as_mut() {
            state.tasks = vec![pump, monitor];
        }
        Ok(true)
    }

    /// Record that audio arrived from the locked speaker
    ///
    /// This is the only input the silence monitor consumes, so the transport
    /// layer must call it for every received frame, decodable or not.
    pub fn on_audio_data(&self, speaker_id: &str) {
        let lock = self.lock.lock();
        if let Some(state) = lock.as_ref() {
            if state.speaker_id == speaker_id {
                *state.last_audio.lock() = Instant::now();
            }
        }
    }

    /// Explicit end-of-speech from the transport layer
    ///
    /// Does not finalize; it re-arms the silence monitor so the utterance
    /// closes one silence threshold from now.
    pub fn on_speaking_end(&self, speaker_id: &str) {
        let lock = self.lock.lock();
        if let Some(state) = lock.as_ref() {
            if state.speaker_id == speaker_id {
                *state.last_audio.lock() = Instant::now();
                tracing::debug!(speaker_id, "Speaker stopped talking, silence monitor re-armed");
            }
        }
    }

    /// Rebroadcast a partial transcript from the transcription transport
    pub fn on_partial_transcript(&self, speaker_id: &str, text: &str) {
        let _ = self.events.send(GateEvent::TranscriptPartial {
            speaker_id: speaker_id.to_string(),
            text: text.to_string(),
        });
    }

    /// Emergency release for process shutdown; does not wait for in-flight
    /// async cleanup
    pub fn force_unlock(&self) {
        let state = self.lock.lock().take();
        let Some(state) = state else { return };

        tracing::warn!(speaker_id = %state.speaker_id, "Forcing speaker lock release");
        let _ = state.stop_tx.send(true);
        for task in &state.tasks {
            task.abort();
        }

        let session = state.session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "STT close failed during forced release");
            }
        });

        let _ = self.events.send(GateEvent::SpeakerStopped {
            speaker_id: state.speaker_id,
            reason: FinalizeReason::Forced,
        });
    }

    fn clone_refs(&self) -> GateInner {
        GateInner {
            forwarder: self.forwarder.clone(),
            config: self.config.clone(),
            lock: self.lock.clone(),
            events: self.events.clone(),
        }
    }
}

/// The subset of gate state the monitor task needs to finalize
struct GateInner {
    forwarder: Option<Arc<dyn TranscriptForwarder>>,
    config: SpeakerConfig,
    lock: Arc<Mutex<Option<LockState>>>,
    events: broadcast::Sender<GateEvent>,
}

impl GateInner {
    /// Finalize the active utterance and release the lock
    ///
    /// The lock is taken before any fallible work, so release is guaranteed
    /// no matter what the transcription backend or forwarder does.
    async fn finalize(&self, reason: FinalizeReason) {
        let state = self.lock.lock().take();
        let Some(state) = state else { return };

        let _ = state.stop_tx.send(true);
        let duration_ms = state.locked_at.elapsed().as_millis() as u64;

        let text = match state.session.finalize().await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    speaker_id = %state.speaker_id,
                    error = %e,
                    "Transcript retrieval failed"
                );
                String::new()
            }
        };

        if let Err(e) = state.session.close().await {
            tracing::debug!(error = %e, "STT close failed");
        }

        let transcript = Transcript::new(state.speaker_id.clone(), text, duration_ms);
        tracing::info!(
            speaker_id = %state.speaker_id,
            ?reason,
            duration_ms,
            chars = transcript.text.len(),
            "Utterance finalized"
        );

        if !transcript.is_empty() {
            let _ = self.events.send(GateEvent::TranscriptFinal {
                transcript: transcript.clone(),
                reason,
            });
            self.forward_with_retry(&transcript).await;
        }

        let _ = self.events.send(GateEvent::SpeakerStopped {
            speaker_id: state.speaker_id,
            reason,
        });
    }

    /// Deliver the transcript downstream with bounded exponential backoff;
    /// exhausted retries are logged and swallowed
    async fn forward_with_retry(&self, transcript: &Transcript) {
        let Some(forwarder) = &self.forwarder else {
            return;
        };

        let mut delay = Duration::from_millis(self.config.forward_backoff_ms);
        for attempt in 0..=self.config.forward_max_retries {
            match forwarder.forward(transcript).await {
                Ok(()) => return,
                Err(e) => {
                    if attempt < self.config.forward_max_retries {
                        tracing::debug!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transcript forward failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        tracing::error!(
                            speaker_id = %transcript.speaker_id,
                            error = %e,
                            "Transcript forward failed, giving up"
                        );
                    }
                }
            }
        }
    }
}

/// Placeholder session held while the real STT connection is opening
struct NullSession;

#[async_trait::async_trait]
impl TranscriptionSession for NullSession {
    async fn send_audio(&self, _chunk: &[u8]) -> voice_bridge_core::Result<()> {
        Ok(())
    }

    async fn finalize(&self) -> voice_bridge_core::Result<String> {
        Ok(String::new())
    }

    async fn close(&self) -> voice_bridge_core::Result<()> {
        Ok(())
    }
}
