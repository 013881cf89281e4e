//! Strict FIFO audio playback sequencing
//!
//! A single worker feeds the audio sink one chunk at a time, so playback
//! order always equals enqueue order and chunks can never overlap. The voice
//! channel is a serial resource; unlike the synthesis side there is never
//! more than one worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use voice_bridge_config::InterruptionStrategy;
use voice_bridge_core::{AudioSink, CorrelationContext};

/// Pending chunks retained by the drain interruption strategy
pub const DRAIN_KEEP_CHUNKS: usize = 2;

/// Sink polling interval while a chunk is playing
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Audio chunk lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Queued,
    Playing,
    Completed,
    Interrupted,
    Failed,
}

/// Synthesized audio waiting to be played
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub id: String,
    pub audio: Vec<u8>,
    pub ctx: CorrelationContext,
    pub status: ChunkStatus,
    pub queued_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
}

/// Playback notification from the sequencer worker
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    /// Chunk finished playing naturally
    Finished {
        ctx: CorrelationContext,
        /// Time spent waiting in the queue
        queued_ms: u64,
        /// Time spent playing
        playback_ms: u64,
    },
    /// Chunk was cut off or dropped by an interruption
    Interrupted { ctx: CorrelationContext },
    /// Sink rejected the chunk; the worker moves on to the next item
    Failed {
        ctx: CorrelationContext,
        error: String,
    },
}

/// Sequencer counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaybackStats {
    pub enqueued: u64,
    pub completed: u64,
    pub interrupted: u64,
    pub failed: u64,
    pub queued_depth: usize,
    pub playing: bool,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    interrupted: AtomicU64,
    failed: AtomicU64,
}

/// Single-consumer FIFO playback queue over an audio sink
pub struct PlaybackSequencer {
    sink: Arc<dyn AudioSink>,
    queue: Arc<Mutex<VecDeque<AudioChunk>>>,
    notify: Arc<Notify>,
    running: Arc<AtomicBool>,
    /// When set, popped chunks are marked interrupted instead of played
    stop_requested: Arc<AtomicBool>,
    /// Cleared by the drain strategy so no further chunks are admitted
    accepting: Arc<AtomicBool>,
    /// Set together with a synchronous sink stop to mark the in-flight
    /// chunk interrupted rather than completed
    current_interrupted: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    counters: Arc<Counters>,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<PlaybackEvent>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSequencer {
    /// Create a sequencer that exclusively owns the given sink
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            sink,
            stop_tx,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            accepting: Arc::new(AtomicBool::new(true)),
            current_interrupted: Arc::new(AtomicBool::new(false)),
            playing: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            events: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the single playback worker; events flow out over `events`
    pub fn start(&self, events: mpsc::UnboundedSender<PlaybackEvent>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Playback sequencer already started");
            return;
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        self.accepting.store(true, Ordering::SeqCst);
        *self.events.lock() = Some(events.clone());

        let worker = PlaybackWorker {
            sink: self.sink.clone(),
            queue: self.queue.clone(),
            notify: self.notify.clone(),
            running: self.running.clone(),
            stop_requested: self.stop_requested.clone(),
            stop_rx: self.stop_tx.subscribe(),
            current_interrupted: self.current_interrupted.clone(),
            playing: self.playing.clone(),
            counters: self.counters.clone(),
            events,
        };
        *self.worker.lock() = Some(tokio::spawn(worker.run()));
    }

    /// Queue synthesized audio; returns the chunk id, or `None` when the
    /// sequencer is no longer accepting chunks
    pub fn enqueue_audio(&self, audio: Vec<u8>, ctx: CorrelationContext) -> Option<String> {
        if !self.accepting.load(Ordering::SeqCst) {
            tracing::debug!(task_id = %ctx.task_id, "Sequencer draining, chunk rejected");
            return None;
        }

        let chunk = AudioChunk {
            id: Uuid::new_v4().to_string(),
            audio,
            ctx,
            status: ChunkStatus::Queued,
            queued_at: Instant::now(),
            started_at: None,
            completed_at: None,
        };
        let id = chunk.id.clone();

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.queue.lock().push_back(chunk);
        self.notify.notify_one();
        Some(id)
    }

    /// Apply an interruption strategy to current and pending playback
    pub async fn stop_playback(&self, strategy: InterruptionStrategy) {
        tracing::debug!(?strategy, "Stopping playback");
        match strategy {
            InterruptionStrategy::Immediate => {
                self.stop_requested.store(true, Ordering::SeqCst);
                if self.playing.load(Ordering::SeqCst) {
                    self.current_interrupted.store(true, Ordering::SeqCst);
                }
                if let Err(e) = self.sink.stop().await {
                    tracing::warn!(error = %e, "Sink stop failed");
                }
                self.drain_interrupted(0);
            }
            InterruptionStrategy::Graceful => {
                // The in-flight chunk finishes naturally
                self.stop_requested.store(true, Ordering::SeqCst);
                self.drain_interrupted(0);
            }
            InterruptionStrategy::Drain => {
                self.drain_interrupted(DRAIN_KEEP_CHUNKS);
                self.accepting.store(false, Ordering::SeqCst);
                // Retained chunks must still play
                self.stop_requested.store(false, Ordering::SeqCst);
                self.notify.notify_one();
            }
        }
    }

    /// Stop the worker after the current chunk
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Snapshot sequencer counters
    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            interrupted: self.counters.interrupted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            queued_depth: self.queue.lock().len(),
            playing: self.playing.load(Ordering::SeqCst),
        }
    }

    /// Drain the pending queue, keeping the first `keep_n` chunks in order
    /// and marking the rest interrupted
    fn drain_interrupted(&self, keep_n: usize) {
        let mut queue = self.queue.lock();
        let mut kept: VecDeque<AudioChunk> = queue.drain(..).collect();
        let dropped = kept.split_off(keep_n.min(kept.len()));
        *queue = kept;
        drop(queue);

        let events = self.events.lock().clone();
        for mut chunk in dropped {
            chunk.status = ChunkStatus::Interrupted;
            chunk.completed_at = Some(Instant::now());
            self.counters.interrupted.fetch_add(1, Ordering::Relaxed);
            if let Some(tx) = &events {
                let _ = tx.send(PlaybackEvent::Interrupted { ctx: chunk.ctx });
            }
        }
    }
}

struct PlaybackWorker {
    sink: Arc<dyn AudioSink>,
    queue: Arc<Mutex<VecDeque<AudioChunk>>>,
    notify: Arc<Notify>,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    stop_rx: watch::Receiver<bool>,
    current_interrupted: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    counters: Arc<Counters>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl PlaybackWorker {
    async fn run(self) {
        let mut stop_rx = self.stop_rx.clone();
        while self.running.load(Ordering::SeqCst) {
            let chunk = self.queue.lock().pop_front();
            let Some(mut chunk) = chunk else {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = stop_rx.changed() => break,
                }
                continue;
            };

            if self.stop_requested.load(Ordering::SeqCst) {
                chunk.status = ChunkStatus::Interrupted;
                self.counters.interrupted.fetch_add(1, Ordering::Relaxed);
                let _ = self.events.send(PlaybackEvent::Interrupted { ctx: chunk.ctx });
                continue;
            }

            self.play_chunk(&mut chunk).await;
        }
    }

    async fn play_chunk(&self, chunk: &mut AudioChunk) {
        chunk.status = ChunkStatus::Playing;
        chunk.started_at = Some(Instant::now());
        self.playing.store(true, Ordering::SeqCst);
        self.current_interrupted.store(false, Ordering::SeqCst);

        if let Err(e) = self.sink.play(&chunk.audio).await {
            self.playing.store(false, Ordering::SeqCst);
            chunk.status = ChunkStatus::Failed;
            chunk.completed_at = Some(Instant::now());
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(chunk_id = %chunk.id, error = %e, "Playback failed");
            let _ = self.events.send(PlaybackEvent::Failed {
                ctx: chunk.ctx.clone(),
                error: e.to_string(),
            });
            return;
        }

        // Poll until the sink goes quiet; an immediate interruption stops
        // the sink out from under us and is observed here
        while self.sink.is_playing() && self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        self.playing.store(false, Ordering::SeqCst);
        chunk.completed_at = Some(Instant::now());

        if self.current_interrupted.swap(false, Ordering::SeqCst) {
            chunk.status = ChunkStatus::Interrupted;
            self.counters.interrupted.fetch_add(1, Ordering::Relaxed);
            let _ = self.events.send(PlaybackEvent::Interrupted {
                ctx: chunk.ctx.clone(),
            });
            return;
        }

        chunk.status = ChunkStatus::Completed;
        self.counters.completed.fetch_add(1, Ordering::Relaxed);

        let started = chunk.started_at.unwrap_or(chunk.queued_at);
        let _ = self.events.send(PlaybackEvent::Finished {
            ctx: chunk.ctx.clone(),
            queued_ms: started.duration_since(chunk.queued_at).as_millis() as u64,
            playback_ms: chunk
                .completed_at
                .unwrap_or(started)
                .duration_since(started)
                .as_millis() as u64,
        });
    }
}
