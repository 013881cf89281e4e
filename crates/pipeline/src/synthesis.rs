//! Bounded-concurrency speech-synthesis scheduling
//!
//! Sentences are dispatched to the synthesis backend in arrival order by a
//! pool of workers gated on a semaphore. Completion order is deliberately
//! not guaranteed; the playback side restores spoken-output order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Notify, Semaphore};
use tokio::task::JoinHandle;

use voice_bridge_config::{ErrorStrategy, StreamingConfig};
use voice_bridge_core::{CorrelationContext, SynthesisBackend};

/// Completed and cancelled tasks retained for inspection
const HISTORY_LIMIT: usize = 64;

/// Synthesis task lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Synthesizing,
    Completed,
    Failed,
    Cancelled,
}

/// One unit of synthesis work
#[derive(Debug, Clone)]
pub struct SynthesisTask {
    pub id: String,
    pub text: String,
    pub voice_id: String,
    pub speed: f32,
    pub ctx: CorrelationContext,
    pub status: TaskStatus,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
}

/// Completion notification from the scheduler
#[derive(Debug, Clone)]
pub enum SynthesisEvent {
    /// Synthesis finished; audio is ready for playback
    Completed {
        audio: Vec<u8>,
        ctx: CorrelationContext,
    },
    /// Synthesis failed after exhausting the configured policy
    Failed {
        text: String,
        error: String,
        ctx: CorrelationContext,
    },
}

/// Scheduler counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub queued_depth: usize,
    pub in_flight: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    in_flight: AtomicU64,
}

/// Order-preserving dispatch queue with bounded-concurrency workers
pub struct SynthesisScheduler {
    backend: Arc<dyn SynthesisBackend>,
    config: StreamingConfig,
    queue: Arc<Mutex<VecDeque<SynthesisTask>>>,
    notify: Arc<Notify>,
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    counters: Arc<Counters>,
    history: Arc<Mutex<VecDeque<SynthesisTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SynthesisScheduler {
    /// Create a scheduler around a synthesis backend
    pub fn new(backend: Arc<dyn SynthesisBackend>, config: StreamingConfig) -> Self {
        let width = config.max_concurrent_synthesis;
        let (stop_tx, _) = watch::channel(false);
        Self {
            backend,
            config,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
            semaphore: Arc::new(Semaphore::new(width)),
            running: Arc::new(AtomicBool::new(false)),
            stop_tx,
            counters: Arc::new(Counters::default()),
            history: Arc::new(Mutex::new(VecDeque::new())),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn worker loops; completion events flow out over `events`
    pub fn start(&self, events: mpsc::UnboundedSender<SynthesisEvent>) {
        self.start_with_workers(self.config.max_concurrent_synthesis, events);
    }

    /// Spawn an explicit number of worker loops
    pub fn start_with_workers(
        &self,
        num_workers: usize,
        events: mpsc::UnboundedSender<SynthesisEvent>,
    ) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Synthesis scheduler already started");
            return;
        }

        tracing::debug!(num_workers, "Starting synthesis workers");
        let mut workers = self.workers.lock();
        for _ in 0..num_workers.max(1) {
            let worker = Worker {
                backend: self.backend.clone(),
                queue: self.queue.clone(),
                notify: self.notify.clone(),
                semaphore: self.semaphore.clone(),
                running: self.running.clone(),
                stop_rx: self.stop_tx.subscribe(),
                counters: self.counters.clone(),
                history: self.history.clone(),
                events: events.clone(),
                error_strategy: self.config.error_strategy,
                max_retries: self.config.max_retries,
                retry_backoff: Duration::from_millis(self.config.retry_backoff_ms),
            };
            workers.push(tokio::spawn(worker.run()));
        }
    }

    /// Queue a sentence for synthesis; returns the task id
    pub fn enqueue_sentence(
        &self,
        text: impl Into<String>,
        session_id: &str,
        voice_id: &str,
        speed: f32,
        sequence: u64,
        extensions: std::collections::HashMap<String, Value>,
    ) -> String {
        let text = text.into();
        let mut ctx = CorrelationContext::new(sequence, session_id, text.clone());
        ctx.extensions = extensions;

        let task = SynthesisTask {
            id: ctx.task_id.clone(),
            text,
            voice_id: voice_id.to_string(),
            speed,
            ctx,
            status: TaskStatus::Queued,
            created_at: Instant::now(),
            started_at: None,
            completed_at: None,
        };
        let id = task.id.clone();

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.queue.lock().push_back(task);
        self.notify.notify_one();
        id
    }

    /// Drain the queue, cancelling every queued task; in-flight synthesis
    /// runs to completion
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<SynthesisTask> = self.queue.lock().drain(..).collect();
        let count = drained.len();
        for task in drained {
            self.record_cancelled(task);
        }
        if count > 0 {
            tracing::debug!(count, "Cancelled queued synthesis tasks");
        }
        count
    }

    /// Alias for `cancel_all`; queued tasks are the only cancellable work
    pub fn cancel_pending(&self) -> usize {
        self.cancel_all()
    }

    /// Keep the first `keep_n` queued tasks in order, cancel the rest
    pub fn cancel_after(&self, keep_n: usize) -> usize {
        let mut queue = self.queue.lock();
        let mut drained: VecDeque<SynthesisTask> = queue.drain(..).collect();
        let cancelled = drained.split_off(keep_n.min(drained.len()));
        *queue = drained;
        drop(queue);

        let count = cancelled.len();
        for task in cancelled {
            self.record_cancelled(task);
        }
        count
    }

    /// Stop workers after they finish their current task
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.await;
        }
    }

    /// Snapshot scheduler counters
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            queued_depth: self.queue.lock().len(),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
        }
    }

    /// Recently completed, failed and cancelled tasks
    pub fn history(&self) -> Vec<SynthesisTask> {
        self.history.lock().iter().cloned().collect()
    }

    fn record_cancelled(&self, mut task: SynthesisTask) {
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Instant::now());
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        push_history(&self.history, task);
    }
}

fn push_history(history: &Mutex<VecDeque<SynthesisTask>>, task: SynthesisTask) {
    let mut history = history.lock();
    history.push_back(task);
    while history.len() > HISTORY_LIMIT {
        history.pop_front();
    }
}

struct Worker {
    backend: Arc<dyn SynthesisBackend>,
    queue: Arc<Mutex<VecDeque<SynthesisTask>>>,
    notify: Arc<Notify>,
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicBool>,
    stop_rx: watch::Receiver<bool>,
    counters: Arc<Counters>,
    history: Arc<Mutex<VecDeque<SynthesisTask>>>,
    events: mpsc::UnboundedSender<SynthesisEvent>,
    error_strategy: ErrorStrategy,
    max_retries: u32,
    retry_backoff: Duration,
}

impl Worker {
    async fn run(self) {
        let mut stop_rx = self.stop_rx.clone();
        while self.running.load(Ordering::SeqCst) {
            let task = self.queue.lock().pop_front();
            let Some(task) = task else {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = stop_rx.changed() => break,
                }
                continue;
            };
            self.process(task).await;
        }
    }

    async fn process(&self, mut task: SynthesisTask) {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return;
        };

        task.status = TaskStatus::Synthesizing;
        task.started_at = Some(Instant::now());
        self.counters.in_flight.fetch_add(1, Ordering::Relaxed);

        let result = self.synthesize_with_policy(&task).await;

        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
        task.completed_at = Some(Instant::now());

        match result {
            Ok(audio) => {
                task.status = TaskStatus::Completed;
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                let _ = self.events.send(SynthesisEvent::Completed {
                    audio,
                    ctx: task.ctx.clone(),
                });
            }
            Err(error) => {
                task.status = TaskStatus::Failed;
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    task_id = %task.id,
                    %error,
                    "Synthesis failed, skipping sentence"
                );
                let _ = self.events.send(SynthesisEvent::Failed {
                    text: task.text.clone(),
                    error,
                    ctx: task.ctx.clone(),
                });
            }
        }

        push_history(&self.history, task);
    }

    /// Invoke the backend, re-attempting with exponential backoff when the
    /// retry policy is configured
    async fn synthesize_with_policy(&self, task: &SynthesisTask) -> Result<Vec<u8>, String> {
        let attempts = match self.error_strategy {
            ErrorStrategy::Retry => self.max_retries,
            ErrorStrategy::Skip | ErrorStrategy::Fallback => 0,
        };

        let mut delay = self.retry_backoff;
        let mut last_error = String::new();

        for attempt in 0..=attempts {
            match self
                .backend
                .synthesize(&task.text, &task.voice_id, task.speed)
                .await
            {
                Ok(audio) => return Ok(audio),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        tracing::debug!(
                            task_id = %task.id,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying synthesis"
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(last_error)
    }
}
