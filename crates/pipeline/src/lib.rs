//! Low-latency streaming pipeline for the voice bridge
//!
//! This crate turns an incrementally arriving text stream into gap-free,
//! correctly ordered, interruptible spoken audio:
//! - Sentence-boundary detection over streaming text
//! - Bounded-concurrency synthesis scheduling
//! - Strict FIFO playback sequencing with three interruption strategies
//! - Single-speaker admission with silence/timeout finalization

pub mod orchestrator;
pub mod playback;
pub mod sentence;
pub mod speaker;
pub mod synthesis;

// Sentence exports
pub use sentence::SentenceParser;

// Synthesis exports
pub use synthesis::{SchedulerStats, SynthesisEvent, SynthesisScheduler, SynthesisTask, TaskStatus};

// Playback exports
pub use playback::{
    AudioChunk, ChunkStatus, PlaybackEvent, PlaybackSequencer, PlaybackStats, DRAIN_KEEP_CHUNKS,
};

// Speaker exports
pub use speaker::{FinalizeReason, GateEvent, SpeakerGate, SpeakerLock};

// Orchestrator exports
pub use orchestrator::{PipelineEvent, StreamingOrchestrator};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Unsupported chunking strategy: {0}")]
    UnsupportedChunking(String),
}
