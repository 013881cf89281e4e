//! Core types and traits for the voice bridge
//!
//! This crate provides foundational types used across all other crates:
//! - Error types for backend capabilities
//! - Transcript types
//! - Correlation context carried through the streaming pipeline
//! - Abstract capability traits (synthesis, audio sink, transcription)

pub mod correlation;
pub mod error;
pub mod traits;
pub mod transcript;

pub use correlation::CorrelationContext;
pub use error::{BackendError, Result};
pub use traits::{
    AudioSink, SynthesisBackend, TranscriptForwarder, TranscriptionBackend, TranscriptionSession,
};
pub use transcript::Transcript;
