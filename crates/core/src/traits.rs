//! Capability Traits
//!
//! Abstract interfaces for the external collaborators the pipeline consumes.
//! Concrete vendor clients live outside this workspace; only the call
//! contracts matter here.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::transcript::Transcript;

/// Speech synthesis capability
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Synthesize text to audio bytes
    async fn synthesize(&self, text: &str, voice_id: &str, speed: f32) -> Result<Vec<u8>>;
}

/// Audio sink owned exclusively by the playback sequencer
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Whether the sink can currently accept audio
    fn is_connected(&self) -> bool;

    /// Whether the sink is currently playing audio
    fn is_playing(&self) -> bool;

    /// Start playing an audio buffer
    async fn play(&self, audio: &[u8]) -> Result<()>;

    /// Stop the current playback immediately
    async fn stop(&self) -> Result<()>;
}

/// One live transcription session for a single utterance
#[async_trait]
pub trait TranscriptionSession: Send + Sync {
    /// Stream an audio frame to the transcriber
    async fn send_audio(&self, chunk: &[u8]) -> Result<()>;

    /// Request the final transcript for everything sent so far
    async fn finalize(&self) -> Result<String>;

    /// Close the backend connection
    async fn close(&self) -> Result<()>;
}

/// Factory for transcription sessions
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Open a session for one speaker's utterance
    async fn open_session(&self, speaker_id: &str) -> Result<Arc<dyn TranscriptionSession>>;
}

/// Downstream delivery of finalized transcripts (e.g. a response webhook)
#[async_trait]
pub trait TranscriptForwarder: Send + Sync {
    /// Forward a finalized transcript downstream
    async fn forward(&self, transcript: &Transcript) -> Result<()>;
}
