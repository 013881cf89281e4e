//! Streaming pipeline configuration

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Configuration for the text-to-speech streaming pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Minimum sentence length in characters; shorter sentences are buffered
    /// into the next one
    #[serde(default = "default_min_sentence_length")]
    pub min_sentence_length: usize,

    /// Maximum concurrent synthesis calls (1-8)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_synthesis: usize,

    /// Policy for failed synthesis tasks
    #[serde(default)]
    pub error_strategy: ErrorStrategy,

    /// Retry attempts per task when `error_strategy` is `retry`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry backoff in milliseconds, doubled per attempt
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// How playback reacts to a barge-in
    #[serde(default)]
    pub interruption_strategy: InterruptionStrategy,

    /// How incoming text is split into synthesis units
    #[serde(default)]
    pub chunking_strategy: ChunkingStrategy,
}

fn default_min_sentence_length() -> usize {
    5
}
fn default_max_concurrent() -> usize {
    2
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff() -> u64 {
    100
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            min_sentence_length: default_min_sentence_length(),
            max_concurrent_synthesis: default_max_concurrent(),
            error_strategy: ErrorStrategy::default(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            interruption_strategy: InterruptionStrategy::default(),
            chunking_strategy: ChunkingStrategy::default(),
        }
    }
}

impl StreamingConfig {
    /// Validate ranges; out-of-range values fail fast rather than clamping
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_sentence_length == 0 {
            return Err(ConfigError::invalid(
                "streaming.min_sentence_length",
                "must be at least 1",
            ));
        }
        if !(1..=8).contains(&self.max_concurrent_synthesis) {
            return Err(ConfigError::invalid(
                "streaming.max_concurrent_synthesis",
                format!("must be 1-8, got {}", self.max_concurrent_synthesis),
            ));
        }
        if self.max_retries > 10 {
            return Err(ConfigError::invalid(
                "streaming.max_retries",
                format!("must be at most 10, got {}", self.max_retries),
            ));
        }
        if self.retry_backoff_ms == 0 {
            return Err(ConfigError::invalid(
                "streaming.retry_backoff_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Policy for failed synthesis tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Drop the failed sentence and continue
    #[default]
    Skip,
    /// Re-attempt the same task up to `max_retries` times
    Retry,
    /// Accepted for compatibility; behaves as `skip` in this pipeline
    Fallback,
}

/// How playback reacts to a barge-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionStrategy {
    /// Stop the current chunk and drop everything pending
    Immediate,
    /// Let the current chunk finish, drop everything pending
    #[default]
    Graceful,
    /// Let the current chunk and a small number of pending chunks finish
    Drain,
}

/// How incoming text is split into synthesis units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Sentence-boundary chunking
    #[default]
    Sentence,
    /// Paragraph chunking
    Paragraph,
    /// Word-level chunking
    Word,
    /// Fixed-size chunking
    Fixed,
}

/// Configuration for speaker admission and utterance finalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerConfig {
    /// Silence duration after which an utterance is finalized (ms)
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold_ms: u64,

    /// Silence monitor polling interval (ms)
    #[serde(default = "default_silence_poll")]
    pub silence_poll_ms: u64,

    /// Hard deadline for one utterance (ms)
    #[serde(default = "default_max_utterance")]
    pub max_utterance_ms: u64,

    /// Retry attempts when forwarding a transcript downstream
    #[serde(default = "default_forward_retries")]
    pub forward_max_retries: u32,

    /// Initial forwarding backoff in milliseconds, doubled per attempt
    #[serde(default = "default_forward_backoff")]
    pub forward_backoff_ms: u64,
}

fn default_silence_threshold() -> u64 {
    1500
}
fn default_silence_poll() -> u64 {
    200
}
fn default_max_utterance() -> u64 {
    30_000
}
fn default_forward_retries() -> u32 {
    3
}
fn default_forward_backoff() -> u64 {
    200
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            silence_threshold_ms: default_silence_threshold(),
            silence_poll_ms: default_silence_poll(),
            max_utterance_ms: default_max_utterance(),
            forward_max_retries: default_forward_retries(),
            forward_backoff_ms: default_forward_backoff(),
        }
    }
}

impl SpeakerConfig {
    /// Validate ranges; out-of-range values fail fast rather than clamping
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.silence_threshold_ms < 100 {
            return Err(ConfigError::invalid(
                "speaker.silence_threshold_ms",
                "must be at least 100ms",
            ));
        }
        if self.silence_poll_ms == 0 || self.silence_poll_ms >= self.silence_threshold_ms {
            return Err(ConfigError::invalid(
                "speaker.silence_poll_ms",
                "must be positive and below silence_threshold_ms",
            ));
        }
        if self.max_utterance_ms <= self.silence_threshold_ms {
            return Err(ConfigError::invalid(
                "speaker.max_utterance_ms",
                "must exceed silence_threshold_ms",
            ));
        }
        Ok(())
    }
}
