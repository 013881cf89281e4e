//! Transcript types

use serde::{Deserialize, Serialize};

/// A finalized transcript for one utterance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// Speaker who produced the utterance
    pub speaker_id: String,
    /// Transcribed text
    pub text: String,
    /// Utterance duration from lock acquisition to finalize, in milliseconds
    pub duration_ms: u64,
}

impl Transcript {
    /// Create a new transcript
    pub fn new(speaker_id: impl Into<String>, text: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            text: text.into(),
            duration_ms,
        }
    }

    /// Whether the transcript carries any usable text
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_transcript() {
        let t = Transcript::new("spk-1", "   ", 1200);
        assert!(t.is_empty());

        let t = Transcript::new("spk-1", "hello", 1200);
        assert!(!t.is_empty());
    }
}
