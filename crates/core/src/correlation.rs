//! Correlation context carried through the streaming pipeline
//!
//! Every synthesis task and audio chunk carries one of these so completed
//! audio can be matched back to the sentence and session it came from.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifying data attached to a unit of pipeline work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationContext {
    /// Unique task id
    pub task_id: String,
    /// Position of the originating sentence in its response stream
    pub sequence: u64,
    /// Owning voice session
    pub session_id: String,
    /// The sentence this work was created for
    pub sentence: String,
    /// Free-form extension fields
    #[serde(default)]
    pub extensions: HashMap<String, Value>,
}

impl CorrelationContext {
    /// Create a context with a fresh task id
    pub fn new(sequence: u64, session_id: impl Into<String>, sentence: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            sequence,
            session_id: session_id.into(),
            sentence: sentence.into(),
            extensions: HashMap::new(),
        }
    }

    /// Attach an extension field
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }
}
