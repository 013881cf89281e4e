//! Sentence-boundary detection over incrementally arriving text
//!
//! The parser consumes text deltas as they stream in from the response
//! source and emits complete sentences ready for synthesis. Abbreviations,
//! decimals, initials and ellipses do not split; sentences shorter than the
//! configured minimum are buffered into the next one so the synthesizer
//! never receives fragments too short to sound natural.

mod abbreviations;

use abbreviations::is_abbreviation;

/// Streaming sentence parser
///
/// Purely synchronous; never fails. Empty or whitespace-only input simply
/// yields no sentences.
#[derive(Debug, Default)]
pub struct SentenceParser {
    /// Unconsumed text
    buffer: String,
    /// Sentences emitted but too short to stand alone
    pending: String,
    min_sentence_length: usize,
}

impl SentenceParser {
    /// Create a parser with the given minimum sentence length in characters
    pub fn new(min_sentence_length: usize) -> Self {
        Self {
            buffer: String::new(),
            pending: String::new(),
            min_sentence_length,
        }
    }

    /// Append a text delta and return any sentences completed by it
    pub fn add_chunk(&mut self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        self.buffer.push_str(text);
        self.drain_sentences()
    }

    /// Flush everything buffered, including pending short sentences
    ///
    /// Returns an empty string when nothing is buffered; callers must not
    /// enqueue empty output.
    pub fn finalize(&mut self) -> String {
        let mut text = std::mem::take(&mut self.pending);
        text.push_str(&self.buffer);
        self.buffer.clear();
        text.trim().to_string()
    }

    /// Clear all state
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending.clear();
    }

    fn drain_sentences(&mut self) -> Vec<String> {
        let mut sentences = Vec::new();

        loop {
            let chars: Vec<char> = self.buffer.chars().collect();
            let Some(pos) = find_boundary(&chars) else {
                break;
            };

            let candidate: String = chars[..=pos].iter().collect();
            let candidate = candidate.trim().to_string();
            self.buffer = chars[pos + 1..].iter().collect();

            if candidate.is_empty() {
                continue;
            }

            if candidate.chars().count() < self.min_sentence_length {
                self.pending.push_str(&candidate);
                self.pending.push(' ');
                continue;
            }

            if self.pending.is_empty() {
                sentences.push(candidate);
            } else {
                let mut combined = std::mem::take(&mut self.pending);
                combined.push_str(&candidate);
                sentences.push(combined);
            }
        }

        sentences
    }
}

/// Find the first confirmed sentence boundary, if any
fn find_boundary(chars: &[char]) -> Option<usize> {
    for (i, &c) in chars.iter().enumerate() {
        if matches!(c, '.' | '!' | '?') && is_boundary(chars, i) {
            return Some(i);
        }
    }
    None
}

/// Whether the terminator at `i` really ends a sentence
fn is_boundary(chars: &[char], i: usize) -> bool {
    let next = chars.get(i + 1).copied();
    let prev = if i > 0 { Some(chars[i - 1]) } else { None };

    // Mid-token punctuation: "example.com", "3!4"
    if next.is_some_and(|c| c.is_alphanumeric()) {
        return false;
    }

    if chars[i] != '.' {
        return true;
    }

    // Part of an ellipsis
    if prev == Some('.') || next == Some('.') {
        return false;
    }
    if i >= 2 && chars[i - 1] == '.' && chars[i - 2] == '.' {
        return false;
    }

    // Decimal point: "3.14"
    if prev.is_some_and(|c| c.is_ascii_digit()) && next.is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }

    // Abbreviation: left-scan the word before the period
    let mut start = i;
    while start > 0 && chars[start - 1].is_alphabetic() {
        start -= 1;
    }
    if start < i {
        let word: String = chars[start..i].iter().collect::<String>().to_lowercase();
        if is_abbreviation(&word) {
            return false;
        }
    }

    // Initial like "J." or the trailing dot of "J.K."
    if prev.is_some_and(|c| c.is_alphabetic()) {
        let before_ok = i == 1 || {
            let b = chars[i - 2];
            b.is_whitespace() || b.is_uppercase()
        };
        let after_ok = next.is_some_and(|c| c.is_whitespace() || c == '.');
        if before_ok && after_ok {
            return false;
        }
    }

    true
}
