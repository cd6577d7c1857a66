//! Transcript types for STT output

use serde::{Deserialize, Serialize};

/// Transcript result from STT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptResult {
    /// Transcribed text
    pub text: String,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,

    /// Detected language (ISO 639-1 code)
    pub language: Option<String>,
}

impl TranscriptResult {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            language: None,
        }
    }

    /// Set language
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Check if transcript is empty after trimming
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Get word count
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

impl Default for TranscriptResult {
    fn default() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            language: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_result() {
        let result = TranscriptResult::new("hello world", 0.95).with_language("en");

        assert_eq!(result.text, "hello world");
        assert_eq!(result.word_count(), 2);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_whitespace_only_is_empty() {
        let result = TranscriptResult::new("   ", 0.4);
        assert!(result.is_empty());
    }
}
