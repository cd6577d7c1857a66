//! Text-level quality gates
//!
//! Applied to the STT result after the audio gates pass. Decoder markup
//! tags are stripped first so they never count toward text length.

use once_cell::sync::Lazy;
use regex::Regex;

use walnut_core::{QualityRejection, TranscriptResult};

/// Decoder markup like `<|en|>` or `<|NEUTRAL|>`.
static MARKUP_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\|[^|]*\|>").expect("static regex"));

/// Filler tokens that cannot stand alone as a request.
static FILLER_WORDS: &[&str] = &["uh", "um", "umm", "hmm", "hm", "huh", "ah", "er", "mm", "eh"];

/// Text plausibility checker.
pub struct TextQuality {
    confidence_floor: f32,
}

impl TextQuality {
    pub fn new(confidence_floor: f32) -> Self {
        Self { confidence_floor }
    }

    /// Strip decoder markup and collapse whitespace.
    pub fn clean(text: &str) -> String {
        let stripped = MARKUP_TAG.replace_all(text, "");
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Gate a transcript. Returns the cleaned text on success.
    pub fn check(&self, transcript: &TranscriptResult) -> Result<String, QualityRejection> {
        let cleaned = Self::clean(&transcript.text);

        if cleaned.is_empty() || cleaned.chars().all(|c| c.is_ascii_punctuation()) {
            return Err(QualityRejection::Garbage);
        }

        if transcript.confidence < self.confidence_floor {
            return Err(QualityRejection::Garbage);
        }

        if cleaned.chars().filter(|c| c.is_alphanumeric()).count() < 2 {
            return Err(QualityRejection::Semantic);
        }

        let only_filler = cleaned
            .split_whitespace()
            .all(|w| FILLER_WORDS.contains(&w.trim_matches(|c: char| c.is_ascii_punctuation()).to_lowercase().as_str()));
        if only_filler {
            return Err(QualityRejection::Semantic);
        }

        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> TextQuality {
        TextQuality::new(0.3)
    }

    #[test]
    fn clean_strips_markup() {
        let cleaned = TextQuality::clean("<|en|><|NEUTRAL|>turn on  the light");
        assert_eq!(cleaned, "turn on the light");
    }

    #[test]
    fn normal_text_passes() {
        let t = TranscriptResult::new("what's the weather", 0.9);
        assert_eq!(checker().check(&t).unwrap(), "what's the weather");
    }

    #[test]
    fn empty_after_cleaning_is_garbage() {
        let t = TranscriptResult::new("<|en|><|Speech|>", 0.9);
        assert_eq!(checker().check(&t).unwrap_err(), QualityRejection::Garbage);
    }

    #[test]
    fn punctuation_only_is_garbage() {
        let t = TranscriptResult::new("...", 0.9);
        assert_eq!(checker().check(&t).unwrap_err(), QualityRejection::Garbage);
    }

    #[test]
    fn low_confidence_is_garbage() {
        let t = TranscriptResult::new("maybe some words", 0.1);
        assert_eq!(checker().check(&t).unwrap_err(), QualityRejection::Garbage);
    }

    #[test]
    fn single_char_is_semantic() {
        let t = TranscriptResult::new("a", 0.9);
        assert_eq!(checker().check(&t).unwrap_err(), QualityRejection::Semantic);
    }

    #[test]
    fn filler_only_is_semantic() {
        let t = TranscriptResult::new("um, hmm", 0.9);
        assert_eq!(checker().check(&t).unwrap_err(), QualityRejection::Semantic);
    }
}
