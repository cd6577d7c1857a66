//! Captured utterances
//!
//! An utterance is the frozen audio between a start and end endpoint.
//! It is built once by the capturer, handed to STT, then dropped.

use chrono::{DateTime, Utc};

use crate::audio::{rms_energy, SAMPLE_RATE};

/// An immutable captured utterance.
#[derive(Debug, Clone)]
pub struct Utterance {
    samples: Vec<i16>,
    captured_at: DateTime<Utc>,
}

impl Utterance {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples,
            captured_at: Utc::now(),
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Total duration in seconds at the canonical rate.
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / SAMPLE_RATE as f32
    }

    /// Average RMS energy over the whole utterance, normalized to [0, 1].
    pub fn average_energy(&self) -> f32 {
        rms_energy(&self.samples)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_sample_count() {
        let utt = Utterance::new(vec![0i16; SAMPLE_RATE as usize]);
        assert!((utt.duration_secs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_utterance() {
        let utt = Utterance::new(Vec::new());
        assert!(utt.is_empty());
        assert_eq!(utt.average_energy(), 0.0);
    }
}
