//! Utterance capture and endpointing
//!
//! Buffers frames between a begin call and an endpoint decision, then
//! applies the audio-level quality gates. Text-level gates live in
//! [`crate::text_quality`] because they need the STT result.

use walnut_config::{AudioQualityConfig, ListeningConfig};
use walnut_core::{PcmFrame, QualityRejection, Utterance, SAMPLE_RATE};

/// Per-frame endpoint decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureProgress {
    /// Keep feeding frames.
    Active,
    /// Trailing silence (or the duration cap) ended an utterance that
    /// contains speech.
    Endpointed,
    /// The duration cap elapsed without any speech.
    TimedOut,
}

/// A speech run this short suggests the speaker paused mid-phrase, so
/// the longer smart silence window applies.
const SHORT_RUN_SECS: f32 = 0.4;

/// Captures one utterance between endpoints.
pub struct UtteranceCapturer {
    min_speech_secs: f32,
    min_energy: f32,
    silence_window_secs: f32,
    smart_silence_secs: f32,
    max_duration_secs: f32,

    samples: Vec<i16>,
    speech_total_secs: f32,
    speech_run_secs: f32,
    silence_run_secs: f32,
    last_speech_run_secs: f32,
    capturing: bool,
}

impl UtteranceCapturer {
    pub fn new(quality: &AudioQualityConfig, listening: &ListeningConfig) -> Self {
        Self {
            min_speech_secs: quality.min_speech_duration,
            min_energy: quality.min_energy,
            silence_window_secs: listening.silence_threshold_secs,
            smart_silence_secs: quality.smart_silence_threshold,
            max_duration_secs: listening.max_duration_secs,
            samples: Vec::new(),
            speech_total_secs: 0.0,
            speech_run_secs: 0.0,
            silence_run_secs: 0.0,
            last_speech_run_secs: 0.0,
            capturing: false,
        }
    }

    /// Start a fresh capture, optionally seeded with already-buffered
    /// audio (the barge-in tail).
    pub fn begin(&mut self, prefix: &[i16]) {
        self.samples.clear();
        self.samples.extend_from_slice(prefix);
        self.speech_total_secs = 0.0;
        self.speech_run_secs = 0.0;
        self.silence_run_secs = 0.0;
        self.last_speech_run_secs = 0.0;
        self.capturing = true;

        if !prefix.is_empty() {
            // Seeded audio was speech by definition of barge-in.
            let secs = prefix.len() as f32 / SAMPLE_RATE as f32;
            self.speech_total_secs = secs;
            self.last_speech_run_secs = secs;
        }
    }

    /// Feed one frame with its VAD classification.
    pub fn feed(&mut self, frame: &PcmFrame, is_speech: bool) -> CaptureProgress {
        if !self.capturing {
            return CaptureProgress::Active;
        }

        self.samples.extend_from_slice(frame.samples());
        let frame_secs = frame.duration_secs();

        if is_speech && !frame.is_gap() {
            self.speech_run_secs += frame_secs;
            self.silence_run_secs = 0.0;
            self.speech_total_secs += frame_secs;
        } else {
            if self.speech_run_secs > 0.0 {
                self.last_speech_run_secs = self.speech_run_secs;
            }
            self.speech_run_secs = 0.0;
            self.silence_run_secs += frame_secs;
        }

        let elapsed = self.samples.len() as f32 / SAMPLE_RATE as f32;
        if elapsed >= self.max_duration_secs {
            self.capturing = false;
            return if self.has_min_speech() {
                CaptureProgress::Endpointed
            } else {
                CaptureProgress::TimedOut
            };
        }

        if self.has_min_speech() && self.silence_run_secs >= self.current_silence_window() {
            self.capturing = false;
            return CaptureProgress::Endpointed;
        }

        CaptureProgress::Active
    }

    /// Freeze and gate the captured audio. Audio-level gates only; the
    /// caller runs text gates after STT.
    pub fn finish(&mut self) -> Result<Utterance, QualityRejection> {
        self.capturing = false;

        if self.speech_total_secs < self.min_speech_secs {
            return Err(QualityRejection::Silence);
        }

        let utterance = Utterance::new(std::mem::take(&mut self.samples));
        if utterance.average_energy() < self.min_energy {
            return Err(QualityRejection::Fragment);
        }

        Ok(utterance)
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Total accumulated speech time.
    pub fn speech_secs(&self) -> f32 {
        self.speech_total_secs
    }

    fn has_min_speech(&self) -> bool {
        self.speech_total_secs >= self.min_speech_secs
    }

    /// The smart window applies when the last speech run was a short
    /// burst, which usually means the speaker is mid-phrase.
    fn current_silence_window(&self) -> f32 {
        if self.last_speech_run_secs > 0.0 && self.last_speech_run_secs < SHORT_RUN_SECS {
            self.smart_silence_secs
        } else {
            self.silence_window_secs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walnut_config::{AudioQualityConfig, ListeningConfig};
    use walnut_core::FRAME_SAMPLES;

    fn capturer() -> UtteranceCapturer {
        UtteranceCapturer::new(&AudioQualityConfig::default(), &ListeningConfig::default())
    }

    fn speech_frame(index: u64) -> PcmFrame {
        PcmFrame::new(vec![5000; FRAME_SAMPLES], index)
    }

    fn silence_frame(index: u64) -> PcmFrame {
        PcmFrame::new(vec![0; FRAME_SAMPLES], index)
    }

    const FRAMES_PER_SEC: u64 = 31; // 512 samples at 16 kHz, rounded down

    #[test]
    fn speech_then_silence_endpoints() {
        let mut cap = capturer();
        cap.begin(&[]);

        let mut idx = 0;
        // One second of speech.
        for _ in 0..FRAMES_PER_SEC {
            assert_eq!(cap.feed(&speech_frame(idx), true), CaptureProgress::Active);
            idx += 1;
        }
        // Trailing silence past the 1.5 s window.
        let mut result = CaptureProgress::Active;
        for _ in 0..(FRAMES_PER_SEC * 2) {
            result = cap.feed(&silence_frame(idx), false);
            idx += 1;
            if result != CaptureProgress::Active {
                break;
            }
        }
        assert_eq!(result, CaptureProgress::Endpointed);
        assert!(cap.finish().is_ok());
    }

    #[test]
    fn pure_silence_times_out_and_rejects() {
        let mut cap = capturer();
        cap.begin(&[]);

        let mut result = CaptureProgress::Active;
        let mut idx = 0;
        while result == CaptureProgress::Active {
            result = cap.feed(&silence_frame(idx), false);
            idx += 1;
            assert!(idx < 400, "capture never ended");
        }
        assert_eq!(result, CaptureProgress::TimedOut);
        assert_eq!(cap.finish().unwrap_err(), QualityRejection::Silence);
    }

    #[test]
    fn continuous_speech_hits_duration_cap_as_endpointed() {
        let mut cap = capturer();
        cap.begin(&[]);

        let mut result = CaptureProgress::Active;
        let mut idx = 0;
        while result == CaptureProgress::Active {
            result = cap.feed(&speech_frame(idx), true);
            idx += 1;
            assert!(idx < 400, "capture never ended");
        }
        // Exactly the cap with speech present: endpointed, not timed out.
        assert_eq!(result, CaptureProgress::Endpointed);
        assert!(cap.finish().is_ok());
    }

    #[test]
    fn quiet_speech_rejects_as_fragment() {
        let mut cap = capturer();
        cap.begin(&[]);

        let mut idx = 0;
        // Whisper-level frames classified as speech by a permissive VAD.
        for _ in 0..FRAMES_PER_SEC {
            cap.feed(&PcmFrame::new(vec![40; FRAME_SAMPLES], idx), true);
            idx += 1;
        }
        for _ in 0..(FRAMES_PER_SEC * 2) {
            if cap.feed(&silence_frame(idx), false) != CaptureProgress::Active {
                break;
            }
            idx += 1;
        }
        assert_eq!(cap.finish().unwrap_err(), QualityRejection::Fragment);
    }

    #[test]
    fn barge_in_prefix_counts_as_speech() {
        let mut cap = capturer();
        let prefix = vec![4000i16; SAMPLE_RATE as usize / 2]; // 0.5 s tail
        cap.begin(&prefix);
        assert!(cap.speech_secs() > 0.4);

        // Silence right after the tail still endpoints, and the prefix
        // keeps the utterance out of the silence gate.
        let mut idx = 0;
        let mut result = CaptureProgress::Active;
        for _ in 0..200 {
            result = cap.feed(&silence_frame(idx), false);
            idx += 1;
            if result != CaptureProgress::Active {
                break;
            }
        }
        assert_eq!(result, CaptureProgress::Endpointed);
        let utterance = cap.finish().expect("prefix speech should pass gates");
        assert!(utterance.samples().len() >= prefix.len());
    }

    #[test]
    fn short_burst_extends_the_silence_window() {
        let mut cap = capturer();
        cap.begin(&[]);

        let mut idx = 0;
        // A second of speech, then a one-frame burst after brief silence.
        for _ in 0..FRAMES_PER_SEC {
            cap.feed(&speech_frame(idx), true);
            idx += 1;
        }
        for _ in 0..10 {
            cap.feed(&silence_frame(idx), false);
            idx += 1;
        }
        for _ in 0..5 {
            cap.feed(&speech_frame(idx), true);
            idx += 1;
        }

        // 1.6 s of silence: inside the smart window, so still active.
        for _ in 0..50 {
            assert_eq!(cap.feed(&silence_frame(idx), false), CaptureProgress::Active);
            idx += 1;
        }
        // Past 2 s the smart window closes too.
        let mut result = CaptureProgress::Active;
        for _ in 0..20 {
            result = cap.feed(&silence_frame(idx), false);
            idx += 1;
            if result != CaptureProgress::Active {
                break;
            }
        }
        assert_eq!(result, CaptureProgress::Endpointed);
    }
}
