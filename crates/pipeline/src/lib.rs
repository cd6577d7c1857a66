//! Frame-level audio pipeline
//!
//! This crate provides the components that sit between the raw frame
//! stream and the conversation state machine:
//! - Adaptive voice activity detection with a trimmed-mean noise floor
//! - Wake word detection behind a narrow backend trait
//! - Utterance capture with endpointing and quality gates
//! - Barge-in monitoring during playback

pub mod barge_in;
pub mod capture;
pub mod text_quality;
pub mod vad;
pub mod wake;

pub use barge_in::BargeInMonitor;
pub use capture::{CaptureProgress, UtteranceCapturer};
pub use text_quality::TextQuality;
pub use vad::{AdaptiveVad, SpeechModel, VadClass};
pub use wake::{EnergyKeywordDetector, WakeBackend, WakeDetector, WakeEvent};
