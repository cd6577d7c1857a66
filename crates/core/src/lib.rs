//! Core traits and types for the walnut voice assistant
//!
//! This crate provides foundational types used across all other crates:
//! - PCM frame and utterance types
//! - Error types
//! - Dialogue history
//! - STT transcript types

pub mod audio;
pub mod dialogue;
pub mod error;
pub mod perf;
pub mod transcript;
pub mod utterance;

pub use audio::{rms_energy, FrameKind, PcmFrame, FRAME_SAMPLES, SAMPLE_RATE};
pub use dialogue::{DialogueContext, TurnRole};
pub use error::{AudioError, EngineError, QualityRejection, StateError, StorageError};
pub use perf::PerfMonitor;
pub use transcript::TranscriptResult;
pub use utterance::Utterance;
