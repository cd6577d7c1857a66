//! Shared error types
//!
//! `QualityRejection` is deliberately not an `Error`: a rejected capture
//! is a normal outcome consumed by the retry policy, never surfaced to
//! the user as a failure.

use thiserror::Error;

/// Audio device failures.
#[derive(Error, Debug)]
pub enum AudioError {
    /// Another process holds the device. Fatal to the pipeline.
    #[error("audio device busy: {0}")]
    DeviceBusy(String),

    /// The device disappeared mid-stream; retried before becoming fatal.
    #[error("audio device lost: {0}")]
    DeviceLost(String),

    #[error("audio format mismatch: {0}")]
    FormatMismatch(String),
}

/// Why a captured utterance was rejected by the quality gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityRejection {
    /// Too little speech, or none at all.
    Silence,
    /// Audio present but too quiet or too short to carry words.
    Fragment,
    /// STT produced nothing usable.
    Garbage,
    /// Recognized text fails the plausibility check.
    Semantic,
}

impl QualityRejection {
    /// Key used to select retry prompts from configuration.
    pub fn prompt_key(&self) -> &'static str {
        match self {
            QualityRejection::Silence => "silence",
            QualityRejection::Fragment => "fragment",
            QualityRejection::Garbage => "garbage",
            QualityRejection::Semantic => "semantic",
        }
    }
}

/// External engine failures (STT, LLM, TTS).
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine call timed out after {0} ms")]
    Timeout(u64),

    #[error("engine rejected request: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// State machine programming errors.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

/// Persistent storage failures.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage corrupted: {0}")]
    Corrupted(String),

    #[error("storage conflict: {0}")]
    Conflict(String),
}
