//! Speech-to-text engine interface
//!
//! The decoder itself is an external collaborator. CPU-bound decoding
//! belongs on the blocking pool; implementations here are expected to
//! wrap their inference in `spawn_blocking`.

use async_trait::async_trait;

use walnut_core::{EngineError, TranscriptResult, Utterance};

/// Narrow STT interface. The caller applies the call timeout.
#[async_trait]
pub trait SttEngine: Send + Sync {
    async fn transcribe(&self, utterance: &Utterance) -> Result<TranscriptResult, EngineError>;

    /// True once the model is loaded and ready to serve.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Placeholder engine for setups without a local model. Reports itself
/// unavailable so the machine surfaces the offline phrase instead of
/// pretending to hear things.
#[derive(Debug, Default)]
pub struct NullStt;

#[async_trait]
impl SttEngine for NullStt {
    async fn transcribe(&self, _utterance: &Utterance) -> Result<TranscriptResult, EngineError> {
        Err(EngineError::Unavailable("no STT model configured".to_string()))
    }

    fn is_ready(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_stt_is_unavailable() {
        let stt = NullStt;
        assert!(!stt.is_ready());
        let err = stt
            .transcribe(&Utterance::new(vec![0i16; 512]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
