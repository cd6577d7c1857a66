//! Cheerword generation
//!
//! Themed alarms speak a short pep talk instead of the ringtone. The
//! text is LLM-generated when the chat engine is reachable, preferably
//! at set time so the fire path stays fast; the template bank is the
//! fallback either way.

use std::sync::Arc;

use walnut_core::DialogueContext;
use walnut_engines::LlmEngine;

/// Built-in pep talks by theme keyword.
fn template_for(theme: &str) -> &'static str {
    let theme = theme.to_lowercase();
    if theme.contains("morning") || theme.contains("wake") {
        "Good morning! A brand new day is waiting for you. Up you get!"
    } else if theme.contains("workout") || theme.contains("gym") || theme.contains("exercise") {
        "Time to move! Your future self will thank you for this workout."
    } else if theme.contains("study") || theme.contains("work") || theme.contains("focus") {
        "Focus time. One solid session now beats a rushed one later."
    } else {
        "This is your reminder. You've got this!"
    }
}

/// Generates cheerwords, with a plain-text fallback on any failure.
pub struct CheerwordGenerator {
    llm: Option<Arc<dyn LlmEngine>>,
}

impl CheerwordGenerator {
    pub fn new(llm: Option<Arc<dyn LlmEngine>>) -> Self {
        Self { llm }
    }

    /// Generate a short motivational text for the theme. Never fails;
    /// the template bank backs every path.
    pub async fn generate(&self, theme: &str) -> String {
        let Some(llm) = &self.llm else {
            return template_for(theme).to_string();
        };
        if !llm.is_available() {
            return template_for(theme).to_string();
        }

        let prompt = format!(
            "Write two short, upbeat spoken sentences to wake someone up. \
             Theme: {theme}. No emoji, no quotes, plain text only."
        );
        let context = DialogueContext::new(1);

        match llm.chat(&context, &prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => template_for(theme).to_string(),
            Err(e) => {
                tracing::warn!(error = %e, theme, "cheerword generation failed, using template");
                template_for(theme).to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use walnut_core::EngineError;

    struct FixedLlm(&'static str);

    #[async_trait]
    impl LlmEngine for FixedLlm {
        async fn chat(
            &self,
            _context: &DialogueContext,
            _user_text: &str,
        ) -> Result<String, EngineError> {
            Ok(self.0.to_string())
        }
    }

    struct DeadLlm;

    #[async_trait]
    impl LlmEngine for DeadLlm {
        async fn chat(
            &self,
            _context: &DialogueContext,
            _user_text: &str,
        ) -> Result<String, EngineError> {
            Err(EngineError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn uses_llm_text_when_available() {
        let gen = CheerwordGenerator::new(Some(Arc::new(FixedLlm("Rise and shine, champion!"))));
        assert_eq!(gen.generate("morning").await, "Rise and shine, champion!");
    }

    #[tokio::test]
    async fn falls_back_to_template_without_llm() {
        let gen = CheerwordGenerator::new(None);
        let text = gen.generate("workout").await;
        assert!(text.contains("workout"));
    }

    #[tokio::test]
    async fn falls_back_to_template_on_error() {
        let gen = CheerwordGenerator::new(Some(Arc::new(DeadLlm)));
        let text = gen.generate("unusual theme").await;
        assert!(!text.is_empty());
    }
}
