//! Configuration for the walnut voice assistant
//!
//! Settings are loaded in layers: built-in defaults, then an optional
//! config file, then `WALNUT__` environment overrides. Secrets may be
//! referenced as `${VAR}` and are resolved from the environment at use
//! time; a missing variable degrades the engine that needed it instead
//! of failing startup.

mod settings;

pub use settings::{
    load_settings, AlarmConfig, AudioConfig, AudioQualityConfig, AutoFarewellConfig,
    BargeInConfig, CacheConfig, ConversationConfig, HealthConfig, ListeningConfig, LlmConfig,
    LocalTtsConfig, MusicConfig, ObservabilityConfig, PromptTiers, QuietHoursConfig,
    RemoteTtsConfig, RetryPromptsConfig, Settings, StreamingTtsConfig, TtsConfig, TtsEngineKind,
    VadConfig, WakewordConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Resolve a possibly `${VAR}`-valued secret against the environment.
///
/// Returns `None` when the referenced variable is unset or the value is
/// empty, which callers treat as "engine unavailable".
pub fn resolve_secret(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(name) = trimmed.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => {
                tracing::warn!(var = name, "referenced environment variable is unset");
                None
            }
        }
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_secret_passes_through() {
        assert_eq!(resolve_secret("abc123"), Some("abc123".to_string()));
    }

    #[test]
    fn empty_secret_is_none() {
        assert_eq!(resolve_secret(""), None);
        assert_eq!(resolve_secret("   "), None);
    }

    #[test]
    fn env_reference_resolves() {
        std::env::set_var("WALNUT_TEST_KEY_XYZ", "sk-test");
        assert_eq!(
            resolve_secret("${WALNUT_TEST_KEY_XYZ}"),
            Some("sk-test".to_string())
        );
        std::env::remove_var("WALNUT_TEST_KEY_XYZ");
    }

    #[test]
    fn missing_env_reference_is_none() {
        assert_eq!(resolve_secret("${WALNUT_TEST_MISSING_XYZ}"), None);
    }
}
