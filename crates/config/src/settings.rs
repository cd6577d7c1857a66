//! Main settings module

use std::collections::HashMap;
use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Audio device and format configuration
    #[serde(default)]
    pub audio: AudioConfig,

    /// Wake word detection tuning
    #[serde(default)]
    pub wakeword: WakewordConfig,

    /// Capture quality gates, VAD, barge-in, retry prompts
    #[serde(default)]
    pub audio_quality: AudioQualityConfig,

    /// Endpointing configuration
    #[serde(default)]
    pub listening: ListeningConfig,

    /// Dialogue shaping
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Chat behavior
    #[serde(default)]
    pub llm: LlmConfig,

    /// Synthesis routing
    #[serde(default)]
    pub tts: TtsConfig,

    /// Alarm scheduler
    #[serde(default)]
    pub alarm: AlarmConfig,

    /// Background music
    #[serde(default)]
    pub music: MusicConfig,

    /// Night do-not-disturb window
    #[serde(default)]
    pub quiet_hours: QuietHoursConfig,

    /// Remote engine health probing
    #[serde(default)]
    pub health: HealthConfig,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.chunk_size".to_string(),
                message: "chunk size must be nonzero".to_string(),
            });
        }

        let vad = &self.audio_quality.vad;
        if vad.min_threshold > vad.max_threshold {
            return Err(ConfigError::InvalidValue {
                field: "audio_quality.vad.min_threshold".to_string(),
                message: "min_threshold must not exceed max_threshold".to_string(),
            });
        }
        if vad.base_threshold < vad.min_threshold || vad.base_threshold > vad.max_threshold {
            return Err(ConfigError::InvalidValue {
                field: "audio_quality.vad.base_threshold".to_string(),
                message: "base_threshold must lie within [min_threshold, max_threshold]"
                    .to_string(),
            });
        }
        if vad.adaptation_factor <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "audio_quality.vad.adaptation_factor".to_string(),
                message: "adaptation_factor must be positive".to_string(),
            });
        }

        if self.listening.max_duration_secs <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "listening.max_duration_secs".to_string(),
                message: "max listening duration must be positive".to_string(),
            });
        }
        if self.listening.silence_threshold_secs <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "listening.silence_threshold_secs".to_string(),
                message: "silence threshold must be positive".to_string(),
            });
        }

        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.timeout_secs".to_string(),
                message: "llm timeout must be nonzero".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.wakeword.sensitivity) {
            return Err(ConfigError::InvalidValue {
                field: "wakeword.sensitivity".to_string(),
                message: "sensitivity must be in [0, 1]".to_string(),
            });
        }

        Ok(())
    }
}

/// Audio device and PCM format selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Frame length in samples
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Input device: "default" or a hardware name ("hw:0,0" style)
    #[serde(default = "default_device")]
    pub input_device: String,

    #[serde(default = "default_device")]
    pub output_device: String,

    /// Linear gain applied to captured samples
    #[serde(default = "default_input_gain")]
    pub input_gain: f32,
}

fn default_sample_rate() -> u32 {
    16_000
}
fn default_channels() -> u16 {
    1
}
fn default_chunk_size() -> usize {
    512
}
fn default_device() -> String {
    "default".to_string()
}
fn default_input_gain() -> f32 {
    1.0
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            chunk_size: default_chunk_size(),
            input_device: default_device(),
            output_device: default_device(),
            input_gain: default_input_gain(),
        }
    }
}

/// Wake word detection tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakewordConfig {
    /// Detector backend: "open-source" or "vendor-sdk"
    #[serde(default = "default_wake_engine")]
    pub engine: String,

    /// Detection threshold in [0, 1]
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,

    /// Path to the detector model, if the backend needs one
    #[serde(default)]
    pub model_path: String,

    /// Suppression window after a fire
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Keywords the detector listens for
    #[serde(default = "default_wake_words")]
    pub wake_words: Vec<String>,

    /// Spoken acknowledgements after a wake; doubles as the echo word list
    #[serde(default = "default_reply_messages")]
    pub reply_messages: Vec<String>,

    /// Hardware echo cancellation present: wake detection during playback
    /// is rate-limited instead of paused
    #[serde(default)]
    pub aec_present: bool,
}

fn default_wake_engine() -> String {
    "open-source".to_string()
}
fn default_sensitivity() -> f32 {
    0.5
}
fn default_cooldown_ms() -> u64 {
    1500
}
fn default_wake_words() -> Vec<String> {
    vec!["walnut".to_string(), "hey walnut".to_string()]
}
fn default_reply_messages() -> Vec<String> {
    vec![
        "I'm here".to_string(),
        "I'm listening".to_string(),
        "Yes?".to_string(),
    ]
}

impl Default for WakewordConfig {
    fn default() -> Self {
        Self {
            engine: default_wake_engine(),
            sensitivity: default_sensitivity(),
            model_path: String::new(),
            cooldown_ms: default_cooldown_ms(),
            wake_words: default_wake_words(),
            reply_messages: default_reply_messages(),
            aec_present: false,
        }
    }
}

/// Capture quality gates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioQualityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum valid speech duration in seconds
    #[serde(default = "default_min_speech_duration")]
    pub min_speech_duration: f32,

    /// Minimum average energy on the normalized scale
    #[serde(default = "default_min_energy")]
    pub min_energy: f32,

    /// Consecutive rejected utterances allowed per wake session; 0 disables
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Longer trailing-silence window when the utterance seems unfinished
    #[serde(default = "default_smart_silence")]
    pub smart_silence_threshold: f32,

    /// STT confidence floor below which text is rejected as garbage
    #[serde(default = "default_confidence_floor")]
    pub stt_confidence_floor: f32,

    #[serde(default)]
    pub vad: VadConfig,

    #[serde(default)]
    pub interrupt: BargeInConfig,

    #[serde(default)]
    pub retry_prompts: RetryPromptsConfig,
}

fn default_min_speech_duration() -> f32 {
    0.3
}
fn default_min_energy() -> f32 {
    0.008
}
fn default_max_retries() -> u32 {
    1
}
fn default_smart_silence() -> f32 {
    2.0
}
fn default_confidence_floor() -> f32 {
    0.3
}
fn default_true() -> bool {
    true
}

impl Default for AudioQualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_speech_duration: default_min_speech_duration(),
            min_energy: default_min_energy(),
            max_retries: default_max_retries(),
            smart_silence_threshold: default_smart_silence(),
            stt_confidence_floor: default_confidence_floor(),
            vad: VadConfig::default(),
            interrupt: BargeInConfig::default(),
            retry_prompts: RetryPromptsConfig::default(),
        }
    }
}

/// Adaptive VAD behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_true")]
    pub adaptive_enabled: bool,

    #[serde(default = "default_base_threshold")]
    pub base_threshold: f32,

    /// Multiplier over the noise floor
    #[serde(default = "default_adaptation_factor")]
    pub adaptation_factor: f32,

    #[serde(default = "default_min_threshold")]
    pub min_threshold: f32,

    #[serde(default = "default_max_threshold")]
    pub max_threshold: f32,

    /// Silence frames retained for the noise floor estimate
    #[serde(default = "default_noise_window")]
    pub noise_window: usize,
}

fn default_base_threshold() -> f32 {
    0.02
}
fn default_adaptation_factor() -> f32 {
    1.5
}
fn default_min_threshold() -> f32 {
    0.01
}
fn default_max_threshold() -> f32 {
    0.2
}
fn default_noise_window() -> usize {
    50
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            adaptive_enabled: true,
            base_threshold: default_base_threshold(),
            adaptation_factor: default_adaptation_factor(),
            min_threshold: default_min_threshold(),
            max_threshold: default_max_threshold(),
            noise_window: default_noise_window(),
        }
    }
}

/// Barge-in behavior during playback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BargeInConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sample one frame in every N during playback
    #[serde(default = "default_detection_interval")]
    pub detection_interval: u32,

    /// Post-detection audio tail prepended to the next capture, seconds
    #[serde(default = "default_buffer_duration")]
    pub buffer_duration: f32,

    /// Continuous speech needed to trigger, seconds
    #[serde(default = "default_min_speech_duration")]
    pub min_speech_duration: f32,
}

fn default_detection_interval() -> u32 {
    10
}
fn default_buffer_duration() -> f32 {
    2.0
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detection_interval: default_detection_interval(),
            buffer_duration: default_buffer_duration(),
            min_speech_duration: default_min_speech_duration(),
        }
    }
}

/// Prompt variants for one rejection kind, indexed by attempt
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptTiers {
    #[serde(default)]
    pub retry_1: Vec<String>,

    #[serde(default)]
    pub retry_2: Vec<String>,

    /// Spoken once the retry cap is reached
    #[serde(default)]
    pub terminal: Vec<String>,
}

impl PromptTiers {
    /// Prompts for a 1-based attempt number, falling back to the last
    /// non-empty tier.
    pub fn for_attempt(&self, attempt: u32) -> &[String] {
        match attempt {
            1 if !self.retry_1.is_empty() => &self.retry_1,
            _ if !self.retry_2.is_empty() => &self.retry_2,
            _ => &self.retry_1,
        }
    }
}

/// Per-rejection-kind retry prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPromptsConfig {
    #[serde(default = "default_silence_prompts")]
    pub silence: PromptTiers,

    #[serde(default = "default_fragment_prompts")]
    pub fragment: PromptTiers,

    #[serde(default = "default_semantic_prompts")]
    pub semantic: PromptTiers,

    #[serde(default = "default_garbage_prompts")]
    pub garbage: PromptTiers,

    /// Terminal apology when no kind-specific one is configured
    #[serde(default = "default_apology")]
    pub apology: Vec<String>,
}

fn default_silence_prompts() -> PromptTiers {
    PromptTiers {
        retry_1: vec!["I didn't hear anything. Could you say that again?".to_string()],
        retry_2: vec!["Still nothing on my end. One more try?".to_string()],
        terminal: vec![],
    }
}
fn default_fragment_prompts() -> PromptTiers {
    PromptTiers {
        retry_1: vec!["Sorry, that was too quiet for me. Could you repeat it?".to_string()],
        retry_2: vec!["I still couldn't make that out. A little louder, please?".to_string()],
        terminal: vec![],
    }
}
fn default_semantic_prompts() -> PromptTiers {
    PromptTiers {
        retry_1: vec!["Sorry, I didn't quite catch that. Could you rephrase?".to_string()],
        retry_2: vec!["I'm still not sure what you meant. Try once more?".to_string()],
        terminal: vec![],
    }
}
fn default_garbage_prompts() -> PromptTiers {
    PromptTiers {
        retry_1: vec!["Sorry, I didn't understand. Could you say that again?".to_string()],
        retry_2: vec!["That didn't come through clearly. One more time?".to_string()],
        terminal: vec![],
    }
}
fn default_apology() -> Vec<String> {
    vec!["Sorry, I'm having trouble understanding right now. Let's try again later.".to_string()]
}

impl Default for RetryPromptsConfig {
    fn default() -> Self {
        Self {
            silence: default_silence_prompts(),
            fragment: default_fragment_prompts(),
            semantic: default_semantic_prompts(),
            garbage: default_garbage_prompts(),
            apology: default_apology(),
        }
    }
}

impl RetryPromptsConfig {
    pub fn tiers_for(&self, kind: &str) -> &PromptTiers {
        match kind {
            "silence" => &self.silence,
            "fragment" => &self.fragment,
            "semantic" => &self.semantic,
            _ => &self.garbage,
        }
    }
}

/// Endpointing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListeningConfig {
    /// Maximum utterance duration in seconds
    #[serde(default = "default_max_listen")]
    pub max_duration_secs: f32,

    /// Trailing silence that ends an utterance, seconds
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold_secs: f32,
}

fn default_max_listen() -> f32 {
    10.0
}
fn default_silence_threshold() -> f32 {
    1.5
}

impl Default for ListeningConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_listen(),
            silence_threshold_secs: default_silence_threshold(),
        }
    }
}

/// Dialogue shaping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Maximum conversation turns before forcing a reset
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Recognize short follow-ups that lean on prior context
    #[serde(default = "default_true")]
    pub continuation_support: bool,

    #[serde(default)]
    pub auto_farewell: AutoFarewellConfig,
}

fn default_max_turns() -> u32 {
    20
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            continuation_support: true,
            auto_farewell: AutoFarewellConfig::default(),
        }
    }
}

/// Auto-farewell after an idle conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoFarewellConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Idle seconds before the farewell plays
    #[serde(default = "default_farewell_timeout")]
    pub idle_timeout_secs: f32,

    #[serde(default = "default_farewell_messages")]
    pub farewell_messages: Vec<String>,
}

fn default_farewell_timeout() -> f32 {
    8.0
}
fn default_farewell_messages() -> Vec<String> {
    vec![
        "Alright, call me if you need anything.".to_string(),
        "I'll be here if you need me.".to_string(),
    ]
}

impl Default for AutoFarewellConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout_secs: default_farewell_timeout(),
            farewell_messages: default_farewell_messages(),
        }
    }
}

/// Chat behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// API key or `${VAR}` reference
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Turns of history sent with each request
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Spoken when the chat backend is unreachable
    #[serde(default = "default_offline_phrase")]
    pub offline_phrase: String,
}

fn default_llm_model() -> String {
    "qwen-turbo".to_string()
}
fn default_llm_base_url() -> String {
    "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    512
}
fn default_max_history() -> usize {
    10
}
fn default_system_prompt() -> String {
    "You are Walnut, a friendly home voice assistant. Keep replies short and speakable."
        .to_string()
}
fn default_llm_timeout() -> u64 {
    10
}
fn default_offline_phrase() -> String {
    "Sorry, I can't reach my brain right now. Please try again in a bit.".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_history: default_max_history(),
            system_prompt: default_system_prompt(),
            timeout_secs: default_llm_timeout(),
            offline_phrase: default_offline_phrase(),
        }
    }
}

/// Which synthesis tiers are wired up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TtsEngineKind {
    /// Local engine only
    Local,
    /// Remote engine with no local fallback
    Remote,
    /// Remote preferred, local fallback
    #[default]
    Hybrid,
    /// Streaming cloud engine only
    RemoteCloud,
    /// Streaming cloud preferred, then remote, then local
    HybridCloud,
}

/// Synthesis routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default)]
    pub engine: TtsEngineKind,

    #[serde(default)]
    pub local: LocalTtsConfig,

    #[serde(default)]
    pub remote: RemoteTtsConfig,

    #[serde(default)]
    pub streaming: StreamingTtsConfig,

    /// Text length at which streaming synthesis is preferred
    #[serde(default = "default_streaming_threshold")]
    pub streaming_threshold: usize,

    /// Scenarios always routed to the streaming tier
    #[serde(default = "default_scenario_streaming")]
    pub scenario_streaming: HashMap<String, bool>,

    #[serde(default = "default_true")]
    pub fallback_to_local: bool,

    #[serde(default = "default_tts_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_streaming_threshold() -> usize {
    100
}
fn default_scenario_streaming() -> HashMap<String, bool> {
    HashMap::from([
        ("llm_reply_long".to_string(), true),
        ("story".to_string(), true),
        ("alarm_cheerword".to_string(), true),
    ])
}
fn default_tts_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    200
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            engine: TtsEngineKind::default(),
            local: LocalTtsConfig::default(),
            remote: RemoteTtsConfig::default(),
            streaming: StreamingTtsConfig::default(),
            streaming_threshold: default_streaming_threshold(),
            scenario_streaming: default_scenario_streaming(),
            fallback_to_local: true,
            max_retries: default_tts_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            cache: CacheConfig::default(),
        }
    }
}

/// Local synthesis engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalTtsConfig {
    #[serde(default = "default_local_voice")]
    pub voice: String,

    #[serde(default = "default_local_tts_rate")]
    pub sample_rate: u32,

    #[serde(default)]
    pub model_path: String,
}

fn default_local_voice() -> String {
    "en-amber-low".to_string()
}
fn default_local_tts_rate() -> u32 {
    16_000
}

impl Default for LocalTtsConfig {
    fn default() -> Self {
        Self {
            voice: default_local_voice(),
            sample_rate: default_local_tts_rate(),
            model_path: String::new(),
        }
    }
}

/// Non-streaming remote synthesis engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTtsConfig {
    #[serde(default)]
    pub base_url: String,

    /// API key or `${VAR}` reference
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_remote_voice")]
    pub voice: String,

    #[serde(default = "default_remote_tts_timeout")]
    pub timeout_secs: u64,
}

fn default_remote_voice() -> String {
    "warm-female-1".to_string()
}
fn default_remote_tts_timeout() -> u64 {
    30
}

impl Default for RemoteTtsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            voice: default_remote_voice(),
            timeout_secs: default_remote_tts_timeout(),
        }
    }
}

/// Streaming (websocket) synthesis engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingTtsConfig {
    #[serde(default)]
    pub url: String,

    /// API key or `${VAR}` reference
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_remote_voice")]
    pub voice: String,

    #[serde(default = "default_streaming_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_streaming_connect_timeout() -> u64 {
    30
}

impl Default for StreamingTtsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            voice: default_remote_voice(),
            connect_timeout_secs: default_streaming_connect_timeout(),
        }
    }
}

/// Phrase cache behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub warmup_on_startup: bool,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// 0 means no age-based eviction
    #[serde(default)]
    pub max_cache_age_days: u32,

    /// Extra phrases included in warm-up beyond the auto-extracted set
    #[serde(default)]
    pub warmup_phrases: Vec<String>,
}

fn default_cache_dir() -> String {
    "./data/tts_cache".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warmup_on_startup: true,
            cache_dir: default_cache_dir(),
            max_cache_age_days: 0,
            warmup_phrases: Vec::new(),
        }
    }
}

/// Alarm scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_alarm_db")]
    pub storage_path: String,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: f32,

    /// Ringtone duration cap, seconds
    #[serde(default = "default_ringtone_duration")]
    pub ringtone_duration_secs: u32,

    #[serde(default = "default_snooze_minutes")]
    pub snooze_default_minutes: u32,
}

fn default_alarm_db() -> String {
    "./data/alarms.db".to_string()
}
fn default_check_interval() -> f32 {
    1.0
}
fn default_ringtone_duration() -> u32 {
    30
}
fn default_snooze_minutes() -> u32 {
    10
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_path: default_alarm_db(),
            check_interval_secs: default_check_interval(),
            ringtone_duration_secs: default_ringtone_duration(),
            snooze_default_minutes: default_snooze_minutes(),
        }
    }
}

/// Background music
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_music_dir")]
    pub library_path: String,

    #[serde(default = "default_music_volume")]
    pub initial_volume: f32,
}

fn default_music_dir() -> String {
    "./assets/music".to_string()
}
fn default_music_volume() -> f32 {
    0.7
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            library_path: default_music_dir(),
            initial_volume: default_music_volume(),
        }
    }
}

/// Night do-not-disturb window; a ringing alarm bypasses it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHoursConfig {
    #[serde(default)]
    pub enabled: bool,

    /// "HH:MM"
    #[serde(default = "default_quiet_start")]
    pub start: String,

    /// "HH:MM"; may be earlier than `start` for an overnight window
    #[serde(default = "default_quiet_end")]
    pub end: String,
}

fn default_quiet_start() -> String {
    "23:00".to_string()
}
fn default_quiet_end() -> String {
    "06:00".to_string()
}

impl Default for QuietHoursConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: default_quiet_start(),
            end: default_quiet_end(),
        }
    }
}

/// Remote engine health probing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval")]
    pub check_interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_health_interval() -> u64 {
    3600
}
fn default_probe_timeout() -> u64 {
    5
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_health_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// Hint surfaced by the `logs` CLI command
    #[serde(default = "default_log_path")]
    pub log_path: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_path() -> String {
    "./data/walnut.log".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            log_path: default_log_path(),
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (WALNUT__ prefix, `__` separator)
/// 2. The given config file, if any
/// 3. config/local.{yaml,toml,json} (written by `config --set`)
/// 4. config/default.{yaml,toml,json}, if present
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));
    builder = builder.add_source(File::with_name("config/local").required(false));

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("WALNUT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.audio.chunk_size, 512);
        assert_eq!(settings.listening.max_duration_secs, 10.0);
        assert_eq!(settings.audio_quality.max_retries, 1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        settings.audio_quality.vad.min_threshold = 0.5;
        settings.audio_quality.vad.max_threshold = 0.1;
        assert!(settings.validate().is_err());

        settings.audio_quality.vad = VadConfig::default();
        settings.audio.chunk_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_prompt_tier_selection() {
        let prompts = RetryPromptsConfig::default();
        let tier = prompts.tiers_for("silence");
        assert!(!tier.for_attempt(1).is_empty());
        assert!(!tier.for_attempt(2).is_empty());
        // Attempts past the last configured tier reuse it
        assert_eq!(tier.for_attempt(5), tier.for_attempt(2));
    }

    #[test]
    fn test_scenario_streaming_defaults() {
        let tts = TtsConfig::default();
        assert_eq!(tts.scenario_streaming.get("story"), Some(&true));
        assert_eq!(tts.streaming_threshold, 100);
    }
}
