//! Synthesis dispatch
//!
//! Single entry point for all speech output. Per request: consult the
//! cache, pick a tier, retry within the tier, fall back down the tier
//! list, write the result through the cache. Concurrent requests for
//! the same fingerprint coalesce onto one build.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use walnut_config::{Settings, TtsConfig, TtsEngineKind};
use walnut_core::EngineError;
use walnut_engines::EngineAvailability;

use crate::backend::{
    LocalTtsEngine, RemoteTtsEngine, StreamingTtsEngine, SynthesizedAudio, TtsBackend,
};
use crate::cache::PhraseCache;
use crate::fingerprint::Fingerprint;

/// Tag attached to each request; drives streaming routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsScenario {
    WakeResponse,
    RetryPrompt,
    Farewell,
    LlmReply,
    LlmReplyLong,
    AlarmCheerword,
    Story,
    System,
}

impl TtsScenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtsScenario::WakeResponse => "wake_response",
            TtsScenario::RetryPrompt => "retry_prompt",
            TtsScenario::Farewell => "farewell",
            TtsScenario::LlmReply => "llm_reply",
            TtsScenario::LlmReplyLong => "llm_reply_long",
            TtsScenario::AlarmCheerword => "alarm_cheerword",
            TtsScenario::Story => "story",
            TtsScenario::System => "system",
        }
    }
}

type BuildResult = Result<Arc<SynthesizedAudio>, EngineError>;

/// Tiered, cache-backed synthesis dispatcher.
pub struct TtsDispatcher {
    config: TtsConfig,
    cache: Option<Arc<PhraseCache>>,
    local: Arc<dyn TtsBackend>,
    remote: Option<Arc<dyn TtsBackend>>,
    streaming: Option<Arc<dyn TtsBackend>>,
    remote_health: EngineAvailability,
    streaming_health: EngineAvailability,
    inflight: Mutex<HashMap<Fingerprint, broadcast::Sender<BuildResult>>>,
}

impl TtsDispatcher {
    pub fn new(
        config: TtsConfig,
        cache: Option<Arc<PhraseCache>>,
        local: Arc<dyn TtsBackend>,
        remote: Option<Arc<dyn TtsBackend>>,
        streaming: Option<Arc<dyn TtsBackend>>,
    ) -> Self {
        Self {
            cache,
            local,
            remote,
            streaming,
            remote_health: EngineAvailability::new("remote-tts", true),
            streaming_health: EngineAvailability::new("streaming-tts", true),
            config,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Build the configured backends.
    pub fn from_config(
        config: TtsConfig,
        cache: Option<Arc<PhraseCache>>,
    ) -> Result<Self, EngineError> {
        let local: Arc<dyn TtsBackend> = Arc::new(LocalTtsEngine::new(&config.local));

        let remote: Option<Arc<dyn TtsBackend>> = match config.engine {
            TtsEngineKind::Remote | TtsEngineKind::Hybrid | TtsEngineKind::HybridCloud => {
                Some(Arc::new(RemoteTtsEngine::new(config.remote.clone())?))
            }
            _ => None,
        };

        let streaming: Option<Arc<dyn TtsBackend>> = match config.engine {
            TtsEngineKind::RemoteCloud | TtsEngineKind::HybridCloud => {
                Some(Arc::new(StreamingTtsEngine::new(config.streaming.clone())))
            }
            _ => None,
        };

        Ok(Self::new(config, cache, local, remote, streaming))
    }

    /// Availability flag for the remote tier (register with the health
    /// monitor).
    pub fn remote_availability(&self) -> EngineAvailability {
        self.remote_health.clone()
    }

    pub fn streaming_availability(&self) -> EngineAvailability {
        self.streaming_health.clone()
    }

    /// Fingerprint for a text under the current engine configuration.
    pub fn fingerprint(&self, text: &str) -> Fingerprint {
        let engine = match self.config.engine {
            TtsEngineKind::Local => "local",
            TtsEngineKind::Remote => "remote",
            TtsEngineKind::Hybrid => "hybrid",
            TtsEngineKind::RemoteCloud => "remote-cloud",
            TtsEngineKind::HybridCloud => "hybrid-cloud",
        };
        Fingerprint::compute(text, engine, self.primary_voice(), walnut_core::SAMPLE_RATE, "pcm16")
    }

    fn primary_voice(&self) -> &str {
        match self.config.engine {
            TtsEngineKind::Local => &self.config.local.voice,
            TtsEngineKind::Remote | TtsEngineKind::Hybrid => &self.config.remote.voice,
            TtsEngineKind::RemoteCloud | TtsEngineKind::HybridCloud => {
                &self.config.streaming.voice
            }
        }
    }

    /// Synthesize text, coalescing concurrent requests per fingerprint.
    pub async fn synthesize(
        &self,
        text: &str,
        scenario: TtsScenario,
    ) -> Result<Arc<SynthesizedAudio>, EngineError> {
        let fingerprint = self.fingerprint(text);

        loop {
            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.lookup(&fingerprint) {
                    tracing::debug!(fingerprint = %fingerprint.hex(), "cache hit");
                    return Ok(Arc::new(SynthesizedAudio {
                        samples: hit.samples,
                        sample_rate: hit.sample_rate,
                    }));
                }
            }

            // At most one build per fingerprint: late arrivals wait on
            // the builder's channel instead of synthesizing again.
            let mut waiter = None;
            let builder_tx = {
                let mut inflight = self.inflight.lock();
                match inflight.get(&fingerprint) {
                    Some(tx) => {
                        waiter = Some(tx.subscribe());
                        None
                    }
                    None => {
                        let (tx, _) = broadcast::channel(1);
                        inflight.insert(fingerprint, tx.clone());
                        Some(tx)
                    }
                }
            };

            if let Some(mut rx) = waiter {
                match rx.recv().await {
                    Ok(result) => return result,
                    // Builder died without sending; start over.
                    Err(_) => continue,
                }
            }

            let Some(tx) = builder_tx else { continue };
            let result = self.build(text, scenario).await.map(Arc::new);

            if let (Ok(audio), Some(cache)) = (&result, &self.cache) {
                if let Err(e) = cache.store(&fingerprint, &audio.samples, audio.sample_rate, text)
                {
                    tracing::warn!(error = %e, "cache write failed");
                }
            }

            // Remove before sending so requests arriving after the send
            // see the cache entry instead of a dead channel.
            self.inflight.lock().remove(&fingerprint);
            let _ = tx.send(result.clone());
            return result;
        }
    }

    /// Walk the tier list with per-tier retries.
    async fn build(
        &self,
        text: &str,
        scenario: TtsScenario,
    ) -> Result<SynthesizedAudio, EngineError> {
        let tiers = self.route(text, scenario);
        if tiers.is_empty() {
            return Err(EngineError::Unavailable("no synthesis tier available".to_string()));
        }

        let attempts = self.config.max_retries.max(1);
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut last_error = EngineError::Unavailable("no tier attempted".to_string());

        for (backend, health) in tiers {
            for attempt in 1..=attempts {
                match backend.synthesize(text).await {
                    Ok(audio) => return Ok(audio),
                    Err(e) => {
                        tracing::warn!(
                            engine = backend.id(),
                            attempt,
                            error = %e,
                            "synthesis attempt failed"
                        );
                        last_error = e;
                        if attempt < attempts {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
            if let Some(health) = health {
                health.mark_failed();
            }
        }

        Err(last_error)
    }

    /// Ordered (backend, health flag) tiers for one request.
    fn route(
        &self,
        text: &str,
        scenario: TtsScenario,
    ) -> Vec<(Arc<dyn TtsBackend>, Option<EngineAvailability>)> {
        let streaming_scenario = self
            .config
            .scenario_streaming
            .get(scenario.as_str())
            .copied()
            .unwrap_or(false);
        let wants_streaming =
            streaming_scenario || text.chars().count() >= self.config.streaming_threshold;

        let mut tiers: Vec<(Arc<dyn TtsBackend>, Option<EngineAvailability>)> = Vec::new();

        let streaming_tier_wanted = match self.config.engine {
            // The pure cloud engine has no other remote tier.
            TtsEngineKind::RemoteCloud => true,
            TtsEngineKind::HybridCloud => wants_streaming,
            _ => false,
        };

        if streaming_tier_wanted {
            if let Some(streaming) = &self.streaming {
                if streaming.is_available()
                    && self.streaming_health.is_available()
                    && !self.streaming_health.prefers_local()
                {
                    tiers.push((Arc::clone(streaming), Some(self.streaming_health.clone())));
                }
            }
        }

        if matches!(
            self.config.engine,
            TtsEngineKind::Remote | TtsEngineKind::Hybrid | TtsEngineKind::HybridCloud
        ) {
            if let Some(remote) = &self.remote {
                if remote.is_available()
                    && self.remote_health.is_available()
                    && !self.remote_health.prefers_local()
                {
                    tiers.push((Arc::clone(remote), Some(self.remote_health.clone())));
                }
            }
        }

        let local_wanted = match self.config.engine {
            TtsEngineKind::Local => true,
            _ => self.config.fallback_to_local || tiers.is_empty(),
        };
        if local_wanted {
            tiers.push((Arc::clone(&self.local), None));
        }

        tiers
    }

    /// Pre-render any missing fingerprints. Runs at background priority:
    /// it yields between phrases and never blocks first-wake readiness.
    pub async fn warm_up(&self, phrases: &[String]) {
        let Some(cache) = &self.cache else {
            return;
        };

        let mut rendered = 0usize;
        let mut skipped = 0usize;
        for phrase in phrases {
            if phrase.trim().is_empty() {
                continue;
            }
            if cache.contains(&self.fingerprint(phrase)) {
                skipped += 1;
                continue;
            }
            match self.synthesize(phrase, TtsScenario::System).await {
                Ok(_) => rendered += 1,
                Err(e) => {
                    tracing::warn!(error = %e, phrase = %phrase, "warm-up synthesis failed")
                }
            }
            tokio::task::yield_now().await;
        }

        tracing::info!(rendered, skipped, "phrase cache warm-up finished");
    }
}

/// The warm-up set: wake replies, retry prompts, farewells, and the
/// fixed system phrases, deduplicated.
pub fn warmup_phrases(settings: &Settings) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut phrases = Vec::new();
    let mut add = |phrase: &String| {
        if !phrase.trim().is_empty() && seen.insert(phrase.clone()) {
            phrases.push(phrase.clone());
        }
    };

    for phrase in &settings.wakeword.reply_messages {
        add(phrase);
    }

    let prompts = &settings.audio_quality.retry_prompts;
    for tiers in [&prompts.silence, &prompts.fragment, &prompts.semantic, &prompts.garbage] {
        for list in [&tiers.retry_1, &tiers.retry_2, &tiers.terminal] {
            for phrase in list {
                add(phrase);
            }
        }
    }
    for phrase in &prompts.apology {
        add(phrase);
    }

    for phrase in &settings.conversation.auto_farewell.farewell_messages {
        add(phrase);
    }

    add(&settings.llm.offline_phrase);

    for phrase in &settings.tts.cache.warmup_phrases {
        add(phrase);
    }

    phrases
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubBackend {
        id: &'static str,
        calls: AtomicU32,
        fail: bool,
        delay: Duration,
    }

    impl StubBackend {
        fn new(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                calls: AtomicU32::new(0),
                fail: false,
                delay: Duration::ZERO,
            })
        }

        fn failing(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                calls: AtomicU32::new(0),
                fail: true,
                delay: Duration::ZERO,
            })
        }

        fn slow(id: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                id,
                calls: AtomicU32::new(0),
                fail: false,
                delay,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TtsBackend for StubBackend {
        fn id(&self) -> &'static str {
            self.id
        }
        fn voice(&self) -> &str {
            "stub"
        }
        fn sample_rate(&self) -> u32 {
            16_000
        }
        async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(EngineError::Transport("stub failure".to_string()));
            }
            Ok(SynthesizedAudio {
                samples: vec![text.len() as i16; 256],
                sample_rate: 16_000,
            })
        }
    }

    fn quick_config() -> TtsConfig {
        TtsConfig {
            engine: TtsEngineKind::Hybrid,
            max_retries: 1,
            retry_delay_ms: 1,
            ..TtsConfig::default()
        }
    }

    fn cache_in(dir: &tempfile::TempDir) -> Arc<PhraseCache> {
        Arc::new(PhraseCache::open(dir.path()).unwrap())
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_local() {
        let remote = StubBackend::failing("remote-http");
        let local = StubBackend::new("local-formant");
        let dispatcher = TtsDispatcher::new(
            quick_config(),
            None,
            Arc::clone(&local) as Arc<dyn TtsBackend>,
            Some(Arc::clone(&remote) as Arc<dyn TtsBackend>),
            None,
        );

        let audio = dispatcher.synthesize("hello", TtsScenario::LlmReply).await.unwrap();
        assert!(!audio.samples.is_empty());
        assert_eq!(remote.calls(), 1);
        assert_eq!(local.calls(), 1);
        // The failed remote now biases routing toward local.
        assert!(dispatcher.remote_availability().prefers_local());
    }

    #[tokio::test]
    async fn cache_hit_skips_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let local = StubBackend::new("local-formant");
        let dispatcher = TtsDispatcher::new(
            TtsConfig {
                engine: TtsEngineKind::Local,
                ..quick_config()
            },
            Some(cache_in(&dir)),
            Arc::clone(&local) as Arc<dyn TtsBackend>,
            None,
            None,
        );

        let first = dispatcher.synthesize("hello", TtsScenario::WakeResponse).await.unwrap();
        let second = dispatcher.synthesize("hello", TtsScenario::WakeResponse).await.unwrap();
        assert_eq!(first.samples, second.samples);
        assert_eq!(local.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_coalesce_to_one_build() {
        let dir = tempfile::tempdir().unwrap();
        let local = StubBackend::slow("local-formant", Duration::from_millis(50));
        let dispatcher = Arc::new(TtsDispatcher::new(
            TtsConfig {
                engine: TtsEngineKind::Local,
                ..quick_config()
            },
            Some(cache_in(&dir)),
            Arc::clone(&local) as Arc<dyn TtsBackend>,
            None,
            None,
        ));

        let a = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move { d.synthesize("hello", TtsScenario::WakeResponse).await })
        };
        let b = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move { d.synthesize("hello", TtsScenario::WakeResponse).await })
        };

        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(a.samples, b.samples);
        assert_eq!(local.calls(), 1, "exactly one engine call expected");
    }

    #[tokio::test]
    async fn all_tiers_failing_surfaces_the_error() {
        let remote = StubBackend::failing("remote-http");
        let local = StubBackend::failing("local-formant");
        let dispatcher = TtsDispatcher::new(
            quick_config(),
            None,
            local as Arc<dyn TtsBackend>,
            Some(remote as Arc<dyn TtsBackend>),
            None,
        );

        assert!(dispatcher.synthesize("hello", TtsScenario::LlmReply).await.is_err());
    }

    #[tokio::test]
    async fn streaming_tier_is_used_for_long_text() {
        let streaming = StubBackend::new("streaming-ws");
        let remote = StubBackend::new("remote-http");
        let local = StubBackend::new("local-formant");
        let dispatcher = TtsDispatcher::new(
            TtsConfig {
                engine: TtsEngineKind::HybridCloud,
                streaming_threshold: 20,
                ..quick_config()
            },
            None,
            local as Arc<dyn TtsBackend>,
            Some(remote.clone() as Arc<dyn TtsBackend>),
            Some(streaming.clone() as Arc<dyn TtsBackend>),
        );

        let long_text = "this reply is comfortably past the threshold".to_string();
        dispatcher.synthesize(&long_text, TtsScenario::LlmReply).await.unwrap();
        assert_eq!(streaming.calls(), 1);
        assert_eq!(remote.calls(), 0);

        // Short text routed to the non-streaming remote.
        dispatcher.synthesize("short", TtsScenario::LlmReply).await.unwrap();
        assert_eq!(remote.calls(), 1);
    }

    #[tokio::test]
    async fn warm_up_populates_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        let local = StubBackend::new("local-formant");
        let dispatcher = TtsDispatcher::new(
            TtsConfig {
                engine: TtsEngineKind::Local,
                ..quick_config()
            },
            Some(Arc::clone(&cache)),
            Arc::clone(&local) as Arc<dyn TtsBackend>,
            None,
            None,
        );

        let phrases = vec!["I'm here".to_string(), "Yes?".to_string()];
        dispatcher.warm_up(&phrases).await;
        assert_eq!(cache.len(), 2);

        // A second warm-up does nothing.
        dispatcher.warm_up(&phrases).await;
        assert_eq!(local.calls(), 2);
    }

    #[test]
    fn warmup_set_is_deduplicated() {
        let mut settings = Settings::default();
        settings.tts.cache.warmup_phrases = vec![
            "I'm here".to_string(), // duplicate of a wake reply
            "Extra phrase".to_string(),
        ];
        let phrases = warmup_phrases(&settings);

        let unique: std::collections::HashSet<_> = phrases.iter().collect();
        assert_eq!(unique.len(), phrases.len());
        assert!(phrases.iter().any(|p| p == "Extra phrase"));
        assert!(phrases.iter().any(|p| p == &settings.llm.offline_phrase));
    }
}
