//! Synthesis backends
//!
//! Three tiers behind one trait: a bundled local engine that is always
//! available, a non-streaming HTTP engine, and a websocket streaming
//! engine whose session is closed right after the last chunk.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;

use walnut_config::{resolve_secret, LocalTtsConfig, RemoteTtsConfig, StreamingTtsConfig};
use walnut_core::EngineError;

/// One finished synthesis.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Narrow synthesis interface.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Stable engine identifier, part of the cache fingerprint.
    fn id(&self) -> &'static str;

    fn voice(&self) -> &str;

    fn sample_rate(&self) -> u32;

    fn is_available(&self) -> bool {
        true
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, EngineError>;
}

/// Bundled local engine. Renders each word as a short pitched hum so
/// the assistant always has a voice, however plain, when every remote
/// tier is down. A real on-device model slots in behind the same trait.
pub struct LocalTtsEngine {
    voice: String,
    sample_rate: u32,
}

/// Per-word render length.
const WORD_SECS: f32 = 0.22;
const PAUSE_SECS: f32 = 0.06;

impl LocalTtsEngine {
    pub fn new(config: &LocalTtsConfig) -> Self {
        Self {
            voice: config.voice.clone(),
            sample_rate: config.sample_rate,
        }
    }
}

#[async_trait]
impl TtsBackend for LocalTtsEngine {
    fn id(&self) -> &'static str {
        "local-formant"
    }

    fn voice(&self) -> &str {
        &self.voice
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, EngineError> {
        let rate = self.sample_rate;
        let text = text.to_string();

        // Rendering is pure CPU work; keep it off the reactor.
        let samples = tokio::task::spawn_blocking(move || render_hum(&text, rate))
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        if samples.is_empty() {
            return Err(EngineError::Rejected("nothing to synthesize".to_string()));
        }

        Ok(SynthesizedAudio {
            samples,
            sample_rate: rate,
        })
    }
}

fn render_hum(text: &str, sample_rate: u32) -> Vec<i16> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let word_len = (WORD_SECS * sample_rate as f32) as usize;
    let pause_len = (PAUSE_SECS * sample_rate as f32) as usize;
    let mut pcm = Vec::with_capacity(words.len() * (word_len + pause_len));

    for word in &words {
        // Pitch derived from the word so output is deterministic.
        let seed: u32 = word.bytes().map(u32::from).sum();
        let freq = 140.0 + (seed % 120) as f32;

        for n in 0..word_len {
            let t = n as f32 / sample_rate as f32;
            // Soft envelope to avoid clicks between words.
            let env = (std::f32::consts::PI * n as f32 / word_len as f32).sin();
            let value = (t * freq * 2.0 * std::f32::consts::PI).sin() * env * 0.25;
            pcm.push((value * f32::from(i16::MAX)) as i16);
        }
        pcm.extend(std::iter::repeat(0i16).take(pause_len));
    }
    pcm
}

#[derive(Debug, Serialize)]
struct RemoteTtsRequest<'a> {
    text: &'a str,
    voice: &'a str,
    sample_rate: u32,
    format: &'a str,
}

/// Non-streaming HTTP engine: JSON request in, raw little-endian PCM
/// bytes out.
pub struct RemoteTtsEngine {
    config: RemoteTtsConfig,
    client: reqwest::Client,
    api_key: Option<String>,
}

impl RemoteTtsEngine {
    pub fn new(config: RemoteTtsConfig) -> Result<Self, EngineError> {
        let api_key = resolve_secret(&config.api_key);
        if api_key.is_none() {
            tracing::warn!("remote tts api key missing, tier will report unavailable");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        Ok(Self {
            config,
            client,
            api_key,
        })
    }
}

#[async_trait]
impl TtsBackend for RemoteTtsEngine {
    fn id(&self) -> &'static str {
        "remote-http"
    }

    fn voice(&self) -> &str {
        &self.config.voice
    }

    fn sample_rate(&self) -> u32 {
        walnut_core::SAMPLE_RATE
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some() && !self.config.base_url.is_empty()
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, EngineError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EngineError::Unavailable("remote tts api key missing".to_string()))?;

        let url = format!("{}/synthesize", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&RemoteTtsRequest {
                text,
                voice: &self.config.voice,
                sample_rate: self.sample_rate(),
                format: "pcm16",
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout(self.config.timeout_secs * 1000)
                } else {
                    EngineError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(EngineError::Rejected(format!(
                "remote tts returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        if bytes.len() < 2 {
            return Err(EngineError::Rejected("remote tts returned no audio".to_string()));
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(SynthesizedAudio {
            samples,
            sample_rate: self.sample_rate(),
        })
    }
}

#[derive(Debug, Serialize)]
struct StreamStart<'a> {
    text: &'a str,
    voice: &'a str,
    sample_rate: u32,
    format: &'a str,
}

/// Websocket streaming engine. Chunks are accumulated and returned as
/// one buffer; the session is closed immediately after the final chunk
/// to avoid idle charges.
pub struct StreamingTtsEngine {
    config: StreamingTtsConfig,
    api_key: Option<String>,
}

impl StreamingTtsEngine {
    pub fn new(config: StreamingTtsConfig) -> Self {
        let api_key = resolve_secret(&config.api_key);
        if api_key.is_none() {
            tracing::warn!("streaming tts api key missing, tier will report unavailable");
        }
        Self { config, api_key }
    }
}

#[async_trait]
impl TtsBackend for StreamingTtsEngine {
    fn id(&self) -> &'static str {
        "streaming-ws"
    }

    fn voice(&self) -> &str {
        &self.config.voice
    }

    fn sample_rate(&self) -> u32 {
        walnut_core::SAMPLE_RATE
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some() && !self.config.url.is_empty()
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, EngineError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EngineError::Unavailable("streaming tts api key missing".to_string()))?;

        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let url = format!("{}?auth={}", self.config.url, api_key);

        let (mut socket, _) = tokio::time::timeout(
            connect_timeout,
            tokio_tungstenite::connect_async(&url),
        )
        .await
        .map_err(|_| EngineError::Timeout(self.config.connect_timeout_secs * 1000))?
        .map_err(|e| EngineError::Transport(e.to_string()))?;

        let start = StreamStart {
            text,
            voice: &self.config.voice,
            sample_rate: self.sample_rate(),
            format: "pcm16",
        };
        let payload =
            serde_json::to_string(&start).map_err(|e| EngineError::Transport(e.to_string()))?;
        socket
            .send(Message::Text(payload))
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let mut samples: Vec<i16> = Vec::new();
        loop {
            let frame = tokio::time::timeout(connect_timeout, socket.next())
                .await
                .map_err(|_| EngineError::Timeout(self.config.connect_timeout_secs * 1000))?;

            match frame {
                Some(Ok(Message::Binary(bytes))) => {
                    samples.extend(
                        bytes
                            .chunks_exact(2)
                            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
                    );
                }
                Some(Ok(Message::Text(msg))) => {
                    // The server signals completion with a JSON done flag.
                    if msg.contains("\"done\"") {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(EngineError::Transport(e.to_string())),
            }
        }

        // Close promptly; idle streaming sessions are billed.
        let _ = socket.close(None).await;

        if samples.is_empty() {
            return Err(EngineError::Rejected("streaming tts returned no audio".to_string()));
        }

        Ok(SynthesizedAudio {
            samples,
            sample_rate: self.sample_rate(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_engine_renders_words() {
        let engine = LocalTtsEngine::new(&LocalTtsConfig::default());
        let audio = engine.synthesize("hello world").await.unwrap();
        assert_eq!(audio.sample_rate, 16_000);
        // Two words plus pauses, a bit over half a second.
        assert!(audio.samples.len() > 8_000);
    }

    #[tokio::test]
    async fn local_engine_is_deterministic() {
        let engine = LocalTtsEngine::new(&LocalTtsConfig::default());
        let a = engine.synthesize("same text").await.unwrap();
        let b = engine.synthesize("same text").await.unwrap();
        assert_eq!(a.samples, b.samples);
    }

    #[tokio::test]
    async fn local_engine_rejects_empty_text() {
        let engine = LocalTtsEngine::new(&LocalTtsConfig::default());
        assert!(engine.synthesize("   ").await.is_err());
    }

    #[test]
    fn remote_without_key_is_unavailable() {
        let engine = RemoteTtsEngine::new(RemoteTtsConfig::default()).unwrap();
        assert!(!engine.is_available());
    }

    #[test]
    fn streaming_without_url_is_unavailable() {
        let engine = StreamingTtsEngine::new(StreamingTtsConfig {
            api_key: "key".to_string(),
            ..StreamingTtsConfig::default()
        });
        assert!(!engine.is_available());
    }
}
