//! Text-to-speech routing and caching
//!
//! The dispatcher is the single synthesis entry point: it consults the
//! phrase cache, picks a tier (streaming, remote, local), coalesces
//! concurrent requests per fingerprint, and writes results back through
//! the cache.

pub mod backend;
pub mod cache;
pub mod dispatcher;
pub mod fingerprint;

pub use backend::{LocalTtsEngine, RemoteTtsEngine, StreamingTtsEngine, SynthesizedAudio, TtsBackend};
pub use cache::{CachedPhrase, PhraseCache};
pub use dispatcher::{warmup_phrases, TtsDispatcher, TtsScenario};
pub use fingerprint::Fingerprint;
