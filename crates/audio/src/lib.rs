//! Audio device I/O for the walnut voice assistant
//!
//! - [`AudioSource`]: continuous microphone capture as fixed-size frames
//! - [`FeedbackPlayer`]: exclusive speaker owner with preemptible playback
//! - [`MusicPlayer`]: duckable background music from a WAV library
//!
//! Device access goes through cpal; everything above the device boundary
//! is testable with the in-memory sink.

pub mod music;
pub mod player;
pub mod sink;
pub mod source;

pub use music::{MusicLibrary, MusicPlayer, Track};
pub use player::FeedbackPlayer;
pub use sink::{CollectingSink, CpalSink, PcmSink};
pub use source::{AudioSource, FrameAssembler};
