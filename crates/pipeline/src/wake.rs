//! Wake word detection
//!
//! The detector backends are opaque models; only `process_frame` is
//! observable. The wrapper owns policy: sensitivity gating, the
//! post-fire cooldown window, and pausing during playback (rate-limited
//! instead when hardware echo cancellation is present).

use std::time::{Duration, Instant};

use walnut_config::WakewordConfig;
use walnut_core::PcmFrame;

/// A detection fired by a backend.
#[derive(Debug, Clone)]
pub struct WakeEvent {
    pub keyword: String,
    /// Scalar in [0, 1].
    pub confidence: f32,
}

/// Narrow detector interface. Backends keep their own internal buffers.
pub trait WakeBackend: Send {
    fn process_frame(&mut self, frame: &PcmFrame) -> Option<WakeEvent>;

    /// Drop internal buffers, e.g. after a conversation ends.
    fn reset(&mut self);
}

/// Bundled open-source style detector: an energy burst of plausible
/// keyword length followed by a dip. Confidence scales with how close
/// the burst duration sits to the keyword sweet spot.
pub struct EnergyKeywordDetector {
    keyword: String,
    threshold: f32,
    burst_frames: u32,
    dip_frames: u32,
}

/// Keyword-like bursts run 0.4 s to 1.6 s.
const MIN_BURST_FRAMES: u32 = 12;
const MAX_BURST_FRAMES: u32 = 50;
const DIP_FRAMES_TO_FIRE: u32 = 6;

impl EnergyKeywordDetector {
    pub fn new(keyword: impl Into<String>, threshold: f32) -> Self {
        Self {
            keyword: keyword.into(),
            threshold,
            burst_frames: 0,
            dip_frames: 0,
        }
    }
}

impl WakeBackend for EnergyKeywordDetector {
    fn process_frame(&mut self, frame: &PcmFrame) -> Option<WakeEvent> {
        if frame.is_gap() {
            return None;
        }

        if frame.energy() > self.threshold {
            self.burst_frames += 1;
            self.dip_frames = 0;
            return None;
        }

        if self.burst_frames == 0 {
            return None;
        }

        self.dip_frames += 1;
        if self.dip_frames < DIP_FRAMES_TO_FIRE {
            return None;
        }

        let burst = self.burst_frames;
        self.burst_frames = 0;
        self.dip_frames = 0;

        if !(MIN_BURST_FRAMES..=MAX_BURST_FRAMES).contains(&burst) {
            return None;
        }

        // Sweet spot around 0.8 s; linear falloff toward the limits.
        let mid = (MIN_BURST_FRAMES + MAX_BURST_FRAMES) as f32 / 2.0;
        let span = (MAX_BURST_FRAMES - MIN_BURST_FRAMES) as f32 / 2.0;
        let confidence = 1.0 - ((burst as f32 - mid).abs() / span) * 0.5;

        Some(WakeEvent {
            keyword: self.keyword.clone(),
            confidence,
        })
    }

    fn reset(&mut self) {
        self.burst_frames = 0;
        self.dip_frames = 0;
    }
}

/// Policy wrapper around a backend.
pub struct WakeDetector {
    backend: Box<dyn WakeBackend>,
    sensitivity: f32,
    cooldown: Duration,
    last_fire: Option<Instant>,
    paused: bool,
    aec_present: bool,
    frame_counter: u64,
}

/// With AEC, detection during playback runs on every Nth frame only.
const AEC_RATE_LIMIT: u64 = 8;

impl WakeDetector {
    pub fn new(backend: Box<dyn WakeBackend>, config: &WakewordConfig) -> Self {
        Self {
            backend,
            sensitivity: config.sensitivity,
            cooldown: Duration::from_millis(config.cooldown_ms),
            last_fire: None,
            paused: false,
            aec_present: config.aec_present,
            frame_counter: 0,
        }
    }

    /// Build the configured backend.
    pub fn from_config(config: &WakewordConfig) -> Self {
        let keyword = config
            .wake_words
            .first()
            .cloned()
            .unwrap_or_else(|| "walnut".to_string());
        let backend: Box<dyn WakeBackend> = match config.engine.as_str() {
            "vendor-sdk" => {
                tracing::warn!(
                    model = %config.model_path,
                    "vendor wake word SDK not linked in this build, using bundled detector"
                );
                Box::new(EnergyKeywordDetector::new(keyword, 0.05))
            }
            _ => Box::new(EnergyKeywordDetector::new(keyword, 0.05)),
        };
        Self::new(backend, config)
    }

    pub fn process_frame(&mut self, frame: &PcmFrame) -> Option<WakeEvent> {
        self.frame_counter += 1;

        if self.paused {
            if !self.aec_present {
                return None;
            }
            if self.frame_counter % AEC_RATE_LIMIT != 0 {
                return None;
            }
        }

        if let Some(last) = self.last_fire {
            if last.elapsed() < self.cooldown {
                // Keep feeding the backend so its buffer stays warm, but
                // suppress fires inside the cooldown window.
                let _ = self.backend.process_frame(frame);
                return None;
            }
        }

        let event = self.backend.process_frame(frame)?;
        if event.confidence < self.sensitivity {
            return None;
        }

        self.last_fire = Some(Instant::now());
        tracing::info!(keyword = %event.keyword, confidence = event.confidence, "wake word detected");
        Some(event)
    }

    /// Suppress detection during playback.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Clear backend buffers and the cooldown window.
    pub fn reset(&mut self) {
        self.backend.reset();
        self.last_fire = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walnut_core::FRAME_SAMPLES;

    fn loud(index: u64) -> PcmFrame {
        PcmFrame::new(vec![6000; FRAME_SAMPLES], index)
    }

    fn quiet(index: u64) -> PcmFrame {
        PcmFrame::new(vec![10; FRAME_SAMPLES], index)
    }

    fn fire_once(det: &mut WakeDetector, start: u64) -> Option<WakeEvent> {
        let mut fired = None;
        for i in 0..25 {
            if let Some(e) = det.process_frame(&loud(start + i)) {
                fired = Some(e);
            }
        }
        for i in 0..10 {
            if let Some(e) = det.process_frame(&quiet(start + 25 + i)) {
                fired = Some(e);
            }
        }
        fired
    }

    fn detector() -> WakeDetector {
        let config = WakewordConfig {
            sensitivity: 0.5,
            cooldown_ms: 1500,
            ..WakewordConfig::default()
        };
        WakeDetector::new(
            Box::new(EnergyKeywordDetector::new("walnut", 0.05)),
            &config,
        )
    }

    #[test]
    fn burst_then_dip_fires() {
        let mut det = detector();
        let event = fire_once(&mut det, 0).expect("should fire");
        assert_eq!(event.keyword, "walnut");
        assert!(event.confidence >= 0.5);
    }

    #[test]
    fn cooldown_suppresses_second_fire() {
        let mut det = detector();
        assert!(fire_once(&mut det, 0).is_some());
        // Immediately retry inside the cooldown window.
        assert!(fire_once(&mut det, 100).is_none());
    }

    #[test]
    fn paused_detector_is_silent() {
        let mut det = detector();
        det.pause();
        assert!(fire_once(&mut det, 0).is_none());
        det.resume();
        assert!(fire_once(&mut det, 100).is_some());
    }

    #[test]
    fn short_blip_does_not_fire() {
        let mut det = detector();
        for i in 0..3 {
            assert!(det.process_frame(&loud(i)).is_none());
        }
        for i in 0..10 {
            assert!(det.process_frame(&quiet(3 + i)).is_none());
        }
    }

    #[test]
    fn very_long_burst_does_not_fire() {
        let mut det = detector();
        for i in 0..80 {
            assert!(det.process_frame(&loud(i)).is_none());
        }
        for i in 0..10 {
            assert!(det.process_frame(&quiet(80 + i)).is_none());
        }
    }
}
