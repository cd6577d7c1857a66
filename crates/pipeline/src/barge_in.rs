//! Barge-in monitoring
//!
//! During playback the machine samples one frame in every
//! `detection_interval`. Once a sampled frame looks like speech the
//! monitor switches to a short horizon where every frame is evaluated,
//! and fires after `min_speech_duration` of continuous speech. Frames
//! observed since the candidate started are buffered so the new capture
//! can be seeded with them.

use walnut_config::BargeInConfig;
use walnut_core::{PcmFrame, SAMPLE_RATE};

pub struct BargeInMonitor {
    enabled: bool,
    detection_interval: u32,
    min_speech_secs: f32,
    tail_max_samples: usize,

    frame_counter: u32,
    candidate: bool,
    speech_run_secs: f32,
    tail: Vec<i16>,
}

impl BargeInMonitor {
    pub fn new(config: &BargeInConfig) -> Self {
        Self {
            enabled: config.enabled,
            detection_interval: config.detection_interval.max(1),
            min_speech_secs: config.min_speech_duration,
            tail_max_samples: (config.buffer_duration * SAMPLE_RATE as f32) as usize,
            frame_counter: 0,
            candidate: false,
            speech_run_secs: 0.0,
            tail: Vec::new(),
        }
    }

    /// Observe a frame during playback. Returns true when barge-in
    /// triggers; the caller then stops playback and takes the tail.
    pub fn observe(&mut self, frame: &PcmFrame, is_speech: bool) -> bool {
        if !self.enabled {
            return false;
        }

        self.frame_counter = self.frame_counter.wrapping_add(1);

        if !self.candidate {
            // Reduced-rate sampling while nothing is happening.
            if self.frame_counter % self.detection_interval != 0 {
                return false;
            }
            if is_speech && !frame.is_gap() {
                self.candidate = true;
                self.speech_run_secs = frame.duration_secs();
                self.tail.clear();
                self.buffer(frame);
            }
            return false;
        }

        // Candidate active: full-rate short horizon.
        self.buffer(frame);
        if is_speech && !frame.is_gap() {
            self.speech_run_secs += frame.duration_secs();
            if self.speech_run_secs >= self.min_speech_secs {
                tracing::info!(
                    speech_secs = self.speech_run_secs,
                    "barge-in detected during playback"
                );
                return true;
            }
        } else {
            self.candidate = false;
            self.speech_run_secs = 0.0;
            self.tail.clear();
        }

        false
    }

    /// Audio buffered since the candidate began, for seeding the next
    /// capture so the interrupting words are not clipped.
    pub fn take_tail(&mut self) -> Vec<i16> {
        self.candidate = false;
        self.speech_run_secs = 0.0;
        std::mem::take(&mut self.tail)
    }

    pub fn reset(&mut self) {
        self.frame_counter = 0;
        self.candidate = false;
        self.speech_run_secs = 0.0;
        self.tail.clear();
    }

    fn buffer(&mut self, frame: &PcmFrame) {
        if self.tail.len() + frame.samples().len() <= self.tail_max_samples {
            self.tail.extend_from_slice(frame.samples());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walnut_core::FRAME_SAMPLES;

    fn monitor() -> BargeInMonitor {
        BargeInMonitor::new(&BargeInConfig::default())
    }

    fn speech(index: u64) -> PcmFrame {
        PcmFrame::new(vec![5000; FRAME_SAMPLES], index)
    }

    fn silence(index: u64) -> PcmFrame {
        PcmFrame::new(vec![0; FRAME_SAMPLES], index)
    }

    #[test]
    fn sustained_speech_triggers() {
        let mut mon = monitor();
        let mut triggered = false;
        for i in 0..60 {
            if mon.observe(&speech(i), true) {
                triggered = true;
                break;
            }
        }
        assert!(triggered);
        assert!(!mon.take_tail().is_empty());
    }

    #[test]
    fn short_blip_does_not_trigger() {
        let mut mon = monitor();
        // Enough speech frames to open a candidate at the sampling point.
        for i in 0..10 {
            assert!(!mon.observe(&speech(i), true));
        }
        // Candidate collapses on the first silent frame, so no trigger.
        for i in 10..40 {
            assert!(!mon.observe(&silence(i), false));
        }
    }

    #[test]
    fn disabled_monitor_never_triggers() {
        let config = BargeInConfig {
            enabled: false,
            ..BargeInConfig::default()
        };
        let mut mon = BargeInMonitor::new(&config);
        for i in 0..100 {
            assert!(!mon.observe(&speech(i), true));
        }
    }

    #[test]
    fn tail_is_bounded() {
        let config = BargeInConfig {
            buffer_duration: 0.1,
            ..BargeInConfig::default()
        };
        let mut mon = BargeInMonitor::new(&config);
        for i in 0..100 {
            mon.observe(&speech(i), true);
        }
        let tail = mon.take_tail();
        assert!(tail.len() <= (0.1 * SAMPLE_RATE as f32) as usize);
    }
}
