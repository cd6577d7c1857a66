//! Adaptive voice activity detection
//!
//! Energy-based classification over a running noise-floor estimate. The
//! floor is a trimmed mean of recent silence energies so a single loud
//! transient (a door slam) cannot permanently raise the threshold.
//! Adaptation freezes while the user or the assistant is speaking.

use std::collections::VecDeque;

use walnut_config::VadConfig;
use walnut_core::PcmFrame;

/// Frame classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadClass {
    Speech,
    Silence,
}

/// Optional external VAD model hook. When present its verdict is
/// combined with the energy gate by logical AND.
pub trait SpeechModel: Send {
    fn is_speech(&mut self, frame: &PcmFrame) -> bool;
}

/// Adaptive energy VAD.
pub struct AdaptiveVad {
    config: VadConfig,
    noise: VecDeque<f32>,
    frozen: bool,
    model: Option<Box<dyn SpeechModel>>,
}

impl AdaptiveVad {
    pub fn new(config: VadConfig) -> Self {
        let window = config.noise_window.max(1);
        Self {
            config,
            noise: VecDeque::with_capacity(window),
            frozen: false,
            model: None,
        }
    }

    /// Attach an external VAD model.
    pub fn with_model(mut self, model: Box<dyn SpeechModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Classify a frame, updating the noise floor on silence.
    pub fn classify(&mut self, frame: &PcmFrame) -> VadClass {
        // Gaps carry no ambience; classify silent and leave the floor alone.
        if frame.is_gap() {
            return VadClass::Silence;
        }

        let energy = frame.energy();
        let over_threshold = energy > self.threshold();

        let speech = if over_threshold {
            match &mut self.model {
                Some(model) => model.is_speech(frame),
                None => true,
            }
        } else {
            false
        };

        if !speech && !self.frozen {
            if self.noise.len() >= self.config.noise_window.max(1) {
                self.noise.pop_front();
            }
            self.noise.push_back(energy);
        }

        if speech {
            VadClass::Speech
        } else {
            VadClass::Silence
        }
    }

    /// Current adaptive threshold, always within [min, max].
    pub fn threshold(&self) -> f32 {
        if !self.config.adaptive_enabled {
            return self
                .config
                .base_threshold
                .clamp(self.config.min_threshold, self.config.max_threshold);
        }

        let adapted = self
            .config
            .base_threshold
            .max(self.noise_floor() * self.config.adaptation_factor);
        adapted.clamp(self.config.min_threshold, self.config.max_threshold)
    }

    /// Trimmed-mean noise floor over the retained silence window. The
    /// loudest 5% of samples are discarded before averaging.
    pub fn noise_floor(&self) -> f32 {
        if self.noise.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<f32> = self.noise.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let keep = ((sorted.len() as f32) * 0.95).ceil() as usize;
        let keep = keep.clamp(1, sorted.len());
        let sum: f32 = sorted[..keep].iter().sum();
        sum / keep as f32
    }

    /// Stop learning the floor (entering LISTENING or SPEAKING).
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Resume learning the floor.
    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Drop the learned floor, e.g. after relocating the device.
    pub fn reset(&mut self) {
        self.noise.clear();
    }
}
