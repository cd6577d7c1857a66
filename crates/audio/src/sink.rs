//! Speaker sinks
//!
//! [`PcmSink`] is the seam between playback logic and the output device.
//! The cpal sink owns the real stream on a dedicated thread; the
//! collecting sink backs tests and the `diag` loopback probe.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use walnut_core::AudioError;

/// Blocking chunk-oriented speaker interface. `write_chunk` returns once
/// the chunk has been accepted; pacing comes from the device buffer.
pub trait PcmSink: Send + Sync {
    fn write_chunk(&self, samples: &[i16], sample_rate: u32) -> Result<(), AudioError>;

    /// Drop queued audio immediately.
    fn flush(&self);
}

/// Keep roughly this much audio queued ahead of the device.
const TARGET_QUEUE_SECS: f32 = 0.25;

/// Real output device. The cpal stream lives on its own thread because
/// streams are not `Send`; this struct only shares the ring buffer.
pub struct CpalSink {
    queue: Arc<Mutex<VecDeque<i16>>>,
    device_rate: u32,
    alive: Arc<AtomicBool>,
}

impl CpalSink {
    /// Open the named output device, falling back to the platform
    /// default when the name is unknown.
    pub fn open(device_name: &str, sample_rate: u32) -> Result<Self, AudioError> {
        let queue: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<u32, AudioError>>();
        let thread_queue = Arc::clone(&queue);
        let thread_alive = Arc::clone(&alive);
        let name = device_name.to_string();

        thread::Builder::new()
            .name("walnut-speaker".to_string())
            .spawn(move || {
                let result = build_output_stream(&name, sample_rate, thread_queue);
                match result {
                    Ok((stream, rate)) => {
                        if stream.play().is_err() {
                            let _ = ready_tx.send(Err(AudioError::DeviceLost(
                                "output stream refused to start".to_string(),
                            )));
                            return;
                        }
                        let _ = ready_tx.send(Ok(rate));
                        while thread_alive.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(100));
                        }
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| AudioError::DeviceLost(e.to_string()))?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| AudioError::DeviceLost("speaker thread died".to_string()))??;

        tracing::debug!(device = %device_name, rate = device_rate, "speaker sink ready");

        Ok(Self {
            queue,
            device_rate,
            alive,
        })
    }
}

impl PcmSink for CpalSink {
    fn write_chunk(&self, samples: &[i16], sample_rate: u32) -> Result<(), AudioError> {
        let resampled;
        let samples = if sample_rate == self.device_rate {
            samples
        } else {
            resampled = resample_linear(samples, sample_rate, self.device_rate);
            &resampled
        };

        // Pace against the device: sleep while the queue is comfortably
        // full so a stop can take effect within a chunk period.
        let target = (self.device_rate as f32 * TARGET_QUEUE_SECS) as usize;
        loop {
            let queued = self.queue.lock().len();
            if queued <= target {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        self.queue.lock().extend(samples.iter().copied());
        Ok(())
    }

    fn flush(&self) {
        self.queue.lock().clear();
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
    }
}

fn build_output_stream(
    device_name: &str,
    preferred_rate: u32,
    queue: Arc<Mutex<VecDeque<i16>>>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();

    let device = resolve_output_device(&host, device_name)?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| AudioError::DeviceLost(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= cpal::SampleRate(preferred_rate)
                && c.max_sample_rate() >= cpal::SampleRate(preferred_rate)
        })
        .map(|c| c.with_sample_rate(cpal::SampleRate(preferred_rate)))
        .or_else(|| device.default_output_config().ok())
        .ok_or_else(|| {
            AudioError::FormatMismatch("no usable output configuration".to_string())
        })?;

    let rate = supported.sample_rate().0;
    let channels = supported.config().channels as usize;
    let config = supported.config();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = queue.lock();
                for frame in data.chunks_mut(channels) {
                    let sample = queue
                        .pop_front()
                        .map(|s| f32::from(s) / f32::from(i16::MAX))
                        .unwrap_or(0.0);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "speaker stream error");
            },
            None,
        )
        .map_err(|e| AudioError::DeviceLost(e.to_string()))?;

    Ok((stream, rate))
}

fn resolve_output_device(
    host: &cpal::Host,
    name: &str,
) -> Result<cpal::Device, AudioError> {
    if name != "default" {
        if let Ok(mut devices) = host.output_devices() {
            if let Some(device) =
                devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
            {
                return Ok(device);
            }
        }
        tracing::warn!(device = %name, "output device not found, falling back to default");
    }

    host.default_output_device()
        .ok_or_else(|| AudioError::DeviceLost("no output device available".to_string()))
}

/// Naive linear resampler; good enough for speech playback.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let left = pos.floor() as usize;
        let right = (left + 1).min(samples.len() - 1);
        let frac = pos - left as f64;
        let sample =
            f64::from(samples[left]) * (1.0 - frac) + f64::from(samples[right]) * frac;
        out.push(sample as i16);
    }

    out
}

/// In-memory sink that records everything written to it. Used by tests
/// and the `diag` loopback probe. An optional per-chunk delay simulates
/// real-time pacing so preemption paths can be exercised.
#[derive(Default)]
pub struct CollectingSink {
    written: Mutex<Vec<i16>>,
    chunk_delay: Option<Duration>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate real-time pacing.
    pub fn paced(chunk_delay: Duration) -> Self {
        Self {
            written: Mutex::new(Vec::new()),
            chunk_delay: Some(chunk_delay),
        }
    }

    pub fn written(&self) -> Vec<i16> {
        self.written.lock().clone()
    }

    pub fn written_len(&self) -> usize {
        self.written.lock().len()
    }
}

impl PcmSink for CollectingSink {
    fn write_chunk(&self, samples: &[i16], _sample_rate: u32) -> Result<(), AudioError> {
        if let Some(delay) = self.chunk_delay {
            thread::sleep(delay);
        }
        self.written.lock().extend_from_slice(samples);
        Ok(())
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_identity() {
        let samples = vec![1i16, 2, 3, 4];
        assert_eq!(resample_linear(&samples, 16000, 16000), samples);
    }

    #[test]
    fn resample_doubles_length() {
        let samples = vec![0i16; 100];
        let out = resample_linear(&samples, 16000, 32000);
        assert_eq!(out.len(), 200);
    }

    #[test]
    fn resample_halves_length() {
        let samples = vec![0i16; 100];
        let out = resample_linear(&samples, 32000, 16000);
        assert_eq!(out.len(), 50);
    }

    #[test]
    fn collecting_sink_records() {
        let sink = CollectingSink::new();
        sink.write_chunk(&[1, 2, 3], 16000).unwrap();
        sink.write_chunk(&[4], 16000).unwrap();
        assert_eq!(sink.written(), vec![1, 2, 3, 4]);
    }
}
