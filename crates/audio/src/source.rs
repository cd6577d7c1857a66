//! Microphone capture
//!
//! The source owns the input device for the lifetime of the assistant
//! and delivers fixed-size frames in capture order. Underruns surface
//! as gap frames rather than silently missing audio. Device loss is
//! retried a bounded number of times before becoming fatal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;

use walnut_config::AudioConfig;
use walnut_core::{AudioError, PcmFrame};

/// Reopen attempts after the device disappears mid-stream.
const REOPEN_ATTEMPTS: u32 = 3;
const REOPEN_BACKOFF: Duration = Duration::from_millis(250);

/// Bounded frame queue; the loop consumes well below this under normal
/// load, so a full queue means the consumer stalled.
const FRAME_QUEUE: usize = 64;

/// Converts raw f32 device buffers into gain-adjusted int16 frames.
pub struct FrameAssembler {
    chunk_size: usize,
    gain: f32,
    pending: Vec<i16>,
    next_index: u64,
}

impl FrameAssembler {
    pub fn new(chunk_size: usize, gain: f32) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            gain,
            pending: Vec::new(),
            next_index: 0,
        }
    }

    /// Push device samples; returns every completed frame.
    pub fn push(&mut self, data: &[f32]) -> Vec<PcmFrame> {
        self.pending.reserve(data.len());
        for &sample in data {
            let scaled = (sample * self.gain * f32::from(i16::MAX))
                .clamp(f32::from(i16::MIN), f32::from(i16::MAX));
            self.pending.push(scaled as i16);
        }

        let mut frames = Vec::new();
        while self.pending.len() >= self.chunk_size {
            let rest = self.pending.split_off(self.chunk_size);
            let chunk = std::mem::replace(&mut self.pending, rest);
            frames.push(PcmFrame::new(chunk, self.next_index));
            self.next_index += 1;
        }
        frames
    }

    /// Produce a gap marker carrying the next capture index.
    pub fn gap(&mut self) -> PcmFrame {
        let frame = PcmFrame::gap(self.next_index);
        self.next_index += 1;
        frame
    }
}

/// Continuous microphone capture.
pub struct AudioSource {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl AudioSource {
    /// Open the configured input device and start capturing.
    ///
    /// Returns the frame stream and a status receiver that yields a
    /// single fatal error if capture dies permanently.
    pub fn start(
        config: &AudioConfig,
    ) -> Result<(Self, mpsc::Receiver<PcmFrame>, mpsc::Receiver<AudioError>), AudioError>
    {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (status_tx, status_rx) = mpsc::channel(1);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), AudioError>>();

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let cfg = config.clone();

        let handle = thread::Builder::new()
            .name("walnut-capture".to_string())
            .spawn(move || capture_thread(cfg, frame_tx, status_tx, ready_tx, thread_stop))
            .map_err(|e| AudioError::DeviceLost(e.to_string()))?;

        // The first open happens on the capture thread; surface its
        // outcome synchronously so a busy device fails startup.
        ready_rx
            .recv()
            .map_err(|_| AudioError::DeviceLost("capture thread died".to_string()))??;

        Ok((
            Self {
                stop,
                handle: Some(handle),
            },
            frame_rx,
            status_rx,
        ))
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    config: AudioConfig,
    frame_tx: mpsc::Sender<PcmFrame>,
    status_tx: mpsc::Sender<AudioError>,
    ready_tx: std::sync::mpsc::Sender<Result<(), AudioError>>,
    stop: Arc<AtomicBool>,
) {
    let assembler = Arc::new(parking_lot::Mutex::new(FrameAssembler::new(
        config.chunk_size,
        config.input_gain,
    )));
    let mut first_open = true;
    let mut attempts = 0u32;

    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }

        let failed = Arc::new(AtomicBool::new(false));
        match open_input_stream(&config, Arc::clone(&assembler), &frame_tx, Arc::clone(&failed)) {
            Ok(stream) => {
                if first_open {
                    let _ = ready_tx.send(Ok(()));
                    first_open = false;
                }
                attempts = 0;
                if stream.play().is_err() {
                    failed.store(true, Ordering::Relaxed);
                }

                while !stop.load(Ordering::Relaxed) && !failed.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(50));
                }
                drop(stream);

                if stop.load(Ordering::Relaxed) {
                    return;
                }
                tracing::warn!("input stream failed, attempting to reopen");
                // A lost stream means lost audio; mark the gap.
                let gap = assembler.lock().gap();
                let _ = frame_tx.try_send(gap);
            }
            Err(err) => {
                if first_open {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
                attempts += 1;
                if attempts > REOPEN_ATTEMPTS {
                    tracing::error!(error = %err, "giving up on input device");
                    let _ = status_tx.try_send(err);
                    return;
                }
                let backoff = REOPEN_BACKOFF * 2u32.pow(attempts - 1);
                tracing::warn!(
                    attempt = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "input device reopen failed, backing off"
                );
                thread::sleep(backoff);
            }
        }
    }
}

fn open_input_stream(
    config: &AudioConfig,
    assembler: Arc<parking_lot::Mutex<FrameAssembler>>,
    frame_tx: &mpsc::Sender<PcmFrame>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = resolve_input_device(&host, &config.input_device)?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| map_build_error(e.to_string()))?
        .find(|c| {
            c.channels() == config.channels
                && c.min_sample_rate() <= cpal::SampleRate(config.sample_rate)
                && c.max_sample_rate() >= cpal::SampleRate(config.sample_rate)
        })
        .ok_or_else(|| {
            AudioError::FormatMismatch(format!(
                "no input config for {} Hz / {} ch",
                config.sample_rate, config.channels
            ))
        })?
        .with_sample_rate(cpal::SampleRate(config.sample_rate));

    let stream_config = supported.config();
    let channels = stream_config.channels as usize;
    let tx = frame_tx.clone();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate,
        channels,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Downmix to mono before assembly.
                let mono: Vec<f32> = if channels == 1 {
                    data.to_vec()
                } else {
                    data.chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                        .collect()
                };

                let mut assembler = assembler.lock();
                for frame in assembler.push(&mono) {
                    if tx.try_send(frame).is_err() {
                        // Consumer stalled; record the loss as a gap.
                        let gap = assembler.gap();
                        let _ = tx.try_send(gap);
                        break;
                    }
                }
            },
            {
                let failed = Arc::clone(&failed);
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    failed.store(true, Ordering::Relaxed);
                }
            },
            None,
        )
        .map_err(|e| map_build_error(e.to_string()))?;

    Ok(stream)
}

fn resolve_input_device(host: &cpal::Host, name: &str) -> Result<cpal::Device, AudioError> {
    if name != "default" {
        if let Ok(mut devices) = host.input_devices() {
            if let Some(device) =
                devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
            {
                return Ok(device);
            }
        }
        tracing::warn!(device = %name, "input device not found, falling back to default");
    }

    host.default_input_device()
        .ok_or_else(|| AudioError::DeviceLost("no input device available".to_string()))
}

fn map_build_error(message: String) -> AudioError {
    // cpal reports an exclusively-held ALSA device as unavailable.
    if message.contains("busy") || message.contains("in use") || message.contains("available") {
        AudioError::DeviceBusy(message)
    } else {
        AudioError::DeviceLost(message)
    }
}
