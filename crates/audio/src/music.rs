//! Background music playback
//!
//! Lower-priority audio stream with its own sink. The state machine
//! ducks it while interacting and stops it when the user asks. Only WAV
//! files are decoded here; anything fancier belongs behind the library
//! seam.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;

use walnut_core::{AudioError, FRAME_SAMPLES};

use crate::sink::PcmSink;

/// Volume multiplier while ducked.
const DUCK_FACTOR: f32 = 0.2;
const VOLUME_STEP: f32 = 0.1;

/// One playable file.
#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub path: PathBuf,
}

/// WAV files under a directory.
pub struct MusicLibrary {
    tracks: Vec<Track>,
}

impl MusicLibrary {
    /// Scan a directory for WAV files. A missing directory yields an
    /// empty library rather than an error.
    pub fn scan(dir: impl AsRef<Path>) -> Self {
        let mut tracks = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir.as_ref()) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().map(|e| e == "wav").unwrap_or(false) {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        tracks.push(Track {
                            name: stem.to_string(),
                            path,
                        });
                    }
                }
            }
        }
        tracks.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::info!(count = tracks.len(), "music library scanned");
        Self { tracks }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Case-insensitive substring match.
    pub fn find(&self, query: &str) -> Option<&Track> {
        let query = query.to_lowercase();
        self.tracks
            .iter()
            .find(|t| t.name.to_lowercase().contains(&query))
    }

    pub fn random(&self) -> Option<&Track> {
        self.tracks.choose(&mut rand::thread_rng())
    }
}

struct MusicTask {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// Duckable background player.
pub struct MusicPlayer {
    library: MusicLibrary,
    sink: Arc<dyn PcmSink>,
    volume: Arc<Mutex<f32>>,
    ducked: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    task: Mutex<Option<MusicTask>>,
    current: Mutex<Option<Track>>,
}

impl MusicPlayer {
    pub fn new(library: MusicLibrary, sink: Arc<dyn PcmSink>, initial_volume: f32) -> Self {
        Self {
            library,
            sink,
            volume: Arc::new(Mutex::new(initial_volume.clamp(0.0, 1.0))),
            ducked: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    pub fn library(&self) -> &MusicLibrary {
        &self.library
    }

    /// Play a named track, or a random one when the query misses.
    /// Returns the track actually started.
    pub fn play(&self, query: Option<&str>) -> Result<Track, AudioError> {
        let track = match query {
            Some(q) => self
                .library
                .find(q)
                .or_else(|| self.library.random())
                .cloned(),
            None => self.library.random().cloned(),
        }
        .ok_or_else(|| AudioError::FormatMismatch("music library is empty".to_string()))?;

        self.stop();
        self.paused.store(false, Ordering::Relaxed);

        let samples = load_wav(&track.path)?;
        let stop = Arc::new(AtomicBool::new(false));
        let task_stop = Arc::clone(&stop);
        let paused = Arc::clone(&self.paused);
        let volume = Arc::clone(&self.volume);
        let ducked = Arc::clone(&self.ducked);
        let sink = Arc::clone(&self.sink);

        let handle = tokio::task::spawn_blocking(move || {
            let (rate, pcm) = samples;
            let mut offset = 0usize;
            while offset < pcm.len() {
                if task_stop.load(Ordering::Relaxed) {
                    sink.flush();
                    return;
                }
                if paused.load(Ordering::Relaxed) {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    continue;
                }

                let end = (offset + FRAME_SAMPLES).min(pcm.len());
                let gain = {
                    let v = *volume.lock();
                    if ducked.load(Ordering::Relaxed) {
                        v * DUCK_FACTOR
                    } else {
                        v
                    }
                };
                let chunk: Vec<i16> = pcm[offset..end]
                    .iter()
                    .map(|&s| (f32::from(s) * gain) as i16)
                    .collect();
                if sink.write_chunk(&chunk, rate).is_err() {
                    return;
                }
                offset = end;
            }
        });

        *self.task.lock() = Some(MusicTask { handle, stop });
        *self.current.lock() = Some(track.clone());
        tracing::info!(track = %track.name, "music playback started");
        Ok(track)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            // The blocking task exits at its next chunk boundary.
            task.stop.store(true, Ordering::Relaxed);
        }
        self.sink.flush();
        self.current.lock().take();
    }

    pub fn is_playing(&self) -> bool {
        !self.paused.load(Ordering::Relaxed)
            && self
                .task
                .lock()
                .as_ref()
                .map(|t| !t.handle.is_finished())
                .unwrap_or(false)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
            && self
                .task
                .lock()
                .as_ref()
                .map(|t| !t.handle.is_finished())
                .unwrap_or(false)
    }

    pub fn current_track(&self) -> Option<Track> {
        self.current.lock().clone()
    }

    /// Attenuate while the assistant interacts.
    pub fn duck(&self) {
        self.ducked.store(true, Ordering::Relaxed);
    }

    pub fn unduck(&self) {
        self.ducked.store(false, Ordering::Relaxed);
    }

    pub fn volume_up(&self) -> f32 {
        let mut volume = self.volume.lock();
        *volume = (*volume + VOLUME_STEP).clamp(0.0, 1.0);
        *volume
    }

    pub fn volume_down(&self) -> f32 {
        let mut volume = self.volume.lock();
        *volume = (*volume - VOLUME_STEP).clamp(0.0, 1.0);
        *volume
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }
}

/// Decode a mono or stereo WAV file to int16 samples.
fn load_wav(path: &Path) -> Result<(u32, Vec<i16>), AudioError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| AudioError::FormatMismatch(e.to_string()))?;
    let spec = reader.spec();

    let raw: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| AudioError::FormatMismatch(e.to_string()))?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16))
            .collect::<Result<_, _>>()
            .map_err(|e| AudioError::FormatMismatch(e.to_string()))?,
    };

    let mono = if spec.channels == 2 {
        raw.chunks(2)
            .map(|pair| {
                let left = i32::from(pair[0]);
                let right = i32::from(*pair.get(1).unwrap_or(&pair[0]));
                ((left + right) / 2) as i16
            })
            .collect()
    } else {
        raw
    };

    Ok((spec.sample_rate, mono))
}
