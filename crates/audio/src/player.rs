//! Feedback playback
//!
//! The player is the only speaker owner. Playback runs on an owned
//! blocking task that writes one frame-sized chunk at a time, so a stop
//! request takes effect within one frame period. `is_playing` is derived
//! from the task handle, never stored separately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use walnut_core::{AudioError, FRAME_SAMPLES, SAMPLE_RATE};

use crate::sink::PcmSink;

/// Fade length applied at playback start and on stop.
const FADE_MS: usize = 20;

struct ActivePlayback {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    is_alarm: bool,
}

/// Exclusive speaker owner.
pub struct FeedbackPlayer {
    sink: Arc<dyn PcmSink>,
    current: Mutex<Option<ActivePlayback>>,
    ringtone_duration_secs: u32,
}

impl FeedbackPlayer {
    pub fn new(sink: Arc<dyn PcmSink>, ringtone_duration_secs: u32) -> Self {
        Self {
            sink,
            current: Mutex::new(None),
            ringtone_duration_secs,
        }
    }

    /// Start playback, replacing any current playback after a clean
    /// stop. Non-blocking: audio is written by an owned task.
    pub async fn play(&self, pcm: Vec<i16>, sample_rate: u32) -> Result<(), AudioError> {
        self.play_inner(pcm, sample_rate, false).await
    }

    /// Loop the built-in two-tone ringtone up to the configured cap.
    pub async fn play_alarm_ringtone(&self) -> Result<(), AudioError> {
        let pcm = ringtone_pcm(self.ringtone_duration_secs);
        self.play_inner(pcm, SAMPLE_RATE, true).await
    }

    async fn play_inner(
        &self,
        mut pcm: Vec<i16>,
        sample_rate: u32,
        is_alarm: bool,
    ) -> Result<(), AudioError> {
        self.stop().await;

        if pcm.is_empty() {
            return Ok(());
        }

        let fade_samples = fade_samples(sample_rate);
        apply_fade_in(&mut pcm, fade_samples);

        let stop = Arc::new(AtomicBool::new(false));
        let task_stop = Arc::clone(&stop);
        let sink = Arc::clone(&self.sink);

        let handle = tokio::task::spawn_blocking(move || {
            let mut offset = 0usize;
            while offset < pcm.len() {
                if task_stop.load(Ordering::Relaxed) {
                    // Fade the next chunk out instead of clicking.
                    let end = (offset + fade_samples).min(pcm.len());
                    let mut tail = pcm[offset..end].to_vec();
                    let tail_len = tail.len();
                    apply_fade_out(&mut tail, tail_len);
                    let _ = sink.write_chunk(&tail, sample_rate);
                    sink.flush();
                    return;
                }

                let end = (offset + FRAME_SAMPLES).min(pcm.len());
                if sink.write_chunk(&pcm[offset..end], sample_rate).is_err() {
                    return;
                }
                offset = end;
            }
        });

        *self.current.lock() = Some(ActivePlayback {
            handle,
            stop,
            is_alarm,
        });
        Ok(())
    }

    /// Hard-stop the current playback. After this returns the speaker
    /// is idle.
    pub async fn stop(&self) {
        let playback = self.current.lock().take();
        if let Some(playback) = playback {
            playback.stop.store(true, Ordering::Relaxed);
            self.sink.flush();
            let _ = playback.handle.await;
        }
    }

    /// True while the playback task is alive.
    pub fn is_playing(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map(|p| !p.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn is_alarm_playing(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map(|p| p.is_alarm && !p.handle.is_finished())
            .unwrap_or(false)
    }

    /// Wait until the current playback drains on its own.
    pub async fn wait_until_idle(&self) {
        loop {
            let finished = {
                let current = self.current.lock();
                match current.as_ref() {
                    Some(p) => p.handle.is_finished(),
                    None => true,
                }
            };
            if finished {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

fn fade_samples(sample_rate: u32) -> usize {
    (sample_rate as usize * FADE_MS) / 1000
}

fn apply_fade_in(pcm: &mut [i16], fade: usize) {
    let fade = fade.min(pcm.len());
    for (i, sample) in pcm.iter_mut().take(fade).enumerate() {
        let gain = i as f32 / fade as f32;
        *sample = (f32::from(*sample) * gain) as i16;
    }
}

fn apply_fade_out(pcm: &mut [i16], fade: usize) {
    let len = pcm.len();
    let fade = fade.min(len);
    for i in 0..fade {
        let gain = 1.0 - (i as f32 / fade as f32);
        let idx = len - fade + i;
        pcm[idx] = (f32::from(pcm[idx]) * gain) as i16;
    }
}

/// Two alternating tones, one second each, hard-capped in length.
fn ringtone_pcm(duration_secs: u32) -> Vec<i16> {
    let duration = duration_secs.max(1) as usize;
    let mut pcm = Vec::with_capacity(duration * SAMPLE_RATE as usize);

    for second in 0..duration {
        let freq = if second % 2 == 0 { 880.0 } else { 660.0 };
        for n in 0..SAMPLE_RATE as usize {
            let t = n as f32 / SAMPLE_RATE as f32;
            let amp = (t * freq * 2.0 * std::f32::consts::PI).sin() * 0.3;
            pcm.push((amp * f32::from(i16::MAX)) as i16);
        }
    }
    pcm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CollectingSink;
    use std::time::Duration;

    fn player_with(sink: Arc<CollectingSink>) -> FeedbackPlayer {
        FeedbackPlayer::new(sink, 2)
    }

    #[tokio::test]
    async fn playback_writes_all_samples() {
        let sink = Arc::new(CollectingSink::new());
        let player = player_with(Arc::clone(&sink));

        player.play(vec![1000i16; 4096], SAMPLE_RATE).await.unwrap();
        player.wait_until_idle().await;

        assert_eq!(sink.written_len(), 4096);
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn fade_in_softens_the_head() {
        let sink = Arc::new(CollectingSink::new());
        let player = player_with(Arc::clone(&sink));

        player.play(vec![10_000i16; 4096], SAMPLE_RATE).await.unwrap();
        player.wait_until_idle().await;

        let written = sink.written();
        assert!(written[0].abs() < 100);
        assert_eq!(written[1000], 10_000);
    }

    #[tokio::test]
    async fn stop_preempts_playback() {
        let sink = Arc::new(CollectingSink::paced(Duration::from_millis(20)));
        let player = player_with(Arc::clone(&sink));

        // Ten seconds of audio; stopping early must leave most unwritten.
        player
            .play(vec![1000i16; SAMPLE_RATE as usize * 10], SAMPLE_RATE)
            .await
            .unwrap();
        assert!(player.is_playing());

        tokio::time::sleep(Duration::from_millis(100)).await;
        player.stop().await;

        assert!(!player.is_playing());
        assert!(sink.written_len() < SAMPLE_RATE as usize * 10);
    }

    #[tokio::test]
    async fn play_replaces_current_playback() {
        let sink = Arc::new(CollectingSink::paced(Duration::from_millis(10)));
        let player = player_with(Arc::clone(&sink));

        player
            .play(vec![1i16; SAMPLE_RATE as usize], SAMPLE_RATE)
            .await
            .unwrap();
        player
            .play(vec![2i16; 1024], SAMPLE_RATE)
            .await
            .unwrap();
        player.wait_until_idle().await;

        // The second playback's samples are the last thing written.
        let written = sink.written();
        assert_eq!(*written.last().unwrap(), 2);
    }

    #[tokio::test]
    async fn alarm_flag_tracks_ringtone() {
        let sink = Arc::new(CollectingSink::paced(Duration::from_millis(5)));
        let player = player_with(Arc::clone(&sink));

        player.play_alarm_ringtone().await.unwrap();
        assert!(player.is_alarm_playing());
        player.stop().await;
        assert!(!player.is_alarm_playing());
    }

    #[test]
    fn ringtone_is_capped() {
        let pcm = ringtone_pcm(2);
        assert_eq!(pcm.len(), 2 * SAMPLE_RATE as usize);
    }
}
