//! End-to-end conversation flows with stub engines
//!
//! Drives the state machine with synthetic microphone frames and checks
//! the observable event stream: wake, capture, recognition, reply,
//! retry, barge-in, and alarm firing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;

use walnut_agent::{ConversationEvent, ConversationMachine, ConversationState, MachineDeps};
use walnut_alarm::{AlarmScheduler, AlarmStore};
use walnut_audio::{CollectingSink, FeedbackPlayer};
use walnut_config::{Settings, TtsEngineKind};
use walnut_core::{
    DialogueContext, EngineError, PcmFrame, PerfMonitor, TranscriptResult, Utterance,
    FRAME_SAMPLES,
};
use walnut_engines::{LlmEngine, SttEngine};
use walnut_pipeline::{AdaptiveVad, EnergyKeywordDetector, WakeDetector};
use walnut_tts::{LocalTtsEngine, PhraseCache, TtsDispatcher};

struct ScriptedStt {
    text: &'static str,
}

#[async_trait]
impl SttEngine for ScriptedStt {
    async fn transcribe(&self, _utterance: &Utterance) -> Result<TranscriptResult, EngineError> {
        Ok(TranscriptResult::new(self.text, 0.92))
    }
}

struct ScriptedLlm {
    reply: String,
}

#[async_trait]
impl LlmEngine for ScriptedLlm {
    async fn chat(
        &self,
        _context: &DialogueContext,
        _user_text: &str,
    ) -> Result<String, EngineError> {
        Ok(self.reply.clone())
    }
}

struct Harness {
    frames_tx: mpsc::Sender<PcmFrame>,
    events: broadcast::Receiver<ConversationEvent>,
    shutdown_tx: watch::Sender<bool>,
    cache: Arc<PhraseCache>,
    sink: Arc<CollectingSink>,
    store: Option<Arc<AlarmStore>>,
    next_index: u64,
    _cache_dir: tempfile::TempDir,
}

impl Harness {
    async fn send_speech(&mut self, frames: usize) {
        for _ in 0..frames {
            let frame = PcmFrame::new(vec![5000i16; FRAME_SAMPLES], self.next_index);
            self.next_index += 1;
            self.frames_tx.send(frame).await.expect("machine alive");
        }
    }

    async fn send_silence(&mut self, frames: usize) {
        for _ in 0..frames {
            let frame = PcmFrame::new(vec![0i16; FRAME_SAMPLES], self.next_index);
            self.next_index += 1;
            self.frames_tx.send(frame).await.expect("machine alive");
        }
    }

    /// Loud burst plus a dip: the shape the wake detector fires on.
    async fn send_wake_pattern(&mut self) {
        self.send_speech(25).await;
        self.send_silence(10).await;
    }

    async fn wait_for_state(&mut self, want: ConversationState) {
        let deadline = Duration::from_secs(10);
        timeout(deadline, async {
            loop {
                match self.events.recv().await {
                    Ok(ConversationEvent::StateChanged { to, .. }) if to == want => return,
                    Ok(_) => {}
                    Err(e) => panic!("event stream broke: {e}"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"));
    }

    async fn wait_for_event(&mut self, matcher: impl Fn(&ConversationEvent) -> bool) {
        timeout(Duration::from_secs(10), async {
            loop {
                match self.events.recv().await {
                    Ok(event) if matcher(&event) => return,
                    Ok(_) => {}
                    Err(e) => panic!("event stream broke: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for event");
    }
}

fn spawn_machine(
    settings: Settings,
    llm_reply: &str,
    paced_sink: bool,
    with_alarms: bool,
) -> Harness {
    let settings = Arc::new(settings);
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(PhraseCache::open(cache_dir.path()).unwrap());

    let local = Arc::new(LocalTtsEngine::new(&settings.tts.local));
    let tts = Arc::new(TtsDispatcher::new(
        settings.tts.clone(),
        Some(Arc::clone(&cache)),
        local,
        None,
        None,
    ));

    let sink = if paced_sink {
        Arc::new(CollectingSink::paced(Duration::from_millis(1)))
    } else {
        Arc::new(CollectingSink::new())
    };
    let player = Arc::new(FeedbackPlayer::new(
        Arc::clone(&sink) as Arc<dyn walnut_audio::PcmSink>,
        settings.alarm.ringtone_duration_secs,
    ));

    let (frames_tx, frames_rx) = mpsc::channel(4096);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let wake = WakeDetector::new(
        Box::new(EnergyKeywordDetector::new("walnut", 0.05)),
        &settings.wakeword,
    );
    let vad = AdaptiveVad::new(settings.audio_quality.vad.clone());

    let (store, alarms) = if with_alarms {
        let store = Arc::new(AlarmStore::open_in_memory().unwrap());
        let scheduler = AlarmScheduler::new(Arc::clone(&store), settings.alarm.clone());
        let (fire_rx, _handle) = scheduler.spawn();
        (Some(Arc::clone(&store)), Some((store, fire_rx)))
    } else {
        (None, None)
    };

    let mut machine = ConversationMachine::new(MachineDeps {
        settings,
        frames: frames_rx,
        wake,
        vad,
        stt: Arc::new(ScriptedStt { text: "hello" }),
        llm: Arc::new(ScriptedLlm {
            reply: llm_reply.to_string(),
        }),
        tts,
        player,
        music: None,
        switch: None,
        alarms,
        perf: Arc::new(PerfMonitor::new()),
        shutdown: shutdown_rx,
    });

    let events = machine.subscribe();
    tokio::spawn(async move { machine.run().await });

    Harness {
        frames_tx,
        events,
        shutdown_tx,
        cache,
        sink,
        store,
        next_index: 0,
        _cache_dir: cache_dir,
    }
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.tts.engine = TtsEngineKind::Local;
    settings.alarm.check_interval_secs = 0.1;
    settings.alarm.ringtone_duration_secs = 1;
    settings
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cold_wake_to_short_reply() {
    let mut harness = spawn_machine(test_settings(), "hi there friend", false, false);

    harness.send_wake_pattern().await;
    harness
        .wait_for_event(|e| matches!(e, ConversationEvent::WakeDetected { .. }))
        .await;
    harness.wait_for_state(ConversationState::Listening).await;

    // "hello": a second of speech, then trailing silence.
    harness.send_speech(31).await;
    harness.send_silence(60).await;

    harness.wait_for_state(ConversationState::Processing).await;
    harness
        .wait_for_event(
            |e| matches!(e, ConversationEvent::UtteranceRecognized { text } if text == "hello"),
        )
        .await;
    harness
        .wait_for_event(
            |e| matches!(e, ConversationEvent::ReplySpoken { text } if text == "hi there friend"),
        )
        .await;
    harness.wait_for_state(ConversationState::Speaking).await;
    harness.wait_for_state(ConversationState::Idle).await;

    // The wake acknowledgement and the reply are both cached now.
    assert!(harness.cache.len() >= 2, "cache should hold spoken phrases");
    // Something audible actually reached the speaker.
    assert!(harness.sink.written_len() > 0);

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silence_prompts_retry_then_gives_up() {
    let mut settings = test_settings();
    settings.audio_quality.max_retries = 1;
    let mut harness = spawn_machine(settings, "unused", false, false);

    harness.send_wake_pattern().await;
    harness.wait_for_state(ConversationState::Listening).await;

    // Nothing but silence until the capture window closes.
    harness.send_silence(320).await;
    harness
        .wait_for_event(|e| {
            matches!(
                e,
                ConversationEvent::RetryPrompted {
                    kind: "silence",
                    attempt: 1,
                }
            )
        })
        .await;

    // Second round of silence exhausts the retry budget.
    harness.send_silence(400).await;
    harness.wait_for_state(ConversationState::Idle).await;

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn barge_in_stops_playback_and_listens() {
    // A long reply so playback is still running when the user speaks.
    let long_reply = "well let me think about that for a moment because there is quite \
                      a lot to say about this topic and I would hate to rush it";
    let mut harness = spawn_machine(test_settings(), long_reply, true, false);

    harness.send_wake_pattern().await;
    harness.wait_for_state(ConversationState::Listening).await;
    harness.send_speech(31).await;
    harness.send_silence(60).await;
    harness.wait_for_state(ConversationState::Speaking).await;

    // Interrupt mid-playback with sustained speech.
    harness.send_speech(60).await;
    harness
        .wait_for_event(|e| matches!(e, ConversationEvent::BargeIn))
        .await;
    harness.wait_for_state(ConversationState::Listening).await;

    // The machine keeps going: the interrupting speech plus fresh
    // silence endpoints into a new processing round.
    harness.send_silence(60).await;
    harness.wait_for_state(ConversationState::Processing).await;

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn due_alarm_rings_and_returns_to_idle() {
    let mut harness = spawn_machine(test_settings(), "unused", false, true);
    let store = harness.store.clone().expect("alarm store configured");

    let alarm = store
        .add(Utc::now() - chrono::Duration::seconds(1), "tea time", "ringtone")
        .unwrap();

    harness
        .wait_for_event(|e| matches!(e, ConversationEvent::AlarmRinging { id } if *id == alarm.id))
        .await;
    harness.wait_for_state(ConversationState::Speaking).await;
    harness.wait_for_state(ConversationState::Idle).await;

    // The fired alarm is spent: no active alarms remain.
    assert!(store.list_active().unwrap().is_empty());
    assert!(harness.sink.written_len() > 0);

    let _ = harness.shutdown_tx.send(true);
}
