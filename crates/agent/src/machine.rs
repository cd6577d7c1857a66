//! Conversation state machine
//!
//! Single event loop owning the microphone consumer side and the
//! speaker. All state transitions and engine calls happen here; the
//! loop suspends only on frame arrival, engine results, playback
//! progress, and scheduler events.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveTime};
use rand::seq::SliceRandom;
use tokio::sync::{broadcast, mpsc, watch};

use walnut_alarm::{Alarm, AlarmStore, CheerwordGenerator};
use walnut_audio::{FeedbackPlayer, MusicPlayer};
use walnut_config::Settings;
use walnut_core::{
    DialogueContext, PcmFrame, PerfMonitor, QualityRejection, StateError, TurnRole, Utterance,
};
use walnut_engines::{LlmEngine, SttEngine};
use walnut_pipeline::{
    AdaptiveVad, BargeInMonitor, CaptureProgress, TextQuality, UtteranceCapturer, VadClass,
    WakeDetector,
};
use walnut_tts::{TtsDispatcher, TtsScenario};

use crate::intent::{AlarmAction, Intent, IntentRouter, MusicAction, SwitchAction, SwitchController};
use crate::state::ConversationState;

/// STT engine call budget.
const STT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval for playback progress during SPEAKING.
const PLAYBACK_TICK: Duration = Duration::from_millis(20);

/// Observable machine events.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    StateChanged {
        from: ConversationState,
        to: ConversationState,
    },
    WakeDetected {
        keyword: String,
    },
    UtteranceRecognized {
        text: String,
    },
    ReplySpoken {
        text: String,
    },
    RetryPrompted {
        kind: &'static str,
        attempt: u32,
    },
    BargeIn,
    AlarmRinging {
        id: i64,
    },
    Farewell,
}

/// Everything the machine is wired to at startup.
pub struct MachineDeps {
    pub settings: Arc<Settings>,
    pub frames: mpsc::Receiver<PcmFrame>,
    pub wake: WakeDetector,
    pub vad: AdaptiveVad,
    pub stt: Arc<dyn SttEngine>,
    pub llm: Arc<dyn LlmEngine>,
    pub tts: Arc<TtsDispatcher>,
    pub player: Arc<FeedbackPlayer>,
    pub music: Option<Arc<MusicPlayer>>,
    pub switch: Option<Arc<dyn SwitchController>>,
    pub alarms: Option<(Arc<AlarmStore>, mpsc::Receiver<Alarm>)>,
    pub perf: Arc<PerfMonitor>,
    pub shutdown: watch::Receiver<bool>,
}

/// The central state machine.
pub struct ConversationMachine {
    settings: Arc<Settings>,
    state: ConversationState,

    frames: mpsc::Receiver<PcmFrame>,
    wake: WakeDetector,
    vad: AdaptiveVad,
    capturer: UtteranceCapturer,
    barge_in: BargeInMonitor,
    text_quality: TextQuality,
    router: IntentRouter,
    cheerwords: CheerwordGenerator,

    stt: Arc<dyn SttEngine>,
    llm: Arc<dyn LlmEngine>,
    tts: Arc<TtsDispatcher>,
    player: Arc<FeedbackPlayer>,
    music: Option<Arc<MusicPlayer>>,
    switch: Option<Arc<dyn SwitchController>>,
    alarm_store: Option<Arc<AlarmStore>>,
    alarm_rx: Option<mpsc::Receiver<Alarm>>,
    perf: Arc<PerfMonitor>,
    shutdown: watch::Receiver<bool>,

    events: broadcast::Sender<ConversationEvent>,

    context: DialogueContext,
    retry_count: u32,
    conversation_turns: u32,
    music_control_mode: bool,
    alarm_ringing: bool,
    ringing_alarm: Option<Alarm>,
    pending_alarms: VecDeque<Alarm>,
    pending_seed: Option<Vec<i16>>,
    pending_utterance: Option<Utterance>,
    farewell_deadline: Option<Instant>,
    echo_words: Vec<String>,
}

impl ConversationMachine {
    pub fn new(deps: MachineDeps) -> Self {
        let settings = deps.settings;
        let (events, _) = broadcast::channel(64);

        let mut echo_words: Vec<String> = settings
            .wakeword
            .wake_words
            .iter()
            .chain(settings.wakeword.reply_messages.iter())
            .map(|w| w.to_lowercase())
            .collect();
        echo_words.retain(|w| !w.trim().is_empty());

        let (alarm_store, alarm_rx) = match deps.alarms {
            Some((store, rx)) => (Some(store), Some(rx)),
            None => (None, None),
        };

        Self {
            capturer: UtteranceCapturer::new(&settings.audio_quality, &settings.listening),
            barge_in: BargeInMonitor::new(&settings.audio_quality.interrupt),
            text_quality: TextQuality::new(settings.audio_quality.stt_confidence_floor),
            router: IntentRouter::new(settings.conversation.continuation_support),
            cheerwords: CheerwordGenerator::new(Some(Arc::clone(&deps.llm))),
            context: DialogueContext::new(settings.llm.max_history),
            settings,
            state: ConversationState::Idle,
            frames: deps.frames,
            wake: deps.wake,
            vad: deps.vad,
            stt: deps.stt,
            llm: deps.llm,
            tts: deps.tts,
            player: deps.player,
            music: deps.music,
            switch: deps.switch,
            alarm_store,
            alarm_rx,
            perf: deps.perf,
            shutdown: deps.shutdown,
            events,
            retry_count: 0,
            conversation_turns: 0,
            music_control_mode: false,
            alarm_ringing: false,
            ringing_alarm: None,
            pending_alarms: VecDeque::new(),
            pending_seed: None,
            pending_utterance: None,
            farewell_deadline: None,
            echo_words,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Subscribe to machine events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Run until shutdown. Consumes the machine's event loop; spawn it.
    pub async fn run(&mut self) {
        tracing::info!("conversation machine started");

        while self.state != ConversationState::Stopped {
            if *self.shutdown.borrow() {
                self.transition(ConversationState::Stopped);
                break;
            }

            match self.state {
                ConversationState::Idle => self.idle_phase().await,
                ConversationState::Wakeup => self.wakeup_phase().await,
                ConversationState::Listening => self.listening_phase().await,
                ConversationState::Processing => self.processing_phase().await,
                ConversationState::Speaking => self.speaking_phase().await,
                ConversationState::Error => self.error_phase().await,
                ConversationState::Stopped => break,
            }
        }

        self.player.stop().await;
        if let Some(music) = &self.music {
            music.stop();
        }
        tracing::info!("conversation machine stopped");
    }

    /// The only way state changes. Illegal transitions are a bug: they
    /// are logged and the machine forced back to Idle.
    fn transition(&mut self, to: ConversationState) {
        if self.state == to {
            return;
        }

        let from = self.state;
        if !from.can_transition_to(to) {
            let err = StateError::IllegalTransition {
                from: from.display_name().to_string(),
                to: to.display_name().to_string(),
            };
            tracing::error!(error = %err, "forcing transition to Idle");
            self.state = ConversationState::Idle;
            let _ = self.events.send(ConversationEvent::StateChanged {
                from,
                to: ConversationState::Idle,
            });
            return;
        }

        tracing::info!(from = from.display_name(), to = to.display_name(), "state transition");
        self.state = to;
        let _ = self.events.send(ConversationEvent::StateChanged { from, to });
    }

    // ------------------------------------------------------------------
    // Idle
    // ------------------------------------------------------------------

    async fn idle_phase(&mut self) {
        self.vad.unfreeze();
        if self.wake.is_paused() {
            self.wake.reset();
            self.wake.resume();
        }

        // A queued alarm fires on the first idle tick after the turn.
        if let Some(alarm) = self.pending_alarms.pop_front() {
            self.handle_alarm_fire(alarm).await;
            return;
        }

        enum IdleWake {
            Shutdown,
            Alarm(Option<Alarm>),
            Frame(Option<PcmFrame>),
            Farewell,
        }

        let wake = {
            let frames = &mut self.frames;
            let alarm_rx = self.alarm_rx.as_mut();
            let mut shutdown = self.shutdown.clone();
            let deadline = self.farewell_deadline;

            tokio::select! {
                biased;
                _ = shutdown.changed() => IdleWake::Shutdown,
                alarm = recv_alarm(alarm_rx) => IdleWake::Alarm(alarm),
                frame = frames.recv() => IdleWake::Frame(frame),
                _ = wait_deadline(deadline) => IdleWake::Farewell,
            }
        };

        match wake {
            IdleWake::Shutdown => self.transition(ConversationState::Stopped),
            IdleWake::Alarm(Some(alarm)) => self.handle_alarm_fire(alarm).await,
            IdleWake::Alarm(None) => {
                // Scheduler gone; stop listening for alarms.
                self.alarm_rx = None;
            }
            IdleWake::Frame(Some(frame)) => self.idle_frame(frame).await,
            IdleWake::Frame(None) => {
                tracing::error!("audio source closed, stopping");
                self.transition(ConversationState::Stopped);
            }
            IdleWake::Farewell => self.auto_farewell().await,
        }
    }

    async fn idle_frame(&mut self, frame: PcmFrame) {
        // Keep learning ambience while idle.
        let _ = self.vad.classify(&frame);

        // Night window: no wakes unless an alarm is ringing.
        if self.in_quiet_hours() && !self.alarm_ringing {
            return;
        }

        let Some(event) = self.wake.process_frame(&frame) else {
            return;
        };

        let _ = self.events.send(ConversationEvent::WakeDetected {
            keyword: event.keyword,
        });

        self.wake.pause();
        self.farewell_deadline = None;
        self.retry_count = 0;
        self.conversation_turns += 1;

        if let Some(music) = &self.music {
            if music.is_playing() {
                music.duck();
                self.music_control_mode = true;
                tracing::info!("wake during music playback, entering control mode");
            }
        }

        self.transition(ConversationState::Wakeup);
    }

    async fn auto_farewell(&mut self) {
        self.farewell_deadline = None;

        if self.context.is_empty() {
            return;
        }

        let farewell = pick_random(&self.settings.conversation.auto_farewell.farewell_messages);
        if let Some(farewell) = farewell {
            let _ = self.events.send(ConversationEvent::Farewell);
            self.speak_and_wait(&farewell, TtsScenario::Farewell).await;
        }

        self.end_conversation();
    }

    fn end_conversation(&mut self) {
        self.context.clear();
        self.conversation_turns = 0;
        self.retry_count = 0;
        self.music_control_mode = false;
        self.alarm_ringing = false;
        self.ringing_alarm.take();
        if let Some(music) = &self.music {
            music.unduck();
        }
    }

    // ------------------------------------------------------------------
    // Wakeup
    // ------------------------------------------------------------------

    async fn wakeup_phase(&mut self) {
        let reply = pick_random(&self.settings.wakeword.reply_messages);
        if let Some(reply) = reply {
            self.speak_and_wait(&reply, TtsScenario::WakeResponse).await;
        }

        // Discard anything captured while the acknowledgement played so
        // stale audio cannot trigger the endpointer.
        while self.frames.try_recv().is_ok() {}

        self.pending_seed = None;
        self.transition(ConversationState::Listening);
    }

    // ------------------------------------------------------------------
    // Listening
    // ------------------------------------------------------------------

    async fn listening_phase(&mut self) {
        // Freeze adaptation so the user's own voice never raises the
        // ambient floor.
        self.vad.freeze();

        let seed = self.pending_seed.take().unwrap_or_default();
        self.capturer.begin(&seed);
        let started = Instant::now();

        let idle_timeout =
            Duration::from_secs_f32(self.settings.conversation.auto_farewell.idle_timeout_secs);

        loop {
            enum ListenWake {
                Shutdown,
                Frame(Option<PcmFrame>),
            }

            let wake = {
                let frames = &mut self.frames;
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => ListenWake::Shutdown,
                    frame = frames.recv() => ListenWake::Frame(frame),
                }
            };

            let frame = match wake {
                ListenWake::Shutdown | ListenWake::Frame(None) => {
                    self.transition(ConversationState::Stopped);
                    return;
                }
                ListenWake::Frame(Some(frame)) => frame,
            };

            let is_speech = self.vad.classify(&frame) == VadClass::Speech;
            match self.capturer.feed(&frame, is_speech) {
                CaptureProgress::Active => {
                    // Multi-turn follow-up window: nothing said, wrap up
                    // before the hard capture timeout.
                    if self.conversation_turns > 1
                        && self.settings.conversation.auto_farewell.enabled
                        && self.capturer.speech_secs() == 0.0
                        && started.elapsed() >= idle_timeout
                    {
                        self.vad.unfreeze();
                        self.auto_farewell().await;
                        self.transition(ConversationState::Idle);
                        return;
                    }
                }
                CaptureProgress::Endpointed | CaptureProgress::TimedOut => {
                    self.vad.unfreeze();
                    match self.capturer.finish() {
                        Ok(utterance) => {
                            self.pending_utterance = Some(utterance);
                            self.transition(ConversationState::Processing);
                        }
                        Err(kind) => self.handle_rejection(kind).await,
                    }
                    return;
                }
            }
        }
    }

    /// Tiered retry policy over rejected captures.
    async fn handle_rejection(&mut self, kind: QualityRejection) {
        let max_retries = self.settings.audio_quality.max_retries;
        self.retry_count += 1;

        tracing::info!(
            kind = kind.prompt_key(),
            attempt = self.retry_count,
            max_retries,
            "utterance rejected"
        );

        if max_retries == 0 {
            // Retries disabled: back to idle without a prompt.
            self.retry_count = 0;
            self.transition(ConversationState::Idle);
            return;
        }

        let prompts = &self.settings.audio_quality.retry_prompts;
        if self.retry_count > max_retries {
            // Cap reached: terminal apology, then idle.
            let tiers = prompts.tiers_for(kind.prompt_key());
            let apology = pick_random(&tiers.terminal)
                .or_else(|| pick_random(&prompts.apology));
            if let Some(apology) = apology {
                self.speak_and_wait(&apology, TtsScenario::RetryPrompt).await;
            }
            self.end_conversation();
            self.transition(ConversationState::Idle);
            return;
        }

        let _ = self.events.send(ConversationEvent::RetryPrompted {
            kind: kind.prompt_key(),
            attempt: self.retry_count,
        });

        let tiers = prompts.tiers_for(kind.prompt_key());
        if let Some(prompt) = pick_random(tiers.for_attempt(self.retry_count)) {
            self.speak_and_wait(&prompt, TtsScenario::RetryPrompt).await;
        }

        // Listen again; a fresh capture starts when the phase re-enters.
        self.pending_seed = None;
        self.transition(ConversationState::Listening);
    }

    // ------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------

    async fn processing_phase(&mut self) {
        let Some(utterance) = self.pending_utterance.take() else {
            self.transition(ConversationState::Idle);
            return;
        };

        // STT; a timeout or error is indistinguishable from noise as
        // far as the user is concerned.
        let stt_started = Instant::now();
        let transcript =
            match tokio::time::timeout(STT_TIMEOUT, self.stt.transcribe(&utterance)).await {
                Ok(Ok(result)) => {
                    self.perf.record("stt.transcribe", stt_started.elapsed());
                    result
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "stt failed");
                    self.handle_rejection(QualityRejection::Garbage).await;
                    return;
                }
                Err(_) => {
                    tracing::warn!("stt timed out, cancelling");
                    self.handle_rejection(QualityRejection::Garbage).await;
                    return;
                }
            };

        let text = match self.text_quality.check(&transcript) {
            Ok(text) => text,
            Err(kind) => {
                self.handle_rejection(kind).await;
                return;
            }
        };

        // A valid utterance resets the retry budget.
        self.retry_count = 0;
        tracing::info!(text = %text, confidence = transcript.confidence, "utterance recognized");
        let _ = self.events.send(ConversationEvent::UtteranceRecognized {
            text: text.clone(),
        });

        // Echo of our own playback: keep listening, no retry charged.
        if self.conversation_turns > 1 && self.is_echo(&text) {
            tracing::info!("echo suppressed, listening again");
            self.pending_seed = None;
            self.transition(ConversationState::Listening);
            return;
        }

        if self.music_control_mode {
            self.handle_music_control(&text).await;
            return;
        }

        let intent = self.router.classify(&text, &self.context, Local::now());

        // A ringing alarm narrows what we act on.
        if self.alarm_ringing {
            if let Intent::Alarm { action, time, .. } = &intent {
                if matches!(action, AlarmAction::Stop | AlarmAction::Snooze) {
                    let (action, time) = (*action, *time);
                    self.handle_alarm_intent(action, time, None, None).await;
                    return;
                }
            }
            // Any other request implicitly dismisses the ring.
            self.alarm_ringing = false;
            self.ringing_alarm.take();
        }

        match intent {
            Intent::Alarm {
                action,
                time,
                id,
                theme,
            } => self.handle_alarm_intent(action, time, id, theme).await,
            Intent::Music { action, query } => self.handle_music_intent(action, query).await,
            Intent::Switch {
                action,
                device,
                key,
            } => self.handle_switch_intent(action, &device, key).await,
            Intent::Continuation(text) | Intent::Llm(text) => self.handle_chat(&text).await,
        }
    }

    async fn handle_chat(&mut self, text: &str) {
        let llm_timeout = Duration::from_secs(self.settings.llm.timeout_secs);
        let llm_started = Instant::now();

        let reply = match tokio::time::timeout(llm_timeout, self.llm.chat(&self.context, text))
            .await
        {
            Ok(Ok(reply)) => {
                self.perf.record("llm.chat", llm_started.elapsed());
                reply
            }
            outcome => {
                match outcome {
                    Ok(Err(e)) => tracing::warn!(error = %e, "llm call failed"),
                    _ => tracing::warn!("llm call timed out, cancelling"),
                }
                // Context stays untouched so the turn can be retried
                // after connectivity returns.
                let offline = self.settings.llm.offline_phrase.clone();
                self.speak_and_wait(&offline, TtsScenario::System).await;
                self.transition(ConversationState::Idle);
                return;
            }
        };

        self.context.push(TurnRole::User, text);
        self.context.push(TurnRole::Assistant, reply.clone());

        if self.conversation_turns >= self.settings.conversation.max_turns {
            tracing::info!("conversation turn limit reached, history will reset");
            self.context.clear();
        }

        let _ = self.events.send(ConversationEvent::ReplySpoken {
            text: reply.clone(),
        });

        let scenario = if reply.chars().count() >= self.settings.tts.streaming_threshold {
            TtsScenario::LlmReplyLong
        } else {
            TtsScenario::LlmReply
        };

        let tts_started = Instant::now();
        match self.tts.synthesize(&reply, scenario).await {
            Ok(audio) => {
                self.perf.record("tts.synthesize", tts_started.elapsed());
                if self
                    .player
                    .play(audio.samples.clone(), audio.sample_rate)
                    .await
                    .is_ok()
                {
                    self.transition(ConversationState::Speaking);
                } else {
                    self.transition(ConversationState::Error);
                }
            }
            Err(e) => {
                // Every tier failed; nothing left to say this turn.
                tracing::error!(error = %e, "synthesis failed after all fallbacks");
                self.transition(ConversationState::Idle);
            }
        }
    }

    // ------------------------------------------------------------------
    // Speaking
    // ------------------------------------------------------------------

    async fn speaking_phase(&mut self) {
        self.vad.freeze();
        self.barge_in.reset();

        loop {
            enum SpeakWake {
                Shutdown,
                Frame(Option<PcmFrame>),
                Tick,
            }

            let wake = {
                let frames = &mut self.frames;
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => SpeakWake::Shutdown,
                    frame = frames.recv() => SpeakWake::Frame(frame),
                    _ = tokio::time::sleep(PLAYBACK_TICK) => SpeakWake::Tick,
                }
            };

            match wake {
                SpeakWake::Shutdown => {
                    self.player.stop().await;
                    self.transition(ConversationState::Stopped);
                    return;
                }
                SpeakWake::Frame(None) => {
                    self.player.stop().await;
                    self.transition(ConversationState::Stopped);
                    return;
                }
                SpeakWake::Frame(Some(frame)) => {
                    let is_speech = self.vad.classify(&frame) == VadClass::Speech;
                    if self.barge_in.observe(&frame, is_speech) {
                        // Stop first: every further millisecond of
                        // playback bleeds into the new capture.
                        self.player.stop().await;
                        let _ = self.events.send(ConversationEvent::BargeIn);

                        // The ringing flags survive a barge-in so a
                        // follow-up "snooze" still knows which alarm.
                        self.pending_seed = Some(self.barge_in.take_tail());
                        self.conversation_turns += 1;
                        self.vad.unfreeze();
                        self.transition(ConversationState::Listening);
                        return;
                    }
                }
                SpeakWake::Tick => {
                    if !self.player.is_playing() {
                        self.on_playback_complete().await;
                        return;
                    }
                }
            }
        }
    }

    async fn on_playback_complete(&mut self) {
        self.vad.unfreeze();
        self.alarm_ringing = false;
        self.ringing_alarm.take();

        if let Some(music) = &self.music {
            if !self.music_control_mode {
                music.unduck();
            }
        }

        // Follow-ups arrive as a new wake or a barge-in; idle with the
        // farewell timer armed while the context is still warm.
        if self.settings.conversation.auto_farewell.enabled && !self.context.is_empty() {
            self.farewell_deadline = Some(
                Instant::now()
                    + Duration::from_secs_f32(
                        self.settings.conversation.auto_farewell.idle_timeout_secs,
                    ),
            );
        }
        self.transition(ConversationState::Idle);
    }

    // ------------------------------------------------------------------
    // Error
    // ------------------------------------------------------------------

    async fn error_phase(&mut self) {
        // Try to leave the user with something audible.
        if let Some(apology) = pick_random(&self.settings.audio_quality.retry_prompts.apology) {
            self.speak_and_wait(&apology, TtsScenario::System).await;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        self.end_conversation();
        self.transition(ConversationState::Idle);
    }

    // ------------------------------------------------------------------
    // Intent handlers
    // ------------------------------------------------------------------

    async fn handle_alarm_intent(
        &mut self,
        action: AlarmAction,
        time: Option<chrono::DateTime<Local>>,
        id: Option<i64>,
        theme: Option<String>,
    ) {
        let Some(store) = self.alarm_store.clone() else {
            self.speak_and_wait("Alarms aren't set up on this device.", TtsScenario::System)
                .await;
            self.transition(ConversationState::Idle);
            return;
        };

        match action {
            AlarmAction::Set => {
                let Some(time) = time else {
                    self.speak_and_wait(
                        "I couldn't work out a time for that alarm.",
                        TtsScenario::System,
                    )
                    .await;
                    self.transition(ConversationState::Idle);
                    return;
                };

                let theme = theme.unwrap_or_else(|| "ringtone".to_string());
                match store.add(time.with_timezone(&chrono::Utc), "alarm", &theme) {
                    Ok(alarm) => {
                        // Pre-generate the cheerword now so the fire
                        // path never waits on the LLM.
                        if alarm.uses_cheerword() {
                            let cheerword = self.cheerwords.generate(&alarm.theme).await;
                            if let Err(e) = store.set_cheerword(alarm.id, &cheerword) {
                                tracing::warn!(error = %e, "failed to store cheerword");
                            }
                        }
                        let spoken = time.format("%A at %l:%M %p").to_string();
                        self.speak_and_wait(
                            &format!("Alarm set for {}.", spoken.trim()),
                            TtsScenario::System,
                        )
                        .await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "alarm store write failed");
                        self.speak_and_wait(
                            "Sorry, I couldn't save that alarm.",
                            TtsScenario::System,
                        )
                        .await;
                    }
                }
                self.transition(ConversationState::Idle);
            }
            AlarmAction::Delete => match id {
                Some(id) => {
                    let reply = match store.delete(id) {
                        Ok(true) => format!("Alarm {id} deleted."),
                        Ok(false) => format!("I couldn't find alarm {id}."),
                        Err(e) => {
                            tracing::error!(error = %e, "alarm delete failed");
                            "Sorry, something went wrong deleting that alarm.".to_string()
                        }
                    };
                    self.speak_and_wait(&reply, TtsScenario::System).await;
                    // Deleting often comes mid-housekeeping; keep
                    // listening for the next instruction.
                    self.pending_seed = None;
                    self.transition(ConversationState::Listening);
                }
                None => {
                    self.speak_and_wait(
                        "Which alarm number should I delete?",
                        TtsScenario::System,
                    )
                    .await;
                    self.pending_seed = None;
                    self.transition(ConversationState::Listening);
                }
            },
            AlarmAction::List => {
                let reply = match store.list_active() {
                    Ok(alarms) if alarms.is_empty() => "You have no alarms set.".to_string(),
                    Ok(alarms) => {
                        let next = alarms[0]
                            .fire_time
                            .with_timezone(&Local)
                            .format("%A at %l:%M %p")
                            .to_string();
                        format!(
                            "You have {} alarm{}. The next one is {}.",
                            alarms.len(),
                            if alarms.len() == 1 { "" } else { "s" },
                            next.trim()
                        )
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "alarm list failed");
                        "Sorry, I couldn't read your alarms.".to_string()
                    }
                };
                self.speak_and_wait(&reply, TtsScenario::System).await;
                self.pending_seed = None;
                self.transition(ConversationState::Listening);
            }
            AlarmAction::Stop => {
                self.player.stop().await;
                self.alarm_ringing = false;
                self.ringing_alarm.take();
                self.speak_and_wait("Okay, alarm stopped.", TtsScenario::System).await;
                self.transition(ConversationState::Idle);
            }
            AlarmAction::Snooze => {
                self.player.stop().await;
                self.alarm_ringing = false;

                let minutes = match time {
                    Some(time) => {
                        let delta = time.signed_duration_since(Local::now()).num_minutes();
                        u32::try_from(delta.max(1)).unwrap_or(1)
                    }
                    None => self.settings.alarm.snooze_default_minutes,
                };

                let reply = match self.ringing_alarm.take() {
                    Some(alarm) => match store.snooze(&alarm, chrono::Utc::now(), minutes) {
                        Ok(_) => format!("Okay, I'll remind you again in {minutes} minutes."),
                        Err(e) => {
                            tracing::error!(error = %e, "snooze failed");
                            "Sorry, I couldn't snooze that alarm.".to_string()
                        }
                    },
                    None => "There's no alarm ringing to snooze.".to_string(),
                };
                self.speak_and_wait(&reply, TtsScenario::System).await;
                self.transition(ConversationState::Idle);
            }
        }
    }

    async fn handle_music_intent(&mut self, action: MusicAction, query: Option<String>) {
        let Some(music) = self.music.clone() else {
            self.speak_and_wait("Music isn't set up on this device.", TtsScenario::System)
                .await;
            self.transition(ConversationState::Idle);
            return;
        };

        match action {
            MusicAction::Play => {
                let reply = match music.play(query.as_deref()) {
                    Ok(track) => format!("Playing {}.", track.name),
                    Err(_) => "I couldn't find anything to play.".to_string(),
                };
                music.duck();
                self.speak_and_wait(&reply, TtsScenario::System).await;
                music.unduck();
                self.music_control_mode = false;
                self.transition(ConversationState::Idle);
            }
            MusicAction::Pause => {
                music.pause();
                self.speak_and_wait("Music paused.", TtsScenario::System).await;
                self.music_control_mode = false;
                self.transition(ConversationState::Idle);
            }
            MusicAction::Resume => {
                music.resume();
                music.duck();
                self.speak_and_wait("Resuming the music.", TtsScenario::System).await;
                music.unduck();
                self.transition(ConversationState::Idle);
            }
            MusicAction::Stop => {
                music.stop();
                self.speak_and_wait("Music stopped.", TtsScenario::System).await;
                self.music_control_mode = false;
                self.transition(ConversationState::Idle);
            }
            MusicAction::VolumeUp | MusicAction::VolumeDown => {
                let volume = if action == MusicAction::VolumeUp {
                    music.volume_up()
                } else {
                    music.volume_down()
                };
                let reply = format!("Volume at {} percent.", (volume * 100.0).round() as u32);
                self.speak_and_wait(&reply, TtsScenario::System).await;

                if self.music_control_mode && music.is_playing() {
                    // Stay in control mode for the next adjustment.
                    self.pending_seed = None;
                    self.transition(ConversationState::Listening);
                } else {
                    self.transition(ConversationState::Idle);
                }
            }
        }
    }

    /// Control mode: one command, no chat fallback.
    async fn handle_music_control(&mut self, text: &str) {
        let intent = self.router.classify(text, &self.context, Local::now());
        match intent {
            Intent::Music { action, query } => {
                self.handle_music_intent(action, query).await;
            }
            _ => {
                tracing::info!("no music command recognized, leaving control mode");
                self.music_control_mode = false;
                if let Some(music) = &self.music {
                    music.unduck();
                }
                self.transition(ConversationState::Idle);
            }
        }
    }

    async fn handle_switch_intent(&mut self, action: SwitchAction, device: &str, key: u8) {
        let reply = match &self.switch {
            Some(controller) => match controller.execute(action, device, key).await {
                Ok(confirmation) => confirmation,
                Err(e) => {
                    tracing::warn!(error = %e, device, "switch command failed");
                    format!("Sorry, I couldn't reach the {device}.")
                }
            },
            None => "I can't control switches on this device.".to_string(),
        };
        self.speak_and_wait(&reply, TtsScenario::System).await;
        self.transition(ConversationState::Idle);
    }

    // ------------------------------------------------------------------
    // Alarm firing
    // ------------------------------------------------------------------

    async fn handle_alarm_fire(&mut self, alarm: Alarm) {
        if self.state != ConversationState::Idle {
            // Tie-break: anything mid-flight wins; ring at next idle.
            self.pending_alarms.push_back(alarm);
            return;
        }

        tracing::info!(id = alarm.id, message = %alarm.message, "ringing alarm");
        let _ = self.events.send(ConversationEvent::AlarmRinging { id: alarm.id });

        self.wake.pause();
        if let Some(music) = &self.music {
            music.duck();
        }

        self.alarm_ringing = true;

        let played = if alarm.uses_cheerword() {
            let text = match &alarm.cheerword {
                Some(text) => text.clone(),
                // Nothing pre-generated; make one now, template fallback.
                None => self.cheerwords.generate(&alarm.theme).await,
            };
            match self.tts.synthesize(&text, TtsScenario::AlarmCheerword).await {
                Ok(audio) => self
                    .player
                    .play(audio.samples.clone(), audio.sample_rate)
                    .await
                    .is_ok(),
                Err(e) => {
                    tracing::warn!(error = %e, "cheerword synthesis failed, using ringtone");
                    false
                }
            }
        } else {
            false
        };

        if !played && self.player.play_alarm_ringtone().await.is_err() {
            tracing::error!("alarm ringtone playback failed");
            self.alarm_ringing = false;
            return;
        }

        self.ringing_alarm = Some(alarm);
        self.transition(ConversationState::Speaking);
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Synthesize and play a phrase, draining mic frames while the
    /// speaker is busy so capture order is preserved for consumers.
    async fn speak_and_wait(&mut self, text: &str, scenario: TtsScenario) {
        match self.tts.synthesize(text, scenario).await {
            Ok(audio) => {
                if self
                    .player
                    .play(audio.samples.clone(), audio.sample_rate)
                    .await
                    .is_err()
                {
                    return;
                }
                loop {
                    if !self.player.is_playing() {
                        return;
                    }
                    let frames = &mut self.frames;
                    tokio::select! {
                        frame = frames.recv() => {
                            if frame.is_none() {
                                return;
                            }
                        }
                        _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, text, "phrase synthesis failed");
            }
        }
    }

    fn is_echo(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.echo_words.iter().any(|word| lower.contains(word))
    }

    fn in_quiet_hours(&self) -> bool {
        let config = &self.settings.quiet_hours;
        if !config.enabled {
            return false;
        }
        let (Some(start), Some(end)) = (parse_hhmm(&config.start), parse_hhmm(&config.end))
        else {
            return false;
        };
        let now = Local::now().time();
        time_in_window(now, start, end)
    }
}

async fn recv_alarm(rx: Option<&mut mpsc::Receiver<Alarm>>) -> Option<Alarm> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

fn pick_random(options: &[String]) -> Option<String> {
    options.choose(&mut rand::thread_rng()).cloned()
}

fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let (hours, minutes) = value.split_once(':')?;
    NaiveTime::from_hms_opt(hours.trim().parse().ok()?, minutes.trim().parse().ok()?, 0)
}

/// Window check that handles overnight ranges like 23:00 to 06:00.
fn time_in_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        now >= start && now <= end
    } else {
        now >= start || now <= end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn hhmm_parsing() {
        assert_eq!(parse_hhmm("23:00"), Some(t(23, 0)));
        assert_eq!(parse_hhmm(" 6:30 "), Some(t(6, 30)));
        assert_eq!(parse_hhmm("nonsense"), None);
        assert_eq!(parse_hhmm("25:00"), None);
    }

    #[test]
    fn same_day_window() {
        let start = t(9, 0);
        let end = t(17, 0);
        assert!(time_in_window(t(12, 0), start, end));
        assert!(!time_in_window(t(8, 59), start, end));
        assert!(!time_in_window(t(17, 1), start, end));
    }

    #[test]
    fn overnight_window() {
        let start = t(23, 0);
        let end = t(6, 0);
        assert!(time_in_window(t(23, 30), start, end));
        assert!(time_in_window(t(2, 0), start, end));
        assert!(!time_in_window(t(12, 0), start, end));
    }

    #[test]
    fn minute_boundaries_are_inclusive() {
        let start = t(23, 0);
        let end = t(6, 0);
        assert!(time_in_window(t(23, 0), start, end));
        assert!(time_in_window(t(6, 0), start, end));
    }
}
