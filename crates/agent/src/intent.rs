//! Intent routing
//!
//! Keyword-pattern classification with a small fixed rule set per
//! intent family. Patterns are ordered; first match wins; anything
//! unmatched falls through to the LLM. Pure function: same text, same
//! context, same clock, same result.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;

use walnut_core::{DialogueContext, EngineError};

/// Alarm operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmAction {
    Set,
    Delete,
    List,
    Snooze,
    Stop,
}

/// Music operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicAction {
    Play,
    Pause,
    Resume,
    Stop,
    VolumeUp,
    VolumeDown,
}

/// Smart-switch operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchAction {
    On,
    Off,
    Toggle,
    Query,
}

/// Classified user request
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Fall through to the LLM
    Llm(String),
    Alarm {
        action: AlarmAction,
        time: Option<DateTime<Local>>,
        id: Option<i64>,
        theme: Option<String>,
    },
    Music {
        action: MusicAction,
        query: Option<String>,
    },
    Switch {
        action: SwitchAction,
        device: String,
        key: u8,
    },
    /// Short follow-up that leans on prior context
    Continuation(String),
}

/// Smart-switch transport is an external collaborator; the machine only
/// needs a confirmation sentence back.
#[async_trait]
pub trait SwitchController: Send + Sync {
    async fn execute(
        &self,
        action: SwitchAction,
        device: &str,
        key: u8,
    ) -> Result<String, EngineError>;
}

static ALARM_STOP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(stop|turn off|silence)\b.*\balarm\b|^stop$").expect("static regex"));
static ALARM_SNOOZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bsnooze\b|\bfive more minutes\b|\bremind me (again )?later\b").expect("static regex")
});
static SNOOZE_MINUTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+)\s+minutes?\b").expect("static regex"));
static ALARM_DELETE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(delete|cancel|remove)\b.*\b(alarm|reminder)\b").expect("static regex")
});
static ALARM_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:number|alarm)\s+(\d+)\b").expect("static regex"));
static ALARM_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(list|show|what)\b.*\balarms?\b|\bmy alarms\b").expect("static regex")
});
static ALARM_SET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(set|create|make)?\s*(an?\s+)?alarm\b|\bwake me\b|\bremind me\b")
        .expect("static regex")
});
static ALARM_THEME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bwith\s+(?:a|an|the)?\s*([a-z]+)\s+theme\b").expect("static regex")
});

static MUSIC_PLAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bplay\b\s*(?:some\s+)?(?:music|songs?)?\s*(.*)").expect("static regex")
});
static MUSIC_PAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bpause\b").expect("static regex"));
static MUSIC_RESUME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(resume|continue)\b.*\b(music|song|playing)\b|\bkeep playing\b")
        .expect("static regex")
});
static MUSIC_STOP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bstop\b.*\b(music|song|playing)\b").expect("static regex"));
static MUSIC_VOL_UP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(louder|volume up|turn it up)\b").expect("static regex")
});
static MUSIC_VOL_DOWN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(quieter|softer|volume down|turn it down)\b").expect("static regex")
});

static SWITCH_CMD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(turn on|switch on|turn off|switch off|toggle)\s+(?:the\s+)?([a-z][a-z ]*?)(?:\s+(?:please|now))?$",
    )
    .expect("static regex")
});
static SWITCH_QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bis\s+(?:the\s+)?([a-z][a-z ]*?)\s+(on|off)\b").expect("static regex")
});
static SWITCH_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:key|button|channel)\s+(\d)\b").expect("static regex"));

static CONTINUATION_LEAD: &[&str] = &["and ", "what about", "how about", "also ", "then "];

/// Rule-based intent classifier.
pub struct IntentRouter {
    continuation_support: bool,
}

impl IntentRouter {
    pub fn new(continuation_support: bool) -> Self {
        Self {
            continuation_support,
        }
    }

    /// Classify a recognized utterance. `now` anchors time parsing so
    /// the router stays deterministic.
    pub fn classify(
        &self,
        text: &str,
        context: &DialogueContext,
        now: DateTime<Local>,
    ) -> Intent {
        let raw = text.trim();
        let lower = raw.to_lowercase();

        // Switch family first: "turn on the lamp" must never reach the
        // music rules via "on".
        if let Some(captures) = SWITCH_CMD.captures(&lower) {
            let verb = captures.get(1).map(|m| m.as_str()).unwrap_or("");
            let device = captures
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            // Music phrasing like "turn off the music" belongs below.
            if !device.contains("music") && !device.contains("song") && !device.is_empty() {
                let action = if verb.contains("toggle") {
                    SwitchAction::Toggle
                } else if verb.contains("off") {
                    SwitchAction::Off
                } else {
                    SwitchAction::On
                };
                let key = SWITCH_KEY
                    .captures(&lower)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(1);
                return Intent::Switch {
                    action,
                    device,
                    key,
                };
            }
        }
        if let Some(captures) = SWITCH_QUERY.captures(&lower) {
            let device = captures
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            if !device.contains("music") && !device.is_empty() {
                return Intent::Switch {
                    action: SwitchAction::Query,
                    device,
                    key: 1,
                };
            }
        }

        // Music family.
        if MUSIC_STOP.is_match(&lower) || lower == "turn off the music" {
            return Intent::Music {
                action: MusicAction::Stop,
                query: None,
            };
        }
        if MUSIC_VOL_UP.is_match(&lower) {
            return Intent::Music {
                action: MusicAction::VolumeUp,
                query: None,
            };
        }
        if MUSIC_VOL_DOWN.is_match(&lower) {
            return Intent::Music {
                action: MusicAction::VolumeDown,
                query: None,
            };
        }
        if MUSIC_RESUME.is_match(&lower) {
            return Intent::Music {
                action: MusicAction::Resume,
                query: None,
            };
        }
        if MUSIC_PAUSE.is_match(&lower) {
            return Intent::Music {
                action: MusicAction::Pause,
                query: None,
            };
        }
        if lower.contains("play") {
            if let Some(captures) = MUSIC_PLAY.captures(&lower) {
                let rest = captures
                    .get(1)
                    .map(|m| m.as_str().trim())
                    .unwrap_or_default();
                let mentions_music = lower.contains("music") || lower.contains("song");
                if mentions_music || rest.is_empty() {
                    let query = rest
                        .trim_start_matches("by ")
                        .trim()
                        .to_string();
                    return Intent::Music {
                        action: MusicAction::Play,
                        query: if query.is_empty() { None } else { Some(query) },
                    };
                }
            }
        }

        // Alarm family.
        if ALARM_STOP.is_match(&lower) && (lower.contains("alarm") || lower == "stop") {
            return Intent::Alarm {
                action: AlarmAction::Stop,
                time: None,
                id: None,
                theme: None,
            };
        }
        if ALARM_SNOOZE.is_match(&lower) {
            let time = SNOOZE_MINUTES
                .captures(&lower)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<i64>().ok())
                .map(|minutes| now + chrono::Duration::minutes(minutes));
            return Intent::Alarm {
                action: AlarmAction::Snooze,
                time,
                id: None,
                theme: None,
            };
        }
        if ALARM_DELETE.is_match(&lower) {
            let id = ALARM_ID
                .captures(&lower)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok());
            return Intent::Alarm {
                action: AlarmAction::Delete,
                time: None,
                id,
                theme: None,
            };
        }
        if ALARM_LIST.is_match(&lower) {
            return Intent::Alarm {
                action: AlarmAction::List,
                time: None,
                id: None,
                theme: None,
            };
        }
        if ALARM_SET.is_match(&lower)
            && (lower.contains("alarm") || lower.contains("wake me") || lower.contains("remind me"))
        {
            // No parsable time means the request is not actionable here;
            // let the LLM ask the clarifying question.
            if let Some(time) = walnut_alarm::parse_spoken_time(&lower, now) {
                let theme = ALARM_THEME
                    .captures(&lower)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());
                return Intent::Alarm {
                    action: AlarmAction::Set,
                    time: Some(time),
                    id: None,
                    theme,
                };
            }
        }

        // Continuation: a short follow-up that only makes sense with
        // prior context.
        if self.continuation_support && !context.is_empty() {
            let leads_on = CONTINUATION_LEAD
                .iter()
                .any(|lead| lower.starts_with(lead));
            let short_question = raw.ends_with('?') && raw.split_whitespace().count() <= 4;
            if leads_on || short_question {
                return Intent::Continuation(raw.to_string());
            }
        }

        Intent::Llm(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use walnut_core::TurnRole;

    fn router() -> IntentRouter {
        IntentRouter::new(true)
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 10, 10, 15, 0).unwrap()
    }

    fn empty_ctx() -> DialogueContext {
        DialogueContext::new(10)
    }

    #[test]
    fn plain_chat_goes_to_llm() {
        let intent = router().classify("tell me a joke", &empty_ctx(), now());
        assert_eq!(intent, Intent::Llm("tell me a joke".to_string()));
    }

    #[test]
    fn alarm_set_with_time() {
        let intent = router().classify("set an alarm in 20 minutes", &empty_ctx(), now());
        match intent {
            Intent::Alarm {
                action: AlarmAction::Set,
                time: Some(time),
                theme: None,
                ..
            } => assert_eq!(time, now() + chrono::Duration::minutes(20)),
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[test]
    fn alarm_set_with_theme() {
        let intent = router().classify(
            "wake me tomorrow morning at 8 with a workout theme",
            &empty_ctx(),
            now(),
        );
        match intent {
            Intent::Alarm {
                action: AlarmAction::Set,
                theme: Some(theme),
                ..
            } => assert_eq!(theme, "workout"),
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[test]
    fn alarm_without_time_falls_to_llm() {
        let intent = router().classify("remind me about the thing", &empty_ctx(), now());
        assert!(matches!(intent, Intent::Llm(_)));
    }

    #[test]
    fn alarm_delete_with_id() {
        let intent = router().classify("delete alarm 3", &empty_ctx(), now());
        assert_eq!(
            intent,
            Intent::Alarm {
                action: AlarmAction::Delete,
                time: None,
                id: Some(3),
                theme: None,
            }
        );
    }

    #[test]
    fn alarm_list() {
        let intent = router().classify("what alarms do I have", &empty_ctx(), now());
        assert!(matches!(
            intent,
            Intent::Alarm {
                action: AlarmAction::List,
                ..
            }
        ));
    }

    #[test]
    fn alarm_stop_bare_word() {
        let intent = router().classify("stop", &empty_ctx(), now());
        assert!(matches!(
            intent,
            Intent::Alarm {
                action: AlarmAction::Stop,
                ..
            }
        ));
    }

    #[test]
    fn snooze_with_minutes() {
        let intent = router().classify("snooze for 15 minutes", &empty_ctx(), now());
        match intent {
            Intent::Alarm {
                action: AlarmAction::Snooze,
                time: Some(time),
                ..
            } => assert_eq!(time, now() + chrono::Duration::minutes(15)),
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[test]
    fn music_play_with_query() {
        let intent = router().classify("play the song sunrise", &empty_ctx(), now());
        match intent {
            Intent::Music {
                action: MusicAction::Play,
                query: Some(query),
            } => assert!(query.contains("sunrise")),
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[test]
    fn music_controls() {
        let r = router();
        assert!(matches!(
            r.classify("stop the music", &empty_ctx(), now()),
            Intent::Music {
                action: MusicAction::Stop,
                ..
            }
        ));
        assert!(matches!(
            r.classify("turn it down a bit", &empty_ctx(), now()),
            Intent::Music {
                action: MusicAction::VolumeDown,
                ..
            }
        ));
        assert!(matches!(
            r.classify("pause", &empty_ctx(), now()),
            Intent::Music {
                action: MusicAction::Pause,
                ..
            }
        ));
    }

    #[test]
    fn switch_on_device() {
        let intent = router().classify("turn on the desk lamp", &empty_ctx(), now());
        assert_eq!(
            intent,
            Intent::Switch {
                action: SwitchAction::On,
                device: "desk lamp".to_string(),
                key: 1,
            }
        );
    }

    #[test]
    fn switch_off_beats_music_rules() {
        let intent = router().classify("turn off the music", &empty_ctx(), now());
        assert!(matches!(
            intent,
            Intent::Music {
                action: MusicAction::Stop,
                ..
            }
        ));
    }

    #[test]
    fn switch_query() {
        let intent = router().classify("is the heater on", &empty_ctx(), now());
        assert_eq!(
            intent,
            Intent::Switch {
                action: SwitchAction::Query,
                device: "heater".to_string(),
                key: 1,
            }
        );
    }

    #[test]
    fn continuation_needs_context() {
        let r = router();
        let mut ctx = empty_ctx();

        // Without history the same words go to the LLM.
        assert!(matches!(
            r.classify("and tomorrow?", &ctx, now()),
            Intent::Llm(_)
        ));

        ctx.push(TurnRole::User, "what's the weather today");
        ctx.push(TurnRole::Assistant, "sunny and mild");
        assert_eq!(
            r.classify("and tomorrow?", &ctx, now()),
            Intent::Continuation("and tomorrow?".to_string())
        );
    }

    #[test]
    fn continuation_disabled_by_config() {
        let r = IntentRouter::new(false);
        let mut ctx = empty_ctx();
        ctx.push(TurnRole::User, "question");
        assert!(matches!(
            r.classify("and tomorrow?", &ctx, now()),
            Intent::Llm(_)
        ));
    }

    #[test]
    fn deterministic_given_same_inputs() {
        let r = router();
        let a = r.classify("set an alarm at 7 am", &empty_ctx(), now());
        let b = r.classify("set an alarm at 7 am", &empty_ctx(), now());
        assert_eq!(a, b);
    }
}
