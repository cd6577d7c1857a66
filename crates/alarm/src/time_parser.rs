//! Natural-language time parsing
//!
//! Handles the spoken forms that actually reach the intent router:
//! relative offsets ("in twenty minutes", "in an hour and a half"),
//! clock times ("at 7", "at 7:30 pm"), day qualifiers ("tomorrow
//! morning at 8"), and fuzzy day parts ("this evening"). A bare clock
//! time already in the past rolls to the next day.

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;

static RELATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bin\s+(?:(a|an|half an|\d+|[a-z]+)\s+(?:and\s+a\s+half\s+)?)(second|minute|hour|day)s?\b")
        .expect("static regex")
});

static AND_A_HALF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"and\s+a\s+half").expect("static regex"));

static CLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bat\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)?\b").expect("static regex")
});

/// Fuzzy day parts and their default hour.
static DAY_PARTS: &[(&str, u32)] = &[
    ("midnight", 0),
    ("early morning", 6),
    ("morning", 7),
    ("afternoon", 14),
    ("noon", 12),
    ("midday", 12),
    ("evening", 18),
    ("tonight", 21),
    ("night", 21),
];

static WORD_NUMBERS: &[(&str, i64)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("fifteen", 15),
    ("twenty", 20),
    ("thirty", 30),
    ("forty", 40),
    ("fifty", 50),
    ("sixty", 60),
];

/// Parse a spoken time expression relative to `now`. Returns `None`
/// when no time can be extracted, letting the intent fall through to
/// the LLM.
pub fn parse_spoken_time(text: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let text = text.to_lowercase();

    if let Some(result) = parse_relative(&text, now) {
        return Some(result);
    }
    if let Some(result) = parse_clock(&text, now) {
        return Some(result);
    }
    parse_day_part(&text, now)
}

fn parse_relative(text: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let captures = RELATIVE.captures(text)?;
    let quantity = captures.get(1)?.as_str();
    let unit = captures.get(2)?.as_str();

    let base: f64 = match quantity {
        "a" | "an" => 1.0,
        "half an" => 0.5,
        other => match other.parse::<f64>() {
            Ok(n) => n,
            Err(_) => {
                let n = WORD_NUMBERS
                    .iter()
                    .find(|(word, _)| *word == other)
                    .map(|(_, n)| *n)?;
                n as f64
            }
        },
    };

    let amount = if AND_A_HALF.is_match(text) {
        base + 0.5
    } else {
        base
    };

    let seconds = match unit {
        "second" => amount,
        "minute" => amount * 60.0,
        "hour" => amount * 3600.0,
        "day" => amount * 86_400.0,
        _ => return None,
    };

    Some(now + Duration::seconds(seconds.round() as i64))
}

fn parse_clock(text: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let captures = CLOCK.captures(text)?;
    let mut hour: u32 = captures.get(1)?.as_str().parse().ok()?;
    let minute: u32 = captures
        .get(2)
        .map(|m| m.as_str().parse().unwrap_or(0))
        .unwrap_or(0);

    if hour > 23 || minute > 59 {
        return None;
    }

    match captures.get(3).map(|m| m.as_str()) {
        Some(meridiem) if meridiem.starts_with('p') => {
            if hour < 12 {
                hour += 12;
            }
        }
        Some(meridiem) if meridiem.starts_with('a') => {
            if hour == 12 {
                hour = 0;
            }
        }
        _ => {
            // No meridiem: "at 7" when the morning slot already passed
            // means 7 pm today, matching how people actually speak.
            if !text.contains("tomorrow") && hour < 12 {
                let as_morning = now.date_naive().and_hms_opt(hour, minute, 0)?;
                if Local.from_local_datetime(&as_morning).single()? <= now {
                    hour += 12;
                }
            }
        }
    }

    let tomorrow = text.contains("tomorrow");
    let date = if tomorrow {
        now.date_naive() + Duration::days(1)
    } else {
        now.date_naive()
    };

    let naive = date.and_time(NaiveTime::from_hms_opt(hour % 24, minute, 0)?);
    let mut result = Local.from_local_datetime(&naive).single()?;

    // A clock time already behind us rolls to the next day.
    if result <= now {
        result += Duration::days(1);
    }
    Some(result)
}

fn parse_day_part(text: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let (_, hour) = DAY_PARTS.iter().find(|(name, _)| text.contains(name))?;

    let tomorrow = text.contains("tomorrow");
    let date = if tomorrow {
        now.date_naive() + Duration::days(1)
    } else {
        now.date_naive()
    };

    let naive = date.and_time(NaiveTime::from_hms_opt(*hour, 0, 0)?);
    let mut result = Local.from_local_datetime(&naive).single()?;
    if result <= now {
        result += Duration::days(1);
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn base_time() -> DateTime<Local> {
        // A Tuesday at 10:15 local time.
        Local.with_ymd_and_hms(2026, 3, 10, 10, 15, 0).unwrap()
    }

    #[test]
    fn relative_minutes() {
        let now = base_time();
        let t = parse_spoken_time("set an alarm in 20 minutes", now).unwrap();
        assert_eq!(t, now + Duration::minutes(20));
    }

    #[test]
    fn relative_word_numbers() {
        let now = base_time();
        let t = parse_spoken_time("remind me in twenty minutes", now).unwrap();
        assert_eq!(t, now + Duration::minutes(20));
    }

    #[test]
    fn relative_an_hour() {
        let now = base_time();
        assert_eq!(
            parse_spoken_time("wake me in an hour", now).unwrap(),
            now + Duration::hours(1)
        );
        assert_eq!(
            parse_spoken_time("in half an hour", now).unwrap(),
            now + Duration::minutes(30)
        );
    }

    #[test]
    fn relative_hour_and_a_half() {
        let now = base_time();
        assert_eq!(
            parse_spoken_time("in an hour and a half", now).unwrap(),
            now + Duration::minutes(90)
        );
    }

    #[test]
    fn clock_time_future_today() {
        let now = base_time();
        let t = parse_spoken_time("alarm at 11:30", now).unwrap();
        assert_eq!(t.hour(), 11);
        assert_eq!(t.minute(), 30);
        assert_eq!(t.date_naive(), now.date_naive());
    }

    #[test]
    fn clock_time_past_rolls_forward() {
        let now = base_time(); // 10:15
        let t = parse_spoken_time("alarm at 7", now).unwrap();
        // 7 already passed, so this means 7 pm today.
        assert_eq!(t.hour(), 19);
        assert_eq!(t.date_naive(), now.date_naive());
    }

    #[test]
    fn explicit_am_past_rolls_to_tomorrow() {
        let now = base_time();
        let t = parse_spoken_time("alarm at 7 am", now).unwrap();
        assert_eq!(t.hour(), 7);
        assert_eq!(t.date_naive(), now.date_naive() + Duration::days(1));
    }

    #[test]
    fn pm_clock_time() {
        let now = base_time();
        let t = parse_spoken_time("wake me at 7:45 pm", now).unwrap();
        assert_eq!(t.hour(), 19);
        assert_eq!(t.minute(), 45);
    }

    #[test]
    fn tomorrow_morning() {
        let now = base_time();
        let t = parse_spoken_time("tomorrow morning at 8", now).unwrap();
        assert_eq!(t.hour(), 8);
        assert_eq!(t.date_naive(), now.date_naive() + Duration::days(1));
    }

    #[test]
    fn fuzzy_evening() {
        let now = base_time();
        let t = parse_spoken_time("remind me this evening", now).unwrap();
        assert_eq!(t.hour(), 18);
        assert_eq!(t.date_naive(), now.date_naive());
    }

    #[test]
    fn unparsable_returns_none() {
        let now = base_time();
        assert!(parse_spoken_time("whenever you feel like it", now).is_none());
        assert!(parse_spoken_time("", now).is_none());
    }
}
