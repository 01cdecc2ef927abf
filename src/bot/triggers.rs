use chrono::{DateTime, Duration, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::dispatcher::{JobOrigin, OutboundJob};
use super::sentiment::Sentiment;
use super::templates::{TemplateContext, render};
use crate::db::models::{Guest, Hotel, SentimentLabel, Trigger, TriggerType};
use crate::green_api::chat_id_for_phone;

/// Ten years; longer offsets are almost certainly a unit mistake.
pub const MAX_OFFSET_MINUTES: i64 = 10 * 366 * 24 * 60;

#[derive(Debug, Error, PartialEq)]
#[error("invalid {trigger_type} conditions: {reason}")]
pub struct ConditionError {
    pub trigger_type: TriggerType,
    pub reason: String,
}

/// Parsed form of a trigger's `conditions` JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerRule {
    Time(TimeRule),
    Keywords(KeywordRule),
    Sentiment(SentimentRule),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StayEvent {
    AfterCheckIn,
    BeforeCheckOut,
    AfterCheckOut,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeRule {
    pub event: StayEvent,
    #[serde(default)]
    pub offset_minutes: i64,
}

impl TimeRule {
    /// When the message is due for this guest. `None` when the needed stay
    /// date is unknown or the offset leaves the representable range.
    pub fn due_at(&self, guest: &Guest) -> Option<DateTime<Utc>> {
        let offset = TimeDelta::try_minutes(self.offset_minutes)?;
        match self.event {
            StayEvent::AfterCheckIn => guest.check_in_date?.checked_add_signed(offset),
            StayEvent::BeforeCheckOut => guest.check_out_date?.checked_sub_signed(offset),
            StayEvent::AfterCheckOut => guest.check_out_date?.checked_add_signed(offset),
        }
    }

    /// Due, and not so long ago that sending would be stale.
    pub fn is_due(&self, guest: &Guest, now: DateTime<Utc>, grace: Duration) -> bool {
        self.due_at(guest)
            .map(|due| due <= now && now - due <= grace)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Any,
    All,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordRule {
    pub keywords: Vec<String>,
    #[serde(default, rename = "match")]
    pub mode: MatchMode,
}

impl KeywordRule {
    /// Case-insensitive substring match.
    pub fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        let mut hits = self
            .keywords
            .iter()
            .map(|keyword| text.contains(&keyword.to_lowercase()));
        match self.mode {
            MatchMode::Any => hits.any(|hit| hit),
            MatchMode::All => hits.all(|hit| hit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SentimentRule {
    #[serde(default)]
    pub sentiment: Option<SentimentLabel>,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub min_score: Option<f64>,
}

impl SentimentRule {
    pub fn matches(&self, sentiment: &Sentiment) -> bool {
        self.sentiment.is_none_or(|label| label == sentiment.label)
            && self.max_score.is_none_or(|max| sentiment.score <= max)
            && self.min_score.is_none_or(|min| sentiment.score >= min)
    }
}

pub fn parse_rule(trigger_type: TriggerType, conditions: &Value) -> Result<TriggerRule, ConditionError> {
    let invalid = |reason: String| ConditionError {
        trigger_type,
        reason,
    };

    match trigger_type {
        TriggerType::TimeBased => {
            let rule: TimeRule =
                serde_json::from_value(conditions.clone()).map_err(|e| invalid(e.to_string()))?;
            if rule.offset_minutes < 0 {
                return Err(invalid("offset_minutes must not be negative".to_string()));
            }
            if rule.offset_minutes > MAX_OFFSET_MINUTES {
                return Err(invalid(format!(
                    "offset_minutes must not exceed {MAX_OFFSET_MINUTES}"
                )));
            }
            Ok(TriggerRule::Time(rule))
        }
        TriggerType::ConditionBased => {
            let rule: KeywordRule =
                serde_json::from_value(conditions.clone()).map_err(|e| invalid(e.to_string()))?;
            if rule.keywords.is_empty() {
                return Err(invalid("keywords must not be empty".to_string()));
            }
            if rule.keywords.iter().any(|k| k.trim().is_empty()) {
                return Err(invalid("keywords must not be blank".to_string()));
            }
            Ok(TriggerRule::Keywords(rule))
        }
        TriggerType::SentimentBased => {
            let rule: SentimentRule =
                serde_json::from_value(conditions.clone()).map_err(|e| invalid(e.to_string()))?;
            if rule.sentiment.is_none() && rule.max_score.is_none() && rule.min_score.is_none() {
                return Err(invalid(
                    "one of sentiment, max_score or min_score is required".to_string(),
                ));
            }
            for score in [rule.max_score, rule.min_score].into_iter().flatten() {
                if !(-1.0..=1.0).contains(&score) {
                    return Err(invalid(format!("score {score} is outside [-1, 1]")));
                }
            }
            if let (Some(min), Some(max)) = (rule.min_score, rule.max_score) {
                if min > max {
                    return Err(invalid("min_score is greater than max_score".to_string()));
                }
            }
            Ok(TriggerRule::Sentiment(rule))
        }
    }
}

/// Outbound job carrying the trigger's rendered template to the guest.
pub fn trigger_job(trigger: &Trigger, hotel: &Hotel, guest: &Guest) -> OutboundJob {
    OutboundJob {
        hotel_id: hotel.id,
        guest_id: Some(guest.id),
        chat_id: chat_id_for_phone(&guest.phone_number),
        message: render(
            &trigger.message_template,
            &TemplateContext::for_guest(hotel, guest),
        ),
        origin: JobOrigin::Trigger {
            trigger_id: trigger.id,
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use test_case::test_case;

    use super::*;
    use crate::bot::sentiment::SentimentSource;

    fn guest(check_in: Option<DateTime<Utc>>, check_out: Option<DateTime<Utc>>) -> Guest {
        let now = Utc::now();
        Guest {
            id: 1,
            hotel_id: 1,
            phone_number: "1".into(),
            name: None,
            check_in_date: check_in,
            check_out_date: check_out,
            room_number: None,
            preferences: json!({}),
            last_interaction_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test_case(TriggerType::TimeBased, json!({ "event": "after_check_in", "offset_minutes": 60 }))]
    #[test_case(TriggerType::TimeBased, json!({ "event": "before_check_out" }))]
    #[test_case(TriggerType::ConditionBased, json!({ "keywords": ["towel"], "match": "all" }))]
    #[test_case(TriggerType::SentimentBased, json!({ "sentiment": "negative" }))]
    #[test_case(TriggerType::SentimentBased, json!({ "min_score": -0.5, "max_score": 0.0 }))]
    fn valid_conditions(trigger_type: TriggerType, conditions: Value) {
        assert!(parse_rule(trigger_type, &conditions).is_ok());
    }

    #[test_case(TriggerType::TimeBased, json!({}))]
    #[test_case(TriggerType::TimeBased, json!({ "event": "at_noon" }))]
    #[test_case(TriggerType::TimeBased, json!({ "event": "after_check_in", "offset_minutes": -5 }))]
    #[test_case(TriggerType::TimeBased, json!({ "event": "after_check_in", "offset_minutes": 1_000_000_000_000i64 }))]
    #[test_case(TriggerType::ConditionBased, json!({ "keywords": [] }))]
    #[test_case(TriggerType::ConditionBased, json!({ "keywords": [" "] }))]
    #[test_case(TriggerType::ConditionBased, json!({ "keyword": "typo" }))]
    #[test_case(TriggerType::SentimentBased, json!({}))]
    #[test_case(TriggerType::SentimentBased, json!({ "max_score": 3.0 }))]
    #[test_case(TriggerType::SentimentBased, json!({ "min_score": 0.5, "max_score": -0.5 }))]
    fn invalid_conditions(trigger_type: TriggerType, conditions: Value) {
        let err = parse_rule(trigger_type, &conditions).expect_err("invalid");
        assert_eq!(err.trigger_type, trigger_type);
    }

    #[test]
    fn keyword_modes() {
        let any = KeywordRule {
            keywords: vec!["Towel".into(), "pillow".into()],
            mode: MatchMode::Any,
        };
        let all = KeywordRule {
            mode: MatchMode::All,
            ..any.clone()
        };
        assert!(any.matches("Could I get a fresh TOWEL?"));
        assert!(!all.matches("Could I get a fresh towel?"));
        assert!(all.matches("An extra pillow and a towel please"));
        assert!(!any.matches("What time is checkout?"));
    }

    #[test]
    fn sentiment_rule_thresholds() {
        let rule = SentimentRule {
            sentiment: Some(SentimentLabel::Negative),
            max_score: Some(-0.5),
            min_score: None,
        };
        let mild = Sentiment {
            score: -0.3,
            label: SentimentLabel::Negative,
            source: SentimentSource::Model,
        };
        let strong = Sentiment { score: -0.9, ..mild };
        assert!(!rule.matches(&mild));
        assert!(rule.matches(&strong));
    }

    #[test]
    fn time_rule_respects_grace_window() {
        let now = Utc::now();
        let rule = TimeRule {
            event: StayEvent::AfterCheckIn,
            offset_minutes: 60,
        };
        let grace = Duration::minutes(180);

        let just_due = guest(Some(now - Duration::minutes(61)), None);
        let not_yet = guest(Some(now - Duration::minutes(30)), None);
        let stale = guest(Some(now - Duration::hours(5)), None);
        let unknown = guest(None, None);
        assert!(rule.is_due(&just_due, now, grace));
        assert!(!rule.is_due(&not_yet, now, grace));
        assert!(!rule.is_due(&stale, now, grace));
        assert!(!rule.is_due(&unknown, now, grace));

        let before_checkout = TimeRule {
            event: StayEvent::BeforeCheckOut,
            offset_minutes: 120,
        };
        let leaving = guest(None, Some(now + Duration::minutes(90)));
        assert!(before_checkout.is_due(&leaving, now, grace));
    }

    #[test]
    fn out_of_range_offset_is_never_due() {
        let now = Utc::now();
        let guest = guest(Some(now), Some(now));
        for event in [StayEvent::AfterCheckIn, StayEvent::BeforeCheckOut, StayEvent::AfterCheckOut] {
            let rule = TimeRule {
                event,
                offset_minutes: 1_000_000_000_000,
            };
            assert_eq!(rule.due_at(&guest), None);
            assert!(!rule.is_due(&guest, now, Duration::minutes(180)));
        }
        let max = TimeRule {
            event: StayEvent::AfterCheckIn,
            offset_minutes: MAX_OFFSET_MINUTES,
        };
        assert!(max.due_at(&guest).is_some());
    }
}
