//! Fallbacks used when DeepSeek is unavailable, so the guest message path
//! keeps working without the model.

use crate::bot::sentiment::{Sentiment, SentimentSource};
use crate::db::models::{Hotel, SentimentLabel};

const NEGATIVE_WORDS: &[&str] = &[
    "angry",
    "awful",
    "bad",
    "broken",
    "cold",
    "complain",
    "complained",
    "complaint",
    "dirty",
    "disappointed",
    "disgusting",
    "horrible",
    "leak",
    "leaking",
    "leaks",
    "loud",
    "noisy",
    "problem",
    "refund",
    "rude",
    "smell",
    "smells",
    "smelly",
    "terrible",
    "unacceptable",
    "upset",
    "worst",
    "не работает",
    "грязн",
    "ужасн",
    "плох",
    "жалоб",
    "шум",
];

const POSITIVE_WORDS: &[&str] = &[
    "amazing",
    "awesome",
    "beautiful",
    "clean",
    "comfortable",
    "excellent",
    "fantastic",
    "friendly",
    "good",
    "great",
    "helpful",
    "love",
    "loved",
    "nice",
    "perfect",
    "thank",
    "thanks",
    "wonderful",
    "спасибо",
    "отличн",
    "прекрасн",
    "хорош",
];

const NEGATIONS: &[&str] = &["not", "no", "never", "don't", "isn't", "wasn't", "не"];

/// Rule-based sentiment: counts positive and negative cue words, flipping a
/// cue that directly follows a negation, and maps the balance into [-1, 1].
pub fn keyword_sentiment(text: &str) -> Sentiment {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .collect();

    let mut positive = 0i32;
    let mut negative = 0i32;
    for (index, token) in tokens.iter().enumerate() {
        let negated = index > 0 && NEGATIONS.contains(&tokens[index - 1]);
        let is_negative = NEGATIVE_WORDS
            .iter()
            .any(|cue| !cue.contains(' ') && cue_matches(cue, token));
        let is_positive = POSITIVE_WORDS.iter().any(|cue| cue_matches(cue, token));
        match (is_positive, is_negative, negated) {
            (true, _, false) | (_, true, true) => positive += 1,
            (true, _, true) | (_, true, false) => negative += 1,
            _ => {}
        }
    }
    // Multi-word cues are matched on the raw text.
    negative += NEGATIVE_WORDS
        .iter()
        .filter(|cue| cue.contains(' ') && lowered.contains(**cue))
        .count() as i32;

    let total = positive + negative;
    let score = if total == 0 {
        0.0
    } else {
        f64::from(positive - negative) / f64::from(total)
    };
    Sentiment {
        score,
        label: label_for_score(score),
        source: SentimentSource::Fallback,
    }
}

/// English cues are whole words; Cyrillic cues are stems matched as prefixes.
fn cue_matches(cue: &str, token: &str) -> bool {
    if cue.is_ascii() {
        token == cue
    } else {
        token.starts_with(cue)
    }
}

pub fn label_for_score(score: f64) -> SentimentLabel {
    if score <= -0.2 {
        SentimentLabel::Negative
    } else if score >= 0.2 {
        SentimentLabel::Positive
    } else {
        SentimentLabel::Neutral
    }
}

/// Canned reply sent in place of a generated one: the hotel's
/// `fallback_reply` setting, else the configured default.
pub fn fallback_reply<'a>(hotel: &'a Hotel, default_reply: &'a str) -> &'a str {
    hotel.setting_str("fallback_reply").unwrap_or(default_reply)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    #[test_case("The room is dirty and the staff was rude", SentimentLabel::Negative)]
    #[test_case("Thank you, everything was perfect!", SentimentLabel::Positive)]
    #[test_case("What time is breakfast?", SentimentLabel::Neutral)]
    #[test_case("The shower is not good", SentimentLabel::Negative)]
    #[test_case("Кондиционер не работает", SentimentLabel::Negative)]
    #[test_case("Спасибо, всё отлично", SentimentLabel::Positive)]
    #[test_case("Goodbye, see you next year", SentimentLabel::Neutral)]
    #[test_case("Is there a badminton court?", SentimentLabel::Neutral)]
    #[test_case("Can you play Coldplay at the bar?", SentimentLabel::Neutral)]
    #[test_case("Thanks, we loved the view", SentimentLabel::Positive)]
    #[test_case("Грязное полотенце", SentimentLabel::Negative)]
    fn keyword_labels(text: &str, expected: SentimentLabel) {
        let sentiment = keyword_sentiment(text);
        assert_eq!(sentiment.label, expected);
        assert_eq!(sentiment.source, SentimentSource::Fallback);
        assert!((-1.0..=1.0).contains(&sentiment.score));
    }

    #[test]
    fn fallback_reply_prefers_hotel_setting() {
        let now = Utc::now();
        let mut hotel = Hotel {
            id: 1,
            name: "Seaside".into(),
            whatsapp_number: "+1".into(),
            green_api_instance_id: None,
            green_api_token: None,
            settings: json!({}),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(fallback_reply(&hotel, "default"), "default");
        hotel.settings = json!({ "fallback_reply": "We will get back to you shortly." });
        assert_eq!(
            fallback_reply(&hotel, "default"),
            "We will get back to you shortly."
        );
    }
}
