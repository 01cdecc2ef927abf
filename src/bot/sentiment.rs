use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::db::models::SentimentLabel;
use crate::deepseek::{ChatMessage, LanguageModel};
use crate::resilience::Guarded;
use crate::resilience::degradation::{keyword_sentiment, label_for_score};
use crate::web::metrics::Metrics;

const SENTIMENT_PROMPT: &str = "You rate the sentiment of a hotel guest's WhatsApp message. \
Answer with JSON only, no prose: {\"score\": <number from -1.0 (very negative) to 1.0 (very positive)>, \
\"label\": \"positive\" | \"neutral\" | \"negative\"}.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentSource {
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sentiment {
    /// Always within [-1, 1].
    pub score: f64,
    pub label: SentimentLabel,
    pub source: SentimentSource,
}

#[derive(Deserialize)]
struct ModelVerdict {
    score: f64,
    #[serde(default)]
    label: Option<String>,
}

pub struct SentimentAnalyzer {
    model: Option<Arc<dyn LanguageModel>>,
    guarded: Guarded,
}

impl SentimentAnalyzer {
    /// Without a model every message is scored by the keyword fallback.
    pub fn new(model: Option<Arc<dyn LanguageModel>>, guarded: Guarded) -> Self {
        Self { model, guarded }
    }

    /// Never fails: model errors, an open breaker and unparseable answers all
    /// degrade to the keyword scorer.
    pub async fn analyze(&self, text: &str) -> Sentiment {
        let Some(model) = &self.model else {
            Metrics::sentiment_fallback();
            return keyword_sentiment(text);
        };

        let messages = [ChatMessage::system(SENTIMENT_PROMPT), ChatMessage::user(text)];
        match self.guarded.call(|| model.chat(&messages)).await {
            Ok(answer) => match parse_verdict(&answer) {
                Some(sentiment) => {
                    debug!(score = sentiment.score, label = %sentiment.label, "Sentiment scored by model");
                    sentiment
                }
                None => {
                    warn!(answer = %answer, "Unparseable sentiment answer, using keyword fallback");
                    Metrics::sentiment_fallback();
                    keyword_sentiment(text)
                }
            },
            Err(err) => {
                warn!(error = %err, "Sentiment model unavailable, using keyword fallback");
                Metrics::sentiment_fallback();
                keyword_sentiment(text)
            }
        }
    }
}

/// Accepts bare JSON, JSON wrapped in a code fence, or JSON embedded in prose.
fn parse_verdict(answer: &str) -> Option<Sentiment> {
    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&answer[start..=end]).ok()?;
    let verdict: ModelVerdict = serde_json::from_value(value).ok()?;
    if !verdict.score.is_finite() {
        return None;
    }

    let score = verdict.score.clamp(-1.0, 1.0);
    let label = verdict
        .label
        .and_then(|label| label.trim().to_lowercase().parse().ok())
        .unwrap_or_else(|| label_for_score(score));
    Some(Sentiment {
        score,
        label,
        source: SentimentSource::Model,
    })
}


#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::testing::ScriptedModel;
    use super::*;
    use crate::config::DependencyPolicy;
    use crate::gateway::GatewayError;

    fn guarded() -> Guarded {
        Guarded::new(
            "deepseek",
            &DependencyPolicy {
                failure_threshold: 2,
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 1,
                jitter: false,
                ..Default::default()
            },
        )
    }

    #[test_case(r#"{"score": -0.8, "label": "negative"}"#, -0.8, SentimentLabel::Negative)]
    #[test_case("```json\n{\"score\": 0.6, \"label\": \"Positive\"}\n```", 0.6, SentimentLabel::Positive)]
    #[test_case(r#"Sure! {"score": 0.05}"#, 0.05, SentimentLabel::Neutral)]
    #[test_case(r#"{"score": -4, "label": "sad"}"#, -1.0, SentimentLabel::Negative)]
    fn parses_model_answers(answer: &str, score: f64, label: SentimentLabel) {
        let sentiment = parse_verdict(answer).expect("parsed");
        assert!((sentiment.score - score).abs() < 1e-9);
        assert_eq!(sentiment.label, label);
        assert_eq!(sentiment.source, SentimentSource::Model);
    }

    #[test_case("I am not sure")]
    #[test_case(r#"{"label": "negative"}"#)]
    #[test_case("} nope {")]
    fn rejects_unusable_answers(answer: &str) {
        assert!(parse_verdict(answer).is_none());
    }

    #[tokio::test]
    async fn model_answer_is_used() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(
            r#"{"score": -0.7, "label": "negative"}"#.to_string(),
        )]));
        let analyzer = SentimentAnalyzer::new(Some(model.clone()), guarded());

        let sentiment = analyzer.analyze("The AC is broken").await;
        assert_eq!(sentiment.source, SentimentSource::Model);
        assert_eq!(sentiment.label, SentimentLabel::Negative);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn outage_falls_back_to_keywords() {
        let model = Arc::new(ScriptedModel::new(vec![Err(GatewayError::Timeout)]));
        let analyzer = SentimentAnalyzer::new(Some(model.clone()), guarded());

        let sentiment = analyzer.analyze("The room is dirty and awful").await;
        assert_eq!(sentiment.source, SentimentSource::Fallback);
        assert_eq!(sentiment.label, SentimentLabel::Negative);
        assert_eq!(model.calls(), 2);

        // The breaker is now open, so the model is not called again.
        let again = analyzer.analyze("Thank you, great stay").await;
        assert_eq!(again.source, SentimentSource::Fallback);
        assert_eq!(again.label, SentimentLabel::Positive);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn no_model_uses_keywords() {
        let analyzer = SentimentAnalyzer::new(None, guarded());
        let sentiment = analyzer.analyze("Everything is perfect, thank you").await;
        assert_eq!(sentiment.source, SentimentSource::Fallback);
        assert_eq!(sentiment.label, SentimentLabel::Positive);
    }
}
