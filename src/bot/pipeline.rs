use serde::Serialize;
use tracing::{debug, info, warn};

use super::dispatcher::{Dispatcher, JobOrigin, OutboundJob};
use super::replies::ReplyGenerator;
use super::sentiment::{Sentiment, SentimentAnalyzer};
use super::triggers::{TriggerRule, parse_rule, trigger_job};
use crate::config::BotConfig;
use crate::db::{
    Conversation, DatabaseError, DatabaseManager, Guest, Hotel, MessageDirection,
    NOTIFICATION_NEGATIVE_SENTIMENT, NewConversation, NewGuest, NewStaffNotification, TriggerType,
};
use crate::green_api::{IncomingMessage, chat_id_for_phone};
use crate::web::metrics::Metrics;

#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    Processed(ProcessedMessage),
    /// The message id was already recorded.
    Duplicate,
    /// No hotel owns the Green API instance.
    UnknownInstance,
    HotelInactive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedMessage {
    pub hotel_id: i64,
    pub guest_id: i64,
    pub conversation_id: i64,
    pub sentiment: Sentiment,
    pub requires_attention: bool,
    pub notification_id: Option<i64>,
    pub trigger_id: Option<i64>,
    pub auto_replied: bool,
}

/// Handles one inbound guest message: persist, score, alert staff, then answer
/// with a matching trigger or a generated reply.
pub struct MessagePipeline {
    db: DatabaseManager,
    sentiment: SentimentAnalyzer,
    replies: ReplyGenerator,
    dispatcher: Dispatcher,
    config: BotConfig,
}

impl MessagePipeline {
    pub fn new(
        db: DatabaseManager,
        sentiment: SentimentAnalyzer,
        replies: ReplyGenerator,
        dispatcher: Dispatcher,
        config: BotConfig,
    ) -> Self {
        Self {
            db,
            sentiment,
            replies,
            dispatcher,
            config,
        }
    }

    pub async fn handle(&self, message: &IncomingMessage) -> Result<InboundOutcome, DatabaseError> {
        let Some(hotel) = self
            .db
            .hotel_store()
            .get_hotel_by_instance(&message.instance_id)
            .await?
        else {
            warn!(instance_id = %message.instance_id, "Webhook for unknown Green API instance");
            return Ok(InboundOutcome::UnknownInstance);
        };
        if !hotel.is_active {
            debug!(hotel_id = hotel.id, "Ignoring message for inactive hotel");
            return Ok(InboundOutcome::HotelInactive);
        }

        if self
            .db
            .conversation_store()
            .message_exists(&message.message_id)
            .await?
        {
            Metrics::inbound_duplicate();
            debug!(message_id = %message.message_id, "Duplicate inbound message");
            return Ok(InboundOutcome::Duplicate);
        }

        let guest = self.find_or_create_guest(&hotel, message).await?;
        let recorded = self
            .db
            .conversation_store()
            .record_message(
                hotel.id,
                &NewConversation {
                    guest_id: guest.id,
                    message_id: Some(message.message_id.clone()),
                    direction: MessageDirection::Inbound,
                    content: message.text.clone(),
                },
            )
            .await;
        let conversation = match recorded {
            Ok(conversation) => conversation,
            // Lost a race with a concurrent delivery of the same webhook.
            Err(DatabaseError::Conflict(_)) => {
                Metrics::inbound_duplicate();
                return Ok(InboundOutcome::Duplicate);
            }
            Err(err) => return Err(err),
        };
        self.db
            .guest_store()
            .touch_guest(hotel.id, guest.id, message.received_at)
            .await?;

        let sentiment = self.sentiment.analyze(&message.text).await;
        let requires_attention = sentiment.score <= self.config.negative_sentiment_threshold;
        self.db
            .conversation_store()
            .update_sentiment(
                hotel.id,
                conversation.id,
                sentiment.score,
                sentiment.label,
                requires_attention,
            )
            .await?;

        let notification_id = if requires_attention {
            Some(self.alert_staff(&hotel, &guest, &conversation).await?)
        } else {
            None
        };

        let trigger_id = self
            .fire_matching_trigger(&hotel, &guest, &message.text, &sentiment)
            .await?;
        let auto_replied = trigger_id.is_none() && self.auto_reply(&hotel, &guest).await?;

        Metrics::inbound_processed();
        info!(
            hotel_id = hotel.id,
            guest_id = guest.id,
            conversation_id = conversation.id,
            score = sentiment.score,
            label = %sentiment.label,
            requires_attention,
            "Inbound message processed"
        );

        Ok(InboundOutcome::Processed(ProcessedMessage {
            hotel_id: hotel.id,
            guest_id: guest.id,
            conversation_id: conversation.id,
            sentiment,
            requires_attention,
            notification_id,
            trigger_id,
            auto_replied,
        }))
    }

    async fn find_or_create_guest(
        &self,
        hotel: &Hotel,
        message: &IncomingMessage,
    ) -> Result<Guest, DatabaseError> {
        let store = self.db.guest_store();
        if let Some(guest) = store
            .get_guest_by_phone(hotel.id, &message.phone_number)
            .await?
        {
            return Ok(guest);
        }

        let new_guest = NewGuest::from_phone(&message.phone_number, message.sender_name.clone());
        match store.create_guest(hotel.id, &new_guest).await {
            Ok(guest) => {
                info!(hotel_id = hotel.id, guest_id = guest.id, "New guest registered from WhatsApp");
                Ok(guest)
            }
            Err(DatabaseError::Conflict(_)) => store
                .get_guest_by_phone(hotel.id, &message.phone_number)
                .await?
                .ok_or_else(|| DatabaseError::Query("guest vanished after conflict".to_string())),
            Err(err) => Err(err),
        }
    }

    async fn alert_staff(
        &self,
        hotel: &Hotel,
        guest: &Guest,
        conversation: &Conversation,
    ) -> Result<i64, DatabaseError> {
        let who = guest.name.as_deref().unwrap_or(&guest.phone_number);
        let room = guest
            .room_number
            .as_deref()
            .map(|room| format!(" (room {room})"))
            .unwrap_or_default();
        let notification = self
            .db
            .notification_store()
            .create_notification(
                hotel.id,
                &NewStaffNotification {
                    guest_id: Some(guest.id),
                    conversation_id: Some(conversation.id),
                    notification_type: NOTIFICATION_NEGATIVE_SENTIMENT.to_string(),
                    message: format!("{who}{room} needs attention: \"{}\"", conversation.content),
                },
            )
            .await?;
        info!(hotel_id = hotel.id, notification_id = notification.id, "Staff notification created");

        if let Some(staff_phone) = hotel.setting_str("staff_phone") {
            let job = OutboundJob {
                hotel_id: hotel.id,
                guest_id: None,
                chat_id: chat_id_for_phone(staff_phone),
                message: notification.message.clone(),
                origin: JobOrigin::StaffAlert {
                    notification_id: notification.id,
                },
            };
            if let Err(err) = self.dispatcher.enqueue(job).await {
                warn!(notification_id = notification.id, error = %err, "Staff alert not queued");
            }
        }
        Ok(notification.id)
    }

    /// Fires the highest-priority condition or sentiment trigger that matches,
    /// condition triggers first. At most one trigger answers a message.
    async fn fire_matching_trigger(
        &self,
        hotel: &Hotel,
        guest: &Guest,
        text: &str,
        sentiment: &Sentiment,
    ) -> Result<Option<i64>, DatabaseError> {
        for trigger_type in [TriggerType::ConditionBased, TriggerType::SentimentBased] {
            let triggers = self
                .db
                .trigger_store()
                .list_active_by_type(hotel.id, trigger_type)
                .await?;
            for trigger in &triggers {
                let matched = match parse_rule(trigger.trigger_type, &trigger.conditions) {
                    Ok(TriggerRule::Keywords(rule)) => rule.matches(text),
                    Ok(TriggerRule::Sentiment(rule)) => rule.matches(sentiment),
                    Ok(TriggerRule::Time(_)) => false,
                    Err(err) => {
                        warn!(trigger_id = trigger.id, error = %err, "Skipping trigger with invalid conditions");
                        false
                    }
                };
                if !matched {
                    continue;
                }
                Metrics::trigger_fired();
                debug!(trigger_id = trigger.id, guest_id = guest.id, "Trigger matched inbound message");
                if let Err(err) = self
                    .dispatcher
                    .enqueue(trigger_job(trigger, hotel, guest))
                    .await
                {
                    warn!(trigger_id = trigger.id, error = %err, "Trigger message not queued");
                }
                return Ok(Some(trigger.id));
            }
        }
        Ok(None)
    }

    async fn auto_reply(&self, hotel: &Hotel, guest: &Guest) -> Result<bool, DatabaseError> {
        let enabled = hotel
            .setting_bool("auto_reply")
            .unwrap_or(self.config.auto_reply);
        if !enabled {
            return Ok(false);
        }

        let history = self
            .db
            .conversation_store()
            .list_for_guest(hotel.id, guest.id, self.config.reply_context_messages.max(1))
            .await?;
        let reply = self.replies.generate(hotel, guest, &history).await;
        let job = OutboundJob {
            hotel_id: hotel.id,
            guest_id: Some(guest.id),
            chat_id: chat_id_for_phone(&guest.phone_number),
            message: reply.text,
            origin: JobOrigin::Reply,
        };
        if let Err(err) = self.dispatcher.enqueue(job).await {
            warn!(guest_id = guest.id, error = %err, "Reply not queued");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::bot::dispatcher::testing::FakeGateway;
    use crate::bot::dispatcher::{Delivery, DispatchLoop};
    use crate::bot::sentiment::SentimentSource;
    use crate::bot::sentiment::testing::ScriptedModel;
    use crate::config::{DependencyPolicy, DispatcherConfig};
    use crate::db::testing::{seed_hotel, sqlite_manager};
    use crate::db::{HotelUpdate, NewTrigger, NotificationStatus, SentimentLabel};
    use crate::deepseek::LanguageModel;
    use crate::gateway::GatewayError;
    use crate::resilience::Guarded;
    use crate::resilience::dead_letter::MemoryDeadLetterQueue;

    struct Harness {
        db: DatabaseManager,
        pipeline: MessagePipeline,
        dispatcher: Dispatcher,
        _worker: DispatchLoop,
        _file: tempfile::NamedTempFile,
    }

    async fn harness(model: Option<Arc<dyn LanguageModel>>, config: BotConfig) -> Harness {
        let (db, file) = sqlite_manager().await;
        let deepseek = Guarded::new(
            "deepseek",
            &DependencyPolicy {
                max_attempts: 1,
                ..Default::default()
            },
        );
        let delivery = Delivery::new(
            Arc::new(FakeGateway::default()),
            Guarded::new("green_api", &DependencyPolicy::default()),
            db.clone(),
            Arc::new(MemoryDeadLetterQueue::new(10)),
        );
        let (dispatcher, worker) = Dispatcher::new(
            &DispatcherConfig {
                queue_capacity: 16,
                concurrency: 1,
            },
            Arc::new(delivery),
        );
        let pipeline = MessagePipeline::new(
            db.clone(),
            SentimentAnalyzer::new(model.clone(), deepseek.clone()),
            ReplyGenerator::new(model, deepseek, config.fallback_reply.clone()),
            dispatcher.clone(),
            config,
        );
        Harness {
            db,
            pipeline,
            dispatcher,
            _worker: worker,
            _file: file,
        }
    }

    fn incoming(message_id: &str, text: &str) -> IncomingMessage {
        IncomingMessage {
            instance_id: "1101".into(),
            message_id: message_id.into(),
            chat_id: "79001112233@c.us".into(),
            phone_number: "79001112233".into(),
            sender_name: Some("Anna".into()),
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    fn processed(outcome: InboundOutcome) -> ProcessedMessage {
        match outcome {
            InboundOutcome::Processed(message) => message,
            other => panic!("expected processed message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_message_is_processed_once() {
        let h = harness(None, BotConfig::default()).await;
        let hotel = seed_hotel(&h.db, "+100", "1101").await;

        let first = processed(h.pipeline.handle(&incoming("m1", "Hello")).await.expect("first"));
        let second = h.pipeline.handle(&incoming("m1", "Hello")).await.expect("second");
        assert_eq!(second, InboundOutcome::Duplicate);

        let history = h
            .db
            .conversation_store()
            .list_for_guest(hotel.id, first.guest_id, 10)
            .await
            .expect("history");
        assert_eq!(history.len(), 1);
        let guest = h
            .db
            .guest_store()
            .get_guest(hotel.id, first.guest_id)
            .await
            .expect("get")
            .expect("guest");
        assert_eq!(guest.name.as_deref(), Some("Anna"));
        assert!(guest.last_interaction_at.is_some());
    }

    #[tokio::test]
    async fn negative_message_creates_pending_notification() {
        let model: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::new(vec![Ok(
            r#"{"score": -0.9, "label": "negative"}"#.into(),
        )]));
        let h = harness(Some(model), BotConfig::default()).await;
        let hotel = seed_hotel(&h.db, "+100", "1101").await;
        h.db.hotel_store()
            .update_hotel(
                hotel.id,
                &HotelUpdate {
                    settings: Some(json!({ "staff_phone": "+7 900 000-00-01" })),
                    ..Default::default()
                },
            )
            .await
            .expect("update");

        let result = processed(
            h.pipeline
                .handle(&incoming("m1", "The AC has been broken for two days"))
                .await
                .expect("handle"),
        );
        assert!(result.requires_attention);
        assert_eq!(result.sentiment.source, SentimentSource::Model);

        let pending = h
            .db
            .notification_store()
            .list_notifications(hotel.id, Some(NotificationStatus::Pending), 10)
            .await
            .expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(Some(pending[0].id), result.notification_id);
        assert_eq!(pending[0].conversation_id, Some(result.conversation_id));

        let flagged = h
            .db
            .conversation_store()
            .list_requiring_attention(hotel.id, 10)
            .await
            .expect("attention");
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].sentiment_label, Some(SentimentLabel::Negative));
        // The staff alert is queued.
        assert_eq!(h.dispatcher.queue_depth(), 1);
    }

    #[tokio::test]
    async fn model_outage_still_labels_message() {
        let model: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::new(vec![Err(
            GatewayError::Status {
                status: 500,
                body: "down".into(),
            },
        )]));
        let h = harness(Some(model), BotConfig::default()).await;
        seed_hotel(&h.db, "+100", "1101").await;

        let result = processed(
            h.pipeline
                .handle(&incoming("m1", "The room is dirty and the staff was rude"))
                .await
                .expect("handle"),
        );
        assert_eq!(result.sentiment.source, SentimentSource::Fallback);
        assert_eq!(result.sentiment.label, SentimentLabel::Negative);
        assert!(result.requires_attention);
    }

    #[tokio::test]
    async fn keyword_trigger_answers_instead_of_auto_reply() {
        let config = BotConfig {
            auto_reply: true,
            ..Default::default()
        };
        let h = harness(None, config).await;
        let hotel = seed_hotel(&h.db, "+100", "1101").await;
        let trigger = h
            .db
            .trigger_store()
            .create_trigger(
                hotel.id,
                &NewTrigger {
                    name: "Towels".into(),
                    trigger_type: TriggerType::ConditionBased,
                    conditions: json!({ "keywords": ["towel"] }),
                    message_template: "Fresh towels are on the way, {{ guest_name }}!".into(),
                    is_active: true,
                    priority: 1,
                },
            )
            .await
            .expect("trigger");

        let with_trigger = processed(
            h.pipeline
                .handle(&incoming("m1", "Could I get another towel?"))
                .await
                .expect("handle"),
        );
        assert_eq!(with_trigger.trigger_id, Some(trigger.id));
        assert!(!with_trigger.auto_replied);

        let plain = processed(
            h.pipeline
                .handle(&incoming("m2", "What time is breakfast?"))
                .await
                .expect("handle"),
        );
        assert_eq!(plain.trigger_id, None);
        assert!(plain.auto_replied);
        assert_eq!(h.dispatcher.queue_depth(), 2);
    }

    #[tokio::test]
    async fn unknown_and_inactive_hotels_are_skipped() {
        let h = harness(None, BotConfig::default()).await;
        assert_eq!(
            h.pipeline.handle(&incoming("m1", "Hi")).await.expect("handle"),
            InboundOutcome::UnknownInstance
        );

        let hotel = seed_hotel(&h.db, "+100", "1101").await;
        h.db.hotel_store()
            .deactivate_hotel(hotel.id)
            .await
            .expect("deactivate");
        assert_eq!(
            h.pipeline.handle(&incoming("m2", "Hi")).await.expect("handle"),
            InboundOutcome::HotelInactive
        );
    }
}
