use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::db::{
    DatabaseError, DatabaseManager, MessageDirection, NewConversation, NotificationStatus,
};
use crate::green_api::WhatsAppGateway;
use crate::resilience::{DeadLetter, DeadLetterError, DeadLetterQueue, Guarded};
use crate::web::metrics::Metrics;

/// Why a message is being sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOrigin {
    Reply,
    Trigger { trigger_id: i64 },
    StaffAlert { notification_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundJob {
    pub hotel_id: i64,
    /// Set when the recipient is a guest, so the sent message joins their
    /// conversation history.
    pub guest_id: Option<i64>,
    pub chat_id: String,
    pub message: String,
    pub origin: JobOrigin,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("outbound queue is full")]
    QueueFull,
    #[error("dispatcher is not running")]
    Closed,
    #[error(transparent)]
    DeadLetter(#[from] DeadLetterError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { message_id: String },
    DeadLettered { id: Uuid },
    /// The send failed and the dead letter queue was unreachable too.
    Lost,
}

/// Sends one job through the guarded Green API gateway and books the result.
pub struct Delivery {
    gateway: Arc<dyn WhatsAppGateway>,
    guarded: Guarded,
    db: DatabaseManager,
    dead_letters: Arc<dyn DeadLetterQueue>,
}

impl Delivery {
    pub fn new(
        gateway: Arc<dyn WhatsAppGateway>,
        guarded: Guarded,
        db: DatabaseManager,
        dead_letters: Arc<dyn DeadLetterQueue>,
    ) -> Self {
        Self {
            gateway,
            guarded,
            db,
            dead_letters,
        }
    }

    pub async fn deliver(&self, job: OutboundJob) -> DeliveryOutcome {
        let hotel = match self.db.hotel_store().get_hotel(job.hotel_id).await {
            Ok(Some(hotel)) => hotel,
            Ok(None) => return self.dead_letter(job, "hotel not found", 0).await,
            Err(err) => return self.dead_letter(job, &err.to_string(), 0).await,
        };
        let Some(instance) = hotel.green_api_instance() else {
            return self
                .dead_letter(job, "hotel has no Green API credentials", 0)
                .await;
        };

        let gateway = &*self.gateway;
        let result = self
            .guarded
            .call(|| gateway.send_message(&instance, &job.chat_id, &job.message))
            .await;

        match result {
            Ok(message_id) => {
                Metrics::outbound_sent();
                debug!(hotel_id = job.hotel_id, chat_id = %job.chat_id, %message_id, "Outbound message delivered");
                if let Err(err) = self.record_sent(&job, &message_id).await {
                    warn!(hotel_id = job.hotel_id, error = %err, "Delivered message could not be recorded");
                }
                DeliveryOutcome::Sent { message_id }
            }
            Err(err) => {
                Metrics::outbound_failed();
                warn!(
                    hotel_id = job.hotel_id,
                    chat_id = %job.chat_id,
                    attempts = err.attempts,
                    error = %err.error,
                    "Outbound message failed"
                );
                self.dead_letter(job, &err.error.to_string(), err.attempts)
                    .await
            }
        }
    }

    async fn record_sent(&self, job: &OutboundJob, message_id: &str) -> Result<(), DatabaseError> {
        if let Some(guest_id) = job.guest_id {
            let recorded = self
                .db
                .conversation_store()
                .record_message(
                    job.hotel_id,
                    &NewConversation {
                        guest_id,
                        message_id: Some(message_id.to_string()),
                        direction: MessageDirection::Outbound,
                        content: job.message.clone(),
                    },
                )
                .await;
            match recorded {
                Ok(_) | Err(DatabaseError::Conflict(_)) => {}
                Err(err) => return Err(err),
            }
        }

        if let JobOrigin::StaffAlert { notification_id } = job.origin {
            self.db
                .notification_store()
                .transition_notification(
                    job.hotel_id,
                    notification_id,
                    NotificationStatus::Pending,
                    NotificationStatus::Sent,
                )
                .await?;
        }
        Ok(())
    }

    async fn dead_letter(&self, job: OutboundJob, reason: &str, attempts: u32) -> DeliveryOutcome {
        let letter = DeadLetter::new(job, reason, attempts);
        match self.dead_letters.push(&letter).await {
            Ok(()) => {
                Metrics::dead_lettered();
                info!(id = %letter.id, hotel_id = letter.job.hotel_id, reason, "Job moved to dead letter queue");
                DeliveryOutcome::DeadLettered { id: letter.id }
            }
            Err(err) => {
                error!(
                    hotel_id = letter.job.hotel_id,
                    chat_id = %letter.job.chat_id,
                    error = %err,
                    "Dead letter queue unavailable, outbound message lost"
                );
                DeliveryOutcome::Lost
            }
        }
    }
}

/// Producer handle of the outbound queue. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::Sender<OutboundJob>,
    delivery: Arc<Delivery>,
}

impl Dispatcher {
    pub fn new(config: &DispatcherConfig, delivery: Arc<Delivery>) -> (Self, DispatchLoop) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let workers = config.concurrency.max(1);
        (
            Self {
                sender,
                delivery: delivery.clone(),
            },
            DispatchLoop {
                receiver,
                delivery,
                semaphore: Arc::new(Semaphore::new(workers)),
                workers,
            },
        )
    }

    /// Never blocks. A job that does not fit the queue is dead-lettered so it
    /// can be replayed later.
    pub async fn enqueue(&self, job: OutboundJob) -> Result<(), DispatchError> {
        match self.sender.try_send(job) {
            Ok(()) => {
                Metrics::set_dispatch_queue_depth(self.queue_depth() as u64);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(hotel_id = job.hotel_id, "Outbound queue full, dead-lettering job");
                self.delivery.dead_letter(job, "outbound queue full", 0).await;
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.delivery.dead_letter(job, "dispatcher stopped", 0).await;
                Err(DispatchError::Closed)
            }
        }
    }

    /// Removes a dead letter and queues its job again. `None` when the id is
    /// unknown.
    pub async fn replay(&self, id: Uuid) -> Result<Option<OutboundJob>, DispatchError> {
        let Some(letter) = self.delivery.dead_letters.remove(id).await? else {
            return Ok(None);
        };
        info!(%id, hotel_id = letter.job.hotel_id, "Replaying dead letter");
        self.enqueue(letter.job.clone()).await?;
        Ok(Some(letter.job))
    }

    pub fn dead_letters(&self) -> Arc<dyn DeadLetterQueue> {
        self.delivery.dead_letters.clone()
    }

    pub fn queue_depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

/// Consumer side: pulls jobs and runs up to `concurrency` deliveries at once.
pub struct DispatchLoop {
    receiver: mpsc::Receiver<OutboundJob>,
    delivery: Arc<Delivery>,
    semaphore: Arc<Semaphore>,
    workers: usize,
}

impl DispatchLoop {
    /// Returns once every [`Dispatcher`] handle is dropped and in-flight
    /// deliveries have finished.
    pub async fn run(mut self) {
        info!(workers = self.workers, "Outbound dispatcher started");
        while let Some(job) = self.receiver.recv().await {
            Metrics::set_dispatch_queue_depth(self.receiver.len() as u64);
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                break;
            };
            let delivery = self.delivery.clone();
            tokio::spawn(async move {
                delivery.deliver(job).await;
                drop(permit);
            });
        }

        let _ = self.semaphore.acquire_many(self.workers as u32).await;
        info!("Outbound dispatcher stopped");
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::FakeGateway;
    use super::*;
    use crate::config::DependencyPolicy;
    use crate::db::NewStaffNotification;
    use crate::db::testing::{seed_guest, seed_hotel, sqlite_manager};
    use crate::gateway::GatewayError;
    use crate::resilience::dead_letter::MemoryDeadLetterQueue;

    fn policy() -> DependencyPolicy {
        DependencyPolicy {
            failure_threshold: 10,
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 40,
            jitter: false,
            ..Default::default()
        }
    }

    fn delivery(
        gateway: Arc<FakeGateway>,
        db: DatabaseManager,
        queue: Arc<MemoryDeadLetterQueue>,
    ) -> Delivery {
        Delivery::new(gateway, Guarded::new("green_api", &policy()), db, queue)
    }

    fn job(hotel_id: i64, guest_id: Option<i64>, origin: JobOrigin) -> OutboundJob {
        OutboundJob {
            hotel_id,
            guest_id,
            chat_id: "79001112233@c.us".to_string(),
            message: "Welcome to the hotel!".to_string(),
            origin,
        }
    }

    #[tokio::test]
    async fn delivered_guest_message_joins_history() {
        let (db, _file) = sqlite_manager().await;
        let hotel = seed_hotel(&db, "+100", "1101").await;
        let guest = seed_guest(&db, hotel.id, "79001112233").await;
        let gateway = Arc::new(FakeGateway::default());
        let queue = Arc::new(MemoryDeadLetterQueue::new(10));
        let delivery = delivery(gateway.clone(), db.clone(), queue.clone());

        let outcome = delivery
            .deliver(job(hotel.id, Some(guest.id), JobOrigin::Trigger { trigger_id: 1 }))
            .await;

        assert!(matches!(outcome, DeliveryOutcome::Sent { .. }));
        assert_eq!(gateway.sent()[0].instance_id, "1101");
        let history = db
            .conversation_store()
            .list_for_guest(hotel.id, guest.id, 10)
            .await
            .expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].direction, MessageDirection::Outbound);
        assert_eq!(queue.len().await.expect("len"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_land_in_dead_letter_queue() {
        let (db, _file) = sqlite_manager().await;
        let hotel = seed_hotel(&db, "+100", "1101").await;
        let gateway = Arc::new(FakeGateway::failing(vec![
            GatewayError::Timeout,
            GatewayError::Connect("refused".into()),
            GatewayError::Status {
                status: 503,
                body: String::new(),
            },
        ]));
        let queue = Arc::new(MemoryDeadLetterQueue::new(10));
        let delivery = delivery(gateway.clone(), db.clone(), queue.clone());

        let outcome = delivery
            .deliver(job(hotel.id, None, JobOrigin::Reply))
            .await;

        let DeliveryOutcome::DeadLettered { id } = outcome else {
            panic!("expected a dead letter, got {outcome:?}");
        };
        assert_eq!(gateway.attempts(), 3);
        let letter = queue.get(id).await.expect("get").expect("stored");
        assert_eq!(letter.attempts, 3);
        assert_eq!(letter.job.origin, JobOrigin::Reply);
    }

    #[tokio::test]
    async fn non_transient_failure_is_not_retried() {
        let (db, _file) = sqlite_manager().await;
        let hotel = seed_hotel(&db, "+100", "1101").await;
        let gateway = Arc::new(FakeGateway::failing(vec![GatewayError::Status {
            status: 400,
            body: "bad chatId".into(),
        }]));
        let queue = Arc::new(MemoryDeadLetterQueue::new(10));
        let delivery = delivery(gateway.clone(), db.clone(), queue.clone());

        let outcome = delivery
            .deliver(job(hotel.id, None, JobOrigin::Reply))
            .await;
        assert!(matches!(outcome, DeliveryOutcome::DeadLettered { .. }));
        assert_eq!(gateway.attempts(), 1);
    }

    #[tokio::test]
    async fn staff_alert_marks_notification_sent() {
        let (db, _file) = sqlite_manager().await;
        let hotel = seed_hotel(&db, "+100", "1101").await;
        let notification = db
            .notification_store()
            .create_notification(
                hotel.id,
                &NewStaffNotification {
                    guest_id: None,
                    conversation_id: None,
                    notification_type: "negative_sentiment".into(),
                    message: "Guest is unhappy".into(),
                },
            )
            .await
            .expect("notification");
        let gateway = Arc::new(FakeGateway::default());
        let queue = Arc::new(MemoryDeadLetterQueue::new(10));
        let delivery = delivery(gateway, db.clone(), queue);

        delivery
            .deliver(job(
                hotel.id,
                None,
                JobOrigin::StaffAlert {
                    notification_id: notification.id,
                },
            ))
            .await;

        let stored = db
            .notification_store()
            .get_notification(hotel.id, notification.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(stored.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn hotel_without_credentials_is_dead_lettered() {
        let (db, _file) = sqlite_manager().await;
        let mut new_hotel = crate::db::testing::new_hotel("+100", "1101");
        new_hotel.green_api_token = None;
        let hotel = db.hotel_store().create_hotel(&new_hotel).await.expect("hotel");
        let gateway = Arc::new(FakeGateway::default());
        let queue = Arc::new(MemoryDeadLetterQueue::new(10));
        let delivery = delivery(gateway.clone(), db, queue);

        let outcome = delivery
            .deliver(job(hotel.id, None, JobOrigin::Reply))
            .await;
        assert!(matches!(outcome, DeliveryOutcome::DeadLettered { .. }));
        assert_eq!(gateway.attempts(), 0);
    }

    #[tokio::test]
    async fn queued_jobs_are_delivered_and_replay_requeues() {
        let (db, _file) = sqlite_manager().await;
        let hotel = seed_hotel(&db, "+100", "1101").await;
        let gateway = Arc::new(FakeGateway::default());
        let queue = Arc::new(MemoryDeadLetterQueue::new(10));
        let delivery = Arc::new(delivery(gateway.clone(), db, queue.clone()));
        let (dispatcher, worker) = Dispatcher::new(
            &DispatcherConfig {
                queue_capacity: 8,
                concurrency: 2,
            },
            delivery,
        );

        let letter = DeadLetter::new(job(hotel.id, None, JobOrigin::Reply), "timeout", 3);
        queue.push(&letter).await.expect("push");

        dispatcher
            .enqueue(job(hotel.id, None, JobOrigin::Reply))
            .await
            .expect("enqueue");
        let replayed = dispatcher.replay(letter.id).await.expect("replay");
        assert!(replayed.is_some());
        assert!(dispatcher.replay(letter.id).await.expect("replay").is_none());
        assert_eq!(queue.len().await.expect("len"), 0);

        drop(dispatcher);
        tokio::time::timeout(Duration::from_secs(5), worker.run())
            .await
            .expect("dispatcher drains");
        assert_eq!(gateway.sent().len(), 2);
    }

    #[tokio::test]
    async fn full_queue_dead_letters_the_job() {
        let (db, _file) = sqlite_manager().await;
        let hotel = seed_hotel(&db, "+100", "1101").await;
        let queue = Arc::new(MemoryDeadLetterQueue::new(10));
        let delivery = Arc::new(delivery(
            Arc::new(FakeGateway::default()),
            db,
            queue.clone(),
        ));
        let (dispatcher, _worker) = Dispatcher::new(
            &DispatcherConfig {
                queue_capacity: 1,
                concurrency: 1,
            },
            delivery,
        );

        dispatcher
            .enqueue(job(hotel.id, None, JobOrigin::Reply))
            .await
            .expect("first fits");
        assert_eq!(dispatcher.queue_depth(), 1);
        let err = dispatcher
            .enqueue(job(hotel.id, None, JobOrigin::Reply))
            .await
            .expect_err("second overflows");
        assert!(matches!(err, DispatchError::QueueFull));
        assert_eq!(queue.len().await.expect("len"), 1);
    }
}
