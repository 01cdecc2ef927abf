use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::dispatcher::Dispatcher;
use super::triggers::{TriggerRule, parse_rule, trigger_job};
use crate::config::SchedulerConfig;
use crate::db::{DatabaseError, DatabaseManager, Hotel, TriggerType};
use crate::web::metrics::Metrics;

const HOTEL_PAGE: i64 = 100;

/// Periodically fires time-based triggers. Each trigger fires at most once per
/// guest: the execution row is claimed before the message is queued.
pub struct TriggerScheduler {
    db: DatabaseManager,
    dispatcher: Dispatcher,
    interval: Duration,
    grace: chrono::Duration,
}

impl TriggerScheduler {
    pub fn new(config: &SchedulerConfig, db: DatabaseManager, dispatcher: Dispatcher) -> Self {
        Self {
            db,
            dispatcher,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            grace: chrono::Duration::minutes(config.grace_minutes.max(0)),
        }
    }

    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Trigger scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.run_once(Utc::now()).await {
                Ok(0) => debug!("Scheduler tick, nothing due"),
                Ok(fired) => info!(fired, "Scheduled triggers fired"),
                Err(err) => error!(error = %err, "Scheduler tick failed"),
            }
        }
    }

    /// Evaluates every active hotel once and returns how many messages were queued.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let mut fired = 0;
        let mut offset = 0;
        loop {
            let hotels = self
                .db
                .hotel_store()
                .list_hotels(true, HOTEL_PAGE, offset)
                .await?;
            for hotel in &hotels {
                match self.run_hotel(hotel, now).await {
                    Ok(count) => fired += count,
                    Err(err) => warn!(hotel_id = hotel.id, error = %err, "Skipping hotel this tick"),
                }
            }
            if (hotels.len() as i64) < HOTEL_PAGE {
                break;
            }
            offset += HOTEL_PAGE;
        }
        Ok(fired)
    }

    async fn run_hotel(&self, hotel: &Hotel, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        if hotel.green_api_instance().is_none() {
            return Ok(0);
        }
        let triggers = self
            .db
            .trigger_store()
            .list_active_by_type(hotel.id, TriggerType::TimeBased)
            .await?;
        if triggers.is_empty() {
            return Ok(0);
        }
        let guests = self
            .db
            .guest_store()
            .list_guests_with_stay_dates(hotel.id)
            .await?;

        let mut fired = 0;
        for trigger in &triggers {
            let rule = match parse_rule(trigger.trigger_type, &trigger.conditions) {
                Ok(TriggerRule::Time(rule)) => rule,
                Ok(_) => continue,
                Err(err) => {
                    warn!(trigger_id = trigger.id, error = %err, "Skipping trigger with invalid conditions");
                    continue;
                }
            };
            for guest in guests.iter().filter(|g| rule.is_due(g, now, self.grace)) {
                let claimed = self
                    .db
                    .trigger_store()
                    .record_execution(hotel.id, trigger.id, guest.id)
                    .await?;
                if !claimed {
                    continue;
                }
                Metrics::trigger_fired();
                fired += 1;
                debug!(trigger_id = trigger.id, guest_id = guest.id, "Time-based trigger fired");
                if let Err(err) = self
                    .dispatcher
                    .enqueue(trigger_job(trigger, hotel, guest))
                    .await
                {
                    warn!(trigger_id = trigger.id, guest_id = guest.id, error = %err, "Trigger message not queued");
                }
            }
        }
        Ok(fired)
    }
}
