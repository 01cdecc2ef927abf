use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::db::DatabaseManager;
use crate::deepseek::LanguageModel;
use crate::green_api::WhatsAppGateway;
use crate::resilience::{CircuitBreaker, DeadLetterQueue, Guarded};

pub mod dispatcher;
pub mod pipeline;
pub mod replies;
pub mod scheduler;
pub mod sentiment;
pub mod templates;
pub mod triggers;

use self::dispatcher::{Delivery, DispatchLoop, Dispatcher};
use self::pipeline::MessagePipeline;
use self::replies::ReplyGenerator;
use self::scheduler::TriggerScheduler;
use self::sentiment::SentimentAnalyzer;

/// Shared handles of the messaging service, cloned into the web layer.
#[derive(Clone)]
pub struct BotCore {
    pipeline: Arc<MessagePipeline>,
    dispatcher: Dispatcher,
    green_api: Guarded,
    deepseek: Guarded,
}

/// Background tasks started next to the HTTP server.
pub struct BotWorkers {
    dispatch: DispatchLoop,
    scheduler: Option<TriggerScheduler>,
}

impl BotCore {
    pub fn new(
        config: &Config,
        db: DatabaseManager,
        gateway: Arc<dyn WhatsAppGateway>,
        model: Option<Arc<dyn LanguageModel>>,
        dead_letters: Arc<dyn DeadLetterQueue>,
    ) -> (Self, BotWorkers) {
        let green_api = Guarded::new("green_api", &config.resilience.green_api);
        let deepseek = Guarded::new("deepseek", &config.resilience.deepseek);

        let delivery = Arc::new(Delivery::new(
            gateway,
            green_api.clone(),
            db.clone(),
            dead_letters,
        ));
        let (dispatcher, dispatch) = Dispatcher::new(&config.dispatcher, delivery);

        let pipeline = MessagePipeline::new(
            db.clone(),
            SentimentAnalyzer::new(model.clone(), deepseek.clone()),
            ReplyGenerator::new(model, deepseek.clone(), config.bot.fallback_reply.clone()),
            dispatcher.clone(),
            config.bot.clone(),
        );
        let scheduler = config
            .scheduler
            .enabled
            .then(|| TriggerScheduler::new(&config.scheduler, db, dispatcher.clone()));

        (
            Self {
                pipeline: Arc::new(pipeline),
                dispatcher,
                green_api,
                deepseek,
            },
            BotWorkers {
                dispatch,
                scheduler,
            },
        )
    }

    pub fn pipeline(&self) -> &MessagePipeline {
        &self.pipeline
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn breakers(&self) -> [Arc<CircuitBreaker>; 2] {
        [self.green_api.breaker.clone(), self.deepseek.breaker.clone()]
    }
}

impl BotWorkers {
    /// Runs until the dispatcher queue closes.
    pub async fn run(self) {
        match self.scheduler {
            Some(scheduler) => {
                tokio::select! {
                    _ = self.dispatch.run() => {}
                    _ = scheduler.run() => {}
                }
            }
            None => {
                info!("Trigger scheduler disabled");
                self.dispatch.run().await;
            }
        }
    }
}
