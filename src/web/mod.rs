use std::sync::Arc;

use anyhow::Result;
use salvo::affix_state;
use salvo::prelude::*;
use secrecy::SecretString;
use tracing::info;

use crate::bot::BotCore;
use crate::config::ServerConfig;
use crate::db::DatabaseManager;
use crate::resilience::HealthChecker;

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;

use self::error::ApiError;
use self::handlers::{
    conversations, dead_letters, guests, health, hotels, notifications, triggers, webhooks,
};
use self::middleware::auth::BearerAuth;

/// Shared state injected into every request.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseManager,
    pub bot: BotCore,
    pub health: Arc<HealthChecker>,
}

pub fn app_state(depot: &Depot) -> Result<&AppState, ApiError> {
    depot
        .obtain::<AppState>()
        .map_err(|_| ApiError::Internal("application state is not injected".to_string()))
}

pub fn create_router(
    state: AppState,
    secret_key: Option<SecretString>,
    webhook_token: Option<SecretString>,
) -> Router {
    let admin = Router::with_path("api/v1")
        .hoop(BearerAuth::required(secret_key))
        .push(
            Router::with_path("hotels")
                .get(hotels::list_hotels)
                .post(hotels::create_hotel)
                .push(
                    Router::with_path("{hotel_id}")
                        .get(hotels::get_hotel)
                        .put(hotels::update_hotel)
                        .delete(hotels::deactivate_hotel)
                        .push(
                            Router::with_path("guests")
                                .get(guests::list_guests)
                                .post(guests::create_guest)
                                .push(
                                    Router::with_path("{guest_id}")
                                        .get(guests::get_guest)
                                        .put(guests::update_guest)
                                        .push(
                                            Router::with_path("conversations")
                                                .get(conversations::list_for_guest),
                                        ),
                                ),
                        )
                        .push(
                            Router::with_path("conversations")
                                .get(conversations::list_for_hotel),
                        )
                        .push(
                            Router::with_path("triggers")
                                .get(triggers::list_triggers)
                                .post(triggers::create_trigger)
                                .push(
                                    Router::with_path("{trigger_id}")
                                        .get(triggers::get_trigger)
                                        .put(triggers::update_trigger)
                                        .delete(triggers::delete_trigger),
                                ),
                        )
                        .push(
                            Router::with_path("notifications")
                                .get(notifications::list_notifications)
                                .push(
                                    Router::with_path("{notification_id}/acknowledge")
                                        .post(notifications::acknowledge),
                                ),
                        ),
                ),
        )
        .push(
            Router::with_path("dead-letters")
                .get(dead_letters::list_dead_letters)
                .push(
                    Router::with_path("{id}")
                        .get(dead_letters::get_dead_letter)
                        .delete(dead_letters::delete_dead_letter)
                        .push(Router::with_path("replay").post(dead_letters::replay)),
                ),
        );

    Router::new()
        .hoop(affix_state::inject(state))
        .push(
            Router::with_path("health")
                .get(health::readiness)
                .push(Router::with_path("live").get(health::liveness))
                .push(Router::with_path("ready").get(health::readiness))
                .push(Router::with_path("detailed").get(health::detailed)),
        )
        .push(Router::with_path("metrics").get(metrics::metrics_endpoint))
        .push(
            Router::with_path("api/v1/webhooks/green-api")
                .hoop(BearerAuth::optional(webhook_token))
                .post(webhooks::green_api),
        )
        .push(admin)
}

pub struct WebServer {
    bind_addr: String,
    router: Router,
}

impl WebServer {
    pub fn new(
        config: &ServerConfig,
        state: AppState,
        webhook_token: Option<SecretString>,
    ) -> Self {
        Self {
            bind_addr: format!("{}:{}", config.bind_address, config.port),
            router: create_router(state, config.secret_key.clone(), webhook_token),
        }
    }

    pub async fn start(self) -> Result<()> {
        info!("Starting web server on {}", self.bind_addr);

        let acceptor = TcpListener::new(self.bind_addr).bind().await;
        Server::new(acceptor).serve(self.router).await;

        Ok(())
    }
}
