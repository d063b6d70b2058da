pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod ledger;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

use anyhow::Context;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::cache::CacheService;
use crate::config::{Config, StoreBackend};
use crate::services::{
    EventCatalog, ExpiryScheduler, HttpDispatcher, HttpPaymentGateway, LogDispatcher,
    NotificationDispatcher, PaymentGateway, PaymentWebhookProcessor, SeatReservationService,
};
use crate::store::{BookingStore, MemoryStore, PgStore};

// Shared state для всего приложения
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn BookingStore>,
    pub reservations: SeatReservationService,
    pub scheduler: ExpiryScheduler,
    pub webhooks: PaymentWebhookProcessor,
    pub catalog: EventCatalog,
}

impl AppState {
    /// Wires the services around already-constructed collaborators.
    /// The gateway and dispatcher are shared by every service that needs them.
    pub fn build(
        config: Config,
        store: Arc<dyn BookingStore>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        cache: Option<CacheService>,
    ) -> Arc<Self> {
        let scheduler = ExpiryScheduler::new(store.clone(), cache.clone());
        let reservations = SeatReservationService::new(
            store.clone(),
            gateway.clone(),
            scheduler.clone(),
            config.booking.clone(),
            &config.payment,
        )
        .with_cache(cache);
        let webhooks = PaymentWebhookProcessor::new(store.clone(), gateway, dispatcher.clone());
        let catalog = EventCatalog::new(store.clone(), dispatcher);

        Arc::new(Self {
            config,
            store,
            reservations,
            scheduler,
            webhooks,
            catalog,
        })
    }

    /// Подключается к хранилищу, Redis и внешним сервисам согласно конфигу.
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let store: Arc<dyn BookingStore> = match config.database.backend {
            StoreBackend::Postgres => {
                let url = config
                    .database
                    .url
                    .as_deref()
                    .context("DATABASE_URL must be set for the postgres store")?;
                let db = database::Database::new(url, config.database.pool_size)
                    .await
                    .context("Failed to connect to database")?;
                info!("Database connected");
                db.run_migrations().await.context("Failed to run migrations")?;
                Arc::new(PgStore::new(db))
            }
            StoreBackend::Memory => {
                warn!("Using in-memory store: bookings will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        // Redis необязателен: без него снимки зала просто не кешируются
        let cache = match &config.redis.url {
            Some(url) => match redis_client::RedisClient::new(url).await {
                Ok(redis) => {
                    info!("Redis connected");
                    Some(CacheService::new(redis, config.redis.snapshot_ttl_seconds))
                }
                Err(e) => {
                    warn!("Redis unavailable, seat snapshot cache disabled: {}", e);
                    None
                }
            },
            None => None,
        };

        let gateway = Arc::new(
            HttpPaymentGateway::from_config(&config.payment, &config.circuit_breaker)
                .context("Failed to build payment gateway client")?,
        );
        let dispatcher: Arc<dyn NotificationDispatcher> = match &config.notifications.webhook_url {
            Some(url) => Arc::new(
                HttpDispatcher::new(url.clone()).context("Failed to build notification client")?,
            ),
            None => Arc::new(LogDispatcher),
        };

        Ok(Self::build(config, store, gateway, dispatcher, cache))
    }
}

/// Full HTTP surface: health probes plus everything under `/api`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Booking Engine API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
