use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use memento_careservice::{
    app_state, bootstrap,
    clock::{Clock, SystemClock},
    config, db,
    notify::{self, NotificationQueue},
    routes, shutdown,
    store::{MemoryStore, PgStore},
};
use tower_http::trace::TraceLayer;

/// Migrations embedded into the binary which helps with streamlining image building process
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_env();
    bootstrap::init_tracing();
    let config = config::load()?;

    let (router, mut openapi) = routes::routes_with_openapi().split_for_parts();
    openapi.info = utoipa::openapi::InfoBuilder::new()
        .title("Memento CareService API")
        .version("1.0.0")
        .build();
    let swagger_ui = bootstrap::create_swagger_ui(openapi);

    let sender = notify::sender_from_config(&config.push)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (queue, jobs) = NotificationQueue::channel();

    let services = match &config.database.url {
        Some(url) => {
            tracing::info!("Running migrations...");
            let migrations_count = db::run_migrations_blocking(MIGRATIONS, url).await?;
            tracing::info!("Run {} new migrations successfully", migrations_count);

            let pool = db::connect(url, &config.database).await?;
            app_state::wire(Arc::new(PgStore::new(pool)), sender, clock, queue, &config)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, running on the in-memory store");
            app_state::wire(Arc::new(MemoryStore::new()), sender, clock, queue, &config)
        }
    };

    tracing::info!("Bootstrapping...");
    let (trigger, shutdown) = shutdown::channel();
    let dispatcher = tokio::spawn(notify::run_dispatcher(
        services.fanout.clone(),
        jobs,
        shutdown.clone(),
    ));
    let sweeper = tokio::spawn(
        services
            .sweeper
            .clone()
            .run(config.sweep.interval, shutdown),
    );

    let app = Router::new()
        .merge(router)
        .merge(swagger_ui)
        .layer(TraceLayer::new_for_http())
        .with_state(services.state);

    bootstrap::serve("CareService", app, config.server.port, trigger).await?;

    let (dispatcher, sweeper) = tokio::join!(dispatcher, sweeper);
    if let Err(err) = dispatcher.and(sweeper) {
        tracing::error!("Background task ended abnormally: {}", err);
    }
    Ok(())
}
