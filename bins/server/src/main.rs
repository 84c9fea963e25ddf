//! SkillSwap credit ledger server.
//!
//! Serves the HTTP API and runs the expiration sweeper in the background.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sea_orm_migration::MigratorTrait;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skillswap_api::{AppState, create_router};
use skillswap_core::credits::{CreditService, InMemoryLedgerStore, SharedLedgerStore};
use skillswap_db::{PgLedgerStore, connect, migration::Migrator};
use skillswap_shared::AppConfig;
use skillswap_shared::config::LedgerBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skillswap=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;

    let store = open_store(&config).await?;
    let credits = CreditService::new(store, &config.ledger, config.credits.clone());

    let shutdown = CancellationToken::new();
    let sweeper_handle = if config.sweeper.enabled {
        let sweeper = Arc::new(credits.sweeper(&config.sweeper));
        info!(
            interval_secs = config.sweeper.interval_secs,
            batch_size = config.sweeper.batch_size,
            "expiration sweeper started"
        );
        Some(sweeper.spawn(
            Duration::from_secs(config.sweeper.interval_secs.max(1)),
            shutdown.clone(),
        ))
    } else {
        warn!("expiration sweeper disabled");
        None
    };

    let app = create_router(AppState {
        credits: Arc::new(credits),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = sweeper_handle {
        handle.await.context("sweeper task panicked")?;
    }

    Ok(())
}

async fn open_store(config: &AppConfig) -> anyhow::Result<SharedLedgerStore> {
    match config.ledger.backend {
        LedgerBackend::Memory => {
            warn!("using in-memory ledger store; balances are lost on restart");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        LedgerBackend::Postgres => {
            let db = connect(&config.database.url, config.database.max_connections)
                .await
                .context("failed to connect to database")?;
            info!("Connected to database");

            if config.database.run_migrations {
                Migrator::up(&db, None).await.context("migrations failed")?;
                info!("migrations applied");
            }
            Ok(Arc::new(PgLedgerStore::new(db)))
        }
    }
}
