//! Application entry point.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use payment_reconciler::api::create_router;
use payment_reconciler::app::{AppState, ReconcilerService};
use payment_reconciler::infra::{
    Environment, NotificationService, PostgresClient, PostgresConfig, PushClient, PushConfig,
    SignatureValidator, SigningKeys, SolanaRpcClient, DEFAULT_LOOKUP_DELAY,
};

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    environment: Environment,
    /// Shared secret required on chainhook deliveries (optional)
    chainhook_secret: Option<String>,
    /// Solana RPC endpoint for signature-detail lookups (optional)
    solana_rpc_url: Option<String>,
    /// Delay between sequential Solana detail lookups
    solana_lookup_delay: Duration,
    /// Push gateway endpoint (optional - in-app notifications only if unset)
    push_gateway_url: Option<String>,
    push_api_key: Option<SecretString>,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let environment = Environment::from_env();

        let chainhook_secret = env::var("CHAINHOOK_SECRET").ok().filter(|s| !s.is_empty());
        let solana_rpc_url = env::var("SOLANA_RPC_URL").ok().filter(|u| !u.is_empty());

        let solana_lookup_delay = env::var("SOLANA_LOOKUP_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_LOOKUP_DELAY);

        let push_gateway_url = env::var("PUSH_GATEWAY_URL").ok().filter(|u| !u.is_empty());
        let push_api_key = env::var("PUSH_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from);

        Ok(Self {
            database_url,
            host,
            port,
            environment,
            chainhook_secret,
            solana_rpc_url,
            solana_lookup_delay,
            push_gateway_url,
            push_api_key,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("🏗️  Payment Reconciler v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("📦 Initializing infrastructure...");

    let db_config = PostgresConfig::default();
    let postgres_client = Arc::new(PostgresClient::new(&config.database_url, db_config).await?);
    postgres_client.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");

    let signing_keys = SigningKeys::from_env();
    let validator = Arc::new(SignatureValidator::new(signing_keys, config.environment));
    if config.environment == Environment::Production {
        info!("   ✓ Signature validation in production mode (missing keys reject)");
    } else {
        warn!("   ⚠ Signature validation in development mode (missing keys accept unverified)");
    }

    let push = match &config.push_gateway_url {
        Some(gateway_url) => {
            info!("   ✓ Push gateway configured");
            Some(PushClient::new(PushConfig {
                gateway_url: gateway_url.clone(),
                api_key: config.push_api_key.clone(),
            })?)
        }
        None => {
            info!("   ○ Push gateway not configured (in-app notifications only)");
            None
        }
    };
    let notifier = Arc::new(NotificationService::new(postgres_client.clone(), push));

    let mut service = ReconcilerService::new(
        postgres_client.clone(),
        postgres_client.clone(),
        postgres_client.clone(),
        notifier,
    );

    match &config.solana_rpc_url {
        Some(rpc_url) => {
            service = service.with_solana_rpc(
                Arc::new(SolanaRpcClient::new(rpc_url)?),
                config.solana_lookup_delay,
            );
            info!("   ✓ Solana RPC detail lookups enabled");
        }
        None => {
            info!("   ○ Solana RPC not configured (notices without balance data are skipped)");
        }
    }

    if config.chainhook_secret.is_some() {
        info!("   ✓ Chainhook shared secret configured");
    } else {
        info!("   ○ Chainhook shared secret not configured (chainhook auth disabled)");
    }

    let state = AppState::new(
        Arc::new(service),
        validator,
        config.chainhook_secret.clone(),
    );

    let router = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server starting on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);
    info!("📄 OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
