use actix_cors::Cors;
use actix_web::{http::Method, middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use payment_engine::{
    config::Config,
    daraja_client::{DarajaClient, GatewayEndpoints},
    handlers::{self, AppState},
    landlord_config::LandlordConfigManager,
    metrics,
    reconciliation::ReconciliationEngine,
    store::{InMemoryLedgerStore, LedgerStore, PgLedgerStore},
};
use security::CredentialVault;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const IN_MEMORY_DATABASE_URL: &str = "memory://";

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));

    if config.log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true)
            .init();
    }
}

fn build_cors(config: &Config) -> Cors {
    if config.server.cors_allowed_origins.is_empty() {
        return Cors::permissive();
    }

    config
        .server
        .cors_allowed_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin.trim()))
        .allowed_methods(vec![Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_any_header()
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!(
        "🚀 Starting Payment Engine on {}:{} ({})",
        config.server.host, config.server.port, config.environment
    );

    metrics::register_metrics(&metrics::REGISTRY).context("Failed to register metrics")?;

    let vault = Arc::new(
        CredentialVault::from_secret(config.security.credential_encryption_key.as_bytes())
            .context("Failed to initialise credential vault")?,
    );

    let store: Arc<dyn LedgerStore> = if config.database.url == IN_MEMORY_DATABASE_URL {
        warn!("Using in-memory ledger; payments will not survive a restart");
        Arc::new(InMemoryLedgerStore::new())
    } else {
        let pg = PgLedgerStore::connect(
            &config.database.url,
            config.database.max_connections,
            config.acquire_timeout(),
        )
        .await
        .context("Failed to connect to database")?;

        if config.database.run_migrations {
            info!("Running database migrations");
            pg.run_migrations().await.context("Failed to run migrations")?;
        }

        Arc::new(pg)
    };

    let gateway = Arc::new(
        DarajaClient::new(
            GatewayEndpoints {
                sandbox: config.mpesa.sandbox_base_url.clone(),
                production: config.mpesa.production_base_url.clone(),
            },
            config.gateway_timeout(),
        )
        .context("Failed to build gateway client")?,
    );

    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        config.confirmation_deadline(),
    ));
    let config_manager = Arc::new(LandlordConfigManager::new(
        store,
        vault,
        gateway,
        config.registration_deadline(),
    ));

    let state = web::Data::new(AppState {
        engine,
        config_manager,
        callback_base_url: config.callback_base_url(),
    });

    let server_config = config.clone();
    let jwt_secret = config.security.jwt_secret.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&server_config))
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(state.clone())
            .configure(|cfg| handlers::configure_routes(cfg, &jwt_secret))
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}
