use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use gatewarden_core::embed::{Embedder, HashingEmbedder};
use gatewarden_core::redact::{PatternCatalog, Redactor};
use gatewarden_core::retrieve::PolicyPoint;
use gatewarden_server::auth::TokenSigner;
use gatewarden_server::config::{AppConfig, LogFormat};
use gatewarden_server::metrics::Metrics;
use gatewarden_server::policy::{HttpPolicyAdapter, LocalPolicy};
use gatewarden_server::rest::{self, AppState};
use gatewarden_server::service::GatewayService;
use gatewarden_storage::{GatewayStore, InMemoryStore};

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    match config.log.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .init();
        }
    }
}

fn load_catalog(config: &AppConfig) -> Result<PatternCatalog, Box<dyn std::error::Error>> {
    match &config.redaction_patterns_path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)?;
            Ok(PatternCatalog::from_toml(&contents)?)
        }
        None => Ok(PatternCatalog::builtin()?),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    let config = AppConfig::load(config_path.as_deref())?;
    init_logging(&config);

    // A malformed pattern catalog refuses startup rather than serving
    // unredacted text.
    let catalog = load_catalog(&config)?;
    tracing::info!(patterns = catalog.len(), "redaction catalog loaded");

    if !config.store_url.starts_with("memory://") {
        return Err("unsupported store_url scheme: only memory:// is available".into());
    }
    let store = Arc::new(InMemoryStore::new());

    let signer = TokenSigner::new(&config.token_signing_key);
    let redactor = Redactor::new(catalog);
    let metrics = Arc::new(Metrics::new());
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(config.embedding_dim));

    tracing::info!(
        rest_addr = %config.rest_addr(),
        tenant = %config.tenant,
        "starting gatewarden"
    );

    if config.policy_engine_url.is_empty() {
        tracing::info!("no policy engine configured, using the built-in clearance policy");
        let policy = Arc::new(LocalPolicy::new());
        serve(&config, store, policy, embedder, signer, redactor, metrics).await
    } else {
        let policy = Arc::new(HttpPolicyAdapter::new(
            config.policy_engine_url.clone(),
            config.policy_timeout(),
        )?);
        serve(&config, store, policy, embedder, signer, redactor, metrics).await
    }
}

async fn serve<S, P>(
    config: &AppConfig,
    store: Arc<S>,
    policy: Arc<P>,
    embedder: Arc<dyn Embedder>,
    signer: TokenSigner,
    redactor: Redactor,
    metrics: Arc<Metrics>,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    let service = Arc::new(GatewayService::new(
        store,
        policy,
        embedder,
        signer,
        redactor,
        metrics,
        config.to_gateway_config(),
    ));

    let router = rest::create_router(AppState { service });

    let rest_addr: std::net::SocketAddr = config.rest_addr().parse()?;
    let listener = tokio::net::TcpListener::bind(rest_addr).await?;
    tracing::info!(%rest_addr, "REST server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => { tracing::info!("received SIGINT"); }
        _ = sigterm.recv() => { tracing::info!("received SIGTERM"); }
    }
}
