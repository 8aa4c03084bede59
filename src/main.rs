//! quotagate: per-user quota gateway.
//!
//! Usage: `quotagate [config.toml]`. Without a path the development defaults
//! are used.

use std::path::Path;

use quotagate::admin::ConfigApi;
use quotagate::config::GatewayConfig;
use quotagate::decision::DecisionEngine;
use quotagate::quota::{self, QuotaStore};
use quotagate::rate_limit::spawn_evictor;
use quotagate::server::{self, Forwarder, GatewayOptions};
use quotagate::telemetry::LogSink;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quotagate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting quotagate v{}", env!("CARGO_PKG_VERSION"));

    let config = if let Some(config_path) = std::env::args().nth(1) {
        info!("Loading configuration from {}", config_path);
        GatewayConfig::from_file(Path::new(&config_path))?
    } else {
        info!("No config file specified, using development defaults");
        GatewayConfig::development()
    };
    let config = config.with_env_overrides();
    config.validate()?;

    let engine = DecisionEngine::in_memory_with(config.limiter.algorithm).with_sink(LogSink);
    for seed in &config.users {
        let (limit, per) = quota::validate(&seed.user_id, seed.quota_limit, &seed.limit_per)?;
        engine.quotas().set(&seed.user_id, limit, per)?;
        info!(user_id = %seed.user_id, quota_limit = limit, limit_per = %per, "seeded quota");
    }

    let evictor = spawn_evictor(
        engine.windows().clone(),
        engine.clock(),
        engine.sink().clone(),
        config.limiter.eviction_interval(),
        config.limiter.idle_ttl(),
    );

    let options = GatewayOptions {
        identity: config.limiter.identity(),
        forwarder: config.server.upstream.as_deref().map(Forwarder::new),
        max_upload_bytes: config.server.max_upload_bytes,
    };
    match &config.server.upstream {
        Some(upstream) => info!("Forwarding admitted uploads to {}", upstream),
        None => info!("No upstream configured, uploads are acknowledged locally"),
    }

    let router = server::router(ConfigApi::new(engine), options);
    let listener = TcpListener::bind(&config.server.listen_addr).await?;
    server::run(listener, router).await?;

    evictor.abort();
    info!("quotagate stopped");
    Ok(())
}
