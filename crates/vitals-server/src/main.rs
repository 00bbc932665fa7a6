use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vitals_common::lifecycle::Supervisor;
use vitals_server::app::build_http_app;
use vitals_server::config::{Cli, ServerConfig};
use vitals_server::grpc::MetricServiceImpl;
use vitals_server::server::{GrpcServer, HttpServer};
use vitals_server::service::MetricService;
use vitals_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::resolve(Cli::parse())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("vitals={}", config.log_level).parse()?),
        )
        .init();

    tracing::info!(
        address = %config.address,
        grpc = config.grpc_address.as_deref().unwrap_or("-"),
        backend = if config.database_dsn.is_some() { "database" } else { "memory" },
        store_interval_secs = config.store_interval_secs,
        restore = config.restore,
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        trusted_subnet = config.trusted_subnet.as_deref().unwrap_or("-"),
        "vitals-server starting"
    );

    let security = vitals_server::security_from_config(&config)?;
    let backend = vitals_storage::open(&config.storage_config()).await?;
    let state = AppState::new(Arc::new(MetricService::new(backend.storage.clone())), security);

    let mut supervisor = Supervisor::new();
    supervisor
        .add(backend.component.clone())
        .add(Arc::new(HttpServer::new(&config.address, build_http_app(state.clone()))));
    if let Some(addr) = &config.grpc_address {
        supervisor.add(Arc::new(GrpcServer::new(addr, MetricServiceImpl::new(state))));
    }
    supervisor.run().await?;

    tracing::info!("vitals-server stopped");
    Ok(())
}
