use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vitals_agent::config::{AgentConfig, Cli};
use vitals_agent::transport::{GrpcTransport, HttpTransport, Transport};
use vitals_agent::worker::Pipeline;
use vitals_agent::Reporter;
use vitals_collector::alloc::CountingAllocator;
use vitals_collector::host::HostCollector;
use vitals_collector::runtime::RuntimeCollector;
use vitals_collector::synthetic::Synthetic;
use vitals_collector::ProviderSet;
use vitals_common::cipher::Encrypter;
use vitals_common::lifecycle::Supervisor;
use vitals_common::sign::Signer;

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator;

fn outbound_ip() -> Option<String> {
    match local_ip_address::local_ip() {
        Ok(ip) => Some(ip.to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "could not determine outbound IP, X-Real-IP will not be sent");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::resolve(Cli::parse())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("vitals={}", config.log_level).parse()?),
        )
        .init();

    tracing::info!(
        address = %config.address,
        grpc = config.grpc_address.as_deref().unwrap_or("-"),
        poll_interval_secs = config.poll_interval_secs,
        report_interval_secs = config.report_interval_secs,
        rate_limit = config.rate_limit,
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        "vitals-agent starting"
    );

    let transport: Arc<dyn Transport> = match &config.grpc_address {
        Some(addr) => Arc::new(GrpcTransport::new(addr)?),
        None => Arc::new(HttpTransport::new(&config.address)?),
    };
    let encrypter = config
        .crypto_key
        .as_deref()
        .map(|path| Encrypter::from_file(path).with_context(|| format!("load public key {}", path.display())))
        .transpose()?;
    let signer = config.key.as_deref().and_then(|k| Signer::new(k.as_bytes()));
    let pipeline = Pipeline::new(transport)
        .with_signer(signer)
        .with_encrypter(encrypter)
        .with_real_ip(outbound_ip());

    let providers = Arc::new(
        ProviderSet::new(config.poll_interval())
            .with(RuntimeCollector::new()?)
            .with(HostCollector::new())
            .with(Synthetic::new()),
    );
    let reporter = Reporter::new(providers.clone(), config.report_interval(), config.rate_limit, pipeline);

    let mut supervisor = Supervisor::new();
    supervisor.add(providers).add(Arc::new(reporter));
    supervisor.run().await?;

    tracing::info!("vitals-agent stopped");
    Ok(())
}
