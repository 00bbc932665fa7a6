//! Listener components for the supervisor.

use crate::grpc::MetricServiceImpl;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as TonicServer;
use vitals_common::lifecycle::Component;
use vitals_common::proto::metric_service_server::MetricServiceServer;

/// How long `stop` waits for in-flight HTTP requests.
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn put<T>(slot: &Mutex<Option<T>>, value: T) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
}

pub struct HttpServer {
    address: String,
    router: Mutex<Option<Router>>,
    local_addr: OnceLock<SocketAddr>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpServer {
    pub fn new(address: impl Into<String>, router: Router) -> Self {
        Self {
            address: address.into(),
            router: Mutex::new(Some(router)),
            local_addr: OnceLock::new(),
            task: Mutex::new(None),
        }
    }

    /// Bound address, known once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }
}

#[async_trait]
impl Component for HttpServer {
    fn name(&self) -> &str {
        "http-server"
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let router = take(&self.router).context("http server already started")?;
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("bind {}", self.address))?;
        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);
        tracing::info!(%addr, "HTTP server listening");

        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "HTTP server failed");
                shutdown.cancel();
            }
        });
        put(&self.task, task);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(mut task) = take(&self.task) else {
            return Ok(());
        };
        if tokio::time::timeout(HTTP_DRAIN_TIMEOUT, &mut task).await.is_err() {
            tracing::warn!(
                timeout_secs = HTTP_DRAIN_TIMEOUT.as_secs(),
                "HTTP connections still open, aborting"
            );
            task.abort();
        }
        Ok(())
    }
}

pub struct GrpcServer {
    address: String,
    service: Mutex<Option<MetricServiceImpl>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GrpcServer {
    pub fn new(address: impl Into<String>, service: MetricServiceImpl) -> Self {
        Self {
            address: address.into(),
            service: Mutex::new(Some(service)),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Component for GrpcServer {
    fn name(&self) -> &str {
        "grpc-server"
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let service = take(&self.service).context("gRPC server already started")?;
        let addr = tokio::net::lookup_host(&self.address)
            .await
            .with_context(|| format!("resolve {}", self.address))?
            .next()
            .with_context(|| format!("{} resolves to no address", self.address))?;
        tracing::info!(%addr, "gRPC server listening");

        let task = tokio::spawn(async move {
            let served = TonicServer::builder()
                .add_service(MetricServiceServer::new(service))
                .serve_with_shutdown(addr, shutdown.clone().cancelled_owned())
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "gRPC server failed");
                shutdown.cancel();
            }
        });
        put(&self.task, task);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(task) = take(&self.task) {
            task.await?;
        }
        Ok(())
    }
}
