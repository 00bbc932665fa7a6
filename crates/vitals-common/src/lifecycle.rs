//! Start/stop orchestration for long-running components.
//!
//! A [`Supervisor`] starts its components in registration order, waits for an
//! interrupt, a termination signal, or cancellation of its root token, then
//! stops them in reverse order.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    /// Spawns the component's work and returns once it is running. The token
    /// is the supervisor's root: background tasks exit when it is cancelled
    /// and may cancel it to bring the whole process down.
    async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()>;

    /// Releases resources after the root token has been cancelled.
    async fn stop(&self) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct Supervisor {
    components: Vec<Arc<dyn Component>>,
    root: CancellationToken,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supervisor driven by an externally owned token instead of OS signals
    /// alone.
    pub fn with_token(root: CancellationToken) -> Self {
        Self {
            components: Vec::new(),
            root,
        }
    }

    pub fn add(&mut self, component: Arc<dyn Component>) -> &mut Self {
        self.components.push(component);
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Runs until shutdown. A component that fails to start stops the ones
    /// already running and the error is returned.
    pub async fn run(self) -> anyhow::Result<()> {
        let started = match self.start_all().await {
            Ok(()) => self.components.len(),
            Err((started, err)) => {
                self.root.cancel();
                self.stop_first(started).await;
                return Err(err);
            }
        };

        tokio::select! {
            _ = shutdown_signal() => tracing::info!("shutdown signal received"),
            _ = self.root.cancelled() => tracing::info!("shutdown requested"),
        }
        self.root.cancel();
        self.stop_first(started).await;
        tracing::info!("all components stopped");
        Ok(())
    }

    async fn start_all(&self) -> Result<(), (usize, anyhow::Error)> {
        for (i, component) in self.components.iter().enumerate() {
            let span = tracing::info_span!("component", component = component.name());
            let result = component
                .start(self.root.clone())
                .instrument(span.clone())
                .await;
            match result {
                Ok(()) => span.in_scope(|| tracing::info!("started")),
                Err(err) => {
                    span.in_scope(|| tracing::error!(error = %err, "failed to start"));
                    return Err((i, err.context(format!("start {}", component.name()))));
                }
            }
        }
        Ok(())
    }

    async fn stop_first(&self, count: usize) {
        for component in self.components[..count].iter().rev() {
            let span = tracing::info_span!("component", component = component.name());
            match component.stop().instrument(span.clone()).await {
                Ok(()) => span.in_scope(|| tracing::info!("stopped")),
                Err(err) => span.in_scope(|| tracing::error!(error = %err, "failed to stop cleanly")),
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Probe {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    }

    impl Probe {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                log: log.clone(),
                fail_start: false,
            })
        }

        fn failing(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                log: log.clone(),
                fail_start: true,
            })
        }
    }

    #[async_trait]
    impl Component for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self, _shutdown: CancellationToken) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("boom");
            }
            self.log.lock().unwrap().push(format!("start {}", self.name));
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn stops_in_reverse_order_on_cancel() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut sup = Supervisor::new();
        sup.add(Probe::new("storage", &log)).add(Probe::new("http", &log));
        let token = sup.token();
        let handle = tokio::spawn(sup.run());
        tokio::task::yield_now().await;
        token.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start storage", "start http", "stop http", "stop storage"]
        );
    }

    #[tokio::test]
    async fn failed_start_unwinds_started_components() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        let mut sup = Supervisor::with_token(token.clone());
        sup.add(Probe::new("storage", &log))
            .add(Probe::failing("http", &log))
            .add(Probe::new("grpc", &log));
        let err = sup.run().await.unwrap_err();
        assert!(format!("{err:#}").contains("start http"));
        assert!(token.is_cancelled());
        assert_eq!(*log.lock().unwrap(), vec!["start storage", "stop storage"]);
    }
}
