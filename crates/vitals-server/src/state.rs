use crate::service::{BatchUpdater, HealthChecker, MetricService, PageRenderer, Reader, Updater};
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use vitals_common::cipher::Decrypter;
use vitals_common::codec::Gzipper;
use vitals_common::sign::Signer;

/// Payload protection shared by the HTTP middleware and the gRPC service.
/// Unset members switch the corresponding check off.
#[derive(Default)]
pub struct Security {
    pub signer: Option<Signer>,
    pub decrypter: Option<Decrypter>,
    pub trusted_subnet: Option<IpNet>,
    pub gzip: Gzipper,
}

impl Security {
    /// True when no subnet is configured or `ip` parses into it.
    pub fn is_trusted(&self, ip: Option<&str>) -> bool {
        let Some(net) = &self.trusted_subnet else {
            return true;
        };
        ip.and_then(|s| s.trim().parse::<IpAddr>().ok())
            .is_some_and(|addr| net.contains(&addr))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub updater: Arc<dyn Updater>,
    pub reader: Arc<dyn Reader>,
    pub batch: Arc<dyn BatchUpdater>,
    pub health: Arc<dyn HealthChecker>,
    pub pages: Arc<dyn PageRenderer>,
    pub security: Arc<Security>,
}

impl AppState {
    pub fn new(service: Arc<MetricService>, security: Security) -> Self {
        Self {
            updater: service.clone(),
            reader: service.clone(),
            batch: service.clone(),
            health: service.clone(),
            pages: service,
            security: Arc::new(security),
        }
    }
}
