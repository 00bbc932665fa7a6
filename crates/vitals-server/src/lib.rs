//! vitals server: accepts metric updates over HTTP and gRPC, stores them in
//! memory or in a relational database, and serves them back.

pub mod api;
pub mod app;
pub mod config;
pub mod grpc;
pub mod logging;
pub mod middleware;
pub mod server;
pub mod service;
pub mod state;

use anyhow::Context;
use config::ServerConfig;
use state::Security;
use vitals_common::cipher::Decrypter;
use vitals_common::codec::Gzipper;
use vitals_common::sign::Signer;

/// Loads the key material named by the config.
pub fn security_from_config(config: &ServerConfig) -> anyhow::Result<Security> {
    let decrypter = config
        .crypto_key
        .as_deref()
        .map(|path| Decrypter::from_file(path).with_context(|| format!("load private key {}", path.display())))
        .transpose()?;
    Ok(Security {
        signer: config.key.as_deref().and_then(|k| Signer::new(k.as_bytes())),
        decrypter,
        trusted_subnet: config.trusted_net()?,
        gzip: Gzipper::default(),
    })
}
