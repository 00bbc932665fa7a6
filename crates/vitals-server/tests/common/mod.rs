#![allow(dead_code)]

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, HeaderMap, Request, StatusCode};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use tower::util::ServiceExt;
use vitals_common::cipher::Encrypter;
use vitals_common::codec::Gzipper;
use vitals_common::sign::Signer;
use vitals_server::app;
use vitals_server::config::ServerConfig;
use vitals_server::service::MetricService;
use vitals_server::state::AppState;
use vitals_storage::memory::MemStorage;
use vitals_storage::Storage;

pub const KEY: &str = "shared-secret";

#[derive(Default)]
pub struct Options {
    pub key: bool,
    pub encrypted: bool,
    pub trusted_subnet: Option<&'static str>,
}

pub struct TestContext {
    pub temp_dir: TempDir,
    pub storage: Arc<dyn Storage>,
    pub state: AppState,
    pub app: axum::Router,
}

fn test_key() -> &'static RsaPrivateKey {
    static KEY_PAIR: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY_PAIR.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

/// Encrypter for the key pair the test server decrypts with.
pub fn encrypter() -> Encrypter {
    let pem = test_key().to_public_key().to_public_key_pem(LineEnding::LF).unwrap();
    Encrypter::from_pem(pem.as_bytes()).unwrap()
}

pub fn signer() -> Signer {
    Signer::new(KEY.as_bytes()).unwrap()
}

pub fn build_test_context(options: Options) -> TestContext {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig {
        trusted_subnet: options.trusted_subnet.map(str::to_string),
        ..ServerConfig::default()
    };
    if options.key {
        config.key = Some(KEY.to_string());
    }
    if options.encrypted {
        let path = temp_dir.path().join("private.pem");
        std::fs::write(&path, test_key().to_pkcs1_pem(LineEnding::LF).unwrap().as_bytes()).unwrap();
        config.crypto_key = Some(path);
    }

    let security = vitals_server::security_from_config(&config).unwrap();
    let storage: Arc<dyn Storage> = Arc::new(MemStorage::ephemeral());
    let state = AppState::new(Arc::new(MetricService::new(storage.clone())), security);
    let app = app::build_http_app(state.clone());
    TestContext {
        temp_dir,
        storage,
        state,
        app,
    }
}

pub async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

pub async fn post_json(app: &axum::Router, uri: &str, body: &str) -> (StatusCode, String) {
    let req = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, _, body) = send(app, req).await;
    (status, String::from_utf8_lossy(&body).into_owned())
}

pub async fn post(app: &axum::Router, uri: &str) -> (StatusCode, String) {
    let req = Request::post(uri).body(Body::empty()).unwrap();
    let (status, _, body) = send(app, req).await;
    (status, String::from_utf8_lossy(&body).into_owned())
}

pub async fn get(app: &axum::Router, uri: &str) -> (StatusCode, String) {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    let (status, _, body) = send(app, req).await;
    (status, String::from_utf8_lossy(&body).into_owned())
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    Gzipper::default().compress(data).unwrap()
}

pub fn gunzip(data: &[u8]) -> Vec<u8> {
    Gzipper::default().decompress(data).unwrap()
}
