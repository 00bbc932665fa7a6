//! Outbound delivery of prepared metric chunks.

mod grpc;
mod http;

pub use grpc::GrpcTransport;
pub use http::HttpTransport;

use async_trait::async_trait;
use vitals_common::cipher::CryptoError;
use vitals_common::types::Metric;

/// A chunk ready for the wire: serialized, compressed and possibly
/// encrypted, with the signature of the serialized form.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub body: Vec<u8>,
    pub hash: Option<String>,
    pub real_ip: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("encode chunk: {0}")]
    Encode(String),
    #[error("compress chunk: {0}")]
    Compress(#[from] std::io::Error),
    #[error("encrypt chunk: {0}")]
    Crypto(#[from] CryptoError),
    #[error("http request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rpc: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("invalid metadata value: {0}")]
    Metadata(String),
    #[error("delivery cancelled")]
    Cancelled,
    #[error("worker task failed: {0}")]
    Worker(String),
}

/// How chunks are serialized and delivered.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Serialized form that gets signed and compressed. JSON by default.
    fn encode(&self, metrics: &[Metric]) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(metrics).map_err(|e| TransportError::Encode(e.to_string()))
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;
}
