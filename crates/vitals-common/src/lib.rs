//! Shared building blocks for the vitals agent and server: the metric model
//! and its validator, payload cipher and HMAC signer, gzip codec, pooled
//! scratch objects, the retry helper and the lifecycle supervisor.

pub mod cipher;
pub mod codec;
pub mod lifecycle;
pub mod pool;
pub mod retry;
pub mod sign;
pub mod types;
pub mod validate;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("vitals");
}

/// Header (and gRPC metadata key) carrying the hex HMAC-SHA-256 of the payload.
pub const HASH_HEADER: &str = "HashSHA256";

/// Header (and gRPC metadata key) carrying the agent's outbound IP.
pub const REAL_IP_HEADER: &str = "X-Real-IP";
