use crate::service::ServiceError;
use crate::state::AppState;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};
use vitals_common::codec::decode_batch;
use vitals_common::proto::metric_service_server::MetricService;
use vitals_common::proto::{BatchUpdateRequest, BatchUpdateResponse};
use vitals_common::types::Metric;

/// gRPC counterpart of `POST /updates/`. The payload runs through the same
/// checks as the HTTP chain: trusted subnet, decrypt, gunzip, HMAC.
pub struct MetricServiceImpl {
    state: AppState,
}

impl MetricServiceImpl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn unseal(&self, metadata: &MetadataMap, payload: Vec<u8>) -> Result<Vec<Metric>, Status> {
        let security = &self.state.security;

        let real_ip = metadata.get("x-real-ip").and_then(|v| v.to_str().ok());
        if !security.is_trusted(real_ip) {
            return Err(Status::permission_denied(format!(
                "address {} is not trusted",
                real_ip.unwrap_or("-")
            )));
        }

        let compressed = match &security.decrypter {
            Some(decrypter) => decrypter.decrypt(&payload).map_err(|e| {
                tracing::warn!(error = %e, "batch decryption failed");
                Status::invalid_argument("cannot decrypt payload")
            })?,
            None => payload,
        };
        let encoded = security
            .gzip
            .decompress(&compressed)
            .map_err(|e| Status::invalid_argument(format!("invalid gzip payload: {e}")))?;

        if let Some(signer) = &security.signer {
            let signature = metadata
                .get("hashsha256")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Status::unauthenticated("missing hashsha256 metadata"))?;
            signer
                .verify(&encoded, signature)
                .map_err(|e| Status::unauthenticated(format!("signature rejected: {e}")))?;
        }

        decode_batch(&encoded).map_err(|e| Status::invalid_argument(format!("malformed batch: {e}")))
    }
}

impl From<ServiceError> for Status {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(v) => Status::invalid_argument(v.to_string()),
            ServiceError::NotFound { .. } => Status::not_found(err.to_string()),
            ServiceError::Storage(e) => Status::internal(e.to_string()),
        }
    }
}

#[tonic::async_trait]
impl MetricService for MetricServiceImpl {
    async fn batch_update(
        &self,
        request: Request<BatchUpdateRequest>,
    ) -> Result<Response<BatchUpdateResponse>, Status> {
        let (metadata, _, body) = request.into_parts();
        let batch = self.unseal(&metadata, body.metrics)?;
        let updated = self.state.batch.batch_update(batch).await?;
        tracing::debug!(updated, "gRPC batch applied");
        Ok(Response::new(BatchUpdateResponse {
            updated: updated as i64,
        }))
    }
}
