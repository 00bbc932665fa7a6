use super::{Envelope, Transport, TransportError};
use async_trait::async_trait;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use vitals_common::codec::encode_batch;
use vitals_common::proto::metric_service_client::MetricServiceClient;
use vitals_common::proto::BatchUpdateRequest;
use vitals_common::types::Metric;

/// Sends length-delimited protobuf batches through `BatchUpdate`.
///
/// The channel connects lazily and reconnects on its own, so a server that
/// is down at start only fails individual reports.
pub struct GrpcTransport {
    client: MetricServiceClient<Channel>,
}

impl GrpcTransport {
    pub fn new(address: &str) -> Result<Self, TransportError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| TransportError::Encode(format!("invalid gRPC address {address:?}: {e}")))?;
        Ok(Self {
            client: MetricServiceClient::new(endpoint.connect_lazy()),
        })
    }
}

fn metadata(value: &str) -> Result<MetadataValue<tonic::metadata::Ascii>, TransportError> {
    value
        .parse()
        .map_err(|_| TransportError::Metadata(value.to_string()))
}

#[async_trait]
impl Transport for GrpcTransport {
    fn encode(&self, metrics: &[Metric]) -> Result<Vec<u8>, TransportError> {
        Ok(encode_batch(metrics))
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let mut request = tonic::Request::new(BatchUpdateRequest {
            metrics: envelope.body,
        });
        if let Some(hash) = &envelope.hash {
            request.metadata_mut().insert("hashsha256", metadata(hash)?);
        }
        if let Some(ip) = &envelope.real_ip {
            request.metadata_mut().insert("x-real-ip", metadata(ip)?);
        }
        let response = self.client.clone().batch_update(request).await?;
        tracing::debug!(updated = response.into_inner().updated, "batch accepted");
        Ok(())
    }
}
