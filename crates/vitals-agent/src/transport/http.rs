use super::{Envelope, Transport, TransportError};
use async_trait::async_trait;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use std::time::Duration;
use vitals_common::{HASH_HEADER, REAL_IP_HEADER};

/// POSTs JSON batches to `/updates/`.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(address: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let base = if address.contains("://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Ok(Self {
            client,
            url: format!("{base}/updates/"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(ACCEPT_ENCODING, "gzip")
            .body(envelope.body);
        if let Some(hash) = envelope.hash {
            request = request.header(HASH_HEADER, hash);
        }
        if let Some(ip) = envelope.real_ip {
            request = request.header(REAL_IP_HEADER, ip);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_updates_url() {
        assert_eq!(HttpTransport::new("localhost:8080").unwrap().url(), "http://localhost:8080/updates/");
        assert_eq!(
            HttpTransport::new("https://metrics.example/").unwrap().url(),
            "https://metrics.example/updates/"
        );
    }
}
