//! Delivery of occurrence payloads to the remote endpoint.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use url::Url;

use relato_common::{Error, OccurrencePayload, Result};

/// Bounded deadline for a single send attempt.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(4500);

/// Transport for delivering one occurrence submission.
///
/// Implementations must map every failure mode to an error: a submit that
/// returns `Ok(())` means the server accepted the occurrence.
#[async_trait]
pub trait SubmissionTransport: Send + Sync {
    /// Deliver the payload.
    ///
    /// # Errors
    /// - [`Error::Timeout`] when the attempt exceeds its deadline
    /// - [`Error::Http`] for a non-2xx response
    /// - [`Error::Network`] for transport failures
    async fn submit(&self, payload: &OccurrencePayload) -> Result<()>;
}

/// HTTP transport POSTing JSON to the occurrences endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    bearer_token: Option<String>,
}

impl HttpTransport {
    /// Create a transport for the given base URL (e.g. `http://localhost:8080`).
    ///
    /// The underlying client enforces [`SEND_TIMEOUT`] so an attempt is never
    /// left pending indefinitely.
    pub fn new(base_url: &Url, bearer_token: Option<String>) -> Result<Self> {
        let endpoint = base_url
            .join("api/occurrences")
            .map_err(|e| Error::InvalidInput(format!("invalid endpoint URL: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            bearer_token,
        })
    }

    fn map_send_error(e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Network(e.to_string())
        }
    }
}

#[async_trait]
impl SubmissionTransport for HttpTransport {
    async fn submit(&self, payload: &OccurrencePayload) -> Result<()> {
        debug!("POST {} ({:?})", self.endpoint, payload.category);

        let mut request = self.client.post(self.endpoint.clone()).json(payload);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(status.as_u16()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_is_joined_onto_base() {
        let base = Url::parse("http://localhost:8080").unwrap();
        let transport = HttpTransport::new(&base, None).unwrap();
        assert_eq!(
            transport.endpoint.as_str(),
            "http://localhost:8080/api/occurrences"
        );
    }

    #[test]
    fn test_send_timeout_is_four_and_a_half_seconds() {
        assert_eq!(SEND_TIMEOUT, Duration::from_millis(4500));
    }
}
