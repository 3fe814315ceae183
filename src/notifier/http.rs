//! Mail API transport.
//!
//! Posts each message as JSON to an HTTP endpoint, authenticated with a
//! bearer token. Uses the blocking client: fault reporting runs inside panic
//! hooks and at shutdown, where no async runtime can be relied on. Do not
//! construct or use this transport from inside an async runtime thread.

use std::time::Duration;

use tracing::debug;

use super::{DeliveryError, MailMessage, MailTransport};

/// Delivers messages through an HTTP mail API.
#[derive(Debug)]
pub struct HttpMailTransport {
    client: reqwest::blocking::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpMailTransport {
    /// Create a transport posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, endpoint, token))
    }

    /// Create a transport using a preconfigured client.
    pub fn with_client(
        client: reqwest::blocking::Client,
        endpoint: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token,
        }
    }

    /// Endpoint messages are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl MailTransport for HttpMailTransport {
    fn send(&self, message: &MailMessage) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.endpoint).json(message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(endpoint = %self.endpoint, status = status.as_u16(), "mail API accepted message");
        Ok(())
    }
}
