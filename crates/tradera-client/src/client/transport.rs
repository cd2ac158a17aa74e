//! SOAP-over-HTTP transport.
//!
//! The transport moves prebuilt envelopes and maps HTTP outcomes onto
//! [`ClientError`]. It does no rate limiting, retrying or caching; those are
//! applied around it by the [`super::Dispatcher`].

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use super::Service;
use crate::config::{Config, api};
use crate::error::{ClientError, ClientResult};

static FAULT_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:\w+:)?faultcode[^>]*>(.*?)</(?:\w+:)?faultcode>").expect("valid regex")
});
static FAULT_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:\w+:)?faultstring[^>]*>(.*?)</(?:\w+:)?faultstring>")
        .expect("valid regex")
});
static FAULT_DETAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:\w+:)?detail[^>]*>(.*?)</(?:\w+:)?detail>").expect("valid regex")
});

/// One SOAP call, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapRequest {
    /// Full endpoint URL.
    pub endpoint: String,
    /// SOAP action name, without namespace.
    pub action: String,
    /// Complete XML envelope.
    pub envelope: String,
}

impl SoapRequest {
    /// Value of the `SOAPAction` header.
    #[must_use]
    pub fn soap_action(&self) -> String {
        format!("\"{}/{}\"", api::NAMESPACE, self.action)
    }
}

/// Sends SOAP envelopes and returns the raw response body.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ClientError`] for transport failures and
    /// non-success responses.
    async fn send(&self, request: &SoapRequest) -> ClientResult<String>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build an HTTP transport with the timeouts from `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .build()
            .map_err(|e| ClientError::network("build HTTP client", e))?;

        Ok(Self { client, timeout: config.request_timeout })
    }

    fn map_send_error(&self, action: &str, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else {
            ClientError::network(action, err)
        }
    }

    async fn handle_response(
        &self,
        request: &SoapRequest,
        response: reqwest::Response,
    ) -> ClientResult<String> {
        let status = response.status();

        if status.is_success() {
            return response.text().await.map_err(|e| self.map_send_error(&request.action, e));
        }

        match status.as_u16() {
            429 => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok());

                Err(ClientError::rate_limited(retry_after))
            }
            404 => Err(ClientError::not_found(request.endpoint.clone())),
            500..=599 => {
                let text = response.text().await.unwrap_or_default();
                let status = status.as_u16();
                Err(parse_fault(&text).unwrap_or_else(|| ClientError::server(status, text)))
            }
            _ => {
                let text = response.text().await.unwrap_or_default();
                Err(ClientError::UnexpectedStatus { status: status.as_u16(), message: text })
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &SoapRequest) -> ClientResult<String> {
        tracing::trace!(endpoint = %request.endpoint, action = %request.action, "SOAP request");

        let response = self
            .client
            .post(&request.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", request.soap_action())
            .body(request.envelope.clone())
            .send()
            .await
            .map_err(|e| self.map_send_error(&request.action, e))?;

        self.handle_response(request, response).await
    }
}

/// Extract a SOAP 1.1 fault from a response body.
///
/// Returns `None` unless both `faultcode` and `faultstring` are present.
#[must_use]
pub fn parse_fault(body: &str) -> Option<ClientError> {
    let capture = |re: &Regex| re.captures(body).map(|c| c[1].trim().to_string());

    let code = capture(&FAULT_CODE)?;
    let message = capture(&FAULT_STRING)?;
    let detail = capture(&FAULT_DETAIL).filter(|d| !d.is_empty());

    Some(ClientError::SoapFault { code, message, detail })
}

/// Generate a cache key for a service call.
///
/// Parameter order matters; callers pass them in a fixed order.
#[must_use]
pub fn cache_key(service: Service, action: &str, params: &[(&str, &str)]) -> String {
    use md5::{Digest, Md5};

    let mut hasher = Md5::new();
    hasher.update(service.name().as_bytes());
    hasher.update(b"|");
    hasher.update(action.as_bytes());
    hasher.update(b"|");

    for (k, v) in params {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"&");
    }

    format!("{:x}", hasher.finalize())
}
