use crate::config::{CredentialRef, ProviderConfig};
use keyring::Entry;
use reqwest::header::HeaderMap;
use reqwest::Proxy;
use std::env;
use std::time::Duration;

/// Raw reply from a backend, before any adapter interpretation.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
    /// Parsed `retry-after` (seconds form only).
    pub retry_after_ms: Option<u64>,
    pub upstream_request_id: Option<String>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Shared reqwest transport for one provider.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    credential: CredentialRef,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("credential", &self.credential)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: &ProviderConfig) -> Result<Self, TransportError> {
        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .or_else(|| {
                env::var("PROMPT_KERNEL_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
            })
            .unwrap_or(Duration::from_secs(30));

        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(config.max_concurrency.max(1))
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Ok(proxy_url) = env::var("PROMPT_KERNEL_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credential: config.credential.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve the credential handle now. `Ok(None)` for `CredentialRef::None`.
    pub fn resolve_credential(&self) -> Result<Option<String>, TransportError> {
        match &self.credential {
            CredentialRef::None => Ok(None),
            CredentialRef::Env(name) => env::var(name)
                .map(Some)
                .map_err(|_| TransportError::MissingCredential(format!("env:{}", name))),
            CredentialRef::Keyring { service, account } => Entry::new(service, account)
                .and_then(|entry| entry.get_password())
                .map(Some)
                .map_err(|e| {
                    TransportError::MissingCredential(format!(
                        "keyring:{}/{} ({})",
                        service, account, e
                    ))
                }),
        }
    }

    pub async fn post_json(
        &self,
        path: &str,
        headers: &[(String, String)],
        body: &serde_json::Value,
        client_request_id: &str,
    ) -> Result<HttpReply, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.post(&url).json(body);
        for (k, v) in headers {
            req = req.header(k.as_str(), v.as_str());
        }
        // Our own correlation id; providers may ignore it.
        req = req.header("x-prompt-kernel-request-id", client_request_id);

        let resp = req.send().await.map_err(TransportError::from_reqwest)?;
        let status = resp.status().as_u16();
        let retry_after_ms = retry_after_ms(resp.headers());
        let upstream_request_id = header_first(
            resp.headers(),
            &["x-request-id", "request-id", "x-amzn-requestid", "cf-ray"],
        );
        let body = resp.text().await.map_err(TransportError::from_reqwest)?;

        Ok(HttpReply {
            status,
            body,
            retry_after_ms,
            upstream_request_id,
        })
    }
}

fn header_first(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    for name in names {
        if let Some(v) = headers.get(*name) {
            if let Ok(s) = v.to_str() {
                let s = s.trim();
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            }
        }
    }
    None
}

/// Best-effort parsing of `Retry-After`; only the `<seconds>` form is supported.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let raw = header_first(headers, &["retry-after"])?;
    let secs: u64 = raw.parse().ok()?;
    Some(secs.saturating_mul(1000))
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("credential unavailable: {0}")]
    MissingCredential(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else {
            TransportError::Http(e)
        }
    }
}
