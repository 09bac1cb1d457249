//! `reqwest` implementation of [`RemoteAuthority`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::remote::{Method, RemoteAuthority, RemoteError};
use crate::config::RemoteConfig;

/// Obtains a fresh bearer token after the remote rejected the current one.
#[async_trait]
pub trait CredentialRenewer: Send + Sync {
    async fn renew(&self) -> Result<String, RemoteError>;
}

/// Bearer-authenticated HTTP client for the remote collaboration service.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
    attempts: u32,
    renewer: Option<Arc<dyn CredentialRenewer>>,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
        attempts: u32,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(token),
            attempts: attempts.max(1),
            renewer: None,
        })
    }

    /// Build from the `[remote]` config section. `None` when no base URL is set.
    pub fn from_config(config: &RemoteConfig) -> Result<Option<Self>, RemoteError> {
        let Some(base_url) = config.base_url.as_deref() else {
            return Ok(None);
        };
        Self::new(
            base_url,
            config.token.clone(),
            Duration::from_secs(config.timeout_secs),
            config.request_attempts,
        )
        .map(Some)
    }

    #[must_use]
    pub fn with_renewer(mut self, renewer: Arc<dyn CredentialRenewer>) -> Self {
        self.renewer = Some(renewer);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn current_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_token(&self, token: String) {
        match self.token.write() {
            Ok(mut guard) => *guard = Some(token),
            Err(poisoned) => *poisoned.into_inner() = Some(token),
        }
    }

    async fn renew_credentials(&self) {
        let Some(renewer) = &self.renewer else {
            warn!("remote rejected credentials and no renewer is configured");
            return;
        };
        match renewer.renew().await {
            Ok(token) => {
                self.store_token(token);
                debug!("bearer token renewed");
            }
            Err(err) => warn!(error = %err, "credential renewal failed"),
        }
    }

    async fn read_response(&self, response: reqwest::Response) -> Result<Value, RemoteError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            self.renew_credentials().await;
            return Err(RemoteError::Unauthorized(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

const fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemote {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, RemoteError> {
        let url = self.url(path);
        let mut last_error = RemoteError::Transport(format!("no attempt made for {url}"));
        // A dropped connection may still have been applied; only reads are resent.
        let attempts = if method == Method::Get { self.attempts } else { 1 };

        for attempt in 1..=attempts {
            let mut request = self.client.request(to_reqwest(method), &url);
            if let Some(token) = self.current_token() {
                request = request.bearer_auth(token);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => return self.read_response(response).await,
                Err(err) => {
                    debug!(%method, %url, attempt, error = %err, "remote request failed");
                    last_error = RemoteError::Transport(err.to_string());
                }
            }
        }

        Err(last_error)
    }
}
