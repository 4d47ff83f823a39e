//! Outbound HTTP gateway for the screening API.
//!
//! Owns the base path and the default `Authorization` header. The header is a
//! read-only mirror of the session credential; only `SessionStore` (inside
//! this crate) writes it. Every non-2xx response is normalized into a typed
//! `common::Error`; raw `reqwest` errors never escape.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use common::{ClientConfig, Credential, Error};
use reqwest::header::AUTHORIZATION;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::rate_limit::RateLimiter;

const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Get,
    Post,
}

/// Async HTTP client shared by the session store and the API layer.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    bearer: Arc<RwLock<Option<Credential>>>,
    limiter: RateLimiter,
}

impl HttpGateway {
    /// Build a gateway from client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        let root = Url::parse(config.api_root.trim())
            .map_err(|e| Error::Config(format!("Invalid api_root {:?}: {e}", config.api_root)))?;
        if root.cannot_be_a_base() || !matches!(root.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "api_root must be an http(s) URL, got {:?}",
                config.api_root
            )));
        }

        let client = reqwest::Client::builder()
            .user_agent(config.http.user_agent.as_str())
            .pool_max_idle_per_host(config.http.pool_max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.http.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: root.as_str().trim_end_matches('/').to_string(),
            bearer: Arc::new(RwLock::new(None)),
            limiter: RateLimiter::from_config(&config.rate_limit)?,
        })
    }

    /// URL helper.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ── Default auth header ───────────────────────────────────────────

    /// Token currently attached to outgoing requests.
    pub fn bearer(&self) -> Option<Credential> {
        self.bearer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_bearer(&self, token: &Credential) {
        *self.bearer.write().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
    }

    pub(crate) fn clear_bearer(&self) {
        *self.bearer.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    // ── Verbs ─────────────────────────────────────────────────────────

    /// GET `path`, decoding a JSON body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let req = self.client.get(self.url(path));
        self.execute(Verb::Get, path, req, None).await
    }

    /// GET `path` with query parameters.
    pub async fn get_query<T, Q>(&self, path: &str, query: &Q) -> Result<T, Error>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let req = self.client.get(self.url(path)).query(query);
        self.execute(Verb::Get, path, req, None).await
    }

    /// GET `path` authenticated with an explicit token instead of the default
    /// header. Used while a session is being established or verified.
    pub async fn get_with_token<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &Credential,
    ) -> Result<T, Error> {
        let req = self.client.get(self.url(path));
        self.execute(Verb::Get, path, req, Some(token)).await
    }

    /// POST a JSON body.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let req = self.client.post(self.url(path)).json(body);
        self.execute(Verb::Post, path, req, None).await
    }

    /// POST a form-encoded body.
    pub async fn post_form<F, T>(&self, path: &str, form: &F) -> Result<T, Error>
    where
        F: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let req = self.client.post(self.url(path)).form(form);
        self.execute(Verb::Post, path, req, None).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        verb: Verb,
        path: &str,
        req: RequestBuilder,
        token: Option<&Credential>,
    ) -> Result<T, Error> {
        match verb {
            Verb::Get => self.limiter.wait_read().await,
            Verb::Post => self.limiter.wait_write().await,
        }

        let auth = token.cloned().or_else(|| self.bearer());
        let req = match &auth {
            Some(t) => req.header(AUTHORIZATION, t.bearer()),
            None => req,
        };

        debug!("{:?} {} (auth={})", verb, path, auth.is_some());

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Network(format!("{path}: {e}")))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("{path}: {e}")))?;

        if !status.is_success() {
            let message = error_message(&body);
            debug!("{:?} {} failed: status={} {}", verb, path, status.as_u16(), message);
            return Err(Error::from_status(status.as_u16(), message));
        }

        serde_json::from_slice(&body).map_err(|e| Error::Decode(format!("{path}: {e}")))
    }
}

/// Human-readable message from an error body.
///
/// Unwraps `{"detail": "..."}` and the list form `{"detail": [{"msg": ...}]}`;
/// anything else is returned as (truncated) text.
fn error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        match value.get("detail") {
            Some(serde_json::Value::String(s)) => return s.clone(),
            Some(serde_json::Value::Array(items)) => {
                let msgs: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                    .collect();
                if !msgs.is_empty() {
                    return msgs.join("; ");
                }
            }
            _ => {}
        }
    }

    let text = String::from_utf8_lossy(body);
    text.chars().take(MAX_ERROR_BODY).collect()
}
