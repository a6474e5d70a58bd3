//! Remote QR Mate REST API adapter.
//!
//! Implements the core `NetworkApi` port over `reqwest`, plus the profile fetch
//! used to build a user's own deep link.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;

use qrmate_core::{
    config::Config,
    domain::CachedUser,
    errors::Error,
    ports::{CreateNetworkRequest, CreateNetworkResponse, KeyValueStore, NetworkApi},
    store, Result,
};

const CREATE_NETWORK_PATH: &str = "/create-a-network/";
const PROFILE_PATH: &str = "/web/profile/";

#[derive(Clone, Debug)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    /// Token precedence: `QRMATE_API_TOKEN`, then the stored access token.
    pub fn from_config(cfg: &Config, local: Option<&dyn KeyValueStore>) -> Result<Self> {
        let token = match (&cfg.api_token, local) {
            (Some(t), _) => Some(t.clone()),
            (None, Some(s)) => store::access_token(s)?,
            (None, None) => None,
        };
        if token.is_none() {
            tracing::info!("no api token configured; requests go out unauthenticated");
        }
        Self::new(cfg.api_base_url.clone(), token, cfg.http_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let rb = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.token {
            Some(t) => rb.bearer_auth(t),
            None => rb,
        }
    }

    /// Body of a 2xx reply. Anything else becomes `Error::Api`.
    async fn send(&self, rb: RequestBuilder, what: &str) -> Result<String> {
        let resp = rb.send().await.map_err(|e| transport_error(what, e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| transport_error(what, e))?;

        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), what, "api request failed");
            return Err(api_error(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, rb: RequestBuilder, what: &str) -> Result<T> {
        let body = self.send(rb, what).await?;
        if body.trim().is_empty() {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// `GET /web/profile/`. Accepts both `{data: user}` and a bare user object.
    pub async fn profile(&self) -> Result<CachedUser> {
        let v: Value = self
            .send_json(self.request(Method::GET, PROFILE_PATH), "profile")
            .await?;
        Ok(serde_json::from_value(unwrap_data(v))?)
    }

    /// Fetch the profile and cache it under the `user` key.
    pub async fn refresh_cached_user(&self, local: &dyn KeyValueStore) -> Result<CachedUser> {
        let user = self.profile().await?;
        store::cache_user(local, &user)?;
        Ok(user)
    }
}

#[async_trait]
impl NetworkApi for ApiClient {
    async fn create_network(&self, req: &CreateNetworkRequest) -> Result<CreateNetworkResponse> {
        let body = self
            .send(
                self.request(Method::POST, CREATE_NETWORK_PATH).json(req),
                "create network",
            )
            .await?;
        // The connection exists once the status is 2xx, whatever the body says.
        let v = match serde_json::from_str::<Value>(&body) {
            Ok(v) => v,
            Err(e) => {
                if !body.trim().is_empty() {
                    tracing::debug!(error = %e, "create network reply is not json");
                }
                Value::Null
            }
        };
        Ok(parse_create_network(v))
    }
}

fn transport_error(what: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        return Error::Transport(format!("{what}: request timed out"));
    }
    Error::Transport(format!("{what}: {e}"))
}

fn unwrap_data(v: Value) -> Value {
    match v {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn parse_create_network(v: Value) -> CreateNetworkResponse {
    let data = match v {
        Value::Object(mut map) => map.remove("data").filter(|d| !d.is_null()),
        _ => None,
    };
    CreateNetworkResponse { data }
}

/// Map a non-2xx response into `Error::Api`.
///
/// Understands `{code, detail}`, `{message}` and `{error}` bodies; anything else
/// becomes the (truncated) raw body.
pub(crate) fn api_error(status: u16, body: &str) -> Error {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v.get("code"))
        .and_then(|c| match c {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    let message = parsed
        .as_ref()
        .and_then(|v| {
            ["detail", "message", "error"]
                .iter()
                .find_map(|k| v.get(*k))
                .map(|m| match m {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
        })
        .unwrap_or_else(|| body.trim().chars().take(200).collect());

    Error::Api {
        status,
        code,
        message,
    }
}
