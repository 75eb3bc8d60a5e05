/*
    jellyfin-library-access | Rust CLI tool to audit and grant library access.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid server configuration: {0}")]
    Config(String),
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Server returned HTTP {status} for {path}: {message}")]
    Status {
        status: u16,
        path: String,
        message: String,
    },
    #[error("Invalid JSON in response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True when the server rejected the HTTP verb (405), which some
    /// server versions do for `PUT /Users/{id}/Policy`.
    pub fn is_method_not_allowed(&self) -> bool {
        self.status() == Some(405)
    }
}

/// The JSON calls the access engine needs from the media server.
///
/// Paths are absolute (`/Users`, `/Library/VirtualFolders`) and appended to
/// the configured base URL verbatim.
#[async_trait]
pub trait MediaApi: Send + Sync {
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError>;
    async fn put(&self, path: &str, body: &Value) -> Result<Value, ApiError>;
    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError>;
}

/// Connection settings for the media server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    pub api_key: String,
    pub verify_tls: bool,
    pub timeout: Duration,
}

impl ServerConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            verify_tls: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Builds a config from the environment.
    ///
    /// Reads `JELLYFIN_URL` and `JELLYFIN_API_KEY` (required), plus the optional
    /// `JELLYFIN_INSECURE` (1/true/yes disables TLS verification) and
    /// `JELLYFIN_TIMEOUT` (seconds). Missing values are reported by
    /// [`ServerConfig::validate`], not here, so callers can still override them.
    pub fn from_env() -> Self {
        let mut config = Self::new(
            std::env::var("JELLYFIN_URL").unwrap_or_default(),
            std::env::var("JELLYFIN_API_KEY").unwrap_or_default(),
        );
        if let Ok(v) = std::env::var("JELLYFIN_INSECURE") {
            config.verify_tls = !matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(secs) = std::env::var("JELLYFIN_TIMEOUT")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        config
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.base_url.trim().is_empty() {
            return Err(ApiError::Config(
                "Missing server URL (--url or JELLYFIN_URL)".to_string(),
            ));
        }
        if self.api_key.trim().is_empty() {
            return Err(ApiError::Config(
                "Missing API key (--api-key or JELLYFIN_API_KEY)".to_string(),
            ));
        }
        let url = Url::parse(self.base_url.trim())
            .map_err(|e| ApiError::Config(format!("Invalid server URL '{}': {}", self.base_url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ApiError::Config(format!(
                "Server URL must use http:// or https://, got '{}'",
                url.scheme()
            )));
        }
        Ok(())
    }
}

/// `reqwest`-backed [`MediaApi`] with token auth and empty-body tolerance.
pub struct MediaServerClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl MediaServerClient {
    pub fn new(config: &ServerConfig) -> Result<Self, ApiError> {
        config.validate()?;

        let http = Client::builder()
            .user_agent(concat!("jellyfin-library-access/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            api_key: config.api_key.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("X-Emby-Token", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send(&self, path: &str, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                path: path.to_string(),
                message: message.trim().to_string(),
            });
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl MediaApi for MediaServerClient {
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        debug!("GET {}", path);
        let request = self.http.get(self.url(path)).query(query);
        self.send(path, request).await
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        debug!("PUT {}", path);
        let request = self.http.put(self.url(path)).json(body);
        self.send(path, request).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        debug!("POST {}", path);
        let request = self.http.post(self.url(path)).json(body);
        self.send(path, request).await
    }
}
