// src/auth.rs

//! Token issuance: login, refresh and revocation.

use reqwest::header;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::send;
use crate::config::ClientConfig;
use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub id_token: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Seconds until `access_token` expires.
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshTokenRequest {
    pub username: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenResponse {
    #[serde(default)]
    pub id_token: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevokeTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_http_client(reqwest::Client::new(), config)
    }

    pub fn with_http_client(http: reqwest::Client, config: &ClientConfig) -> Self {
        Self { http, base_url: config.auth_url.clone() }
    }

    pub async fn login(&self, req: &LoginRequest) -> Result<LoginResponse> {
        debug!(username = %req.username, "logging in");
        self.post("/login", req).await
    }

    pub async fn refresh_token(&self, req: &RefreshTokenRequest) -> Result<RefreshTokenResponse> {
        self.post("/token-refresh", req).await
    }

    /// Invalidates a refresh token and every access token issued from it.
    pub async fn revoke_token(&self, req: &RevokeTokenRequest) -> Result<()> {
        let request = self
            .http
            .post(format!("{}/token-revoke", self.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .json(req);
        send(request).await?;
        Ok(())
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header(header::CONTENT_TYPE, "application/json")
            .json(body);
        Ok(send(request).await?.json().await?)
    }
}
