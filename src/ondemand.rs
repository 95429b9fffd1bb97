// src/ondemand.rs

//! Single-page lookups against the v1 on-demand API.

use reqwest::header;
use serde::de::DeserializeOwned;

use crate::api::{no_cache, send};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::schema::Project;

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl Client {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_http_client(reqwest::Client::new(), config)
    }

    pub fn with_http_client(http: reqwest::Client, config: &ClientConfig) -> Self {
        Self { http, base_url: config.ondemand_url.clone(), access_token: String::new() }
    }

    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Latest revision of page `name` in `project`, e.g. `("enwiki", "Earth")`.
    /// Use `serde_json::Value` for an untyped page.
    pub async fn article<T: DeserializeOwned>(&self, project: &str, name: &str) -> Result<T> {
        self.get(&format!("/pages/meta/{project}/{name}")).await
    }

    pub async fn projects(&self) -> Result<Vec<Project>> {
        self.get("/projects").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (name, value) = no_cache();
        let request = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header(header::CONTENT_TYPE, "application/json")
            .header(name, value)
            .bearer_auth(&self.access_token);
        Ok(send(request).await?.json().await?)
    }
}
