// demos/download.rs
//
// Logs in with WME_USERNAME / WME_PASSWORD, downloads the snapshot named by the
// first argument (default `enwiki_namespace_0`) into a local file, then prints the
// first few article names from it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;
use wme::api::{self, Client};
use wme::auth::{self, LoginRequest, RevokeTokenRequest};
use wme::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let snapshot = std::env::args().nth(1).unwrap_or_else(|| "enwiki_namespace_0".to_string());
    let config = ClientConfig::default();

    let auth = auth::Client::new(&config);
    let login = auth
        .login(&LoginRequest {
            username: std::env::var("WME_USERNAME").context("WME_USERNAME is not set")?,
            password: std::env::var("WME_PASSWORD").context("WME_PASSWORD is not set")?,
        })
        .await?;

    let mut client = Client::new(config)?;
    client.set_access_token(&login.access_token);

    let result = download(&client, &snapshot).await;

    if let Err(err) = auth
        .revoke_token(&RevokeTokenRequest { refresh_token: login.refresh_token })
        .await
    {
        tracing::warn!(error = %err, "failed to revoke token");
    }
    result
}

async fn download(client: &Client, snapshot: &str) -> Result<()> {
    let headers = client.head_snapshot(snapshot).await?;
    info!(
        snapshot,
        size = ?headers.content_length,
        last_modified = ?headers.last_modified,
        "snapshot found"
    );

    let dest = format!("{snapshot}.tar.gz");
    let mut file = tokio::fs::File::create(&dest).await?;
    let started = Instant::now();
    client.download_snapshot(snapshot, &mut file).await?;
    info!(%dest, elapsed = ?started.elapsed(), "download complete");

    let names = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&names);
    let file = tokio::fs::File::open(&dest).await?;
    let stop = api::read_all(file, move |article: serde_json::Value| {
        if seen.fetch_add(1, Ordering::Relaxed) >= 5 {
            return Err("enough");
        }
        println!("{}", article["name"].as_str().unwrap_or("<unnamed>"));
        Ok(())
    })
    .await;
    match stop {
        Err(err) if err.is_callback() => Ok(()),
        other => Ok(other?),
    }
}
