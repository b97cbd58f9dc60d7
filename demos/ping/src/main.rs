//! Ping a container engine.
//!
//! The engine is taken from `DOCKER_HOST`, `DOCKER_TLS_VERIFY` and
//! `DOCKER_CERT_PATH`. An optional argument pins the API version, which
//! turns on the server version check.
//!
//! ```text
//! RUST_LOG=dockyard=debug cargo run -p ping -- 1.41
//! ```

use std::time::Duration;

use dockyard::{Client, Context, Method, RequestOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let client = match std::env::args().nth(1) {
        Some(version) => Client::versioned_from_env(&version)?,
        None => Client::from_env()?,
    };
    tracing::info!(endpoint = %client.endpoint(), "pinging engine");

    let ctx = Context::with_timeout(Duration::from_secs(10));
    client.ping(&ctx).await?;
    println!("{} is up", client.endpoint());

    let version = client
        .request(Method::GET, "/version", RequestOptions::new().context(ctx))
        .await?
        .json::<serde_json::Value>()?;
    println!(
        "engine {} (API {})",
        version["Version"].as_str().unwrap_or("unknown"),
        version["ApiVersion"].as_str().unwrap_or("unknown"),
    );
    if let Some(negotiated) = client.server_api_version() {
        println!("server API version checked: {negotiated}");
    }

    Ok(())
}
