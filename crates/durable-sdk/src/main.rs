use anyhow::Context;
use clap::Parser;
use durable_registry::Registry;
use durable_runtime::Engine;
use futures::FutureExt;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let config = durable_config::Config::parse();
    tracing::info!(?config, "started!");

    let verification = config
        .verification_key
        .as_deref()
        .map(durable_sdk::Verification::from_pem)
        .transpose()
        .context("failed to parse verification_key as a PEM RSA public key")?;

    // A bare bootstrap serves no functions of its own; embedders depend on
    // this crate and build their own binary that registers theirs before
    // constructing the Engine. This one demonstrates the wiring.
    let registry = Registry::builder().freeze();
    let engine = Arc::new(Engine::new(Arc::new(registry), config.trace));

    let listener = tokio::net::TcpListener::bind("[::]:8080")
        .await
        .context("failed to bind server port")?;
    let shutdown = tokio::signal::ctrl_c().map(|_| ());

    axum::serve(listener, durable_sdk::server::router(engine, verification))
        .with_graceful_shutdown(shutdown)
        .await
        .context("serving durable-sdk http adapter")?;

    Ok(())
}
