//! # dropspot-server
//!
//! HTTPS drop spot for the local network.
//!
//! Peers on the LAN open the advertised address (printed as a QR code at
//! startup) and can:
//! - **leave text messages**, kept under `received-messages/` with the newest
//!   always at `0.txt`
//! - **upload files** into `received-files/`
//! - **download files** the host placed in `hosted-files/`
//!
//! There are no accounts and no database; see `dropspot-store` for the
//! on-disk layout.

mod api;
mod config;
mod error;
mod lan;
mod tls;

use std::io::ErrorKind;
use std::sync::Arc;

use anyhow::Context;
use axum_server::Handle;
use dropspot_store::DropSpot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::tls::TlsSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,dropspot_server=debug,dropspot_store=debug")
        }))
        .init();

    info!("Starting drop spot v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::load();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store (creates directories if missing)
    // -----------------------------------------------------------------------
    let spot = DropSpot::open(config.root.clone())
        .await
        .with_context(|| format!("opening drop spot at {}", config.root.display()))?;
    spot.lander()
        .purge_partials()
        .await
        .context("cleaning up interrupted uploads")?;

    // -----------------------------------------------------------------------
    // 4. TLS and advertised address
    // -----------------------------------------------------------------------
    let listen_addr = config.listen_addr();
    let lan_ip = lan::advertised_ip(config.host);

    let tls_hosts: Vec<_> = lan_ip.into_iter().chain([config.host]).collect();
    let tls_config = tls::build_rustls_config(&TlsSource::choose(&config), &tls_hosts)
        .await
        .context("loading TLS certificate")?;

    info!(url = %lan::https_url(listen_addr), "Hosting drop spot");
    if let Some(ip) = lan_ip {
        let url = lan::https_url((ip, listen_addr.port()).into());
        info!(%url, "Address on local network");
        if config.show_qr {
            if let Some(qr) = lan::render_qr(&url) {
                println!("{qr}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // 5. Run the HTTPS server until Ctrl+C
    // -----------------------------------------------------------------------
    let state = AppState {
        spot: Arc::new(spot),
        config: Arc::new(config),
    };
    let app = api::build_router(state);

    let handle = Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            shutdown.graceful_shutdown(Some(std::time::Duration::from_secs(10)));
        }
    });

    if let Err(e) = api::serve(app, listen_addr, tls_config, handle).await {
        match e.kind() {
            ErrorKind::AddrInUse => error!("Address {} already in use", lan::https_url(listen_addr)),
            ErrorKind::PermissionDenied => error!(
                "Can not access port {} on host {}",
                listen_addr.port(),
                listen_addr.ip()
            ),
            _ => error!(error = %e, "HTTPS server failed"),
        }
        return Err(e.into());
    }

    Ok(())
}
