//! `passimd`: the daemon entry point. Wires config → logger → store
//! scan → Discovery → HTTPS listener → ControlPlane → LifecycleSupervisor,
//! in the order spec §4.6 requires.

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use passim::{
    cfg::{cli, config::Config},
    control, discovery::Discovery,
    http,
    state::{self, State},
    store::{external_dir, ItemStore},
    supervisor::LifecycleSupervisor,
};
use tracing::info;

/// `<localstatedir>/lib/<pkg>` — TLS material and, by default, the
/// cache's own data directory.
const LOCALSTATEDIR: &str = "/var/lib/passim";
/// `<datadir>/<pkg>` — static assets served at `/style.css`/`/favicon.ico`.
const PKGDATADIR: &str = "/usr/share/passim";

#[tokio::main]
async fn main() -> Result<()> {
    let timed_exit = std::env::args().any(|a| a == "--timed-exit");

    let config_path = cli::resolve_config_path();
    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("failed to load {config_path:?}"))
        .unwrap_or_else(|e| {
            eprintln!("passimd: {e:#}, using defaults");
            Config {
                daemon: Default::default(),
                logger: Default::default(),
            }
        });

    let _log_guard = passim::cfg::logger::init_logger(&config.logger)
        .context("failed to initialize logging")?;

    info!("passimd {} starting", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(ItemStore::new(
        config.daemon.path.clone(),
        config.daemon.max_item_size,
    ));
    let boot_time = crate_boot_time();
    store.scan_on_start(boot_time).await.context("failed to scan data directory")?;

    let fragment_dir = cli::resolve_fragment_dir();
    let adopted_dirs = external_dir::read_fragment_dirs(&fragment_dir);
    external_dir::rescan(&store, &adopted_dirs).await;

    let instance_name = state::new_instance_name();
    let discovery = Discovery::new(instance_name.clone(), config.daemon.port)
        .context("failed to start mDNS responder")?;

    let state = Arc::new(State::new(
        config,
        Arc::clone(&store),
        discovery,
        PKGDATADIR.into(),
        instance_name,
    ));

    let _watcher = external_dir::spawn_watcher(Arc::clone(&store), fragment_dir)
        .context("failed to start sysconfpkgdir watcher")?;

    state.set_status(passim::cfg::enums::Status::Starting).await;

    let bus_connection = control::serve(Arc::clone(&state))
        .await
        .context("failed to register control plane on the system bus")?;
    info!("control plane registered as {}", control::interface::SERVICE_NAME);

    let metered_rx = passim::supervisor::metered::watch().await;
    let lifecycle = LifecycleSupervisor::new(Arc::clone(&state), metered_rx, timed_exit);
    lifecycle.mark_loading().await;

    let cert_path = std::path::Path::new(LOCALSTATEDIR).join("cert.pem");
    let key_path = std::path::Path::new(LOCALSTATEDIR).join("secret.key");
    let tls_config = http::tls::ensure_and_load(&cert_path, &key_path)
        .await
        .context("failed to prepare TLS material")?;

    let addr: std::net::SocketAddr = if state.config.daemon.ipv6 {
        format!("[::]:{}", state.config.daemon.port).parse()
    } else {
        format!("0.0.0.0:{}", state.config.daemon.port).parse()
    }
    .context("failed to parse bind address")?;

    let router = http::router(Arc::clone(&state));
    let server = axum_server::bind_rustls(addr, tls_config)
        .serve(router.into_make_service_with_connect_info::<std::net::SocketAddr>());
    let http_handle = tokio::spawn(server);

    state.notify_changed().await;
    lifecycle.mark_running().await;
    info!("passimd ready on port {}", state.config.daemon.port);

    lifecycle.run().await;

    http_handle.abort();
    drop(bus_connection);
    Ok(())
}

fn crate_boot_time() -> u64 {
    passim::store::current_boot_time()
}
