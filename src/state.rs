//! The process-wide state object: owns the hash→Item mapping, the
//! Discovery responder, and the counters/identity exposed on the
//! control plane (spec §4.6, §5 "Global state").

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    path::PathBuf,
    sync::{Arc, atomic::{AtomicU64, Ordering}},
};

use tokio::sync::{RwLock, broadcast};
use tracing::info;

use crate::{
    cfg::{config::Config, enums::Status},
    discovery::Discovery,
    store::ItemStore,
};

/// Package name used to derive the DNS-SD instance name and the
/// `Name`/`Uri` control-plane properties.
pub const PACKAGE_NAME: &str = "Passim";

/// Capacity of the `Changed` broadcast channel; lagging subscribers
/// simply miss intermediate notifications and re-fetch state via
/// `GetItems`, which is always a consistent snapshot.
const CHANGED_CHANNEL_CAPACITY: usize = 16;

pub struct State {
    pub config: Config,
    pub store: Arc<ItemStore>,
    pub discovery: Discovery,
    pub pkgdatadir: PathBuf,
    pub instance_name: String,
    status: RwLock<Status>,
    download_saving: AtomicU64,
    changed_tx: broadcast::Sender<()>,
}

impl State {
    pub fn new(
        config: Config,
        store: Arc<ItemStore>,
        discovery: Discovery,
        pkgdatadir: PathBuf,
        instance_name: String,
    ) -> Self {
        let (changed_tx, _rx) = broadcast::channel(CHANGED_CHANNEL_CAPACITY);
        Self {
            config,
            store,
            discovery,
            pkgdatadir,
            instance_name,
            status: RwLock::new(Status::Starting),
            download_saving: AtomicU64::new(0),
            changed_tx,
        }
    }

    pub async fn status(&self) -> Status {
        *self.status.read().await
    }

    pub async fn set_status(&self, status: Status) {
        let mut guard = self.status.write().await;
        if *guard != status {
            info!("status transition: {guard} -> {status}");
            *guard = status;
        }
    }

    pub fn download_saving(&self) -> u64 {
        self.download_saving.load(Ordering::Relaxed)
    }

    pub fn add_download_saving(&self, bytes: u64) {
        self.download_saving.fetch_add(bytes, Ordering::Relaxed);
    }

    /// `CarbonSaving = DownloadSaving / 2^30 * CarbonCost` (spec §4.4).
    pub fn carbon_saving(&self) -> f64 {
        (self.download_saving() as f64 / (1u64 << 30) as f64) * self.config.daemon.carbon_cost
    }

    pub fn uri(&self) -> String {
        format!("https://localhost:{}/", self.config.daemon.port)
    }

    /// Subscribes to the `Changed` signal; re-registers Discovery with
    /// the current non-disabled hash set and notifies subscribers. Must
    /// be called after every mutation of the published set (spec §4.4).
    pub async fn notify_changed(&self) {
        let hashes: Vec<String> = self
            .store
            .enumerate()
            .into_iter()
            .filter(|i| !i.is_disabled())
            .map(|i| i.hash)
            .collect();

        if let Err(e) = self.discovery.register(&hashes) {
            tracing::warn!("failed to re-register discovery: {e}");
        }
        let _ = self.changed_tx.send(());
    }

    pub fn subscribe_changed(&self) -> broadcast::Receiver<()> {
        self.changed_tx.subscribe()
    }
}

/// Generates a fresh `"<pkg>-XXXX"` instance identity (four uppercase
/// hex digits), shared by Discovery's registered name and the `Name`
/// control-plane property (spec §6).
pub fn new_instance_name() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    format!("{PACKAGE_NAME}-{:04X}", rng.random_range(0..=0xFFFFu16))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::config::DaemonConfig;

    fn test_config() -> Config {
        Config {
            daemon: DaemonConfig::default(),
            logger: Default::default(),
        }
    }

    #[test]
    fn carbon_saving_is_zero_with_no_downloads() {
        let store = Arc::new(ItemStore::new(std::path::PathBuf::from("/tmp/passim-test"), 1024));
        let discovery = Discovery::new("Passim-TEST".to_string(), 0).expect("discovery");
        let state = State::new(
            test_config(),
            store,
            discovery,
            PathBuf::from("/usr/share/passim"),
            "Passim-TEST".to_string(),
        );
        assert_eq!(state.carbon_saving(), 0.0);
    }

    #[test]
    fn instance_name_has_pkg_prefix() {
        let store = Arc::new(ItemStore::new(std::path::PathBuf::from("/tmp/passim-test2"), 1024));
        let discovery = Discovery::new("Passim-TEST".to_string(), 0).expect("discovery");
        let name = new_instance_name();
        let state = State::new(
            test_config(),
            store,
            discovery,
            PathBuf::from("/usr/share/passim"),
            name,
        );
        assert!(state.instance_name.starts_with("Passim-"));
    }
}
