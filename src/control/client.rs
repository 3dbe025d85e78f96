//! `ClientLibrary`: a reusable consumer of `ControlPlane`, used by both
//! the bundled CLI and third-party publishers (spec §4.5).

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, io::Write as _, path::Path};

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use zbus::{Connection, proxy, zvariant::OwnedValue};

use crate::item::ItemMetadata;

#[proxy(
    interface = "org.freedesktop.Passim",
    default_service = "org.freedesktop.Passim",
    default_path = "/"
)]
trait PassimProxy {
    fn get_items(&self) -> zbus::Result<Vec<HashMap<String, OwnedValue>>>;
    fn publish(&self, fd: zbus::zvariant::Fd<'_>, item: HashMap<String, OwnedValue>) -> zbus::Result<()>;
    fn unpublish(&self, hash: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    fn changed(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn daemon_version(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn status(&self) -> zbus::Result<u32>;
    #[zbus(property)]
    fn download_saving(&self) -> zbus::Result<u64>;
    #[zbus(property)]
    fn carbon_saving(&self) -> zbus::Result<f64>;
    #[zbus(property)]
    fn name(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn uri(&self) -> zbus::Result<String>;
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    version: String,
    status: u32,
    download_saving: u64,
    carbon_saving: f64,
    name: String,
    uri: String,
}

/// Thin wrapper around a cached proxy to the daemon, refreshed on every
/// `Changed` signal.
pub struct ClientLibrary {
    connection: Connection,
    snapshot: RwLock<Snapshot>,
}

impl ClientLibrary {
    /// Connects to the system bus and takes an initial property
    /// snapshot.
    pub async fn load() -> Result<Self> {
        let connection = Connection::system()
            .await
            .context("failed to connect to the system bus")?;
        let client = Self {
            connection,
            snapshot: RwLock::new(Snapshot::default()),
        };
        client.refresh().await?;
        Ok(client)
    }

    async fn proxy(&self) -> Result<PassimProxyProxy<'_>> {
        PassimProxyProxy::new(&self.connection)
            .await
            .context("failed to build Passim proxy")
    }

    async fn refresh(&self) -> Result<()> {
        let proxy = self.proxy().await?;
        let snapshot = Snapshot {
            version: proxy.daemon_version().await.unwrap_or_default(),
            status: proxy.status().await.unwrap_or_default(),
            download_saving: proxy.download_saving().await.unwrap_or_default(),
            carbon_saving: proxy.carbon_saving().await.unwrap_or_default(),
            name: proxy.name().await.unwrap_or_default(),
            uri: proxy.uri().await.unwrap_or_default(),
        };
        *self.snapshot.write().await = snapshot;
        Ok(())
    }

    /// Spawns a background task that refreshes the cached snapshot every
    /// time `Changed` fires. The task runs for the lifetime of the
    /// returned handle.
    pub fn watch_changed(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let Ok(proxy) = this.proxy().await else {
                return;
            };
            let Ok(mut stream) = proxy.receive_changed().await else {
                return;
            };
            use futures_util::StreamExt;
            while stream.next().await.is_some() {
                let _ = this.refresh().await;
            }
        })
    }

    pub async fn get_version(&self) -> String {
        self.snapshot.read().await.version.clone()
    }

    pub async fn get_status(&self) -> u32 {
        self.snapshot.read().await.status
    }

    pub async fn get_download_saving(&self) -> u64 {
        self.snapshot.read().await.download_saving
    }

    pub async fn get_carbon_saving(&self) -> f64 {
        self.snapshot.read().await.carbon_saving
    }

    pub async fn get_name(&self) -> String {
        self.snapshot.read().await.name.clone()
    }

    pub async fn get_uri(&self) -> String {
        self.snapshot.read().await.uri.clone()
    }

    pub async fn get_items(&self) -> Result<Vec<ItemMetadata>> {
        let proxy = self.proxy().await?;
        let dicts = proxy.get_items().await.context("GetItems failed")?;
        dicts
            .iter()
            .map(|d| wire_dict_to_item(d).context("malformed item in GetItems reply"))
            .collect()
    }

    /// Publishes `path`'s contents. For in-memory byte buffers, see
    /// [`Self::publish_bytes`]. `next_reboot` sets the `NEXT_REBOOT`
    /// flag so the item stages disabled until the host's next boot
    /// (spec §3 "NEXT_REBOOT").
    pub async fn publish_path(
        &self,
        path: &Path,
        basename: &str,
        max_age: u32,
        share_limit: u32,
        next_reboot: bool,
    ) -> Result<()> {
        let file = std::fs::File::open(path).context("failed to open file to publish")?;
        self.publish_fd(file, basename, max_age, share_limit, next_reboot).await
    }

    /// Publishes an in-memory buffer via a sealed anonymous memory file,
    /// falling back to an unlinked temp file where `memfd` is
    /// unavailable (spec §4.5/§9).
    pub async fn publish_bytes(
        &self,
        bytes: &[u8],
        basename: &str,
        max_age: u32,
        share_limit: u32,
        next_reboot: bool,
    ) -> Result<()> {
        let file = match memfd_file(bytes) {
            Ok(f) => f,
            Err(_) => tempfile_fallback(bytes)?,
        };
        self.publish_fd(file, basename, max_age, share_limit, next_reboot).await
    }

    async fn publish_fd(
        &self,
        file: std::fs::File,
        basename: &str,
        max_age: u32,
        share_limit: u32,
        next_reboot: bool,
    ) -> Result<()> {
        let proxy = self.proxy().await?;
        let item = item_dict(basename, max_age, share_limit, next_reboot);
        let fd = zbus::zvariant::Fd::from(&file);
        proxy.publish(fd, item).await.context("Publish failed")?;
        drop(file);
        Ok(())
    }

    pub async fn unpublish(&self, hash: &str) -> Result<()> {
        let proxy = self.proxy().await?;
        proxy.unpublish(hash).await.context("Unpublish failed")
    }
}

fn item_dict(
    basename: &str,
    max_age: u32,
    share_limit: u32,
    next_reboot: bool,
) -> HashMap<String, OwnedValue> {
    let mut m = HashMap::new();
    let insert = |m: &mut HashMap<String, OwnedValue>, k: &str, v: OwnedValue| {
        m.insert(k.to_string(), v);
    };
    if let Ok(v) = OwnedValue::try_from(zbus::zvariant::Value::from(basename)) {
        insert(&mut m, "filename", v);
    }
    if let Ok(v) = OwnedValue::try_from(zbus::zvariant::Value::from(max_age)) {
        insert(&mut m, "max-age", v);
    }
    if let Ok(v) = OwnedValue::try_from(zbus::zvariant::Value::from(share_limit)) {
        insert(&mut m, "share-limit", v);
    }
    if next_reboot {
        if let Ok(v) = OwnedValue::try_from(zbus::zvariant::Value::from(
            crate::item::Flags::NEXT_REBOOT.bits(),
        )) {
            insert(&mut m, "flags", v);
        }
    }
    m
}

fn wire_dict_to_item(dict: &HashMap<String, OwnedValue>) -> Result<ItemMetadata> {
    let get_str = |k: &str| -> Option<String> {
        dict.get(k).and_then(|v| String::try_from(v.clone()).ok())
    };
    let get_u32 = |k: &str| -> Option<u32> { dict.get(k).and_then(|v| u32::try_from(v.clone()).ok()) };

    Ok(ItemMetadata {
        hash: get_str("hash").context("missing hash")?,
        basename: get_str("filename").context("missing filename")?,
        cmdline: get_str("cmdline").unwrap_or_default(),
        ctime: 0,
        max_age: get_u32("max-age").unwrap_or(crate::item::metadata::DEFAULT_MAX_AGE),
        share_limit: get_u32("share-limit").unwrap_or(crate::item::metadata::DEFAULT_SHARE_LIMIT),
        share_count: get_u32("share-count").unwrap_or(0),
        size: 0,
        flags: crate::item::Flags::from_bits_truncate(get_u32("flags").unwrap_or(0)),
    })
}

fn memfd_file(bytes: &[u8]) -> Result<std::fs::File> {
    let opts = memfd::MemfdOptions::default().allow_sealing(true);
    let mfd = opts.create("passim-publish").context("memfd_create failed")?;
    mfd.as_file().set_len(bytes.len() as u64)?;
    {
        let mut f = mfd.as_file();
        f.write_all(bytes)?;
    }
    mfd.add_seals(&[memfd::FileSeal::SealShrink, memfd::FileSeal::SealGrow])
        .ok();
    let file = mfd.into_file();
    seek_start(&file)?;
    Ok(file)
}

fn tempfile_fallback(bytes: &[u8]) -> Result<std::fs::File> {
    let mut tmp = tempfile::tempfile().context("failed to create fallback temp file")?;
    tmp.write_all(bytes)?;
    seek_start(&tmp)?;
    Ok(tmp)
}

fn seek_start(file: &std::fs::File) -> Result<()> {
    use std::io::Seek;
    let mut f = file.try_clone().context("failed to clone fd for seek")?;
    f.seek(std::io::SeekFrom::Start(0))?;
    Ok(())
}
