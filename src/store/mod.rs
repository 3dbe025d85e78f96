//! The content-addressed cache: filesystem layout, atomic publish,
//! eviction by age/share/explicit unpublish, scan-on-start, and the
//! external-directory (sysconfpkgdir) adoption watcher.

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod external_dir;

use std::{
    os::unix::fs::{MetadataExt, PermissionsExt},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::{
    error::{PassimError, Result},
    item::{
        metadata::{DEFAULT_MAX_AGE, DEFAULT_SHARE_LIMIT, Flags},
        ItemMetadata, PublishRequest, Storage,
    },
    xattr_store,
};

const XATTR_MAX_AGE: &str = "user.max_age";
const XATTR_SHARE_LIMIT: &str = "user.share_limit";
const XATTR_CMDLINE: &str = "user.cmdline";
const XATTR_BOOT_TIME: &str = "user.boot_time";
const XATTR_CTIME: &str = "user.ctime";
pub(crate) const XATTR_CHECKSUM: &str = "user.checksum.sha256";

const READ_CHUNK: usize = 32 * 1024;

/// Outcome of recording one successful HTTPS transfer against an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    /// `share_count` was incremented and the item survives.
    Continues,
    /// `share_count` reached `share_limit`; the item was deleted.
    Evicted,
}

/// The in-memory hash → item mapping, backed by the on-disk cache rooted
/// at `data_dir`.
pub struct ItemStore {
    data_dir: PathBuf,
    max_item_size: u64,
    items: DashMap<String, ItemMetadata>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current boot identity, used for `NEXT_REBOOT` gating. Reads the
/// monotonic-since-boot marker from `/proc/stat`'s `btime` line, falling
/// back to `0` (meaning "unknown boot", so a `NEXT_REBOOT` item with a
/// recorded boot time always compares unequal and stays disabled until an
/// operator intervenes) when it cannot be read, as happens in
/// non-Linux/test sandboxes.
pub fn current_boot_time() -> u64 {
    let Ok(stat) = std::fs::read_to_string("/proc/stat") else {
        return 0;
    };
    stat.lines()
        .find_map(|l| l.strip_prefix("btime "))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

impl ItemStore {
    pub fn new(data_dir: PathBuf, max_item_size: u64) -> Self {
        Self {
            data_dir,
            max_item_size,
            items: DashMap::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Scans `data_dir` for `<hash>-<basename>` files and loads each as
    /// an `Item`, reading `max_age`/`share_limit`/`cmdline`/`boot_time`/
    /// `ctime` from xattrs with the documented defaults. The filename's
    /// hash component is authoritative and is not recomputed. Symlinks
    /// are skipped (logged at warning) to avoid TOCTOU.
    pub async fn scan_on_start(&self, boot_time: u64) -> Result<()> {
        self.items.clear();

        if !self.data_dir.exists() {
            tokio::fs::create_dir_all(&self.data_dir).await?;
            set_dir_mode(&self.data_dir)?;
            return Ok(());
        }

        let mut rd = tokio::fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = rd.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_symlink() {
                warn!("skipping symlink in data dir: {path:?}");
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Some((hash, basename)) = name.split_once('-') else {
                debug!("skipping file with no '-' separator: {name}");
                continue;
            };
            if !is_sha256_hex(hash) {
                debug!("skipping file whose prefix is not a sha256 hash: {name}");
                continue;
            }

            match self.load_one(&path, hash, basename, boot_time).await {
                Ok(item) => {
                    self.items.insert(item.hash.clone(), item);
                },
                Err(e) => warn!("failed to load cached item {path:?}: {e}"),
            }
        }

        info!("scanned {} cached items from {:?}", self.items.len(), self.data_dir);
        Ok(())
    }

    async fn load_one(
        &self,
        path: &Path,
        hash: &str,
        basename: &str,
        boot_time: u64,
    ) -> Result<ItemMetadata> {
        let meta = tokio::fs::metadata(path).await?;
        let size = meta.len();

        let max_age = xattr_store::get_u32(path, XATTR_MAX_AGE, DEFAULT_MAX_AGE)?;
        let share_limit =
            xattr_store::get_u32(path, XATTR_SHARE_LIMIT, DEFAULT_SHARE_LIMIT)?;
        let cmdline = xattr_store::get_string(path, XATTR_CMDLINE, "")?;
        let ctime = xattr_store::get_string_opt(path, XATTR_CTIME)?
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| meta.mtime().max(0) as u64);

        let mut flags = Flags::empty();
        if let Some(recorded) = xattr_store::get_string_opt(path, XATTR_BOOT_TIME)? {
            let recorded: u64 = recorded.parse().unwrap_or(0);
            flags |= Flags::NEXT_REBOOT;
            if recorded == boot_time {
                flags |= Flags::DISABLED;
            }
        }

        Ok(ItemMetadata {
            hash: hash.to_string(),
            basename: basename.to_string(),
            cmdline,
            ctime,
            max_age,
            share_limit,
            share_count: 0,
            size,
            flags,
        })
    }

    /// Publishes a new item: reads at most `max_item_size` bytes from
    /// `req.storage`, hashes it, fails on a hash collision, then writes
    /// it atomically to `<data_dir>/<hash>-<basename>` (mode 0600) and
    /// persists its xattrs.
    pub async fn publish(&self, req: PublishRequest) -> Result<ItemMetadata> {
        if req.basename.is_empty() || req.basename.contains('/') {
            return Err(PassimError::InvalidArgs(
                "basename must be non-empty and contain no '/'".to_string(),
            ));
        }

        tokio::fs::create_dir_all(&self.data_dir).await?;
        set_dir_mode(&self.data_dir)?;

        let tmp_path = self
            .data_dir
            .join(format!(".tmp-{}-{}", std::process::id(), NEXT_TMP.fetch_add(1, Ordering::Relaxed)));

        let (hash, size) = self.write_capped(&tmp_path, req.storage).await?;

        if self.items.contains_key(&hash) {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(PassimError::AlreadyExists(hash));
        }

        let final_path = self.data_dir.join(format!("{hash}-{}", req.basename));
        tokio::fs::rename(&tmp_path, &final_path).await?;
        set_file_mode(&final_path)?;

        let ctime = now_secs();
        xattr_store::set_u32(&final_path, XATTR_MAX_AGE, req.max_age)?;
        xattr_store::set_u32(&final_path, XATTR_SHARE_LIMIT, req.share_limit)?;
        xattr_store::set_string(&final_path, XATTR_CMDLINE, &req.cmdline)?;
        xattr_store::set_string(&final_path, XATTR_CTIME, &ctime.to_string())?;

        let mut flags = Flags::empty();
        if req.flags.contains(Flags::NEXT_REBOOT) {
            xattr_store::set_string(
                &final_path,
                XATTR_BOOT_TIME,
                &current_boot_time().to_string(),
            )?;
            flags |= Flags::NEXT_REBOOT | Flags::DISABLED;
        }

        let item = ItemMetadata {
            hash: hash.clone(),
            basename: req.basename,
            cmdline: req.cmdline,
            ctime,
            max_age: req.max_age,
            share_limit: req.share_limit,
            share_count: 0,
            size,
            flags,
        };
        self.items.insert(hash, item.clone());
        Ok(item)
    }

    async fn write_capped(&self, tmp_path: &Path, storage: Storage) -> Result<(String, u64)> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(tmp_path)
            .await?;
        let mut hasher = Sha256::new();
        let mut total: u64 = 0;

        let mut src: Box<dyn tokio::io::AsyncRead + Unpin + Send> = match storage {
            Storage::Path(p) => Box::new(tokio::fs::File::open(p).await?),
            Storage::Bytes(b) => Box::new(std::io::Cursor::new(b)),
            Storage::Stream(s) => s,
        };

        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = src.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > self.max_item_size {
                drop(file);
                let _ = tokio::fs::remove_file(tmp_path).await;
                return Err(PassimError::TooLarge {
                    limit: self.max_item_size,
                });
            }
            hasher.update(&buf[..n]);
            tokio::io::AsyncWriteExt::write_all(&mut file, &buf[..n]).await?;
        }

        Ok((hex::encode(hasher.finalize()), total))
    }

    /// Removes an item's file and mapping entry. Fails with `NotFound`
    /// if `hash` is unknown.
    pub async fn unpublish(&self, hash: &str) -> Result<ItemMetadata> {
        let (_, item) = self
            .items
            .remove(hash)
            .ok_or_else(|| PassimError::NotFound(hash.to_string()))?;
        let path = item.path_in(&self.data_dir);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(item)
    }

    pub fn get(&self, hash: &str) -> Option<ItemMetadata> {
        self.items.get(hash).map(|r| r.value().clone())
    }

    /// Snapshot of all items; order unspecified.
    pub fn enumerate(&self) -> Vec<ItemMetadata> {
        self.items.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Records one successful transfer. Increments `share_count`;
    /// deletes the item if the post-increment count reaches
    /// `share_limit` (spec §9 Open Questions: `==` after increment).
    pub async fn record_share(&self, hash: &str) -> Result<ShareOutcome> {
        let reached_limit = {
            let mut entry = self
                .items
                .get_mut(hash)
                .ok_or_else(|| PassimError::NotFound(hash.to_string()))?;
            entry.share_count = entry.share_count.saturating_add(1);
            entry.share_limit != crate::item::metadata::UNLIMITED
                && entry.share_count >= entry.share_limit
        };

        if reached_limit {
            self.unpublish(hash).await?;
            Ok(ShareOutcome::Evicted)
        } else {
            Ok(ShareOutcome::Continues)
        }
    }

    /// Deletes every item whose age exceeds its `max_age`. Run hourly and
    /// once at startup.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let now = now_secs();
        let expired: Vec<String> = self
            .items
            .iter()
            .filter(|r| r.value().is_expired(now))
            .map(|r| r.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for hash in expired {
            match self.unpublish(&hash).await {
                Ok(_) => removed.push(hash),
                Err(e) => warn!("failed to evict expired item {hash}: {e}"),
            }
        }
        removed
    }

    /// Flips every disabled `NEXT_REBOOT` item to enabled once the
    /// current boot identity differs from the one recorded at publish
    /// time. Returns the hashes that changed.
    pub fn activate_due_reboots(&self, boot_time: u64) -> Vec<String> {
        let mut changed = Vec::new();
        for mut entry in self.items.iter_mut() {
            if !entry.flags.contains(Flags::NEXT_REBOOT) || !entry.flags.contains(Flags::DISABLED)
            {
                continue;
            }
            let path = entry.path_in(&self.data_dir);
            let recorded: u64 = xattr_store::get_string_opt(&path, XATTR_BOOT_TIME)
                .ok()
                .flatten()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            if recorded != boot_time {
                entry.flags.remove(Flags::DISABLED);
                changed.push(entry.hash.clone());
            }
        }
        changed
    }

    /// Inserts or replaces an externally-adopted item (see
    /// `external_dir`), sentineled with `max_age = share_limit =
    /// UNLIMITED`.
    pub(crate) fn insert_adopted(&self, item: ItemMetadata) {
        self.items.insert(item.hash.clone(), item);
    }

    /// Removes every item previously inserted with the adopted sentinel,
    /// used before a full external-directory re-scan.
    pub(crate) fn remove_all_adopted(&self) {
        self.items.retain(|_, item| {
            !(item.max_age == crate::item::metadata::UNLIMITED
                && item.share_limit == crate::item::metadata::UNLIMITED)
        });
    }
}

static NEXT_TMP: AtomicU64 = AtomicU64::new(0);

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn set_dir_mode(path: &Path) -> Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

fn set_file_mode(path: &Path) -> Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn req(basename: &str, bytes: &[u8]) -> PublishRequest {
        PublishRequest {
            basename: basename.to_string(),
            max_age: 3600,
            share_limit: 1,
            flags: Flags::empty(),
            cmdline: "test".to_string(),
            storage: Storage::Bytes(bytes.to_vec()),
        }
    }

    #[tokio::test]
    async fn publish_computes_sha256_hash() {
        let dir = tempdir().expect("tempdir");
        let store = ItemStore::new(dir.path().to_path_buf(), 1024);
        let item = store.publish(req("greet", b"hello")).await.expect("publish");
        assert_eq!(
            item.hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(item.size, 5);
        let path = item.path_in(store.data_dir());
        let on_disk = tokio::fs::read(path).await.expect("read back");
        assert_eq!(on_disk, b"hello");
    }

    #[tokio::test]
    async fn publish_duplicate_hash_fails() {
        let dir = tempdir().expect("tempdir");
        let store = ItemStore::new(dir.path().to_path_buf(), 1024);
        store.publish(req("a", b"hello")).await.expect("first publish");
        let err = store
            .publish(req("b", b"hello"))
            .await
            .expect_err("duplicate hash must fail");
        assert!(matches!(err, PassimError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn publish_over_max_size_fails() {
        let dir = tempdir().expect("tempdir");
        let store = ItemStore::new(dir.path().to_path_buf(), 4);
        let err = store
            .publish(req("a", b"hello"))
            .await
            .expect_err("oversized stream must fail");
        assert!(matches!(err, PassimError::TooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn unpublish_is_idempotent_as_notfound() {
        let dir = tempdir().expect("tempdir");
        let store = ItemStore::new(dir.path().to_path_buf(), 1024);
        let item = store.publish(req("a", b"hello")).await.expect("publish");
        store.unpublish(&item.hash).await.expect("first unpublish");
        let err = store
            .unpublish(&item.hash)
            .await
            .expect_err("second unpublish must be NotFound");
        assert!(matches!(err, PassimError::NotFound(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn share_limit_evicts_on_reaching_count() {
        let dir = tempdir().expect("tempdir");
        let store = ItemStore::new(dir.path().to_path_buf(), 1024);
        let item = store.publish(req("a", b"hello")).await.expect("publish");
        let outcome = store.record_share(&item.hash).await.expect("record share");
        assert_eq!(outcome, ShareOutcome::Evicted);
        assert!(store.get(&item.hash).is_none());
    }

    #[tokio::test]
    async fn next_reboot_item_stays_disabled_across_a_rescan_on_the_same_boot() {
        let dir = tempdir().expect("tempdir");
        let store = ItemStore::new(dir.path().to_path_buf(), 1024);
        let published = store
            .publish(PublishRequest {
                flags: Flags::NEXT_REBOOT,
                ..req("a", b"hello")
            })
            .await
            .expect("publish");
        assert!(published.is_disabled());

        let rescanned = ItemStore::new(dir.path().to_path_buf(), 1024);
        rescanned.scan_on_start(current_boot_time()).await.expect("scan");
        let found = rescanned.get(&published.hash).expect("item present after scan");
        assert!(found.is_disabled(), "item must stay disabled within the same boot");
    }

    #[tokio::test]
    async fn next_reboot_item_activates_once_the_recorded_boot_time_differs() {
        let dir = tempdir().expect("tempdir");
        let store = ItemStore::new(dir.path().to_path_buf(), 1024);
        let published = store
            .publish(PublishRequest {
                flags: Flags::NEXT_REBOOT,
                ..req("a", b"hello")
            })
            .await
            .expect("publish");

        let rescanned = ItemStore::new(dir.path().to_path_buf(), 1024);
        rescanned.scan_on_start(current_boot_time() + 1).await.expect("scan");
        let found = rescanned.get(&published.hash).expect("item present after scan");
        assert!(!found.is_disabled(), "item must activate once the boot identity changes");
    }

    #[tokio::test]
    async fn scan_on_start_reproduces_published_mapping() {
        let dir = tempdir().expect("tempdir");
        let store = ItemStore::new(dir.path().to_path_buf(), 1024);
        let item = store.publish(req("a", b"hello")).await.expect("publish");

        let rescanned = ItemStore::new(dir.path().to_path_buf(), 1024);
        rescanned.scan_on_start(0).await.expect("scan");
        let found = rescanned.get(&item.hash).expect("item present after scan");
        assert_eq!(found.basename, "a");
        assert_eq!(found.max_age, 3600);
        assert_eq!(found.share_limit, 1);
    }
}
