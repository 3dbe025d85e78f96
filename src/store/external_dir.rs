// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Adopts package-managed directories named by `passim.d/*.conf` fragments
//! into the cache as non-expiring, never-shared-out items (spec §3
//! "External directories", §4.1 "External-directory scan").

use std::{path::Path, sync::Arc, time::Duration};

use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    cfg::config::parse_ini,
    item::metadata::{ItemMetadata, UNLIMITED},
    store::{ItemStore, XATTR_CHECKSUM},
};

/// Debounce window for external-directory change notifications (spec
/// §3: 500 ms).
pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// Reads every `*.conf` fragment in `fragment_dir`, extracts the
/// `[passim] Path=<dir>` entry from each, and returns the list of
/// adopted-content directories.
pub fn read_fragment_dirs(fragment_dir: &Path) -> Vec<std::path::PathBuf> {
    let Ok(rd) = std::fs::read_dir(fragment_dir) else {
        return Vec::new();
    };

    let mut dirs = Vec::new();
    for entry in rd.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("conf") {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let groups = parse_ini(&content);
        if let Some(dir) = groups.get("passim").and_then(|g| g.get("Path")) {
            dirs.push(std::path::PathBuf::from(dir));
        }
    }
    dirs
}

/// Adopts every regular file under each of `dirs` into `store`, computing
/// (or reusing, via the `user.checksum.sha256` xattr) its content hash.
/// Previously-adopted items (identified by the `max_age = share_limit =
/// UNLIMITED` sentinel) are removed first, so this is safe to call
/// repeatedly for a full re-scan.
pub async fn rescan(store: &ItemStore, dirs: &[std::path::PathBuf]) {
    store.remove_all_adopted();

    for dir in dirs {
        let Ok(mut rd) = tokio::fs::read_dir(dir).await else {
            warn!("sysconfpkgdir entry {dir:?} is not readable, skipping");
            continue;
        };
        while let Ok(Some(entry)) = rd.next_entry().await {
            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            match adopt_one(&path).await {
                Ok(item) => store.insert_adopted(item),
                Err(e) => warn!("failed to adopt {path:?}: {e}"),
            }
        }
    }
    info!(
        "adopted {} external items from {} sysconfpkgdir entries",
        store.enumerate().iter().filter(|i| i.max_age == UNLIMITED).count(),
        dirs.len()
    );
}

async fn adopt_one(path: &Path) -> anyhow::Result<ItemMetadata> {
    use anyhow::Context;

    let meta = tokio::fs::metadata(path).await.context("stat adopted file")?;
    let basename = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("adopted file has no basename")?
        .to_string();

    let hash = match crate::xattr_store::get_string_opt(path, XATTR_CHECKSUM)? {
        Some(h) if h.len() == 64 => h,
        _ => {
            let bytes = tokio::fs::read(path).await.context("read adopted file")?;
            let computed = {
                use sha2::{Digest, Sha256};
                hex::encode(Sha256::digest(&bytes))
            };
            crate::xattr_store::set_string(path, XATTR_CHECKSUM, &computed)?;
            computed
        },
    };

    Ok(ItemMetadata {
        hash,
        basename,
        cmdline: String::new(),
        ctime: meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0),
        max_age: UNLIMITED,
        share_limit: UNLIMITED,
        share_count: 0,
        size: meta.len(),
        flags: crate::item::metadata::Flags::empty(),
    })
}

/// Spawns a background task that watches `fragment_dir` for changes,
/// debounced by [`DEBOUNCE`], and re-scans all adopted directories on
/// each settled batch of events. Returns a handle that, when dropped,
/// stops the watcher.
pub fn spawn_watcher(
    store: Arc<ItemStore>,
    fragment_dir: std::path::PathBuf,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut debouncer = new_debouncer(DEBOUNCE, move |res: DebounceEventResult| {
        let _ = tx.send(res);
    })?;

    if fragment_dir.exists() {
        debouncer
            .watcher()
            .watch(&fragment_dir, notify::RecursiveMode::NonRecursive)?;
    }

    let handle = tokio::spawn(async move {
        // Keep the debouncer alive for the task's lifetime.
        let _debouncer = debouncer;
        while let Some(res) = rx.recv().await {
            match res {
                Ok(events) if events.is_empty() => continue,
                Ok(_) => {
                    let dirs = read_fragment_dirs(&fragment_dir);
                    rescan(&store, &dirs).await;
                },
                Err(e) => warn!("sysconfpkgdir watch error: {e:?}"),
            }
        }
    });

    Ok(handle)
}
