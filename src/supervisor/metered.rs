//! Watches `org.freedesktop.NetworkManager`'s `Metered` property over the
//! system bus and republishes it as a `tokio::sync::watch` bool, feeding
//! `LifecycleSupervisor`'s `Running <-> DisabledMetered` transition (spec
//! §4.6). This is the daemon's own signal path, not one of spec §1's
//! named external collaborators (responder, TLS library, local bus
//! itself, cert generator, CLI parsing) — NetworkManager detection is
//! core surface the daemon owns.

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tokio::sync::watch;
use tracing::{debug, warn};
use zbus::{Connection, proxy};

/// NM's `Metered` enum: 0 unknown, 1 yes, 2 no, 3 guess-yes, 4 guess-no.
/// Values 1 and 3 are treated as metered, matching NetworkManager's own
/// "guess" semantics for clients that only care about a boolean.
fn is_metered_value(v: u32) -> bool {
    matches!(v, 1 | 3)
}

#[proxy(
    interface = "org.freedesktop.NetworkManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager"
)]
trait NetworkManager {
    #[zbus(property)]
    fn metered(&self) -> zbus::Result<u32>;
}

/// Connects to the system bus, reads the initial `Metered` value, and
/// spawns a task that republishes every subsequent change onto the
/// returned receiver. If NetworkManager is unreachable (no system bus,
/// no NM running, as in most test/container sandboxes), returns a
/// receiver fixed at `false` and logs a warning — publishing is simply
/// never suspended, which is the safe default absent better information.
pub async fn watch() -> watch::Receiver<bool> {
    match try_watch().await {
        Ok(rx) => rx,
        Err(e) => {
            warn!("metered-network watcher unavailable, assuming unmetered: {e}");
            watch::channel(false).1
        },
    }
}

async fn try_watch() -> anyhow::Result<watch::Receiver<bool>> {
    let connection = Connection::system().await?;
    let proxy = NetworkManagerProxy::new(&connection).await?;
    let initial = is_metered_value(proxy.metered().await?);

    let (tx, rx) = watch::channel(initial);
    tokio::spawn(async move {
        let Ok(mut changes) = proxy.receive_metered_changed().await else {
            return;
        };
        use futures_util::StreamExt;
        while let Some(change) = changes.next().await {
            let Ok(value) = change.get().await else {
                continue;
            };
            let metered = is_metered_value(value);
            debug!("NetworkManager Metered changed to {value} (metered={metered})");
            if tx.send(metered).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_and_guess_yes_are_metered() {
        assert!(is_metered_value(1));
        assert!(is_metered_value(3));
    }

    #[test]
    fn no_guess_no_and_unknown_are_not_metered() {
        assert!(!is_metered_value(0));
        assert!(!is_metered_value(2));
        assert!(!is_metered_value(4));
    }
}
