//! DNS-SD registration and lookup of cached items on the link-local
//! network (spec §4.2).

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashSet,
    net::IpAddr,
    sync::Mutex,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, info, warn};

/// Base DNS-SD service type every instance registers under.
pub const SERVICE_TYPE: &str = "_cache._tcp.local.";

/// How long `Find` waits for `SearchStopped`/`AllForNow` before giving up.
const FIND_TIMEOUT: Duration = Duration::from_secs(3);

/// Truncates a hex hash to the 60 characters a DNS-SD subtype label can
/// carry (labels are capped at 63 bytes; `_`, `.`, and the `_sub` framing
/// consume the rest).
pub fn subtype_label(hash: &str) -> String {
    let truncated = &hash[..hash.len().min(60)];
    format!("_{truncated}._sub.{SERVICE_TYPE}")
}

/// Owns the mDNS responder/browser and the instance identity advertised
/// on the network.
pub struct Discovery {
    daemon: ServiceDaemon,
    instance_name: String,
    port: u16,
    registered: Mutex<bool>,
}

impl Discovery {
    pub fn new(instance_name: String, port: u16) -> Result<Self> {
        let daemon = ServiceDaemon::new().context("failed to start mDNS responder")?;
        Ok(Self {
            daemon,
            instance_name,
            port,
            registered: Mutex::new(false),
        })
    }

    /// (Re-)registers the service record and a subtype for every hash in
    /// `hashes` (non-disabled items only). Equivalent to the spec's
    /// Reset → AddService → AddServiceSubtype* → Commit transaction:
    /// `mdns-sd` re-registration under the same fullname replaces the
    /// previous record set atomically from the browser's point of view.
    pub fn register(&self, hashes: &[String]) -> Result<()> {
        let host_ip: IpAddr = "0.0.0.0".parse().expect("valid literal IP");
        let hostname = format!("{}.local.", self.instance_name);

        let subtypes: Vec<String> = hashes.iter().map(|h| subtype_label(h)).collect();
        let mut properties = vec![];
        if !subtypes.is_empty() {
            properties.push(("subtypes", subtypes.len().to_string()));
        }

        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &self.instance_name,
            &hostname,
            host_ip,
            self.port,
            &properties[..],
        )
        .context("failed to build mDNS service record")?
        .enable_addr_auto();

        self.daemon
            .register(info)
            .context("failed to register base service")?;

        for sub in &subtypes {
            let sub_info = ServiceInfo::new(
                sub,
                &self.instance_name,
                &hostname,
                host_ip,
                self.port,
                &[][..],
            )
            .context("failed to build mDNS subtype record")?
            .enable_addr_auto();
            self.daemon
                .register(sub_info)
                .context("failed to register service subtype")?;
        }

        *self.registered.lock().unwrap_or_else(|e| e.into_inner()) = true;
        info!(
            "registered {} as {} with {} subtype(s)",
            self.instance_name,
            SERVICE_TYPE,
            subtypes.len()
        );
        Ok(())
    }

    /// Unregisters everything previously registered (metered-network ON
    /// transition, or shutdown).
    pub fn unregister(&self) -> Result<()> {
        let fullname = format!("{}.{SERVICE_TYPE}", self.instance_name);
        if let Err(e) = self.daemon.unregister(&fullname) {
            warn!("failed to unregister {fullname}: {e}");
        }
        *self.registered.lock().unwrap_or_else(|e| e.into_inner()) = false;
        Ok(())
    }

    /// Looks up peers advertising `hash`, deduplicated by socket address
    /// string, bracketing IPv6 literals. Returns `NotFound` (via an empty
    /// vec turning into an error at the call site) once the browser
    /// reports `SearchStopped`/`AllForNow` with nothing collected.
    pub async fn find(&self, hash: &str) -> Result<Vec<String>> {
        let sub = subtype_label(hash);
        let receiver = self
            .daemon
            .browse(&sub)
            .context("failed to start mDNS browse")?;

        let mut addrs = HashSet::new();
        let deadline = tokio::time::Instant::now() + FIND_TIMEOUT;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let event = match tokio::time::timeout(remaining, receiver.recv_async()).await {
                Ok(Ok(event)) => event,
                Ok(Err(_)) => break,
                Err(_) => break,
            };

            match event {
                ServiceEvent::ServiceResolved(info) => {
                    for ip in info.get_addresses() {
                        addrs.insert(format_addr(*ip, info.get_port()));
                    }
                },
                ServiceEvent::SearchStopped(_) => break,
                other => debug!("find({hash}): ignoring event {other:?}"),
            }
        }

        let _ = self.daemon.stop_browse(&sub);
        Ok(addrs.into_iter().collect())
    }

    pub fn is_registered(&self) -> bool {
        *self.registered.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn format_addr(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    }
}

/// Validates that an instance name looks like `"<pkg>-XXXX"` (four
/// uppercase hex digits), as required by spec §6.
pub fn validate_instance_name(name: &str) -> Result<()> {
    let Some((_, suffix)) = name.rsplit_once('-') else {
        bail!("instance name {name:?} has no '-XXXX' suffix");
    };
    if suffix.len() != 4 || !suffix.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_lowercase())
    {
        bail!("instance name suffix {suffix:?} is not four uppercase hex digits");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_label_truncates_to_sixty_chars() {
        let hash = "a".repeat(64);
        let label = subtype_label(&hash);
        assert_eq!(label, format!("_{}._sub.{SERVICE_TYPE}", "a".repeat(60)));
    }

    #[test]
    fn subtype_label_passes_through_short_hash() {
        let label = subtype_label("deadbeef");
        assert_eq!(label, format!("_deadbeef._sub.{SERVICE_TYPE}"));
    }

    #[test]
    fn format_addr_brackets_ipv6() {
        let v6: IpAddr = "::1".parse().expect("valid literal");
        assert_eq!(format_addr(v6, 27500), "[::1]:27500");
        let v4: IpAddr = "192.0.2.5".parse().expect("valid literal");
        assert_eq!(format_addr(v4, 27500), "192.0.2.5:27500");
    }

    #[test]
    fn validate_instance_name_accepts_well_formed() {
        assert!(validate_instance_name("Passim-AB12").is_ok());
    }

    #[test]
    fn validate_instance_name_rejects_lowercase_suffix() {
        assert!(validate_instance_name("Passim-ab12").is_err());
    }

    #[test]
    fn validate_instance_name_rejects_missing_suffix() {
        assert!(validate_instance_name("Passim").is_err());
    }
}
