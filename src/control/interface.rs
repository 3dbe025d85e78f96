//! The `org.freedesktop.Passim` D-Bus interface implementation (spec
//! §4.4).

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, sync::Arc};

use tracing::{info, warn};
use zbus::{SignalContext, fdo, interface, zvariant::OwnedValue};

use crate::{
    item::{PublishRequest, Storage},
    state::State,
};

pub const SERVICE_NAME: &str = "org.freedesktop.Passim";
pub const OBJECT_PATH: &str = "/";

pub struct ControlPlane {
    pub state: Arc<State>,
}

#[interface(name = "org.freedesktop.Passim")]
impl ControlPlane {
    async fn get_items(&self) -> fdo::Result<Vec<HashMap<String, OwnedValue>>> {
        self.state
            .store
            .enumerate()
            .iter()
            .map(|item| item.to_wire_dict().map_err(Into::into))
            .collect()
    }

    async fn publish(
        &self,
        #[zbus(connection)] connection: &zbus::Connection,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(signal_context)] ctxt: SignalContext<'_>,
        fd: zbus::zvariant::OwnedFd,
        item: HashMap<String, OwnedValue>,
    ) -> fdo::Result<()> {
        require_root(connection, &header).await?;
        let cmdline = caller_cmdline(connection, &header).await.unwrap_or_default();

        let file = std::fs::File::from(fd);
        let storage = Storage::Stream(Box::new(tokio::fs::File::from_std(file)));
        let mut req = PublishRequest::from_dict(&item, storage)?;
        req.cmdline = cmdline;

        let published = self.state.store.publish(req).await?;
        info!("published {} via control plane", published.hash);
        self.state.notify_changed().await;
        Self::changed(&ctxt).await.ok();
        Ok(())
    }

    async fn unpublish(
        &self,
        #[zbus(connection)] connection: &zbus::Connection,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(signal_context)] ctxt: SignalContext<'_>,
        hash: String,
    ) -> fdo::Result<()> {
        require_root(connection, &header).await?;
        self.state.store.unpublish(&hash).await?;
        info!("unpublished {hash} via control plane");
        self.state.notify_changed().await;
        Self::changed(&ctxt).await.ok();
        Ok(())
    }

    #[zbus(property)]
    async fn daemon_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    #[zbus(property)]
    async fn status(&self) -> u32 {
        self.state.status().await as u32
    }

    #[zbus(property)]
    async fn download_saving(&self) -> u64 {
        self.state.download_saving()
    }

    #[zbus(property)]
    async fn carbon_saving(&self) -> f64 {
        self.state.carbon_saving()
    }

    #[zbus(property)]
    async fn name(&self) -> String {
        self.state.instance_name.clone()
    }

    #[zbus(property)]
    async fn uri(&self) -> String {
        self.state.uri()
    }

    #[zbus(signal)]
    async fn changed(ctxt: &SignalContext<'_>) -> zbus::Result<()>;
}

async fn caller_unix_user(connection: &zbus::Connection, header: &zbus::message::Header<'_>) -> fdo::Result<u32> {
    let Some(sender) = header.sender() else {
        return Err(fdo::Error::AccessDenied("request has no sender".to_string()));
    };
    let proxy = fdo::DBusProxy::new(connection).await?;
    proxy.get_connection_unix_user(sender.to_owned().into()).await
}

async fn require_root(connection: &zbus::Connection, header: &zbus::message::Header<'_>) -> fdo::Result<()> {
    let uid = caller_unix_user(connection, header).await?;
    if uid != 0 {
        return Err(fdo::Error::AccessDenied(format!(
            "caller uid {uid} is not permitted to modify the published set"
        )));
    }
    Ok(())
}

/// Resolves the caller's process basename via `/proc/<pid>/cmdline`
/// (spec §4.4 "overriding any caller-supplied value").
async fn caller_cmdline(connection: &zbus::Connection, header: &zbus::message::Header<'_>) -> Option<String> {
    let sender = header.sender()?;
    let proxy = fdo::DBusProxy::new(connection).await.ok()?;
    let pid = proxy
        .get_connection_unix_process_id(sender.to_owned().into())
        .await
        .ok()?;
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let first = raw.split(|b| *b == 0).next()?;
    let path = std::str::from_utf8(first).ok()?;
    std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
        .or_else(|| {
            warn!("could not derive a cmdline basename for pid {pid}");
            None
        })
}
