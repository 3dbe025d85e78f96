//! The local control-plane IPC surface: the `org.freedesktop.Passim`
//! D-Bus interface (`interface`) and the reusable client (`client`),
//! spec §4.4/§4.5.

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod client;
pub mod interface;

use std::sync::Arc;

use anyhow::{Context, Result};
use zbus::connection;

use crate::state::State;
use interface::{ControlPlane, OBJECT_PATH, SERVICE_NAME};

/// Connects to the system bus, serves the `ControlPlane` interface at
/// `/`, and requests the well-known service name. Returns the live
/// connection; dropping it tears down the bus session.
pub async fn serve(state: Arc<State>) -> Result<zbus::Connection> {
    let iface = ControlPlane { state };
    let connection = connection::Builder::system()
        .context("failed to start a system bus connection builder")?
        .name(SERVICE_NAME)
        .context("failed to reserve well-known bus name")?
        .serve_at(OBJECT_PATH, iface)
        .context("failed to serve ControlPlane at /")?
        .build()
        .await
        .context("failed to establish system bus connection")?;
    Ok(connection)
}
