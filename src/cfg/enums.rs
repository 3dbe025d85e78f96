// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of the daemon, mirrored on the control plane as
/// `Status: uint32`.
///
/// Drives `LifecycleSupervisor`'s state machine: `Starting` until the bus
/// name is acquired and the store scanned, `Loading` until the HTTPS
/// listener is up and Discovery has registered, then `Running` until a
/// metered-network transition flips it to `DisabledMetered` and back.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    #[default]
    Unknown = 0,
    Starting = 1,
    Loading = 2,
    Running = 3,
    DisabledMetered = 4,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Unknown => "unknown",
            Status::Starting => "starting",
            Status::Loading => "loading",
            Status::Running => "running",
            Status::DisabledMetered => "disabled-metered",
        })
    }
}

/// Output destination for the structured logger, read from `[logger]`.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    #[default]
    Stderr,
    File,
}
