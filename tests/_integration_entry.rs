// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

#![allow(clippy::all)]

mod integration_tests {
    pub mod common;

    pub mod invalid_hash;
    pub mod local_publish_and_fetch;
    pub mod remote_fetch_gating;
    pub mod share_limit_eviction;
}
