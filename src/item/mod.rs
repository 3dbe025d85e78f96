//! The in-memory representation of one cached file (`ItemMetadata`) and
//! its serialization to/from the string-keyed variant dictionary used on
//! the control-plane wire.

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod metadata;

pub use metadata::{Flags, ItemMetadata, PublishRequest, Storage};
