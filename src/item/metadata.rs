// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, path::PathBuf};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use zvariant::{OwnedValue, Value};

use crate::error::{PassimError, Result};

/// `max_age`/`share_limit` sentinel meaning "never expire" / "unlimited".
pub const UNLIMITED: u32 = u32::MAX;
/// Default `max_age` applied to items adopted from a scan with no xattr:
/// 24 hours.
pub const DEFAULT_MAX_AGE: u32 = 24 * 60 * 60;
/// Default `share_limit` applied when unset (`0`) on Publish, or absent on
/// scan: 5 shares.
pub const DEFAULT_SHARE_LIMIT: u32 = 5;

bitflags! {
    /// Per-item flags, persisted as a single `u32` on the wire and as the
    /// presence of the `user.boot_time` xattr (`NEXT_REBOOT`) plus an
    /// implied `DISABLED` on disk.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u32 {
        /// Item does not currently serve; excluded from Discovery
        /// registration and from remote HTTPS shares.
        const DISABLED = 0b0000_0001;
        /// Item stays `DISABLED` until the host's boot identity changes.
        const NEXT_REBOOT = 0b0000_0010;
    }
}

/// One cached file, as tracked by `ItemStore`. See spec §3 for the field
/// table and invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Lowercase hex SHA-256 of the file contents; primary key.
    pub hash: String,
    /// Filename component only (no path separators); on-disk name is
    /// `<hash>-<basename>`.
    pub basename: String,
    /// Basename of the publisher's executable; informational.
    pub cmdline: String,
    /// UTC creation time, seconds since the epoch.
    pub ctime: u64,
    /// Seconds after `ctime` at which the item expires; `UNLIMITED` means
    /// never.
    pub max_age: u32,
    /// Share count at which the item is evicted; `UNLIMITED` means no
    /// cap.
    pub share_limit: u32,
    /// Number of successful HTTPS transfers so far.
    pub share_count: u32,
    /// File size in bytes.
    pub size: u64,
    pub flags: Flags,
}

impl ItemMetadata {
    /// Full on-disk filename: `<hash>-<basename>`.
    pub fn filename(&self) -> String {
        format!("{}-{}", self.hash, self.basename)
    }

    /// Path of the item under `data_dir`.
    pub fn path_in(&self, data_dir: &std::path::Path) -> PathBuf {
        data_dir.join(self.filename())
    }

    pub fn is_disabled(&self) -> bool {
        self.flags.contains(Flags::DISABLED)
    }

    /// `true` once `now - ctime > max_age` (never for `UNLIMITED`).
    pub fn is_expired(&self, now: u64) -> bool {
        self.max_age != UNLIMITED
            && now.saturating_sub(self.ctime) > u64::from(self.max_age)
    }

    /// The full internal dict: every field in spec §3, used for the
    /// round-trip property and for debugging/introspection.
    pub fn to_full_dict(&self) -> Result<HashMap<String, OwnedValue>> {
        let mut m = HashMap::new();
        m.insert("hash".to_string(), owned_str(&self.hash)?);
        m.insert("basename".to_string(), owned_str(&self.basename)?);
        m.insert("cmdline".to_string(), owned_str(&self.cmdline)?);
        m.insert("ctime".to_string(), owned_u64(self.ctime)?);
        m.insert("max_age".to_string(), owned_u32(self.max_age)?);
        m.insert("share_limit".to_string(), owned_u32(self.share_limit)?);
        m.insert("share_count".to_string(), owned_u32(self.share_count)?);
        m.insert("size".to_string(), owned_u64(self.size)?);
        m.insert("flags".to_string(), owned_u32(self.flags.bits())?);
        Ok(m)
    }

    /// Inverse of [`Self::to_full_dict`].
    pub fn from_full_dict(dict: &HashMap<String, OwnedValue>) -> Result<Self> {
        Ok(Self {
            hash: required_str(dict, "hash")?,
            basename: required_str(dict, "basename")?,
            cmdline: get_str(dict, "cmdline").unwrap_or_default(),
            ctime: get_u64(dict, "ctime").unwrap_or(0),
            max_age: get_u32(dict, "max_age").unwrap_or(DEFAULT_MAX_AGE),
            share_limit: get_u32(dict, "share_limit").unwrap_or(DEFAULT_SHARE_LIMIT),
            share_count: get_u32(dict, "share_count").unwrap_or(0),
            size: get_u64(dict, "size").unwrap_or(0),
            flags: Flags::from_bits_truncate(get_u32(dict, "flags").unwrap_or(0)),
        })
    }

    /// The `GetItems` wire projection: exactly the 7 keys spec §4.4
    /// names (`filename`, `hash`, `cmdline`, `max-age`, `share-limit`,
    /// `share-count`, `flags`).
    pub fn to_wire_dict(&self) -> Result<HashMap<String, OwnedValue>> {
        let mut m = HashMap::new();
        m.insert("filename".to_string(), owned_str(&self.basename)?);
        m.insert("hash".to_string(), owned_str(&self.hash)?);
        m.insert("cmdline".to_string(), owned_str(&self.cmdline)?);
        m.insert("max-age".to_string(), owned_u32(self.max_age)?);
        m.insert("share-limit".to_string(), owned_u32(self.share_limit)?);
        m.insert("share-count".to_string(), owned_u32(self.share_count)?);
        m.insert("flags".to_string(), owned_u32(self.flags.bits())?);
        Ok(m)
    }
}

/// Content supplied by a publisher: exactly one of a path, an in-memory
/// buffer, or an open stream (spec §3, "storage" field).
pub enum Storage {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Stream(Box<dyn tokio::io::AsyncRead + Unpin + Send>),
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Storage::Path(p) => write!(f, "Storage::Path({p:?})"),
            Storage::Bytes(b) => write!(f, "Storage::Bytes({} bytes)", b.len()),
            Storage::Stream(_) => write!(f, "Storage::Stream(..)"),
        }
    }
}

/// The client-side builder passed to `ItemStore::publish` /
/// `ClientLibrary::publish`: everything about an item except the hash,
/// which is computed by the store from the content.
#[derive(Debug)]
pub struct PublishRequest {
    pub basename: String,
    pub max_age: u32,
    pub share_limit: u32,
    pub flags: Flags,
    pub cmdline: String,
    pub storage: Storage,
}

impl PublishRequest {
    /// Builds a `PublishRequest` from the incoming `Publish` dict (spec
    /// §4.4/§9): unknown keys are ignored; `filename` is the only
    /// required key. `share_limit = 0` is normalized to
    /// `DEFAULT_SHARE_LIMIT` (spec §9 Open Questions).
    pub fn from_dict(dict: &HashMap<String, OwnedValue>, storage: Storage) -> Result<Self> {
        let basename = required_str(dict, "filename")?;
        if basename.contains('/') {
            return Err(PassimError::InvalidArgs(
                "filename must not contain '/'".to_string(),
            ));
        }

        let mut share_limit = get_u32(dict, "share-limit").unwrap_or(DEFAULT_SHARE_LIMIT);
        if share_limit == 0 {
            share_limit = DEFAULT_SHARE_LIMIT;
        }

        let next_reboot = get_u32(dict, "flags")
            .map(|bits| Flags::from_bits_truncate(bits).contains(Flags::NEXT_REBOOT))
            .unwrap_or(false);
        let mut flags = Flags::empty();
        if next_reboot {
            flags |= Flags::NEXT_REBOOT | Flags::DISABLED;
        }

        Ok(Self {
            basename,
            max_age: get_u32(dict, "max-age").unwrap_or(DEFAULT_MAX_AGE),
            share_limit,
            flags,
            cmdline: get_str(dict, "cmdline").unwrap_or_default(),
            storage,
        })
    }
}

fn owned_str(s: &str) -> Result<OwnedValue> {
    OwnedValue::try_from(Value::from(s))
        .map_err(|e| PassimError::Transport(format!("zvariant encode failed: {e}")))
}

fn owned_u32(v: u32) -> Result<OwnedValue> {
    OwnedValue::try_from(Value::from(v))
        .map_err(|e| PassimError::Transport(format!("zvariant encode failed: {e}")))
}

fn owned_u64(v: u64) -> Result<OwnedValue> {
    OwnedValue::try_from(Value::from(v))
        .map_err(|e| PassimError::Transport(format!("zvariant encode failed: {e}")))
}

fn get_str(dict: &HashMap<String, OwnedValue>, key: &str) -> Option<String> {
    dict.get(key)
        .and_then(|v| <String>::try_from(v.clone()).ok())
}

fn required_str(dict: &HashMap<String, OwnedValue>, key: &str) -> Result<String> {
    get_str(dict, key)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PassimError::InvalidArgs(format!("missing required key {key:?}")))
}

fn get_u32(dict: &HashMap<String, OwnedValue>, key: &str) -> Option<u32> {
    dict.get(key).and_then(|v| u32::try_from(v.clone()).ok())
}

fn get_u64(dict: &HashMap<String, OwnedValue>, key: &str) -> Option<u64> {
    dict.get(key).and_then(|v| u64::try_from(v.clone()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ItemMetadata {
        ItemMetadata {
            hash: "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
                .to_string(),
            basename: "greet".to_string(),
            cmdline: "publisherd".to_string(),
            ctime: 1_700_000_000,
            max_age: 3600,
            share_limit: 5,
            share_count: 0,
            size: 5,
            flags: Flags::empty(),
        }
    }

    #[test]
    fn full_dict_round_trip_preserves_all_fields() {
        let item = sample();
        let dict = item.to_full_dict().expect("to_dict");
        let back = ItemMetadata::from_full_dict(&dict).expect("from_dict");
        assert_eq!(item.hash, back.hash);
        assert_eq!(item.basename, back.basename);
        assert_eq!(item.cmdline, back.cmdline);
        assert_eq!(item.ctime, back.ctime);
        assert_eq!(item.max_age, back.max_age);
        assert_eq!(item.share_limit, back.share_limit);
        assert_eq!(item.share_count, back.share_count);
        assert_eq!(item.size, back.size);
        assert_eq!(item.flags, back.flags);
    }

    #[test]
    fn wire_dict_has_exactly_the_documented_keys() {
        let dict = sample().to_wire_dict().expect("to_wire_dict");
        let mut keys: Vec<_> = dict.keys().cloned().collect();
        keys.sort();
        let expected = [
            "cmdline",
            "filename",
            "flags",
            "hash",
            "max-age",
            "share-count",
            "share-limit",
        ];
        assert_eq!(keys, expected);
    }

    #[test]
    fn filename_with_slash_is_rejected() {
        let mut dict = HashMap::new();
        dict.insert("filename".to_string(), owned_str("a/b").expect("encode"));
        let err = PublishRequest::from_dict(&dict, Storage::Bytes(vec![]))
            .expect_err("slash must be rejected");
        assert!(matches!(err, PassimError::InvalidArgs(_)));
    }

    #[test]
    fn missing_filename_is_rejected() {
        let dict = HashMap::new();
        let err = PublishRequest::from_dict(&dict, Storage::Bytes(vec![]))
            .expect_err("filename is required");
        assert!(matches!(err, PassimError::InvalidArgs(_)));
    }

    #[test]
    fn zero_share_limit_normalizes_to_default() {
        let mut dict = HashMap::new();
        dict.insert("filename".to_string(), owned_str("x").expect("encode"));
        dict.insert("share-limit".to_string(), owned_u32(0).expect("encode"));
        let req = PublishRequest::from_dict(&dict, Storage::Bytes(vec![])).expect("parse");
        assert_eq!(req.share_limit, DEFAULT_SHARE_LIMIT);
    }

    #[test]
    fn next_reboot_flag_implies_disabled() {
        let mut dict = HashMap::new();
        dict.insert("filename".to_string(), owned_str("x").expect("encode"));
        dict.insert(
            "flags".to_string(),
            owned_u32(Flags::NEXT_REBOOT.bits()).expect("encode"),
        );
        let req = PublishRequest::from_dict(&dict, Storage::Bytes(vec![])).expect("parse");
        assert!(req.flags.contains(Flags::NEXT_REBOOT));
        assert!(req.flags.contains(Flags::DISABLED));
    }
}
