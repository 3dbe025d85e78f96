// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Typed extended-attribute access with a "missing → fallback" policy and
//! a hard failure on corrupted values, as required by spec §4.1/§6.

use std::path::Path;

use crate::error::{PassimError, Result};

/// Reads a `user.*` xattr as a little-endian `u32`. Returns `fallback`
/// when the attribute is absent; fails with `CorruptData` when present
/// but not exactly 4 bytes.
pub fn get_u32(path: &Path, name: &str, fallback: u32) -> Result<u32> {
    match xattr::get(path, name)? {
        None => Ok(fallback),
        Some(bytes) => {
            let arr: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                PassimError::CorruptData(format!(
                    "xattr {name} on {path:?} is {} bytes, expected 4",
                    bytes.len()
                ))
            })?;
            Ok(u32::from_le_bytes(arr))
        },
    }
}

/// Writes a `user.*` xattr as a little-endian `u32`.
pub fn set_u32(path: &Path, name: &str, value: u32) -> Result<()> {
    xattr::set(path, name, &value.to_le_bytes())?;
    Ok(())
}

/// Reads a `user.*` xattr as UTF-8 text. Returns `fallback` when absent;
/// fails with `CorruptData` when present but not valid UTF-8.
pub fn get_string(path: &Path, name: &str, fallback: &str) -> Result<String> {
    match xattr::get(path, name)? {
        None => Ok(fallback.to_string()),
        Some(bytes) => String::from_utf8(bytes).map_err(|_| {
            PassimError::CorruptData(format!("xattr {name} on {path:?} is not valid UTF-8"))
        }),
    }
}

/// Reads a `user.*` xattr as UTF-8 text, returning `None` when absent.
pub fn get_string_opt(path: &Path, name: &str) -> Result<Option<String>> {
    match xattr::get(path, name)? {
        None => Ok(None),
        Some(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| {
                PassimError::CorruptData(format!("xattr {name} on {path:?} is not valid UTF-8"))
            }),
    }
}

/// Writes a `user.*` xattr as UTF-8 text.
pub fn set_string(path: &Path, name: &str, value: &str) -> Result<()> {
    xattr::set(path, name, value.as_bytes())?;
    Ok(())
}

/// Removes a `user.*` xattr if present; absence is not an error.
pub fn remove(path: &Path, name: &str) -> Result<()> {
    match xattr::remove(path, name) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn u32_roundtrip() {
        let f = NamedTempFile::new().expect("tmp file");
        set_u32(f.path(), "user.max_age", 3600).expect("set");
        assert_eq!(get_u32(f.path(), "user.max_age", 0).expect("get"), 3600);
    }

    #[test]
    fn u32_missing_uses_fallback() {
        let f = NamedTempFile::new().expect("tmp file");
        assert_eq!(get_u32(f.path(), "user.absent", 42).expect("get"), 42);
    }

    #[test]
    fn string_roundtrip() {
        let f = NamedTempFile::new().expect("tmp file");
        set_string(f.path(), "user.cmdline", "passimd").expect("set");
        assert_eq!(
            get_string(f.path(), "user.cmdline", "").expect("get"),
            "passimd"
        );
    }

    #[test]
    fn corrupt_u32_length_is_rejected() {
        let f = NamedTempFile::new().expect("tmp file");
        xattr::set(f.path(), "user.max_age", b"12345").expect("raw set");
        assert!(get_u32(f.path(), "user.max_age", 0).is_err());
    }
}
