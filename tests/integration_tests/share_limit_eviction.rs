// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario 2 (spec §8): the transfer that brings `share_count` to
//! `share_limit` evicts the item; the store is empty afterwards.

use axum::http::StatusCode;
use passim::item::{Flags, PublishRequest, Storage};
use tempfile::tempdir;

use super::common::{LOOPBACK, get, publish, router, test_state};

#[tokio::test]
async fn reaching_share_limit_evicts_the_item() {
    let data_dir = tempdir().expect("tempdir");
    let pkgdata_dir = tempdir().expect("tempdir");
    let state = test_state(data_dir.path(), pkgdata_dir.path()).await;

    let hash = publish(&state, "greet", b"hello", 1).await;

    let (status, _headers, body) = get(
        router(state.clone()),
        &format!("/greet?sha256={hash}"),
        LOOPBACK,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"hello");
    assert!(state.store.get(&hash).is_none(), "item must be evicted after reaching its share limit");
    assert!(state.store.enumerate().is_empty());

    let path = hash.clone() + "-greet";
    assert!(
        !data_dir.path().join(path).exists(),
        "on-disk file must be removed along with the mapping entry"
    );
}

#[tokio::test]
async fn next_reboot_item_is_locked_until_boot_changes() {
    let data_dir = tempdir().expect("tempdir");
    let pkgdata_dir = tempdir().expect("tempdir");
    let state = test_state(data_dir.path(), pkgdata_dir.path()).await;

    let req = PublishRequest {
        basename: "greet".to_string(),
        max_age: 3600,
        share_limit: 5,
        flags: Flags::NEXT_REBOOT,
        cmdline: "test-publisher".to_string(),
        storage: Storage::Bytes(b"hello".to_vec()),
    };
    let item = state.store.publish(req).await.expect("publish");
    assert!(item.is_disabled());

    let (status, _headers, _body) = get(
        router(state),
        &format!("/greet?sha256={}", item.hash),
        LOOPBACK,
    )
    .await;

    assert_eq!(status, StatusCode::LOCKED);
}
