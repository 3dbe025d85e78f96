// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario 1 (spec §8): publish `b"hello"`, fetch it back from a
//! loopback caller, and confirm `share_count` increments exactly once.

use axum::http::{StatusCode, header};
use tempfile::tempdir;

use super::common::{LOOPBACK, get, publish, router, test_state};

const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

#[tokio::test]
async fn publish_then_loopback_fetch_serves_body_and_counts_share() {
    let data_dir = tempdir().expect("tempdir");
    let pkgdata_dir = tempdir().expect("tempdir");
    let state = test_state(data_dir.path(), pkgdata_dir.path()).await;

    let hash = publish(&state, "greet", b"hello", 5).await;
    assert_eq!(hash, HELLO_SHA256);
    assert_eq!(state.store.get(&hash).expect("item present").share_count, 0);

    let (status, headers, body) = get(
        router(state.clone()),
        &format!("/greet?sha256={hash}"),
        LOOPBACK,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"hello");
    let disposition = headers
        .get(header::CONTENT_DISPOSITION)
        .expect("content-disposition header present")
        .to_str()
        .expect("ascii header");
    assert_eq!(disposition, "attachment; filename=\"greet\"");

    assert_eq!(state.store.get(&hash).expect("item still present").share_count, 1);
}

#[tokio::test]
async fn fetch_wrong_basename_for_hash_is_not_found() {
    let data_dir = tempdir().expect("tempdir");
    let pkgdata_dir = tempdir().expect("tempdir");
    let state = test_state(data_dir.path(), pkgdata_dir.path()).await;
    let hash = publish(&state, "greet", b"hello", 5).await;

    let (status, _headers, _body) = get(
        router(state),
        &format!("/wrong-name?sha256={hash}"),
        LOOPBACK,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
