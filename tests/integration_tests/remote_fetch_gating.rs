// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario 4 (spec §8): a non-loopback GET for a hash absent from the
//! store is rejected with `403`, never `404` — and never falls through
//! to Discovery. `/`, `/style.css`, and `/favicon.ico` are gated the
//! same way for any remote caller regardless of hash.

use axum::http::StatusCode;
use tempfile::tempdir;

use super::common::{LOOPBACK, REMOTE, get, publish, router, test_state};

const UNKNOWN_HASH: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

#[tokio::test]
async fn remote_miss_is_forbidden_not_not_found() {
    let data_dir = tempdir().expect("tempdir");
    let pkgdata_dir = tempdir().expect("tempdir");
    let state = test_state(data_dir.path(), pkgdata_dir.path()).await;

    let (status, _headers, _body) =
        get(router(state), &format!("/x?sha256={UNKNOWN_HASH}"), REMOTE).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn remote_caller_cannot_see_the_index() {
    let data_dir = tempdir().expect("tempdir");
    let pkgdata_dir = tempdir().expect("tempdir");
    let state = test_state(data_dir.path(), pkgdata_dir.path()).await;

    let (status, _headers, _body) = get(router(state), "/", REMOTE).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn remote_caller_can_still_fetch_an_enabled_published_hash() {
    let data_dir = tempdir().expect("tempdir");
    let pkgdata_dir = tempdir().expect("tempdir");
    let state = test_state(data_dir.path(), pkgdata_dir.path()).await;
    let hash = publish(&state, "greet", b"hello", 5).await;

    let (status, _headers, body) = get(
        router(state),
        &format!("/greet?sha256={hash}"),
        REMOTE,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"hello");
}

#[tokio::test]
async fn loopback_index_is_served() {
    let data_dir = tempdir().expect("tempdir");
    let pkgdata_dir = tempdir().expect("tempdir");
    let state = test_state(data_dir.path(), pkgdata_dir.path()).await;

    let (status, _headers, body) = get(router(state), "/", LOOPBACK).await;

    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).contains("passim"));
}
