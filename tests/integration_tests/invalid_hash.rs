// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario 5 (spec §8): a malformed `sha256` query value is rejected
//! with `406 Not Acceptable` before any store lookup happens.

use axum::http::StatusCode;
use tempfile::tempdir;

use super::common::{LOOPBACK, get, router, test_state};

#[tokio::test]
async fn malformed_hash_is_rejected_with_406() {
    let data_dir = tempdir().expect("tempdir");
    let pkgdata_dir = tempdir().expect("tempdir");
    let state = test_state(data_dir.path(), pkgdata_dir.path()).await;

    let (status, _headers, body) = get(router(state), "/x?sha256=ZZ", LOOPBACK).await;

    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
    let body = String::from_utf8(body.to_vec()).expect("utf8 body");
    assert!(body.to_lowercase().contains("malformed"));
}

#[tokio::test]
async fn missing_hash_query_is_bad_request() {
    let data_dir = tempdir().expect("tempdir");
    let pkgdata_dir = tempdir().expect("tempdir");
    let state = test_state(data_dir.path(), pkgdata_dir.path()).await;

    let (status, _headers, _body) = get(router(state), "/x", LOOPBACK).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
