// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::{Body, Bytes},
    extract::ConnectInfo,
    http::{HeaderMap, Request, StatusCode},
};
use http_body_util::BodyExt;
use passim::{
    cfg::config::{Config, DaemonConfig},
    discovery::Discovery,
    http as passim_http,
    item::{Flags, PublishRequest, Storage},
    state::State,
    store::ItemStore,
};
use tower::ServiceExt;

pub const LOOPBACK: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 54321);
pub const REMOTE: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::new(192, 0, 2, 7)), 54321);

/// Builds a `State` rooted at a scratch data directory, with a real (but
/// unbound, port 0) `Discovery` responder — sufficient for exercising the
/// HTTPS share-path state machine without a live network.
pub async fn test_state(data_dir: &std::path::Path, pkgdatadir: &std::path::Path) -> Arc<State> {
    let store = Arc::new(ItemStore::new(data_dir.to_path_buf(), 10 * 1024 * 1024));
    store.scan_on_start(0).await.expect("scan_on_start");
    let discovery = Discovery::new("Passim-TEST".to_string(), 0).expect("discovery");
    let config = Config {
        daemon: DaemonConfig {
            path: data_dir.to_path_buf(),
            ..Default::default()
        },
        logger: Default::default(),
    };
    Arc::new(State::new(
        config,
        store,
        discovery,
        pkgdatadir.to_path_buf(),
        "Passim-TEST".to_string(),
    ))
}

/// Publishes `bytes` directly through the store (bypassing the control
/// plane's UID check, which is not under test here) and returns the
/// resulting item's hash.
pub async fn publish(state: &State, basename: &str, bytes: &[u8], share_limit: u32) -> String {
    let req = PublishRequest {
        basename: basename.to_string(),
        max_age: 3600,
        share_limit,
        flags: Flags::empty(),
        cmdline: "test-publisher".to_string(),
        storage: Storage::Bytes(bytes.to_vec()),
    };
    let item = state.store.publish(req).await.expect("publish");
    item.hash
}

pub async fn get(
    router: Router,
    path_and_query: &str,
    peer: SocketAddr,
) -> (StatusCode, HeaderMap, Bytes) {
    let mut req = Request::builder()
        .method("GET")
        .uri(path_and_query)
        .body(Body::empty())
        .expect("build request");
    req.extensions_mut().insert(ConnectInfo(peer));

    let resp = router.oneshot(req).await.expect("router is infallible");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    (status, headers, body)
}

pub fn router(state: Arc<State>) -> Router {
    passim_http::router(state)
}
