//! HTTPS request router: the single handler described in spec §4.3,
//! including the share-path state machine and the loopback-gating
//! policy.

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

mod index;
pub mod tls;

use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, OriginalUri, Path, Query, State},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures_util::Stream;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{instrument, warn};

use crate::state::State as AppState;

#[derive(Debug, Deserialize)]
struct ShareQuery {
    sha256: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", any(index_handler))
        .route("/style.css", any(asset_handler))
        .route("/favicon.ico", any(asset_handler))
        .route("/:basename", any(share_handler))
        .with_state(state)
}

/// Every route here is GET-only; spec §4.3 requires any other method to
/// be rejected with 403 rather than axum's default 405.
fn reject_non_get(method: &Method) -> Option<Response> {
    if method != Method::GET {
        Some(forbidden())
    } else {
        None
    }
}

fn is_loopback(addr: &SocketAddr) -> bool {
    addr.ip().is_loopback()
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "403 Forbidden\n").into_response()
}

#[instrument(skip(state))]
async fn index_handler(
    method: Method,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if let Some(resp) = reject_non_get(&method) {
        return resp;
    }
    if !is_loopback(&peer) {
        return forbidden();
    }
    let items = state.store.enumerate();
    axum::response::Html(index::render(&items, state.carbon_saving(), state.download_saving()))
        .into_response()
}

#[instrument(skip(state))]
async fn asset_handler(
    method: Method,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    OriginalUri(uri): OriginalUri,
) -> Response {
    if let Some(resp) = reject_non_get(&method) {
        return resp;
    }
    if !is_loopback(&peer) {
        return forbidden();
    }
    let name = uri.path().trim_start_matches('/');
    let path = state.pkgdatadir.join(name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let content_type = if name.ends_with(".css") {
                "text/css"
            } else {
                "image/vnd.microsoft.icon"
            };
            let mut resp = Response::new(Body::from(bytes));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(content_type),
            );
            resp
        },
        Err(_) => (StatusCode::NOT_FOUND, "404 Not Found\n").into_response(),
    }
}

/// Implements the share-path state machine of spec §4.3.
#[instrument(skip(state))]
async fn share_handler(
    method: Method,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(basename): Path<String>,
    Query(query): Query<ShareQuery>,
) -> Response {
    if let Some(resp) = reject_non_get(&method) {
        return resp;
    }
    let loopback = is_loopback(&peer);

    let Some(hash) = query.sha256 else {
        return (
            StatusCode::BAD_REQUEST,
            "400 Bad Request: missing sha256 query parameter\n",
        )
            .into_response();
    };

    if !is_sha256_hex(&hash) {
        return (
            StatusCode::NOT_ACCEPTABLE,
            "406 Not Acceptable: malformed hash\n",
        )
            .into_response();
    }

    match state.store.get(&hash) {
        Some(item) if item.is_disabled() => {
            (StatusCode::LOCKED, "423 Locked: item is currently disabled\n").into_response()
        },
        Some(item) => stream_item(Arc::clone(&state), &item).await,
        None if !loopback => forbidden(),
        None => match state.discovery.find(&hash).await {
            Ok(addrs) if addrs.is_empty() => {
                (StatusCode::NOT_FOUND, "404 Not Found\n").into_response()
            },
            Ok(addrs) => {
                let chosen = addrs
                    .choose(&mut rand::rng())
                    .expect("non-empty address list has a random element");
                let location = format!("https://{chosen}/{basename}?sha256={hash}");
                (
                    StatusCode::SEE_OTHER,
                    [(header::LOCATION, location)],
                    "303 See Other\n",
                )
                    .into_response()
            },
            Err(e) => {
                warn!("discovery find failed for {hash}: {e}");
                (StatusCode::BAD_GATEWAY, "502 Bad Gateway: discovery failed\n").into_response()
            },
        },
    }
}

/// Streams the item's file as the response body rather than buffering it
/// into a `Vec` (spec §4.3/§5: "streamed via memory mapping or equivalent
/// zero-copy"; see the original's `g_output_stream_splice`). The item is
/// matched purely by hash — `requested_basename` (used only for the
/// `Location`/`Content-Disposition` of the caller that asked for it) is
/// not compared against `item.basename`, matching the source's by-hash
/// lookup.
async fn stream_item(state: Arc<AppState>, item: &crate::item::ItemMetadata) -> Response {
    let path = item.path_in(state.store.data_dir());
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            warn!("failed to open {path:?} for share: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error\n")
                .into_response();
        },
    };

    let body = Body::from_stream(ShareAccountingStream {
        inner: ReaderStream::new(file),
        state,
        hash: item.hash.clone(),
        len: item.size,
        phase: SharePhase::Streaming,
    });

    let mut resp = Response::new(body);
    resp.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!(
            "attachment; filename=\"{}\"",
            item.basename
        ))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    resp
}

/// Wraps a file [`ReaderStream`], crediting the share only once the
/// stream reaches natural end-of-file — i.e. once every byte has been
/// handed to the transport. A connection cut short mid-stream drops this
/// stream before `poll_next` ever observes `None` from the inner reader,
/// so `record_share` never runs, matching spec §5's "does NOT count as a
/// share if cut off mid-stream" ordering. `record_share` itself is driven
/// to completion in-line (rather than spawned) so the body is not
/// reported `None` — i.e. the transfer is not considered complete by
/// whoever is consuming the response — until the accounting has landed.
struct ShareAccountingStream {
    inner: ReaderStream<tokio::fs::File>,
    state: Arc<AppState>,
    hash: String,
    len: u64,
    phase: SharePhase,
}

enum SharePhase {
    Streaming,
    Accounting(Pin<Box<dyn Future<Output = ()> + Send>>),
    Done,
}

impl Stream for ShareAccountingStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.phase {
                SharePhase::Streaming => match Pin::new(&mut this.inner).poll_next(cx) {
                    Poll::Ready(None) => {
                        this.phase = SharePhase::Accounting(Box::pin(record_share(
                            Arc::clone(&this.state),
                            this.hash.clone(),
                            this.len,
                        )));
                    },
                    other => return other,
                },
                SharePhase::Accounting(fut) => match fut.as_mut().poll(cx) {
                    Poll::Ready(()) => {
                        this.phase = SharePhase::Done;
                        return Poll::Ready(None);
                    },
                    Poll::Pending => return Poll::Pending,
                },
                SharePhase::Done => return Poll::Ready(None),
            }
        }
    }
}

/// Runs after a share's body has been fully streamed to the transport:
/// credits `DownloadSaving` and increments `share_count`, evicting the
/// item (and notifying Discovery) if this transfer reaches `share_limit`.
async fn record_share(state: Arc<AppState>, hash: String, len: u64) {
    state.add_download_saving(len);
    match state.store.record_share(&hash).await {
        Ok(crate::store::ShareOutcome::Evicted) => state.notify_changed().await,
        Ok(crate::store::ShareOutcome::Continues) => {},
        Err(e) => warn!("failed to record share for {hash}: {e}"),
    }
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
