// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Error taxonomy shared by the item store, discovery, the HTTPS front and
/// the control plane. Hot-path occurrences are converted to an HTTP status
/// code or a D-Bus error name; background-sweeper occurrences are logged
/// and swallowed.
#[derive(thiserror::Error, Debug)]
pub enum PassimError {
    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("stream too large, limit is {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("corrupt data: {0}")]
    CorruptData(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PassimError {
    /// Maps a `PassimError` to the HTTP status code spec §7 requires.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PassimError::InvalidArgs(_) => StatusCode::BAD_REQUEST,
            PassimError::NotFound(_) => StatusCode::NOT_FOUND,
            PassimError::AlreadyExists(_) => StatusCode::CONFLICT,
            PassimError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            PassimError::TooLarge { .. } => StatusCode::INSUFFICIENT_STORAGE,
            PassimError::CorruptData(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PassimError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            PassimError::Transport(_) => StatusCode::BAD_GATEWAY,
            PassimError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PassimError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = format!("<html><body><h1>{status}</h1><p>{self}</p></body></html>");
        (status, axum::response::Html(body)).into_response()
    }
}

impl From<PassimError> for zbus::fdo::Error {
    fn from(err: PassimError) -> Self {
        match err {
            PassimError::InvalidArgs(m) => zbus::fdo::Error::InvalidArgs(m),
            PassimError::NotFound(m) => zbus::fdo::Error::FileNotFound(m),
            PassimError::AlreadyExists(m) => zbus::fdo::Error::FileExists(m),
            PassimError::PermissionDenied(m) => zbus::fdo::Error::AccessDenied(m),
            PassimError::TooLarge { limit } => zbus::fdo::Error::Failed(format!(
                "stream exceeds the {limit}-byte limit"
            )),
            PassimError::CorruptData(m) => zbus::fdo::Error::Failed(format!("corrupt data: {m}")),
            PassimError::NotReady(m) => zbus::fdo::Error::Failed(format!("not ready: {m}")),
            PassimError::Transport(m) => zbus::fdo::Error::Failed(format!("transport: {m}")),
            PassimError::Io(e) => zbus::fdo::Error::IOError(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PassimError>;
