//! Top-level HTTP error type: collects the per-module errors `srp-core` and
//! `srp-registry` raise and maps each to a status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use srp_core::registry;
use srp_core::server::exposure;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] registry::Error),
    #[error(transparent)]
    Exposure(#[from] exposure::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            // Any failure to look a service up, not-found included, is a 500
            // — the same single generic-error response the original control
            // API gives for every `getService` failure.
            Error::Registry(registry::Error::ServiceNotFound(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            // "already existed" gets a 400, the same wording the original
            // handler replies with.
            Error::Registry(registry::Error::DuplicateService(_)) => StatusCode::BAD_REQUEST,
            Error::Registry(registry::Error::InvalidAddress(_, _)) => StatusCode::BAD_REQUEST,
            Error::Registry(registry::Error::MissingId) => StatusCode::BAD_REQUEST,
            Error::Registry(registry::Error::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            // An unreachable agent or bad port behind an exposure create is
            // also a 500, so both collapse to the same generic-error branch
            // the original's `ExposeService` uses.
            Error::Exposure(exposure::Error::ServiceNotFound(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Exposure(exposure::Error::ListenFailed(_, _)) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
