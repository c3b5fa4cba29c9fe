//! HTTP endpoints through which the dashboard requests a verification.
//!
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use common::protocol::VerifyResponse;

use crate::gate::{CancelToken, GateContext};

/// Shared access to the single gate of the process.
///
/// Evaluations are serialized through the mutex. The cancel token is kept outside of it so a
/// running evaluation can be cancelled.
#[derive(Clone)]
pub struct GateHandle {
    gate: Arc<Mutex<GateContext>>,
    cancel: CancelToken,
}

impl GateHandle {
    pub fn new(gate: GateContext) -> Self {
        let cancel = gate.cancel_token();
        Self {
            gate: Arc::new(Mutex::new(gate)),
            cancel,
        }
    }
}

pub fn router(handle: GateHandle) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/verify", post(verify))
        .route("/cancel", post(cancel))
        .layer(Extension(handle))
}

pub async fn healthcheck() -> &'static str {
    "Healthy"
}

/// Run one gate evaluation on a blocking thread.
pub async fn verify(
    Extension(handle): Extension<GateHandle>,
) -> Result<Json<VerifyResponse>, (StatusCode, String)> {
    log::info!("Verification requested");
    let gate = handle.gate.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        // Recover from a panic in an earlier evaluation
        let mut gate = gate.lock().unwrap_or_else(PoisonError::into_inner);
        gate.verify()
    })
    .await
    .map_err(|err| {
        log::error!("Gate evaluation failed: {err}");
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })?;

    Ok(Json(outcome.to_response()))
}

pub async fn cancel(Extension(handle): Extension<GateHandle>) -> StatusCode {
    log::info!("Cancel requested");
    handle.cancel.cancel();
    StatusCode::ACCEPTED
}
