//! `POST /rpc` handler.
//!
//! Status codes:
//! - 200: success (Success frame in the body)
//! - 404: any other method or path (empty body)
//! - 408: the exchange outlived the server timeout (empty body)
//! - 413: body larger than the configured limit (empty body)
//! - 500: the frame could not be decoded or the call failed, including
//!   unknown methods and methods that returned an error (Failure frame)

use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
};
use rpcpool_core::{encode_response, process_request, Response, RpcError};
use std::sync::Arc;
use tracing::{error, warn};

/// Main RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> HttpResponse {
    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            warn!("Rejecting RPC body over {} bytes", state.body_limit);
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
        Err(rejection) => {
            let err = RpcError::Io {
                message: rejection.body_text(),
                source: None,
            };
            return rpc_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                &Response::from_error(None, &err),
            );
        }
    };

    let handled = process_request(state.dispatch.as_ref(), &body).await;
    let status = match handled.error() {
        None => StatusCode::OK,
        Some(err) if err.is_application() => {
            warn!("RPC call failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Some(err) => {
            error!("RPC fault: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    rpc_reply(status, handled.response())
}

/// Fallback for every other method and path.
pub async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn rpc_reply(status: StatusCode, response: &Response) -> HttpResponse {
    match encode_response(response) {
        Ok(body) => (status, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            error!("Failed to encode response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
