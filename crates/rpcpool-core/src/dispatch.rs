//! The seam between transports and the runtime.
//!
//! Transports decode a frame, hand `(method, params)` to an [`RpcDispatch`]
//! implementation and encode whatever comes back. [`process_request`] does
//! that round for one payload so HTTP and TCP behave identically.

use crate::actors::ActorRegistry;
use crate::error::{Result, RpcError};
use crate::pool::WorkerPool;
use crate::protocol::{decode_request, extract_request_id, Response};
use serde_json::Value;
use tracing::debug;

/// Anything that can execute a method call.
#[async_trait::async_trait]
pub trait RpcDispatch: Send + Sync + 'static {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value>;
}

#[async_trait::async_trait]
impl RpcDispatch for WorkerPool {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        self.exec(method, params).await
    }
}

/// Spreads calls over the actors at random.
#[async_trait::async_trait]
impl RpcDispatch for ActorRegistry {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        self.select(None).exec(method, params).await
    }
}

/// Outcome of handling one request payload.
#[derive(Debug)]
pub enum Handled {
    Success(Response),
    Failure { response: Response, error: RpcError },
}

impl Handled {
    pub fn response(&self) -> &Response {
        match self {
            Handled::Success(response) => response,
            Handled::Failure { response, .. } => response,
        }
    }

    pub fn into_response(self) -> Response {
        match self {
            Handled::Success(response) => response,
            Handled::Failure { response, .. } => response,
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        match self {
            Handled::Success(_) => None,
            Handled::Failure { error, .. } => Some(error),
        }
    }
}

/// Decode `payload`, dispatch it and build the response frame.
///
/// Decode failures answer with the payload's id when it can be recovered
/// from a well-formed JSON object, otherwise with a null id.
pub async fn process_request<D: RpcDispatch + ?Sized>(dispatch: &D, payload: &[u8]) -> Handled {
    let request = match decode_request(payload) {
        Ok(request) => request,
        Err(error) => {
            debug!("Rejecting undecodable frame: {}", error);
            let id = extract_request_id(payload);
            return Handled::Failure {
                response: Response::from_error(id, &error),
                error,
            };
        }
    };

    debug!("RPC call: {}({}) id={}", request.method, request.params, request.id);

    match dispatch.dispatch(&request.method, request.params).await {
        Ok(result) => Handled::Success(Response::success(request.id, result)),
        Err(error) => Handled::Failure {
            response: Response::from_error(Some(request.id), &error),
            error,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use serde_json::json;

    struct EchoDispatch;

    #[async_trait::async_trait]
    impl RpcDispatch for EchoDispatch {
        async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
            match method {
                "echo" => Ok(params),
                "fail" => Err(RpcError::Timeout(std::time::Duration::from_millis(5))),
                _ => Err(RpcError::MethodNotFound {
                    method: method.to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_process_request_success() {
        let handled = process_request(&EchoDispatch, br#"{"id":1,"method":"echo","params":"hi"}"#).await;
        assert!(handled.error().is_none());
        assert_eq!(
            handled.into_response(),
            Response::success(RequestId::Number(1), json!("hi"))
        );
    }

    #[tokio::test]
    async fn test_process_request_echoes_id_on_dispatch_failure() {
        let handled = process_request(&EchoDispatch, br#"{"id":"x","method":"fail"}"#).await;
        assert_eq!(handled.response().id(), Some(&RequestId::from("x")));
        assert_eq!(handled.error().map(RpcError::to_rpc_error_code), Some(-32002));
    }

    #[tokio::test]
    async fn test_process_request_decode_failures() {
        let garbage = process_request(&EchoDispatch, b"{not json").await;
        assert_eq!(garbage.response().id(), None);
        assert!(garbage.error().map(RpcError::is_protocol).unwrap_or(false));

        let no_method = process_request(&EchoDispatch, br#"{"id":3}"#).await;
        assert_eq!(no_method.response().id(), Some(&RequestId::Number(3)));
        assert_eq!(no_method.error().map(RpcError::to_rpc_error_code), Some(-32600));
    }
}
