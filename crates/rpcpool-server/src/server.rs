//! HTTP server implementation using Axum.

use crate::handler::{handle_rpc, not_found};
use axum::{extract::DefaultBodyLimit, http::StatusCode, routing::post, Router};
use rpcpool_core::{RpcDispatch, TransportConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// Where decoded requests are sent
    pub dispatch: Arc<dyn RpcDispatch>,
    /// Largest accepted request body, in bytes
    pub body_limit: usize,
}

/// Limits applied by the HTTP front-end.
#[derive(Debug, Clone, Copy)]
pub struct HttpOptions {
    pub body_limit: usize,
    /// Per-request budget, counted from the parsed request head through
    /// body read and dispatch. Expiry answers 408. Time spent receiving the
    /// request head and idle keep-alive time are not covered.
    pub timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            body_limit: TransportConfig::DEFAULT_BODY_LIMIT,
            timeout: TransportConfig::DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// Handle to a running HTTP server. Dropping it stops the server.
pub struct HttpServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HttpServerHandle {
    /// Address the server is bound to (useful when port=0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and let in-flight requests finish.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the server task to exit after [`shutdown`](Self::shutdown).
    pub async fn stopped(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for HttpServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build the router: `POST /rpc` and a 404 for everything else.
pub fn router(dispatch: Arc<dyn RpcDispatch>, options: HttpOptions) -> Router {
    let state = Arc::new(AppState {
        dispatch,
        body_limit: options.body_limit,
    });

    Router::new()
        .route("/rpc", post(handle_rpc).fallback(not_found))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(options.body_limit))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            options.timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the JSON-RPC HTTP server.
pub async fn start_server(
    dispatch: Arc<dyn RpcDispatch>,
    host: &str,
    port: u16,
    options: HttpOptions,
) -> anyhow::Result<HttpServerHandle> {
    let app = router(dispatch, options);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    // Spawn the server in the background
    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            error!("HTTP server error: {}", e);
        }
        info!("HTTP server on {} stopped", actual_addr);
    });

    Ok(HttpServerHandle {
        addr: actual_addr,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use rpcpool_core::{registry, MethodRegistry, PoolOptions, WorkerPool};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn builtin_router(options: HttpOptions) -> (Router, Arc<WorkerPool>) {
        let loader = registry::resolve("builtin").unwrap();
        let pool = Arc::new(
            WorkerPool::spawn("http-test", loader, PoolOptions::with_size(2))
                .await
                .unwrap(),
        );
        (router(pool.clone(), options), pool)
    }

    fn post_rpc(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/rpc")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_echo_returns_success_frame() {
        let (app, pool) = builtin_router(HttpOptions::default()).await;

        let response = app
            .oneshot(post_rpc(r#"{"id":1,"method":"echo","params":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"id":1,"result":"hi"}"#);

        pool.close().await;
    }

    #[tokio::test]
    async fn test_unknown_method_is_server_error() {
        let (app, pool) = builtin_router(HttpOptions::default()).await;

        let response = app
            .oneshot(post_rpc(r#"{"id":"a","method":"nope","params":[]}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["id"], json!("a"));
        assert_eq!(body["error"]["code"], json!(-32601));
        assert!(body["error"]["message"].as_str().unwrap().contains("nope"));

        pool.close().await;
    }

    #[tokio::test]
    async fn test_invalid_json_is_server_error() {
        let (app, pool) = builtin_router(HttpOptions::default()).await;

        let response = app.oneshot(post_rpc("{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["id"], Value::Null);
        assert_eq!(body["error"]["code"], json!(-32700));

        pool.close().await;
    }

    #[tokio::test]
    async fn test_missing_method_keeps_request_id() {
        let (app, pool) = builtin_router(HttpOptions::default()).await;

        let response = app.oneshot(post_rpc(r#"{"id":9,"params":[]}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["id"], json!(9));
        assert_eq!(body["error"]["code"], json!(-32600));

        pool.close().await;
    }

    #[tokio::test]
    async fn test_body_over_limit_is_rejected() {
        let (app, pool) = builtin_router(HttpOptions {
            body_limit: 64,
            ..HttpOptions::default()
        })
        .await;

        let padding = "x".repeat(128);
        let body = format!(r#"{{"id":1,"method":"echo","params":"{}"}}"#, padding);
        let response = app.oneshot(post_rpc(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        pool.close().await;
    }

    #[tokio::test]
    async fn test_other_routes_are_not_found() {
        let (app, pool) = builtin_router(HttpOptions::default()).await;

        for (method, uri) in [
            (Method::GET, "/rpc"),
            (Method::PUT, "/rpc"),
            (Method::POST, "/other"),
            (Method::GET, "/"),
        ] {
            let request = Request::builder()
                .method(method.clone())
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{} {}", method, uri);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert!(bytes.is_empty());
        }

        pool.close().await;
    }

    #[tokio::test]
    async fn test_closed_pool_is_server_error() {
        let (app, pool) = builtin_router(HttpOptions::default()).await;
        pool.close().await;

        let response = app
            .oneshot(post_rpc(r#"{"id":3,"method":"echo","params":1}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["id"], json!(3));
    }

    fn sleepy_registry() -> rpcpool_core::Result<MethodRegistry> {
        Ok(MethodRegistry::new().with_method("sleep", |params| {
            let ms = params.as_u64().unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
            Ok(json!(ms))
        }))
    }

    #[tokio::test]
    async fn test_slow_call_times_out_with_408() {
        let pool = Arc::new(
            WorkerPool::spawn("http-slow", sleepy_registry, PoolOptions::with_size(2))
                .await
                .unwrap(),
        );
        let app = router(
            pool.clone(),
            HttpOptions {
                timeout: Duration::from_millis(20),
                ..HttpOptions::default()
            },
        );

        let response = app
            .clone()
            .oneshot(post_rpc(r#"{"id":1,"method":"sleep","params":300}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());

        // The second worker is idle; a quick call fits inside the budget.
        let response = app
            .oneshot(post_rpc(r#"{"id":2,"method":"sleep","params":0}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        pool.close().await;
    }

    #[tokio::test]
    async fn test_server_starts_and_stops() {
        let loader = registry::resolve("builtin").unwrap();
        let pool = Arc::new(
            WorkerPool::spawn("http-start", loader, PoolOptions::with_size(1))
                .await
                .unwrap(),
        );

        let mut handle = start_server(pool.clone(), "127.0.0.1", 0, HttpOptions::default())
            .await
            .unwrap();
        assert!(handle.addr().port() > 0);

        handle.shutdown();
        handle.stopped().await;
        pool.close().await;
    }
}
