//! HTTP listener in front of a [`DynamicProxy`]
//!
//! Routes:
//!
//! - `POST /mcp` -- one JSON-RPC message per request. The bearer token from
//!   `Authorization` is checked against the active binding. Replies are
//!   `200` with the JSON-RPC response, `202` for notifications, or `401` with
//!   a JSON-RPC error body when the token is rejected.
//! - `GET /health` -- liveness plus the current app name.
//!
//! The listener never restarts on reconfiguration; every request reads the
//! proxy's binding when it arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::error::{Result, ToolbridgeError};
use crate::mcp::proxy::DynamicProxy;
use crate::mcp::types::{JsonRpcResponse, INTERNAL_ERROR, UNAUTHORIZED};

/// Build the router serving `proxy`.
pub fn router(proxy: Arc<DynamicProxy>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp))
        .route("/health", get(health))
        .with_state(proxy)
}

/// Bind `addr` and serve until the process exits.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve_http(proxy: Arc<DynamicProxy>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(proxy, listener).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve_listener(
    proxy: Arc<DynamicProxy>,
    listener: tokio::net::TcpListener,
) -> Result<()> {
    let local = listener.local_addr()?;
    tracing::info!(%local, app = %proxy.binding().app_name, "HTTP listener started");
    axum::serve(listener, router(proxy)).await?;
    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default()
}

fn request_id(body: &str) -> serde_json::Value {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("id").cloned())
        .unwrap_or(serde_json::Value::Null)
}

async fn handle_mcp(
    State(proxy): State<Arc<DynamicProxy>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    match proxy.handle_message(&body, bearer_token(&headers)).await {
        Ok(Some(reply)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            reply,
        )
            .into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            let (status, code) = match e.downcast_ref::<ToolbridgeError>() {
                Some(ToolbridgeError::Unauthorized(_)) => (StatusCode::UNAUTHORIZED, UNAUTHORIZED),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR),
            };
            let failure = JsonRpcResponse::failure(request_id(&body), code, e.to_string());
            (status, Json(failure)).into_response()
        }
    }
}

async fn health(State(proxy): State<Arc<DynamicProxy>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "app_name": proxy.binding().app_name,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::outcome::ToolOutcome;
    use crate::mcp::server::{ServerTool, ToolServer};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn proxy_with(name: &str, token: &str) -> Arc<DynamicProxy> {
        let server = ToolServer::new(name);
        server.register_tools(vec![ServerTool::new(
            "echo",
            "Echo",
            serde_json::json!({}),
            |args| async move {
                Ok(ToolOutcome::response(
                    args["text"].as_str().unwrap_or_default(),
                    "",
                ))
            },
        )]);
        let proxy = Arc::new(DynamicProxy::new());
        proxy.reconfigure(Arc::new(server), token);
        proxy
    }

    fn post_mcp(body: serde_json::Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_current_app_name() {
        let proxy = proxy_with("alpha", "");
        let response = router(Arc::clone(&proxy))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["app_name"], "alpha");

        proxy.reconfigure(Arc::new(ToolServer::new("beta")), "");
        let response = router(proxy)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["app_name"], "beta");
    }

    #[tokio::test]
    async fn test_tools_call_with_valid_token() {
        let app = router(proxy_with("alpha", "tok"));
        let response = app
            .oneshot(post_mcp(
                serde_json::json!({
                    "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                    "params": { "name": "echo", "arguments": { "text": "hi" } }
                }),
                Some("tok"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(
            body["result"]["structuredContent"],
            serde_json::json!({ "response": "hi", "chat_id": "" })
        );
    }

    #[tokio::test]
    async fn test_wrong_or_missing_token_is_401_with_rpc_error() {
        let proxy = proxy_with("alpha", "tok");

        let response = router(Arc::clone(&proxy))
            .oneshot(post_mcp(
                serde_json::json!({ "jsonrpc": "2.0", "id": 9, "method": "ping" }),
                Some("nope"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["id"], 9);
        assert_eq!(body["error"]["code"], UNAUTHORIZED);

        let response = router(proxy)
            .oneshot(post_mcp(
                serde_json::json!({ "jsonrpc": "2.0", "id": 10, "method": "ping" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_notification_is_accepted_without_body() {
        let app = router(proxy_with("alpha", ""));
        let response = app
            .oneshot(post_mcp(
                serde_json::json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), "");
        headers.insert(header::AUTHORIZATION, "Bearer abc ".parse().unwrap());
        assert_eq!(bearer_token(&headers), "abc");
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), "");
    }
}
