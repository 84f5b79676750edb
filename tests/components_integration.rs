//! Integration tests for the HTTP surface of a single node
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`,
//! no listener is bound.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

use sse_cluster::cluster::{
    ClusterNode, OperationOutput, OperationRequest, RemoteError, RemoteInvoker, RemoteResponse,
    StaticMembership, RPC_PATH,
};
use sse_cluster::config::Settings;
use sse_cluster::connection_manager::{ConnectParams, EventMessage};
use sse_cluster::server::{create_app, AppState};

/// Peer stand-in answering every call the same way
struct FixedInvoker(Result<OperationOutput, RemoteError>);

#[async_trait]
impl RemoteInvoker for FixedInvoker {
    async fn invoke(
        &self,
        _node: &ClusterNode,
        _request: &OperationRequest,
        _timeout: Duration,
    ) -> Result<OperationOutput, RemoteError> {
        self.0.clone()
    }
}

fn settings(secret: Option<&str>) -> Settings {
    let mut settings = Settings::default();
    settings.cluster.node_id = "node-a".to_string();
    settings.cluster.advertise_address = Some("10.0.0.1:8081".to_string());
    settings.cluster.secret = secret.map(str::to_string);
    settings.cluster.request_timeout_ms = 500;
    settings
}

fn state_with(
    secret: Option<&str>,
    peers: Vec<ClusterNode>,
    peer_answer: Result<OperationOutput, RemoteError>,
) -> AppState {
    AppState::new(
        settings(secret),
        Arc::new(StaticMembership::new(peers)),
        Arc::new(FixedInvoker(peer_answer)),
    )
    .expect("app state")
}

fn single_node() -> AppState {
    state_with(None, vec![], Ok(OperationOutput::Count(0)))
}

fn connect(state: &AppState, user: &str, tags: &[&str]) -> mpsc::Receiver<EventMessage> {
    let (tx, rx) = mpsc::channel(8);
    state
        .connection_manager
        .register(
            ConnectParams {
                user_id: Some(user.to_string()),
                access_token: Some(format!("{}-token", user)),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
            tx,
        )
        .expect("register");
    rx
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.expect("router response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// =============================================================================
// Health & Stats
// =============================================================================

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_node() {
        let state = single_node();
        let _rx = connect(&state, "u1", &[]);

        let (status, body) = call(create_app(state), get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["node_id"], "node-a");
        assert_eq!(body["connections"], 1);
        assert_eq!(body["peers"], 0);
    }

    #[tokio::test]
    async fn test_stats_are_local_only() {
        let state = state_with(
            None,
            vec![ClusterNode::new("node-b", "10.0.0.2:8081")],
            Ok(OperationOutput::Count(99)),
        );
        let _rx1 = connect(&state, "u1", &["news"]);
        let _rx2 = connect(&state, "u2", &["news"]);

        let (status, body) = call(create_app(state), get("/stats")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["address"], "10.0.0.1:8081");
        assert_eq!(body["connections"]["total_connections"], 2);
        assert_eq!(body["connections"]["tags"]["news"], 2);
        assert_eq!(body["peers"], 1);
        assert_eq!(body["dispatch"]["retry_on_timeout"], false);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_prefix() {
        let app = create_app(single_node());
        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("sse_cluster_connections_active"));
    }
}

// =============================================================================
// Peer RPC
// =============================================================================

mod rpc_tests {
    use super::*;

    #[tokio::test]
    async fn test_rpc_executes_against_local_registry_only() {
        // The peer would answer 99; RPC must never fan out
        let state = state_with(
            None,
            vec![ClusterNode::new("node-b", "10.0.0.2:8081")],
            Ok(OperationOutput::Count(99)),
        );
        let _rx = connect(&state, "u1", &[]);

        let (status, body) = call(
            create_app(state),
            json_request(Method::POST, RPC_PATH, serde_json::json!({"operation": "connection_count"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let response: RemoteResponse = serde_json::from_value(body).unwrap();
        assert_eq!(
            response,
            RemoteResponse::Ok {
                value: OperationOutput::Count(1)
            }
        );
    }

    #[tokio::test]
    async fn test_rpc_query_returns_descriptors() {
        let state = single_node();
        let _rx = connect(&state, "u1", &["news"]);

        let request = OperationRequest::QueryByUserId {
            user_id: "u1".to_string(),
        };
        let (status, body) = call(
            create_app(state),
            json_request(Method::POST, RPC_PATH, serde_json::to_value(&request).unwrap()),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["value"]["kind"], "connections");
        assert_eq!(body["value"]["data"][0]["node_id"], "node-a");
        assert_eq!(body["value"]["data"][0]["tags"][0], "news");
    }

    #[tokio::test]
    async fn test_rpc_reports_registry_errors_in_body() {
        let (status, body) = call(
            create_app(single_node()),
            json_request(
                Method::POST,
                RPC_PATH,
                serde_json::json!({"operation": "disconnect_by_user_id", "args": {"user_id": " "}}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
        assert!(body["error"].as_str().unwrap().contains("user_id"));
    }

    #[tokio::test]
    async fn test_rpc_requires_cluster_secret() {
        let state = state_with(Some("s3cret"), vec![], Ok(OperationOutput::Count(0)));
        let body = serde_json::json!({"operation": "query_all"});

        let (status, _) = call(
            create_app(state.clone()),
            json_request(Method::POST, RPC_PATH, body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut wrong = json_request(Method::POST, RPC_PATH, body.clone());
        wrong
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer nope".parse().unwrap());
        let (status, error) = call(create_app(state.clone()), wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error["error"]["code"], "UNAUTHORIZED");
        assert_eq!(error["error"]["message"], "Invalid cluster secret");

        let mut prefix = json_request(Method::POST, RPC_PATH, body.clone());
        prefix
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer s3cre".parse().unwrap());
        let (status, _) = call(create_app(state.clone()), prefix).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut right = json_request(Method::POST, RPC_PATH, body);
        right
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        let (status, body) = call(create_app(state), right).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_oversized_rpc_body_is_rejected() {
        let mut settings = settings(None);
        settings.cluster.max_rpc_body_bytes = 256;
        let state = AppState::new(
            settings,
            Arc::new(StaticMembership::new(vec![])),
            Arc::new(FixedInvoker(Ok(OperationOutput::Count(0)))),
        )
        .expect("app state");

        let body = serde_json::json!({
            "operation": "send_all",
            "args": {"message": {"data": "x".repeat(1024)}}
        });
        let payload = body.to_string();
        let request = Request::builder()
            .method(Method::POST)
            .uri(RPC_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, payload.len())
            .body(Body::from(payload))
            .unwrap();
        let (status, _) = call(create_app(state.clone()), request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        // The cap only covers the peer RPC route
        let (status, _) = call(
            create_app(state),
            json_request(Method::POST, "/api/v1/send/all", body["args"]["message"].clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_public_api_does_not_need_secret() {
        let state = state_with(Some("s3cret"), vec![], Ok(OperationOutput::Count(0)));
        let (status, _) = call(create_app(state), get("/api/v1/connections/count")).await;
        assert_eq!(status, StatusCode::OK);
    }
}

// =============================================================================
// Cluster API
// =============================================================================

mod api_tests {
    use super::*;
    use sse_cluster::connection_manager::LocalRegistry;

    #[tokio::test]
    async fn test_send_to_user_merges_peer_count() {
        let state = state_with(
            None,
            vec![ClusterNode::new("node-b", "10.0.0.2:8081")],
            Ok(OperationOutput::Count(2)),
        );
        let mut rx = connect(&state, "u1", &[]);

        let (status, body) = call(
            create_app(state),
            json_request(
                Method::POST,
                "/api/v1/send/users/u1",
                serde_json::json!({"event": "greeting", "data": {"text": "hello"}}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], 3);
        assert_eq!(body["partial"], false);
        assert_eq!(body["responded"], serde_json::json!(["node-a", "node-b"]));

        let message = rx.try_recv().expect("local delivery");
        assert_eq!(message.event.as_deref(), Some("greeting"));
        assert_eq!(message.data["text"], "hello");
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_reported_as_partial() {
        let state = state_with(
            None,
            vec![ClusterNode::new("node-b", "10.0.0.2:8081")],
            Err(RemoteError::transport("connect failed: refused")),
        );
        let _rx = connect(&state, "u1", &["news"]);

        let (status, body) = call(create_app(state), get("/api/v1/connections?tag=news")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"].as_array().unwrap().len(), 1);
        assert_eq!(body["partial"], true);
        assert_eq!(body["failures"][0]["node_id"], "node-b");
        assert_eq!(body["failures"][0]["error"]["kind"], "transport");
    }

    #[tokio::test]
    async fn test_query_rejects_multiple_selectors() {
        let (status, body) = call(
            create_app(single_node()),
            get("/api/v1/connections?user_id=u1&tag=news"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].is_string());
    }

    #[tokio::test]
    async fn test_blank_argument_is_a_bad_request() {
        let state = state_with(
            None,
            vec![ClusterNode::new("node-b", "10.0.0.2:8081")],
            Ok(OperationOutput::Count(5)),
        );

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/api/v1/connections/users/%20")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(create_app(state), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_user_online_and_disconnect() {
        let state = single_node();
        let _rx = connect(&state, "u1", &[]);
        let app = create_app(state.clone());

        let (_, body) = call(app.clone(), get("/api/v1/users/u1/online")).await;
        assert_eq!(body["online"], true);
        assert_eq!(body["partial"], false);

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/api/v1/connections/users/u1")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(app.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], 1);

        let (_, body) = call(app, get("/api/v1/users/u1/online")).await;
        assert_eq!(body["online"], false);
    }

    #[tokio::test]
    async fn test_cluster_nodes_lists_peers() {
        let state = state_with(
            None,
            vec![
                ClusterNode::new("node-b", "10.0.0.2:8081"),
                ClusterNode::new("node-c", "10.0.0.3:8081"),
                // Left behind by an earlier process on this address
                ClusterNode::new("node-a-old", "10.0.0.1:8081"),
            ],
            Ok(OperationOutput::Count(0)),
        );

        let (status, body) = call(create_app(state), get("/api/v1/cluster/nodes")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node"]["id"], "node-a");
        assert_eq!(body["node"]["is_self"], true);
        assert_eq!(body["peers"].as_array().unwrap().len(), 2);
    }
    #[tokio::test]
    async fn test_user_count_counts_shared_users_once() {
        let state = state_with(
            None,
            vec![ClusterNode::new("node-b", "10.0.0.2:8081")],
            Ok(OperationOutput::Keys(vec!["u1".to_string(), "u2".to_string()])),
        );
        let _rx = connect(&state, "u1", &["news"]);
        let app = create_app(state);

        // The peer stand-in answers every listing with the same two keys
        let (status, body) = call(app.clone(), get("/api/v1/users/count")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], 2);

        let (_, body) = call(app.clone(), get("/api/v1/users")).await;
        assert_eq!(body["value"], serde_json::json!(["u1", "u2"]));

        let (_, body) = call(app.clone(), get("/api/v1/tags")).await;
        assert_eq!(body["value"], serde_json::json!(["news", "u1", "u2"]));

        let (_, body) = call(app, get("/api/v1/tokens/count")).await;
        assert_eq!(body["value"], 3);
    }

    #[tokio::test]
    async fn test_batch_send_and_disconnect() {
        let state = single_node();
        let mut rx1 = connect(&state, "u1", &["news"]);
        let mut rx2 = connect(&state, "u2", &["news"]);
        let app = create_app(state.clone());

        let (status, body) = call(
            app.clone(),
            json_request(
                Method::POST,
                "/api/v1/send/users",
                serde_json::json!({"user_ids": ["u1", "u2", "u1"], "message": {"data": "hi"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());

        let ids: Vec<u64> = state
            .connection_manager
            .get_all_connections()
            .iter()
            .map(|c| c.id)
            .collect();
        let (status, body) = call(
            app.clone(),
            json_request(
                Method::POST,
                "/api/v1/disconnect/connections",
                serde_json::json!({"connection_ids": ids}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], 2);
        assert_eq!(state.connection_manager.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_send_needs_targets() {
        let (status, body) = call(
            create_app(single_node()),
            json_request(
                Method::POST,
                "/api/v1/send/tags",
                serde_json::json!({"tags": [], "message": {"data": "hi"}}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_nul_in_event_id_is_a_bad_request() {
        let state = single_node();
        let mut rx = connect(&state, "u1", &[]);

        let (status, _) = call(
            create_app(state),
            json_request(
                Method::POST,
                "/api/v1/send/all",
                serde_json::json!({"data": "hi", "id": "a\0b"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }
}
