//! Wire contract between nodes
//!
//! A peer receives an `OperationRequest`, executes it against its own
//! registry and answers with a `RemoteResponse`.

use serde::{Deserialize, Serialize};

use crate::connection_manager::{
    ConnectionId, ConnectionInfo, EventMessage, LocalRegistry, RegistryError,
};

/// A registry operation that can be executed on any node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "args", rename_all = "snake_case")]
pub enum OperationRequest {
    QueryByUserId {
        user_id: String,
    },
    QueryByAccessToken {
        access_token: String,
    },
    QueryByTag {
        tag: String,
    },
    QueryAll,
    QueryUserIds,
    QueryAccessTokens,
    QueryTags,
    SendByUserId {
        user_id: String,
        message: EventMessage,
    },
    SendByAccessToken {
        access_token: String,
        message: EventMessage,
    },
    SendByTag {
        tag: String,
        message: EventMessage,
    },
    SendByConnectionId {
        connection_id: ConnectionId,
        message: EventMessage,
    },
    SendByUserIds {
        user_ids: Vec<String>,
        message: EventMessage,
    },
    SendByAccessTokens {
        access_tokens: Vec<String>,
        message: EventMessage,
    },
    SendByTags {
        tags: Vec<String>,
        message: EventMessage,
    },
    SendAll {
        message: EventMessage,
    },
    DisconnectByUserId {
        user_id: String,
    },
    DisconnectByAccessToken {
        access_token: String,
    },
    DisconnectByConnectionId {
        connection_id: ConnectionId,
    },
    DisconnectByConnectionIds {
        connection_ids: Vec<ConnectionId>,
    },
    ConnectionCount,
}

impl OperationRequest {
    /// Stable operation name used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            OperationRequest::QueryByUserId { .. } => "query_by_user_id",
            OperationRequest::QueryByAccessToken { .. } => "query_by_access_token",
            OperationRequest::QueryByTag { .. } => "query_by_tag",
            OperationRequest::QueryAll => "query_all",
            OperationRequest::QueryUserIds => "query_user_ids",
            OperationRequest::QueryAccessTokens => "query_access_tokens",
            OperationRequest::QueryTags => "query_tags",
            OperationRequest::SendByUserId { .. } => "send_by_user_id",
            OperationRequest::SendByAccessToken { .. } => "send_by_access_token",
            OperationRequest::SendByTag { .. } => "send_by_tag",
            OperationRequest::SendByConnectionId { .. } => "send_by_connection_id",
            OperationRequest::SendByUserIds { .. } => "send_by_user_ids",
            OperationRequest::SendByAccessTokens { .. } => "send_by_access_tokens",
            OperationRequest::SendByTags { .. } => "send_by_tags",
            OperationRequest::SendAll { .. } => "send_all",
            OperationRequest::DisconnectByUserId { .. } => "disconnect_by_user_id",
            OperationRequest::DisconnectByAccessToken { .. } => "disconnect_by_access_token",
            OperationRequest::DisconnectByConnectionId { .. } => "disconnect_by_connection_id",
            OperationRequest::DisconnectByConnectionIds { .. } => "disconnect_by_connection_ids",
            OperationRequest::ConnectionCount => "connection_count",
        }
    }

    /// Whether running the operation twice on a node differs from running it once
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            OperationRequest::SendByUserId { .. }
                | OperationRequest::SendByAccessToken { .. }
                | OperationRequest::SendByTag { .. }
                | OperationRequest::SendByConnectionId { .. }
                | OperationRequest::SendByUserIds { .. }
                | OperationRequest::SendByAccessTokens { .. }
                | OperationRequest::SendByTags { .. }
                | OperationRequest::SendAll { .. }
                | OperationRequest::DisconnectByUserId { .. }
                | OperationRequest::DisconnectByAccessToken { .. }
                | OperationRequest::DisconnectByConnectionId { .. }
                | OperationRequest::DisconnectByConnectionIds { .. }
        )
    }
}

/// Result of executing an operation on one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum OperationOutput {
    Count(usize),
    Connections(Vec<ConnectionInfo>),
    /// Distinct user ids, access tokens or tags
    Keys(Vec<String>),
}

impl OperationOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            OperationOutput::Count(_) => "count",
            OperationOutput::Connections(_) => "connections",
            OperationOutput::Keys(_) => "keys",
        }
    }
}

/// Body returned by the peer RPC endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RemoteResponse {
    Ok { value: OperationOutput },
    Error { error: String },
}

impl From<Result<OperationOutput, RegistryError>> for RemoteResponse {
    fn from(result: Result<OperationOutput, RegistryError>) -> Self {
        match result {
            Ok(value) => RemoteResponse::Ok { value },
            Err(e) => RemoteResponse::Error {
                error: e.to_string(),
            },
        }
    }
}

/// Run an operation against a node-local registry
pub fn execute_local(
    registry: &dyn LocalRegistry,
    request: &OperationRequest,
) -> Result<OperationOutput, RegistryError> {
    use OperationOutput::{Connections, Count, Keys};

    let output = match request {
        OperationRequest::QueryByUserId { user_id } => {
            Connections(registry.query_by_user_id(user_id)?)
        }
        OperationRequest::QueryByAccessToken { access_token } => {
            Connections(registry.query_by_access_token(access_token)?)
        }
        OperationRequest::QueryByTag { tag } => Connections(registry.query_by_tag(tag)?),
        OperationRequest::QueryAll => Connections(registry.query_all()?),
        OperationRequest::QueryUserIds => Keys(registry.user_ids()),
        OperationRequest::QueryAccessTokens => Keys(registry.access_tokens()),
        OperationRequest::QueryTags => Keys(registry.tags()),
        OperationRequest::SendByUserId { user_id, message } => {
            Count(registry.send_by_user_id(user_id, message)?)
        }
        OperationRequest::SendByAccessToken {
            access_token,
            message,
        } => Count(registry.send_by_access_token(access_token, message)?),
        OperationRequest::SendByTag { tag, message } => Count(registry.send_by_tag(tag, message)?),
        OperationRequest::SendByConnectionId {
            connection_id,
            message,
        } => Count(registry.send_by_connection_id(*connection_id, message)?),
        OperationRequest::SendByUserIds { user_ids, message } => {
            Count(registry.send_by_user_ids(user_ids, message)?)
        }
        OperationRequest::SendByAccessTokens {
            access_tokens,
            message,
        } => Count(registry.send_by_access_tokens(access_tokens, message)?),
        OperationRequest::SendByTags { tags, message } => {
            Count(registry.send_by_tags(tags, message)?)
        }
        OperationRequest::SendAll { message } => Count(registry.send_all(message)?),
        OperationRequest::DisconnectByUserId { user_id } => {
            Count(registry.disconnect_by_user_id(user_id)?)
        }
        OperationRequest::DisconnectByAccessToken { access_token } => {
            Count(registry.disconnect_by_access_token(access_token)?)
        }
        OperationRequest::DisconnectByConnectionId { connection_id } => {
            Count(registry.disconnect_by_connection_id(*connection_id)?)
        }
        OperationRequest::DisconnectByConnectionIds { connection_ids } => {
            Count(registry.disconnect_by_connection_ids(connection_ids)?)
        }
        OperationRequest::ConnectionCount => Count(registry.connection_count()),
    };

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::{ConnectParams, ConnectionManager};
    use tokio::sync::mpsc;

    #[test]
    fn test_request_wire_format() {
        let request = OperationRequest::QueryByTag {
            tag: "vip".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["operation"], "query_by_tag");
        assert_eq!(json["args"]["tag"], "vip");

        let unit: OperationRequest =
            serde_json::from_str(r#"{"operation":"connection_count"}"#).unwrap();
        assert_eq!(unit, OperationRequest::ConnectionCount);
    }

    #[test]
    fn test_response_wire_format() {
        let ok = RemoteResponse::Ok {
            value: OperationOutput::Count(3),
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["value"]["kind"], "count");
        assert_eq!(json["value"]["data"], 3);

        let err: RemoteResponse =
            serde_json::from_str(r#"{"status":"error","error":"boom"}"#).unwrap();
        assert_eq!(
            err,
            RemoteResponse::Error {
                error: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_batch_request_wire_format() {
        let request = OperationRequest::DisconnectByConnectionIds {
            connection_ids: vec![4, 9],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["operation"], "disconnect_by_connection_ids");
        assert_eq!(json["args"]["connection_ids"], serde_json::json!([4, 9]));

        let keys: OperationOutput =
            serde_json::from_str(r#"{"kind":"keys","data":["a","b"]}"#).unwrap();
        assert_eq!(keys, OperationOutput::Keys(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_mutating_operations() {
        assert!(!OperationRequest::QueryAll.is_mutating());
        assert!(!OperationRequest::ConnectionCount.is_mutating());
        assert!(!OperationRequest::QueryTags.is_mutating());
        assert!(OperationRequest::SendByTags {
            tags: vec!["vip".into()],
            message: EventMessage::text("x")
        }
        .is_mutating());
        assert!(OperationRequest::DisconnectByConnectionId { connection_id: 1 }.is_mutating());
        assert!(OperationRequest::SendAll {
            message: EventMessage::text("x")
        }
        .is_mutating());
    }

    #[test]
    fn test_execute_local() {
        let manager = ConnectionManager::new("node-a");
        let (tx, _rx) = mpsc::channel(4);
        manager
            .register(
                ConnectParams {
                    user_id: Some("u1".into()),
                    ..Default::default()
                },
                tx,
            )
            .unwrap();

        let query = OperationRequest::QueryByUserId {
            user_id: "u1".into(),
        };
        match execute_local(&manager, &query).unwrap() {
            OperationOutput::Connections(infos) => assert_eq!(infos.len(), 1),
            other => panic!("unexpected output: {:?}", other),
        }

        let send = OperationRequest::SendByUserId {
            user_id: "u1".into(),
            message: EventMessage::text("hi"),
        };
        assert_eq!(
            execute_local(&manager, &send).unwrap(),
            OperationOutput::Count(1)
        );

        let tags = OperationRequest::QueryUserIds;
        assert_eq!(
            execute_local(&manager, &tags).unwrap(),
            OperationOutput::Keys(vec!["u1".to_string()])
        );

        let batch = OperationRequest::SendByUserIds {
            user_ids: vec!["u1".into(), "u1".into()],
            message: EventMessage::text("again"),
        };
        assert_eq!(
            execute_local(&manager, &batch).unwrap(),
            OperationOutput::Count(1)
        );

        let bad = OperationRequest::QueryByTag { tag: "".into() };
        let response = RemoteResponse::from(execute_local(&manager, &bad));
        assert!(matches!(response, RemoteResponse::Error { .. }));
    }
}
