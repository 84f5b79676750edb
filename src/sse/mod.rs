//! Server-Sent Events endpoint.
//!
//! # Endpoint
//!
//! `GET /sse?user_id=<id>&access_token=<token>&tags=a,b`
//!
//! The access token may also be sent as `Authorization: Bearer <token>`.
//! Every parameter is optional; a connection without identity is still
//! reachable through `send_all` and by its connection id.
//!
//! # Event Types
//!
//! - `connected` - first event, carries the connection id and node id
//! - application events - name, data and id as given by the sender
//!
//! Keep-alive comments are sent every `sse.heartbeat_interval` seconds.

mod handler;

pub use handler::{sse_handler, ConnectedEvent, SseQuery};
