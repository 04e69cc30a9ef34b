//! Websocket dispatcher
//!
//! Each client sends `{type, req_id, data}` envelopes. Every message is
//! handled on its own task, so a long statement never holds up metadata
//! lookups on the same socket; replies carry the request id back in
//! `orig_req_id`.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use dbnet_core::{DbnetError, Result};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::api;
use crate::request::{MetaRequest, SqlRequest};
use crate::state::AppState;

const MESSAGE_TYPES: &[&str] = &[
    "submit-sql",
    "cancel-sql",
    "get-sql-rows",
    "get-connections",
    "get-schemas",
    "get-tables",
    "get-columns",
    "get-analysis-sql",
    "get-history",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub req_id: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsReply {
    #[serde(rename = "type")]
    pub kind: String,
    pub req_id: String,
    pub orig_req_id: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

pub(crate) async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| client_loop(socket, state))
}

async fn client_loop(socket: WebSocket, state: AppState) {
    let client_id = uuid::Uuid::new_v4().to_string();
    tracing::debug!(client_id = %client_id, "websocket client connected");

    let (mut sink, mut stream) = socket.split();
    let (replies, mut outbox) = mpsc::unbounded_channel::<WsReply>();

    let writer = tokio::spawn(async move {
        while let Some(reply) = outbox.recv().await {
            let text = match serde_json::to_string(&reply) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "could not encode websocket reply");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                tracing::debug!(error = %e, "websocket send failed");
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "websocket read failed");
                break;
            }
        };

        let message: WsMessage = match serde_json::from_str(text.as_str()) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(client_id = %client_id, error = %e, "invalid websocket message");
                continue;
            }
        };

        let state = state.clone();
        let replies = replies.clone();
        tokio::spawn(async move {
            if let Some(reply) = dispatch(&state, message).await {
                let _ = replies.send(reply);
            }
        });
    }

    writer.abort();
    tracing::debug!(client_id = %client_id, "websocket client disconnected");
}

/// Handle one envelope. Unknown message types are logged and get no reply.
pub(crate) async fn dispatch(state: &AppState, message: WsMessage) -> Option<WsReply> {
    if !MESSAGE_TYPES.contains(&message.kind.as_str()) {
        tracing::warn!(kind = %message.kind, "could not handle websocket message");
        return None;
    }

    let outcome = handle(state, &message.kind, message.data).await;
    let (data, error) = match outcome {
        Ok(data) => (data, String::new()),
        Err(e) => (Value::Null, e.to_string()),
    };
    Some(WsReply {
        kind: message.kind,
        req_id: uuid::Uuid::new_v4().to_string(),
        orig_req_id: message.req_id,
        data,
        error,
    })
}

async fn handle(state: &AppState, kind: &str, data: Value) -> Result<Value> {
    match kind {
        "submit-sql" => {
            let waited = api::submit_sql(state, decode::<SqlRequest>(data)?, false).await?;
            encode(waited.into_inner())
        }
        "get-sql-rows" => encode(api::sql_rows(state, decode::<SqlRequest>(data)?).await?.into_inner()),
        "cancel-sql" => encode(api::cancel_sql(state, &decode::<SqlRequest>(data)?).await?),
        "get-connections" => api::connections(state),
        "get-schemas" => encode(api::schemas(state, &decode::<MetaRequest>(data)?).await?),
        "get-tables" => encode(api::tables(state, &decode::<MetaRequest>(data)?).await?),
        "get-columns" => encode(api::columns(state, &decode::<MetaRequest>(data)?).await?),
        "get-analysis-sql" => api::analysis_sql(state, &decode::<MetaRequest>(data)?).await,
        "get-history" => api::history(state, &decode::<MetaRequest>(data)?),
        other => Err(DbnetError::Config(format!("unknown message type '{}'", other))),
    }
}

fn decode<T: DeserializeOwned + Default>(data: Value) -> Result<T> {
    if data.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(data)?)
}

fn encode(value: impl Serialize) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
