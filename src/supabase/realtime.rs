//! Realtime change feed over the project's Phoenix socket.
//!
//! One socket per subscription:
//!   1. Connect to `/realtime/v1/websocket` with the anon key
//!   2. Join `realtime:{table}` asking for `INSERT`s that match the filter
//!   3. Wait for the join reply; an error reply fails the subscription
//!   4. Pump inserted records into the [`Subscription`] and heartbeat
//!      until the channel closes or the subscription is dropped

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::ProjectClient;
use crate::backend::{ChangeFeed, Filter, Row, Subscription};
use crate::errors::AppError;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_REF: &str = "1";

/// Socket URL for the project: `http(s)` becomes `ws(s)`.
pub fn build_socket_url(base_url: &str, anon_key: &str) -> String {
    let base = base_url
        .trim_end_matches('/')
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!(
        "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        base,
        urlencoding::encode(anon_key)
    )
}

pub fn topic_for(table: &str) -> String {
    format!("realtime:{}", table)
}

pub fn join_message(topic: &str, table: &str, filter: &Filter, access_token: &str) -> Value {
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "INSERT",
                    "schema": "public",
                    "table": table,
                    "filter": format!("{}=eq.{}", filter.column, filter.literal()),
                }],
            },
            "access_token": access_token,
        },
        "ref": JOIN_REF,
        "join_ref": JOIN_REF,
    })
}

fn heartbeat_message(seq: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": seq.to_string(),
    })
}

/// What a socket frame means for a subscription on `topic`.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Insert(Row),
    JoinReply { ok: bool, reason: Option<String> },
    Closed(String),
    Other,
}

pub fn parse_frame(text: &str, topic: &str) -> Frame {
    let Ok(msg) = serde_json::from_str::<Value>(text) else {
        return Frame::Other;
    };
    if msg.get("topic").and_then(Value::as_str) != Some(topic) {
        return Frame::Other;
    }
    let payload = msg.get("payload").unwrap_or(&Value::Null);

    match msg.get("event").and_then(Value::as_str) {
        Some("postgres_changes") => {
            let data = payload.get("data").unwrap_or(&Value::Null);
            let is_insert = data.get("type").and_then(Value::as_str) == Some("INSERT");
            match data.get("record") {
                Some(record) if is_insert => Frame::Insert(record.clone()),
                _ => Frame::Other,
            }
        }
        // Pre-postgres_changes servers send the row event directly.
        Some("INSERT") => match payload.get("record") {
            Some(record) => Frame::Insert(record.clone()),
            None => Frame::Other,
        },
        Some("phx_reply") if msg.get("ref").and_then(Value::as_str) == Some(JOIN_REF) => {
            let ok = payload.get("status").and_then(Value::as_str) == Some("ok");
            let reason = payload
                .get("response")
                .and_then(|r| r.get("reason").or_else(|| r.get("message")))
                .and_then(Value::as_str)
                .map(str::to_string);
            Frame::JoinReply { ok, reason }
        }
        Some(event @ ("phx_close" | "phx_error")) => Frame::Closed(event.to_string()),
        Some("system") if payload.get("status").and_then(Value::as_str) == Some("error") => {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("system error");
            Frame::Closed(message.to_string())
        }
        _ => Frame::Other,
    }
}

pub struct RealtimeFeed {
    project: ProjectClient,
    join_timeout: Duration,
}

impl RealtimeFeed {
    pub fn new(project: ProjectClient, join_timeout: Duration) -> Self {
        Self {
            project,
            join_timeout,
        }
    }
}

#[async_trait]
impl ChangeFeed for RealtimeFeed {
    async fn subscribe_inserts(&self, table: &str, filter: Filter) -> Result<Subscription, AppError> {
        let url = build_socket_url(self.project.base_url().as_str(), self.project.anon_key());
        let topic = topic_for(table);

        let (socket, _resp) = connect_async(url.as_str())
            .await
            .map_err(|e| AppError::Realtime(format!("connect failed: {}", e)))?;
        let (mut sink, mut stream) = socket.split();

        let join = join_message(&topic, table, &filter, &self.project.bearer());
        sink.send(Message::Text(join.to_string()))
            .await
            .map_err(|e| AppError::Realtime(format!("join failed: {}", e)))?;

        // Wait for the join reply before handing out the subscription.
        let joined = tokio::time::timeout(self.join_timeout, async {
            while let Some(msg) = stream.next().await {
                let msg = msg.map_err(|e| AppError::Realtime(e.to_string()))?;
                let Message::Text(text) = msg else { continue };
                match parse_frame(&text, &topic) {
                    Frame::JoinReply { ok: true, .. } => return Ok(()),
                    Frame::JoinReply { ok: false, reason } => {
                        return Err(AppError::Realtime(format!(
                            "join rejected: {}",
                            reason.unwrap_or_else(|| "unknown reason".into())
                        )))
                    }
                    Frame::Closed(why) => return Err(AppError::Realtime(format!("channel closed during join: {}", why))),
                    _ => {}
                }
            }
            Err(AppError::Realtime("socket closed during join".into()))
        })
        .await
        .map_err(|_| AppError::Realtime(format!("join timed out after {:?}", self.join_timeout)))?;
        joined?;

        info!(topic = %topic, filter = %filter.column, "realtime channel joined");

        let (tx, rx) = mpsc::channel(64);
        let pump = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await; // first tick completes immediately
            let mut seq: u64 = 1;
            let mut forwarded: u64 = 0;

            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        seq += 1;
                        if sink.send(Message::Text(heartbeat_message(seq).to_string())).await.is_err() {
                            warn!(topic = %topic, "heartbeat failed, closing feed");
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                    msg = stream.next() => {
                        let text = match msg {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(topic = %topic, "socket closed");
                                break;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                warn!(topic = %topic, error = %e, "socket error, closing feed");
                                break;
                            }
                        };
                        match parse_frame(&text, &topic) {
                            Frame::Insert(record) => {
                                forwarded += 1;
                                if tx.send(record).await.is_err() {
                                    break;
                                }
                            }
                            Frame::Closed(why) => {
                                info!(topic = %topic, reason = %why, "realtime channel closed");
                                break;
                            }
                            Frame::JoinReply { .. } | Frame::Other => {}
                        }
                    }
                }
            }

            let _ = sink.close().await;
            debug!(topic = %topic, forwarded, "realtime pump stopped");
        });

        Ok(Subscription::new(rx, pump))
    }
}
