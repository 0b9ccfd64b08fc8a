//! Stream API
//! Mission: Authenticated bidirectional channel with per-tenant broadcast

use crate::api::{data_api::coerce_integer, AppState};
use crate::broker::Frame;
use crate::store::models::TenantStatistics;
use crate::store::models::{HistoryEntry, ResultEntry};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bounded per-subscriber queue; a client that cannot drain this many
/// frames is considered slow and dropped.
const SUBSCRIBER_QUEUE: usize = 64;

/// Server -> client stream messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum StreamEvent {
    AuthRequired {
        message: String,
    },
    Connected {
        authenticated: bool,
        username: String,
    },
    Authenticated {
        username: String,
    },
    Error {
        error: String,
        message: String,
    },
    ResultUpdate(ResultEntry),
    ResultCaptured(ResultEntry),
    Analysis(crate::analytics::AnalysisRecord),
    Results {
        results: Vec<ResultEntry>,
    },
    Statistics(TenantStatistics),
    History {
        history: Vec<HistoryEntry>,
    },
    ResultsCleared {
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /ws — upgrade to the stream protocol. The bearer token may arrive
/// as a query parameter here, or later as the first "authenticate" message.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, handshake_token: Option<String>) {
    let (tx, mut rx) = mpsc::channel::<Frame>(SUBSCRIBER_QUEUE);
    let subscription_id = Uuid::new_v4();
    let mut username: Option<String> = None;

    match handshake_token {
        Some(token) => match state.jwt.verify(&token) {
            Ok(claims) => {
                state.broker.subscribe(&claims.sub, subscription_id, tx.clone());
                let connected = StreamEvent::Connected {
                    authenticated: true,
                    username: claims.sub.clone(),
                };
                if send_event(&mut socket, &connected).await.is_err() {
                    state.broker.unsubscribe(subscription_id);
                    return;
                }
                username = Some(claims.sub);
            }
            Err(e) => {
                debug!(error = %e, "Stream handshake token rejected");
                let _ = send_event(
                    &mut socket,
                    &StreamEvent::Error {
                        error: "unauthorized".to_string(),
                        message: "Invalid or expired token".to_string(),
                    },
                )
                .await;
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        },
        None => {
            let event = StreamEvent::AuthRequired {
                message: "Authenticate with a bearer token to continue".to_string(),
            };
            if send_event(&mut socket, &event).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(Frame::Event(text)) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Close notice from shutdown; pending sends are abandoned.
                Some(Frame::Close) | None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let (replies, keep_open) = handle_client_message(
                        &state,
                        &mut username,
                        subscription_id,
                        &tx,
                        &text,
                    );
                    let mut send_failed = false;
                    for event in &replies {
                        if send_event(&mut socket, event).await.is_err() {
                            send_failed = true;
                            break;
                        }
                    }
                    if send_failed || !keep_open {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "Stream read error");
                    break;
                }
            }
        }
    }

    state.broker.unsubscribe(subscription_id);
}

async fn send_event(socket: &mut WebSocket, event: &StreamEvent) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to serialize stream event");
        "{}".to_string()
    });
    socket.send(Message::Text(text)).await
}

/// Dispatch one client message. Returns the direct replies plus whether the
/// connection stays open. Broadcasts to the tenant ride the broker.
fn handle_client_message(
    state: &AppState,
    username: &mut Option<String>,
    subscription_id: Uuid,
    tx: &mpsc::Sender<Frame>,
    text: &str,
) -> (Vec<StreamEvent>, bool) {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        return (
            vec![invalid_event("message must be a JSON object")],
            true,
        );
    };
    let message_type = message.get("type").and_then(|t| t.as_str()).unwrap_or("");
    let data = message.get("data").cloned().unwrap_or(Value::Null);

    // Heartbeat is allowed in every state.
    if message_type == "ping" {
        return (
            vec![StreamEvent::Pong {
                timestamp: Local::now().timestamp_millis(),
            }],
            true,
        );
    }

    if message_type == "authenticate" {
        let token = data
            .get("token")
            .or_else(|| message.get("token"))
            .and_then(|t| t.as_str())
            .unwrap_or("");
        return match state.jwt.verify(token) {
            Ok(claims) => {
                state.broker.subscribe(&claims.sub, subscription_id, tx.clone());
                let event = StreamEvent::Authenticated {
                    username: claims.sub.clone(),
                };
                *username = Some(claims.sub);
                (vec![event], true)
            }
            Err(_) => (
                vec![StreamEvent::Error {
                    error: "unauthorized".to_string(),
                    message: "Invalid or expired token".to_string(),
                }],
                false,
            ),
        };
    }

    // Everything else requires an authenticated session.
    let Some(user) = username.as_deref() else {
        return (
            vec![StreamEvent::Error {
                error: "unauthorized".to_string(),
                message: "Authenticate before sending requests".to_string(),
            }],
            true,
        );
    };

    let reply = match message_type {
        "submit" => submit(state, user, &data),
        "request-analysis" => {
            let count = data.get("count").and_then(|c| c.as_u64()).map(|c| c as usize);
            analysis_reply(state, user, count)
        }
        "request-results" => {
            let limit = data.get("limit").and_then(|l| l.as_u64()).map(|l| l as usize);
            match state.data.list_results(user, limit) {
                Ok(results) => vec![StreamEvent::Results { results }],
                Err(e) => vec![store_error_event(e)],
            }
        }
        "request-statistics" => match state.data.statistics(user) {
            Ok(statistics) => vec![StreamEvent::Statistics(statistics)],
            Err(e) => vec![store_error_event(e)],
        },
        "request-history" => {
            let limit = data.get("limit").and_then(|l| l.as_u64()).map(|l| l as usize);
            match state.data.list_history(user, limit) {
                Ok(history) => vec![StreamEvent::History { history }],
                Err(e) => vec![store_error_event(e)],
            }
        }
        other => {
            debug!(message_type = other, "Unknown stream message type");
            vec![invalid_event("unknown message type")]
        }
    };

    (reply, true)
}

/// Stream submit: same semantics as the request-API submit, plus the
/// result-captured acknowledgement and, when auto-analysis is enabled, a
/// fresh analysis of the default window.
fn submit(state: &AppState, user: &str, data: &Value) -> Vec<StreamEvent> {
    let Some(value) = data.get("value").and_then(coerce_integer) else {
        return vec![invalid_event("value must be a finite integer")];
    };

    let entry = match state.data.append(user, value) {
        Ok(entry) => entry,
        Err(e) => return vec![store_error_event(e)],
    };
    state.analytics.invalidate(user);
    state
        .broker
        .publish(user, &StreamEvent::ResultUpdate(entry.clone()));

    let mut replies = vec![StreamEvent::ResultCaptured(entry)];
    if state.config.auto_analyze {
        replies.extend(analysis_reply(state, user, None));
    }
    replies
}

fn analysis_reply(state: &AppState, user: &str, count: Option<usize>) -> Vec<StreamEvent> {
    match state
        .data
        .analysis_window(user, count, state.config.batch_size)
    {
        Ok(input) => {
            let record = state.analytics.analyze(user, &input);
            vec![StreamEvent::Analysis((*record).clone())]
        }
        Err(e) => vec![store_error_event(e)],
    }
}

fn invalid_event(message: &str) -> StreamEvent {
    StreamEvent::Error {
        error: "invalid".to_string(),
        message: message.to_string(),
    }
}

fn store_error_event(e: crate::store::StoreError) -> StreamEvent {
    let error = crate::api::error::ApiError::from(e);
    StreamEvent::Error {
        error: error.kind().to_string(),
        message: "Operation failed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tags_are_kebab_case() {
        let entry = ResultEntry::capture(12);
        let json = serde_json::to_value(&StreamEvent::ResultUpdate(entry)).unwrap();
        assert_eq!(json["type"], "result-update");
        assert_eq!(json["data"]["resultado"], 12);

        let json = serde_json::to_value(&StreamEvent::AuthRequired {
            message: "auth".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "auth-required");

        let json = serde_json::to_value(&StreamEvent::Pong { timestamp: 42 }).unwrap();
        assert_eq!(json["type"], "pong");
        assert_eq!(json["data"]["timestamp"], 42);
    }

    #[test]
    fn test_connected_payload() {
        let json = serde_json::to_value(&StreamEvent::Connected {
            authenticated: true,
            username: "alice".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["data"]["authenticated"], true);
        assert_eq!(json["data"]["username"], "alice");
    }

    #[test]
    fn test_results_cleared_tag() {
        let json =
            serde_json::to_value(&StreamEvent::ResultsCleared { timestamp: 7 }).unwrap();
        assert_eq!(json["type"], "results-cleared");
    }
}
