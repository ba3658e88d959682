use crate::types::SessionEvent;
use futures_util::StreamExt;
use redis::{AsyncCommands, RedisResult};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Session push-event channel semantics shared by the backend publisher and
/// the practice client. Channel names are deterministic per session.

pub const SESSION_CHANNEL_PREFIX: &str = "practice:session";

/// Buffered events per subscriber before the forwarder applies backpressure
const EVENT_BUFFER: usize = 64;

/// Generate the pub/sub channel name for a session
pub fn session_channel(session_id: &str) -> String {
    format!("{}:{}:events", SESSION_CHANNEL_PREFIX, session_id)
}

/// Decode one pushed payload
pub fn decode_event(payload: &str) -> serde_json::Result<SessionEvent> {
    serde_json::from_str(payload)
}

/// Publish a session event
/// Used by the backend and by local tooling that replays events
pub async fn publish_event(
    conn: &mut redis::aio::ConnectionManager,
    session_id: &str,
    event: &SessionEvent,
) -> RedisResult<()> {
    let payload = serde_json::to_string(event)
        .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string())))?;

    conn.publish(session_channel(session_id), payload).await
}

/// Subscribe to a session's push events.
///
/// Events are forwarded into the returned receiver; malformed payloads are
/// skipped. The receiver closes when the subscription ends, which callers
/// treat as a lost server connection.
pub async fn subscribe_session_events(
    client: &redis::Client,
    session_id: &str,
) -> RedisResult<mpsc::Receiver<SessionEvent>> {
    let channel = session_channel(session_id);
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    pubsub.subscribe(&channel).await?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(async move {
        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Unreadable push payload");
                    continue;
                }
            };

            match decode_event(&payload) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        debug!(channel = %channel, "Event receiver dropped, ending subscription");
                        break;
                    }
                }
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Skipping malformed push event");
                }
            }
        }
        debug!(channel = %channel, "Push subscription closed");
    });

    Ok(rx)
}

/// Open the push channel for a session from a Redis URL.
///
/// `None` when Redis is unreachable; the session clock then counts down
/// locally.
pub async fn connect_session_events(redis_url: &str, session_id: &str) -> Option<mpsc::Receiver<SessionEvent>> {
    let client = match redis::Client::open(redis_url) {
        Ok(client) => client,
        Err(e) => {
            warn!(redis_url = %redis_url, error = %e, "Invalid Redis URL, no push events");
            return None;
        }
    };
    match subscribe_session_events(&client, session_id).await {
        Ok(rx) => {
            debug!(session_id = %session_id, "Subscribed to session push events");
            Some(rx)
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Push events unavailable, using local clock");
            None
        }
    }
}
