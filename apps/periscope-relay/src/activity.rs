use metrics::counter;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, warn};

use periscope_proto::ActivityEvent;

/// Append-only sink for peer telemetry. Best-effort by contract: session
/// control never depends on it, and append failures are swallowed.
#[derive(Clone)]
pub struct ActivityStore {
    redis: Option<ConnectionManager>,
}

impl ActivityStore {
    /// Connects to the configured backend. With no URL, or when the backend
    /// is unreachable at startup, the store runs disabled rather than taking
    /// the signaling core down with it.
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url else {
            warn!("REDIS_URL not set, activity persistence disabled");
            return Self { redis: None };
        };

        match Client::open(url).map(ConnectionManager::new) {
            Ok(pending) => match pending.await {
                Ok(redis) => Self { redis: Some(redis) },
                Err(err) => {
                    warn!(%err, "activity store unreachable, persistence disabled");
                    Self { redis: None }
                }
            },
            Err(err) => {
                warn!(%err, "invalid activity store URL, persistence disabled");
                Self { redis: None }
            }
        }
    }

    pub fn disabled() -> Self {
        Self { redis: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.redis.is_some()
    }

    /// Appends one event to the identity's log. Duplicate event ids (batch
    /// retransmissions) are dropped via the payload key's NX guard.
    pub async fn append(
        &self,
        identity: &str,
        event: &ActivityEvent,
    ) -> Result<(), redis::RedisError> {
        let Some(redis) = &self.redis else {
            return Ok(());
        };
        let mut conn = redis.clone();

        let payload_key = format!("activity:event:{}", event.event_id);
        let log_key = format!("activity:{}:log", identity);
        let serialized = serde_json::to_string(event).unwrap_or_else(|_| "{}".into());

        let fresh: bool = conn.set_nx(&payload_key, &serialized).await?;
        if fresh {
            conn.rpush::<_, _, ()>(&log_key, &event.event_id).await?;
            counter!("periscope_activity_events_total", 1);
        }
        Ok(())
    }

    /// Fire-and-forget batch append, spawned off the socket task so the ack
    /// never waits on the backend.
    pub fn append_batch(&self, identity: &str, events: Vec<ActivityEvent>) {
        if self.redis.is_none() {
            return;
        }
        let store = self.clone();
        let identity = identity.to_string();
        tokio::spawn(async move {
            for event in &events {
                if let Err(err) = store.append(&identity, event).await {
                    debug!(%err, identity, "activity append failed");
                }
            }
        });
    }
}
