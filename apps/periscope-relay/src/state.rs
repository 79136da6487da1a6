use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info};
use uuid::Uuid;

use periscope_proto::{
    generate_session_id, now_millis, EndReason, OnlineUser, PresenceStatus, ServerFrame,
};

/// Handle for enqueueing a frame onto one socket's writer task.
pub type FrameSender = mpsc::UnboundedSender<ServerFrame>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Active,
}

struct ConnectionEntry {
    /// Identifies the socket behind this registration. A replaced (duplicate
    /// login) socket keeps its old epoch, so its close cannot tear down the
    /// successor's entry.
    epoch: Uuid,
    label: String,
    status: PresenceStatus,
    tx: FrameSender,
}

struct ControlSession {
    host_identity: String,
    viewer_identity: String,
    status: SessionStatus,
    created_at: i64,
    /// Pending auto-reject timer. Aborted inside the same critical section
    /// as any transition out of `Pending`.
    timeout: Option<AbortHandle>,
}

/// Read-only view of a session used for frame authorization. The session is
/// the sole source of truth; a frame is never trusted for naming a session id.
#[derive(Debug, Clone)]
pub struct SessionRoute {
    pub host_identity: String,
    pub viewer_identity: String,
    pub status: SessionStatus,
}

impl SessionRoute {
    pub fn is_participant(&self, identity: &str) -> bool {
        self.host_identity == identity || self.viewer_identity == identity
    }

    /// The other party of the session, if `identity` is a participant.
    pub fn counterpart(&self, identity: &str) -> Option<&str> {
        if self.host_identity == identity {
            Some(&self.viewer_identity)
        } else if self.viewer_identity == identity {
            Some(&self.host_identity)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionActionError {
    /// Session missing or the sender holds no standing in it.
    InvalidSession,
    /// Session exists but already left the pending state (e.g. a stale
    /// accept racing a fired timeout).
    NotPending,
}

#[derive(Default)]
struct RelayState {
    connections: HashMap<String, ConnectionEntry>,
    sessions: HashMap<String, ControlSession>,
}

/// Single owner of the connection registry and session table. Every
/// read-modify-write sequence runs under one mutex, so concurrent requests
/// touching the same identity or session serialize by construction.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<Mutex<RelayState>>,
    pending_timeout: Duration,
}

impl Relay {
    pub fn new(pending_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RelayState::default())),
            pending_timeout,
        }
    }

    /// Inserts or replaces the registry entry for `identity` and broadcasts a
    /// fresh presence snapshot. Returns the epoch that guards this socket's
    /// later cleanup. Later writers win; the displaced socket is orphaned.
    pub async fn register(&self, identity: &str, label: &str, tx: FrameSender) -> Uuid {
        let epoch = Uuid::new_v4();
        let mut state = self.inner.lock().await;
        state.connections.insert(
            identity.to_string(),
            ConnectionEntry {
                epoch,
                label: label.to_string(),
                status: PresenceStatus::Available,
                tx,
            },
        );
        counter!("periscope_connections_registered_total", 1);
        gauge!(
            "periscope_connections_online",
            state.connections.len() as f64
        );
        info!(identity, label, "connection registered");
        broadcast_presence(&state);
        epoch
    }

    /// Socket-close cascade: ends any session the identity participates in,
    /// then unregisters the connection — in that order, so presence reflects
    /// the teardown before the entry disappears from broadcasts. A stale
    /// epoch (the socket was replaced by a newer login) is a no-op.
    pub async fn cleanup_connection(&self, identity: &str, epoch: Uuid) {
        let mut state = self.inner.lock().await;
        match state.connections.get(identity) {
            Some(entry) if entry.epoch == epoch => {}
            _ => return,
        }

        let session_id = state
            .sessions
            .iter()
            .find(|(_, s)| s.host_identity == identity || s.viewer_identity == identity)
            .map(|(id, _)| id.clone());
        if let Some(session_id) = session_id {
            end_session_locked(&mut state, &session_id, EndReason::UserDisconnected);
        }

        state.connections.remove(identity);
        gauge!(
            "periscope_connections_online",
            state.connections.len() as f64
        );
        info!(identity, "connection unregistered");
        broadcast_presence(&state);
    }

    /// Snapshot of all online users except `excluding`.
    pub async fn list_online(&self, excluding: &str) -> Vec<OnlineUser> {
        let state = self.inner.lock().await;
        snapshot_excluding(&state, excluding)
    }

    /// Delivers a frame to one identity. Absence is a normal condition
    /// (target offline) and reports `false`.
    pub async fn send_to(&self, identity: &str, frame: ServerFrame) -> bool {
        let state = self.inner.lock().await;
        match state.connections.get(identity) {
            Some(entry) => entry.tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Creates a pending session binding `viewer` to `host` and arms the
    /// auto-reject timer. Fails unless both parties are registered, both are
    /// available, and the identities are distinct. The check and the insert
    /// share one critical section, so two racing requests can never bind the
    /// same identity twice.
    pub async fn create_session(&self, viewer: &str, host: &str) -> Option<String> {
        let mut state = self.inner.lock().await;
        if viewer == host {
            return None;
        }
        let viewer_available = matches!(
            state.connections.get(viewer).map(|c| c.status),
            Some(PresenceStatus::Available)
        );
        let host_available = matches!(
            state.connections.get(host).map(|c| c.status),
            Some(PresenceStatus::Available)
        );
        if !viewer_available || !host_available {
            return None;
        }

        let session_id = generate_session_id();
        let timeout = {
            let relay = self.clone();
            let session_id = session_id.clone();
            let delay = self.pending_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                relay.expire_session(&session_id).await;
            })
            .abort_handle()
        };

        state.sessions.insert(
            session_id.clone(),
            ControlSession {
                host_identity: host.to_string(),
                viewer_identity: viewer.to_string(),
                status: SessionStatus::Pending,
                created_at: now_millis(),
                timeout: Some(timeout),
            },
        );
        counter!("periscope_sessions_created_total", 1);
        info!(%session_id, viewer, host, "session created");
        Some(session_id)
    }

    /// Host accepts: pending → active. Cancels the timer, flips presence to
    /// hosting/viewing, broadcasts, and returns the viewer identity so the
    /// caller can notify it. Only the session's host may accept, and only
    /// while pending.
    pub async fn accept_session(
        &self,
        session_id: &str,
        sender: &str,
    ) -> Result<String, SessionActionError> {
        let mut state = self.inner.lock().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .filter(|s| s.host_identity == sender)
            .ok_or(SessionActionError::InvalidSession)?;
        if session.status != SessionStatus::Pending {
            return Err(SessionActionError::NotPending);
        }

        if let Some(timeout) = session.timeout.take() {
            timeout.abort();
        }
        session.status = SessionStatus::Active;
        let viewer = session.viewer_identity.clone();
        let host = session.host_identity.clone();

        if let Some(conn) = state.connections.get_mut(&viewer) {
            conn.status = PresenceStatus::Viewing;
        }
        if let Some(conn) = state.connections.get_mut(&host) {
            conn.status = PresenceStatus::Hosting;
        }
        info!(session_id, "session activated");
        broadcast_presence(&state);
        Ok(viewer)
    }

    /// Host declines a pending request. Funnels into the common teardown,
    /// which notifies the viewer with the rejection.
    pub async fn reject_session(
        &self,
        session_id: &str,
        sender: &str,
    ) -> Result<(), SessionActionError> {
        let mut state = self.inner.lock().await;
        let session = state
            .sessions
            .get(session_id)
            .filter(|s| s.host_identity == sender)
            .ok_or(SessionActionError::InvalidSession)?;
        if session.status != SessionStatus::Pending {
            return Err(SessionActionError::NotPending);
        }
        end_session_locked(&mut state, session_id, EndReason::Rejected);
        Ok(())
    }

    /// Explicit disconnect from either party. Unknown sessions and
    /// non-participant senders are ignored: teardown paths race by design
    /// and late frames are expected.
    pub async fn disconnect_session(&self, session_id: &str, sender: &str) {
        let mut state = self.inner.lock().await;
        let is_participant = state
            .sessions
            .get(session_id)
            .map(|s| s.host_identity == sender || s.viewer_identity == sender)
            .unwrap_or(false);
        if is_participant {
            end_session_locked(&mut state, session_id, EndReason::UserDisconnected);
        }
    }

    /// Idempotent teardown from any state. Ending an absent session is a
    /// no-op, not an error — disconnect cascades and explicit disconnects may
    /// race to call this for the same id.
    pub async fn end_session(&self, session_id: &str, reason: EndReason) -> bool {
        let mut state = self.inner.lock().await;
        end_session_locked(&mut state, session_id, reason)
    }

    /// Read-only authorization view. Relays take the lock only for this
    /// lookup.
    pub async fn route(&self, session_id: &str) -> Option<SessionRoute> {
        let state = self.inner.lock().await;
        state.sessions.get(session_id).map(|s| SessionRoute {
            host_identity: s.host_identity.clone(),
            viewer_identity: s.viewer_identity.clone(),
            status: s.status,
        })
    }

    /// The id of the session `identity` participates in, if any.
    pub async fn session_for(&self, identity: &str) -> Option<String> {
        let state = self.inner.lock().await;
        state
            .sessions
            .iter()
            .find(|(_, s)| s.host_identity == identity || s.viewer_identity == identity)
            .map(|(id, _)| id.clone())
    }

    /// Timer callback. Re-checks under the lock that the session is still
    /// pending: an accept that won the lock first has already aborted or
    /// superseded this timer.
    async fn expire_session(&self, session_id: &str) {
        let mut state = self.inner.lock().await;
        let still_pending = state
            .sessions
            .get(session_id)
            .map(|s| s.status == SessionStatus::Pending)
            .unwrap_or(false);
        if still_pending {
            let age_ms = state
                .sessions
                .get(session_id)
                .map(|s| now_millis() - s.created_at)
                .unwrap_or_default();
            debug!(session_id, age_ms, "pending session timed out");
            end_session_locked(&mut state, session_id, EndReason::Timeout);
        }
    }
}

/// Common teardown path. Cancels the timer, restores both parties to
/// available iff still registered, notifies both, deletes the session, and
/// broadcasts presence. A session that dies while pending notifies the
/// viewer with `rtc_rejected` (it is still waiting on its request); an
/// active one notifies both with `rtc_disconnected`.
fn end_session_locked(state: &mut RelayState, session_id: &str, reason: EndReason) -> bool {
    let Some(mut session) = state.sessions.remove(session_id) else {
        return false;
    };
    if let Some(timeout) = session.timeout.take() {
        timeout.abort();
    }

    if let Some(conn) = state.connections.get_mut(&session.viewer_identity) {
        conn.status = PresenceStatus::Available;
    }
    if let Some(conn) = state.connections.get_mut(&session.host_identity) {
        conn.status = PresenceStatus::Available;
    }

    let viewer_notice = match session.status {
        SessionStatus::Pending => ServerFrame::RtcRejected {
            session_id: session_id.to_string(),
            reason: Some(reason.as_str().to_string()),
        },
        SessionStatus::Active => ServerFrame::RtcDisconnected {
            session_id: session_id.to_string(),
            reason: Some(reason),
        },
    };
    if let Some(conn) = state.connections.get(&session.viewer_identity) {
        let _ = conn.tx.send(viewer_notice);
    }
    if let Some(conn) = state.connections.get(&session.host_identity) {
        let _ = conn.tx.send(ServerFrame::RtcDisconnected {
            session_id: session_id.to_string(),
            reason: Some(reason),
        });
    }

    counter!("periscope_sessions_ended_total", 1, "reason" => reason.as_str());
    info!(session_id, %reason, "session ended");
    broadcast_presence(state);
    true
}

fn snapshot_excluding(state: &RelayState, excluding: &str) -> Vec<OnlineUser> {
    state
        .connections
        .iter()
        .filter(|(identity, _)| identity.as_str() != excluding)
        .map(|(identity, entry)| OnlineUser {
            identity: identity.clone(),
            label: entry.label.clone(),
            status: entry.status,
        })
        .collect()
}

/// Pushes a fresh full snapshot of all *other* online users to every
/// connection. Full snapshots trade bandwidth for the absence of client-side
/// reconciliation.
fn broadcast_presence(state: &RelayState) {
    for (identity, entry) in &state.connections {
        let users = snapshot_excluding(state, identity);
        let _ = entry.tx.send(ServerFrame::OnlineUsers { users });
    }
}
