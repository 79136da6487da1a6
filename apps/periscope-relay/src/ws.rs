use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use periscope_proto::{ClientFrame, ServerFrame};

use crate::activity::ActivityStore;
use crate::auth::TokenVerifier;
use crate::state::{FrameSender, Relay, SessionActionError};

/// Everything a connection handler needs, injected rather than global.
#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub verifier: TokenVerifier,
    pub activity: ActivityStore,
}

/// Builds the WebSocket-facing routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

/// Per-socket state. Identity and label are fixed once authentication
/// succeeds; the epoch ties this socket to its registry entry.
#[derive(Default)]
struct ConnState {
    identity: Option<String>,
    label: Option<String>,
    epoch: Option<Uuid>,
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket(socket: WebSocket, app: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Writer task: drains the per-connection channel so state code can
    // enqueue frames without ever blocking on the socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&frame) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut conn = ConnState::default();

    while let Some(msg_result) = receiver.next().await {
        let msg = match msg_result {
            Ok(m) => m,
            Err(err) => {
                debug!(%err, "websocket error, closing");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                process_frame(&text, &mut conn, &app, &tx).await;
            }
            Message::Binary(data) => {
                // Tolerate JSON arriving as a binary frame.
                match String::from_utf8(data) {
                    Ok(text) => process_frame(&text, &mut conn, &app, &tx).await,
                    Err(_) => debug!("ignoring non-UTF8 binary frame"),
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Cleanup cascade: session teardown first, then unregistration, both
    // guarded by this socket's epoch.
    if let (Some(identity), Some(epoch)) = (conn.identity.as_deref(), conn.epoch) {
        app.relay.cleanup_connection(identity, epoch).await;
    }
}

async fn process_frame(text: &str, conn: &mut ConnState, app: &AppState, tx: &FrameSender) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%err, "unparsable frame");
            let _ = tx.send(error_frame("Invalid message format"));
            return;
        }
    };

    if let Err(err) = handle_frame(frame, conn, app, tx).await {
        error!(%err, "error handling frame");
        let _ = tx.send(error_frame(&format!("Failed to process message: {}", err)));
    }
}

async fn handle_frame(
    frame: ClientFrame,
    conn: &mut ConnState,
    app: &AppState,
    tx: &FrameSender,
) -> anyhow::Result<()> {
    match frame {
        ClientFrame::Auth { token } => {
            if conn.identity.is_some() {
                tx.send(error_frame("Already authenticated"))?;
                return Ok(());
            }
            // Verification happens outside the registry lock; nothing is
            // registered yet, so there is no state to re-validate after it.
            match app.verifier.verify(&token) {
                Ok(resolved) => {
                    let epoch = app
                        .relay
                        .register(&resolved.identity, &resolved.label, tx.clone())
                        .await;
                    conn.identity = Some(resolved.identity);
                    conn.label = Some(resolved.label);
                    conn.epoch = Some(epoch);
                    tx.send(ServerFrame::AuthOk)?;
                }
                Err(err) => {
                    debug!(%err, "authentication failed");
                    tx.send(ServerFrame::AuthFail {
                        reason: "Invalid token".to_string(),
                    })?;
                }
            }
            Ok(())
        }
        authenticated_frame => {
            let Some(identity) = conn.identity.clone() else {
                tx.send(error_frame("Not authenticated"))?;
                return Ok(());
            };
            let label = conn.label.clone().unwrap_or_default();
            handle_authenticated(authenticated_frame, &identity, &label, app, tx).await
        }
    }
}

async fn handle_authenticated(
    frame: ClientFrame,
    identity: &str,
    label: &str,
    app: &AppState,
    tx: &FrameSender,
) -> anyhow::Result<()> {
    match frame {
        ClientFrame::Auth { .. } => Ok(()),

        ClientFrame::ActivityBatch { events, batch_id } => {
            app.activity.append_batch(identity, events);
            tx.send(ServerFrame::BatchAck { batch_id })?;
            Ok(())
        }

        ClientFrame::GetOnlineUsers => {
            tx.send(ServerFrame::OnlineUsers {
                users: app.relay.list_online(identity).await,
            })?;
            Ok(())
        }

        ClientFrame::RtcRequest { target_identity } => {
            match app.relay.create_session(identity, &target_identity).await {
                Some(session_id) => {
                    let delivered = app
                        .relay
                        .send_to(
                            &target_identity,
                            ServerFrame::RtcIncoming {
                                session_id: session_id.clone(),
                                viewer_identity: identity.to_string(),
                                viewer_label: label.to_string(),
                            },
                        )
                        .await;
                    if !delivered {
                        // Target vanished between creation and notification;
                        // its close cascade has already ended the session.
                        debug!(%session_id, "request target disappeared");
                    }
                }
                None => {
                    tx.send(ServerFrame::RtcRejected {
                        session_id: String::new(),
                        reason: Some("User unavailable or already in session".to_string()),
                    })?;
                }
            }
            Ok(())
        }

        ClientFrame::RtcAccept { session_id, .. } => {
            match app.relay.accept_session(&session_id, identity).await {
                Ok(viewer) => {
                    app.relay
                        .send_to(
                            &viewer,
                            ServerFrame::RtcAccepted {
                                session_id,
                                host_identity: identity.to_string(),
                            },
                        )
                        .await;
                }
                Err(SessionActionError::InvalidSession) => {
                    tx.send(error_frame("Invalid session"))?;
                }
                Err(SessionActionError::NotPending) => {
                    tx.send(error_frame("Failed to activate session"))?;
                }
            }
            Ok(())
        }

        ClientFrame::RtcReject { session_id, .. } => {
            if app
                .relay
                .reject_session(&session_id, identity)
                .await
                .is_err()
            {
                tx.send(error_frame("Invalid session"))?;
            }
            Ok(())
        }

        ClientFrame::RtcOffer {
            session_id,
            target_identity,
            payload,
        } => {
            let Some(route) = app.relay.route(&session_id).await else {
                tx.send(error_frame("Invalid session"))?;
                return Ok(());
            };
            if route.viewer_identity != identity {
                tx.send(error_frame("Invalid session"))?;
                return Ok(());
            }
            if route.counterpart(identity) != Some(target_identity.as_str()) {
                tx.send(error_frame("Invalid target"))?;
                return Ok(());
            }
            app.relay
                .send_to(
                    &target_identity,
                    ServerFrame::RtcOffer {
                        session_id,
                        payload,
                    },
                )
                .await;
            counter!("periscope_frames_relayed_total", 1, "frame" => "offer");
            Ok(())
        }

        ClientFrame::RtcAnswer {
            session_id,
            target_identity,
            payload,
        } => {
            let Some(route) = app.relay.route(&session_id).await else {
                tx.send(error_frame("Invalid session"))?;
                return Ok(());
            };
            if route.host_identity != identity {
                tx.send(error_frame("Invalid session"))?;
                return Ok(());
            }
            if route.counterpart(identity) != Some(target_identity.as_str()) {
                tx.send(error_frame("Invalid target"))?;
                return Ok(());
            }
            app.relay
                .send_to(
                    &target_identity,
                    ServerFrame::RtcAnswer {
                        session_id,
                        payload,
                    },
                )
                .await;
            counter!("periscope_frames_relayed_total", 1, "frame" => "answer");
            Ok(())
        }

        ClientFrame::RtcIce {
            session_id,
            target_identity,
            payload,
        } => {
            let Some(route) = app.relay.route(&session_id).await else {
                tx.send(error_frame("Invalid session"))?;
                return Ok(());
            };
            if !route.is_participant(identity) {
                tx.send(error_frame("Not part of session"))?;
                return Ok(());
            }
            if route.counterpart(identity) != Some(target_identity.as_str()) {
                tx.send(error_frame("Invalid target"))?;
                return Ok(());
            }
            app.relay
                .send_to(
                    &target_identity,
                    ServerFrame::RtcIce {
                        session_id,
                        payload,
                    },
                )
                .await;
            counter!("periscope_frames_relayed_total", 1, "frame" => "ice");
            Ok(())
        }

        ClientFrame::RtcDisconnect { session_id } => {
            app.relay.disconnect_session(&session_id, identity).await;
            Ok(())
        }

        ClientFrame::RtcInput {
            session_id,
            payload,
        } => {
            // Spurious input after teardown is expected; unauthorized input
            // is dropped with no reply.
            if let Some(route) = app.relay.route(&session_id).await {
                if route.viewer_identity == identity {
                    app.relay
                        .send_to(
                            &route.host_identity,
                            ServerFrame::RtcInput {
                                session_id,
                                payload,
                            },
                        )
                        .await;
                    counter!("periscope_frames_relayed_total", 1, "frame" => "input");
                }
            }
            Ok(())
        }
    }
}

fn error_frame(message: &str) -> ServerFrame {
    ServerFrame::Error {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Relay;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use periscope_proto::{ActivityEvent, ActivityKind, EndReason, PresenceStatus};
    use serde::Serialize;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    const SECRET: &str = "test-secret";

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        email: String,
        exp: i64,
    }

    fn mint_token(identity: &str) -> String {
        let claims = TestClaims {
            sub: identity.to_string(),
            email: format!("{identity}@example.com"),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn app_state() -> AppState {
        AppState {
            relay: Relay::new(Duration::from_millis(30_000)),
            verifier: TokenVerifier::new(SECRET),
            activity: ActivityStore::disabled(),
        }
    }

    struct Peer {
        conn: ConnState,
        tx: FrameSender,
        rx: UnboundedReceiver<ServerFrame>,
    }

    impl Peer {
        async fn send(&mut self, app: &AppState, frame: ClientFrame) {
            handle_frame(frame, &mut self.conn, app, &self.tx)
                .await
                .unwrap();
        }

        /// All frames queued so far. Dispatch is synchronous in these tests,
        /// so anything the relay sent is already here.
        fn drain(&mut self) -> Vec<ServerFrame> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                frames.push(frame);
            }
            frames
        }
    }

    fn unauthenticated() -> Peer {
        let (tx, rx) = mpsc::unbounded_channel();
        Peer {
            conn: ConnState::default(),
            tx,
            rx,
        }
    }

    async fn join(app: &AppState, identity: &str) -> Peer {
        let mut peer = unauthenticated();
        peer.send(
            app,
            ClientFrame::Auth {
                token: mint_token(identity),
            },
        )
        .await;
        assert!(peer
            .drain()
            .iter()
            .any(|f| matches!(f, ServerFrame::AuthOk)));
        peer
    }

    async fn status_of(app: &AppState, identity: &str) -> PresenceStatus {
        app.relay
            .list_online("")
            .await
            .into_iter()
            .find(|u| u.identity == identity)
            .map(|u| u.status)
            .expect("identity should be online")
    }

    #[tokio::test]
    async fn frames_before_auth_are_refused() {
        let app = app_state();
        let mut peer = unauthenticated();

        peer.send(&app, ClientFrame::GetOnlineUsers).await;
        let frames = peer.drain();
        assert!(matches!(
            &frames[..],
            [ServerFrame::Error { message }] if message == "Not authenticated"
        ));
    }

    #[tokio::test]
    async fn bad_token_gets_auth_fail_and_no_registration() {
        let app = app_state();
        let mut peer = unauthenticated();

        peer.send(
            &app,
            ClientFrame::Auth {
                token: "garbage".into(),
            },
        )
        .await;
        let frames = peer.drain();
        assert!(matches!(&frames[..], [ServerFrame::AuthFail { .. }]));
        assert!(app.relay.list_online("").await.is_empty());
    }

    #[tokio::test]
    async fn request_against_self_offline_or_busy_is_rejected_immediately() {
        let app = app_state();
        let mut a = join(&app, "a").await;
        let mut b = join(&app, "b").await;
        let mut c = join(&app, "c").await;
        a.drain();

        for target in ["a", "ghost"] {
            a.send(
                &app,
                ClientFrame::RtcRequest {
                    target_identity: target.into(),
                },
            )
            .await;
            let frames = a.drain();
            assert!(
                frames.iter().any(|f| matches!(
                    f,
                    ServerFrame::RtcRejected { session_id, .. } if session_id.is_empty()
                )),
                "request for {target} should be rejected"
            );
        }

        // b and c pair up; a third request naming either party must fail.
        b.send(
            &app,
            ClientFrame::RtcRequest {
                target_identity: "c".into(),
            },
        )
        .await;
        assert!(b.drain().iter().all(|f| !matches!(f, ServerFrame::RtcRejected { .. })));
        c.drain();

        a.send(
            &app,
            ClientFrame::RtcRequest {
                target_identity: "c".into(),
            },
        )
        .await;
        assert!(a.drain().iter().any(|f| matches!(
            f,
            ServerFrame::RtcRejected { session_id, .. } if session_id.is_empty()
        )));
    }

    #[tokio::test]
    async fn offer_from_non_viewer_is_never_relayed() {
        let app = app_state();
        let mut viewer = join(&app, "viewer").await;
        let mut host = join(&app, "host").await;
        let mut outsider = join(&app, "outsider").await;

        viewer
            .send(
                &app,
                ClientFrame::RtcRequest {
                    target_identity: "host".into(),
                },
            )
            .await;
        let session_id = host
            .drain()
            .into_iter()
            .find_map(|f| match f {
                ServerFrame::RtcIncoming { session_id, .. } => Some(session_id),
                _ => None,
            })
            .unwrap();
        host.send(
            &app,
            ClientFrame::RtcAccept {
                session_id: session_id.clone(),
                viewer_identity: "viewer".into(),
            },
        )
        .await;
        viewer.drain();
        host.drain();
        outsider.drain();

        // The host holds the session but not the viewer role for offers.
        host.send(
            &app,
            ClientFrame::RtcOffer {
                session_id: session_id.clone(),
                target_identity: "viewer".into(),
                payload: json!({"sdp": "bogus"}),
            },
        )
        .await;
        assert!(host.drain().iter().any(|f| matches!(
            f,
            ServerFrame::Error { message } if message == "Invalid session"
        )));
        assert!(viewer
            .drain()
            .iter()
            .all(|f| !matches!(f, ServerFrame::RtcOffer { .. })));

        // Neither does a third party with no standing at all.
        outsider
            .send(
                &app,
                ClientFrame::RtcOffer {
                    session_id,
                    target_identity: "host".into(),
                    payload: json!({"sdp": "bogus"}),
                },
            )
            .await;
        assert!(outsider.drain().iter().any(|f| matches!(
            f,
            ServerFrame::Error { message } if message == "Invalid session"
        )));
        assert!(host
            .drain()
            .iter()
            .all(|f| !matches!(f, ServerFrame::RtcOffer { .. })));
    }

    #[tokio::test]
    async fn unauthorized_input_is_dropped_without_a_reply() {
        let app = app_state();
        let mut viewer = join(&app, "viewer").await;
        let mut host = join(&app, "host").await;

        viewer
            .send(
                &app,
                ClientFrame::RtcRequest {
                    target_identity: "host".into(),
                },
            )
            .await;
        let session_id = host
            .drain()
            .into_iter()
            .find_map(|f| match f {
                ServerFrame::RtcIncoming { session_id, .. } => Some(session_id),
                _ => None,
            })
            .unwrap();
        host.send(
            &app,
            ClientFrame::RtcAccept {
                session_id: session_id.clone(),
                viewer_identity: "viewer".into(),
            },
        )
        .await;
        viewer.drain();
        host.drain();

        // Input flowing host -> viewer does not exist in this protocol.
        host.send(
            &app,
            ClientFrame::RtcInput {
                session_id: session_id.clone(),
                payload: json!({"input_type": "mouse_move", "x": 1, "y": 2}),
            },
        )
        .await;
        assert!(host.drain().is_empty());
        assert!(viewer.drain().is_empty());

        // Late input against a dead session is equally silent.
        app.relay
            .end_session(&session_id, EndReason::UserDisconnected)
            .await;
        viewer.drain();
        host.drain();
        viewer
            .send(
                &app,
                ClientFrame::RtcInput {
                    session_id,
                    payload: json!({"input_type": "mouse_move", "x": 1, "y": 2}),
                },
            )
            .await;
        assert!(viewer.drain().is_empty());
        assert!(host.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_request_times_out_with_exactly_one_rejection() {
        let app = app_state();
        let mut viewer = join(&app, "viewer").await;
        let mut host = join(&app, "host").await;

        viewer
            .send(
                &app,
                ClientFrame::RtcRequest {
                    target_identity: "host".into(),
                },
            )
            .await;
        let session_id = host
            .drain()
            .into_iter()
            .find_map(|f| match f {
                ServerFrame::RtcIncoming { session_id, .. } => Some(session_id),
                _ => None,
            })
            .unwrap();
        viewer.drain();

        tokio::time::sleep(Duration::from_millis(30_100)).await;

        let rejections: Vec<_> = viewer
            .drain()
            .into_iter()
            .filter(|f| matches!(f, ServerFrame::RtcRejected { .. }))
            .collect();
        assert_eq!(rejections.len(), 1);
        let ServerFrame::RtcRejected { reason, .. } = &rejections[0] else {
            unreachable!();
        };
        assert_eq!(reason.as_deref(), Some("timeout"));

        // A stale accept racing the fired timeout fails cleanly.
        host.send(
            &app,
            ClientFrame::RtcAccept {
                session_id,
                viewer_identity: "viewer".into(),
            },
        )
        .await;
        assert!(host.drain().iter().any(|f| matches!(
            f,
            ServerFrame::Error { message } if message == "Invalid session"
        )));
        assert_eq!(status_of(&app, "host").await, PresenceStatus::Available);
        assert_eq!(status_of(&app, "viewer").await, PresenceStatus::Available);
    }

    #[tokio::test]
    async fn activity_batch_is_acknowledged() {
        let app = app_state();
        let mut peer = join(&app, "a").await;

        peer.send(
            &app,
            ClientFrame::ActivityBatch {
                events: vec![ActivityEvent::new(
                    ActivityKind::Key {
                        keystrokes: 12,
                        recent_keys: vec![40, 41],
                    },
                    periscope_proto::now_millis(),
                )],
                batch_id: "batch-7".into(),
            },
        )
        .await;
        assert!(peer.drain().iter().any(|f| matches!(
            f,
            ServerFrame::BatchAck { batch_id } if batch_id == "batch-7"
        )));
    }

    #[tokio::test]
    async fn full_control_flow_request_accept_relay_disconnect() {
        let app = app_state();
        let mut a = join(&app, "a").await;
        let mut b = join(&app, "b").await;
        a.drain();
        b.drain();

        // A asks to view B's screen.
        a.send(
            &app,
            ClientFrame::RtcRequest {
                target_identity: "b".into(),
            },
        )
        .await;
        let incoming = b.drain();
        let (session_id, viewer_label) = incoming
            .iter()
            .find_map(|f| match f {
                ServerFrame::RtcIncoming {
                    session_id,
                    viewer_identity,
                    viewer_label,
                } => {
                    assert_eq!(viewer_identity, "a");
                    Some((session_id.clone(), viewer_label.clone()))
                }
                _ => None,
            })
            .expect("host should see the incoming request");
        assert_eq!(viewer_label, "a@example.com");

        // B grants it.
        b.send(
            &app,
            ClientFrame::RtcAccept {
                session_id: session_id.clone(),
                viewer_identity: "a".into(),
            },
        )
        .await;
        assert!(a.drain().iter().any(|f| matches!(
            f,
            ServerFrame::RtcAccepted { session_id: s, host_identity } if s == &session_id && host_identity == "b"
        )));
        assert_eq!(status_of(&app, "b").await, PresenceStatus::Hosting);
        assert_eq!(status_of(&app, "a").await, PresenceStatus::Viewing);
        b.drain();

        // Negotiation payloads ride through unchanged.
        let offer = json!({"sdp": "v=0 fake-offer", "type": "offer"});
        a.send(
            &app,
            ClientFrame::RtcOffer {
                session_id: session_id.clone(),
                target_identity: "b".into(),
                payload: offer.clone(),
            },
        )
        .await;
        assert!(b.drain().iter().any(|f| matches!(
            f,
            ServerFrame::RtcOffer { payload, .. } if payload == &offer
        )));

        let answer = json!({"sdp": "v=0 fake-answer", "type": "answer"});
        b.send(
            &app,
            ClientFrame::RtcAnswer {
                session_id: session_id.clone(),
                target_identity: "a".into(),
                payload: answer.clone(),
            },
        )
        .await;
        assert!(a.drain().iter().any(|f| matches!(
            f,
            ServerFrame::RtcAnswer { payload, .. } if payload == &answer
        )));

        let input = json!({"input_type": "key_down", "key": "a", "code": "KeyA"});
        a.send(
            &app,
            ClientFrame::RtcInput {
                session_id: session_id.clone(),
                payload: input.clone(),
            },
        )
        .await;
        assert!(b.drain().iter().any(|f| matches!(
            f,
            ServerFrame::RtcInput { payload, .. } if payload == &input
        )));

        // B hangs up; A learns why and both become available again.
        b.send(
            &app,
            ClientFrame::RtcDisconnect {
                session_id: session_id.clone(),
            },
        )
        .await;
        assert!(a.drain().iter().any(|f| matches!(
            f,
            ServerFrame::RtcDisconnected {
                reason: Some(EndReason::UserDisconnected),
                ..
            }
        )));
        assert_eq!(status_of(&app, "a").await, PresenceStatus::Available);
        assert_eq!(status_of(&app, "b").await, PresenceStatus::Available);
        assert!(app.relay.route(&session_id).await.is_none());
    }

    #[tokio::test]
    async fn reject_notifies_viewer_through_the_single_teardown_path() {
        let app = app_state();
        let mut viewer = join(&app, "viewer").await;
        let mut host = join(&app, "host").await;

        viewer
            .send(
                &app,
                ClientFrame::RtcRequest {
                    target_identity: "host".into(),
                },
            )
            .await;
        let session_id = host
            .drain()
            .into_iter()
            .find_map(|f| match f {
                ServerFrame::RtcIncoming { session_id, .. } => Some(session_id),
                _ => None,
            })
            .unwrap();
        viewer.drain();

        host.send(
            &app,
            ClientFrame::RtcReject {
                session_id: session_id.clone(),
                viewer_identity: "viewer".into(),
            },
        )
        .await;

        let rejections: Vec<_> = viewer
            .drain()
            .into_iter()
            .filter_map(|f| match f {
                ServerFrame::RtcRejected { session_id: s, reason } => Some((s, reason)),
                _ => None,
            })
            .collect();
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].0, session_id);
        assert_eq!(rejections[0].1.as_deref(), Some("rejected"));
        assert!(app.relay.route(&session_id).await.is_none());

        // Rejecting again: the session is gone.
        host.drain();
        host.send(
            &app,
            ClientFrame::RtcReject {
                session_id,
                viewer_identity: "viewer".into(),
            },
        )
        .await;
        assert!(host.drain().iter().any(|f| matches!(
            f,
            ServerFrame::Error { message } if message == "Invalid session"
        )));
    }
}
