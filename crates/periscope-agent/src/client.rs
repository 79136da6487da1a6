use std::time::Duration;

use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use periscope_proto::{now_millis, ActivityKind, ClientFrame, OnlineUser, ServerFrame};

use crate::backoff::Backoff;
use crate::buffer::ActivityBuffer;
use crate::session::LocalSession;

/// How often buffered telemetry is flushed to the relay.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(60_000);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay base URL, e.g. `ws://localhost:4310`.
    pub server_url: String,
    /// Login token replayed after every (re)connect.
    pub token: String,
}

/// Server pushes and link transitions surfaced to the embedding process.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Connected,
    Disconnected,
    /// The relay refused our token. Fatal: the agent stops, resumable only
    /// by a fresh login spawning a new agent.
    AuthFailed { reason: String },
    /// The reconnect schedule ran out of attempts.
    Abandoned,
    OnlineUsers(Vec<OnlineUser>),
    IncomingRequest {
        session_id: String,
        viewer_identity: String,
        viewer_label: String,
    },
    Accepted {
        session_id: String,
        host_identity: String,
    },
    Rejected {
        session_id: String,
        reason: Option<String>,
    },
    Offer {
        session_id: String,
        payload: Value,
    },
    Answer {
        session_id: String,
        payload: Value,
    },
    Ice {
        session_id: String,
        payload: Value,
    },
    SessionEnded {
        session_id: String,
        reason: Option<String>,
    },
    Input {
        session_id: String,
        payload: Value,
    },
    ServerError(String),
}

/// Requests from the embedding process to the connection task.
#[derive(Debug, Clone)]
pub enum AgentCommand {
    RequestControl { target_identity: String },
    Accept { session_id: String, viewer_identity: String },
    Reject { session_id: String, viewer_identity: String },
    SendOffer { session_id: String, target_identity: String, payload: Value },
    SendAnswer { session_id: String, target_identity: String, payload: Value },
    SendIce { session_id: String, target_identity: String, payload: Value },
    Disconnect { session_id: String },
    SendInput { session_id: String, payload: Value },
    /// Buffer one telemetry event. Works offline; delivery waits for the
    /// next flush on a live link.
    Record(ActivityKind),
    Shutdown,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent task stopped")]
    Stopped,
}

/// Command side of a spawned agent.
#[derive(Clone)]
pub struct AgentHandle {
    commands: mpsc::UnboundedSender<AgentCommand>,
}

impl AgentHandle {
    pub fn send(&self, command: AgentCommand) -> Result<(), AgentError> {
        self.commands.send(command).map_err(|_| AgentError::Stopped)
    }

    pub fn request_control(&self, target_identity: impl Into<String>) -> Result<(), AgentError> {
        self.send(AgentCommand::RequestControl {
            target_identity: target_identity.into(),
        })
    }

    pub fn accept(
        &self,
        session_id: impl Into<String>,
        viewer_identity: impl Into<String>,
    ) -> Result<(), AgentError> {
        self.send(AgentCommand::Accept {
            session_id: session_id.into(),
            viewer_identity: viewer_identity.into(),
        })
    }

    pub fn reject(
        &self,
        session_id: impl Into<String>,
        viewer_identity: impl Into<String>,
    ) -> Result<(), AgentError> {
        self.send(AgentCommand::Reject {
            session_id: session_id.into(),
            viewer_identity: viewer_identity.into(),
        })
    }

    pub fn disconnect(&self, session_id: impl Into<String>) -> Result<(), AgentError> {
        self.send(AgentCommand::Disconnect {
            session_id: session_id.into(),
        })
    }

    pub fn record(&self, kind: ActivityKind) -> Result<(), AgentError> {
        self.send(AgentCommand::Record(kind))
    }

    pub fn shutdown(&self) -> Result<(), AgentError> {
        self.send(AgentCommand::Shutdown)
    }
}

/// Spawns the connection task. Events arrive on the returned receiver until
/// the agent shuts down, fails authentication, or abandons reconnecting.
pub fn spawn(config: AgentConfig) -> (AgentHandle, mpsc::UnboundedReceiver<AgentEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(run(config, cmd_rx, event_tx));
    (AgentHandle { commands: cmd_tx }, event_rx)
}

enum ConnectionOutcome {
    Dropped,
    AuthRejected,
    Shutdown,
}

async fn run(
    config: AgentConfig,
    mut commands: mpsc::UnboundedReceiver<AgentCommand>,
    events: mpsc::UnboundedSender<AgentEvent>,
) {
    let ws_url = format!("{}/ws", config.server_url.trim_end_matches('/'));
    let mut backoff = Backoff::default();
    let mut buffer = ActivityBuffer::new();
    let mut local = LocalSession::new();

    loop {
        match connect_async(&ws_url).await {
            Ok((stream, _)) => {
                backoff.reset();
                match serve_connection(
                    stream,
                    &config,
                    &mut commands,
                    &events,
                    &mut buffer,
                    &mut local,
                )
                .await
                {
                    ConnectionOutcome::Shutdown => return,
                    ConnectionOutcome::AuthRejected => return,
                    ConnectionOutcome::Dropped => {
                        // The outstanding ack can never arrive on a fresh
                        // socket, and the relay's close cascade has already
                        // ended our session.
                        buffer.reset_in_flight();
                        local.clear();
                        let _ = events.send(AgentEvent::Disconnected);
                    }
                }
            }
            Err(err) => {
                debug!(%err, "connect failed");
            }
        }

        let Some(delay) = backoff.next_delay() else {
            let _ = events.send(AgentEvent::Abandoned);
            return;
        };
        if !wait_before_retry(delay, &mut commands, &mut buffer).await {
            return;
        }
    }
}

/// Sleeps out the backoff delay while still honoring Record and Shutdown
/// commands. Returns `false` when the agent should stop.
async fn wait_before_retry(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<AgentCommand>,
    buffer: &mut ActivityBuffer,
) -> bool {
    let deadline = sleep(delay);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return true,
            cmd = commands.recv() => match cmd {
                None | Some(AgentCommand::Shutdown) => return false,
                Some(AgentCommand::Record(kind)) => {
                    buffer.record(kind, now_millis());
                }
                Some(other) => {
                    warn!(?other, "dropping command while disconnected");
                }
            },
        }
    }
}

async fn serve_connection(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    config: &AgentConfig,
    commands: &mut mpsc::UnboundedReceiver<AgentCommand>,
    events: &mpsc::UnboundedSender<AgentEvent>,
    buffer: &mut ActivityBuffer,
    local: &mut LocalSession,
) -> ConnectionOutcome {
    let (mut write, mut read) = stream.split();

    // Authentication replay: normal operation resumes only on auth_ok.
    let auth = ClientFrame::Auth {
        token: config.token.clone(),
    };
    if send_frame(&mut write, &auth).await.is_err() {
        return ConnectionOutcome::Dropped;
    }

    let mut authenticated = false;
    let mut flush = interval_at(Instant::now() + FLUSH_INTERVAL, FLUSH_INTERVAL);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = read.next() => {
                let Some(Ok(msg)) = msg else {
                    return ConnectionOutcome::Dropped;
                };
                match msg {
                    Message::Text(text) => {
                        let frame = match serde_json::from_str::<ServerFrame>(&text) {
                            Ok(frame) => frame,
                            Err(err) => {
                                debug!(%err, "ignoring unparsable server frame");
                                continue;
                            }
                        };
                        if let Some(outcome) = handle_server_frame(
                            frame,
                            &mut write,
                            events,
                            buffer,
                            local,
                            &mut authenticated,
                        )
                        .await
                        {
                            return outcome;
                        }
                    }
                    Message::Close(_) => return ConnectionOutcome::Dropped,
                    _ => {}
                }
            }
            _ = flush.tick(), if authenticated => {
                if let Some((batch_id, batch)) = buffer.take_batch() {
                    let frame = ClientFrame::ActivityBatch {
                        events: batch,
                        batch_id,
                    };
                    if send_frame(&mut write, &frame).await.is_err() {
                        return ConnectionOutcome::Dropped;
                    }
                }
            }
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    let _ = write.send(Message::Close(None)).await;
                    return ConnectionOutcome::Shutdown;
                };
                match handle_command(cmd, &mut write, buffer, local, authenticated).await {
                    CommandFlow::Continue => {}
                    CommandFlow::Shutdown => {
                        let _ = write.send(Message::Close(None)).await;
                        return ConnectionOutcome::Shutdown;
                    }
                    CommandFlow::LinkLost => return ConnectionOutcome::Dropped,
                }
            }
        }
    }
}

async fn handle_server_frame(
    frame: ServerFrame,
    write: &mut WsSink,
    events: &mpsc::UnboundedSender<AgentEvent>,
    buffer: &mut ActivityBuffer,
    local: &mut LocalSession,
    authenticated: &mut bool,
) -> Option<ConnectionOutcome> {
    match frame {
        ServerFrame::AuthOk => {
            *authenticated = true;
            let _ = events.send(AgentEvent::Connected);
            if send_frame(write, &ClientFrame::GetOnlineUsers).await.is_err() {
                return Some(ConnectionOutcome::Dropped);
            }
        }
        ServerFrame::AuthFail { reason } => {
            let _ = events.send(AgentEvent::AuthFailed { reason });
            return Some(ConnectionOutcome::AuthRejected);
        }
        ServerFrame::BatchAck { batch_id } => {
            buffer.acknowledge(&batch_id, now_millis());
        }
        ServerFrame::OnlineUsers { users } => {
            let _ = events.send(AgentEvent::OnlineUsers(users));
        }
        ServerFrame::RtcIncoming {
            session_id,
            viewer_identity,
            viewer_label,
        } => {
            let _ = events.send(AgentEvent::IncomingRequest {
                session_id,
                viewer_identity,
                viewer_label,
            });
        }
        ServerFrame::RtcAccepted {
            session_id,
            host_identity,
        } => {
            local.set_viewing(session_id.clone(), host_identity.clone());
            let _ = events.send(AgentEvent::Accepted {
                session_id,
                host_identity,
            });
        }
        ServerFrame::RtcRejected { session_id, reason } => {
            local.clear();
            let _ = events.send(AgentEvent::Rejected { session_id, reason });
        }
        ServerFrame::RtcDisconnected { session_id, reason } => {
            local.clear();
            let _ = events.send(AgentEvent::SessionEnded {
                session_id,
                reason: reason.map(|r| r.as_str().to_string()),
            });
        }
        ServerFrame::RtcOffer {
            session_id,
            payload,
        } => {
            let _ = events.send(AgentEvent::Offer {
                session_id,
                payload,
            });
        }
        ServerFrame::RtcAnswer {
            session_id,
            payload,
        } => {
            let _ = events.send(AgentEvent::Answer {
                session_id,
                payload,
            });
        }
        ServerFrame::RtcIce {
            session_id,
            payload,
        } => {
            let _ = events.send(AgentEvent::Ice {
                session_id,
                payload,
            });
        }
        ServerFrame::RtcInput {
            session_id,
            payload,
        } => {
            let _ = events.send(AgentEvent::Input {
                session_id,
                payload,
            });
        }
        ServerFrame::Error { message } => {
            let _ = events.send(AgentEvent::ServerError(message));
        }
    }
    None
}

enum CommandFlow {
    Continue,
    Shutdown,
    LinkLost,
}

async fn handle_command(
    cmd: AgentCommand,
    write: &mut WsSink,
    buffer: &mut ActivityBuffer,
    local: &mut LocalSession,
    authenticated: bool,
) -> CommandFlow {
    match &cmd {
        AgentCommand::Shutdown => return CommandFlow::Shutdown,
        AgentCommand::Record(_) => {}
        _ if !authenticated => {
            warn!("dropping command, link not authenticated yet");
            return CommandFlow::Continue;
        }
        _ => {}
    }

    let frame = match cmd {
        AgentCommand::Shutdown => return CommandFlow::Shutdown,
        AgentCommand::Record(kind) => {
            buffer.record(kind, now_millis());
            return CommandFlow::Continue;
        }
        AgentCommand::RequestControl { target_identity } => {
            ClientFrame::RtcRequest { target_identity }
        }
        AgentCommand::Accept {
            session_id,
            viewer_identity,
        } => {
            local.set_hosting(session_id.clone(), viewer_identity.clone());
            ClientFrame::RtcAccept {
                session_id,
                viewer_identity,
            }
        }
        AgentCommand::Reject {
            session_id,
            viewer_identity,
        } => ClientFrame::RtcReject {
            session_id,
            viewer_identity,
        },
        AgentCommand::SendOffer {
            session_id,
            target_identity,
            payload,
        } => ClientFrame::RtcOffer {
            session_id,
            target_identity,
            payload,
        },
        AgentCommand::SendAnswer {
            session_id,
            target_identity,
            payload,
        } => ClientFrame::RtcAnswer {
            session_id,
            target_identity,
            payload,
        },
        AgentCommand::SendIce {
            session_id,
            target_identity,
            payload,
        } => ClientFrame::RtcIce {
            session_id,
            target_identity,
            payload,
        },
        AgentCommand::Disconnect { session_id } => {
            local.clear();
            ClientFrame::RtcDisconnect { session_id }
        }
        AgentCommand::SendInput {
            session_id,
            payload,
        } => ClientFrame::RtcInput {
            session_id,
            payload,
        },
    };

    if send_frame(write, &frame).await.is_err() {
        return CommandFlow::LinkLost;
    }
    CommandFlow::Continue
}

async fn send_frame(
    write: &mut WsSink,
    frame: &ClientFrame,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = serde_json::to_string(frame).expect("frames serialize");
    write.send(Message::Text(json.into())).await
}
