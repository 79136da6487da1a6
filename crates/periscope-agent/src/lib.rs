//! Peer-side counterpart of the Periscope relay: owns the outbound
//! connection from a participating process, reconnects with backoff, replays
//! authentication, batches telemetry with at-least-once acknowledgement, and
//! keeps an advisory record of the session this peer is part of. Authority
//! over sessions always remains server-side; the two sides share only
//! messages.

pub mod backoff;
pub mod buffer;
pub mod client;
pub mod session;

pub use backoff::{Backoff, ReconnectPolicy};
pub use buffer::ActivityBuffer;
pub use client::{spawn, AgentCommand, AgentConfig, AgentError, AgentEvent, AgentHandle};
pub use session::{LocalSession, SessionRecord, SessionRole};
