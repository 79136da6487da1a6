/// Which side of the control session this peer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Host,
    Viewer,
}

/// Advisory record of the one session this peer participates in. The relay
/// holds the authoritative state; this exists so the embedding process knows
/// which role it plays without a round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub role: SessionRole,
    pub remote_identity: String,
}

#[derive(Debug, Default)]
pub struct LocalSession {
    current: Option<SessionRecord>,
}

impl LocalSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set when this peer grants an incoming request.
    pub fn set_hosting(&mut self, session_id: String, viewer_identity: String) {
        self.current = Some(SessionRecord {
            session_id,
            role: SessionRole::Host,
            remote_identity: viewer_identity,
        });
    }

    /// Set when the relay reports our request was accepted.
    pub fn set_viewing(&mut self, session_id: String, host_identity: String) {
        self.current = Some(SessionRecord {
            session_id,
            role: SessionRole::Viewer,
            remote_identity: host_identity,
        });
    }

    /// Cleared on any disconnect or rejection notice.
    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<&SessionRecord> {
        self.current.as_ref()
    }

    pub fn in_session(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_host(&self) -> bool {
        matches!(
            self.current,
            Some(SessionRecord {
                role: SessionRole::Host,
                ..
            })
        )
    }

    pub fn is_viewer(&self) -> bool {
        matches!(
            self.current,
            Some(SessionRecord {
                role: SessionRole::Viewer,
                ..
            })
        )
    }
}
