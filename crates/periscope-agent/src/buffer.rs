use periscope_proto::{generate_batch_id, ActivityEvent, ActivityKind};

/// Events older than this are considered delivered once a batch is
/// acknowledged.
pub const RETENTION_MS: i64 = 60_000;

/// Unbounded append-only telemetry buffer with a single-batch-in-flight
/// acknowledgement valve.
///
/// At most one batch may be awaiting acknowledgement at a time; the matching
/// ack prunes everything older than the retention window (not just the sent
/// events, since new ones may have arrived meanwhile) and releases the valve.
#[derive(Debug, Default)]
pub struct ActivityBuffer {
    events: Vec<ActivityEvent>,
    in_flight: Option<String>,
}

impl ActivityBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps and buffers one locally observed event.
    pub fn record(&mut self, kind: ActivityKind, now_ms: i64) -> &ActivityEvent {
        self.events.push(ActivityEvent::new(kind, now_ms));
        self.events.last().expect("just pushed")
    }

    /// Takes the entire buffer as one batch under a fresh batch id, or
    /// `None` when the buffer is empty or a batch is already in flight.
    pub fn take_batch(&mut self) -> Option<(String, Vec<ActivityEvent>)> {
        if self.events.is_empty() || self.in_flight.is_some() {
            return None;
        }
        let batch_id = generate_batch_id();
        self.in_flight = Some(batch_id.clone());
        Some((batch_id, self.events.clone()))
    }

    /// Applies an acknowledgement. A non-matching batch id is ignored (a
    /// stale ack must not prune events it never covered).
    pub fn acknowledge(&mut self, batch_id: &str, now_ms: i64) -> bool {
        if self.in_flight.as_deref() != Some(batch_id) {
            return false;
        }
        let cutoff = now_ms - RETENTION_MS;
        self.events.retain(|event| event.timestamp > cutoff);
        self.in_flight = None;
        true
    }

    /// Releases the valve without pruning. Used when the connection drops: a
    /// fresh socket can never deliver the outstanding ack, so the same events
    /// are retried on the next tick under a new batch id.
    pub fn reset_in_flight(&mut self) {
        self.in_flight = None;
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mouse() -> ActivityKind {
        ActivityKind::Mouse {
            x: 10,
            y: 20,
            movements: 1,
        }
    }

    fn key() -> ActivityKind {
        ActivityKind::Key {
            keystrokes: 3,
            recent_keys: vec![30, 31, 32],
        }
    }

    #[test]
    fn empty_buffer_yields_no_batch() {
        let mut buffer = ActivityBuffer::new();
        assert!(buffer.take_batch().is_none());
    }

    #[test]
    fn only_one_batch_in_flight_at_a_time() {
        let mut buffer = ActivityBuffer::new();
        buffer.record(mouse(), 1_000);

        let (batch_id, events) = buffer.take_batch().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(buffer.in_flight(), Some(batch_id.as_str()));

        buffer.record(key(), 2_000);
        assert!(buffer.take_batch().is_none());
    }

    #[test]
    fn ack_prunes_aged_events_and_releases_the_valve() {
        let mut buffer = ActivityBuffer::new();
        buffer.record(mouse(), 1_000);
        buffer.record(key(), 5_000);

        let (batch_id, _) = buffer.take_batch().unwrap();

        // Arrived after the batch was sent; young enough to survive the prune.
        buffer.record(mouse(), 55_000);

        assert!(buffer.acknowledge(&batch_id, 61_500));
        assert_eq!(buffer.len(), 1);
        assert!(buffer.in_flight().is_none());
        assert!(buffer.take_batch().is_some());
    }

    #[test]
    fn ack_past_the_retention_window_leaves_the_buffer_empty() {
        let mut buffer = ActivityBuffer::new();
        for ts in [1_000, 2_000, 3_000] {
            buffer.record(mouse(), ts);
        }
        let (batch_id, _) = buffer.take_batch().unwrap();
        assert!(buffer.acknowledge(&batch_id, 70_000));
        assert!(buffer.is_empty());
    }

    #[test]
    fn mismatched_ack_is_ignored() {
        let mut buffer = ActivityBuffer::new();
        buffer.record(mouse(), 1_000);
        let (batch_id, _) = buffer.take_batch().unwrap();

        assert!(!buffer.acknowledge("someone-elses-batch", 90_000));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.in_flight(), Some(batch_id.as_str()));
    }

    #[test]
    fn reset_allows_retry_under_a_fresh_batch_id() {
        let mut buffer = ActivityBuffer::new();
        buffer.record(mouse(), 1_000);
        let (first_id, _) = buffer.take_batch().unwrap();

        buffer.reset_in_flight();
        let (second_id, events) = buffer.take_batch().unwrap();
        assert_ne!(first_id, second_id);
        assert_eq!(events.len(), 1);
    }
}
