//! Outstanding signaling requests of one session.
//!
//! Requests are answered in the order they were sent, so they are kept in
//! a FIFO. A reply to request N resolves it and silently discards every
//! older entry: their replies were lost or reordered, and the newer reply
//! proves the peer is alive. Only the oldest entry's deadline matters for
//! the signaling timeout.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::protocol::jingle::Action;
use crate::xml::XmlElement;

/// Separates the session id from the sequence number in request ids.
const ID_SEPARATOR: char = ':';

// ── TrackedRequest ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TrackedRequest {
    pub id: String,
    pub action: Action,
    /// When the request was handed to the signaling transport.
    pub sent_at: Instant,
}

impl TrackedRequest {
    pub fn is_expired(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.sent_at) >= timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.sent_at.elapsed()
    }
}

// ── PendingRequests ──────────────────────────────────────────────

#[derive(Debug)]
pub struct PendingRequests {
    prefix: String,
    next_seq: u64,
    timeout: Duration,
    queue: VecDeque<TrackedRequest>,
}

impl PendingRequests {
    pub fn new(session_id: &str, timeout: Duration) -> Self {
        Self {
            prefix: session_id.to_string(),
            next_seq: 1,
            timeout,
            queue: VecDeque::new(),
        }
    }

    /// Stamp a fresh id on `stanza` and start tracking it.
    pub fn register(&mut self, stanza: &mut XmlElement, action: Action, now: Instant) -> String {
        let id = format!("{}{ID_SEPARATOR}{}", self.prefix, self.next_seq);
        self.next_seq += 1;
        stanza.set_attr("id", id.as_str());
        self.queue.push_back(TrackedRequest {
            id: id.clone(),
            action,
            sent_at: now,
        });
        id
    }

    /// Resolve the request with `id`, pruning everything sent before it.
    /// Returns `None` for unknown (already pruned or foreign) ids.
    pub fn resolve(&mut self, id: &str) -> Option<TrackedRequest> {
        let position = self.queue.iter().position(|r| r.id == id)?;
        let pruned: Vec<_> = self.queue.drain(..position).collect();
        if !pruned.is_empty() {
            debug!(
                id,
                pruned = pruned.len(),
                "older signaling requests resolved implicitly"
            );
        }
        self.queue.pop_front()
    }

    /// When the oldest outstanding request times out.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.front().map(|r| r.sent_at + self.timeout)
    }

    /// The oldest request if it has run out of time.
    pub fn expired(&self, now: Instant) -> Option<&TrackedRequest> {
        self.queue
            .front()
            .filter(|r| r.is_expired(self.timeout, now))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Session id encoded in a request id produced by [`PendingRequests`].
pub fn session_of_request(id: &str) -> Option<&str> {
    id.split_once(ID_SEPARATOR).map(|(sid, _)| sid)
}
