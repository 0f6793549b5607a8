//! Session-scoped context shared with the acceptor and every relay

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{info_span, Span};
use uuid::Uuid;

use portway_core::ConnectionId;

/// Identity, tracing span and counters for one session.
///
/// Created with the session and handed to the acceptor and relays as an
/// `Arc`, so logs from every task carry the same session id.
#[derive(Debug)]
pub struct SessionContext {
    id: String,
    span: Span,
    next_connection: AtomicU64,
    accepted: AtomicU64,
    active: AtomicUsize,
}

impl SessionContext {
    pub fn new() -> Self {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let span = info_span!("session", id = %id);
        Self {
            id,
            span,
            next_connection: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            active: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Allocate the id for a newly accepted connection
    pub fn next_connection_id(&self) -> ConnectionId {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.next_connection.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Child span for one connection
    pub fn connection_span(&self, conn: ConnectionId, peer: &str) -> Span {
        info_span!(parent: &self.span, "conn", id = conn, peer = %peer)
    }

    /// Mark a connection live until the returned guard drops.
    pub fn track(self: &Arc<Self>) -> ActiveConnection {
        self.active.fetch_add(1, Ordering::AcqRel);
        ActiveConnection { ctx: Arc::clone(self) }
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn total_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Live-connection guard from [`SessionContext::track`]
#[derive(Debug)]
pub struct ActiveConnection {
    ctx: Arc<SessionContext>,
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.ctx.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_are_short_and_distinct() {
        let a = SessionContext::new();
        let b = SessionContext::new();
        assert_eq!(a.id().len(), 8);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_connection_ids_increase() {
        let ctx = SessionContext::new();
        assert_eq!(ctx.next_connection_id(), 1);
        assert_eq!(ctx.next_connection_id(), 2);
        assert_eq!(ctx.total_accepted(), 2);
    }

    #[test]
    fn test_active_guard() {
        let ctx = Arc::new(SessionContext::new());
        assert_eq!(ctx.active_connections(), 0);

        let first = ctx.track();
        let second = ctx.track();
        assert_eq!(ctx.active_connections(), 2);

        drop(first);
        assert_eq!(ctx.active_connections(), 1);
        drop(second);
        assert_eq!(ctx.active_connections(), 0);
    }
}
