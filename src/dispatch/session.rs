//! Run-state of one batch.
//!
//! Every request id sits in exactly one of `pending`, `in_flight` or `completed`.
//! `completed` only grows. Cancellation moves everything still pending or in flight
//! into `completed` in one step under the lock and is never undone.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::types::Response;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel_requests` or a [`super::CancelHandle`].
    Cancelled,
    /// The dispatcher was closed.
    Closed,
}

/// Cancellation signal shared by a session and its handles. The first reason wins.
#[derive(Debug, Default)]
pub struct SessionControl {
    token: CancellationToken,
    reason: OnceLock<CancelReason>,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Error recorded for requests swept by this session's cancellation.
    pub fn error(&self) -> Error {
        match self.reason() {
            Some(CancelReason::Closed) => Error::Closed,
            _ => Error::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    pending: HashSet<String>,
    in_flight: HashSet<String>,
    completed: HashMap<String, Response>,
    cancelled: bool,
}

/// Mutable state for one `send_requests` / `retry_*` call.
#[derive(Debug)]
pub struct DispatchSession {
    id: Uuid,
    control: Arc<SessionControl>,
    state: Mutex<SessionState>,
}

impl DispatchSession {
    pub fn new<'a>(
        control: Arc<SessionControl>,
        request_ids: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let state = SessionState {
            pending: request_ids.into_iter().map(str::to_string).collect(),
            ..Default::default()
        };
        Self {
            id: Uuid::new_v4(),
            control,
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn control(&self) -> &Arc<SessionControl> {
        &self.control
    }

    // Transitions never leave the state half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pending → InFlight. Refused once the session is cancelled.
    pub fn start(&self, request_id: &str) -> bool {
        let mut st = self.lock();
        if st.cancelled || self.control.is_cancelled() {
            return false;
        }
        if st.pending.remove(request_id) {
            st.in_flight.insert(request_id.to_string());
            true
        } else {
            false
        }
    }

    /// InFlight → Pending, ahead of a retry.
    pub fn requeue(&self, request_id: &str) -> bool {
        let mut st = self.lock();
        if st.cancelled {
            return false;
        }
        if st.in_flight.remove(request_id) {
            st.pending.insert(request_id.to_string());
            true
        } else {
            false
        }
    }

    /// Record a terminal response. Returns `false` if the id was already terminal
    /// (e.g. swept by cancellation) or is unknown to this session.
    pub fn resolve(&self, response: Response) -> bool {
        let mut st = self.lock();
        let id = response.request_id.clone();
        if st.completed.contains_key(&id) {
            return false;
        }
        let known = st.pending.remove(&id) | st.in_flight.remove(&id);
        if !known {
            return false;
        }
        st.completed.insert(id, response);
        true
    }

    /// Mark cancelled and force every non-terminal request to `error`.
    ///
    /// Returns only the responses created by this call; a second call returns nothing.
    pub fn cancel(&self, error: &Error) -> Vec<Response> {
        let mut st = self.lock();
        st.cancelled = true;
        let message = error.to_string();
        let mut swept: Vec<String> = st.pending.drain().collect();
        swept.extend(st.in_flight.drain());
        swept.sort();
        let mut out = Vec::with_capacity(swept.len());
        for id in swept {
            let response = Response::failure(&id, &message);
            st.completed.insert(id, response.clone());
            out.push(response);
        }
        out
    }

    pub fn is_complete(&self) -> bool {
        let st = self.lock();
        st.pending.is_empty() && st.in_flight.is_empty()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let st = self.lock();
        SessionSnapshot {
            pending: st.pending.len(),
            in_flight: st.in_flight.len(),
            completed: st.completed.len(),
            cancelled: st.cancelled,
        }
    }

    pub fn take_completed(&self) -> HashMap<String, Response> {
        std::mem::take(&mut self.lock().completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(ids: &[&str]) -> DispatchSession {
        DispatchSession::new(Arc::new(SessionControl::new()), ids.iter().copied())
    }

    #[test]
    fn test_lifecycle_transitions() {
        let s = session(&["a", "b"]);
        assert!(s.start("a"));
        assert!(!s.start("a"));
        assert_eq!(
            s.snapshot(),
            SessionSnapshot {
                pending: 1,
                in_flight: 1,
                completed: 0,
                cancelled: false
            }
        );

        assert!(s.requeue("a"));
        assert!(s.start("a"));
        assert!(s.resolve(Response::success("a", "ok")));
        assert!(!s.resolve(Response::failure("a", "late")));
        assert!(!s.is_complete());

        // Resolution straight from pending (configuration errors never start).
        assert!(s.resolve(Response::failure("b", "unknown provider")));
        assert!(s.is_complete());
        let done = s.take_completed();
        assert_eq!(done["a"].content, "ok");
        assert!(done["b"].is_error());
    }

    #[test]
    fn test_cancel_sweeps_once() {
        let s = session(&["a", "b", "c"]);
        assert!(s.start("b"));
        assert!(s.resolve(Response::success("c", "done")));

        let swept = s.cancel(&Error::Cancelled);
        let ids: Vec<_> = swept.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(swept.iter().all(|r| r.error.as_deref() == Some("cancelled")));

        assert!(s.cancel(&Error::Cancelled).is_empty());
        assert!(!s.start("a"));
        assert!(!s.resolve(Response::success("b", "too late")));

        let done = s.take_completed();
        assert_eq!(done.len(), 3);
        assert_eq!(done["c"].content, "done");
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let s = session(&["a"]);
        assert!(!s.resolve(Response::success("zzz", "x")));
        assert_eq!(s.snapshot().completed, 0);
    }

    #[test]
    fn test_control_first_reason_wins() {
        let control = SessionControl::new();
        control.cancel(CancelReason::Closed);
        control.cancel(CancelReason::Cancelled);
        assert!(control.is_cancelled());
        assert!(matches!(control.error(), Error::Closed));
    }
}
