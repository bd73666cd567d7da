//! Sessions: logical units of work spanning several scopes.
//!
//! A session is opened by a request or by a job without a parent, and can be
//! extended by background continuations. It is reference counted: every
//! attached scope holds it open until that scope ends, and every job queued
//! against it holds a hand-off reservation until the job's scope is attached.
//! The session is finalized exactly once, when the last of these is released.

mod agent;
mod request_reply;
mod table;

pub use agent::{
    AddScope, AgentSessionStore, AttachAggregate, ClaimHandoff, CreateSession, EndScope,
    LoadSession, PurgeEnded, ReleaseHandoff, ReserveHandoff, SessionManagerAgent,
};
pub use request_reply::{create_request_reply, send_response, ResponseChannel};
pub use table::SessionTable;

use crate::scope::ScopeId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque long-lived domain object a session may carry (e.g. an order).
pub type SessionAggregate = Arc<dyn Any + Send + Sync>;

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a session.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    scopes: BTreeSet<ScopeId>,
    active: BTreeSet<ScopeId>,
    pending_handoffs: usize,
    aggregate: Option<SessionAggregate>,
}

impl Session {
    /// Open a session owned by `scope_id`.
    #[must_use]
    pub fn open(scope_id: ScopeId) -> Self {
        Self {
            id: SessionId::generate(),
            created_at: Utc::now(),
            ended_at: None,
            scopes: BTreeSet::from([scope_id]),
            active: BTreeSet::from([scope_id]),
            pending_handoffs: 0,
            aggregate: None,
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// When the session was opened.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the session was finalized, if it has been.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Whether the session has been finalized.
    #[must_use]
    pub const fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Every scope ever attached to this session.
    #[must_use]
    pub const fn scopes(&self) -> &BTreeSet<ScopeId> {
        &self.scopes
    }

    /// Scopes attached and not yet ended.
    #[must_use]
    pub const fn active_scopes(&self) -> &BTreeSet<ScopeId> {
        &self.active
    }

    /// Jobs queued against this session whose scope is not attached yet.
    #[must_use]
    pub const fn pending_handoffs(&self) -> usize {
        self.pending_handoffs
    }

    /// The attached domain aggregate, if it is a `T`.
    #[must_use]
    pub fn aggregate<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.aggregate.clone()?.downcast::<T>().ok()
    }

    /// Whether anything still holds the session open.
    fn is_held(&self) -> bool {
        !self.active.is_empty() || self.pending_handoffs > 0
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("ended_at", &self.ended_at)
            .field("scopes", &self.scopes)
            .field("active", &self.active)
            .field("pending_handoffs", &self.pending_handoffs)
            .field("aggregate", &self.aggregate.is_some())
            .finish()
    }
}

/// Session store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session with this identifier.
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    /// The session has been finalized and accepts no new scopes.
    #[error("Session already ended: {0}")]
    Ended(SessionId),

    /// The scope is already attached to a session.
    #[error("Scope {0} is already attached to a session")]
    ScopeAlreadyAttached(ScopeId),

    /// A queued job tried to join without a hand-off reservation.
    #[error("Session {0} has no pending hand-off")]
    NoPendingHandoff(SessionId),

    /// The session agent did not answer in time.
    #[error("Session agent timed out")]
    Timeout,

    /// The session agent dropped the request.
    #[error("Session agent unavailable")]
    Unavailable,
}

/// Backing storage and lifetime management for sessions.
///
/// Implementations must serialize mutations: `add_scope_to_session` may be
/// called concurrently from several scopes extending the same session.
#[async_trait]
pub trait SessionStore: Send + Sync + fmt::Debug {
    /// Open a new session owned by `scope_id`.
    async fn create_session(&self, scope_id: ScopeId) -> Result<Session, SessionError>;

    /// Attach `scope_id` to an open session. Reservations are not touched.
    async fn add_scope_to_session(
        &self,
        session_id: SessionId,
        scope_id: ScopeId,
    ) -> Result<Session, SessionError>;

    /// Attach the scope of a job queued with a reservation, consuming it.
    async fn claim_handoff(
        &self,
        session_id: SessionId,
        scope_id: ScopeId,
    ) -> Result<Session, SessionError>;

    /// Release `scope_id`'s hold on its session.
    ///
    /// Returns the finalized session when this call ended it, `None` when the
    /// session is still held or the scope was already released.
    async fn end_session(&self, scope_id: ScopeId) -> Result<Option<Session>, SessionError>;

    /// Look up a session, including recently ended ones.
    async fn get_session(&self, session_id: SessionId) -> Result<Option<Session>, SessionError>;

    /// Hold an open session for a job that has been queued but not started.
    async fn reserve_handoff(&self, session_id: SessionId) -> Result<Session, SessionError>;

    /// Drop a hand-off reservation whose job will never run.
    ///
    /// Returns the finalized session when this release ended it.
    async fn release_handoff(&self, session_id: SessionId)
        -> Result<Option<Session>, SessionError>;

    /// Attach a domain aggregate to an open session.
    async fn attach_aggregate(
        &self,
        session_id: SessionId,
        aggregate: SessionAggregate,
    ) -> Result<Session, SessionError>;
}
