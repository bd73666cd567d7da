//! Session bookkeeping shared by every store implementation.

use super::{Session, SessionAggregate, SessionError, SessionId};
use crate::scope::ScopeId;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// In-memory session table.
///
/// Not synchronized; the owner serializes access (the session agent processes
/// one mutation at a time).
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, Session>,
    scope_index: HashMap<ScopeId, SessionId>,
}

impl SessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session owned by `scope_id`.
    ///
    /// # Errors
    ///
    /// Fails if the scope already belongs to a session.
    pub fn create(&mut self, scope_id: ScopeId) -> Result<Session, SessionError> {
        if self.scope_index.contains_key(&scope_id) {
            return Err(SessionError::ScopeAlreadyAttached(scope_id));
        }

        let session = Session::open(scope_id);
        self.scope_index.insert(scope_id, session.id);
        self.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    /// Attach `scope_id` to an open session.
    ///
    /// Hand-off reservations are left untouched; see [`Self::claim_handoff`].
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown or ended, or the scope is already attached.
    pub fn add_scope(
        &mut self,
        session_id: SessionId,
        scope_id: ScopeId,
    ) -> Result<Session, SessionError> {
        self.attach(session_id, scope_id, false)
    }

    /// Attach the scope of a queued job, turning one of its session's
    /// hand-off reservations into an active scope.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown or ended, the scope is already
    /// attached, or no reservation is pending.
    pub fn claim_handoff(
        &mut self,
        session_id: SessionId,
        scope_id: ScopeId,
    ) -> Result<Session, SessionError> {
        self.attach(session_id, scope_id, true)
    }

    /// Release `scope_id`'s hold on its session.
    ///
    /// Returns the session if this call finalized it. Releasing an unknown or
    /// already released scope is a no-op.
    pub fn end_scope(&mut self, scope_id: ScopeId) -> Option<Session> {
        let session_id = self.scope_index.get(&scope_id).copied()?;
        let session = self.sessions.get_mut(&session_id)?;

        if !session.active.remove(&scope_id) {
            return None;
        }

        Self::finalize_if_released(session)
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, session_id: SessionId) -> Option<Session> {
        self.sessions.get(&session_id).cloned()
    }

    /// Hold an open session for a queued job.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown or ended.
    pub fn reserve_handoff(&mut self, session_id: SessionId) -> Result<Session, SessionError> {
        let session = self.open_session_mut(session_id)?;
        session.pending_handoffs += 1;
        Ok(session.clone())
    }

    /// Drop a hand-off reservation.
    ///
    /// Returns the session if this release finalized it.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown.
    pub fn release_handoff(&mut self, session_id: SessionId) -> Result<Option<Session>, SessionError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;

        if session.is_ended() || session.pending_handoffs == 0 {
            return Ok(None);
        }

        session.pending_handoffs -= 1;
        Ok(Self::finalize_if_released(session))
    }

    /// Attach a domain aggregate to an open session.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown or ended.
    pub fn attach_aggregate(
        &mut self,
        session_id: SessionId,
        aggregate: SessionAggregate,
    ) -> Result<Session, SessionError> {
        let session = self.open_session_mut(session_id)?;
        session.aggregate = Some(aggregate);
        Ok(session.clone())
    }

    /// Remove sessions that ended before `now - retention`.
    ///
    /// Returns the number of sessions removed.
    pub fn purge_ended(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return 0;
        };
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|session| session.ended_at.is_some_and(|ended| ended <= cutoff))
            .map(|session| session.id)
            .collect();

        for session_id in &expired {
            if let Some(session) = self.sessions.remove(session_id) {
                for scope_id in &session.scopes {
                    self.scope_index.remove(scope_id);
                }
            }
        }

        expired.len()
    }

    /// Number of sessions held, ended ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the table holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn attach(
        &mut self,
        session_id: SessionId,
        scope_id: ScopeId,
        claim: bool,
    ) -> Result<Session, SessionError> {
        if self.scope_index.contains_key(&scope_id) {
            return Err(SessionError::ScopeAlreadyAttached(scope_id));
        }

        let session = self.open_session_mut(session_id)?;
        if claim {
            if session.pending_handoffs == 0 {
                return Err(SessionError::NoPendingHandoff(session_id));
            }
            session.pending_handoffs -= 1;
        }
        session.scopes.insert(scope_id);
        session.active.insert(scope_id);
        let snapshot = session.clone();

        self.scope_index.insert(scope_id, session_id);
        Ok(snapshot)
    }

    fn open_session_mut(&mut self, session_id: SessionId) -> Result<&mut Session, SessionError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;

        if session.is_ended() {
            return Err(SessionError::Ended(session_id));
        }
        Ok(session)
    }

    fn finalize_if_released(session: &mut Session) -> Option<Session> {
        if session.is_ended() || session.is_held() {
            return None;
        }

        session.ended_at = Some(Utc::now());
        Some(session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_create_registers_owner_scope() {
        let mut table = SessionTable::new();
        let scope = ScopeId::generate();

        let session = table.create(scope).unwrap();
        assert!(session.scopes().contains(&scope));
        assert!(session.active_scopes().contains(&scope));
        assert!(!session.is_ended());
        assert_eq!(
            table.create(scope).unwrap_err(),
            SessionError::ScopeAlreadyAttached(scope)
        );
    }

    #[test]
    fn test_single_scope_session_ends_once() {
        let mut table = SessionTable::new();
        let scope = ScopeId::generate();
        let session = table.create(scope).unwrap();

        let ended = table.end_scope(scope).unwrap();
        assert_eq!(ended.id(), session.id());
        assert!(ended.is_ended());

        // Idempotent per scope
        assert!(table.end_scope(scope).is_none());
        assert!(table.get(session.id()).unwrap().is_ended());
    }

    #[test]
    fn test_session_outlives_first_scope() {
        let mut table = SessionTable::new();
        let request = ScopeId::generate();
        let job = ScopeId::generate();
        let session = table.create(request).unwrap();

        table.add_scope(session.id(), job).unwrap();
        assert!(table.end_scope(request).is_none());

        let ended = table.end_scope(job).unwrap();
        assert_eq!(ended.scopes().len(), 2);
        assert!(ended.active_scopes().is_empty());
    }

    #[test]
    fn test_handoff_keeps_session_open() {
        let mut table = SessionTable::new();
        let request = ScopeId::generate();
        let session = table.create(request).unwrap();

        table.reserve_handoff(session.id()).unwrap();
        // Request finishes before the job is dequeued
        assert!(table.end_scope(request).is_none());
        assert!(!table.get(session.id()).unwrap().is_ended());

        let job = ScopeId::generate();
        let extended = table.claim_handoff(session.id(), job).unwrap();
        assert_eq!(extended.pending_handoffs(), 0);

        assert!(table.end_scope(job).is_some());
    }

    #[test]
    fn test_plain_add_leaves_reservation_alone() {
        let mut table = SessionTable::new();
        let request = ScopeId::generate();
        let session = table.create(request).unwrap();
        table.reserve_handoff(session.id()).unwrap();

        // A second request joins and both requests finish
        let second = ScopeId::generate();
        let extended = table.add_scope(session.id(), second).unwrap();
        assert_eq!(extended.pending_handoffs(), 1);
        assert!(table.end_scope(request).is_none());
        assert!(table.end_scope(second).is_none());
        assert!(!table.get(session.id()).unwrap().is_ended());

        let job = ScopeId::generate();
        table.claim_handoff(session.id(), job).unwrap();
        let ended = table.end_scope(job).unwrap();
        assert_eq!(ended.scopes().len(), 3);
    }

    #[test]
    fn test_claim_without_reservation_fails() {
        let mut table = SessionTable::new();
        let session = table.create(ScopeId::generate()).unwrap();
        let job = ScopeId::generate();

        assert_eq!(
            table.claim_handoff(session.id(), job).unwrap_err(),
            SessionError::NoPendingHandoff(session.id())
        );
        assert!(table.end_scope(job).is_none());
    }

    #[test]
    fn test_release_handoff_finalizes_idle_session() {
        let mut table = SessionTable::new();
        let request = ScopeId::generate();
        let session = table.create(request).unwrap();

        table.reserve_handoff(session.id()).unwrap();
        assert!(table.end_scope(request).is_none());

        let ended = table.release_handoff(session.id()).unwrap();
        assert!(ended.is_some_and(|s| s.is_ended()));
        assert!(table.release_handoff(session.id()).unwrap().is_none());
    }

    #[test]
    fn test_ended_session_rejects_new_scopes() {
        let mut table = SessionTable::new();
        let scope = ScopeId::generate();
        let session = table.create(scope).unwrap();
        table.end_scope(scope);

        let late = ScopeId::generate();
        assert_eq!(
            table.add_scope(session.id(), late).unwrap_err(),
            SessionError::Ended(session.id())
        );
        assert_eq!(
            table.reserve_handoff(session.id()).unwrap_err(),
            SessionError::Ended(session.id())
        );
    }

    #[test]
    fn test_unknown_session() {
        let mut table = SessionTable::new();
        let missing = SessionId::generate();
        assert_eq!(
            table.add_scope(missing, ScopeId::generate()).unwrap_err(),
            SessionError::NotFound(missing)
        );
        assert!(table.end_scope(ScopeId::generate()).is_none());
    }

    #[test]
    fn test_aggregate_roundtrip() {
        #[derive(Debug, PartialEq)]
        struct Order(u32);

        let mut table = SessionTable::new();
        let session = table.create(ScopeId::generate()).unwrap();
        let updated = table.attach_aggregate(session.id(), Arc::new(Order(7))).unwrap();

        assert_eq!(updated.aggregate::<Order>().as_deref(), Some(&Order(7)));
        assert!(updated.aggregate::<String>().is_none());
    }

    #[test]
    fn test_purge_ended_respects_retention() {
        let mut table = SessionTable::new();
        let open = table.create(ScopeId::generate()).unwrap();
        let scope = ScopeId::generate();
        let closed = table.create(scope).unwrap();
        table.end_scope(scope);

        assert_eq!(table.purge_ended(Utc::now(), Duration::minutes(5)), 0);
        assert_eq!(table.purge_ended(Utc::now() + Duration::minutes(10), Duration::minutes(5)), 1);

        assert!(table.get(closed.id()).is_none());
        assert!(table.get(open.id()).is_some());
        assert_eq!(table.len(), 1);
    }
}
