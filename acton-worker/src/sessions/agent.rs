//! Session manager agent.
//!
//! Owns the [`SessionTable`] inside an acton-reactive actor so that every
//! mutation is applied one at a time, whichever task sent it. Reads go
//! through `act_on` and may run concurrently.

use super::request_reply::{create_request_reply, send_response, ResponseChannel};
use super::{Session, SessionAggregate, SessionError, SessionId, SessionStore, SessionTable};
use crate::config::SessionsConfig;
use crate::scope::ScopeId;
use acton_reactive::prelude::*;
use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};

type SessionReply = Result<Session, SessionError>;
type FinalizedReply = Result<Option<Session>, SessionError>;

/// Session manager agent state.
#[derive(Debug, Default)]
pub struct SessionManagerAgent {
    table: SessionTable,
    retention: Duration,
}

impl SessionManagerAgent {
    /// Spawn the session manager agent and its purge timer.
    ///
    /// The purge timer stops when `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns error if agent initialization fails.
    pub async fn spawn(
        runtime: &mut ActorRuntime,
        config: &SessionsConfig,
        shutdown: CancellationToken,
    ) -> anyhow::Result<ActorHandle> {
        let actor_config = ActorConfig::new(Ern::with_root("session_manager")?, None, None)?;
        let mut builder = runtime.new_actor_with_config::<Self>(actor_config);
        builder.model.retention = config.retention();

        Self::configure_handlers(&mut builder);

        let handle = builder.start().await;
        Self::spawn_cleanup_task(handle.clone(), config.cleanup_interval(), shutdown);
        Ok(handle)
    }

    fn configure_handlers(builder: &mut ManagedActor<Idle, Self>) {
        builder
            .mutate_on::<CreateSession>(|agent, ctx| {
                let msg = ctx.message();
                let result = agent.model.table.create(msg.scope_id);
                if let Ok(session) = &result {
                    tracing::debug!(session_id = %session.id(), scope_id = %msg.scope_id, "Session created");
                }
                Reply::pending(send_optional_response(msg.response_tx.clone(), result))
            })
            .mutate_on::<AddScope>(|agent, ctx| {
                let msg = ctx.message();
                let result = agent.model.table.add_scope(msg.session_id, msg.scope_id);
                if result.is_ok() {
                    tracing::debug!(session_id = %msg.session_id, scope_id = %msg.scope_id, "Scope attached to session");
                }
                Reply::pending(send_optional_response(msg.response_tx.clone(), result))
            })
            .mutate_on::<ClaimHandoff>(|agent, ctx| {
                let msg = ctx.message();
                let result = agent.model.table.claim_handoff(msg.session_id, msg.scope_id);
                if result.is_ok() {
                    tracing::debug!(session_id = %msg.session_id, scope_id = %msg.scope_id, "Hand-off claimed by job scope");
                }
                Reply::pending(send_optional_response(msg.response_tx.clone(), result))
            })
            .mutate_on::<EndScope>(|agent, ctx| {
                let msg = ctx.message();
                let ended = agent.model.table.end_scope(msg.scope_id);
                if let Some(session) = &ended {
                    tracing::debug!(
                        session_id = %session.id(),
                        scopes = session.scopes().len(),
                        "Session ended"
                    );
                }
                Reply::pending(send_optional_response(msg.response_tx.clone(), Ok(ended)))
            })
            .mutate_on::<ReserveHandoff>(|agent, ctx| {
                let msg = ctx.message();
                let result = agent.model.table.reserve_handoff(msg.session_id);
                Reply::pending(send_optional_response(msg.response_tx.clone(), result))
            })
            .mutate_on::<ReleaseHandoff>(|agent, ctx| {
                let msg = ctx.message();
                let result = agent.model.table.release_handoff(msg.session_id);
                if let Ok(Some(session)) = &result {
                    tracing::debug!(session_id = %session.id(), "Session ended after hand-off release");
                }
                Reply::pending(send_optional_response(msg.response_tx.clone(), result))
            })
            .mutate_on::<AttachAggregate>(|agent, ctx| {
                let msg = ctx.message();
                let result = agent
                    .model
                    .table
                    .attach_aggregate(msg.session_id, msg.aggregate.clone());
                Reply::pending(send_optional_response(msg.response_tx.clone(), result))
            })
            .act_on::<LoadSession>(|agent, ctx| {
                let msg = ctx.message();
                let session = agent.model.table.get(msg.session_id);
                Reply::pending(send_optional_response(msg.response_tx.clone(), session))
            })
            .mutate_on::<PurgeEnded>(|agent, _ctx| {
                match chrono::Duration::from_std(agent.model.retention) {
                    Ok(retention) => {
                        let purged = agent.model.table.purge_ended(Utc::now(), retention);
                        tracing::debug!(
                            purged,
                            remaining = agent.model.table.len(),
                            "Purged ended sessions"
                        );
                    }
                    Err(e) => tracing::warn!(error = %e, "Session retention out of range, skipping purge"),
                }
                Reply::ready()
            });
    }

    fn spawn_cleanup_task(handle: ActorHandle, interval: Duration, shutdown: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => handle.send(PurgeEnded).await,
                }
            }
        });
    }
}

/// Send a response if a response channel is provided.
async fn send_optional_response<T>(response_tx: Option<ResponseChannel<T>>, value: T) {
    if let Some(tx) = response_tx {
        let _ = send_response(tx, value).await;
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Open a session owned by a scope.
#[derive(Clone, Debug)]
pub struct CreateSession {
    /// Scope that owns the new session.
    pub scope_id: ScopeId,
    /// Response channel.
    pub response_tx: Option<ResponseChannel<SessionReply>>,
}

impl CreateSession {
    /// Create a request with response channel.
    #[must_use]
    pub fn with_response(scope_id: ScopeId) -> (Self, oneshot::Receiver<SessionReply>) {
        let (response_tx, rx) = create_request_reply();
        (
            Self {
                scope_id,
                response_tx: Some(response_tx),
            },
            rx,
        )
    }
}

/// Attach a scope to an open session.
#[derive(Clone, Debug)]
pub struct AddScope {
    /// Session to extend.
    pub session_id: SessionId,
    /// Scope joining the session.
    pub scope_id: ScopeId,
    /// Response channel.
    pub response_tx: Option<ResponseChannel<SessionReply>>,
}

impl AddScope {
    /// Create a request with response channel.
    #[must_use]
    pub fn with_response(
        session_id: SessionId,
        scope_id: ScopeId,
    ) -> (Self, oneshot::Receiver<SessionReply>) {
        let (response_tx, rx) = create_request_reply();
        (
            Self {
                session_id,
                scope_id,
                response_tx: Some(response_tx),
            },
            rx,
        )
    }
}

/// Attach a queued job's scope, consuming one hand-off reservation.
#[derive(Clone, Debug)]
pub struct ClaimHandoff {
    /// Session the job was queued against.
    pub session_id: SessionId,
    /// The job's scope.
    pub scope_id: ScopeId,
    /// Response channel.
    pub response_tx: Option<ResponseChannel<SessionReply>>,
}

impl ClaimHandoff {
    /// Create a request with response channel.
    #[must_use]
    pub fn with_response(
        session_id: SessionId,
        scope_id: ScopeId,
    ) -> (Self, oneshot::Receiver<SessionReply>) {
        let (response_tx, rx) = create_request_reply();
        (
            Self {
                session_id,
                scope_id,
                response_tx: Some(response_tx),
            },
            rx,
        )
    }
}

/// Release a scope's hold on its session.
#[derive(Clone, Debug)]
pub struct EndScope {
    /// Scope that finished.
    pub scope_id: ScopeId,
    /// Response channel, answered with the session if it was finalized.
    pub response_tx: Option<ResponseChannel<FinalizedReply>>,
}

impl EndScope {
    /// Create a request with response channel.
    #[must_use]
    pub fn with_response(scope_id: ScopeId) -> (Self, oneshot::Receiver<FinalizedReply>) {
        let (response_tx, rx) = create_request_reply();
        (
            Self {
                scope_id,
                response_tx: Some(response_tx),
            },
            rx,
        )
    }

    /// Release without waiting for an answer.
    #[must_use]
    pub const fn fire_and_forget(scope_id: ScopeId) -> Self {
        Self {
            scope_id,
            response_tx: None,
        }
    }
}

/// Load a session by ID.
#[derive(Clone, Debug)]
pub struct LoadSession {
    /// Session to load.
    pub session_id: SessionId,
    /// Response channel.
    pub response_tx: Option<ResponseChannel<Option<Session>>>,
}

impl LoadSession {
    /// Create a request with response channel.
    #[must_use]
    pub fn with_response(session_id: SessionId) -> (Self, oneshot::Receiver<Option<Session>>) {
        let (response_tx, rx) = create_request_reply();
        (
            Self {
                session_id,
                response_tx: Some(response_tx),
            },
            rx,
        )
    }
}

/// Hold a session open for a queued job.
#[derive(Clone, Debug)]
pub struct ReserveHandoff {
    /// Session to hold.
    pub session_id: SessionId,
    /// Response channel.
    pub response_tx: Option<ResponseChannel<SessionReply>>,
}

impl ReserveHandoff {
    /// Create a request with response channel.
    #[must_use]
    pub fn with_response(session_id: SessionId) -> (Self, oneshot::Receiver<SessionReply>) {
        let (response_tx, rx) = create_request_reply();
        (
            Self {
                session_id,
                response_tx: Some(response_tx),
            },
            rx,
        )
    }
}

/// Drop a hand-off reservation.
#[derive(Clone, Debug)]
pub struct ReleaseHandoff {
    /// Session that was held.
    pub session_id: SessionId,
    /// Response channel, answered with the session if it was finalized.
    pub response_tx: Option<ResponseChannel<FinalizedReply>>,
}

impl ReleaseHandoff {
    /// Create a request with response channel.
    #[must_use]
    pub fn with_response(session_id: SessionId) -> (Self, oneshot::Receiver<FinalizedReply>) {
        let (response_tx, rx) = create_request_reply();
        (
            Self {
                session_id,
                response_tx: Some(response_tx),
            },
            rx,
        )
    }
}

/// Attach a domain aggregate to an open session.
#[derive(Clone)]
pub struct AttachAggregate {
    /// Session to update.
    pub session_id: SessionId,
    /// Aggregate to attach.
    pub aggregate: SessionAggregate,
    /// Response channel.
    pub response_tx: Option<ResponseChannel<SessionReply>>,
}

impl AttachAggregate {
    /// Create a request with response channel.
    #[must_use]
    pub fn with_response(
        session_id: SessionId,
        aggregate: SessionAggregate,
    ) -> (Self, oneshot::Receiver<SessionReply>) {
        let (response_tx, rx) = create_request_reply();
        (
            Self {
                session_id,
                aggregate,
                response_tx: Some(response_tx),
            },
            rx,
        )
    }
}

impl fmt::Debug for AttachAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachAggregate")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Remove ended sessions older than the retention window.
#[derive(Clone, Debug, Default)]
pub struct PurgeEnded;

// ============================================================================
// Store
// ============================================================================

/// [`SessionStore`] backed by a [`SessionManagerAgent`].
#[derive(Debug)]
pub struct AgentSessionStore {
    handle: ActorHandle,
    request_timeout: Duration,
    _cleanup: DropGuard,
}

impl AgentSessionStore {
    /// Spawn a session manager agent and wrap it in a store.
    ///
    /// The agent's purge timer stops when the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns error if agent initialization fails.
    pub async fn spawn(runtime: &mut ActorRuntime, config: &SessionsConfig) -> anyhow::Result<Self> {
        let cleanup = CancellationToken::new();
        let handle = SessionManagerAgent::spawn(runtime, config, cleanup.clone()).await?;
        Ok(Self {
            handle,
            request_timeout: config.request_timeout(),
            _cleanup: cleanup.drop_guard(),
        })
    }

    /// Handle of the underlying agent.
    #[must_use]
    pub const fn handle(&self) -> &ActorHandle {
        &self.handle
    }

    async fn await_reply<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, SessionError> {
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(SessionError::Unavailable),
            Err(_) => {
                tracing::warn!(timeout = ?self.request_timeout, "Session agent request timed out");
                Err(SessionError::Timeout)
            }
        }
    }
}

#[async_trait]
impl SessionStore for AgentSessionStore {
    async fn create_session(&self, scope_id: ScopeId) -> Result<Session, SessionError> {
        let (request, rx) = CreateSession::with_response(scope_id);
        self.handle.send(request).await;
        self.await_reply(rx).await?
    }

    async fn add_scope_to_session(
        &self,
        session_id: SessionId,
        scope_id: ScopeId,
    ) -> Result<Session, SessionError> {
        let (request, rx) = AddScope::with_response(session_id, scope_id);
        self.handle.send(request).await;
        self.await_reply(rx).await?
    }

    async fn claim_handoff(
        &self,
        session_id: SessionId,
        scope_id: ScopeId,
    ) -> Result<Session, SessionError> {
        let (request, rx) = ClaimHandoff::with_response(session_id, scope_id);
        self.handle.send(request).await;
        self.await_reply(rx).await?
    }

    async fn end_session(&self, scope_id: ScopeId) -> Result<Option<Session>, SessionError> {
        let (request, rx) = EndScope::with_response(scope_id);
        self.handle.send(request).await;
        self.await_reply(rx).await?
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Option<Session>, SessionError> {
        let (request, rx) = LoadSession::with_response(session_id);
        self.handle.send(request).await;
        self.await_reply(rx).await
    }

    async fn reserve_handoff(&self, session_id: SessionId) -> Result<Session, SessionError> {
        let (request, rx) = ReserveHandoff::with_response(session_id);
        self.handle.send(request).await;
        self.await_reply(rx).await?
    }

    async fn release_handoff(
        &self,
        session_id: SessionId,
    ) -> Result<Option<Session>, SessionError> {
        let (request, rx) = ReleaseHandoff::with_response(session_id);
        self.handle.send(request).await;
        self.await_reply(rx).await?
    }

    async fn attach_aggregate(
        &self,
        session_id: SessionId,
        aggregate: SessionAggregate,
    ) -> Result<Session, SessionError> {
        let (request, rx) = AttachAggregate::with_response(session_id, aggregate);
        self.handle.send(request).await;
        self.await_reply(rx).await?
    }
}
