//! Task-local binding of the active scope.
//!
//! The binding lives only for the duration of the future passed to
//! [`with_scope`]. It is restored on every exit path, panics included, so a
//! worker task never observes a previous job's scope.

use super::Scope;
use crate::sessions::SessionId;
use std::future::Future;

tokio::task_local! {
    static CURRENT_SCOPE: Scope;
}

/// Run `future` with `scope` as the active scope.
pub async fn with_scope<F>(scope: Scope, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_SCOPE.scope(scope, future).await
}

/// The scope active on the current task, if any.
#[must_use]
pub fn current_scope() -> Option<Scope> {
    CURRENT_SCOPE.try_with(Clone::clone).ok()
}

/// Session of the scope active on the current task, if any.
#[must_use]
pub fn current_session_id() -> Option<SessionId> {
    CURRENT_SCOPE
        .try_with(Scope::session_id)
        .ok()
        .flatten()
}
