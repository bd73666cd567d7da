//! Request/reply plumbing for actor messages.
//!
//! Actor messages must be `Clone`, so the one-shot sender rides inside a
//! shared, take-once slot.

use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// Type alias for response channels (cloneable for actor message requirements).
pub type ResponseChannel<T> = Arc<Mutex<Option<oneshot::Sender<T>>>>;

/// Create a request-reply pair.
#[must_use]
pub fn create_request_reply<T>() -> (ResponseChannel<T>, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    (Arc::new(Mutex::new(Some(tx))), rx)
}

/// Send a response through a response channel.
///
/// # Errors
///
/// Returns the value if the receiver was dropped or a reply was already sent.
pub async fn send_response<T>(response_tx: ResponseChannel<T>, value: T) -> Result<(), T> {
    let tx = response_tx.lock().await.take();
    if let Some(tx) = tx {
        tx.send(value)
    } else {
        Err(value)
    }
}
