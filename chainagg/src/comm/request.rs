use crate::error::{ChainError, Result};
use std::future::Future;
use tokio::task::JoinHandle;

/// A handle to a non-blocking point-to-point operation.
///
/// The operation runs in a spawned task. Call `wait()` to block until it
/// completes, or check `is_finished()` to poll.
///
/// If dropped without calling `wait()`, the background task is aborted.
pub struct Request<T> {
    inner: Option<JoinHandle<Result<T>>>,
}

/// Pending non-blocking send.
pub type SendRequest = Request<()>;

/// Pending non-blocking receive, yielding the received payload.
pub type RecvRequest = Request<Vec<u8>>;

impl<T: Send + 'static> Request<T> {
    /// Spawn a future as a non-blocking operation and return a handle.
    pub(crate) fn spawn(fut: impl Future<Output = Result<T>> + Send + 'static) -> Self {
        Self {
            inner: Some(tokio::spawn(fut)),
        }
    }

    /// Wait for the operation to complete and propagate any error.
    pub async fn wait(mut self) -> Result<T> {
        let handle = self
            .inner
            .take()
            .ok_or_else(|| ChainError::transport("request already consumed"))?;
        handle
            .await
            .map_err(|e| ChainError::transport(format!("messaging task failed: {e}")))?
    }
}

impl<T> Request<T> {
    /// Check if the operation has finished (non-blocking).
    pub fn is_finished(&self) -> bool {
        self.inner.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl<T> Drop for Request<T> {
    fn drop(&mut self) {
        if let Some(handle) = &self.inner {
            handle.abort();
        }
    }
}

impl<T> std::fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("finished", &self.is_finished())
            .finish()
    }
}
