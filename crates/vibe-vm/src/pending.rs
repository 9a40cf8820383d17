//! Unresolved results of async filters and tests

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::{VmError, VmResult};
use crate::value::Value;

/// A future produced by an async callable that was not ready after one poll.
///
/// The key identifies the call (callable name, input and arguments) so a
/// later render can reuse the resolved result instead of calling again.
#[derive(Clone)]
pub struct PendingValue {
    key: Arc<str>,
    future: Arc<Mutex<Option<BoxFuture<'static, VmResult<Value>>>>>,
}

impl PendingValue {
    /// Wrap a partially polled future
    pub fn new(key: impl Into<Arc<str>>, future: BoxFuture<'static, VmResult<Value>>) -> Self {
        Self {
            key: key.into(),
            future: Arc::new(Mutex::new(Some(future))),
        }
    }

    /// Memo key of the call that produced this value
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Future for PendingValue {
    type Output = VmResult<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return Poll::Ready(Err(VmError::callback(format!(
                "pending value '{}' polled after completion",
                self.key
            ))));
        };
        match future.as_mut().poll(cx) {
            Poll::Ready(result) => {
                *slot = None;
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for PendingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingValue").field("key", &self.key).finish()
    }
}
