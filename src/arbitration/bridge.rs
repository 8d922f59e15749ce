/// Bridge between completion-callback FFI and async/await
///
/// Native unmount/eject calls report through a callback that fires at most
/// once with an optional dissenter. The caller parks on a one-shot channel;
/// the callback reclaims a heap token from its context pointer and resolves
/// the channel. The token is not copyable and is consumed on first use, so
/// a second resume cannot be expressed in safe code.
use std::os::raw::c_void;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::arbitration::dissent::{Dissent, ErrorKind};
use crate::batch::report::OperationResult;

/// Completion side of the bridge. Crosses the FFI boundary as a raw
/// context pointer via [`CompletionToken::into_raw`] and comes back in the
/// callback via [`CompletionToken::reclaim`].
pub struct CompletionToken {
    tx: oneshot::Sender<OperationResult>,
    started: Instant,
    operation: &'static str,
    target: String,
}

/// Waiting side of the bridge.
pub struct CompletionReceiver {
    rx: oneshot::Receiver<OperationResult>,
    started: Instant,
    operation: &'static str,
    target: String,
}

impl CompletionToken {
    /// A linked token/receiver pair for one native call. `operation` and
    /// `target` only feed log lines.
    pub fn pair(operation: &'static str, target: impl Into<String>) -> (Self, CompletionReceiver) {
        let (tx, rx) = oneshot::channel();
        let started = Instant::now();
        let target = target.into();
        (
            CompletionToken {
                tx,
                started,
                operation,
                target: target.clone(),
            },
            CompletionReceiver {
                rx,
                started,
                operation,
                target,
            },
        )
    }

    /// Move the token to the heap and hand out ownership as a raw pointer
    /// for the native call's context argument.
    pub fn into_raw(self) -> *mut c_void {
        Box::into_raw(Box::new(self)) as *mut c_void
    }

    /// Take the token back from a callback context pointer.
    ///
    /// Returns `None` for a null context, which is logged and otherwise
    /// ignored; no memory is touched in that case.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer produced by [`into_raw`] that has
    /// not been reclaimed before. The native contract invokes the callback
    /// at most once per call, which is what upholds the second condition.
    ///
    /// [`into_raw`]: CompletionToken::into_raw
    pub unsafe fn reclaim(ptr: *mut c_void) -> Option<Box<CompletionToken>> {
        if ptr.is_null() {
            tracing::warn!("completion callback delivered a null context, dropping it");
            return None;
        }
        Some(Box::from_raw(ptr as *mut CompletionToken))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Resolve the waiting side with the outcome of the native call.
    ///
    /// `dissent` is `None` when the operation was allowed. Consumes the
    /// token; returns false when the caller has already abandoned the
    /// wait, in which case the result is dropped harmlessly.
    pub fn complete(self, dissent: Option<Dissent>) -> bool {
        let elapsed = self.started.elapsed();
        let result = match dissent {
            None => OperationResult::ok(elapsed),
            Some(d) if d.status.is_success() => OperationResult::ok(elapsed),
            Some(d) => {
                tracing::debug!(
                    operation = self.operation,
                    target = %self.target,
                    dissent = %d,
                    "native call refused"
                );
                OperationResult::failed(d.kind(), elapsed)
            }
        };

        match self.tx.send(result) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(
                    operation = self.operation,
                    target = %self.target,
                    "completion arrived after the caller stopped waiting"
                );
                false
            }
        }
    }
}

impl CompletionReceiver {
    /// Park until the token resolves.
    ///
    /// A token dropped without completing (native call never issued, or a
    /// teardown race) resolves to a deterministic failure instead of
    /// hanging the caller.
    pub async fn wait(self) -> OperationResult {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation = self.operation,
                    target = %self.target,
                    "completion token dropped without resolving"
                );
                OperationResult::failed(ErrorKind::GeneralError, self.started.elapsed())
            }
        }
    }
}
