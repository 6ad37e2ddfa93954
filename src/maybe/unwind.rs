//! Fault-channel optional computation.
//!
//! Awaiting an aborted [`MaybeEx`] yields [`Fault::Break`]. The body forwards
//! it with `?` like any other error, which returns from every enclosing
//! `async` scope and drops what they hold, so no parent links or deferred
//! exits are needed. Each `MaybeEx` frame converts a returned sentinel back
//! into `Nothing` and stores every other fault unchanged.
//!
//! The price is that aborting relies on the body forwarding the sentinel: a
//! body that matches on the awaited `Result` and swallows `Fault::Break` keeps
//! running. Prefer [`Maybe`](crate::Maybe) when bodies are not uniformly
//! written with `?`.

use std::any::Any;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake};

use parking_lot::Mutex;

use super::{into_result, MaybeResult};
use crate::error::{BreakSignal, Fault, UsageError};
use crate::suspend::{self, Completion, Continuation, Frame, Outcome, Resumable, Slot, Source};
use crate::tracer::{self, Engine, TracerFrameKey};

/// Frame stack marker: computations awaited in a `MaybeEx` body must not
/// link to an enclosing frame of another engine.
#[derive(Clone, Copy)]
pub(super) struct SentinelFrame;

struct MaybeExNode<T> {
    key: TracerFrameKey,
    slot: Mutex<Slot<T>>,
    frame: Option<Frame<T>>,
}

impl<T: Send + 'static> MaybeExNode<T> {
    fn new(slot: Slot<T>, frame: Option<Frame<T>>) -> Arc<Self> {
        let node = Arc::new(Self {
            key: TracerFrameKey::new::<T>(Engine::MaybeEx),
            slot: Mutex::new(slot),
            frame,
        });
        tracer::emit(|t| t.on_frame_start(&node.key));
        node
    }
}

impl<T: Send + 'static> Resumable for MaybeExNode<T> {
    type Output = T;

    fn key(&self) -> &TracerFrameKey {
        &self.key
    }

    fn frame(&self) -> Option<&Frame<T>> {
        self.frame.as_ref()
    }

    fn link(self: &Arc<Self>) -> Box<dyn Any> {
        Box::new(SentinelFrame)
    }

    fn finish(self: &Arc<Self>, result: Result<T, Fault>) {
        let outcome = match result {
            Ok(value) => Outcome::Value(value),
            Err(Fault::Break(_)) => Outcome::Nothing,
            Err(fault) => Outcome::Fault(fault),
        };
        tracer::emit(|t| t.on_frame_end(&self.key, outcome.execution_result()));

        let completed = self.slot.lock().complete(outcome);
        debug_assert!(completed.is_ok(), "outcome set twice");
        let continuation = completed.unwrap_or_default();
        if let Some(continuation) = continuation {
            continuation.resume();
        }
    }

    fn unwound(self: &Arc<Self>) {}
}

impl<T: Send + 'static> Wake for MaybeExNode<T> {
    fn wake(self: Arc<Self>) {
        Frame::resume(&self);
    }
}

impl<T: Send + 'static> Source for MaybeExNode<T> {
    type Output = T;

    fn subscribe(self: &Arc<Self>, continuation: Continuation) -> Result<(), UsageError> {
        let ready = {
            let mut slot = self.slot.lock();
            slot.register(continuation)?;
            if slot.is_completed() {
                slot.take_continuation()
            } else {
                None
            }
        };
        tracer::emit(|t| t.on_continuation_registered(&self.key));
        if let Some(continuation) = ready {
            continuation.resume();
        }
        Ok(())
    }

    fn take(&self) -> Result<Outcome<T>, UsageError> {
        self.slot.lock().take()
    }
}

/// A short-circuiting computation whose aborts travel through `?`.
///
/// Same contract as [`Maybe`](crate::Maybe): `value`, `nothing`, lifting
/// with `From`, and a body that starts running on construction. Awaiting an
/// aborted `MaybeEx` yields `Err(Fault::Break(_))`, which the body must
/// forward with `?`.
///
/// # Example
///
/// ```
/// use monad_flow::{Fault, MaybeEx, MaybeResult};
///
/// fn half(n: i32) -> MaybeEx<i32> {
///     if n % 2 == 0 { MaybeEx::value(n / 2) } else { MaybeEx::nothing() }
/// }
///
/// async fn quarter(n: i32) -> Result<i32, Fault> {
///     let n = half(n).await?;
///     half(n).await
/// }
///
/// assert_eq!(MaybeEx::new(quarter(12)).wait().unwrap(), MaybeResult::Value(3));
/// assert_eq!(MaybeEx::new(quarter(6)).wait().unwrap(), MaybeResult::Nothing);
/// ```
pub struct MaybeEx<T> {
    node: Arc<MaybeExNode<T>>,
}

impl<T: Send + 'static> MaybeEx<T> {
    /// Start a computation from its body.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = Result<T, Fault>> + Send + 'static,
    {
        let node = MaybeExNode::new(Slot::pending(), Some(Frame::new(Box::pin(body))));
        Frame::resume(&node);
        Self { node }
    }

    /// A computation that already holds `value`.
    pub fn value(value: T) -> Self {
        Self {
            node: MaybeExNode::new(Slot::completed(Outcome::Value(value)), None),
        }
    }

    /// A computation that is already aborted.
    pub fn nothing() -> Self {
        Self {
            node: MaybeExNode::new(Slot::completed(Outcome::Nothing), None),
        }
    }

    /// Lift an `Option`, mapping `None` to [`MaybeEx::nothing`].
    pub fn from_option(option: Option<T>) -> Self {
        match option {
            Some(value) => Self::value(value),
            None => Self::nothing(),
        }
    }

    /// Returns `true` once the outcome is set.
    pub fn is_completed(&self) -> bool {
        self.node.slot.lock().is_completed()
    }

    /// Register the single continuation of this computation.
    pub fn on_completed(&self, continuation: Continuation) -> Result<(), UsageError> {
        self.node.subscribe(continuation)
    }

    /// Block the current thread until the computation completes.
    pub fn wait(self) -> Result<MaybeResult<T>, Fault> {
        into_result(suspend::wait(&self.node))
    }

    /// Read the result without waiting.
    pub fn result(self) -> Result<MaybeResult<T>, Fault> {
        into_result(suspend::now(&self.node))
    }

    /// A future resolving to the result, for callers on an executor.
    pub fn outcome(self) -> MaybeExOutcome<T> {
        MaybeExOutcome {
            inner: Completion::new(self.node),
        }
    }
}

impl<T: Send + 'static> From<T> for MaybeEx<T> {
    fn from(value: T) -> Self {
        Self::value(value)
    }
}

impl<T> fmt::Debug for MaybeEx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaybeEx")
            .field("span", &self.node.key.span)
            .finish()
    }
}

impl<T: Send + 'static> IntoFuture for MaybeEx<T> {
    type Output = Result<T, Fault>;
    type IntoFuture = MaybeExAwait<T>;

    fn into_future(self) -> MaybeExAwait<T> {
        MaybeExAwait {
            node: self.node,
            registered: false,
        }
    }
}

/// Future returned by awaiting a [`MaybeEx`].
pub struct MaybeExAwait<T> {
    node: Arc<MaybeExNode<T>>,
    registered: bool,
}

impl<T: Send + 'static> Future for MaybeExAwait<T> {
    type Output = Result<T, Fault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut slot = this.node.slot.lock();
        if slot.is_completed() {
            return Poll::Ready(match slot.take() {
                Ok(Outcome::Value(value)) => Ok(value),
                Ok(Outcome::Nothing) => Err(Fault::Break(BreakSignal::new())),
                Ok(Outcome::Fault(fault)) => Err(fault),
                Err(e) => Err(Fault::Usage(e)),
            });
        }
        if !this.registered {
            this.registered = true;
            if let Err(e) = slot.register(Continuation::from(cx.waker().clone())) {
                return Poll::Ready(Err(Fault::Usage(e)));
            }
        }
        Poll::Pending
    }
}

/// Future returned by [`MaybeEx::outcome`].
pub struct MaybeExOutcome<T> {
    inner: Completion<MaybeExNode<T>>,
}

impl<T: Send + 'static> Future for MaybeExOutcome<T> {
    type Output = Result<MaybeResult<T>, Fault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(into_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_becomes_nothing() {
        let maybe = MaybeEx::<i32>::new(async { MaybeEx::<i32>::nothing().await });
        assert!(maybe.is_completed());
        assert_eq!(maybe.result().unwrap(), MaybeResult::Nothing);
    }

    #[test]
    fn test_other_faults_are_kept() {
        let maybe = MaybeEx::<i32>::new(async { Err(anyhow::anyhow!("bad input").into()) });
        match maybe.wait() {
            Err(Fault::User(e)) => assert!(e.to_string().contains("bad input")),
            other => panic!("Expected user fault, got {:?}", other),
        }
    }

    #[test]
    fn test_swallowed_sentinel_keeps_running() {
        let maybe = MaybeEx::new(async {
            let missing = MaybeEx::<i32>::nothing().await;
            Ok(missing.map_or(-1, |n| n))
        });
        assert_eq!(maybe.wait().unwrap(), MaybeResult::Value(-1));
    }
}
