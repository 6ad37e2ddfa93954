//! Parent-chain optional computation.
//!
//! Returning from a suspended body is just a value, not an unwinding fault,
//! so an abort cannot rely on `?` to leave the enclosing frames. Instead each
//! computation remembers the frame that awaits it, and an abort walks those
//! links from the leaf to the root. Every frame on the way drops its body,
//! which releases whatever the body holds, before the abort moves on.

use std::any::Any;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake};

use parking_lot::Mutex;

use super::{into_result, MaybeResult};
use crate::error::{Fault, UsageError};
use crate::suspend::{self, Completion, Continuation, Frame, Outcome, Resumable, Slot, Source};
use crate::tracer::{self, Engine, TracerFrameKey};

/// Receives an abort travelling up the parent chain.
trait Exit: Send + Sync {
    fn key(&self) -> &TracerFrameKey;

    fn exit(self: Arc<Self>);
}

type ParentLink = Weak<dyn Exit>;

struct MaybeState<T> {
    slot: Slot<T>,
    parent: Option<ParentLink>,
    /// Set when an abort arrives before anyone awaits this node.
    exit_pending: bool,
}

struct MaybeNode<T> {
    key: TracerFrameKey,
    state: Mutex<MaybeState<T>>,
    frame: Option<Frame<T>>,
}

impl<T: Send + 'static> MaybeNode<T> {
    fn new(slot: Slot<T>, frame: Option<Frame<T>>) -> Arc<Self> {
        let node = Arc::new(Self {
            key: TracerFrameKey::new::<T>(Engine::Maybe),
            state: Mutex::new(MaybeState {
                slot,
                parent: None,
                exit_pending: false,
            }),
            frame,
        });
        tracer::emit(|t| t.on_frame_start(&node.key));
        node
    }

    /// Resolve to `Nothing` and hand the abort to the parent, or to the
    /// continuation at the root. The body must already be released.
    fn unwind_upward(self: &Arc<Self>) {
        let (continuation, parent) = {
            let mut state = self.state.lock();
            if state.slot.is_completed() && !state.slot.is_nothing() {
                return;
            }
            let continuation = if state.slot.is_completed() {
                state.slot.take_continuation()
            } else {
                let completed = state.slot.complete(Outcome::Nothing);
                debug_assert!(completed.is_ok());
                completed.unwrap_or_default()
            };
            (continuation, state.parent.take())
        };
        tracer::emit(|t| {
            t.on_exit(&self.key);
            t.on_frame_end(&self.key, tracer::ExecutionResult::Nothing);
        });

        match parent.and_then(|parent| parent.upgrade()) {
            Some(parent) => {
                drop(continuation);
                parent.exit();
            }
            None => {
                if let Some(continuation) = continuation {
                    continuation.resume();
                }
            }
        }
    }
}

impl<T: Send + 'static> Exit for MaybeNode<T> {
    fn key(&self) -> &TracerFrameKey {
        &self.key
    }

    fn exit(self: Arc<Self>) {
        {
            let mut state = self.state.lock();
            if !state.slot.is_subscribed() {
                state.exit_pending = true;
                drop(state);
                tracer::emit(|t| t.on_exit_deferred(&self.key));
                return;
            }
            state.exit_pending = false;
        }

        let released = self.frame.as_ref().map_or(true, Frame::unwind);
        if released {
            self.unwind_upward();
        }
    }
}

impl<T: Send + 'static> Resumable for MaybeNode<T> {
    type Output = T;

    fn key(&self) -> &TracerFrameKey {
        &self.key
    }

    fn frame(&self) -> Option<&Frame<T>> {
        self.frame.as_ref()
    }

    fn link(self: &Arc<Self>) -> Box<dyn Any> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let link: ParentLink = weak;
        Box::new(link)
    }

    fn finish(self: &Arc<Self>, result: Result<T, Fault>) {
        let outcome = match result {
            Ok(value) => Outcome::Value(value),
            // A fault-channel abort forwarded with `?` aborts this chain too.
            Err(Fault::Break(_)) => {
                self.clone().exit();
                return;
            }
            Err(fault) => Outcome::Fault(fault),
        };
        tracer::emit(|t| t.on_frame_end(&self.key, outcome.execution_result()));

        let completed = self.state.lock().slot.complete(outcome);
        debug_assert!(completed.is_ok(), "outcome set twice");
        let continuation = completed.unwrap_or_default();
        if let Some(continuation) = continuation {
            continuation.resume();
        }
    }

    fn unwound(self: &Arc<Self>) {
        self.unwind_upward();
    }
}

impl<T: Send + 'static> Wake for MaybeNode<T> {
    fn wake(self: Arc<Self>) {
        Frame::resume(&self);
    }
}

impl<T: Send + 'static> Source for MaybeNode<T> {
    type Output = T;

    fn subscribe(self: &Arc<Self>, continuation: Continuation) -> Result<(), UsageError> {
        enum Next {
            Exit,
            Resume(Option<Continuation>),
            Wait,
        }

        let next = {
            let mut state = self.state.lock();
            state.slot.register(continuation)?;
            if state.exit_pending || state.slot.is_nothing() {
                Next::Exit
            } else if state.slot.is_completed() {
                Next::Resume(state.slot.take_continuation())
            } else {
                Next::Wait
            }
        };
        tracer::emit(|t| t.on_continuation_registered(&self.key));

        match next {
            Next::Exit => self.clone().exit(),
            Next::Resume(Some(continuation)) => continuation.resume(),
            Next::Resume(None) | Next::Wait => {}
        }
        Ok(())
    }

    fn take(&self) -> Result<Outcome<T>, UsageError> {
        self.state.lock().slot.take()
    }
}

/// A short-circuiting computation that propagates aborts along the chain of
/// awaiting frames.
///
/// The body passed to [`Maybe::new`] starts running immediately and keeps
/// running until it completes or awaits something unfinished. Awaiting a
/// `Maybe` inside the body yields its value, or a [`Fault`] to forward with
/// `?`; awaiting one that resolves to `Nothing` never returns, and the whole
/// chain resolves to `Nothing` instead.
///
/// # Example
///
/// ```
/// use monad_flow::{Fault, Maybe, MaybeResult};
///
/// fn parse(s: &str) -> Maybe<i32> {
///     Maybe::from_option(s.trim().parse().ok())
/// }
///
/// async fn add(a: String, b: String) -> Result<i32, Fault> {
///     let a = parse(&a).await?;
///     let b = parse(&b).await?;
///     Ok(a + b)
/// }
///
/// let sum = Maybe::new(add("11".into(), "14".into()));
/// assert_eq!(sum.wait().unwrap(), MaybeResult::Value(25));
///
/// let sum = Maybe::new(add("8".into(), "a".into()));
/// assert_eq!(sum.wait().unwrap(), MaybeResult::Nothing);
/// ```
pub struct Maybe<T> {
    node: Arc<MaybeNode<T>>,
}

impl<T: Send + 'static> Maybe<T> {
    /// Start a computation from its body.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = Result<T, Fault>> + Send + 'static,
    {
        let node = MaybeNode::new(Slot::pending(), Some(Frame::new(Box::pin(body))));
        Frame::resume(&node);
        Self { node }
    }

    /// A computation that already holds `value`.
    pub fn value(value: T) -> Self {
        Self {
            node: MaybeNode::new(Slot::completed(Outcome::Value(value)), None),
        }
    }

    /// A computation that is already aborted.
    pub fn nothing() -> Self {
        Self {
            node: MaybeNode::new(Slot::completed(Outcome::Nothing), None),
        }
    }

    /// Lift an `Option`, mapping `None` to [`Maybe::nothing`].
    pub fn from_option(option: Option<T>) -> Self {
        match option {
            Some(value) => Self::value(value),
            None => Self::nothing(),
        }
    }

    /// Returns `true` once the outcome is set.
    ///
    /// An abort that reached a computation nobody awaits yet only completes
    /// it once a continuation is registered.
    pub fn is_completed(&self) -> bool {
        self.node.state.lock().slot.is_completed()
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
    ///
    /// Fails with [`UsageError::NotCompleted`] while the computation is
    /// still suspended.
    pub fn result(self) -> Result<MaybeResult<T>, Fault> {
        into_result(suspend::now(&self.node))
    }

    /// A future resolving to the result, for callers on an executor.
    pub fn outcome(self) -> MaybeOutcome<T> {
        MaybeOutcome {
            inner: Completion::new(self.node),
        }
    }
}

impl<T: Send + 'static> From<T> for Maybe<T> {
    fn from(value: T) -> Self {
        Self::value(value)
    }
}

impl<T> fmt::Debug for Maybe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Maybe")
            .field("span", &self.node.key.span)
            .finish()
    }
}

impl<T: Send + 'static> IntoFuture for Maybe<T> {
    type Output = Result<T, Fault>;
    type IntoFuture = MaybeAwait<T>;

    fn into_future(self) -> MaybeAwait<T> {
        MaybeAwait {
            node: self.node,
            linked: false,
            has_parent: false,
        }
    }
}

/// Future returned by awaiting a [`Maybe`].
pub struct MaybeAwait<T> {
    node: Arc<MaybeNode<T>>,
    linked: bool,
    has_parent: bool,
}

impl<T: Send + 'static> Future for MaybeAwait<T> {
    type Output = Result<T, Fault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if !this.linked {
            this.linked = true;
            let parent = {
                let mut state = this.node.state.lock();
                if state.slot.is_resolved() {
                    return Poll::Ready(resolve(state.slot.take()));
                }
                let parent = suspend::current::<ParentLink>();
                this.has_parent = parent.is_some();
                state.parent = parent.clone();
                parent.as_ref().and_then(Weak::upgrade)
            };
            if let Some(parent) = parent {
                tracer::emit(|t| t.on_child_linked(parent.key(), &this.node.key));
            }
            if let Err(e) = this.node.subscribe(Continuation::from(cx.waker().clone())) {
                return Poll::Ready(Err(Fault::Usage(e)));
            }
        }

        let mut state = this.node.state.lock();
        if state.slot.is_nothing() {
            // With a parent, the abort is unwinding the awaiting frame and
            // this body is never resumed.
            if this.has_parent {
                return Poll::Pending;
            }
            return Poll::Ready(Err(super::nothing_fault()));
        }
        if state.slot.is_resolved() {
            return Poll::Ready(resolve(state.slot.take()));
        }
        Poll::Pending
    }
}

fn resolve<T>(taken: Result<Outcome<T>, UsageError>) -> Result<T, Fault> {
    match taken {
        Ok(Outcome::Value(value)) => Ok(value),
        Ok(Outcome::Fault(fault)) => Err(fault),
        Ok(Outcome::Nothing) => Err(Fault::Usage(UsageError::Nothing)),
        Err(e) => Err(Fault::Usage(e)),
    }
}

/// Future returned by [`Maybe::outcome`].
pub struct MaybeOutcome<T> {
    inner: Completion<MaybeNode<T>>,
}

impl<T: Send + 'static> Future for MaybeOutcome<T> {
    type Output = Result<MaybeResult<T>, Fault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(into_result)
    }
}
