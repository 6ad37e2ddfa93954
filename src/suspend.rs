//! Suspension primitive and continuation protocol shared by every engine.
//!
//! A computation is a node holding a [`Slot`] (its single-assignment outcome
//! plus a single continuation) and, for computations built from an `async`
//! body, a [`Frame`] that drives the body. Constructing the node polls the
//! body until it either completes or suspends on an unfinished dependency;
//! the dependency later invokes the continuation registered by the awaiting
//! frame, which polls the body again.
//!
//! While a body is polled its node sits on a thread-local frame stack, so a
//! dependency awaited inside the body can discover who is waiting on it.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::{Condvar, Mutex};

use crate::error::{Fault, UsageError};
use crate::tracer::{self, ExecutionResult, TracerFrameKey};

/// Final outcome of a computation.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// Completed with a value.
    Value(T),
    /// Completed with the abort outcome.
    Nothing,
    /// Completed with a fault.
    Fault(Fault),
}

impl<T> Outcome<T> {
    /// Returns `true` for the abort outcome.
    pub fn is_nothing(&self) -> bool {
        matches!(self, Outcome::Nothing)
    }

    pub(crate) fn execution_result(&self) -> ExecutionResult {
        match self {
            Outcome::Value(_) => ExecutionResult::Value,
            Outcome::Nothing => ExecutionResult::Nothing,
            Outcome::Fault(fault) => ExecutionResult::Fault {
                message: fault.to_string(),
            },
        }
    }
}

/// Callback invoked exactly once when the awaited computation completes.
pub struct Continuation(Box<dyn FnOnce() + Send>);

impl Continuation {
    /// Wrap a callback.
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// A continuation that does nothing when invoked.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Invoke the continuation, consuming it.
    pub fn resume(self) {
        (self.0)()
    }
}

impl From<Waker> for Continuation {
    fn from(waker: Waker) -> Self {
        Self::new(move || waker.wake())
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Continuation")
    }
}

#[derive(Debug)]
enum Stage<T> {
    Pending,
    Completed(Outcome<T>),
    Taken,
}

/// Single-assignment, single-continuation outcome holder.
///
/// A slot is either pending or completed. The outcome is set at most once,
/// and a continuation may be registered at most once over the slot's whole
/// lifetime. Its single consumer may move the outcome out with
/// [`Slot::take`]; later reads report [`UsageError::AlreadyTaken`].
#[derive(Debug)]
pub struct Slot<T> {
    stage: Stage<T>,
    continuation: Option<Continuation>,
    subscribed: bool,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::pending()
    }
}

impl<T> Slot<T> {
    /// Create an empty slot.
    pub fn pending() -> Self {
        Self {
            stage: Stage::Pending,
            continuation: None,
            subscribed: false,
        }
    }

    /// Create a slot that is already resolved.
    pub fn completed(outcome: Outcome<T>) -> Self {
        Self {
            stage: Stage::Completed(outcome),
            continuation: None,
            subscribed: false,
        }
    }

    /// Returns `true` once an outcome has been set.
    pub fn is_completed(&self) -> bool {
        !matches!(self.stage, Stage::Pending)
    }

    /// Returns `true` if the outcome is the abort outcome.
    pub fn is_nothing(&self) -> bool {
        matches!(self.stage, Stage::Completed(Outcome::Nothing))
    }

    /// Returns `true` if the outcome is a value or a fault, ready to be taken.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.stage,
            Stage::Completed(Outcome::Value(_)) | Stage::Completed(Outcome::Fault(_))
        )
    }

    /// Returns `true` if a continuation was ever registered.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Register the continuation.
    ///
    /// The slot keeps it until [`Slot::complete`] or
    /// [`Slot::take_continuation`] hands it back; it is never invoked here.
    pub fn register(&mut self, continuation: Continuation) -> Result<(), UsageError> {
        if self.subscribed {
            return Err(UsageError::ContinuationAlreadyRegistered);
        }
        self.subscribed = true;
        self.continuation = Some(continuation);
        Ok(())
    }

    /// Set the outcome, returning the continuation the caller must invoke.
    pub fn complete(&mut self, outcome: Outcome<T>) -> Result<Option<Continuation>, UsageError> {
        if self.is_completed() {
            return Err(UsageError::AlreadyCompleted);
        }
        self.stage = Stage::Completed(outcome);
        Ok(self.continuation.take())
    }

    /// Remove the registered continuation without invoking it.
    pub fn take_continuation(&mut self) -> Option<Continuation> {
        self.continuation.take()
    }

    /// Move the outcome out.
    pub fn take(&mut self) -> Result<Outcome<T>, UsageError> {
        match mem::replace(&mut self.stage, Stage::Taken) {
            Stage::Completed(outcome) => Ok(outcome),
            Stage::Pending => {
                self.stage = Stage::Pending;
                Err(UsageError::NotCompleted)
            }
            Stage::Taken => Err(UsageError::AlreadyTaken),
        }
    }
}

// Frames currently being polled on this thread, innermost last.
thread_local! {
    static FRAME_STACK: RefCell<Vec<Box<dyn Any>>> = const { RefCell::new(Vec::new()) };
}

/// Pops the frame stack when dropped, even if the poll panics.
pub(crate) struct FrameGuard(());

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAME_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Push an engine-specific link describing the frame about to be polled.
pub(crate) fn enter(link: Box<dyn Any>) -> FrameGuard {
    FRAME_STACK.with(|stack| stack.borrow_mut().push(link));
    FrameGuard(())
}

/// The innermost frame's link, if it is of type `L`.
///
/// Only the innermost frame is considered: a computation awaited inside a
/// body of another engine is not linked to any outer frame.
pub(crate) fn current<L: Clone + 'static>() -> Option<L> {
    FRAME_STACK.with(|stack| {
        stack
            .borrow()
            .last()
            .and_then(|link| link.downcast_ref::<L>())
            .cloned()
    })
}

/// Boxed `async` body of a computation.
pub(crate) type Body<T> = Pin<Box<dyn Future<Output = Result<T, Fault>> + Send>>;

/// A node driven by a [`Frame`]. The node is its own waker: waking it
/// resumes the body.
pub(crate) trait Resumable: Wake + Send + Sync + Sized + 'static {
    type Output;

    fn key(&self) -> &TracerFrameKey;

    fn frame(&self) -> Option<&Frame<Self::Output>>;

    /// The link pushed on the frame stack while the body is polled.
    fn link(self: &Arc<Self>) -> Box<dyn Any>;

    /// The body returned.
    fn finish(self: &Arc<Self>, result: Result<Self::Output, Fault>);

    /// The body was released after [`Frame::unwind`] was requested mid-poll.
    fn unwound(self: &Arc<Self>);
}

enum FrameStage<T> {
    Idle(Body<T>),
    Running { rescheduled: bool, unwind: bool },
    Done,
}

/// Drives the `async` body of a computation.
///
/// Polls of one body never overlap: a wake that arrives while the body is
/// being polled marks it rescheduled and the running poll loops once more.
pub(crate) struct Frame<T> {
    stage: Mutex<FrameStage<T>>,
}

impl<T> Frame<T> {
    pub fn new(body: Body<T>) -> Self {
        Self {
            stage: Mutex::new(FrameStage::Idle(body)),
        }
    }

    /// Poll the body of `node` until it completes or suspends.
    pub fn resume<N>(node: &Arc<N>)
    where
        N: Resumable<Output = T>,
    {
        let Some(frame) = node.frame() else {
            return;
        };
        let mut body = {
            let mut stage = frame.stage.lock();
            match mem::replace(
                &mut *stage,
                FrameStage::Running {
                    rescheduled: false,
                    unwind: false,
                },
            ) {
                FrameStage::Idle(body) => body,
                FrameStage::Running { unwind, .. } => {
                    *stage = FrameStage::Running {
                        rescheduled: true,
                        unwind,
                    };
                    return;
                }
                FrameStage::Done => {
                    *stage = FrameStage::Done;
                    return;
                }
            }
        };

        let waker = Waker::from(node.clone());
        let mut cx = Context::from_waker(&waker);
        loop {
            let poll = {
                let _guard = enter(node.link());
                body.as_mut().poll(&mut cx)
            };

            let mut stage = frame.stage.lock();
            let (rescheduled, unwind) = match &*stage {
                FrameStage::Running {
                    rescheduled,
                    unwind,
                } => (*rescheduled, *unwind),
                _ => (false, false),
            };

            if unwind {
                *stage = FrameStage::Done;
                drop(stage);
                drop(poll);
                drop(body);
                node.unwound();
                return;
            }

            match poll {
                Poll::Ready(result) => {
                    *stage = FrameStage::Done;
                    drop(stage);
                    drop(body);
                    node.finish(result);
                    return;
                }
                Poll::Pending if rescheduled => {
                    *stage = FrameStage::Running {
                        rescheduled: false,
                        unwind: false,
                    };
                    drop(stage);
                    tracer::emit(|t| t.on_resume(node.key()));
                }
                Poll::Pending => {
                    *stage = FrameStage::Idle(body);
                    drop(stage);
                    tracer::emit(|t| t.on_suspend(node.key()));
                    return;
                }
            }
        }
    }

    /// Release the body because the computation is being aborted.
    ///
    /// Returns `true` if the body is already gone when this returns. If the
    /// body is being polled right now it is released as soon as the poll
    /// returns, followed by [`Resumable::unwound`], and `false` is returned.
    pub fn unwind(&self) -> bool {
        let released = {
            let mut stage = self.stage.lock();
            match &mut *stage {
                FrameStage::Idle(_) => mem::replace(&mut *stage, FrameStage::Done),
                FrameStage::Running { unwind, .. } => {
                    *unwind = true;
                    return false;
                }
                FrameStage::Done => return true,
            }
        };
        drop(released);
        true
    }
}

/// A node whose outcome can be consumed by a driver outside any frame.
pub(crate) trait Source: Send + Sync + 'static {
    type Output;

    fn subscribe(self: &Arc<Self>, continuation: Continuation) -> Result<(), UsageError>;

    fn take(&self) -> Result<Outcome<Self::Output>, UsageError>;
}

/// Blocks a thread until a continuation fires.
#[derive(Default)]
struct Signal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn continuation(self: &Arc<Self>) -> Continuation {
        let signal = self.clone();
        Continuation::new(move || {
            *signal.fired.lock() = true;
            signal.cond.notify_all();
        })
    }

    fn wait(&self) {
        let mut fired = self.fired.lock();
        while !*fired {
            self.cond.wait(&mut fired);
        }
    }
}

/// Subscribe to `node` and block until it completes.
pub(crate) fn wait<N: Source>(node: &Arc<N>) -> Result<Outcome<N::Output>, UsageError> {
    let signal = Arc::new(Signal::default());
    node.subscribe(signal.continuation())?;
    signal.wait();
    node.take()
}

/// Subscribe to `node` and read its outcome without waiting.
pub(crate) fn now<N: Source>(node: &Arc<N>) -> Result<Outcome<N::Output>, UsageError> {
    node.subscribe(Continuation::noop())?;
    node.take()
}

/// Future resolving to the outcome of a node, for drivers running on an
/// executor instead of blocking a thread.
pub(crate) struct Completion<N> {
    node: Arc<N>,
    waker: Option<Arc<Mutex<Option<Waker>>>>,
}

impl<N> Completion<N> {
    pub fn new(node: Arc<N>) -> Self {
        Self { node, waker: None }
    }
}

impl<N: Source> Future for Completion<N> {
    type Output = Result<Outcome<N::Output>, UsageError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(cell) = &self.waker {
            *cell.lock() = Some(cx.waker().clone());
        } else {
            let cell = Arc::new(Mutex::new(Some(cx.waker().clone())));
            self.waker = Some(cell.clone());
            let subscribed = self.node.subscribe(Continuation::new(move || {
                if let Some(waker) = cell.lock().take() {
                    waker.wake();
                }
            }));
            if let Err(e) = subscribed {
                return Poll::Ready(Err(e));
            }
        }
        match self.node.take() {
            Err(UsageError::NotCompleted) => Poll::Pending,
            taken => Poll::Ready(taken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_twice_is_usage_error() {
        let mut slot = Slot::<i32>::pending();
        slot.register(Continuation::noop()).unwrap();
        assert_eq!(
            slot.register(Continuation::noop()),
            Err(UsageError::ContinuationAlreadyRegistered)
        );
    }

    #[test]
    fn test_register_after_continuation_consumed_is_usage_error() {
        let mut slot = Slot::<i32>::pending();
        slot.register(Continuation::noop()).unwrap();
        let continuation = slot.complete(Outcome::Value(1)).unwrap();
        assert!(continuation.is_some());
        assert_eq!(
            slot.register(Continuation::noop()),
            Err(UsageError::ContinuationAlreadyRegistered)
        );
    }

    #[test]
    fn test_take_before_completion_is_usage_error() {
        let mut slot = Slot::<i32>::pending();
        assert!(matches!(slot.take(), Err(UsageError::NotCompleted)));
        // Still pending afterwards
        assert!(!slot.is_completed());
    }

    #[test]
    fn test_outcome_is_set_once() {
        let mut slot = Slot::pending();
        slot.complete(Outcome::Value(1)).unwrap();
        assert!(matches!(
            slot.complete(Outcome::Value(2)),
            Err(UsageError::AlreadyCompleted)
        ));
        assert!(matches!(slot.take(), Ok(Outcome::Value(1))));
        assert!(matches!(slot.take(), Err(UsageError::AlreadyTaken)));
    }

    #[test]
    fn test_complete_hands_back_continuation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut slot = Slot::<()>::pending();
        let counter = calls.clone();
        slot.register(Continuation::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        if let Some(continuation) = slot.complete(Outcome::Nothing).unwrap() {
            continuation.resume();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(slot.is_nothing());
        assert!(!slot.is_resolved());
    }

    #[test]
    fn test_faulted_slot_returns_fault() {
        let mut slot = Slot::<i32>::completed(Outcome::Fault(UsageError::Nothing.into()));
        assert!(slot.is_resolved());
        match slot.take() {
            Ok(Outcome::Fault(fault)) => assert_eq!(fault.usage(), Some(&UsageError::Nothing)),
            other => panic!("Expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_stack_innermost_only() {
        let _outer = enter(Box::new(1u8));
        assert_eq!(current::<u8>(), Some(1));
        {
            let _inner = enter(Box::new("inner"));
            assert_eq!(current::<u8>(), None);
            assert_eq!(current::<&str>(), Some("inner"));
        }
        assert_eq!(current::<u8>(), Some(1));
    }
}
