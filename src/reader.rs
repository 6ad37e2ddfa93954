//! Context-injected computations.
//!
//! A [`Reader`] describes what it needs from an environment without holding
//! one. Leaves built with [`Reader::read`] extract a value once an
//! environment arrives; bodies built with [`Reader::new`] await other readers
//! and suspend at the first leaf. Applying an environment to the root pushes
//! it down to every reader the root awaits, and each of those pushes it on
//! to the readers they await, now or whenever they link them later.
//!
//! An environment is written once per node. Re-applying the same `Arc` is a
//! no-op; applying a different one is a usage error.

use std::any::Any;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake};

use parking_lot::Mutex;

use crate::error::{Fault, UsageError};
use crate::service::Services;
use crate::suspend::{self, Continuation, Frame, Outcome, Resumable, Slot, Source};
use crate::tracer::{self, Engine, TracerFrameKey};

type Extractor<E, T> = Box<dyn FnOnce(&E) -> Result<T, Fault> + Send>;

/// Accepts an environment pushed down from the frame that awaits it.
trait Receive<E>: Send + Sync {
    fn key(&self) -> &TracerFrameKey;

    fn receive(self: Arc<Self>, env: Arc<E>) -> Result<(), UsageError>;

    fn is_completed(&self) -> bool;
}

/// Links children awaited by a running body.
trait Link<E>: Send + Sync {
    fn link(self: Arc<Self>, child: Arc<dyn Receive<E>>) -> Result<(), UsageError>;
}

type FrameLink<E> = Weak<dyn Link<E>>;

struct ReaderState<E, T> {
    slot: Slot<T>,
    extractor: Option<Extractor<E, T>>,
    env: Option<Arc<E>>,
    children: Vec<Arc<dyn Receive<E>>>,
}

struct ReaderNode<E, T> {
    key: TracerFrameKey,
    state: Mutex<ReaderState<E, T>>,
    frame: Option<Frame<T>>,
}

impl<E, T> ReaderNode<E, T>
where
    E: Send + Sync + 'static,
    T: Send + 'static,
{
    fn new(
        slot: Slot<T>,
        extractor: Option<Extractor<E, T>>,
        frame: Option<Frame<T>>,
    ) -> Arc<Self> {
        let node = Arc::new(Self {
            key: TracerFrameKey::new::<T>(Engine::Reader),
            state: Mutex::new(ReaderState {
                slot,
                extractor,
                env: None,
                children: Vec::new(),
            }),
            frame,
        });
        tracer::emit(|t| t.on_frame_start(&node.key));
        node
    }

    fn complete(&self, outcome: Outcome<T>) {
        tracer::emit(|t| t.on_frame_end(&self.key, outcome.execution_result()));
        let completed = self.state.lock().slot.complete(outcome);
        debug_assert!(completed.is_ok(), "reader outcome set twice");
        let continuation = completed.unwrap_or_default();
        if let Some(continuation) = continuation {
            continuation.resume();
        }
    }
}

impl<E, T> Receive<E> for ReaderNode<E, T>
where
    E: Send + Sync + 'static,
    T: Send + 'static,
{
    fn key(&self) -> &TracerFrameKey {
        &self.key
    }

    fn receive(self: Arc<Self>, env: Arc<E>) -> Result<(), UsageError> {
        let (children, extractor) = {
            let mut state = self.state.lock();
            match &state.env {
                Some(applied) if Arc::ptr_eq(applied, &env) => return Ok(()),
                Some(_) => return Err(UsageError::EnvironmentAlreadyApplied),
                None => {}
            }
            state.env = Some(env.clone());
            (state.children.clone(), state.extractor.take())
        };
        tracer::emit(|t| t.on_environment_applied(&self.key));

        for child in children {
            child.receive(env.clone())?;
        }
        if let Some(extract) = extractor {
            let outcome = match extract(&env) {
                Ok(value) => Outcome::Value(value),
                Err(fault) => Outcome::Fault(fault),
            };
            self.complete(outcome);
        }
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.state.lock().slot.is_completed()
    }
}

impl<E, T> Link<E> for ReaderNode<E, T>
where
    E: Send + Sync + 'static,
    T: Send + 'static,
{
    fn link(self: Arc<Self>, child: Arc<dyn Receive<E>>) -> Result<(), UsageError> {
        let env = {
            let mut state = self.state.lock();
            state.children.retain(|linked| !linked.is_completed());
            state.children.push(child.clone());
            state.env.clone()
        };
        tracer::emit(|t| t.on_child_linked(&self.key, child.key()));

        match env {
            Some(env) => child.receive(env),
            None => Ok(()),
        }
    }
}

impl<E, T> Resumable for ReaderNode<E, T>
where
    E: Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn key(&self) -> &TracerFrameKey {
        &self.key
    }

    fn frame(&self) -> Option<&Frame<T>> {
        self.frame.as_ref()
    }

    fn link(self: &Arc<Self>) -> Box<dyn Any> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let link: FrameLink<E> = weak;
        Box::new(link)
    }

    fn finish(self: &Arc<Self>, result: Result<T, Fault>) {
        let outcome = match result {
            Ok(value) => Outcome::Value(value),
            // A fault-channel abort has no meaning for a reader.
            Err(Fault::Break(_)) => Outcome::Fault(Fault::Usage(UsageError::Nothing)),
            Err(fault) => Outcome::Fault(fault),
        };
        self.complete(outcome);
    }

    fn unwound(self: &Arc<Self>) {}
}

impl<E, T> Wake for ReaderNode<E, T>
where
    E: Send + Sync + 'static,
    T: Send + 'static,
{
    fn wake(self: Arc<Self>) {
        Frame::resume(&self);
    }
}

impl<E, T> Source for ReaderNode<E, T>
where
    E: Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn subscribe(self: &Arc<Self>, continuation: Continuation) -> Result<(), UsageError> {
        let ready = {
            let mut state = self.state.lock();
            state.slot.register(continuation)?;
            if state.slot.is_completed() {
                state.slot.take_continuation()
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
        self.state.lock().slot.take()
    }
}

/// A computation that needs an environment of type `E` to produce a `T`.
///
/// Every reader in one tree shares the same environment type; a reader of a
/// different environment awaited inside a body is not linked and waits for
/// its own environment.
///
/// A root that never receives an environment never completes, so
/// [`Reader::wait`] on it blocks forever.
///
/// # Example
///
/// ```
/// use monad_flow::{Fault, Reader};
///
/// struct Config {
///     template: String,
/// }
///
/// async fn greet(name: &'static str) -> Result<String, Fault> {
///     let template = Reader::read(|c: &Config| c.template.clone()).await?;
///     Ok(template.replace("{0}", name))
/// }
///
/// let hi = Reader::<Config, _>::new(greet("John"))
///     .apply(Config { template: "Hi, {0}!".into() })
///     .unwrap();
/// assert_eq!(hi.wait().unwrap(), "Hi, John!");
/// ```
pub struct Reader<E, T> {
    node: Arc<ReaderNode<E, T>>,
}

impl<E, T> Reader<E, T>
where
    E: Send + Sync + 'static,
    T: Send + 'static,
{
    /// Start a computation from its body.
    ///
    /// The body runs until the first reader it awaits is waiting for the
    /// environment.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = Result<T, Fault>> + Send + 'static,
    {
        let node = ReaderNode::new(Slot::pending(), None, Some(Frame::new(Box::pin(body))));
        Frame::resume(&node);
        Self { node }
    }

    /// A leaf that extracts its value from the environment.
    pub fn read<F>(extract: F) -> Self
    where
        F: FnOnce(&E) -> T + Send + 'static,
    {
        Self::try_read(move |env| Ok(extract(env)))
    }

    /// A leaf whose extraction may fail with a caller fault.
    pub fn try_read<F>(extract: F) -> Self
    where
        F: FnOnce(&E) -> Result<T, Fault> + Send + 'static,
    {
        Self {
            node: ReaderNode::new(Slot::pending(), Some(Box::new(extract)), None),
        }
    }

    /// A computation that ignores the environment and yields `value`.
    pub fn value(value: T) -> Self {
        Self {
            node: ReaderNode::new(Slot::completed(Outcome::Value(value)), None, None),
        }
    }

    /// Supply the environment.
    ///
    /// Applying the same `Arc` again is a no-op; applying a different
    /// environment fails with [`UsageError::EnvironmentAlreadyApplied`].
    pub fn apply(self, env: impl Into<Arc<E>>) -> Result<Self, UsageError> {
        self.node.clone().receive(env.into())?;
        Ok(self)
    }

    /// Returns `true` once the outcome is set.
    pub fn is_completed(&self) -> bool {
        self.node.state.lock().slot.is_completed()
    }

    /// Register the single continuation of this computation.
    pub fn on_completed(&self, continuation: Continuation) -> Result<(), UsageError> {
        self.node.subscribe(continuation)
    }

    /// Block the current thread until the computation completes.
    pub fn wait(self) -> Result<T, Fault> {
        resolve(suspend::wait(&self.node))
    }

    /// Read the result without waiting.
    ///
    /// Fails with [`UsageError::NotCompleted`] if the environment was not
    /// applied yet or a step is still suspended.
    pub fn result(self) -> Result<T, Fault> {
        resolve(suspend::now(&self.node))
    }
}

impl<E, S> Reader<E, Arc<S>>
where
    E: Services,
    S: ?Sized + Send + Sync + 'static,
{
    /// A leaf that looks up capability `S` in the environment.
    ///
    /// Fails with [`UsageError::NotRegistered`] when the environment has no
    /// such capability.
    pub fn service() -> Self {
        Self::try_read(|env: &E| env.service::<S>().map_err(Fault::Usage))
    }
}

impl<E, T> fmt::Debug for Reader<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("span", &self.node.key.span)
            .finish()
    }
}

impl<E, T> IntoFuture for Reader<E, T>
where
    E: Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = Result<T, Fault>;
    type IntoFuture = ReaderAwait<E, T>;

    fn into_future(self) -> ReaderAwait<E, T> {
        ReaderAwait {
            node: self.node,
            linked: false,
            registered: false,
        }
    }
}

/// Future returned by awaiting a [`Reader`].
///
/// Inside a reader body the awaited reader is linked to the body's frame so
/// it receives the environment; elsewhere the future just waits.
pub struct ReaderAwait<E, T> {
    node: Arc<ReaderNode<E, T>>,
    linked: bool,
    registered: bool,
}

impl<E, T> Future for ReaderAwait<E, T>
where
    E: Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = Result<T, Fault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if !this.linked {
            this.linked = true;
            if let Some(parent) = suspend::current::<FrameLink<E>>().and_then(|p| p.upgrade()) {
                let child: Arc<dyn Receive<E>> = this.node.clone();
                if let Err(e) = parent.link(child) {
                    return Poll::Ready(Err(Fault::Usage(e)));
                }
            }
        }

        let mut state = this.node.state.lock();
        if state.slot.is_completed() {
            return Poll::Ready(resolve(state.slot.take()));
        }
        if !this.registered {
            this.registered = true;
            if let Err(e) = state.slot.register(Continuation::from(cx.waker().clone())) {
                return Poll::Ready(Err(Fault::Usage(e)));
            }
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
