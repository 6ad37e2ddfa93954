//! Tracer trait for observing computation frames.
//!
//! This module defines the [`Tracer`] trait and related types for observing
//! how computations start, suspend, resume and finish. Nothing is traced
//! until a tracer is installed with [`set_tracer`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use monad_flow::tracer::{set_tracer, SpanId, Tracer, TracerFrameKey};
//!
//! struct PrintTracer;
//!
//! impl Tracer for PrintTracer {
//!     fn new_span_id(&self) -> SpanId {
//!         SpanId(1)
//!     }
//!
//!     fn on_exit(&self, frame: &TracerFrameKey) {
//!         println!("aborted: {:?}", frame);
//!     }
//! }
//!
//! set_tracer(Some(Arc::new(PrintTracer)));
//! set_tracer(None);
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a computation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(pub u64);

/// The engine a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Engine {
    /// Parent-chain optional computation.
    Maybe,
    /// Fault-channel optional computation.
    MaybeEx,
    /// Context-injected computation.
    Reader,
}

/// Identifies a frame in a type-erased manner for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TracerFrameKey {
    /// Engine of the frame.
    pub engine: Engine,
    /// Output type name (e.g., "i32")
    pub output_type: &'static str,
    /// Span assigned when the frame was created.
    pub span: SpanId,
}

impl TracerFrameKey {
    pub(crate) fn new<T>(engine: Engine) -> Self {
        Self {
            engine,
            output_type: std::any::type_name::<T>(),
            span: new_span_id(),
        }
    }
}

/// Frame result classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// Completed with a value.
    Value,
    /// Completed with the abort outcome.
    Nothing,
    /// Completed with a fault.
    Fault { message: String },
}

/// Tracer trait for observing computation frames.
///
/// All methods except [`Tracer::new_span_id`] have empty default
/// implementations, so you only need to override the events you're
/// interested in.
///
/// Implementations must be `Send + Sync` since continuations may resume
/// frames on threads owned by the host.
pub trait Tracer: Send + Sync + 'static {
    /// Generate a new unique span ID.
    fn new_span_id(&self) -> SpanId;

    /// Called when a computation node is created.
    #[inline]
    fn on_frame_start(&self, _frame: &TracerFrameKey) {}

    /// Called when a frame's body returns to its driver without completing.
    #[inline]
    fn on_suspend(&self, _frame: &TracerFrameKey) {}

    /// Called when a continuation re-enters a suspended frame.
    #[inline]
    fn on_resume(&self, _frame: &TracerFrameKey) {}

    /// Called when a frame completes.
    #[inline]
    fn on_frame_end(&self, _frame: &TracerFrameKey, _result: ExecutionResult) {}

    /// Called when a consumer registers its continuation.
    #[inline]
    fn on_continuation_registered(&self, _frame: &TracerFrameKey) {}

    /// Called when an abort reaches a frame nobody is awaiting yet.
    #[inline]
    fn on_exit_deferred(&self, _frame: &TracerFrameKey) {}

    /// Called when an abort unwinds a frame.
    #[inline]
    fn on_exit(&self, _frame: &TracerFrameKey) {}

    /// Called when an environment is stored on a frame.
    #[inline]
    fn on_environment_applied(&self, _frame: &TracerFrameKey) {}

    /// Called when a frame links a child it awaits.
    #[inline]
    fn on_child_linked(&self, _parent: &TracerFrameKey, _child: &TracerFrameKey) {}
}

/// Tracer that discards all events.
pub struct NoopTracer;

/// Global span counter for NoopTracer.
static NOOP_SPAN_COUNTER: AtomicU64 = AtomicU64::new(1);

impl Tracer for NoopTracer {
    #[inline(always)]
    fn new_span_id(&self) -> SpanId {
        SpanId(NOOP_SPAN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

static TRACER: RwLock<Option<Arc<dyn Tracer>>> = parking_lot::const_rwlock(None);

/// Install a process-wide tracer, or remove it with `None`.
pub fn set_tracer(tracer: Option<Arc<dyn Tracer>>) {
    *TRACER.write() = tracer;
}

/// Get the currently installed tracer.
pub fn tracer() -> Option<Arc<dyn Tracer>> {
    TRACER.read().clone()
}

fn new_span_id() -> SpanId {
    match tracer() {
        Some(tracer) => tracer.new_span_id(),
        None => NoopTracer.new_span_id(),
    }
}

/// Emit an event to the installed tracer, if any.
#[inline]
pub(crate) fn emit<F: FnOnce(&dyn Tracer)>(event: F) {
    if let Some(tracer) = tracer() {
        event(&*tracer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTracer {
        exit_count: AtomicUsize,
    }

    impl Tracer for CountingTracer {
        fn new_span_id(&self) -> SpanId {
            SpanId(1)
        }

        fn on_exit(&self, _frame: &TracerFrameKey) {
            self.exit_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_noop_tracer_span_id() {
        let tracer = NoopTracer;
        let id1 = tracer.new_span_id();
        let id2 = tracer.new_span_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_counting_tracer() {
        let tracer = CountingTracer {
            exit_count: AtomicUsize::new(0),
        };
        let key = TracerFrameKey {
            engine: Engine::Maybe,
            output_type: "i32",
            span: SpanId(7),
        };

        tracer.on_exit(&key);
        tracer.on_frame_start(&key);
        tracer.on_exit(&key);

        assert_eq!(tracer.exit_count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_serde_roundtrip() {
        let result = ExecutionResult::Fault {
            message: "boom".to_string(),
        };
        let record = (SpanId(42), Engine::Reader, result);

        let json = serde_json::to_string(&record).unwrap();
        let deserialized: (SpanId, Engine, ExecutionResult) =
            serde_json::from_str(&json).unwrap();
        assert_eq!(record, deserialized);
    }

    #[test]
    fn test_tracer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopTracer>();
        assert_send_sync::<Arc<dyn Tracer>>();
    }
}
