//! Monad-Flow: short-circuiting and context-injected computations written as
//! plain `async` code.
//!
//! Every computation here is built on one suspension protocol: a
//! single-assignment outcome with a single continuation. A body starts
//! running as soon as the computation is constructed and suspends at the
//! first dependency that has not completed yet; completing the dependency
//! resumes it. No executor is involved.
//!
//! # Key Features
//!
//! - **Early abort**: awaiting a [`Maybe`] that has no value aborts every
//!   enclosing `Maybe` body, innermost first, releasing what each one holds
//! - **Fault-channel variant**: [`MaybeEx`] carries the abort through `?`
//!   instead of parent links (feature `fault-channel`, on by default)
//! - **Late-bound environment**: a [`Reader`] tree is described up front and
//!   evaluated once an environment is applied to its root
//! - **Capabilities**: [`ServiceRegistry`] and [`Reader::service`] resolve
//!   services by type from the environment
//! - **Tracing**: observe frame lifecycle events through the [`tracer`]
//!   module
//!
//! # Example
//!
//! ```
//! use monad_flow::{Fault, Maybe, MaybeResult};
//!
//! fn parse(s: &str) -> Maybe<i32> {
//!     Maybe::from_option(s.trim().parse().ok())
//! }
//!
//! async fn sum(a: &'static str, b: &'static str) -> Result<i32, Fault> {
//!     Ok(parse(a).await? + parse(b).await?)
//! }
//!
//! assert_eq!(Maybe::new(sum(" 7", "3 ")).wait().unwrap(), MaybeResult::Value(10));
//! assert_eq!(Maybe::new(sum("8", "a")).wait().unwrap(), MaybeResult::Nothing);
//! ```
//!
//! # Driving a computation
//!
//! The outermost consumer either blocks with `wait()`, reads a computation
//! known to be complete with `result()`, or awaits `outcome()` on an
//! executor. Each computation accepts exactly one continuation, so exactly
//! one of these may be used per computation.

mod error;
mod maybe;
mod reader;
mod service;
mod suspend;
pub mod tracer;

pub use error::{BreakSignal, Fault, UsageError};
pub use maybe::{Maybe, MaybeAwait, MaybeOutcome, MaybeResult};
#[cfg(feature = "fault-channel")]
pub use maybe::{MaybeEx, MaybeExAwait, MaybeExOutcome};
pub use reader::{Reader, ReaderAwait};
pub use service::{ServiceRegistry, Services};
pub use suspend::{Continuation, Outcome, Slot};
pub use tracer::{ExecutionResult, NoopTracer, SpanId, Tracer, TracerFrameKey};
