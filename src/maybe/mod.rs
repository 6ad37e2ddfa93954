//! Optional (short-circuiting) computations.
//!
//! Two engines implement the same contract: a body written as straight-line
//! `async` code awaits other optional computations, and the whole chain
//! resolves to `Nothing` as soon as any of them does.
//!
//! - [`Maybe`] tracks which frame awaits which and walks that parent chain
//!   on abort, releasing each suspended body innermost-first.
//! - [`MaybeEx`] (feature `fault-channel`) reports an abort as a reserved
//!   fault that the body forwards with `?`, letting ordinary drop glue
//!   release resources.

mod chain;
#[cfg(feature = "fault-channel")]
mod unwind;

pub use chain::{Maybe, MaybeAwait, MaybeOutcome};
#[cfg(feature = "fault-channel")]
pub use unwind::{MaybeEx, MaybeExAwait, MaybeExOutcome};

use crate::error::{Fault, UsageError};
use crate::suspend::Outcome;

/// Fault yielded by awaiting an aborted [`Maybe`] that has no parent frame.
///
/// Inside a `MaybeEx` body the abort becomes the fault-channel sentinel, so
/// that body resolves to `Nothing` as well.
#[cfg(feature = "fault-channel")]
fn nothing_fault() -> Fault {
    if crate::suspend::current::<unwind::SentinelFrame>().is_some() {
        Fault::Break(crate::error::BreakSignal::new())
    } else {
        Fault::Usage(UsageError::Nothing)
    }
}

#[cfg(not(feature = "fault-channel"))]
fn nothing_fault() -> Fault {
    Fault::Usage(UsageError::Nothing)
}

/// Externally observed result of a completed optional computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaybeResult<T> {
    /// The computation produced a value.
    Value(T),
    /// The computation was aborted.
    Nothing,
}

impl<T> MaybeResult<T> {
    /// Returns `true` if the computation was aborted.
    pub fn is_nothing(&self) -> bool {
        matches!(self, MaybeResult::Nothing)
    }

    /// Returns the inner value.
    ///
    /// Asking for the value of `Nothing` is a usage error.
    pub fn value(self) -> Result<T, UsageError> {
        match self {
            MaybeResult::Value(value) => Ok(value),
            MaybeResult::Nothing => Err(UsageError::Nothing),
        }
    }

    /// Converts into an `Option`, mapping `Nothing` to `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            MaybeResult::Value(value) => Some(value),
            MaybeResult::Nothing => None,
        }
    }
}

impl<T> From<MaybeResult<T>> for Option<T> {
    fn from(result: MaybeResult<T>) -> Self {
        result.into_option()
    }
}

/// Map a consumed outcome to what drivers return.
fn into_result<T>(outcome: Result<Outcome<T>, UsageError>) -> Result<MaybeResult<T>, Fault> {
    match outcome.map_err(Fault::Usage)? {
        Outcome::Value(value) => Ok(MaybeResult::Value(value)),
        Outcome::Nothing => Ok(MaybeResult::Nothing),
        Outcome::Fault(fault) => Err(fault),
    }
}
