//! Error types for suspendable computations.

use std::fmt;
use std::sync::Arc;

/// Violations of the computation protocol.
///
/// These are programmer-contract errors. They are reported immediately and
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    /// A second continuation was registered on the same computation.
    #[error("only one continuation is allowed")]
    ContinuationAlreadyRegistered,

    /// The result was read before the computation completed.
    #[error("computation has not completed")]
    NotCompleted,

    /// An outcome was set on a computation that already had one.
    #[error("computation has already completed")]
    AlreadyCompleted,

    /// The result was already moved out by its consumer.
    #[error("computation result was already taken")]
    AlreadyTaken,

    /// The inner value of `Nothing` was requested.
    #[error("computation resolved to nothing")]
    Nothing,

    /// A different environment was applied to a computation that already has one.
    #[error("a different environment has already been applied")]
    EnvironmentAlreadyApplied,

    /// The environment has no capability registered under the requested type.
    #[error("type '{type_name}' is not registered")]
    NotRegistered {
        /// Name of the requested capability type.
        type_name: &'static str,
    },
}

/// Marker carried by [`Fault::Break`] while an aborted
/// [`MaybeEx`](crate::MaybeEx) unwinds through `?`.
///
/// It can only be produced by the crate, so callers can forward it but never
/// forge one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakSignal {
    _private: (),
}

impl BreakSignal {
    pub(crate) const fn new() -> Self {
        Self { _private: () }
    }
}

/// Faults observed by computation bodies and their consumers.
///
/// Caller errors can be propagated with the `?` operator, which converts any
/// `Into<anyhow::Error>` type into [`Fault::User`]. A [`UsageError`] converted
/// this way is recognised and kept as [`Fault::Usage`].
#[derive(Debug, Clone)]
pub enum Fault {
    /// The computation protocol was violated.
    Usage(UsageError),

    /// An aborted fault-channel computation is unwinding.
    ///
    /// Every [`MaybeEx`](crate::MaybeEx) frame turns this back into
    /// `Nothing`, so it is never observed by the outermost consumer.
    Break(BreakSignal),

    /// Error raised by caller-supplied logic, passed through unchanged.
    User(Arc<anyhow::Error>),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Usage(e) => write!(f, "usage error: {}", e),
            Fault::Break(_) => write!(f, "computation aborted"),
            Fault::User(e) => write!(f, "user error: {}", e),
        }
    }
}

impl<T: Into<anyhow::Error>> From<T> for Fault {
    fn from(err: T) -> Self {
        match err.into().downcast::<UsageError>() {
            Ok(usage) => Fault::Usage(usage),
            Err(err) => Fault::User(Arc::new(err)),
        }
    }
}

impl Fault {
    /// Returns the usage error if this is a `Usage` variant.
    pub fn usage(&self) -> Option<&UsageError> {
        match self {
            Fault::Usage(e) => Some(e),
            _ => None,
        }
    }

    /// Returns a reference to the inner user error if this is a `User` variant.
    pub fn user_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            Fault::User(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to downcast the user error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.user_error().and_then(|e| e.downcast_ref::<E>())
    }

    /// Returns `true` if this is a `User` fault containing an error of type `E`.
    pub fn is<E: std::error::Error + Send + Sync + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Returns `true` for the fault-channel abort sentinel.
    pub fn is_break(&self) -> bool {
        matches!(self, Fault::Break(_))
    }
}
