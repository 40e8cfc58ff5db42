//! Typed error taxonomy for the storage core (spec §7).
//!
//! Every fallible operation in this crate returns `EngineResult<T>`. Errors
//! carry a stable `ErrorKind`, the module/file/line of the raise site, and a
//! human message. The metadata is for diagnostics only; callers should match
//! on `kind()`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Buffer allocation failed; caller may retry after eviction.
    MemoryExhaust,
    /// Unlock called without a matching lock held.
    NotLocked,
    /// The deadlock detector found a cycle in the wait-for graph.
    DeadLock,
    /// A lock request exceeded its timeout.
    LockTimeout,
    /// A non-cycling sequence reached its bound.
    IntegerOverflow,
    /// A guarded resource was dropped while still locked.
    StillLocked,
    /// Any unchecked internal condition; raised as-is with its origin.
    Unexpected,
    /// Meant for the client; logged at `Info`, not `Error`.
    UserLevel,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ErrorKind::MemoryExhaust => "MemoryExhaust",
            ErrorKind::NotLocked => "NotLocked",
            ErrorKind::DeadLock => "DeadLock",
            ErrorKind::LockTimeout => "LockTimeout",
            ErrorKind::IntegerOverflow => "IntegerOverflow",
            ErrorKind::StillLocked => "StillLocked",
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::UserLevel => "UserLevel",
        };
        write!(f, "{}", s)
    }
}

/// A typed engine error, annotated with the raise site for diagnostics.
pub struct EngineError {
    kind: ErrorKind,
    message: String,
    file: &'static str,
    line: u32,
}

impl EngineError {
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        let err = Self {
            kind,
            message: message.into(),
            file: loc.file(),
            line: loc.line(),
        };

        if kind == ErrorKind::UserLevel {
            log::info!("{}", err);
        } else {
            log::error!("{}", err);
        }

        err
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Render the full backtrace at the point the error was constructed.
    /// Expensive; call only when a human needs to see it (deadlock reports,
    /// panics translated at a worker-pool boundary).
    pub fn backtrace_string(&self) -> String {
        format!("{:?}", backtrace::Backtrace::new())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}:{})",
            self.kind, self.message, self.file, self.line
        )
    }
}

impl fmt::Debug for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        EngineError::new(ErrorKind::Unexpected, format!("io error: {}", e))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Shorthand matching the taxonomy table in spec.md §7: build an error of a
/// given kind with a formatted message, recording `file!()`/`line!()` of the
/// call site.
#[macro_export]
macro_rules! engine_err {
    ($kind:expr, $($arg:tt)*) => {
        $crate::error::EngineError::new($kind, format!($($arg)*))
    };
}
