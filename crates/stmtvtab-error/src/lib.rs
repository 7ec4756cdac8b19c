use thiserror::Error;

/// Primary error type for the `statement` virtual table module.
///
/// Variants map onto SQLite result codes so they can cross the virtual table
/// callback boundary unchanged. Definition errors carry the exact user-facing
/// message SQLite reports for a failed `CREATE VIRTUAL TABLE`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatementVtabError {
    // === Definition Errors ===
    /// The module argument holding the wrapped query is missing or too short.
    #[error("no statement provided")]
    NoStatement,

    /// The wrapped query is not enclosed in `(` ... `)`.
    #[error("statement must be parenthesized")]
    NotParenthesized,

    /// The wrapped query can modify the database.
    #[error("Statement must be read only.")]
    NotReadOnly,

    // === Engine Errors ===
    /// `sqlite3_prepare_v2` rejected the wrapped query.
    ///
    /// `message` is the connection's own error message, copied verbatim.
    #[error("{message}")]
    Compile { code: i32, message: String },

    /// Binding or stepping the wrapped statement failed.
    #[error("{message}")]
    Execution { code: i32, message: String },

    // === Planning Errors ===
    /// A constraint on a hidden column cannot be bound as a parameter.
    ///
    /// Not a hard failure: SQLite retries planning with another constraint set.
    #[error("constraint cannot be pushed down")]
    PlanInfeasible,

    /// The parameter map would overflow its buffer size.
    #[error("Too many constraints to index: {count}")]
    TooManyConstraints { count: usize },

    /// A parameter map token is truncated or contains a non-token character.
    #[error("malformed parameter map at slot {slot}")]
    MalformedToken { slot: usize },

    // === Resource Errors ===
    /// Out of memory.
    #[error("out of memory")]
    OutOfMemory,

    // === Initialization Errors ===
    /// The linked SQLite library is older than the module supports.
    #[error("SQLite versions below 3.24.0 are not supported")]
    UnsupportedVersion { found: i32 },
}

/// SQLite primary result codes used by this module.
///
/// These match the numeric values from C SQLite's `sqlite3.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Generic error.
    Error = 1,
    /// Internal logic error.
    Internal = 2,
    /// Database file is locked.
    Busy = 5,
    /// Out of memory.
    NoMem = 7,
    /// String or BLOB exceeds size limit.
    TooBig = 18,
    /// Constraint violation; from `xBestIndex` it means "try another plan".
    Constraint = 19,
    /// Data type mismatch.
    Mismatch = 20,
    /// Library used incorrectly.
    Misuse = 21,
    /// Bind parameter out of range.
    Range = 25,
    /// `sqlite3_step()` has another row ready.
    Row = 100,
    /// `sqlite3_step()` has finished executing.
    Done = 101,
}

impl StatementVtabError {
    /// Map this error to the SQLite result code reported to the engine.
    ///
    /// Engine-originated errors report the engine's own (possibly extended)
    /// code, so this returns a raw `i32` rather than an [`ErrorCode`].
    #[allow(clippy::match_same_arms)]
    pub const fn sqlite_code(&self) -> i32 {
        match self {
            Self::Compile { code, .. } | Self::Execution { code, .. } => *code,
            _ => self.error_code() as i32,
        }
    }

    /// Map this error to its primary [`ErrorCode`].
    #[allow(clippy::match_same_arms)]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NoStatement | Self::NotParenthesized => ErrorCode::Misuse,
            Self::NotReadOnly
            | Self::TooManyConstraints { .. }
            | Self::MalformedToken { .. }
            | Self::UnsupportedVersion { .. } => ErrorCode::Error,
            Self::Compile { code, .. } | Self::Execution { code, .. } => {
                ErrorCode::from_primary(*code & 0xff)
            }
            Self::PlanInfeasible => ErrorCode::Constraint,
            Self::OutOfMemory => ErrorCode::NoMem,
        }
    }

    /// Whether the user can likely fix this by changing the table definition
    /// or the query.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoStatement
                | Self::NotParenthesized
                | Self::NotReadOnly
                | Self::Compile { .. }
                | Self::PlanInfeasible
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NoStatement | Self::NotParenthesized => {
                Some("Wrap the query in its own parentheses: USING statement((SELECT ...))")
            }
            Self::NotReadOnly => Some("Only SELECT-style statements can back a statement table"),
            Self::PlanInfeasible => {
                Some("Constrain hidden parameter columns with equality (=, IN) only")
            }
            Self::UnsupportedVersion { .. } => Some("Link against SQLite 3.24.0 or newer"),
            _ => None,
        }
    }

    /// Whether SQLite should treat this as "try another plan" rather than a
    /// statement failure.
    pub const fn is_plan_rejection(&self) -> bool {
        matches!(self, Self::PlanInfeasible)
    }

    /// Create a compile error from an engine result code and message.
    pub fn compile(code: i32, message: impl Into<String>) -> Self {
        Self::Compile {
            code,
            message: message.into(),
        }
    }

    /// Create an execution error from an engine result code and message.
    pub fn execution(code: i32, message: impl Into<String>) -> Self {
        Self::Execution {
            code,
            message: message.into(),
        }
    }
}

impl ErrorCode {
    /// Classify a primary SQLite result code; unknown codes collapse to
    /// [`ErrorCode::Error`].
    pub const fn from_primary(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            2 => Self::Internal,
            5 => Self::Busy,
            7 => Self::NoMem,
            18 => Self::TooBig,
            19 => Self::Constraint,
            20 => Self::Mismatch,
            21 => Self::Misuse,
            25 => Self::Range,
            100 => Self::Row,
            101 => Self::Done,
            _ => Self::Error,
        }
    }
}

impl From<StatementVtabError> for rusqlite::Error {
    fn from(err: StatementVtabError) -> Self {
        let code = rusqlite::ffi::Error::new(err.sqlite_code());
        // A rejected plan is a signal to the planner, not a diagnostic.
        let message = if err.is_plan_rejection() {
            None
        } else {
            Some(err.to_string())
        };
        Self::SqliteFailure(code, message)
    }
}

/// Result type alias using `StatementVtabError`.
pub type Result<T> = std::result::Result<T, StatementVtabError>;
