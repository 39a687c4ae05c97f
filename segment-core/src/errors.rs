use std::fmt::{Display, Formatter};
use std::io;
use std::result;

/// A hand-rolled error enum in `fff-core::errors::Error`'s shape.
#[derive(Debug)]
pub enum Error {
    /// A structurally invalid merge request: empty input, an interval that
    /// does not encapsulate all timestamps, a requested metric absent from
    /// every input, duplicate names across dimensions and metrics, ...
    InvalidInput(String),
    /// Two inputs disagree on `type`/`elementType`/`complexTypeName` for the
    /// same column name during capability merge.
    IncompatibleColumnTypes { column: String, reason: String },
    /// A complex metric's type name has no registered serde.
    UnknownComplexType(String),
    /// Row-number conversions were requested from a `TimeAndDimsIterator`
    /// that does not expose per-input origin information.
    UnsupportedIteratorForConversion,
    /// The container or filesystem failed during a write.
    ContainerIo(String),
    /// An external error variant, kept for IO/serde passthrough.
    External(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = result::Result<T, E>;

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::External(Box::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::External(Box::new(e))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::IncompatibleColumnTypes { column, reason } => {
                write!(f, "incompatible column types for `{column}`: {reason}")
            }
            Error::UnknownComplexType(name) => write!(f, "unknown complex type: {name}"),
            Error::UnsupportedIteratorForConversion => write!(
                f,
                "row-number conversions requested from an iterator that does not expose origin info"
            ),
            Error::ContainerIo(msg) => write!(f, "container IO error: {msg}"),
            Error::External(source) => write!(f, "{source}"),
        }
    }
}

impl std::error::Error for Error {}

/// Mirrors `fff-core`'s `general_error!`/`nyi_err!` convenience macros.
#[macro_export]
macro_rules! invalid_input {
    ($msg:expr) => {
        $crate::errors::Error::InvalidInput($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::Error::InvalidInput(format!($fmt, $($arg)*))
    };
}
