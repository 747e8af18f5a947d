use std::{fmt, io};

use mongodb::options::ServerAddress;

use crate::error::mongo::format_cursor_error;

/// Crate-wide `Result` type using [`CursorError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, CursorError>;

/// Server error code reported when a get-more names a cursor the server no longer holds.
pub const CURSOR_NOT_FOUND_CODE: i32 = 43;

/// Server error code for an expired `maxTimeMS`.
pub const MAX_TIME_MS_EXPIRED_CODE: i32 = 50;

/// Top-level error type for cursor operations.
///
/// The variants follow the taxonomy the cursor uses to decide whether the
/// close path may still talk to the server: transport failures poison the
/// connection, timeouts and server errors do not.
#[derive(Debug)]
pub enum CursorError {
    /// The underlying connection failed (I/O error, reset, closed socket).
    Network(NetworkError),

    /// The server answered with a well-formed error document.
    Command(CommandError),

    /// The server no longer knows the cursor named by a get-more.
    CursorNotFound { cursor_id: i64, address: ServerAddress },

    /// The client-side deadline was exhausted.
    Timeout(TimeoutError),

    /// A blocking or awaiting call was interrupted by the caller.
    Cancelled(String),

    /// Operation attempted on a closed cursor.
    Closed(&'static str),

    /// `next` was called after the cursor ran out of batches.
    NoMoreElements,

    /// Invalid argument supplied by the caller.
    InvalidArgument(String),

    /// A reply document did not have the expected cursor shape.
    InvalidReply(String),

    /// Configuration errors.
    Config(ConfigError),

    /// I/O errors outside of a server round trip (config files and the like).
    Io(io::Error),

    /// MongoDB driver errors without a narrower classification.
    MongoDb(mongodb::error::Error),
}

/// Transport-level failure on a connection.
#[derive(Debug, Clone)]
pub struct NetworkError {
    /// Address of the server the connection pointed at, when known.
    pub address: Option<ServerAddress>,

    /// Human readable description.
    pub message: String,
}

/// Error document returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub code: i32,
    pub code_name: String,
    pub message: String,
}

/// Client-side deadline expiry.
#[derive(Debug)]
pub struct TimeoutError {
    pub message: String,

    /// Failure that was in progress when the deadline expired.
    pub cause: Option<Box<CursorError>>,
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

impl CursorError {
    /// Build a network error without address information.
    pub fn network(message: impl Into<String>) -> Self {
        CursorError::Network(NetworkError {
            address: None,
            message: message.into(),
        })
    }

    /// Build a bare timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        CursorError::Timeout(TimeoutError {
            message: message.into(),
            cause: None,
        })
    }

    /// Build a timeout error that was caused by `cause`.
    pub fn timeout_caused_by(message: impl Into<String>, cause: CursorError) -> Self {
        CursorError::Timeout(TimeoutError {
            message: message.into(),
            cause: Some(Box::new(cause)),
        })
    }

    /// Build a server command error.
    pub fn command(code: i32, code_name: impl Into<String>, message: impl Into<String>) -> Self {
        CursorError::Command(CommandError {
            code,
            code_name: code_name.into(),
            message: message.into(),
        })
    }

    /// True when the connection that produced this error must be presumed dead.
    ///
    /// A timeout only counts when its direct cause is itself a network error.
    pub fn is_network_error(&self) -> bool {
        match self {
            CursorError::Network(_) => true,
            CursorError::Timeout(TimeoutError {
                cause: Some(cause), ..
            }) => matches!(cause.as_ref(), CursorError::Network(_)),
            _ => false,
        }
    }

    /// True for client-side deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CursorError::Timeout(_))
    }

    /// True for caller-initiated interruption.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CursorError::Cancelled(_))
    }

    /// Server error code, if the server produced this error.
    pub fn server_code(&self) -> Option<i32> {
        match self {
            CursorError::Command(e) => Some(e.code),
            CursorError::CursorNotFound { .. } => Some(CURSOR_NOT_FOUND_CODE),
            _ => None,
        }
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for CursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorError::Network(e) => write!(f, "Network error: {e}"),
            CursorError::Command(e) => write!(f, "Command failed: {e}"),
            CursorError::CursorNotFound { cursor_id, address } => {
                write!(f, "Cursor {cursor_id} not found on server {address}")
            }
            CursorError::Timeout(e) => write!(f, "Timeout: {e}"),
            CursorError::Cancelled(msg) => write!(f, "Cancelled: {msg}"),
            CursorError::Closed(msg) => write!(f, "{msg}"),
            CursorError::NoMoreElements => write!(f, "No more elements"),
            CursorError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            CursorError::InvalidReply(msg) => write!(f, "Invalid reply: {msg}"),
            CursorError::Config(e) => write!(f, "Configuration error: {e}"),
            CursorError::Io(e) => write!(f, "I/O error: {e}"),
            CursorError::MongoDb(e) => format_cursor_error(f, e),
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(address) => write!(f, "{} ({address})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code_name.is_empty() {
            write!(f, "{} (code {})", self.message, self.code)
        } else {
            write!(f, "{} ({}, code {})", self.message, self.code_name, self.code)
        }
    }
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: caused by {cause}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl std::error::Error for CursorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CursorError::Timeout(TimeoutError {
                cause: Some(cause), ..
            }) => Some(cause.as_ref()),
            CursorError::Io(e) => Some(e),
            CursorError::MongoDb(e) => Some(e),
            _ => None,
        }
    }
}
impl std::error::Error for NetworkError {}
impl std::error::Error for CommandError {}
impl std::error::Error for ConfigError {}

/* ========================= Conversions to CursorError ========================= */

impl From<io::Error> for CursorError {
    fn from(err: io::Error) -> Self {
        CursorError::Io(err)
    }
}

impl From<mongodb::error::Error> for CursorError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        match err.kind.as_ref() {
            ErrorKind::Io(io_err) => CursorError::network(io_err.to_string()),
            ErrorKind::ConnectionPoolCleared { message, .. } => {
                CursorError::network(message.clone())
            }
            ErrorKind::Command(command_error) => CursorError::command(
                command_error.code,
                command_error.code_name.clone(),
                command_error.message.clone(),
            ),
            _ => CursorError::MongoDb(err),
        }
    }
}

impl From<NetworkError> for CursorError {
    fn from(err: NetworkError) -> Self {
        CursorError::Network(err)
    }
}

impl From<CommandError> for CursorError {
    fn from(err: CommandError) -> Self {
        CursorError::Command(err)
    }
}

impl From<ConfigError> for CursorError {
    fn from(err: ConfigError) -> Self {
        CursorError::Config(err)
    }
}

impl From<toml::de::Error> for CursorError {
    fn from(err: toml::de::Error) -> Self {
        CursorError::Config(ConfigError::InvalidFormat(err.to_string()))
    }
}

impl From<bson::document::ValueAccessError> for CursorError {
    fn from(err: bson::document::ValueAccessError) -> Self {
        CursorError::InvalidReply(err.to_string())
    }
}
