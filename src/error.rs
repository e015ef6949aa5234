//! Error types and result codes for audiopipe

/// Result type alias for audiopipe operations
pub type Result<T> = std::result::Result<T, AudioError>;

/// Base of the signed result-code space. Every error code is negative and
/// lies just above this value.
pub const ERROR_BASE: i32 = -900;

/// Stream and service errors.
///
/// Each variant maps to a stable negative code (see [`AudioError::code`]) so
/// that results can cross the process boundary as plain integers.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// Device or peer is gone
    #[error("Disconnected: {message}")]
    Disconnected { message: String },

    /// Argument is malformed (empty, inconsistent)
    #[error("Illegal argument: {parameter} - {message}")]
    IllegalArgument { parameter: String, message: String },

    /// Protocol violation or unexpected internal condition
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Operation is not legal in the current stream state
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState { operation: String, state: String },

    /// Unknown or stale stream handle
    #[error("Invalid handle: {handle}")]
    InvalidHandle { handle: i32 },

    /// Operation is not supported for this stream
    #[error("Unimplemented: {operation}")]
    Unimplemented { operation: String },

    /// Requested resource is temporarily unavailable
    #[error("Unavailable: {message}")]
    Unavailable { message: String },

    /// Every positive handle value is in use
    #[error("No free handles")]
    NoFreeHandles,

    /// Memory or shared region allocation failed
    #[error("Out of memory: {message}")]
    NoMemory {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Blocking call exceeded its deadline
    #[error("Timed out after {nanos} ns")]
    Timeout { nanos: i64 },

    /// Non-blocking call could not complete immediately
    #[error("Would block: {resource}")]
    WouldBlock { resource: String },

    /// Sample format does not match the endpoint
    #[error("Invalid format: requested {requested}, endpoint uses {actual}")]
    InvalidFormat { requested: String, actual: String },

    /// Parameter outside its allowed bounds
    #[error("Out of range: {parameter} = {value}, allowed {min}..={max}")]
    OutOfRange {
        parameter: String,
        value: i64,
        min: i64,
        max: i64,
    },

    /// The audio service could not be reached
    #[error("No service: {message}")]
    NoService {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Sample rate does not match the endpoint
    #[error("Invalid rate: requested {requested}, endpoint uses {actual}")]
    InvalidRate { requested: i32, actual: i32 },
}

impl AudioError {
    /// Create a disconnected error
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::Disconnected {
            message: message.into(),
        }
    }

    /// Create an illegal argument error
    pub fn illegal_argument(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IllegalArgument {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Create an invalid handle error
    pub fn invalid_handle(handle: i32) -> Self {
        Self::InvalidHandle { handle }
    }

    /// Create an unimplemented error
    pub fn unimplemented(operation: impl Into<String>) -> Self {
        Self::Unimplemented {
            operation: operation.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create an out of memory error
    pub fn no_memory(message: impl Into<String>) -> Self {
        Self::NoMemory {
            message: message.into(),
            source: None,
        }
    }

    /// Create an out of memory error from an I/O failure
    pub fn no_memory_io(source: std::io::Error, context: &str) -> Self {
        Self::NoMemory {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create a timeout error
    pub fn timeout(nanos: i64) -> Self {
        Self::Timeout { nanos }
    }

    /// Create a would-block error
    pub fn would_block(resource: impl Into<String>) -> Self {
        Self::WouldBlock {
            resource: resource.into(),
        }
    }

    /// Create an invalid format error
    pub fn invalid_format(requested: impl std::fmt::Display, actual: impl std::fmt::Display) -> Self {
        Self::InvalidFormat {
            requested: requested.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create an out of range error
    pub fn out_of_range(parameter: impl Into<String>, value: i64, min: i64, max: i64) -> Self {
        Self::OutOfRange {
            parameter: parameter.into(),
            value,
            min,
            max,
        }
    }

    /// Create a no service error
    pub fn no_service(message: impl Into<String>) -> Self {
        Self::NoService {
            message: message.into(),
            source: None,
        }
    }

    /// Create a no service error from a transport failure
    pub fn no_service_io(source: std::io::Error, context: &str) -> Self {
        Self::NoService {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an invalid rate error
    pub fn invalid_rate(requested: i32, actual: i32) -> Self {
        Self::InvalidRate { requested, actual }
    }

    /// Signed result code for this error. Always negative.
    pub fn code(&self) -> i32 {
        match self {
            Self::Disconnected { .. } => ERROR_BASE + 1,
            Self::IllegalArgument { .. } => ERROR_BASE + 2,
            Self::Internal { .. } => ERROR_BASE + 4,
            Self::InvalidState { .. } => ERROR_BASE + 5,
            Self::InvalidHandle { .. } => ERROR_BASE + 8,
            Self::Unimplemented { .. } => ERROR_BASE + 10,
            Self::Unavailable { .. } => ERROR_BASE + 11,
            Self::NoFreeHandles => ERROR_BASE + 12,
            Self::NoMemory { .. } => ERROR_BASE + 13,
            Self::Timeout { .. } => ERROR_BASE + 15,
            Self::WouldBlock { .. } => ERROR_BASE + 16,
            Self::InvalidFormat { .. } => ERROR_BASE + 17,
            Self::OutOfRange { .. } => ERROR_BASE + 18,
            Self::NoService { .. } => ERROR_BASE + 19,
            Self::InvalidRate { .. } => ERROR_BASE + 20,
        }
    }

    /// Rebuild an error from its signed code, e.g. after it crossed the
    /// transport. Detail fields are replaced by `detail`.
    pub fn from_code(code: i32, detail: &str) -> Self {
        match code - ERROR_BASE {
            1 => Self::disconnected(detail),
            2 => Self::illegal_argument("remote", detail),
            5 => Self::invalid_state(detail, "remote"),
            8 => Self::invalid_handle(detail.parse().unwrap_or(0)),
            10 => Self::unimplemented(detail),
            11 => Self::unavailable(detail),
            12 => Self::NoFreeHandles,
            13 => Self::no_memory(detail),
            15 => Self::timeout(0),
            16 => Self::would_block(detail),
            17 => Self::invalid_format(detail, "remote"),
            18 => Self::out_of_range(detail, 0, 0, 0),
            19 => Self::no_service(detail),
            20 => Self::invalid_rate(0, 0),
            _ => Self::internal(detail),
        }
    }

    /// True when the error means the stream can no longer be used
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::NoService { .. })
    }
}

/// Collapse a frame-count result into the signed convention: non-negative
/// values are frame counts, negative values are error codes.
pub fn as_result_code(result: &Result<usize>) -> i32 {
    match result {
        Ok(frames) => i32::try_from(*frames).unwrap_or(i32::MAX),
        Err(err) => err.code(),
    }
}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        Self::no_service_io(err, "I/O operation failed")
    }
}

impl From<nix::Error> for AudioError {
    fn from(err: nix::Error) -> Self {
        Self::from(std::io::Error::from(err))
    }
}

impl From<bincode::Error> for AudioError {
    fn from(err: bincode::Error) -> Self {
        Self::internal(format!("Bincode error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = AudioError::invalid_state("start", "STARTED");
        assert!(matches!(err, AudioError::InvalidState { .. }));

        let err = AudioError::out_of_range("frames_per_burst", 8, 16, 16384);
        assert!(matches!(err, AudioError::OutOfRange { .. }));
    }

    #[test]
    fn test_codes_are_negative_and_distinct() {
        let errors = vec![
            AudioError::disconnected("x"),
            AudioError::illegal_argument("p", "x"),
            AudioError::internal("x"),
            AudioError::invalid_state("op", "OPEN"),
            AudioError::invalid_handle(3),
            AudioError::unimplemented("pause"),
            AudioError::unavailable("x"),
            AudioError::NoFreeHandles,
            AudioError::no_memory("x"),
            AudioError::timeout(5),
            AudioError::would_block("queue"),
            AudioError::invalid_format("i16", "f32"),
            AudioError::out_of_range("x", 1, 2, 3),
            AudioError::no_service("x"),
            AudioError::invalid_rate(44100, 48000),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        assert!(codes.iter().all(|&c| c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_code_round_trip_keeps_kind() {
        let err = AudioError::invalid_handle(42);
        let back = AudioError::from_code(err.code(), "42");
        assert!(matches!(back, AudioError::InvalidHandle { handle: 42 }));
        assert_eq!(AudioError::from_code(AudioError::timeout(1).code(), "").code(), -885);
    }

    #[test]
    fn test_result_code_convention() {
        assert_eq!(as_result_code(&Ok(192)), 192);
        assert_eq!(as_result_code(&Err(AudioError::would_block("fifo"))), -884);
    }

    #[test]
    fn test_error_display() {
        let err = AudioError::invalid_rate(44100, 48000);
        let display = format!("{}", err);
        assert!(display.contains("Invalid rate"));
        assert!(display.contains("44100"));
    }
}
