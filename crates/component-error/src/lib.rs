// Defines a small set of standard error codes, loosely modeled on the gRPC
// status codes (https://grpc.github.io/grpc/core/md_doc_statuscodes.html).
// Framework- and application-level errors can report one of these codes so
// callers can handle failures generically without matching on every error type.
use std::error::Error;

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum ErrorCodes {
    Success = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
}

impl ErrorCodes {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCodes::InvalidArgument => "InvalidArgumentError",
            ErrorCodes::NotFound => "NotFoundError",
            ErrorCodes::Internal => "InternalError",
            ErrorCodes::FailedPrecondition => "InvalidStateError",
            _ => "ComponentError",
        }
    }
}

/// Common error trait implemented by every error type the runtime surfaces.
///
/// Mirrors the "error taxonomy" in the framework's error handling design:
/// misuse errors surface synchronously to the caller with `FailedPrecondition`,
/// handler failures are routed through the event system instead of being
/// returned here.
pub trait RuntimeError: Error + Send + Sync {
    fn code(&self) -> ErrorCodes;
    fn boxed(self) -> Box<dyn RuntimeError>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
    /// Whether this error is interesting enough to be logged at error level
    /// wherever the runtime catches it incidentally (e.g. a dropped reply
    /// channel). Defaults to true.
    fn should_trace_error(&self) -> bool {
        true
    }
}

impl Error for Box<dyn RuntimeError> {}

impl RuntimeError for Box<dyn RuntimeError> {
    fn code(&self) -> ErrorCodes {
        self.as_ref().code()
    }

    fn should_trace_error(&self) -> bool {
        self.as_ref().should_trace_error()
    }
}

impl RuntimeError for std::io::Error {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Unknown
    }
}

/// Wraps a caught `std::panic::catch_unwind` payload so a handler panic can
/// be reported through the same `RuntimeError` surface as any other error,
/// rather than as a distinct ad-hoc type.
pub struct PanicError(Box<dyn std::any::Any + Send>);

impl PanicError {
    pub fn new(payload: Box<dyn std::any::Any + Send>) -> Self {
        PanicError(payload)
    }

    pub fn message(&self) -> String {
        get_panic_message(&self.0).unwrap_or_else(|| "panic has no displayable message".to_string())
    }
}

impl std::fmt::Display for PanicError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "panic: {}", self.message())
    }
}

impl std::fmt::Debug for PanicError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PanicError({})", self.message())
    }
}

impl Error for PanicError {}

fn get_panic_message(value: &Box<dyn std::any::Any + Send>) -> Option<String> {
    if let Some(s) = value.downcast_ref::<&str>() {
        Some(s.to_string())
    } else if let Some(s) = value.downcast_ref::<String>() {
        Some(s.clone())
    } else {
        None
    }
}
