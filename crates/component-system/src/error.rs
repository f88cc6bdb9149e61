//! Misuse errors (§7: "invalid-state"), surfaced synchronously to the
//! caller rather than routed through the event system.

use component_error::{ErrorCodes, RuntimeError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("component is already attached to a parent")]
    AlreadyAttached,
    #[error("cannot attach a subtree that has already been started")]
    SubtreeStarted,
    #[error("component is not a child of the given parent")]
    NotAChild,
    #[error("component has no parent to detach from")]
    NoParent,
}

impl RuntimeError for TreeError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::FailedPrecondition
    }
}
