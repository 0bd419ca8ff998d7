//! The explicit error-relay boundary.
//!
//! A callee decides, per failure, whether it crosses the boundary. Only
//! [`HandlerError::Relay`] reaches the caller; everything else stays local,
//! goes to the diagnostic sink, and resolves the caller's call with a
//! content-free generic failure. Exposing a failure is an opt-in, never the
//! default.
//!
//! The relay wrapper exists only in the error position of a handler result,
//! so "returning the wrapper instead of throwing it" is unrepresentable
//! here. The one remaining wire-level hole — a success value tagged with the
//! reserved thrown-value sentinel — is rejected at dispatch.

use serde_json::Value;

use crate::restore::{Restorable, RestoreError, TaggedValue};

/// A handler failure, split by whether it may cross the boundary.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Explicitly relay this thrown value to the caller.
    #[error("explicitly relayed application error")]
    Relay(TaggedValue),

    /// An unexpected, process-local failure. Reported to the diagnostic
    /// sink; never delivered to the caller.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    /// Relay a typed error across the boundary.
    ///
    /// If the error itself cannot be serialized for transit, the failure
    /// becomes internal: nothing partial ever crosses.
    pub fn relay<T: Restorable>(error: &T) -> Self {
        match TaggedValue::of(error) {
            Ok(tagged) => HandlerError::Relay(tagged),
            Err(RestoreError::Serialization { message }) => HandlerError::Internal(
                anyhow::anyhow!("failed to serialize relayed error: {message}"),
            ),
            Err(other) => HandlerError::Internal(other.into()),
        }
    }

    /// Relay a generic error carrying only a message.
    pub fn relay_message(message: impl Into<String>) -> Self {
        HandlerError::Relay(TaggedValue::error_message(message))
    }

    /// Relay a bare value (a thrown string, number, or plain object).
    pub fn relay_value(value: impl Into<Value>) -> Self {
        HandlerError::Relay(TaggedValue::plain(value))
    }
}
