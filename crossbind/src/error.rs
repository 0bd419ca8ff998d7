//! Error types for expose, bind, call and notify operations.

use std::time::Duration;

use crate::channel::ChannelError;
use crate::restore::{RestoreError, RestoredValue};

/// Errors raised while registering an API for exposure.
///
/// Malformed registrations fail here, at registration time; nothing is
/// silently skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExposeError {
    /// The API name is empty or contains the `:` channel separator.
    #[error("invalid api name '{name}': must be non-empty and contain no ':'")]
    InvalidName {
        /// The offending API name.
        name: String,
    },

    /// A method name is empty or contains the `:` channel separator.
    #[error("invalid method name '{method}' on api '{api}'")]
    InvalidMethod {
        /// The API being built.
        api: String,
        /// The offending method name.
        method: String,
    },

    /// The same method name was added twice.
    #[error("duplicate method '{method}' on api '{api}'")]
    DuplicateMethod {
        /// The API being built.
        api: String,
        /// The duplicated method name.
        method: String,
    },

    /// The API declares no methods at all.
    #[error("api '{api}' has no methods")]
    NoMethods {
        /// The API being built.
        api: String,
    },
}

/// Errors raised while binding to a remote API.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// The opposite side never registered the requested API within the
    /// deadline.
    #[error("binding to api '{api}' timed out after {waited:?}")]
    Timeout {
        /// The API name that was never registered.
        api: String,
        /// How long the binder waited before giving up.
        waited: Duration,
    },

    /// The discovery message could not be sent.
    #[error("channel error during bind: {0}")]
    Channel(#[from] ChannelError),
}

/// Errors raised by a proxy method call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The method is not part of the bound API's surface.
    #[error("unknown method '{method}' on api '{api}'")]
    UnknownMethod {
        /// The bound API name.
        api: String,
        /// The method that does not exist.
        method: String,
    },

    /// The opposite side has been torn down.
    #[error("target side has been torn down")]
    TargetDestroyed,

    /// The argument list could not be marshaled.
    #[error("failed to encode call payload: {0}")]
    Encode(#[from] RestoreError),

    /// The channel failed to deliver the call.
    #[error("channel error: {0}")]
    Channel(ChannelError),

    /// The reply payload did not match any known reply shape.
    #[error("malformed reply: {message}")]
    MalformedReply {
        /// Details about the malformed reply.
        message: String,
    },

    /// The callee explicitly relayed a thrown value across the boundary.
    #[error("call raised on the remote side: {0}")]
    Relayed(RestoredValue),

    /// The callee failed with an error it did not relay. The content stays
    /// on the remote side; only this generic resolution crosses.
    #[error("remote side failed internally")]
    RemoteInternal,
}

/// Errors raised by a one-way notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The target side has been torn down. Raised immediately, never
    /// deferred or silently dropped.
    #[error("notification target has been torn down")]
    TargetDestroyed,

    /// The argument list could not be marshaled.
    #[error("failed to encode notification payload: {0}")]
    Encode(#[from] RestoreError),

    /// The channel failed to deliver the notification.
    #[error("channel error: {0}")]
    Channel(ChannelError),
}
