//! The asynchronous message channel connecting the two sides.
//!
//! The physical transport is out of scope for this crate; what the RPC layer
//! needs from it is captured by the [`Channel`] trait:
//!
//! - `send`: fire a named message, no reply (fire-and-forget)
//! - `invoke`: send a named message and await exactly one reply
//! - `on` / `handle`: install the receiving-side handlers for the above
//!
//! The channel is assumed reliable and FIFO per named channel, and an
//! `invoke` resolves exactly once. [`MemoryChannel`] provides an in-process
//! implementation with exactly these semantics for tests and examples.

mod memory;

pub use memory::MemoryChannel;

use std::rc::Rc;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use serde_json::Value;

/// Handler for fire-and-forget messages installed via [`Channel::on`].
pub type NotificationHandler = Rc<dyn Fn(Value)>;

/// Handler for request/response messages installed via [`Channel::handle`].
///
/// The returned future produces the single reply payload.
pub type InvokeHandler = Rc<dyn Fn(Value) -> LocalBoxFuture<'static, Value>>;

/// Errors surfaced by the channel itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The opposite side has been torn down.
    ///
    /// Messages to a destroyed side fail loudly rather than silently drop,
    /// so callers discover staleness immediately.
    #[error("target side has been torn down")]
    TargetDestroyed,

    /// No request/response handler is installed for the named channel.
    #[error("no handler installed for channel '{channel}'")]
    NoHandler {
        /// The channel name that had no handler.
        channel: String,
    },

    /// The underlying transport failed to deliver the message.
    #[error("channel transport failure: {message}")]
    Transport {
        /// Details about the transport failure.
        message: String,
    },
}

/// Abstraction over the message-based link between the two sides.
///
/// All handler installation is permanent for the life of the channel; the
/// RPC layer never uninstalls a handler.
#[async_trait(?Send)]
pub trait Channel {
    /// Fire a named message at the opposite side without awaiting a reply.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::TargetDestroyed`] if the opposite side has
    /// been torn down. An unhandled message is not an error; it is dropped.
    fn send(&self, channel: &str, payload: Value) -> Result<(), ChannelError>;

    /// Send a named message and await exactly one reply.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::TargetDestroyed`] if the opposite side has
    /// been torn down, or [`ChannelError::NoHandler`] if nothing is
    /// listening on the named channel.
    async fn invoke(&self, channel: &str, payload: Value) -> Result<Value, ChannelError>;

    /// Install a handler for fire-and-forget messages on the named channel.
    fn on(&self, channel: &str, handler: NotificationHandler);

    /// Install a handler for request/response messages on the named channel.
    fn handle(&self, channel: &str, handler: InvokeHandler);
}
