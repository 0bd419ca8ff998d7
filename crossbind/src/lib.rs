//! Capability binding and identity-preserving RPC between isolated
//! execution contexts.
//!
//! Two sides, each unable to touch the other's memory, talk over an async
//! message [`Channel`]. Each side builds a [`Bridge`] over its end, exposes
//! named APIs with explicit method lists, and binds to APIs the opposite
//! side exposes. Binding tolerates exposure happening later: the binder
//! waits up to a configurable deadline for the name to appear. Values keep
//! their identity across the boundary through stable wire tags and a
//! per-endpoint [`TypeRegistry`], and callee failures cross it only when the
//! callee explicitly relays them.
//!
//! ```
//! use crossbind::{ApiBuilder, Bridge, HandlerError, MemoryChannel, TaggedValue};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rt = tokio::runtime::Builder::new_current_thread()
//!     .enable_time()
//!     .build()?;
//! rt.block_on(async {
//!     let (main_side, worker_side) = MemoryChannel::pair();
//!     let main = Bridge::new(main_side);
//!     let worker = Bridge::new(worker_side);
//!
//!     main.expose(
//!         ApiBuilder::new("Clock")
//!             .method("now", |_args| async { Ok(TaggedValue::plain(1234)) })
//!             .method("set", |_args| async {
//!                 Err::<TaggedValue, _>(HandlerError::relay_message("clock is read-only"))
//!             })
//!             .build()?,
//!     );
//!
//!     let clock = worker.bind("Clock").await?;
//!     let now = clock.call("now", &[]).await?;
//!     assert_eq!(now.as_plain(), Some(&serde_json::json!(1234)));
//!     Ok(())
//! })
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod channel;
pub mod error;

mod bridge;
mod restore;
mod rpc;
mod time;

pub use bridge::{Bridge, BridgeBuilder};
pub use channel::{Channel, ChannelError, InvokeHandler, MemoryChannel, NotificationHandler};
pub use error::{BindError, CallError, ExposeError, NotifyError};
pub use restore::{
    RemoteError, RestorationInfo, Restorable, RestoreError, RestoredValue, TaggedValue,
    TypeRegistry, TypedValue,
};
pub use rpc::{
    ApiBuilder, ApiDefinition, ApiRegistration, BindConfig, BoundApi, DiagnosticSink,
    HandlerError, MethodHandler, Notifier,
};
pub use time::{TimeProvider, TokioTimeProvider};
