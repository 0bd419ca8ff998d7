//! Caller-side proxies: [`BoundApi`] for request/response calls and
//! [`Notifier`] for one-way pushes.

use std::rc::Rc;

use crate::channel::{Channel, ChannelError};
use crate::error::{CallError, NotifyError};
use crate::restore::{pack_args, restore, RestoredValue, TaggedValue, TypeRegistry};
use crate::rpc::registry::{method_channel, ApiRegistration};
use crate::rpc::ReplyWire;

/// A bound remote API: one locally-callable proxy per discovered method.
///
/// Owned by the bridge's bound cache and handed out as `Rc`; repeated binds
/// to the same name return the identical instance for the life of the
/// bridge.
pub struct BoundApi<C: Channel> {
    registration: ApiRegistration,
    channel: Rc<C>,
    recovery: Rc<TypeRegistry>,
}

impl<C: Channel + 'static> BoundApi<C> {
    pub(crate) fn new(
        registration: ApiRegistration,
        channel: Rc<C>,
        recovery: Rc<TypeRegistry>,
    ) -> Self {
        Self {
            registration,
            channel,
            recovery,
        }
    }

    /// The remote API's name.
    pub fn name(&self) -> &str {
        &self.registration.name
    }

    /// The discovered method names, in registration order.
    pub fn methods(&self) -> &[String] {
        &self.registration.method_names
    }

    /// Whether the named method is part of this API's surface.
    pub fn has_method(&self, method: &str) -> bool {
        self.registration.method_names.iter().any(|m| m == method)
    }

    /// Invoke a remote method.
    ///
    /// Marshals the argument list with restoration metadata, performs exactly
    /// one channel round trip, and restores the resulting value. A reply
    /// tagged as a relayed throw surfaces as [`CallError::Relayed`].
    ///
    /// Calls are independent round trips; two calls issued back to back are
    /// not guaranteed to resolve in issue order.
    pub async fn call(
        &self,
        method: &str,
        args: &[TaggedValue],
    ) -> Result<RestoredValue, CallError> {
        if !self.has_method(method) {
            return Err(CallError::UnknownMethod {
                api: self.registration.name.clone(),
                method: method.to_string(),
            });
        }

        let payload = pack_args(args)?;
        let raw = self
            .channel
            .invoke(&method_channel(&self.registration.name, method), payload)
            .await
            .map_err(|e| match e {
                ChannelError::TargetDestroyed => CallError::TargetDestroyed,
                other => CallError::Channel(other),
            })?;

        match ReplyWire::decode(raw).map_err(|message| CallError::MalformedReply { message })? {
            ReplyWire::Success { value, info } => {
                Ok(restore(value, info.as_ref(), Some(&self.recovery)))
            }
            ReplyWire::Thrown { value, info } => Err(CallError::Relayed(restore(
                value,
                info.as_ref(),
                Some(&self.recovery),
            ))),
            ReplyWire::Internal => Err(CallError::RemoteInternal),
        }
    }
}

impl<C: Channel> std::fmt::Debug for BoundApi<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundApi")
            .field("name", &self.registration.name)
            .field("methods", &self.registration.method_names)
            .finish()
    }
}

/// One-way proxy pushing un-replied notifications at the opposite side.
///
/// Identical marshaling to [`BoundApi::call`], but no reply is awaited and
/// no error can come back. After the receiving side is torn down, every
/// notification fails immediately with [`NotifyError::TargetDestroyed`]
/// rather than silently dropping.
pub struct Notifier<C: Channel> {
    target: String,
    channel: Rc<C>,
}

impl<C: Channel> Notifier<C> {
    pub(crate) fn new(target: String, channel: Rc<C>) -> Self {
        Self { target, channel }
    }

    /// The target name notifications are addressed to.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Push one notification.
    pub fn notify(&self, event: &str, args: &[TaggedValue]) -> Result<(), NotifyError> {
        let payload = pack_args(args)?;
        self.channel
            .send(&method_channel(&self.target, event), payload)
            .map_err(|e| match e {
                ChannelError::TargetDestroyed => NotifyError::TargetDestroyed,
                other => NotifyError::Channel(other),
            })
    }
}

impl<C: Channel> std::fmt::Debug for Notifier<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("target", &self.target)
            .finish()
    }
}
