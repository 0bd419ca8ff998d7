//! Discovery handshake: "what methods does API X have?"
//!
//! The side wanting to bind sends the API name on the discovery channel,
//! exactly once per bind attempt. Any side holding a registry entry for that
//! name answers on the registration channel. Because the opposite side may
//! expose the API only later, an unanswerable discovery is remembered in the
//! wanted set and answered at exposure time: registration can appear
//! asynchronously, at an unknown later time, and the binder tolerates that
//! by polling its mirror rather than re-sending discovery.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde_json::Value;

use crate::channel::Channel;
use crate::rpc::registry::{ApiRegistration, Registry};

/// Fire-and-forget channel carrying discovery requests (payload: API name).
pub(crate) const DISCOVER_CHANNEL: &str = "crossbind.discover";

/// Fire-and-forget channel carrying discovery answers (payload:
/// [`ApiRegistration`]).
pub(crate) const REGISTRATION_CHANNEL: &str = "crossbind.registration";

/// Handshake state of one side: what the opposite side has told us, and what
/// it has asked us for that we could not answer yet.
#[derive(Default)]
pub(crate) struct HandshakeState {
    /// Mirror of the opposite side's registrations, filled by answers.
    pub(crate) remote: RefCell<HashMap<String, ApiRegistration>>,

    /// Discovery requests seen before the named API was exposed here.
    pub(crate) wanted: RefCell<HashSet<String>>,
}

impl HandshakeState {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// Install both handshake handlers on this side's channel.
///
/// Permanent for the life of the channel, installed once per bridge.
pub(crate) fn install<C: Channel + 'static>(
    channel: &Rc<C>,
    registry: Rc<RefCell<Registry>>,
    state: Rc<HandshakeState>,
) {
    let responder_channel = channel.clone();
    let responder_state = state.clone();
    channel.on(
        DISCOVER_CHANNEL,
        Rc::new(move |payload| {
            let Value::String(name) = payload else {
                tracing::warn!(?payload, "ignoring malformed discovery request");
                return;
            };
            let registration = registry.borrow().get(&name).cloned();
            match registration {
                Some(registration) => {
                    tracing::debug!(api = %name, "answering discovery");
                    announce(&responder_channel, &registration);
                }
                None => {
                    tracing::debug!(api = %name, "discovery for unexposed api, remembering");
                    responder_state.wanted.borrow_mut().insert(name);
                }
            }
        }),
    );

    channel.on(
        REGISTRATION_CHANNEL,
        Rc::new(move |payload| {
            match serde_json::from_value::<ApiRegistration>(payload) {
                Ok(registration) => {
                    tracing::debug!(api = %registration.name, "received registration");
                    state
                        .remote
                        .borrow_mut()
                        .insert(registration.name.clone(), registration);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed registration answer");
                }
            }
        }),
    );
}

/// Send a registration answer to the opposite side.
///
/// Best-effort: a torn-down peer just means nobody is waiting anymore.
pub(crate) fn announce<C: Channel>(channel: &Rc<C>, registration: &ApiRegistration) {
    match serde_json::to_value(registration) {
        Ok(payload) => {
            if let Err(e) = channel.send(REGISTRATION_CHANNEL, payload) {
                tracing::warn!(api = %registration.name, error = %e, "failed to announce registration");
            }
        }
        Err(e) => {
            tracing::error!(api = %registration.name, error = %e, "failed to serialize registration");
        }
    }
}

/// Send one discovery request for the named API.
pub(crate) fn discover<C: Channel>(
    channel: &Rc<C>,
    name: &str,
) -> Result<(), crate::channel::ChannelError> {
    tracing::debug!(api = %name, "sending discovery");
    channel.send(DISCOVER_CHANNEL, Value::String(name.to_string()))
}
