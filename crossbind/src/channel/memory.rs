//! In-process channel pair for tests and examples.
//!
//! `MemoryChannel::pair()` produces the two ends of a link whose delivery is
//! synchronous and therefore trivially FIFO per named channel. Dispatch
//! releases all internal borrows before invoking a handler, so a handler may
//! send on the same channel reentrantly (the handshake responder does).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Channel, ChannelError, InvokeHandler, NotificationHandler};

/// Per-side handler tables and liveness flag.
struct SideState {
    notifications: HashMap<String, NotificationHandler>,
    invocations: HashMap<String, InvokeHandler>,
    destroyed: bool,
    /// Messages sent from this side, per channel name. For introspection.
    sent: HashMap<String, u64>,
}

impl SideState {
    fn new() -> Self {
        Self {
            notifications: HashMap::new(),
            invocations: HashMap::new(),
            destroyed: false,
            sent: HashMap::new(),
        }
    }
}

/// One end of an in-process channel pair.
///
/// Single-threaded: handlers run on the caller's task, in send order.
#[derive(Clone)]
pub struct MemoryChannel {
    local: Rc<RefCell<SideState>>,
    peer: Rc<RefCell<SideState>>,
}

impl MemoryChannel {
    /// Create a connected pair of channel ends.
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let a = Rc::new(RefCell::new(SideState::new()));
        let b = Rc::new(RefCell::new(SideState::new()));
        (
            MemoryChannel {
                local: a.clone(),
                peer: b.clone(),
            },
            MemoryChannel { local: b, peer: a },
        )
    }

    /// Tear down this side. Subsequent sends and invokes *toward* this side
    /// fail with [`ChannelError::TargetDestroyed`].
    pub fn close(&self) {
        self.local.borrow_mut().destroyed = true;
    }

    /// Number of handlers (both kinds) installed on this side.
    pub fn handler_count(&self) -> usize {
        let side = self.local.borrow();
        side.notifications.len() + side.invocations.len()
    }

    /// How many messages this side has sent on the named channel.
    pub fn sent_count(&self, channel: &str) -> u64 {
        self.local.borrow().sent.get(channel).copied().unwrap_or(0)
    }

    fn record_send(&self, channel: &str) {
        *self
            .local
            .borrow_mut()
            .sent
            .entry(channel.to_string())
            .or_insert(0) += 1;
    }
}

#[async_trait(?Send)]
impl Channel for MemoryChannel {
    fn send(&self, channel: &str, payload: Value) -> Result<(), ChannelError> {
        if self.peer.borrow().destroyed {
            return Err(ChannelError::TargetDestroyed);
        }
        self.record_send(channel);

        // Clone the handler out so no borrow is held while it runs.
        let handler = self.peer.borrow().notifications.get(channel).cloned();
        match handler {
            Some(handler) => handler(payload),
            None => {
                tracing::debug!(channel, "dropping unhandled notification");
            }
        }
        Ok(())
    }

    async fn invoke(&self, channel: &str, payload: Value) -> Result<Value, ChannelError> {
        if self.peer.borrow().destroyed {
            return Err(ChannelError::TargetDestroyed);
        }
        self.record_send(channel);

        let handler = self.peer.borrow().invocations.get(channel).cloned();
        let handler = handler.ok_or_else(|| ChannelError::NoHandler {
            channel: channel.to_string(),
        })?;
        Ok(handler(payload).await)
    }

    fn on(&self, channel: &str, handler: NotificationHandler) {
        self.local
            .borrow_mut()
            .notifications
            .insert(channel.to_string(), handler);
    }

    fn handle(&self, channel: &str, handler: InvokeHandler) {
        self.local
            .borrow_mut()
            .invocations
            .insert(channel.to_string(), handler);
    }
}
