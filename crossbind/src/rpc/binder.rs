//! The bind state machine: `Unbound → Pending → Bound` or `Failed`.
//!
//! A bind attempt sends one discovery handshake and then polls the
//! registration mirror on a fixed interval; retries re-check local state,
//! never re-send discovery. The deadline is read freshly on every iteration,
//! so changing the configured timeout affects attempts already in flight.
//! Concurrent binds to the same name share one discovery and converge on one
//! proxy: the pending set keys in-flight attempts, and late callers join the
//! poll loop without sending anything.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use crate::channel::Channel;
use crate::error::BindError;
use crate::restore::TypeRegistry;
use crate::rpc::handshake::{self, HandshakeState};
use crate::rpc::proxy::BoundApi;
use crate::time::TimeProvider;

/// Binder configuration.
///
/// `bind_timeout` is deliberately mutable through the owning bridge at any
/// time, including while binds are pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindConfig {
    /// How long a bind attempt waits for the opposite side to register the
    /// requested API before failing.
    pub bind_timeout: Duration,

    /// Interval between polls of the registration mirror.
    pub poll_interval: Duration,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            bind_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl BindConfig {
    /// Set the bind timeout.
    pub fn with_bind_timeout(mut self, bind_timeout: Duration) -> Self {
        self.bind_timeout = bind_timeout;
        self
    }

    /// Set the mirror poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Borrowed view of the bridge state a bind attempt works against.
pub(crate) struct BindContext<'a, C: Channel + 'static, T: TimeProvider> {
    pub(crate) channel: &'a Rc<C>,
    pub(crate) time: &'a T,
    pub(crate) handshake: &'a Rc<HandshakeState>,
    pub(crate) bound: &'a RefCell<HashMap<String, Rc<BoundApi<C>>>>,
    pub(crate) pending: &'a RefCell<HashSet<String>>,
    pub(crate) config: &'a RefCell<BindConfig>,
    pub(crate) recovery: &'a Rc<TypeRegistry>,
}

/// Resolve a proxy for the named remote API, waiting if necessary.
pub(crate) async fn bind_api<C: Channel + 'static, T: TimeProvider>(
    ctx: BindContext<'_, C, T>,
    name: &str,
) -> Result<Rc<BoundApi<C>>, BindError> {
    // Bound: terminal success state, cached for the life of the bridge.
    if let Some(existing) = ctx.bound.borrow().get(name) {
        return Ok(existing.clone());
    }

    // Unbound → Pending. Only the first concurrent caller sends discovery.
    let first_attempt = ctx.pending.borrow_mut().insert(name.to_string());
    if first_attempt {
        if let Err(e) = handshake::discover(ctx.channel, name) {
            ctx.pending.borrow_mut().remove(name);
            return Err(e.into());
        }
        tracing::debug!(api = %name, "bind pending");
    } else {
        tracing::debug!(api = %name, "joining in-flight bind");
    }

    let started = ctx.time.now();
    loop {
        if let Some(existing) = ctx.bound.borrow().get(name) {
            ctx.pending.borrow_mut().remove(name);
            return Ok(existing.clone());
        }

        let registration = ctx.handshake.remote.borrow().get(name).cloned();
        if let Some(registration) = registration {
            // Pending → Bound. The entry guard keeps concurrent waiters on
            // a single proxy instance.
            let proxy = ctx
                .bound
                .borrow_mut()
                .entry(name.to_string())
                .or_insert_with(|| {
                    Rc::new(BoundApi::new(
                        registration,
                        ctx.channel.clone(),
                        ctx.recovery.clone(),
                    ))
                })
                .clone();
            ctx.pending.borrow_mut().remove(name);
            tracing::debug!(api = %name, "bound");
            return Ok(proxy);
        }

        // Read the deadline freshly: mid-flight timeout changes apply.
        let (timeout, poll_interval) = {
            let config = ctx.config.borrow();
            (config.bind_timeout, config.poll_interval)
        };
        let waited = ctx.time.now().saturating_sub(started);
        if waited >= timeout {
            // Pending → Failed.
            ctx.pending.borrow_mut().remove(name);
            tracing::warn!(api = %name, ?waited, "bind timed out");
            return Err(BindError::Timeout {
                api: name.to_string(),
                waited,
            });
        }

        ctx.time.sleep(poll_interval).await;
    }
}
