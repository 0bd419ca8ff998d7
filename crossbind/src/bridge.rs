//! One side's entry point: expose local APIs, bind remote ones.
//!
//! A [`Bridge`] owns everything one endpoint needs over a single channel:
//! the registry of exposed APIs, the handshake state, the bound-proxy cache
//! and the binder configuration. Two bridges over the two halves of a
//! channel pair form a complete bidirectional link. State is scoped to the
//! bridge instance; building a second bridge over another channel shares
//! nothing with the first.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use crate::channel::Channel;
use crate::error::BindError;
use crate::restore::{restore_args, unpack_args, RestoredValue, TypeRegistry};
use crate::rpc::binder::{self, BindConfig, BindContext};
use crate::rpc::dispatch::{self, DiagnosticSink, SharedSink};
use crate::rpc::handshake::{self, HandshakeState};
use crate::rpc::proxy::{BoundApi, Notifier};
use crate::rpc::registry::{method_channel, ApiDefinition, Registry};
use crate::time::{TimeProvider, TokioTimeProvider};

struct Shared<C: Channel + 'static, T: TimeProvider> {
    channel: Rc<C>,
    time: T,
    registry: Rc<RefCell<Registry>>,
    handshake: Rc<HandshakeState>,
    bound: RefCell<HashMap<String, Rc<BoundApi<C>>>>,
    pending: RefCell<HashSet<String>>,
    config: RefCell<BindConfig>,
    recovery: Rc<TypeRegistry>,
    sink: SharedSink,
}

/// One side of a capability-binding link.
///
/// Cheap to clone; clones share all state.
pub struct Bridge<C: Channel + 'static, T: TimeProvider = TokioTimeProvider> {
    inner: Rc<Shared<C, T>>,
}

impl<C: Channel + 'static, T: TimeProvider> Clone for Bridge<C, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Channel + 'static> Bridge<C, TokioTimeProvider> {
    /// Build a bridge over the given channel with default configuration.
    pub fn new(channel: C) -> Self {
        Self::builder(channel).build()
    }

    /// Start building a bridge over the given channel.
    pub fn builder(channel: C) -> BridgeBuilder<C, TokioTimeProvider> {
        BridgeBuilder {
            channel,
            time: TokioTimeProvider::new(),
            config: BindConfig::default(),
            recovery: TypeRegistry::new(),
            sink: None,
        }
    }
}

impl<C: Channel + 'static, T: TimeProvider> Bridge<C, T> {
    /// Expose a local API to the opposite side.
    ///
    /// Installs one channel handler per method and answers any discovery
    /// request that arrived before exposure. Exposing a name that is already
    /// exposed is an idempotent no-op: the original definition stays in
    /// force and no handlers are reinstalled.
    pub fn expose(&self, api: ApiDefinition) {
        let registration = api.registration();
        if !self.inner.registry.borrow_mut().register(registration.clone()) {
            tracing::debug!(api = %api.name(), "already exposed, ignoring");
            return;
        }

        for (method, handler) in &api.methods {
            dispatch::install_method(
                &self.inner.channel,
                &registration.name,
                method,
                handler.clone(),
                self.inner.recovery.clone(),
                self.inner.sink.clone(),
            );
        }
        tracing::debug!(api = %registration.name, methods = registration.method_names.len(), "exposed");

        // A discovery request may have raced ahead of exposure; answer it now.
        if self
            .inner
            .handshake
            .wanted
            .borrow_mut()
            .remove(&registration.name)
        {
            handshake::announce(&self.inner.channel, &registration);
        }
    }

    /// Whether the named API has been exposed on this side.
    pub fn is_exposed(&self, name: &str) -> bool {
        self.inner.registry.borrow().contains(name)
    }

    /// Bind to an API exposed (now or later) by the opposite side.
    ///
    /// Waits up to the configured bind timeout for the opposite side to
    /// expose the name. Rebinding a bound name returns the cached proxy
    /// without any channel traffic; concurrent binds to the same name share
    /// one handshake and resolve to the same proxy instance.
    pub async fn bind(&self, name: &str) -> Result<Rc<BoundApi<C>>, BindError> {
        binder::bind_api(
            BindContext {
                channel: &self.inner.channel,
                time: &self.inner.time,
                handshake: &self.inner.handshake,
                bound: &self.inner.bound,
                pending: &self.inner.pending,
                config: &self.inner.config,
                recovery: &self.inner.recovery,
            },
            name,
        )
        .await
    }

    /// The current bind timeout.
    pub fn bind_timeout(&self) -> Duration {
        self.inner.config.borrow().bind_timeout
    }

    /// Change the bind timeout.
    ///
    /// Applies to future bind attempts and to attempts already waiting.
    pub fn set_bind_timeout(&self, bind_timeout: Duration) {
        self.inner.config.borrow_mut().bind_timeout = bind_timeout;
    }

    /// Replace the diagnostic sink receiving unrelayed handler failures.
    pub fn set_diagnostic_sink(&self, sink: impl Fn(&anyhow::Error) + 'static) {
        *self.inner.sink.borrow_mut() = Some(Rc::new(sink) as DiagnosticSink);
    }

    /// A one-way notifier addressing the named target on the opposite side.
    pub fn notifier(&self, target: impl Into<String>) -> Notifier<C> {
        Notifier::new(target.into(), self.inner.channel.clone())
    }

    /// Subscribe to one-way notifications addressed at the named target.
    ///
    /// Arguments are restored the same way call arguments are. Subscription
    /// is permanent for the life of the channel.
    pub fn subscribe(
        &self,
        target: &str,
        event: &str,
        callback: impl Fn(Vec<RestoredValue>) + 'static,
    ) {
        let recovery = self.inner.recovery.clone();
        let name = method_channel(target, event);
        self.inner.channel.on(
            &name,
            Rc::new(move |payload| match unpack_args(payload) {
                Ok((values, infos)) => callback(restore_args(values, &infos, Some(&recovery))),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed notification");
                }
            }),
        );
    }
}

impl<C: Channel + 'static, T: TimeProvider> std::fmt::Debug for Bridge<C, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("exposed", &self.inner.registry.borrow().len())
            .field("bound", &self.inner.bound.borrow().len())
            .finish()
    }
}

/// Builder for [`Bridge`].
pub struct BridgeBuilder<C: Channel + 'static, T: TimeProvider> {
    channel: C,
    time: T,
    config: BindConfig,
    recovery: TypeRegistry,
    sink: Option<DiagnosticSink>,
}

impl<C: Channel + 'static, T: TimeProvider> BridgeBuilder<C, T> {
    /// Replace the time provider used by bind waits.
    pub fn with_time_provider<U: TimeProvider>(self, time: U) -> BridgeBuilder<C, U> {
        BridgeBuilder {
            channel: self.channel,
            time,
            config: self.config,
            recovery: self.recovery,
            sink: self.sink,
        }
    }

    /// Replace the binder configuration.
    pub fn with_config(mut self, config: BindConfig) -> Self {
        self.config = config;
        self
    }

    /// Install the recovery registry used to rebuild typed values.
    pub fn with_recovery(mut self, recovery: TypeRegistry) -> Self {
        self.recovery = recovery;
        self
    }

    /// Install a diagnostic sink for unrelayed handler failures.
    pub fn with_diagnostic_sink(mut self, sink: impl Fn(&anyhow::Error) + 'static) -> Self {
        self.sink = Some(Rc::new(sink) as DiagnosticSink);
        self
    }

    /// Finish the bridge and install its handshake handlers.
    pub fn build(self) -> Bridge<C, T> {
        let channel = Rc::new(self.channel);
        let registry = Rc::new(RefCell::new(Registry::new()));
        let state = Rc::new(HandshakeState::new());
        handshake::install(&channel, registry.clone(), state.clone());

        Bridge {
            inner: Rc::new(Shared {
                channel,
                time: self.time,
                registry,
                handshake: state,
                bound: RefCell::new(HashMap::new()),
                pending: RefCell::new(HashSet::new()),
                config: RefCell::new(self.config),
                recovery: Rc::new(self.recovery),
                sink: Rc::new(RefCell::new(self.sink)),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::channel::MemoryChannel;
    use crate::restore::TaggedValue;
    use crate::rpc::registry::ApiBuilder;

    use super::*;

    fn clock_api() -> ApiDefinition {
        ApiBuilder::new("Clock")
            .method("now", |_| async { Ok(TaggedValue::plain(json!(1234))) })
            .build()
            .expect("build")
    }

    #[test]
    fn test_double_expose_is_a_no_op() {
        let (left, _right) = MemoryChannel::pair();
        // Clones share handler tables, so the probe sees what the bridge
        // installs.
        let probe = left.clone();
        let bridge = Bridge::new(left);

        bridge.expose(clock_api());
        let installed = probe.handler_count();
        bridge.expose(clock_api());
        assert_eq!(probe.handler_count(), installed);
        assert!(bridge.is_exposed("Clock"));
    }

    #[test]
    fn test_exposure_answers_an_earlier_discovery() {
        let (left, right) = MemoryChannel::pair();
        let left_bridge = Bridge::new(left);
        let right_bridge = Bridge::new(right);

        // Ask before the API exists; the answer must come at exposure time.
        handshake::discover(&right_bridge.inner.channel, "Clock").expect("discover");
        assert!(right_bridge.inner.handshake.remote.borrow().is_empty());

        left_bridge.expose(clock_api());
        assert!(right_bridge
            .inner
            .handshake
            .remote
            .borrow()
            .contains_key("Clock"));
    }

    #[test]
    fn test_timeout_is_mutable() {
        let (left, _right) = MemoryChannel::pair();
        let bridge = Bridge::new(left);
        assert_eq!(bridge.bind_timeout(), Duration::from_secs(2));
        bridge.set_bind_timeout(Duration::from_millis(100));
        assert_eq!(bridge.bind_timeout(), Duration::from_millis(100));
    }
}
