//! Per-side registry of exposed APIs.
//!
//! An API is registered with an explicit name and method list; there is no
//! reflection over a type's members and no privacy-by-naming convention. A
//! method is a closure by construction, so a "non-callable public member"
//! cannot even be expressed, and every other malformed registration fails at
//! build time.

use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::ExposeError;
use crate::restore::{RestoredValue, TaggedValue};
use crate::rpc::relay::HandlerError;

/// Handler closure backing one exposed method.
///
/// Receives the positionally restored argument list and produces the result
/// value, or a [`HandlerError`] deciding whether the failure crosses the
/// boundary.
pub type MethodHandler =
    Rc<dyn Fn(Vec<RestoredValue>) -> LocalBoxFuture<'static, Result<TaggedValue, HandlerError>>>;

/// Channel name carrying calls for one method of one API.
///
/// Injective over (api, method) because `:` is forbidden in both components.
pub(crate) fn method_channel(api: &str, method: &str) -> String {
    format!("{api}:{method}")
}

/// Wire description of an exposed API: its name and ordered method list.
///
/// This is the handshake answer; the binder builds the proxy from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRegistration {
    /// The API name.
    pub name: String,

    /// Public method names, in registration order.
    pub method_names: Vec<String>,
}

/// A fully built API definition, ready to expose.
pub struct ApiDefinition {
    pub(crate) name: String,
    pub(crate) methods: Vec<(String, MethodHandler)>,
}

impl ApiDefinition {
    /// The API name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wire registration describing this API.
    pub fn registration(&self) -> ApiRegistration {
        ApiRegistration {
            name: self.name.clone(),
            method_names: self.methods.iter().map(|(name, _)| name.clone()).collect(),
        }
    }
}

impl std::fmt::Debug for ApiDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiDefinition")
            .field("name", &self.name)
            .field(
                "methods",
                &self.methods.iter().map(|(m, _)| m).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder assembling an [`ApiDefinition`] method by method.
pub struct ApiBuilder {
    name: String,
    methods: Vec<(String, MethodHandler)>,
}

impl ApiBuilder {
    /// Start a definition for the named API.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Add a method backed by the given async closure.
    pub fn method<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<RestoredValue>) -> Fut + 'static,
        Fut: Future<Output = Result<TaggedValue, HandlerError>> + 'static,
    {
        let handler: MethodHandler = Rc::new(move |args| handler(args).boxed_local());
        self.methods.push((method.into(), handler));
        self
    }

    /// Validate and finish the definition.
    ///
    /// # Errors
    ///
    /// Rejects empty or `:`-containing names, duplicate methods, and an
    /// empty method list.
    pub fn build(self) -> Result<ApiDefinition, ExposeError> {
        if self.name.is_empty() || self.name.contains(':') {
            return Err(ExposeError::InvalidName { name: self.name });
        }
        if self.methods.is_empty() {
            return Err(ExposeError::NoMethods { api: self.name });
        }
        let mut seen = std::collections::HashSet::new();
        for (method, _) in &self.methods {
            if method.is_empty() || method.contains(':') {
                return Err(ExposeError::InvalidMethod {
                    api: self.name,
                    method: method.clone(),
                });
            }
            if !seen.insert(method.clone()) {
                return Err(ExposeError::DuplicateMethod {
                    api: self.name,
                    method: method.clone(),
                });
            }
        }
        Ok(ApiDefinition {
            name: self.name,
            methods: self.methods,
        })
    }
}

/// Table of APIs this side has exposed, keyed by name.
///
/// Entries are immutable after first registration; re-registering a name is
/// refused (the exposer treats that as an idempotent no-op).
#[derive(Default)]
pub(crate) struct Registry {
    apis: HashMap<String, ApiRegistration>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a registration. Returns false if the name was already present.
    pub(crate) fn register(&mut self, registration: ApiRegistration) -> bool {
        if self.apis.contains_key(&registration.name) {
            return false;
        }
        self.apis.insert(registration.name.clone(), registration);
        true
    }

    pub(crate) fn get(&self, name: &str) -> Option<&ApiRegistration> {
        self.apis.get(name)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.apis.contains_key(name)
    }

    pub(crate) fn len(&self) -> usize {
        self.apis.len()
    }
}
