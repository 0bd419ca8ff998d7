//! Identity-preserving value transfer.
//!
//! Values crossing the channel are serialized as JSON and lose their original
//! type. This module carries the side-band metadata needed to get it back:
//! each non-plain value travels with one [`RestorationInfo`] naming a stable
//! class tag, and the receiving side consults an application-supplied
//! [`TypeRegistry`] to reconstruct the domain object. Restoration is an
//! opt-in convenience: an unknown tag or a missing registry degrades the
//! value to its plain JSON form, never an error.
//!
//! Errors get one extra rule: a value flagged `isError` always comes out as a
//! [`RemoteError`] whose trace is a fixed marker string. The original trace
//! is never transmitted, so internal call-stack detail cannot leak across the
//! isolation boundary.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Class tag of the sentinel wrapper used when a relayed thrown value is not
/// an object (a bare string or number). The restoration protocol is
/// object-shaped, so such values travel wrapped and are unwrapped on arrival.
pub(crate) const THROWN_WRAPPER_TAG: &str = "crossbind.ThrownValue";

/// Errors raised while marshaling values for transit.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    /// A value could not be serialized to the wire form.
    #[error("failed to serialize value for transit: {message}")]
    Serialization {
        /// Details about the serialization failure.
        message: String,
    },

    /// An incoming argument payload did not have the expected shape.
    #[error("malformed argument payload: {message}")]
    MalformedArguments {
        /// Details about the malformed payload.
        message: String,
    },
}

/// Side-band metadata accompanying one non-plain value across the boundary.
///
/// `arg_index` is present only when the info describes one element of an
/// argument list; a lone return-value or thrown-value info has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorationInfo {
    /// Position in the argument list this info belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg_index: Option<usize>,

    /// Stable application-supplied class tag of the value.
    pub class_name: String,

    /// Whether the value is an error-derived type.
    pub is_error: bool,
}

/// A type that can be reconstructed after crossing the boundary.
///
/// The tag is an explicit, stable wire identifier supplied by the
/// application; it deliberately is not derived from any runtime type name.
pub trait Restorable: Serialize + DeserializeOwned + 'static {
    /// Stable wire tag for this type.
    const TAG: &'static str;

    /// Whether this type represents an error.
    const IS_ERROR: bool = false;
}

/// An outbound value paired with its optional restoration tag.
///
/// Plain values (primitives, untyped structures) carry no tag and generate no
/// [`RestorationInfo`]; they cross the boundary as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedValue {
    value: Value,
    class_name: Option<String>,
    is_error: bool,
}

impl TaggedValue {
    /// A plain, untagged value. Never generates restoration metadata.
    pub fn plain(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            class_name: None,
            is_error: false,
        }
    }

    /// The JSON `null` value.
    pub fn null() -> Self {
        Self::plain(Value::Null)
    }

    /// A value tagged with its type's stable wire tag.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError::Serialization`] if the value cannot be
    /// converted to the wire form.
    pub fn of<T: Restorable>(value: &T) -> Result<Self, RestoreError> {
        let value = serde_json::to_value(value).map_err(|e| RestoreError::Serialization {
            message: e.to_string(),
        })?;
        Ok(Self {
            value,
            class_name: Some(T::TAG.to_string()),
            is_error: T::IS_ERROR,
        })
    }

    /// A generic error value carrying only a message, tagged `"Error"`.
    pub fn error_message(message: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("message".to_string(), Value::String(message.into()));
        Self {
            value: Value::Object(map),
            class_name: Some("Error".to_string()),
            is_error: true,
        }
    }

    /// The wire value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The class tag, if the value is tagged.
    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    /// Whether the value is flagged as an error-derived type.
    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// Build the restoration metadata for this value, if any.
    ///
    /// Pure: annotates the side channel without touching the value's shape.
    pub(crate) fn info(&self, arg_index: Option<usize>) -> Option<RestorationInfo> {
        self.class_name.as_ref().map(|class_name| RestorationInfo {
            arg_index,
            class_name: class_name.clone(),
            is_error: self.is_error,
        })
    }

    pub(crate) fn into_value(self) -> Value {
        self.value
    }
}

/// A reconstructed domain object together with its wire tag.
pub struct TypedValue {
    tag: String,
    boxed: Box<dyn Any>,
}

impl TypedValue {
    pub(crate) fn new(tag: String, boxed: Box<dyn Any>) -> Self {
        Self { tag, boxed }
    }

    /// The stable wire tag the value was restored from.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whether the reconstructed value is a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.boxed.is::<T>()
    }

    /// Borrow the reconstructed value as a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.boxed.downcast_ref::<T>()
    }

    /// Take the reconstructed value as a `T`, or get `self` back.
    pub fn downcast<T: 'static>(self) -> Result<T, TypedValue> {
        let tag = self.tag;
        match self.boxed.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(boxed) => Err(TypedValue { tag, boxed }),
        }
    }
}

impl fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedValue")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// An error reconstructed on the near side of the boundary.
///
/// Synthesized whenever an inbound value is flagged as error-derived. The
/// message and remaining properties come from the wire; the trace is always
/// [`RemoteError::TRACE_MARKER`], because the original trace is withheld by
/// design.
#[derive(Debug)]
pub struct RemoteError {
    /// Stable class tag of the original error type.
    pub class_name: String,

    /// The error message carried across the boundary.
    pub message: String,

    /// Remaining wire properties of the error value, minus `message`.
    pub properties: Map<String, Value>,

    /// Diagnostic trace; always equals [`RemoteError::TRACE_MARKER`].
    pub trace: String,

    /// The typed reconstruction, when the recovery registry knew the tag.
    pub restored: Option<TypedValue>,
}

impl RemoteError {
    /// Fixed string standing in for the diagnostic trace of every error that
    /// crossed the boundary.
    pub const TRACE_MARKER: &'static str = "<trace withheld: raised on the remote side>";
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class_name, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// An inbound value after restoration.
#[derive(Debug)]
pub enum RestoredValue {
    /// A plain value: either it never had metadata, or its tag was unknown
    /// and restoration degraded gracefully.
    Plain(Value),

    /// A reconstructed domain object.
    Typed(TypedValue),

    /// A reconstructed error (see [`RemoteError`]).
    Error(RemoteError),
}

impl RestoredValue {
    /// Borrow the plain JSON form, if this is a plain value.
    pub fn as_plain(&self) -> Option<&Value> {
        match self {
            RestoredValue::Plain(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the typed reconstruction, if any.
    pub fn as_typed(&self) -> Option<&TypedValue> {
        match self {
            RestoredValue::Typed(t) => Some(t),
            _ => None,
        }
    }

    /// Borrow the reconstructed error, if this is one.
    pub fn as_error(&self) -> Option<&RemoteError> {
        match self {
            RestoredValue::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for RestoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoredValue::Plain(v) => write!(f, "{}", v),
            RestoredValue::Typed(t) => write!(f, "<{}>", t.tag()),
            RestoredValue::Error(e) => write!(f, "{}", e),
        }
    }
}

type RecoverFn = Box<dyn Fn(&Value) -> Option<Box<dyn Any>>>;

/// Application-supplied recovery functions, keyed by stable class tag.
///
/// The registry maps a tag plus the plain wire structure back to the original
/// type. Registration is per endpoint; an empty registry simply leaves every
/// value in its plain form.
#[derive(Default)]
pub struct TypeRegistry {
    decoders: HashMap<&'static str, RecoverFn>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a restorable type under its stable tag.
    pub fn register<T: Restorable>(&mut self) {
        self.decoders.insert(
            T::TAG,
            Box::new(|value| {
                serde_json::from_value::<T>(value.clone())
                    .ok()
                    .map(|v| Box::new(v) as Box<dyn Any>)
            }),
        );
    }

    /// Number of registered tags.
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Whether no tags are registered.
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    fn recover(&self, tag: &str, value: &Value) -> Option<Box<dyn Any>> {
        self.decoders.get(tag).and_then(|decode| decode(value))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("tags", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Reconstruct one inbound value from its wire form and optional metadata.
///
/// No metadata returns the value unchanged. The thrown-value sentinel
/// unwraps to the bare thrown value. Error-flagged values always come out as
/// [`RestoredValue::Error`]. Everything else goes through the recovery
/// registry, degrading to the plain form when the tag is unknown.
pub(crate) fn restore(
    value: Value,
    info: Option<&RestorationInfo>,
    recovery: Option<&TypeRegistry>,
) -> RestoredValue {
    let Some(info) = info else {
        return RestoredValue::Plain(value);
    };

    if info.class_name == THROWN_WRAPPER_TAG {
        let bare = match value {
            Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
            other => other,
        };
        return RestoredValue::Plain(bare);
    }

    let restored = recovery.and_then(|registry| {
        registry
            .recover(&info.class_name, &value)
            .map(|boxed| TypedValue::new(info.class_name.clone(), boxed))
    });

    if info.is_error {
        let (message, properties) = match value {
            Value::Object(mut map) => {
                let message = match map.remove("message") {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                (message, map)
            }
            other => (other.to_string(), Map::new()),
        };
        return RestoredValue::Error(RemoteError {
            class_name: info.class_name.clone(),
            message,
            properties,
            trace: RemoteError::TRACE_MARKER.to_string(),
            restored,
        });
    }

    match restored {
        Some(typed) => RestoredValue::Typed(typed),
        None => RestoredValue::Plain(value),
    }
}

/// Marshal an argument list for transit.
///
/// The wire shape is the argument values followed by one trailing array of
/// [`RestorationInfo`] entries, so the received length is always the sent
/// length plus one.
pub(crate) fn pack_args(args: &[TaggedValue]) -> Result<Value, RestoreError> {
    let mut out: Vec<Value> = args.iter().map(|a| a.value.clone()).collect();
    let infos: Vec<RestorationInfo> = args
        .iter()
        .enumerate()
        .filter_map(|(i, a)| a.info(Some(i)))
        .collect();
    let trailer = serde_json::to_value(&infos).map_err(|e| RestoreError::Serialization {
        message: e.to_string(),
    })?;
    out.push(trailer);
    Ok(Value::Array(out))
}

/// Split an inbound call payload into argument values and their metadata.
pub(crate) fn unpack_args(payload: Value) -> Result<(Vec<Value>, Vec<RestorationInfo>), RestoreError> {
    let Value::Array(mut elements) = payload else {
        return Err(RestoreError::MalformedArguments {
            message: "call payload is not an array".to_string(),
        });
    };
    let Some(trailer) = elements.pop() else {
        return Err(RestoreError::MalformedArguments {
            message: "call payload is missing the metadata trailer".to_string(),
        });
    };
    let infos: Vec<RestorationInfo> =
        serde_json::from_value(trailer).map_err(|e| RestoreError::MalformedArguments {
            message: format!("bad metadata trailer: {e}"),
        })?;
    Ok((elements, infos))
}

/// Restore an argument list positionally.
///
/// Metadata entries are matched to positions via their `arg_index`; the info
/// array is sparse (primitive positions have none, later positions may).
pub(crate) fn restore_args(
    values: Vec<Value>,
    infos: &[RestorationInfo],
    recovery: Option<&TypeRegistry>,
) -> Vec<RestoredValue> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| {
            let info = infos.iter().find(|info| info.arg_index == Some(i));
            restore(value, info, recovery)
        })
        .collect()
}

/// Wire form of a relayed thrown value: the value plus its metadata, with
/// non-object values wrapped in the sentinel so the object-shaped protocol
/// can carry them.
pub(crate) fn wrap_thrown(thrown: TaggedValue) -> (Value, Option<RestorationInfo>) {
    if thrown.class_name.is_some() {
        let info = thrown.info(None);
        return (thrown.value, info);
    }
    match thrown.value {
        object @ Value::Object(_) => (object, None),
        bare => {
            let mut map = Map::new();
            map.insert("value".to_string(), bare);
            let info = RestorationInfo {
                arg_index: None,
                class_name: THROWN_WRAPPER_TAG.to_string(),
                is_error: false,
            };
            (Value::Object(map), Some(info))
        }
    }
}
