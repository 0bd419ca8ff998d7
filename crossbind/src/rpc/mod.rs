//! The RPC layer: registry, handshake, binder, proxy and dispatch.
//!
//! Composition, caller side to callee side:
//! binder sends one discovery handshake and polls the registration mirror →
//! on answer it builds a [`BoundApi`] proxy → proxy calls marshal arguments
//! with restoration metadata and perform one channel round trip per call →
//! the dispatch handler installed at exposure restores the arguments, runs
//! the real method, and encodes the result (or a relayed throw) as a reply.

pub(crate) mod binder;
pub(crate) mod dispatch;
pub(crate) mod handshake;
pub(crate) mod proxy;
pub(crate) mod registry;
pub(crate) mod relay;

pub use binder::BindConfig;
pub use dispatch::DiagnosticSink;
pub use proxy::{BoundApi, Notifier};
pub use registry::{ApiBuilder, ApiDefinition, ApiRegistration, MethodHandler};
pub use relay::HandlerError;

use serde_json::{Map, Value};

use crate::restore::RestorationInfo;

/// Marker field identifying a reply that is actually a relayed thrown value.
pub(crate) const RELAY_THROW_MARKER: &str = "__relayThrow";

/// Marker field identifying the generic resolution of an unrelayed callee
/// failure.
pub(crate) const INTERNAL_ERROR_MARKER: &str = "__internalError";

/// Decoded reply payload.
///
/// Success travels as a two-element tuple `[value, infoOrNull]`; the other
/// two shapes are objects distinguished by a marker field. Encoding and
/// decoding are hand-rolled because the success tuple would be ambiguous
/// under untagged deserialization (a boolean return value looks like a
/// marker field to serde).
#[derive(Debug)]
pub(crate) enum ReplyWire {
    /// The call returned a value.
    Success {
        /// The wire value.
        value: Value,
        /// Restoration metadata, if the value is tagged.
        info: Option<RestorationInfo>,
    },

    /// The callee explicitly relayed a thrown value.
    Thrown {
        /// The wire form of the thrown value.
        value: Value,
        /// Restoration metadata, if any.
        info: Option<RestorationInfo>,
    },

    /// The callee failed without relaying; no content crosses.
    Internal,
}

impl ReplyWire {
    /// Encode to the wire payload.
    pub(crate) fn encode(self) -> Value {
        match self {
            ReplyWire::Success { value, info } => {
                let info = encode_info(info);
                Value::Array(vec![value, info])
            }
            ReplyWire::Thrown { value, info } => {
                let mut map = Map::new();
                map.insert(RELAY_THROW_MARKER.to_string(), Value::Bool(true));
                map.insert("value".to_string(), value);
                map.insert("info".to_string(), encode_info(info));
                Value::Object(map)
            }
            ReplyWire::Internal => {
                let mut map = Map::new();
                map.insert(INTERNAL_ERROR_MARKER.to_string(), Value::Bool(true));
                Value::Object(map)
            }
        }
    }

    /// Decode from the wire payload.
    ///
    /// Returns a human-readable description of the problem on mismatch.
    pub(crate) fn decode(payload: Value) -> Result<Self, String> {
        match payload {
            Value::Object(mut map) if map.contains_key(RELAY_THROW_MARKER) => {
                let value = map.remove("value").unwrap_or(Value::Null);
                let info = decode_info(map.remove("info"))?;
                Ok(ReplyWire::Thrown { value, info })
            }
            Value::Object(map) if map.contains_key(INTERNAL_ERROR_MARKER) => {
                Ok(ReplyWire::Internal)
            }
            Value::Array(mut elements) if elements.len() == 2 => {
                let info = decode_info(elements.pop())?;
                let value = elements.pop().unwrap_or(Value::Null);
                Ok(ReplyWire::Success { value, info })
            }
            other => Err(format!("unrecognized reply shape: {other}")),
        }
    }
}

fn encode_info(info: Option<RestorationInfo>) -> Value {
    info.and_then(|info| serde_json::to_value(info).ok())
        .unwrap_or(Value::Null)
}

fn decode_info(raw: Option<Value>) -> Result<Option<RestorationInfo>, String> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| format!("bad restoration info: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_success_encodes_as_two_tuple() {
        let wire = ReplyWire::Success {
            value: json!(42),
            info: None,
        };
        assert_eq!(wire.encode(), json!([42, null]));
    }

    #[test]
    fn test_boolean_success_value_is_not_mistaken_for_a_marker() {
        let decoded = ReplyWire::decode(json!([true, null])).expect("decode");
        match decoded {
            ReplyWire::Success { value, info } => {
                assert_eq!(value, json!(true));
                assert!(info.is_none());
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_thrown_roundtrip() {
        let info = RestorationInfo {
            arg_index: None,
            class_name: "Error".to_string(),
            is_error: true,
        };
        let wire = ReplyWire::Thrown {
            value: json!({"message": "boom"}),
            info: Some(info.clone()),
        };
        let encoded = wire.encode();
        assert_eq!(encoded[RELAY_THROW_MARKER], json!(true));

        match ReplyWire::decode(encoded).expect("decode") {
            ReplyWire::Thrown { value, info: got } => {
                assert_eq!(value, json!({"message": "boom"}));
                assert_eq!(got, Some(info));
            }
            other => panic!("expected thrown, got {other:?}"),
        }
    }

    #[test]
    fn test_internal_roundtrip() {
        let encoded = ReplyWire::Internal.encode();
        assert!(matches!(
            ReplyWire::decode(encoded).expect("decode"),
            ReplyWire::Internal
        ));
    }

    #[test]
    fn test_unrecognized_shape_is_rejected() {
        assert!(ReplyWire::decode(json!("just a string")).is_err());
        assert!(ReplyWire::decode(json!([1, 2, 3])).is_err());
        assert!(ReplyWire::decode(json!({"plain": "object"})).is_err());
    }
}
