//! Wire message types.
//!
//! The protocol is a closed set of message kinds carried as JSON objects with
//! a `"type"` tag, modeled as one exhaustive enum so dispatch is a `match`
//! instead of string comparisons scattered through the code.
//!
//! Two *parameter markers* travel inside `call` parameters and `methodResult`
//! values rather than as top-level messages:
//!
//! - [`CallbackRef`] stands in for a function argument,
//! - [`ProxyRef`] describes a server object whose methods were exposed back
//!   to the client.
//!
//! Both are detected structurally by their literal `"type"` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message on the wire, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Message {
    /// Reverse channel established; the client may now send calls.
    Ready {
        client_id: String,
        session_id: String,
    },
    /// Liveness ping (server to client, no client id) or pong (client to
    /// server POST, carrying its client id).
    Heartbeat {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    /// Invoke method `name`, correlating the response with `call_id`.
    Call {
        client_id: String,
        name: String,
        call_id: u64,
        parameters: Vec<Value>,
    },
    /// Successful call result.
    MethodResult { call_id: u64, value: Value },
    /// Failed call; `value` is the stringified error.
    MethodError { call_id: u64, value: String },
    /// Server invoking a previously registered client callback.
    Callback { callback: u64, parameters: Vec<Value> },
    /// Client is voluntarily closing (POST, with client id), or the
    /// client-local synthetic signal that the channel died (no client id).
    Exit {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
}

/// Placeholder for a function-typed call argument.
///
/// The function itself never crosses the wire; the receiving side rebuilds a
/// dispatch handle from `safe_callback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRef {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub safe_callback: u64,
}

impl CallbackRef {
    pub fn new(client_id: Option<String>, safe_callback: u64) -> Self {
        Self {
            kind: "callback".to_string(),
            client_id,
            safe_callback,
        }
    }

    /// Structural check: is this value a callback placeholder?
    pub fn matches(value: &Value) -> bool {
        value.get("type").and_then(Value::as_str) == Some("callback")
            && value.get("safeCallback").map_or(false, Value::is_u64)
    }

    /// Decode a placeholder out of a parameter value.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !Self::matches(value) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Descriptor for a server-side object exposed back to the client.
///
/// Every name in `methods` is callable remotely as `"<instance>.<method>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRef {
    #[serde(rename = "type")]
    kind: String,
    pub instance: u64,
    pub methods: Vec<String>,
}

impl ProxyRef {
    pub fn new(instance: u64, methods: Vec<String>) -> Self {
        Self {
            kind: "proxy".to_string(),
            instance,
            methods,
        }
    }

    /// Structural check: is this value a proxy descriptor?
    pub fn matches(value: &Value) -> bool {
        value.get("type").and_then(Value::as_str) == Some("proxy")
            && value.get("instance").map_or(false, Value::is_u64)
            && value.get("methods").map_or(false, Value::is_array)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        if !Self::matches(value) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ready_wire_shape() {
        let msg = Message::Ready {
            client_id: "abc".to_string(),
            session_id: "s1".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "ready", "clientId": "abc", "sessionId": "s1"})
        );
    }

    #[test]
    fn test_heartbeat_ping_omits_client_id() {
        let msg = Message::Heartbeat { client_id: None };
        let text = serde_json::to_string(&msg).unwrap();
        assert_eq!(text, r#"{"type":"heartbeat"}"#);

        let parsed: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_heartbeat_pong_carries_client_id() {
        let parsed: Message =
            serde_json::from_str(r#"{"type":"heartbeat","clientId":"abc"}"#).unwrap();
        assert_eq!(
            parsed,
            Message::Heartbeat {
                client_id: Some("abc".to_string())
            }
        );
    }

    #[test]
    fn test_call_wire_shape() {
        let msg = Message::Call {
            client_id: "abc".to_string(),
            name: "sum".to_string(),
            call_id: 7,
            parameters: vec![json!(1), json!(2)],
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "call",
                "clientId": "abc",
                "name": "sum",
                "callId": 7,
                "parameters": [1, 2]
            })
        );
    }

    #[test]
    fn test_method_result_and_error_tags() {
        let ok = Message::MethodResult {
            call_id: 1,
            value: json!(3),
        };
        let err = Message::MethodError {
            call_id: 2,
            value: "boom".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap()["type"],
            json!("methodResult")
        );
        assert_eq!(
            serde_json::to_value(&err).unwrap()["type"],
            json!("methodError")
        );
    }

    #[test]
    fn test_exit_roundtrip() {
        let msg = Message::Exit {
            client_id: Some("abc".to_string()),
        };
        let text = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, msg);

        // Synthetic local exit has no client id.
        let local: Message = serde_json::from_str(r#"{"type":"exit"}"#).unwrap();
        assert_eq!(local, Message::Exit { client_id: None });
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let result: std::result::Result<Message, _> =
            serde_json::from_str(r#"{"type":"bogus"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_callback_ref_detection() {
        let marker = CallbackRef::new(Some("abc".to_string()), 12).to_value();
        assert_eq!(
            marker,
            json!({"type": "callback", "clientId": "abc", "safeCallback": 12})
        );
        assert!(CallbackRef::matches(&marker));

        let decoded = CallbackRef::from_value(&marker).unwrap();
        assert_eq!(decoded.safe_callback, 12);
        assert_eq!(decoded.client_id.as_deref(), Some("abc"));

        // Plain objects must not match.
        assert!(!CallbackRef::matches(&json!({"type": "other"})));
        assert!(!CallbackRef::matches(&json!({"safeCallback": 12})));
        assert!(!CallbackRef::matches(&json!(42)));
    }

    #[test]
    fn test_proxy_ref_detection() {
        let marker = ProxyRef::new(3, vec!["get".to_string(), "set".to_string()]).to_value();
        assert_eq!(
            marker,
            json!({"type": "proxy", "instance": 3, "methods": ["get", "set"]})
        );
        assert!(ProxyRef::matches(&marker));

        let decoded = ProxyRef::from_value(&marker).unwrap();
        assert_eq!(decoded.instance, 3);
        assert_eq!(decoded.methods, vec!["get", "set"]);

        assert!(!ProxyRef::matches(&json!({"type": "proxy"})));
        assert!(!ProxyRef::matches(&json!("proxy")));
    }
}
