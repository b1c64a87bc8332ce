use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("request is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request is not a json object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("unknown message_type `{0}`")]
    UnknownMessageType(String),
    #[error("unknown {kind} message `{message}`")]
    UnknownMessage { kind: MessageType, message: String },
    #[error("invalid body: {0}")]
    InvalidBody(String),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Navigation,
    Status,
    Settings,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Navigation => "navigation",
            MessageType::Status => "status",
            MessageType::Settings => "settings",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(alias = "Key")]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Either a bare tag (`"start"`, `"all_statuses"`) or a list of keyed requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Tag(String),
    Requests(Vec<KeyValue>),
}

impl Message {
    pub fn tag(&self) -> Option<&str> {
        match self {
            Message::Tag(t) => Some(t.as_str()),
            Message::Requests(_) => None,
        }
    }

    pub fn requests(&self) -> Option<&[KeyValue]> {
        match self {
            Message::Requests(r) => Some(r.as_slice()),
            Message::Tag(_) => None,
        }
    }

    /// Short label for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            Message::Tag(t) => t.clone(),
            Message::Requests(r) => {
                let keys: Vec<&str> = r.iter().map(|kv| kv.key.as_str()).collect();
                format!("[{}]", keys.join(","))
            }
        }
    }
}

/// Outer request object. Fields other than `message_type`/`message` land in `body`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub message_type: MessageType,
    pub message: Message,
    pub body: Map<String, Value>,
}

impl RequestEnvelope {
    pub fn new(message_type: MessageType, message: Message) -> Self {
        Self { message_type, message, body: Map::new() }
    }

    pub fn tagged(message_type: MessageType, tag: &str) -> Self {
        Self::new(message_type, Message::Tag(tag.to_string()))
    }

    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(raw)?;
        let Value::Object(mut body) = value else { return Err(ProtocolError::NotAnObject); };

        let message_type = body.remove("message_type").ok_or(ProtocolError::MissingField("message_type"))?;
        let message = body.remove("message").ok_or(ProtocolError::MissingField("message"))?;

        let message_type = match message_type.as_str() {
            Some("navigation") => MessageType::Navigation,
            Some("status") => MessageType::Status,
            Some("settings") => MessageType::Settings,
            Some(other) => return Err(ProtocolError::UnknownMessageType(other.to_string())),
            None => return Err(ProtocolError::UnknownMessageType(message_type.to_string())),
        };
        let message: Message = serde_json::from_value(message).map_err(|_| {
            ProtocolError::InvalidBody("`message` must be a string or an array of {key, value}".into())
        })?;

        Ok(Self { message_type, message, body })
    }

    /// Deserialize a body field, e.g. `waypoints` on a path request.
    pub fn field<T: DeserializeOwned>(&self, name: &'static str) -> Result<T, ProtocolError> {
        let v = self.body.get(name).ok_or(ProtocolError::MissingField(name))?;
        serde_json::from_value(v.clone())
            .map_err(|e| ProtocolError::InvalidBody(format!("field `{}`: {}", name, e)))
    }

    pub fn to_value(&self) -> Value {
        let mut obj = self.body.clone();
        obj.insert("message_type".into(), Value::String(self.message_type.as_str().into()));
        obj.insert(
            "message".into(),
            serde_json::to_value(&self.message).unwrap_or(Value::Null),
        );
        Value::Object(obj)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_value().to_string().into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tagged_request_and_keeps_extra_fields() {
        let raw = br#"{"message_type":"navigation","message":"path","waypoints":[]}"#;
        let env = RequestEnvelope::parse(raw).unwrap();
        assert_eq!(env.message_type, MessageType::Navigation);
        assert_eq!(env.message.tag(), Some("path"));
        assert_eq!(env.body.get("waypoints"), Some(&json!([])));
    }

    #[test]
    fn parses_keyed_requests_with_capitalised_key() {
        let raw = br#"{"message_type":"status","message":[{"Key":"orientation"},{"key":"speed","value":3}]}"#;
        let env = RequestEnvelope::parse(raw).unwrap();
        let reqs = env.message.requests().unwrap();
        assert_eq!(reqs[0].key, "orientation");
        assert_eq!(reqs[1].value, Some(json!(3)));
    }

    #[test]
    fn missing_message_type_is_rejected() {
        let err = RequestEnvelope::parse(br#"{"message":"start"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("message_type")));
    }

    #[test]
    fn missing_message_is_rejected() {
        let err = RequestEnvelope::parse(br#"{"message_type":"status"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("message")));
    }

    #[test]
    fn unknown_type_and_garbage_are_rejected() {
        let err = RequestEnvelope::parse(br#"{"message_type":"hello","message":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(t) if t == "hello"));
        assert!(matches!(RequestEnvelope::parse(b"[1,2]"), Err(ProtocolError::NotAnObject)));
        assert!(matches!(RequestEnvelope::parse(b"{nope"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            RequestEnvelope::parse(br#"{"message_type":"status","message":42}"#),
            Err(ProtocolError::InvalidBody(_))
        ));
    }

    #[test]
    fn serializes_back_to_the_same_shape() {
        let env = RequestEnvelope::tagged(MessageType::Status, "heartbeat");
        let back = RequestEnvelope::parse(&env.to_bytes()).unwrap();
        assert_eq!(back, env);
    }
}
