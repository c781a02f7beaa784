//! Protocol message types

use crate::headers::Headers;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Control-channel envelope
///
/// Encoded as `{"type": "<TYPE>", "payload": {...}}`. The payload is decoded strictly
/// according to `type`; a payload that does not fit is a decode error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ControlMessage {
    #[serde(rename = "REGISTER")]
    Register(RegisterPayload),
    #[serde(rename = "REGISTER_RESP")]
    RegisterAck(RegisterAckPayload),
    #[serde(rename = "HTTP_REQUEST")]
    HttpRequest(HttpRequestPayload),
    #[serde(rename = "HTTP_RESPONSE")]
    HttpResponse(HttpResponsePayload),
    #[serde(rename = "ERROR")]
    Error(ErrorPayload),
}

impl ControlMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ControlMessage::Register(_) => MessageType::Register,
            ControlMessage::RegisterAck(_) => MessageType::RegisterAck,
            ControlMessage::HttpRequest(_) => MessageType::HttpRequest,
            ControlMessage::HttpResponse(_) => MessageType::HttpResponse,
            ControlMessage::Error(_) => MessageType::Error,
        }
    }
}

/// Discriminant of a [`ControlMessage`], mostly for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Register,
    RegisterAck,
    HttpRequest,
    HttpResponse,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Register => "REGISTER",
            MessageType::RegisterAck => "REGISTER_RESP",
            MessageType::HttpRequest => "HTTP_REQUEST",
            MessageType::HttpResponse => "HTTP_RESPONSE",
            MessageType::Error => "ERROR",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client -> server: claim a subdomain (empty means "assign any")
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegisterPayload {
    #[serde(default)]
    pub subdomain: String,
}

/// Server -> client: outcome of a registration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegisterAckPayload {
    #[serde(default)]
    pub subdomain: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegisterAckPayload {
    pub fn assigned(subdomain: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            subdomain: subdomain.into(),
            url: url.into(),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            subdomain: String::new(),
            url: String::new(),
            error: Some(error.into()),
        }
    }

    /// `Ok((subdomain, url))` on success, `Err(message)` when the server refused
    pub fn outcome(&self) -> Result<(&str, &str), &str> {
        match self.error.as_deref() {
            Some(error) if !error.is_empty() => Err(error),
            _ => Ok((&self.subdomain, &self.url)),
        }
    }
}

/// Server -> client: a public request to execute locally
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpRequestPayload {
    pub id: String,
    pub method: String,
    pub path: String,
    #[serde(default, deserialize_with = "nullable::deserialize")]
    pub headers: Headers,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

/// Client -> server: the local service's answer, tagged with the request id
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpResponsePayload {
    pub id: String,
    pub status: u16,
    #[serde(default, deserialize_with = "nullable::deserialize")]
    pub headers: Headers,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl HttpResponsePayload {
    /// Synthesized 502 carrying the local failure text
    pub fn bad_gateway(id: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            id: id.into(),
            status: 502,
            headers: Headers::new(),
            body: format!("Local request failed: {}", error).into_bytes(),
        }
    }
}

/// Informational error text
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub message: String,
}

// Go peers encode nil maps and nil slices as `null`
mod nullable {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }
}

// Bodies travel as standard padded base64 strings
mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
