use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::http::{Headers, Response, StatusCode};

/// The canonical form of a response held by a cache backend.
///
/// Built once on a miss and replaced wholesale on overwrite. Serializes to
/// JSON with the body base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Headers,
    #[serde(with = "base64_body")]
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status: status.as_u16(),
            headers,
            body: body.into(),
        }
    }

    /// Rebuilds the response exactly as captured.
    ///
    /// A status outside the valid range (only possible for a tampered remote
    /// entry) replays as `200`.
    pub fn to_response(&self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or_default();
        let mut response = Response::new(status).body_bytes(self.body.clone());
        *response.headers_mut() = self.headers.clone();
        response
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }
}

mod base64_body {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}
