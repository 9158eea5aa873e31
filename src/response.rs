use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Error, RequestConfig, ResponseType, Result};

/// Successful result of a call.
#[derive(Clone, Debug)]
pub struct Response {
    /// Decoded (and transformed) body.
    pub data: Value,
    /// Raw body bytes as received.
    pub body: Bytes,
    pub status: StatusCode,
    pub status_text: String,
    /// Case-insensitive response headers.
    pub headers: HeaderMap,
    /// Configuration the exchange ran with.
    pub config: Arc<RequestConfig>,
}

impl Response {
    /// Deserializes [`Response::data`] into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|err| Error::decode(format!("response data does not match target type: {err}")))
    }

    /// Body as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Predicate deciding which statuses count as success.
#[derive(Clone)]
pub struct StatusValidator(Arc<dyn Fn(StatusCode) -> bool + Send + Sync>);

impl fmt::Debug for StatusValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StatusValidator(..)")
    }
}

impl Default for StatusValidator {
    fn default() -> Self {
        Self::new(is_success)
    }
}

impl StatusValidator {
    pub fn new(predicate: impl Fn(StatusCode) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Accepts exactly the listed statuses.
    pub fn only(statuses: &[u16]) -> Self {
        let allowed = statuses.to_vec();
        Self::new(move |status| allowed.contains(&status.as_u16()))
    }

    /// Accepts every status.
    pub fn any() -> Self {
        Self::new(|_| true)
    }

    pub fn accepts(&self, status: StatusCode) -> bool {
        (self.0)(status)
    }
}

pub fn is_informational(status: StatusCode) -> bool {
    status.is_informational()
}

pub fn is_success(status: StatusCode) -> bool {
    status.is_success()
}

pub fn is_redirection(status: StatusCode) -> bool {
    status.is_redirection()
}

pub fn is_client_error(status: StatusCode) -> bool {
    status.is_client_error()
}

pub fn is_server_error(status: StatusCode) -> bool {
    status.is_server_error()
}

/// Statuses that usually succeed when sent again.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

pub fn requires_auth(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED
}

pub fn is_forbidden(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN
}

pub fn is_rate_limited(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
}

pub(crate) fn status_text(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Unknown Status").to_owned()
}

/// Decodes a successful body according to the response type.
pub(crate) fn decode_body(body: &Bytes, response_type: ResponseType) -> Result<Value> {
    match response_type {
        ResponseType::Json => {
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(Value::Null);
            }
            serde_json::from_slice(body).map_err(|err| {
                Error::decode(format!(
                    "invalid JSON response: {err}; body: {}",
                    String::from_utf8_lossy(body)
                ))
            })
        }
        ResponseType::Text => Ok(Value::String(String::from_utf8_lossy(body).into_owned())),
        ResponseType::Bytes => Ok(Value::Null),
    }
}

/// Best-effort decoding used for rejected responses: JSON when it parses,
/// text otherwise.
pub(crate) fn decode_lenient(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}
