use std::str::FromStr;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::{Map, Value};

use crate::options::parse_header;
use crate::{Credentials, Error, PolicyOverrides, Result, StatusValidator, TransformerPipeline};

/// Body encoding selected for an endpoint or call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DataType {
    #[default]
    Json,
    FormUrlEncoded,
    FormData,
    Html,
    Xml,
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "json" => Ok(Self::Json),
            "form-urlencoded" => Ok(Self::FormUrlEncoded),
            "form-data" => Ok(Self::FormData),
            "html" => Ok(Self::Html),
            "xml" => Ok(Self::Xml),
            other => Err(Error::build(format!("invalid data type '{other}'"))),
        }
    }
}

/// How the response body is turned into [`crate::Response::data`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseType {
    #[default]
    Json,
    Text,
    /// Raw bytes only; `data` stays `null`.
    Bytes,
}

/// Named, reusable description of one request shape.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub path: String,
    pub method: Method,
    pub query: Map<String, Value>,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    pub data_type: DataType,
    pub response_type: Option<ResponseType>,
    pub validate_status: Option<StatusValidator>,
    pub transform_request: Option<TransformerPipeline>,
    pub transform_response: Option<TransformerPipeline>,
    pub policy: PolicyOverrides,
}

impl Endpoint {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            query: Map::new(),
            body: None,
            headers: HeaderMap::new(),
            data_type: DataType::default(),
            response_type: None,
            validate_status: None,
            transform_request: None,
            transform_response: None,
            policy: PolicyOverrides::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds another value for `name`, keeping the ones already set.
    pub fn append_header(mut self, name: &str, value: &str) -> Result<Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    pub fn validate_status(mut self, validator: StatusValidator) -> Self {
        self.validate_status = Some(validator);
        self
    }

    pub fn transform_request(mut self, pipeline: TransformerPipeline) -> Self {
        self.transform_request = Some(pipeline);
        self
    }

    pub fn transform_response(mut self, pipeline: TransformerPipeline) -> Self {
        self.transform_response = Some(pipeline);
        self
    }

    pub fn policy(mut self, policy: PolicyOverrides) -> Self {
        self.policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, enabled: bool) -> Self {
        self.policy.retry = Some(enabled);
        self
    }

    pub fn cancel_repeated_requests(mut self, enabled: bool) -> Self {
        self.policy.cancel_repeated_requests = Some(enabled);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.policy.credentials = Some(credentials);
        self
    }
}

/// Per-invocation overrides. Every `Some`/non-empty field wins over the
/// endpoint and global values for that field only.
#[derive(Clone, Debug, Default)]
pub struct CallConfig {
    /// Appended to the endpoint path as `/<path>`.
    pub path: Option<String>,
    pub method: Option<Method>,
    pub query: Map<String, Value>,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    pub data_type: Option<DataType>,
    pub response_type: Option<ResponseType>,
    pub validate_status: Option<StatusValidator>,
    pub transform_request: Option<TransformerPipeline>,
    pub transform_response: Option<TransformerPipeline>,
    pub policy: PolicyOverrides,
}

impl CallConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds another value for `name`, keeping the ones already set.
    pub fn append_header(mut self, name: &str, value: &str) -> Result<Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    pub fn validate_status(mut self, validator: StatusValidator) -> Self {
        self.validate_status = Some(validator);
        self
    }

    pub fn transform_request(mut self, pipeline: TransformerPipeline) -> Self {
        self.transform_request = Some(pipeline);
        self
    }

    pub fn transform_response(mut self, pipeline: TransformerPipeline) -> Self {
        self.transform_response = Some(pipeline);
        self
    }

    pub fn policy(mut self, policy: PolicyOverrides) -> Self {
        self.policy = policy;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.policy.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = Some(timeout);
        self
    }

    pub fn timeout_retry(mut self, enabled: bool, count: u32) -> Self {
        self.policy.timeout_retry = Some(enabled);
        self.policy.timeout_retry_count = Some(count);
        self
    }

    pub fn retry(mut self, enabled: bool) -> Self {
        self.policy.retry = Some(enabled);
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.policy.retry_count = Some(count);
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.policy.retry_interval = Some(interval);
        self
    }

    pub fn cancel_repeated_requests(mut self, enabled: bool) -> Self {
        self.policy.cancel_repeated_requests = Some(enabled);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.policy.credentials = Some(credentials);
        self
    }

    /// Layers `overrides` on top of `self`, field by field.
    ///
    /// Used when a handle created with one call config is sent with another.
    pub fn merged_with(&self, overrides: CallConfig) -> CallConfig {
        let mut query = self.query.clone();
        query.extend(overrides.query);
        let mut headers = self.headers.clone();
        headers.extend(overrides.headers);
        let base = &self.policy;
        let next = overrides.policy;
        CallConfig {
            path: overrides.path.or_else(|| self.path.clone()),
            method: overrides.method.or_else(|| self.method.clone()),
            query,
            body: merge_bodies(self.body.as_ref(), overrides.body),
            headers,
            data_type: overrides.data_type.or(self.data_type),
            response_type: overrides.response_type.or(self.response_type),
            validate_status: overrides
                .validate_status
                .or_else(|| self.validate_status.clone()),
            transform_request: overrides
                .transform_request
                .or_else(|| self.transform_request.clone()),
            transform_response: overrides
                .transform_response
                .or_else(|| self.transform_response.clone()),
            policy: PolicyOverrides {
                base_url: next.base_url.or_else(|| base.base_url.clone()),
                timeout: next.timeout.or(base.timeout),
                timeout_retry: next.timeout_retry.or(base.timeout_retry),
                timeout_retry_count: next.timeout_retry_count.or(base.timeout_retry_count),
                retry: next.retry.or(base.retry),
                retry_count: next.retry_count.or(base.retry_count),
                retry_interval: next.retry_interval.or(base.retry_interval),
                cancel_repeated_requests: next
                    .cancel_repeated_requests
                    .or(base.cancel_repeated_requests),
                credentials: next.credentials.or(base.credentials),
            },
        }
    }
}

/// Object bodies merge key by key with `narrow` winning; any other shape
/// replaces the broader body outright.
pub(crate) fn merge_bodies(broad: Option<&Value>, narrow: Option<Value>) -> Option<Value> {
    match (broad, narrow) {
        (Some(Value::Object(broad)), Some(Value::Object(narrow))) => {
            let mut merged = broad.clone();
            merged.extend(narrow);
            Some(Value::Object(merged))
        }
        (_, Some(narrow)) => Some(narrow),
        (broad, None) => broad.cloned(),
    }
}
