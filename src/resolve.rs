use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;

use crate::endpoint::merge_bodies;
use crate::format::{format_body, serialize_query};
use crate::{
    CallConfig, Credentials, Endpoint, Error, GlobalConfig, ResponseType, Result, StatusValidator,
    TransformerPipeline,
};

/// Fully merged, exchange-ready configuration of one call.
///
/// Request interceptors receive and return this value; after they finish it
/// is frozen behind an `Arc` for the rest of the call.
#[derive(Clone, Debug)]
pub struct RequestConfig {
    /// Absolute URL including the serialized query string.
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    /// Serialized body, if any.
    pub body: Option<Bytes>,
    pub content_type: Option<String>,
    pub credentials: Credentials,
    pub timeout: Duration,
    pub timeout_retry: bool,
    pub timeout_retry_count: u32,
    pub retry: bool,
    pub retry_count: u32,
    pub retry_interval: Duration,
    pub cancel_repeated_requests: bool,
    pub error_debounce: Duration,
    pub response_type: ResponseType,
    pub validate_status: StatusValidator,
    pub transform_response: TransformerPipeline,
}

impl RequestConfig {
    /// Identity key used for in-flight deduplication.
    pub fn signature(&self) -> String {
        format!("{}+{}", self.url, self.method)
    }
}

/// Merges global, endpoint and call configuration into one effective
/// configuration. Each field resolves independently as
/// call > endpoint > global > built-in default.
pub fn resolve(global: &GlobalConfig, endpoint: &Endpoint, call: &CallConfig) -> Result<RequestConfig> {
    let ep = &endpoint.policy;
    let cp = &call.policy;

    let base_url = cp
        .base_url
        .as_deref()
        .or(ep.base_url.as_deref())
        .unwrap_or(&global.base_url);
    let mut url = build_url(base_url, &endpoint.path, call.path.as_deref());

    let mut query = endpoint.query.clone();
    query.extend(call.query.clone());
    let query = serialize_query(&query);
    if !query.is_empty() {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&query);
    }

    let method = call.method.clone().unwrap_or_else(|| endpoint.method.clone());
    let data_type = call.data_type.unwrap_or(endpoint.data_type);

    let mut body = merge_bodies(endpoint.body.as_ref(), call.body.clone()).filter(|b| !b.is_null());
    if let Some(value) = body.take() {
        let transform = call
            .transform_request
            .as_ref()
            .or(endpoint.transform_request.as_ref());
        body = Some(match transform {
            Some(pipeline) => pipeline.apply(value)?,
            None => value,
        });
    }
    let formatted = match &body {
        Some(value) if carries_body(&method) => Some(format_body(value, data_type)?),
        _ => None,
    };

    // `extend` replaces per name but keeps every value of a repeated header.
    let mut headers = global.headers.clone();
    headers.extend(endpoint.headers.clone());
    headers.extend(call.headers.clone());
    if let Some(formatted) = &formatted {
        let value = HeaderValue::from_str(&formatted.content_type)
            .map_err(|err| Error::build(format!("invalid content type: {err}")))?;
        headers.insert(CONTENT_TYPE, value);
    }

    Ok(RequestConfig {
        url,
        method,
        headers,
        content_type: formatted.as_ref().map(|f| f.content_type.clone()),
        body: formatted.map(|f| f.bytes),
        credentials: cp
            .credentials
            .or(ep.credentials)
            .unwrap_or(global.credentials),
        timeout: cp.timeout.or(ep.timeout).unwrap_or(global.timeout),
        timeout_retry: cp
            .timeout_retry
            .or(ep.timeout_retry)
            .unwrap_or(global.timeout_retry),
        timeout_retry_count: cp
            .timeout_retry_count
            .or(ep.timeout_retry_count)
            .unwrap_or(global.timeout_retry_count),
        retry: cp.retry.or(ep.retry).unwrap_or(global.retry),
        retry_count: cp
            .retry_count
            .or(ep.retry_count)
            .unwrap_or(global.retry_count),
        retry_interval: cp
            .retry_interval
            .or(ep.retry_interval)
            .unwrap_or(global.retry_interval),
        cancel_repeated_requests: cp
            .cancel_repeated_requests
            .or(ep.cancel_repeated_requests)
            .unwrap_or(global.cancel_repeated_requests),
        error_debounce: global.error_debounce,
        response_type: call
            .response_type
            .or(endpoint.response_type)
            .unwrap_or_default(),
        validate_status: call
            .validate_status
            .clone()
            .or_else(|| endpoint.validate_status.clone())
            .unwrap_or_default(),
        transform_response: call
            .transform_response
            .clone()
            .or_else(|| endpoint.transform_response.clone())
            .unwrap_or_default(),
    })
}

/// Joins `base_url`, the endpoint path and an optional call suffix.
///
/// An endpoint path that is already an absolute URL ignores `base_url`.
/// A doubled leading slash on the path part is collapsed to one.
pub fn build_url(base_url: &str, path: &str, suffix: Option<&str>) -> String {
    let mut tail = if is_absolute(path) {
        path.to_owned()
    } else {
        format!("/{path}")
    };
    if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
        tail.push('/');
        tail.push_str(suffix);
    }
    if is_absolute(&tail) {
        return tail;
    }
    if tail.starts_with("//") {
        tail.remove(0);
    }
    format!("{}{tail}", base_url.trim_end_matches('/'))
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

fn carries_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}
