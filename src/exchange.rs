//! The host "perform one network exchange" primitive.
//!
//! The execution engine never talks to the network itself: it hands an
//! [`ExchangeRequest`] and an [`AbortToken`] to an [`Exchange`]
//! implementation and races the returned future against its own timer and
//! cancellation. [`ReqwestExchange`] is the default implementation.

use std::fmt;

use bytes::Bytes;
use reqwest::header::{HeaderMap, AUTHORIZATION, COOKIE};
use reqwest::{Method, StatusCode};

use crate::error::BoxError;
use crate::interceptor::BoxFuture;
use crate::{AbortToken, Credentials, RequestConfig};

/// One request as handed to the exchange primitive.
#[derive(Clone, Debug)]
pub struct ExchangeRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub credentials: Credentials,
}

impl ExchangeRequest {
    pub(crate) fn from_config(config: &RequestConfig) -> Self {
        Self {
            url: config.url.clone(),
            method: config.method.clone(),
            headers: config.headers.clone(),
            body: config.body.clone(),
            credentials: config.credentials,
        }
    }
}

/// What the exchange primitive reports back once it settles.
#[derive(Clone, Debug)]
pub struct ExchangeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ExchangeResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Whether the status lies in the 2xx range.
    pub fn status_ok(&self) -> bool {
        self.status.is_success()
    }
}

/// Performs a single network round trip.
///
/// Implementations should stop work once `token` fires; the engine does not
/// depend on it and drops the returned future when it stops waiting.
pub trait Exchange: Send + Sync + 'static {
    fn perform(
        &self,
        request: ExchangeRequest,
        token: AbortToken,
    ) -> BoxFuture<'static, Result<ExchangeResponse, BoxError>>;
}

/// [`Exchange`] backed by a `reqwest::Client`.
#[derive(Clone, Default)]
pub struct ReqwestExchange {
    http: reqwest::Client,
}

impl fmt::Debug for ReqwestExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestExchange").finish_non_exhaustive()
    }
}

impl ReqwestExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client (proxies, TLS roots, pooling...).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Exchange for ReqwestExchange {
    fn perform(
        &self,
        request: ExchangeRequest,
        token: AbortToken,
    ) -> BoxFuture<'static, Result<ExchangeResponse, BoxError>> {
        let http = self.http.clone();
        Box::pin(async move {
            let mut headers = request.headers;
            if request.credentials == Credentials::Omit {
                headers.remove(COOKIE);
                headers.remove(AUTHORIZATION);
            }
            let mut builder = http.request(request.method, &request.url).headers(headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let exchange = async {
                let response = builder.send().await?;
                let status = response.status();
                let headers = response.headers().clone();
                let body = response.bytes().await?;
                Ok::<_, reqwest::Error>(ExchangeResponse {
                    status,
                    headers,
                    body,
                })
            };

            tokio::select! {
                result = exchange => result.map_err(BoxError::from),
                _ = token.aborted() => Err(BoxError::from("exchange aborted")),
            }
        })
    }
}
