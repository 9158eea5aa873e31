//! Request/response interceptor chains and error observers.
//!
//! Four insertion-ordered, additive-only lists are kept per service:
//! request transforms, response transforms, request-error observers and
//! response-error observers. Transforms run one after another, each getting
//! the previous stage's output. Observers are side effects only: every one
//! of them is invoked, and a panicking observer does not stop the others or
//! the error it was told about.
//!
//! # Example
//!
//! ```no_run
//! use fetch_service::{Endpoint, GlobalConfig, Service};
//! use reqwest::header::HeaderValue;
//!
//! let service = Service::new(GlobalConfig::new("https://api.example.com"), [
//!     ("me", Endpoint::get("me")),
//! ]);
//!
//! service.interceptors().request().add(|mut config| async move {
//!     config.headers.insert("authorization", HeaderValue::from_static("Bearer t"));
//!     Ok(config)
//! });
//! service.interceptors().response().on_error(|err| eprintln!("request failed: {err}"));
//! ```

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::{Error, RequestConfig, Response, Result};

/// Type alias for a boxed future returning a result.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type RequestStage = Arc<dyn Fn(RequestConfig) -> BoxFuture<'static, Result<RequestConfig>> + Send + Sync>;
type ResponseStage = Arc<dyn Fn(Response) -> BoxFuture<'static, Result<Response>> + Send + Sync>;
type ErrorObserver = Arc<dyn Fn(&Error) + Send + Sync>;

/// Interceptor lists owned by one service instance.
#[derive(Default)]
pub struct Interceptors {
    request: RwLock<Vec<RequestStage>>,
    response: RwLock<Vec<ResponseStage>>,
    request_error: RwLock<Vec<ErrorObserver>>,
    response_error: RwLock<Vec<ErrorObserver>>,
}

impl std::fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptors")
            .field("request", &snapshot(&self.request).len())
            .field("response", &snapshot(&self.response).len())
            .field("request_error", &snapshot(&self.request_error).len())
            .field("response_error", &snapshot(&self.response_error).len())
            .finish()
    }
}

/// Registration handle for the request chain.
pub struct RequestInterceptors<'a>(&'a Interceptors);

/// Registration handle for the response chain.
pub struct ResponseInterceptors<'a>(&'a Interceptors);

impl Interceptors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) -> RequestInterceptors<'_> {
        RequestInterceptors(self)
    }

    pub fn response(&self) -> ResponseInterceptors<'_> {
        ResponseInterceptors(self)
    }

    /// Runs the request chain. A rejection stops the chain and is reported
    /// to every request-error observer before being returned.
    pub(crate) async fn run_request(&self, mut config: RequestConfig) -> Result<RequestConfig> {
        for stage in snapshot(&self.request) {
            match stage(config).await {
                Ok(next) => config = next,
                Err(err) => {
                    notify(&snapshot(&self.request_error), &err);
                    return Err(err);
                }
            }
        }
        Ok(config)
    }

    /// Runs the response chain. Rejections are returned to the caller, which
    /// reports them through its [`ErrorDebounce`].
    pub(crate) async fn run_response(&self, mut response: Response) -> Result<Response> {
        for stage in snapshot(&self.response) {
            response = stage(response).await?;
        }
        Ok(response)
    }

    pub(crate) fn notify_response_error(&self, err: &Error) {
        notify(&snapshot(&self.response_error), err);
    }
}

impl RequestInterceptors<'_> {
    /// Appends a request transform.
    pub fn add<F, Fut>(&self, stage: F) -> &Self
    where
        F: Fn(RequestConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RequestConfig>> + Send + 'static,
    {
        let wrapped: RequestStage =
            Arc::new(move |config| -> BoxFuture<'static, Result<RequestConfig>> {
                Box::pin(stage(config))
            });
        write(&self.0.request).push(wrapped);
        self
    }

    /// Appends a request transform together with a request-error observer.
    pub fn add_with_error<F, Fut, E>(&self, stage: F, on_error: E) -> &Self
    where
        F: Fn(RequestConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RequestConfig>> + Send + 'static,
        E: Fn(&Error) + Send + Sync + 'static,
    {
        self.add(stage);
        self.on_error(on_error)
    }

    /// Appends a request-error observer.
    pub fn on_error<E>(&self, observer: E) -> &Self
    where
        E: Fn(&Error) + Send + Sync + 'static,
    {
        write(&self.0.request_error).push(Arc::new(observer));
        self
    }
}

impl ResponseInterceptors<'_> {
    /// Appends a response transform.
    pub fn add<F, Fut>(&self, stage: F) -> &Self
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let wrapped: ResponseStage =
            Arc::new(move |response| -> BoxFuture<'static, Result<Response>> {
                Box::pin(stage(response))
            });
        write(&self.0.response).push(wrapped);
        self
    }

    /// Appends a response transform together with a response-error observer.
    pub fn add_with_error<F, Fut, E>(&self, stage: F, on_error: E) -> &Self
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
        E: Fn(&Error) + Send + Sync + 'static,
    {
        self.add(stage);
        self.on_error(on_error)
    }

    /// Appends a response-error observer.
    pub fn on_error<E>(&self, observer: E) -> &Self
    where
        E: Fn(&Error) + Send + Sync + 'static,
    {
        write(&self.0.response_error).push(Arc::new(observer));
        self
    }
}

/// Collapses repeated failure reports of one call into a single round of
/// response-error observers per window.
#[derive(Debug)]
pub(crate) struct ErrorDebounce {
    window: Duration,
    last: Option<Instant>,
}

impl ErrorDebounce {
    pub(crate) fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Reports `err` unless a report was already made within the window.
    /// Returns whether observers ran.
    pub(crate) fn report(&mut self, interceptors: &Interceptors, err: &Error) -> bool {
        let now = Instant::now();
        if self
            .last
            .is_some_and(|last| now.duration_since(last) < self.window)
        {
            return false;
        }
        self.last = Some(now);
        interceptors.notify_response_error(err);
        true
    }
}

fn notify(observers: &[ErrorObserver], err: &Error) {
    for observer in observers {
        if catch_unwind(AssertUnwindSafe(|| observer(err))).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %err, "error observer panicked");
        }
    }
}

fn snapshot<T: Clone>(list: &RwLock<Vec<T>>) -> Vec<T> {
    list.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write<T>(list: &RwLock<Vec<T>>) -> std::sync::RwLockWriteGuard<'_, Vec<T>> {
    list.write().unwrap_or_else(PoisonError::into_inner)
}
