use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::Method;
use serde::Serialize;

use crate::abort::AbortCoordinator;
use crate::execute::Execution;
use crate::{
    resolve, AbortReason, AbortToken, CallConfig, Endpoint, Error, Exchange, GlobalConfig,
    Interceptors, PendingRegistry, ReqwestExchange, Response, Result,
};

struct ServiceContext {
    global: GlobalConfig,
    endpoints: HashMap<String, Arc<Endpoint>>,
    pending: PendingRegistry,
    interceptors: Interceptors,
    exchange: Arc<dyn Exchange>,
}

impl ServiceContext {
    async fn execute(&self, endpoint: &Endpoint, call: &CallConfig, token: AbortToken) -> Result<Response> {
        let config = resolve(&self.global, endpoint, call)?;
        let aborts = AbortCoordinator::new(token);
        Execution {
            exchange: self.exchange.as_ref(),
            interceptors: &self.interceptors,
            pending: &self.pending,
        }
        .run(config, &aborts)
        .await
    }
}

/// A configured set of named endpoints sharing one global configuration,
/// one pending-request registry and one set of interceptors.
///
/// Cloning is cheap; clones share all state.
///
/// # Example
///
/// ```no_run
/// use fetch_service::{CallConfig, Endpoint, GlobalConfig, Service};
///
/// # async fn run() -> fetch_service::Result<()> {
/// let service = Service::new(
///     GlobalConfig::new("https://api.example.com"),
///     [("user", Endpoint::get("users"))],
/// );
///
/// let call = service.endpoint("user", CallConfig::new().path("42"))?;
/// let response = call.send(CallConfig::new()).await?;
/// println!("{}", response.data);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceContext>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.inner.endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Service")
            .field("base_url", &self.inner.global.base_url)
            .field("endpoints", &names)
            .field("pending", &self.inner.pending)
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Creates a service that performs exchanges with [`ReqwestExchange`].
    pub fn new<I, K>(global: GlobalConfig, endpoints: I) -> Self
    where
        I: IntoIterator<Item = (K, Endpoint)>,
        K: Into<String>,
    {
        Self::with_exchange(global, endpoints, ReqwestExchange::new())
    }

    /// Creates a service over a caller-provided exchange primitive.
    pub fn with_exchange<I, K>(global: GlobalConfig, endpoints: I, exchange: impl Exchange) -> Self
    where
        I: IntoIterator<Item = (K, Endpoint)>,
        K: Into<String>,
    {
        let endpoints = endpoints
            .into_iter()
            .map(|(name, endpoint)| (name.into(), Arc::new(endpoint)))
            .collect();
        Self {
            inner: Arc::new(ServiceContext {
                global,
                endpoints,
                pending: PendingRegistry::new(),
                interceptors: Interceptors::new(),
                exchange: Arc::new(exchange),
            }),
        }
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.inner.global
    }

    pub fn interceptors(&self) -> &Interceptors {
        &self.inner.interceptors
    }

    /// Requests currently holding a deduplication slot.
    pub fn pending(&self) -> &PendingRegistry {
        &self.inner.pending
    }

    pub fn has_endpoint(&self, name: &str) -> bool {
        self.inner.endpoints.contains_key(name)
    }

    /// Returns a handle for the named endpoint with `config` applied to
    /// every send made through it.
    pub fn endpoint(&self, name: &str, config: CallConfig) -> Result<Call> {
        let endpoint = self
            .inner
            .endpoints
            .get(name)
            .cloned()
            .ok_or_else(|| Error::build(format!("unknown endpoint `{name}`")))?;
        Ok(Call::new(Arc::clone(&self.inner), endpoint, config))
    }

    /// Sends an ad-hoc request. `url` is joined to the base URL unless it is
    /// absolute.
    pub async fn request(&self, method: Method, url: &str, config: CallConfig) -> Result<Response> {
        let endpoint = Arc::new(Endpoint::new(method, url));
        Call::new(Arc::clone(&self.inner), endpoint, config)
            .send(CallConfig::new())
            .await
    }

    pub async fn get(&self, url: &str, config: CallConfig) -> Result<Response> {
        self.request(Method::GET, url, config).await
    }

    pub async fn delete(&self, url: &str, config: CallConfig) -> Result<Response> {
        self.request(Method::DELETE, url, config).await
    }

    pub async fn head(&self, url: &str, config: CallConfig) -> Result<Response> {
        self.request(Method::HEAD, url, config).await
    }

    pub async fn options(&self, url: &str, config: CallConfig) -> Result<Response> {
        self.request(Method::OPTIONS, url, config).await
    }

    pub async fn post(&self, url: &str, body: impl Serialize, config: CallConfig) -> Result<Response> {
        self.request(Method::POST, url, with_body(body, config)?).await
    }

    pub async fn put(&self, url: &str, body: impl Serialize, config: CallConfig) -> Result<Response> {
        self.request(Method::PUT, url, with_body(body, config)?).await
    }

    pub async fn patch(&self, url: &str, body: impl Serialize, config: CallConfig) -> Result<Response> {
        self.request(Method::PATCH, url, with_body(body, config)?).await
    }
}

fn with_body(body: impl Serialize, config: CallConfig) -> Result<CallConfig> {
    let body = serde_json::to_value(body)
        .map_err(|err| Error::build(format!("failed to serialize request body: {err}")))?;
    Ok(config.body(body))
}

/// Handle to one endpoint, returned by [`Service::endpoint`].
///
/// [`Call::send`] may be invoked any number of times; [`Call::abort`]
/// cancels the most recent send if it has not settled yet.
#[derive(Clone)]
pub struct Call {
    ctx: Arc<ServiceContext>,
    endpoint: Arc<Endpoint>,
    config: CallConfig,
    current: Arc<Mutex<Option<AbortToken>>>,
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.endpoint.method)
            .field("path", &self.endpoint.path)
            .finish_non_exhaustive()
    }
}

impl Call {
    fn new(ctx: Arc<ServiceContext>, endpoint: Arc<Endpoint>, config: CallConfig) -> Self {
        Self {
            ctx,
            endpoint,
            config,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts a send with `overrides` layered over the handle's config.
    ///
    /// The send is registered with the handle as soon as this returns, so an
    /// [`abort`](Self::abort) issued before the future is first polled still
    /// cancels it.
    pub fn send(&self, overrides: CallConfig) -> impl Future<Output = Result<Response>> + Send + 'static {
        let token = AbortToken::new();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());

        let ctx = Arc::clone(&self.ctx);
        let endpoint = Arc::clone(&self.endpoint);
        let call = self.config.merged_with(overrides);
        async move { ctx.execute(&endpoint, &call, token).await }
    }

    /// Cancels the most recent send. Does nothing before the first send or
    /// after that send has settled.
    pub fn abort(&self) {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = current.as_ref() {
            token.abort(AbortReason::User);
        }
    }
}
