//! Drives one `send` from the effective configuration to a settled result.
//!
//! ```text
//! Building ──► Sending ──► Succeeded
//!                │  ▲
//!                │  ├── TimeoutRetry (timer fired, fresh exchange token)
//!                │  └── RetryWait    (exchange failed, sleep retry_interval)
//!                ├──► Failed   (budget exhausted / non-retryable)
//!                └──► Aborted  (call token triggered)
//! ```
//!
//! The timeout budget and the failure budget are counted separately. Every
//! wait is a `select!` against the call token, and losing branches are
//! dropped, so no timer outlives the state that armed it.

use std::sync::Arc;
use std::time::Duration;

use crate::abort::AbortCoordinator;
use crate::error::BoxError;
use crate::exchange::{Exchange, ExchangeRequest, ExchangeResponse};
use crate::interceptor::{ErrorDebounce, Interceptors};
use crate::pending::PendingRegistry;
use crate::response::{decode_body, decode_lenient, status_text};
use crate::{AbortReason, AbortToken, Error, RequestConfig, Response, Result};

/// Per-send counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct AttemptState {
    pub(crate) exchanges: u32,
    pub(crate) retries: u32,
    pub(crate) timeout_retries: u32,
}

enum Settled {
    Exchanged(ExchangeResponse),
    Failed(BoxError),
    TimedOut,
    Aborted,
}

/// Borrowed view of the service context needed to run one call.
pub(crate) struct Execution<'a> {
    pub(crate) exchange: &'a dyn Exchange,
    pub(crate) interceptors: &'a Interceptors,
    pub(crate) pending: &'a PendingRegistry,
}

impl Execution<'_> {
    pub(crate) async fn run(&self, config: RequestConfig, aborts: &AbortCoordinator) -> Result<Response> {
        // Building
        let config = Arc::new(self.interceptors.run_request(config).await?);
        let call_token = aborts.call_token();

        // An already-cancelled call still hands its first exchange to the
        // primitive, which settles it as aborted below, but it must not
        // evict a live identical request.
        let _pending = (config.cancel_repeated_requests && !call_token.is_aborted())
            .then(|| self.pending.claim(config.signature(), call_token.clone()));

        let request = ExchangeRequest::from_config(&config);
        let mut state = AttemptState::default();
        let mut debounce = ErrorDebounce::new(config.error_debounce);
        let mut token = aborts.current();

        loop {
            // Sending
            state.exchanges += 1;
            #[cfg(feature = "tracing")]
            tracing::trace!(url = %config.url, method = %config.method, exchange = state.exchanges, "sending");

            let exchange = self.exchange.perform(request.clone(), token.clone());
            let settled = tokio::select! {
                biased;
                _ = call_token.aborted() => Settled::Aborted,
                result = exchange => match result {
                    Ok(response) => Settled::Exchanged(response),
                    Err(source) => Settled::Failed(source),
                },
                _ = arm_timer(config.timeout) => Settled::TimedOut,
            };

            let failure = match settled {
                Settled::Aborted => return Err(aborted(call_token).with_config(config)),
                Settled::TimedOut => {
                    token = aborts.supersede_current(AbortReason::Timeout);
                    if config.timeout_retry && state.timeout_retries < config.timeout_retry_count {
                        state.timeout_retries += 1;
                        #[cfg(feature = "tracing")]
                        tracing::debug!(url = %config.url, attempt = state.timeout_retries, "timeout retry");
                        continue;
                    }
                    let timeout_ms = u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX);
                    let err = Error::timeout(timeout_ms).with_config(Arc::clone(&config));
                    return Err(self.fail(&mut debounce, err));
                }
                _ if token.is_aborted() => {
                    return Err(aborted(&token).with_config(config));
                }
                Settled::Exchanged(raw) => {
                    if config.validate_status.accepts(raw.status) {
                        return match self.complete(raw, &config).await {
                            Ok(response) => Ok(response),
                            Err(err) => {
                                let err = err.with_config(Arc::clone(&config));
                                Err(self.fail(&mut debounce, err))
                            }
                        };
                    }
                    Error::from_status(into_response(raw, decode_lenient_body, &config))
                }
                Settled::Failed(source) => Error::network(source).with_config(Arc::clone(&config)),
            };

            if config.retry && state.retries < config.retry_count {
                state.retries += 1;
                #[cfg(feature = "tracing")]
                tracing::debug!(url = %config.url, attempt = state.retries, error = %failure, "retrying after failure");
                tokio::select! {
                    biased;
                    _ = call_token.aborted() => return Err(aborted(call_token).with_config(config)),
                    _ = tokio::time::sleep(config.retry_interval) => continue,
                }
            }
            return Err(self.fail(&mut debounce, failure));
        }
    }

    /// Decodes, transforms and runs the response chain over a successful exchange.
    async fn complete(&self, raw: ExchangeResponse, config: &Arc<RequestConfig>) -> Result<Response> {
        let data = decode_body(&raw.body, config.response_type)?;
        let data = config
            .transform_response
            .apply(data)
            .map_err(|err| Error::decode(format!("response transform failed: {err}")))?;
        let response = into_response(raw, |_| data, config);
        self.interceptors.run_response(response).await
    }

    fn fail(&self, debounce: &mut ErrorDebounce, err: Error) -> Error {
        debounce.report(self.interceptors, &err);
        err
    }
}

async fn arm_timer(timeout: Duration) {
    if timeout.is_zero() {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(timeout).await;
    }
}

fn aborted(token: &AbortToken) -> Error {
    let reason = token.reason().unwrap_or(AbortReason::User);
    #[cfg(feature = "tracing")]
    tracing::debug!(%reason, "request aborted");
    Error::aborted(reason)
}

fn decode_lenient_body(raw: &ExchangeResponse) -> serde_json::Value {
    decode_lenient(&raw.body)
}

fn into_response(
    raw: ExchangeResponse,
    data: impl FnOnce(&ExchangeResponse) -> serde_json::Value,
    config: &Arc<RequestConfig>,
) -> Response {
    let data = data(&raw);
    Response {
        data,
        status_text: status_text(raw.status),
        status: raw.status,
        headers: raw.headers,
        body: raw.body,
        config: Arc::clone(config),
    }
}
