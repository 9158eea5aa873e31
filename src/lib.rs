//! `fetch-service` turns a map of declared endpoints into async call handles
//! with bounded timeout retry, bounded failure retry, in-flight request
//! deduplication and ordered interceptor pipelines.
//!
//! The main entry points are:
//! - [`Service::new`] / [`Service::with_exchange`]
//! - [`Service::endpoint`] returning a [`Call`] with [`Call::send`] and [`Call::abort`]
//! - the convenience verbs [`Service::get`], [`Service::post`], ...
//! - the join helpers [`all`] and [`race`]
//! - [`ErrorReporter`] and the standalone [`retry_with_backoff`] helpers
//!
//! Configuration is resolved per field as call > endpoint > global > default
//! (see [`resolve`]).

mod abort;
mod backoff;
mod endpoint;
mod error;
mod exchange;
mod execute;
mod format;
mod interceptor;
mod join;
mod options;
mod pending;
mod report;
mod resolve;
mod response;
mod service;

pub mod transform;

pub use abort::{AbortReason, AbortToken};
pub use backoff::{retry_with_backoff, retry_with_exponential_backoff, retry_with_linear_backoff, Backoff};
pub use endpoint::{CallConfig, DataType, Endpoint, ResponseType};
pub use error::{BoxError, Error, ErrorKind};
pub use exchange::{Exchange, ExchangeRequest, ExchangeResponse, ReqwestExchange};
pub use format::{format_body, serialize_query, FormattedBody};
pub use interceptor::{BoxFuture, Interceptors, RequestInterceptors, ResponseInterceptors};
pub use join::{all, race};
pub use options::{Credentials, GlobalConfig, PolicyOverrides, DEFAULT_ERROR_DEBOUNCE, DEFAULT_TIMEOUT};
pub use pending::PendingRegistry;
pub use report::{ErrorReporter, HandlerId};
pub use resolve::{build_url, resolve, RequestConfig};
pub use response::{
    is_client_error, is_forbidden, is_informational, is_rate_limited, is_redirection,
    is_retryable_status, is_server_error, is_success, requires_auth, Response, StatusValidator,
};
pub use service::{Call, Service};
pub use transform::TransformerPipeline;

pub type Result<T> = std::result::Result<T, Error>;
