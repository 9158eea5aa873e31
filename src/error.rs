use std::sync::Arc;

use reqwest::StatusCode;

use crate::response::{is_client_error, is_retryable_status, is_server_error};
use crate::{AbortReason, RequestConfig, Response};

/// Boxed error used as the source of network failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classified cause of a failed call.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Configuration, serialization or request-interceptor failure before
    /// any exchange was issued. Never retried.
    #[error("build error: {0}")]
    Build(String),
    /// The local timer elapsed before the exchange settled.
    #[error("timeout of {timeout_ms}ms exceeded")]
    Timeout { timeout_ms: u64 },
    /// The exchange primitive itself failed.
    #[error("network error: {source}")]
    Network {
        #[source]
        source: BoxError,
    },
    /// The exchange settled but the status predicate rejected it.
    #[error("Request failed with status {status}: {status_text}")]
    Status {
        status: u16,
        status_text: String,
        response: Box<Response>,
    },
    /// The response body could not be decoded or transformed.
    #[error("decode error: {0}")]
    Decode(String),
    /// The call was cancelled before it settled.
    #[error("request aborted: {0}")]
    Aborted(AbortReason),
    /// Rejection raised by a request or response interceptor of its own
    /// accord. The engine never produces this kind itself.
    #[error("interceptor error: {0}")]
    Interceptor(String),
}

/// Error type returned by this crate.
///
/// Carries the [`ErrorKind`] and, once known, the effective configuration
/// the failing call ran with.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
    config: Option<Arc<RequestConfig>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, config: None }
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Build(message.into()))
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(ErrorKind::Timeout { timeout_ms })
    }

    pub fn network(source: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Network {
            source: source.into(),
        })
    }

    pub fn from_status(response: Response) -> Self {
        let status = response.status.as_u16();
        let status_text = response.status_text.clone();
        let config = Some(Arc::clone(&response.config));
        Self {
            kind: ErrorKind::Status {
                status,
                status_text,
                response: Box::new(response),
            },
            config,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode(message.into()))
    }

    pub fn aborted(reason: AbortReason) -> Self {
        Self::new(ErrorKind::Aborted(reason))
    }

    pub fn interceptor(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Interceptor(message.into()))
    }

    /// Attaches the effective configuration unless one is already present.
    pub fn with_config(mut self, config: Arc<RequestConfig>) -> Self {
        if self.config.is_none() {
            self.config = Some(config);
        }
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn config(&self) -> Option<&RequestConfig> {
        self.config.as_deref()
    }

    pub fn response(&self) -> Option<&Response> {
        match &self.kind {
            ErrorKind::Status { response, .. } => Some(&**response),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|response| response.status)
    }

    pub fn status_text(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Status { status_text, .. } => Some(status_text),
            _ => None,
        }
    }

    /// Classifier string such as `ERR_HTTP_404` or `ERR_TIMEOUT`.
    pub fn code(&self) -> String {
        match &self.kind {
            ErrorKind::Build(_) => "ERR_BUILD".to_owned(),
            ErrorKind::Timeout { .. } => "ERR_TIMEOUT".to_owned(),
            ErrorKind::Network { .. } => "ERR_NETWORK".to_owned(),
            ErrorKind::Status { status, .. } => format!("ERR_HTTP_{status}"),
            ErrorKind::Decode(_) => "ERR_DECODE".to_owned(),
            ErrorKind::Aborted(_) => "ERR_CANCELED".to_owned(),
            ErrorKind::Interceptor(_) => "ERR_INTERCEPTOR".to_owned(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.kind, ErrorKind::Aborted(_))
    }

    pub fn is_status(&self) -> bool {
        matches!(self.kind, ErrorKind::Status { .. })
    }

    pub fn is_network(&self) -> bool {
        matches!(self.kind, ErrorKind::Network { .. })
    }

    pub fn is_build(&self) -> bool {
        matches!(self.kind, ErrorKind::Build(_))
    }

    /// Whether sending the same request again may succeed: network
    /// failures, timeouts and the statuses of [`is_retryable_status`].
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            ErrorKind::Network { .. } | ErrorKind::Timeout { .. } => true,
            ErrorKind::Status { .. } => self.status().is_some_and(is_retryable_status),
            _ => false,
        }
    }

    /// 401 or 403.
    pub fn is_auth(&self) -> bool {
        self.status()
            .is_some_and(|status| status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN)
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(is_client_error)
    }

    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(is_server_error)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}
