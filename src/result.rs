use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Coarse failure classification attached to a failed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ErrorKind {
    ThrottlingError,
    ValidationError,
    AccessDeniedError,
    ModelNotFoundError,
    QuotaExceededError,
    TimeoutError,
    UnsupportedModel,
    UnsupportedOperation,
    RequestPreparationError,
    ResponseParseError,
    StreamParseError,
    StreamError,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ThrottlingError => "ThrottlingError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::AccessDeniedError => "AccessDeniedError",
            ErrorKind::ModelNotFoundError => "ModelNotFoundError",
            ErrorKind::QuotaExceededError => "QuotaExceededError",
            ErrorKind::TimeoutError => "TimeoutError",
            ErrorKind::UnsupportedModel => "UnsupportedModel",
            ErrorKind::UnsupportedOperation => "UnsupportedOperation",
            ErrorKind::RequestPreparationError => "RequestPreparationError",
            ErrorKind::ResponseParseError => "ResponseParseError",
            ErrorKind::StreamParseError => "StreamParseError",
            ErrorKind::StreamError => "StreamError",
            ErrorKind::UnknownError => "UnknownError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single inference call.
#[derive(Clone, Debug)]
pub struct InvocationResult {
    pub success: bool,
    pub start_time: Instant,
    pub end_time: Instant,
    /// Only set for streaming calls that produced content.
    pub time_to_first_token: Option<Duration>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub http_status: Option<u16>,
}

impl InvocationResult {
    pub fn succeeded(start_time: Instant, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            success: true,
            start_time,
            end_time: Instant::now(),
            time_to_first_token: None,
            input_tokens,
            output_tokens,
            error_kind: None,
            error_message: None,
            http_status: Some(200),
        }
    }

    pub fn failed(start_time: Instant, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            start_time,
            end_time: Instant::now(),
            time_to_first_token: None,
            input_tokens: 0,
            output_tokens: 0,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            http_status: None,
        }
    }

    pub fn with_ttft(mut self, ttft: Option<Duration>) -> Self {
        self.time_to_first_token = ttft;
        self
    }

    pub fn with_status(mut self, status: Option<u16>) -> Self {
        self.http_status = status;
        self
    }

    /// Never negative: `Instant` is monotonic and a failure still records both ends.
    pub fn duration(&self) -> Duration {
        self.end_time.saturating_duration_since(self.start_time)
    }
}
