//! Cloud client error types

use thiserror::Error;

/// Error codes the compute API uses for throttling. They arrive with a 4xx or
/// 503 status but must be retried, never treated as misconfiguration.
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "RequestThrottled",
    "TooManyRequestsException",
];

/// Cloud client errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CloudError {
    /// The addressed resource does not exist (a not-found shaped 4xx).
    #[error("{operation}: {code}: {message}")]
    NotFound {
        operation: String,
        code: String,
        message: String,
    },

    /// The request was rejected as malformed or unauthorized (4xx).
    #[error("{operation}: {code}: {message}")]
    Client {
        operation: String,
        code: String,
        message: String,
        status: Option<u16>,
    },

    #[error("{operation}: request throttled: {message}")]
    Throttled { operation: String, message: String },

    /// Server-side failure (5xx or unknown status).
    #[error("{operation}: {code}: {message}")]
    Service {
        operation: String,
        code: String,
        message: String,
        status: Option<u16>,
    },

    #[error("{operation}: transport error: {message}")]
    Transport { operation: String, message: String },

    /// The request could not be built locally.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

impl CloudError {
    /// Classifies a failed call from its HTTP status and service error code.
    pub fn classify(
        operation: impl Into<String>,
        status: Option<u16>,
        code: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        let operation = operation.into();
        let message = message.into();
        let code = code.unwrap_or("Unknown").to_string();

        if THROTTLING_CODES.contains(&code.as_str()) || status == Some(429) {
            return Self::Throttled { operation, message };
        }

        match status {
            Some(s) if (400..500).contains(&s) => {
                if is_not_found_code(&code) {
                    Self::NotFound {
                        operation,
                        code,
                        message,
                    }
                } else {
                    Self::Client {
                        operation,
                        code,
                        message,
                        status,
                    }
                }
            }
            _ => Self::Service {
                operation,
                code,
                message,
                status,
            },
        }
    }

    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            operation: operation.into(),
            code: "NotFound".to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// 4xx-equivalent failures: the caller's configuration is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Client { .. } | Self::InvalidRequest(_)
        )
    }

    /// Transient failures worth a requeue with backoff.
    pub fn is_retryable(&self) -> bool {
        !self.is_client_error()
    }

    /// Service error code, when the failure came from the remote API.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::NotFound { code, .. } | Self::Client { code, .. } | Self::Service { code, .. } => {
                Some(code)
            }
            _ => None,
        }
    }
}

fn is_not_found_code(code: &str) -> bool {
    code.ends_with("NotFound") || code.ends_with(".Unknown")
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Outcome of a lookup against the cloud: the resource, or a confirmed absence.
///
/// Failures stay in the `Err` arm of the surrounding [`Result`], which gives the
/// three-way `Found | NotFound | Error` split without status-code sniffing at
/// call sites.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Self::Found(value) => Lookup::Found(f(value)),
            Self::NotFound => Lookup::NotFound,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Found(v),
            None => Self::NotFound,
        }
    }
}

/// Folds a not-found error into [`Lookup::NotFound`].
pub trait LookupExt<T> {
    fn into_lookup(self) -> Result<Lookup<T>>;
}

impl<T> LookupExt<T> for Result<T> {
    fn into_lookup(self) -> Result<Lookup<T>> {
        match self {
            Ok(value) => Ok(Lookup::Found(value)),
            Err(err) if err.is_not_found() => Ok(Lookup::NotFound),
            Err(err) => Err(err),
        }
    }
}
