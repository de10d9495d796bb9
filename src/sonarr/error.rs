//! Manager API error types.
//!
//! The taxonomy distinguishes errors by how the caller should react:
//!
//! - **Transient** failures (connection errors, timeouts, 5xx, 429) are
//!   retried with backoff and then deferred to the next scan.
//! - **Unauthorized** is fatal against the manager; no retry will fix a bad
//!   API key.
//! - **NotFound** is benign for stale references (the queue moved on).
//! - **Conflict** means a mutation raced the manager (the item is already
//!   gone) and is treated as success by callers that remove things.
//! - Everything else that cannot be classified coerces to `Transient` so the
//!   retry layer gets a chance.

use std::time::Duration;

use thiserror::Error;

/// An error from the manager's HTTP API, categorized for retry decisions.
#[derive(Debug, Error)]
pub enum SonarrError {
    /// The referenced resource does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The manager rejected our API key (HTTP 401/403).
    #[error("manager rejected the API key")]
    Unauthorized,

    /// A retriable failure: connection error, timeout, 5xx, or 429.
    #[error("transient manager error: {message}")]
    Transient {
        status: Option<u16>,
        message: String,
        /// Honored `Retry-After` from a 429, if the manager sent one.
        retry_after: Option<Duration>,
    },

    /// A non-retriable request rejection (4xx other than 401/403/404/409/429).
    #[error("permanent manager error (HTTP {status}): {message}")]
    PermanentServer { status: u16, message: String },

    /// The response body could not be decoded as the expected shape.
    #[error("malformed manager response: {0}")]
    Malformed(String),

    /// The mutation target is already gone (HTTP 409, or 404 on delete).
    #[error("conflict: target already gone")]
    Conflict,

    /// A mutating call was attempted without a required identifier.
    #[error("refusing to mutate: missing {0}")]
    MissingIdentifier(&'static str),
}

impl SonarrError {
    /// Whether the retry layer should try again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SonarrError::Transient { .. })
    }

    /// The server-requested retry delay, when one was supplied.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SonarrError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Categorizes an HTTP error status.
    ///
    /// `retry_after` is only meaningful for 429 and ignored otherwise.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => SonarrError::Unauthorized,
            404 => SonarrError::NotFound(message),
            409 => SonarrError::Conflict,
            429 => SonarrError::Transient {
                status: Some(429),
                message,
                retry_after,
            },
            500..=599 => SonarrError::Transient {
                status: Some(status),
                message,
                retry_after: None,
            },
            _ => SonarrError::PermanentServer { status, message },
        }
    }

    /// Categorizes a request-level failure from the HTTP client.
    ///
    /// Body-decode errors are `Malformed`; anything else (connect, timeout,
    /// protocol) is `Transient`.
    pub fn from_request(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return SonarrError::Malformed(err.to_string());
        }
        SonarrError::Transient {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            retry_after: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_unauthorized() {
        assert!(matches!(
            SonarrError::from_status(401, String::new(), None),
            SonarrError::Unauthorized
        ));
        assert!(matches!(
            SonarrError::from_status(403, String::new(), None),
            SonarrError::Unauthorized
        ));
    }

    #[test]
    fn server_errors_are_retriable() {
        for status in [500, 502, 503, 599] {
            let err = SonarrError::from_status(status, "boom".into(), None);
            assert!(err.is_retriable(), "HTTP {status} should be retriable");
        }
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = SonarrError::from_status(429, "slow down".into(), Some(Duration::from_secs(7)));
        assert!(err.is_retriable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn client_errors_do_not_retry() {
        let err = SonarrError::from_status(422, "bad body".into(), None);
        assert!(!err.is_retriable());
        assert!(matches!(err, SonarrError::PermanentServer { status: 422, .. }));
    }

    #[test]
    fn not_found_and_conflict_are_distinct_and_final() {
        assert!(matches!(
            SonarrError::from_status(404, "gone".into(), None),
            SonarrError::NotFound(_)
        ));
        assert!(matches!(
            SonarrError::from_status(409, String::new(), None),
            SonarrError::Conflict
        ));
    }

    #[test]
    fn retry_after_is_none_outside_transient() {
        assert_eq!(SonarrError::Unauthorized.retry_after(), None);
        assert_eq!(
            SonarrError::MissingIdentifier("downloadId").retry_after(),
            None
        );
    }
}
