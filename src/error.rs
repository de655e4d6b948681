use thiserror::Error;

/// Failure of a single page request against the chat service.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The bearer token is invalid or expired. Fatal for the whole run.
    #[error("credential rejected: {0}")]
    Auth(String),

    /// The service refuses this particular resource (e.g. a policy-blocked chat).
    #[error("access forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited by the server{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<u64> },

    /// Any other non-success status that retrying will not fix.
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Network failures, timeouts and 5xx responses.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("could not decode response: {0}")]
    Decode(String),
}

fn retry_hint(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) => format!(" (retry after {secs}s)"),
        None => String::new(),
    }
}

impl FetchError {
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Auth(_))
    }
}

/// Failure that ends the download of one conversation.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{0:#}")]
    Io(eyre::Report),
}

impl DownloadError {
    pub fn is_auth(&self) -> bool {
        matches!(self, DownloadError::Fetch(e) if e.is_auth())
    }
}

impl From<eyre::Report> for DownloadError {
    fn from(report: eyre::Report) -> Self {
        DownloadError::Io(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_message_mentions_retry_after() {
        let err = FetchError::RateLimited {
            retry_after: Some(30),
        };
        assert_eq!(err.to_string(), "rate limited by the server (retry after 30s)");
        let err = FetchError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "rate limited by the server");
    }

    #[test]
    fn auth_is_detected_through_download_error() {
        let err: DownloadError = FetchError::Auth("expired".into()).into();
        assert!(err.is_auth());
        let err: DownloadError = FetchError::Forbidden("policy".into()).into();
        assert!(!err.is_auth());
        let err: DownloadError = eyre::eyre!("disk full").into();
        assert!(!err.is_auth());
    }
}
