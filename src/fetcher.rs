use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::FetchError;

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// One decoded page of an OData collection.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Page {
    #[serde(rename = "value", default)]
    pub records: Vec<Value>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_url: Option<String>,
}

/// Something that can fetch one page of a paginated collection.
///
/// `params` are only sent with the first request of a collection: cursor
/// URLs handed out by the server already carry their query.
pub trait PageFetcher {
    fn fetch(&self, url: &str, params: &[(&str, &str)]) -> Result<Page, FetchError>;
}

impl<T: PageFetcher + ?Sized> PageFetcher for &T {
    fn fetch(&self, url: &str, params: &[(&str, &str)]) -> Result<Page, FetchError> {
        (**self).fetch(url, params)
    }
}

/// A bearer token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} chars>)", self.0.len())
    }
}

/// Blocking Microsoft Graph client.
pub struct GraphClient {
    client: Client,
    credential: Credential,
}

impl GraphClient {
    pub fn new(credential: Credential) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transient(format!("could not build HTTP client: {e}")))?;
        Ok(Self { client, credential })
    }
}

impl PageFetcher for GraphClient {
    fn fetch(&self, url: &str, params: &[(&str, &str)]) -> Result<Page, FetchError> {
        tracing::debug!(url, "GET");
        let mut request = self.client.get(url).bearer_auth(self.credential.token());
        if !params.is_empty() {
            request = request.query(params);
        }
        let response = request
            .send()
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        let response = check_status(response)?;
        response
            .json::<Page>()
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let message = error_message(response.text().unwrap_or_default(), status);
    Err(classify_status(status, retry_after, message))
}

/// Graph wraps errors as `{"error": {"code": "...", "message": "..."}}`.
fn error_message(body: String, status: StatusCode) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: Inner,
    }
    #[derive(Deserialize)]
    struct Inner {
        code: Option<String>,
        message: Option<String>,
    }

    match serde_json::from_str::<Envelope>(&body) {
        Ok(Envelope { error }) => match (error.code, error.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (Some(s), None) | (None, Some(s)) => s,
            (None, None) => status.to_string(),
        },
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => body.chars().take(200).collect(),
    }
}

pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<u64>,
    message: String,
) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED => FetchError::Auth(message),
        StatusCode::FORBIDDEN => FetchError::Forbidden(message),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after },
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            FetchError::Transient(format!("{s}: {message}"))
        }
        s => FetchError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}
