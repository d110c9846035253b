use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing environment variable {0}")]
    MissingVar(String),
    #[error("invalid value for {key}: {value:?}")]
    InvalidVar { key: String, value: String },
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("failed to load .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no response to {method} {url} after {attempts} attempts")]
    NoResponse {
        method: &'static str,
        url: String,
        attempts: u32,
    },
    #[error("HTTP status {code} from {url}")]
    Status { code: u16, url: String },
    #[error("malformed JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),
    #[error("roster query for fleet {fleet} failed: {reason}")]
    Roster { fleet: String, reason: String },

    #[error("portal unavailable: {0}")]
    Unavailable(String),
    #[error("portal returned 503 and no proxies are configured")]
    NoProxies,
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}
