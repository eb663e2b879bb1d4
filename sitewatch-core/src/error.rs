use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed sitemap xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("sitemap document ended inside <{0}>")]
    Truncated(String),
    #[error("expected <urlset> root element, found {0}")]
    UnexpectedRoot(String),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("sitemap request returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("feed parsing error: {0}")]
    Parse(#[from] ParseError),
}

#[derive(Debug, Error)]
#[error("delivery to {recipient} failed: {reason}")]
pub struct TransportError {
    pub recipient: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid selector {0:?}")]
    Selector(String),
    #[error("page exceeds {0} bytes")]
    TooLarge(usize),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("rate limit reached: {max_per_minute} messages per minute")]
    RateLimited { max_per_minute: u32 },
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backup serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("monitor interval must be at least {min} seconds, got {got}")]
    IntervalTooShort { min: u64, got: u64 },
    #[error("{field} must be at least {min}, got {got}")]
    BelowMinimum {
        field: &'static str,
        min: u64,
        got: u64,
    },
    #[error("invalid time of day {0:?}, expected HH:MM")]
    InvalidTime(String),
    #[error("invalid source url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{kind} {name:?} already exists")]
    Duplicate { kind: &'static str, name: String },
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{0}")]
    Protected(String),
    #[error("{kind} name {name:?} is reserved")]
    Reserved { kind: &'static str, name: String },
    #[error("failed to persist state: {0}")]
    Store(#[from] StoreError),
    #[error("backup failed: {0}")]
    Backup(#[from] BackupError),
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
