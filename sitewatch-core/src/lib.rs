pub mod backup;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod feed;
pub mod gate;
pub mod metadata;
pub mod monitor;
pub mod pipeline;
pub mod poller;
pub mod rate_limit;
pub mod report;
pub mod retention;
pub mod retry;
pub mod storage;
pub mod worker;

pub use backup::BackupManager;
pub use config::Settings;
pub use dispatch::{render, DispatchReport, Dispatcher, Notification, Transport};
pub use document::{HistoryRecord, HistoryStatus, RecipientKind, StateDocument};
pub use error::{
    BackupError, ControlError, DispatchError, MetadataError, ParseError, PollError, ProcessError,
    ShutdownError, StoreError, TransportError,
};
pub use feed::{parse_sitemap, FeedSource, SitemapEntry};
pub use metadata::{HtmlMetadataFetcher, Metadata, MetadataFetcher};
pub use monitor::Monitor;
pub use pipeline::{Pipeline, ProcessOutcome};
pub use poller::{CycleOutcome, PollMode, Poller};
pub use rate_limit::RateLimiter;
pub use report::StatusReport;
pub use retry::{RetryEntry, RetryQueue, RetryStep, RetryWorker};
pub use storage::StateStore;
pub use worker::{PeriodicJob, WorkerHandle};
