pub mod automation;
pub mod config;
pub mod error;
pub mod jobs;
pub mod sqlite;
pub mod stop;
pub mod worker;

pub use automation::{
    AutomationError, AutomationResult, BrowserSession, DistributorBackend, DistributorRegistry,
    DownloadManager, FlowConnector, FlowSession, PageActor, PageDriver, ProfileManager,
    ReleaseDraft, RetryOutcome, RetryPolicy, SelectorRegistry, SessionConnector, SessionLauncher,
    SiteSession, SubmissionTicket,
};
pub use config::{load_automation_config, AutomationConfig};
pub use error::{ConfigError, Result};
pub use jobs::{JobDraft, JobRecord, JobStatus, JobStore, JobStoreBuilder, JobStoreError};
pub use stop::StopToken;
pub use worker::{
    event_channel, EventSender, UploadError, UploadOptions, UploadWorker, Worker, WorkerContext,
    WorkerEvent, WorkerHandle, WorkerLifecycle,
};
