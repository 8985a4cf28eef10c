mod actor;
mod distributor;
mod download;
mod driver;
mod error;
mod profile;
mod registry;
mod retry;
mod session;

pub use actor::PageActor;
pub use distributor::{DistroKid, DistributorBackend, DistributorRegistry, ReleaseDraft};
pub use download::DownloadManager;
pub use driver::{BrowserSession, CdpPage, PageDriver, SessionLauncher};
pub use error::{AutomationError, AutomationResult};
pub use profile::ProfileManager;
pub use registry::SelectorRegistry;
pub use retry::{retry_call, RetryOutcome, RetryPolicy, RetryableError};
pub use session::{
    FlowConnector, FlowSession, SessionConnector, SiteSession, SubmissionTicket,
};
