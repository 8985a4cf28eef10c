mod base;
mod events;
mod upload;

pub use base::{Worker, WorkerContext, WorkerHandle, WorkerLifecycle};
pub use events::{event_channel, EventSender, WorkerEvent};
pub use upload::{UploadError, UploadOptions, UploadWorker};
