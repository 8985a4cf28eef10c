use std::io;
use std::panic::AssertUnwindSafe;
use std::thread;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info};
use uuid::Uuid;

use crate::stop::StopToken;

use super::events::{EventSender, WorkerEvent};

/// Context handed to the lifecycle hooks: the outbound event channel and
/// the cooperative stop flag.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub events: EventSender,
    pub stop: StopToken,
}

/// Lifecycle contract for a long-running background operation.
///
/// Implementors supply the three hooks; [`Worker::start`] guarantees that
/// `release` runs for every acquired resource no matter how `execute`
/// ends — normal return, error, or panic — and that exactly one terminal
/// [`WorkerEvent::QueueFinished`] closes the run.
#[async_trait]
pub trait WorkerLifecycle: Send + 'static {
    type Resource: Send;
    type Error: std::fmt::Display + Send;

    async fn acquire(&mut self, ctx: &WorkerContext) -> Result<Self::Resource, Self::Error>;

    async fn execute(
        &mut self,
        resource: &mut Self::Resource,
        ctx: &WorkerContext,
    ) -> Result<(), Self::Error>;

    async fn release(&mut self, resource: Self::Resource, ctx: &WorkerContext);
}

/// A not-yet-started worker. Starting consumes it: workers run once and
/// are not restartable.
pub struct Worker<L: WorkerLifecycle> {
    name: String,
    lifecycle: L,
    events: EventSender,
    stop: StopToken,
}

impl<L: WorkerLifecycle> Worker<L> {
    pub fn new(name: impl Into<String>, lifecycle: L, events: EventSender) -> Self {
        Self {
            name: name.into(),
            lifecycle,
            events,
            stop: StopToken::new(),
        }
    }

    /// Share a pre-made stop token, e.g. to wire one cancel control to
    /// several workers.
    pub fn with_stop(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Spawn the dedicated worker thread and run the lifecycle on it.
    pub fn start(self) -> io::Result<WorkerHandle> {
        let Worker {
            name,
            mut lifecycle,
            events,
            stop,
        } = self;
        let token = stop.clone();
        let worker_name = name.clone();

        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    events.error(&worker_name, format!("failed to start worker runtime: {err}"));
                    events.send(WorkerEvent::QueueFinished);
                    return;
                }
            };

            runtime.block_on(async move {
                let run_id = Uuid::new_v4();
                let ctx = WorkerContext {
                    events: events.clone(),
                    stop,
                };
                info!(worker = %worker_name, run_id = %run_id, "worker run starting");

                match lifecycle.acquire(&ctx).await {
                    Ok(mut resource) => {
                        let outcome =
                            AssertUnwindSafe(lifecycle.execute(&mut resource, &ctx))
                                .catch_unwind()
                                .await;
                        match outcome {
                            Ok(Ok(())) => {
                                info!(worker = %worker_name, run_id = %run_id, "worker body completed");
                            }
                            Ok(Err(err)) => {
                                error!(worker = %worker_name, run_id = %run_id, error = %err, "worker body failed");
                                ctx.events.send(WorkerEvent::Error {
                                    context: worker_name.clone(),
                                    message: err.to_string(),
                                });
                            }
                            Err(panic) => {
                                let message = panic_message(panic);
                                error!(worker = %worker_name, run_id = %run_id, "worker body panicked: {message}");
                                ctx.events.send(WorkerEvent::Error {
                                    context: worker_name.clone(),
                                    message: format!("worker panicked: {message}"),
                                });
                            }
                        }
                        lifecycle.release(resource, &ctx).await;
                    }
                    Err(err) => {
                        error!(worker = %worker_name, run_id = %run_id, error = %err, "worker failed to acquire resources");
                        ctx.events.send(WorkerEvent::Error {
                            context: worker_name.clone(),
                            message: err.to_string(),
                        });
                    }
                }

                ctx.events.send(WorkerEvent::QueueFinished);
                info!(worker = %worker_name, run_id = %run_id, "worker run finished");
            });
        })?;

        Ok(WorkerHandle {
            name,
            stop: token,
            thread: Some(thread),
        })
    }
}

/// Control handle for a running worker. Stopping is fire-and-forget;
/// callers await completion by joining or by watching for the terminal
/// event, never through a synchronous return.
pub struct WorkerHandle {
    name: String,
    stop: StopToken,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request_stop(&self) {
        self.stop.request();
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| thread.is_finished())
            .unwrap_or(true)
    }

    /// Block until the worker thread exits.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
