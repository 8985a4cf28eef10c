use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use songfactory_core::automation::{
    AutomationError, AutomationResult, SessionConnector, SiteSession, SubmissionTicket,
};
use songfactory_core::jobs::{JobDraft, JobRecord, JobStatus, JobStore};
use songfactory_core::stop::StopToken;
use songfactory_core::worker::{
    event_channel, UploadOptions, UploadWorker, Worker, WorkerEvent,
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Default)]
struct ScriptedSession {
    authenticated: bool,
    login_succeeds: bool,
    fail_submit_for: HashSet<i64>,
    stop_after_successes: Option<usize>,
    stop: Option<StopToken>,
    successes: usize,
    submitted: Arc<Mutex<Vec<i64>>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl SiteSession for ScriptedSession {
    async fn is_authenticated(&mut self) -> AutomationResult<bool> {
        Ok(self.authenticated)
    }

    async fn begin_login(&mut self) -> AutomationResult<()> {
        Ok(())
    }

    async fn await_login(&mut self, _timeout: Duration, _stop: &StopToken) -> AutomationResult<()> {
        if self.login_succeeds {
            self.authenticated = true;
            Ok(())
        } else {
            Err(AutomationError::Auth("manual login timed out after 0s".into()))
        }
    }

    async fn submit(&mut self, job: &JobRecord) -> AutomationResult<SubmissionTicket> {
        self.submitted.lock().unwrap().push(job.id);
        if self.fail_submit_for.contains(&job.id) {
            return Err(AutomationError::PageState("site rejected the form".into()));
        }
        Ok(SubmissionTicket {
            job_id: job.id,
            remote_id: Some(format!("task-{}", job.id)),
        })
    }

    async fn await_completion(
        &mut self,
        _ticket: &SubmissionTicket,
        _timeout: Duration,
        _stop: &StopToken,
    ) -> AutomationResult<()> {
        Ok(())
    }

    async fn collect_artifact(
        &mut self,
        ticket: &SubmissionTicket,
        job: &JobRecord,
    ) -> AutomationResult<PathBuf> {
        self.successes += 1;
        if let (Some(limit), Some(stop)) = (self.stop_after_successes, &self.stop) {
            if self.successes >= limit {
                stop.request();
            }
        }
        let _ = ticket;
        Ok(PathBuf::from(format!("/tmp/artifacts/{}.mp3", job.title)))
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedConnector {
    session: Option<ScriptedSession>,
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    type Session = ScriptedSession;

    async fn connect(&mut self) -> AutomationResult<ScriptedSession> {
        Ok(self.session.take().expect("connect called once"))
    }
}

fn seeded_store(titles: &[&str]) -> (JobStore, Vec<i64>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = JobStore::new(dir.path().join("jobs.sqlite")).unwrap();
    store.initialize().unwrap();
    let mut ids = Vec::new();
    for title in titles {
        let draft = JobDraft {
            title: title.to_string(),
            payload: json!({"prompt": format!("a song called {title}")})
                .as_object()
                .cloned()
                .unwrap(),
        };
        ids.push(store.enqueue(&draft).unwrap());
    }
    (store, ids, dir)
}

fn options() -> UploadOptions {
    UploadOptions {
        job_ids: None,
        max_jobs_per_run: 0,
        delay_between_jobs: Duration::ZERO,
        login_wait: Duration::from_secs(1),
        completion_wait: Duration::from_secs(1),
    }
}

fn drain(mut rx: UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn run_worker(
    store: JobStore,
    session: ScriptedSession,
    options: UploadOptions,
    stop: Option<StopToken>,
) -> Vec<WorkerEvent> {
    let connector = ScriptedConnector {
        session: Some(session),
    };
    let worker = UploadWorker::new(store, connector, options);
    let (sender, rx) = event_channel();
    let mut worker = Worker::new("upload", worker, sender);
    if let Some(stop) = stop {
        worker = worker.with_stop(stop);
    }
    let handle = worker.start().expect("spawn");
    handle.join();
    drain(rx)
}

fn count<F: Fn(&WorkerEvent) -> bool>(events: &[WorkerEvent], predicate: F) -> usize {
    events.iter().filter(|event| predicate(event)).count()
}

#[test]
fn middle_job_failure_does_not_abort_the_queue() {
    let (store, ids, _dir) = seeded_store(&["one", "two", "three"]);
    let closes = Arc::new(AtomicUsize::new(0));
    let session = ScriptedSession {
        authenticated: true,
        fail_submit_for: HashSet::from([ids[1]]),
        closes: Arc::clone(&closes),
        ..Default::default()
    };

    let events = run_worker(store.clone(), session, options(), None);

    assert_eq!(store.get(ids[0]).unwrap().status, JobStatus::Succeeded);
    assert_eq!(store.get(ids[1]).unwrap().status, JobStatus::Failed);
    assert_eq!(store.get(ids[2]).unwrap().status, JobStatus::Succeeded);
    assert!(store
        .get(ids[1])
        .unwrap()
        .error
        .unwrap()
        .contains("site rejected the form"));

    assert_eq!(
        count(&events, |e| matches!(e, WorkerEvent::JobFailed { .. })),
        1
    );
    assert_eq!(
        count(&events, |e| matches!(e, WorkerEvent::JobStarted { .. })),
        3
    );
    assert_eq!(
        count(&events, |e| matches!(e, WorkerEvent::QueueFinished)),
        1
    );
    assert_eq!(events.last(), Some(&WorkerEvent::QueueFinished));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_queue_emits_only_the_terminal_event() {
    let (store, _ids, _dir) = seeded_store(&[]);
    let session = ScriptedSession {
        authenticated: true,
        ..Default::default()
    };

    let events = run_worker(store, session, options(), None);

    assert_eq!(
        count(&events, |e| matches!(e, WorkerEvent::JobStarted { .. })),
        0
    );
    assert_eq!(
        count(&events, |e| matches!(e, WorkerEvent::QueueFinished)),
        1
    );
}

#[test]
fn stop_between_jobs_leaves_remaining_jobs_pending() {
    let (store, ids, _dir) = seeded_store(&["a", "b", "c", "d", "e"]);
    let stop = StopToken::new();
    let session = ScriptedSession {
        authenticated: true,
        stop_after_successes: Some(2),
        stop: Some(stop.clone()),
        ..Default::default()
    };

    let events = run_worker(store.clone(), session, options(), Some(stop));

    assert_eq!(store.get(ids[0]).unwrap().status, JobStatus::Succeeded);
    assert_eq!(store.get(ids[1]).unwrap().status, JobStatus::Succeeded);
    for id in &ids[2..] {
        assert_eq!(store.get(*id).unwrap().status, JobStatus::Pending);
    }
    assert_eq!(
        count(&events, |e| matches!(e, WorkerEvent::JobStarted { .. })),
        2
    );
    assert_eq!(
        count(&events, |e| matches!(e, WorkerEvent::QueueFinished)),
        1
    );
    assert_eq!(events.last(), Some(&WorkerEvent::QueueFinished));
}

#[test]
fn login_timeout_aborts_the_run_before_any_job() {
    let (store, ids, _dir) = seeded_store(&["one", "two"]);
    let submitted = Arc::new(Mutex::new(Vec::new()));
    let session = ScriptedSession {
        authenticated: false,
        login_succeeds: false,
        submitted: Arc::clone(&submitted),
        ..Default::default()
    };

    let events = run_worker(store.clone(), session, options(), None);

    assert!(submitted.lock().unwrap().is_empty());
    for id in &ids {
        assert_eq!(store.get(*id).unwrap().status, JobStatus::Pending);
    }
    assert_eq!(
        count(&events, |e| matches!(e, WorkerEvent::LoginRequired(_))),
        1
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkerEvent::Error { message, .. } if message.contains("login timed out"))));
    assert_eq!(
        count(&events, |e| matches!(e, WorkerEvent::QueueFinished)),
        1
    );
}

#[test]
fn successful_login_flow_processes_the_queue() {
    let (store, ids, _dir) = seeded_store(&["one"]);
    let session = ScriptedSession {
        authenticated: false,
        login_succeeds: true,
        ..Default::default()
    };

    let events = run_worker(store.clone(), session, options(), None);

    assert_eq!(store.get(ids[0]).unwrap().status, JobStatus::Succeeded);
    assert_eq!(
        count(&events, |e| matches!(e, WorkerEvent::LoginRequired(_))),
        1
    );
    assert_eq!(
        count(&events, |e| matches!(e, WorkerEvent::JobSucceeded { .. })),
        1
    );
}

#[test]
fn explicit_job_subset_only_touches_those_jobs() {
    let (store, ids, _dir) = seeded_store(&["one", "two", "three"]);
    let session = ScriptedSession {
        authenticated: true,
        ..Default::default()
    };
    let run_options = options().with_job_ids(vec![ids[0], ids[2]]);

    let events = run_worker(store.clone(), session, run_options, None);

    assert_eq!(store.get(ids[0]).unwrap().status, JobStatus::Succeeded);
    assert_eq!(store.get(ids[1]).unwrap().status, JobStatus::Pending);
    assert_eq!(store.get(ids[2]).unwrap().status, JobStatus::Succeeded);
    assert_eq!(
        count(&events, |e| matches!(e, WorkerEvent::JobStarted { .. })),
        2
    );
}

#[test]
fn job_records_stay_queryable_after_the_run() {
    let (store, ids, _dir) = seeded_store(&["keeper"]);
    let session = ScriptedSession {
        authenticated: true,
        ..Default::default()
    };

    run_worker(store.clone(), session, options(), None);

    // Fresh store handle, as the UI would open after the fact.
    let record = store.get(ids[0]).unwrap();
    assert_eq!(record.status, JobStatus::Succeeded);
    assert!(record.result_path.unwrap().ends_with("keeper.mp3"));
}
