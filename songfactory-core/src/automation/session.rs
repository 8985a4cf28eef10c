use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::config::{SiteSection, TimeoutsSection};
use crate::jobs::JobRecord;
use crate::stop::StopToken;

use super::actor::PageActor;
use super::download::DownloadManager;
use super::driver::{BrowserSession, PageDriver, SessionLauncher};
use super::error::{AutomationError, AutomationResult};
use super::registry::SelectorRegistry;
use super::retry::{retry_call, RetryPolicy};

const LOGIN_POLL: Duration = Duration::from_secs(2);

/// Handle for one submitted job on the remote site.
#[derive(Debug, Clone)]
pub struct SubmissionTicket {
    pub job_id: i64,
    pub remote_id: Option<String>,
}

/// Everything the upload worker needs from a target site. The concrete
/// implementation drives a real browser; tests substitute a scripted stub
/// so queue orchestration is exercised without any network or process I/O.
#[async_trait]
pub trait SiteSession: Send {
    async fn is_authenticated(&mut self) -> AutomationResult<bool>;
    async fn begin_login(&mut self) -> AutomationResult<()>;
    async fn await_login(&mut self, timeout: Duration, stop: &StopToken) -> AutomationResult<()>;
    async fn submit(&mut self, job: &JobRecord) -> AutomationResult<SubmissionTicket>;
    async fn await_completion(
        &mut self,
        ticket: &SubmissionTicket,
        timeout: Duration,
        stop: &StopToken,
    ) -> AutomationResult<()>;
    async fn collect_artifact(
        &mut self,
        ticket: &SubmissionTicket,
        job: &JobRecord,
    ) -> AutomationResult<PathBuf>;
    async fn close(&mut self);
}

/// Creates connected sessions for the worker's acquire phase.
#[async_trait]
pub trait SessionConnector: Send + 'static {
    type Session: SiteSession + Send;
    async fn connect(&mut self) -> AutomationResult<Self::Session>;
}

/// Config-driven [`SiteSession`] over a [`PageActor`]. The site section
/// declares which selector groups make up the form, how completion is
/// detected, and where the artifact URL comes from; nothing site-specific
/// is hardcoded here.
pub struct FlowSession {
    actor: PageActor,
    retry: RetryPolicy,
    site: SiteSection,
    timeouts: TimeoutsSection,
    downloads: DownloadManager,
    browser: Option<BrowserSession>,
}

impl std::fmt::Debug for FlowSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowSession")
            .field("site", &self.site.name)
            .field("has_browser", &self.browser.is_some())
            .finish_non_exhaustive()
    }
}

impl FlowSession {
    pub fn new(
        browser: BrowserSession,
        registry: SelectorRegistry,
        retry: RetryPolicy,
        site: SiteSection,
        timeouts: TimeoutsSection,
        downloads: DownloadManager,
    ) -> AutomationResult<Self> {
        let driver = browser.driver();
        let mut session = Self::from_driver(driver, registry, retry, site, timeouts, downloads)?;
        session.browser = Some(browser);
        Ok(session)
    }

    /// Browserless constructor for tests and embedding.
    pub fn from_driver(
        driver: Arc<dyn PageDriver>,
        registry: SelectorRegistry,
        retry: RetryPolicy,
        site: SiteSection,
        timeouts: TimeoutsSection,
        downloads: DownloadManager,
    ) -> AutomationResult<Self> {
        if site.completion_script.is_none() && site.completion_group.is_none() {
            return Err(AutomationError::Configuration(format!(
                "site '{}' declares no completion condition",
                site.name
            )));
        }
        if site.artifact_url_script.is_none() && site.artifact_link_group.is_none() {
            return Err(AutomationError::Configuration(format!(
                "site '{}' declares no artifact source",
                site.name
            )));
        }
        for (group, defaults) in &site.selector_defaults {
            registry.register_group(group, defaults.clone());
        }
        let actor = PageActor::new(driver, registry, retry.clone());
        Ok(Self {
            actor,
            retry,
            site,
            timeouts,
            downloads,
            browser: None,
        })
    }

    async fn resolve_artifact_url(&self) -> AutomationResult<Option<String>> {
        if let Some(script) = &self.site.artifact_url_script {
            let value = self.actor.driver().evaluate(script).await?;
            return Ok(match value {
                Value::String(url) if !url.is_empty() => Some(url),
                _ => None,
            });
        }
        if let Some(group) = &self.site.artifact_link_group {
            let selector = self.actor.resolve(group, None).await?;
            return Ok(self
                .actor
                .driver()
                .attribute(&selector, "href")
                .await?
                .filter(|href| !href.is_empty()));
        }
        Ok(None)
    }
}

#[async_trait]
impl SiteSession for FlowSession {
    /// Navigate to the form page and see whether we get bounced to login.
    async fn is_authenticated(&mut self) -> AutomationResult<bool> {
        let driver = self.actor.driver();
        driver.navigate(&self.site.form_url).await?;
        let url = driver.current_url().await?;
        let logged_in = !url.contains(&self.site.login_path_marker);
        info!(site = %self.site.name, logged_in, url = %url, "login status checked");
        Ok(logged_in)
    }

    async fn begin_login(&mut self) -> AutomationResult<()> {
        info!(site = %self.site.name, "opening login page for manual authentication");
        self.actor.driver().navigate(&self.site.login_url).await
    }

    /// Poll until the browser leaves the login path. The user completes the
    /// login by hand in the visible browser window.
    async fn await_login(&mut self, timeout: Duration, stop: &StopToken) -> AutomationResult<()> {
        let driver = self.actor.driver();
        let started = Instant::now();
        loop {
            if stop.is_requested() {
                return Err(AutomationError::Cancelled("manual login wait".into()));
            }
            match driver.current_url().await {
                Ok(url) if !url.is_empty() && !url.contains(&self.site.login_path_marker) => {
                    info!(site = %self.site.name, url = %url, "manual login detected");
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "could not read url during login wait"),
            }
            if started.elapsed() >= timeout {
                return Err(AutomationError::Auth(format!(
                    "manual login timed out after {}s",
                    timeout.as_secs()
                )));
            }
            sleep(LOGIN_POLL).await;
        }
    }

    async fn submit(&mut self, job: &JobRecord) -> AutomationResult<SubmissionTicket> {
        let driver = self.actor.driver();
        driver.navigate(&self.site.form_url).await?;
        let url = driver.current_url().await?;
        if url.contains(&self.site.login_path_marker) {
            return Err(AutomationError::Auth(
                "redirected to login, session may have expired".into(),
            ));
        }

        for field in &self.site.fields {
            let value = match job.payload_str(&field.payload_key) {
                Some(value) if !value.is_empty() => value.to_string(),
                _ if field.required => {
                    return Err(AutomationError::PageState(format!(
                        "job {} is missing required field '{}'",
                        job.id, field.payload_key
                    )));
                }
                _ => continue,
            };
            if let Some(reveal) = &field.reveal_group {
                self.actor.click(reveal, None).await?;
            }
            self.actor.fill(&field.group, &value, None).await?;
        }

        self.actor.click(&self.site.submit_group, None).await?;
        sleep(self.timeouts.post_submit_delay()).await;

        let remote_id = match &self.site.ticket_script {
            Some(script) => match self.actor.driver().evaluate(script).await? {
                Value::String(id) if !id.is_empty() => Some(id),
                _ => {
                    warn!(job_id = job.id, "no remote ticket captured after submit");
                    None
                }
            },
            None => None,
        };

        info!(job_id = job.id, remote_id = ?remote_id, "job submitted");
        Ok(SubmissionTicket {
            job_id: job.id,
            remote_id,
        })
    }

    async fn await_completion(
        &mut self,
        ticket: &SubmissionTicket,
        timeout: Duration,
        stop: &StopToken,
    ) -> AutomationResult<()> {
        let what = format!("completion of job {}", ticket.job_id);
        let interval = self.timeouts.poll_interval();
        if let Some(script) = &self.site.completion_script {
            self.actor
                .wait_until(script, &what, timeout, interval, Some(stop))
                .await
        } else if let Some(group) = &self.site.completion_group {
            self.actor
                .wait_for(group, &what, timeout, interval, Some(stop))
                .await
                .map(|_| ())
        } else {
            // Guarded against in the constructor.
            Err(AutomationError::Configuration(
                "no completion condition configured".into(),
            ))
        }
    }

    async fn collect_artifact(
        &mut self,
        ticket: &SubmissionTicket,
        job: &JobRecord,
    ) -> AutomationResult<PathBuf> {
        let url = self.resolve_artifact_url().await?.ok_or_else(|| {
            AutomationError::PageState(format!(
                "no artifact url available for job {}",
                ticket.job_id
            ))
        })?;

        let downloads = self.downloads.clone();
        let title = job.title.clone();
        let outcome = retry_call(&self.retry, None, |_| {
            let url = url.clone();
            let downloads = downloads.clone();
            let title = title.clone();
            async move { downloads.save_from_url(&url, &title, 1).await }
        })
        .await?;
        Ok(outcome.result)
    }

    async fn close(&mut self) {
        if let Some(browser) = self.browser.take() {
            if let Err(err) = browser.shutdown().await {
                warn!(error = %err, "browser shutdown failed");
            }
        }
    }
}

/// Builds a fresh browser-backed [`FlowSession`] per worker run.
pub struct FlowConnector {
    launcher: SessionLauncher,
    registry: SelectorRegistry,
    retry: RetryPolicy,
    site: SiteSection,
    timeouts: TimeoutsSection,
    downloads: DownloadManager,
}

impl FlowConnector {
    pub fn new(
        launcher: SessionLauncher,
        registry: SelectorRegistry,
        retry: RetryPolicy,
        site: SiteSection,
        timeouts: TimeoutsSection,
        downloads: DownloadManager,
    ) -> Self {
        Self {
            launcher,
            registry,
            retry,
            site,
            timeouts,
            downloads,
        }
    }
}

#[async_trait]
impl SessionConnector for FlowConnector {
    type Session = FlowSession;

    async fn connect(&mut self) -> AutomationResult<FlowSession> {
        let browser = self.launcher.launch(&self.site.profile).await?;
        FlowSession::new(
            browser,
            self.registry.clone(),
            self.retry.clone(),
            self.site.clone(),
            self.timeouts.clone(),
            self.downloads.clone(),
        )
    }
}
