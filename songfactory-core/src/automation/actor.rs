use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::stop::StopToken;

use super::driver::PageDriver;
use super::error::{AutomationError, AutomationResult};
use super::registry::SelectorRegistry;
use super::retry::RetryPolicy;

/// High-level page intents. Every operation resolves its logical element
/// through the selector registry and tolerates transient resolution
/// failures via the retry policy. Selectors that work are promoted;
/// selectors that never resolved within the whole retry budget are demoted
/// once the budget is exhausted, so one flaky pass does not thrash the
/// learned ordering.
pub struct PageActor {
    driver: Arc<dyn PageDriver>,
    registry: SelectorRegistry,
    retry: RetryPolicy,
}

impl PageActor {
    pub fn new(driver: Arc<dyn PageDriver>, registry: SelectorRegistry, retry: RetryPolicy) -> Self {
        Self {
            driver,
            registry,
            retry,
        }
    }

    pub fn driver(&self) -> Arc<dyn PageDriver> {
        Arc::clone(&self.driver)
    }

    pub fn registry(&self) -> &SelectorRegistry {
        &self.registry
    }

    /// Resolve a logical element to the first interactable candidate
    /// selector, retrying the whole pass when nothing resolves yet.
    pub async fn resolve(&self, group: &str, stop: Option<&StopToken>) -> AutomationResult<String> {
        let candidates = self.registry.get_selectors(group);
        if candidates.is_empty() {
            return Err(AutomationError::Configuration(format!(
                "no selectors registered for group '{group}'"
            )));
        }

        let failed: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let result = self
            .retry
            .run(stop, |attempt| {
                let candidates = candidates.clone();
                let failed = &failed;
                async move {
                    for selector in &candidates {
                        match self.driver.is_interactable(selector).await {
                            Ok(true) => {
                                self.registry.promote(group, selector);
                                debug!(group, selector = %selector, attempt, "selector resolved");
                                return Ok(selector.clone());
                            }
                            Ok(false) => {
                                failed.lock().unwrap().insert(selector.clone());
                            }
                            Err(err) => {
                                failed.lock().unwrap().insert(selector.clone());
                                debug!(group, selector = %selector, error = %err, "selector probe errored");
                            }
                        }
                    }
                    Err(AutomationError::ElementNotFound {
                        group: group.to_string(),
                    })
                }
            })
            .await;

        match result {
            Ok(outcome) => Ok(outcome.result),
            Err(err) => {
                if matches!(err, AutomationError::ElementNotFound { .. }) {
                    // Budget exhausted: push everything that never resolved
                    // to the back, in their original relative order.
                    let failed = failed.lock().unwrap();
                    for selector in &candidates {
                        if failed.contains(selector) {
                            self.registry.demote(group, selector);
                        }
                    }
                    warn!(group, "no selector resolved within retry budget");
                }
                Err(err)
            }
        }
    }

    pub async fn fill(
        &self,
        group: &str,
        value: &str,
        stop: Option<&StopToken>,
    ) -> AutomationResult<()> {
        let selector = self.resolve(group, stop).await?;
        self.driver.fill(&selector, value).await
    }

    pub async fn click(&self, group: &str, stop: Option<&StopToken>) -> AutomationResult<()> {
        let selector = self.resolve(group, stop).await?;
        self.driver.click(&selector).await
    }

    /// Long-wait operation: poll at a fixed interval for any candidate of
    /// `group` to become interactable. Stop requests are honoured between
    /// polls; expiry is reported as the distinct [`AutomationError::Timeout`]
    /// kind, never as a resolution failure.
    pub async fn wait_for(
        &self,
        group: &str,
        what: &str,
        timeout: Duration,
        interval: Duration,
        stop: Option<&StopToken>,
    ) -> AutomationResult<String> {
        let candidates = self.registry.get_selectors(group);
        if candidates.is_empty() {
            return Err(AutomationError::Configuration(format!(
                "no selectors registered for group '{group}'"
            )));
        }
        let started = Instant::now();
        loop {
            if stop.map(StopToken::is_requested).unwrap_or(false) {
                return Err(AutomationError::Cancelled(what.to_string()));
            }
            for selector in &candidates {
                if matches!(self.driver.is_interactable(selector).await, Ok(true)) {
                    self.registry.promote(group, selector);
                    return Ok(selector.clone());
                }
            }
            if started.elapsed() >= timeout {
                return Err(AutomationError::Timeout(what.to_string()));
            }
            sleep(interval).await;
        }
    }

    /// Long-wait variant polling a boolean JS condition.
    pub async fn wait_until(
        &self,
        script: &str,
        what: &str,
        timeout: Duration,
        interval: Duration,
        stop: Option<&StopToken>,
    ) -> AutomationResult<()> {
        let started = Instant::now();
        loop {
            if stop.map(StopToken::is_requested).unwrap_or(false) {
                return Err(AutomationError::Cancelled(what.to_string()));
            }
            match self.driver.evaluate(script).await {
                Ok(value) if value.as_bool().unwrap_or(false) => return Ok(()),
                Ok(_) => {}
                Err(err) => debug!(what, error = %err, "condition probe errored"),
            }
            if started.elapsed() >= timeout {
                return Err(AutomationError::Timeout(what.to_string()));
            }
            sleep(interval).await;
        }
    }
}
