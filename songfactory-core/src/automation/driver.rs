use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumLaunchConfig};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChromiumSection;

use super::error::{AutomationError, AutomationResult};
use super::profile::ProfileManager;

/// The browser session collaborator: everything the automation core needs
/// from a driven page. Implemented for real by [`CdpPage`]; tests swap in
/// stubs so worker orchestration runs without a browser.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> AutomationResult<()>;
    async fn current_url(&self) -> AutomationResult<String>;
    /// Present, visible and enabled — i.e. worth acting on.
    async fn is_interactable(&self, selector: &str) -> AutomationResult<bool>;
    async fn fill(&self, selector: &str, value: &str) -> AutomationResult<()>;
    async fn click(&self, selector: &str) -> AutomationResult<()>;
    async fn evaluate(&self, script: &str) -> AutomationResult<Value>;
    async fn attribute(&self, selector: &str, name: &str) -> AutomationResult<Option<String>>;
}

/// Chromium-backed [`PageDriver`].
#[derive(Debug)]
pub struct CdpPage {
    page: Page,
}

impl CdpPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn navigate(&self, url: &str) -> AutomationResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(AutomationError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn current_url(&self) -> AutomationResult<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn is_interactable(&self, selector: &str) -> AutomationResult<bool> {
        let script = format!(
            r#"(() => {{
    const el = document.querySelector({selector});
    if (!el) return false;
    if (el.disabled) return false;
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0) return false;
    const style = window.getComputedStyle(el);
    return style.visibility !== 'hidden' && style.display !== 'none';
}})()"#,
            selector = js_string(selector)
        );
        let value = self.evaluate(&script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn fill(&self, selector: &str, value: &str) -> AutomationResult<()> {
        // SPA frameworks track inputs through their own state; setting
        // .value directly is invisible to them. Use the native setter and
        // dispatch input/change so the page sees a real edit.
        let script = format!(
            r#"(() => {{
    const el = document.querySelector({selector});
    if (!el) return false;
    el.focus();
    const proto = el instanceof HTMLTextAreaElement
        ? HTMLTextAreaElement.prototype
        : el instanceof HTMLInputElement
            ? HTMLInputElement.prototype
            : null;
    if (proto) {{
        Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, {value});
    }} else if ('value' in el) {{
        el.value = {value};
    }} else {{
        el.textContent = {value};
    }}
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return true;
}})()"#,
            selector = js_string(selector),
            value = js_string(value)
        );
        let result = self.evaluate(&script).await?;
        if result.as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(AutomationError::PageState(format!(
                "element disappeared before fill: {selector}"
            )))
        }
    }

    async fn click(&self, selector: &str) -> AutomationResult<()> {
        let element = self.page.find_element(selector).await?;
        element.click().await?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> AutomationResult<Value> {
        let result = self.page.evaluate(script).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn attribute(&self, selector: &str, name: &str) -> AutomationResult<Option<String>> {
        let element = self.page.find_element(selector).await?;
        Ok(element.attribute(name).await?)
    }
}

fn js_string(value: &str) -> String {
    // serde_json string encoding doubles as JS string literal escaping.
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Launches Chromium against a named persistent profile and hands back a
/// [`BrowserSession`] owning the process plus one page.
#[derive(Debug, Clone)]
pub struct SessionLauncher {
    config: ChromiumSection,
    profiles: ProfileManager,
}

impl SessionLauncher {
    pub fn new(config: ChromiumSection, profiles: ProfileManager) -> Self {
        Self { config, profiles }
    }

    pub fn profile_manager(&self) -> &ProfileManager {
        &self.profiles
    }

    pub async fn launch(&self, profile_name: &str) -> AutomationResult<BrowserSession> {
        let profile_dir = self.profiles.ensure(profile_name)?;

        let mut builder = ChromiumLaunchConfig::builder()
            .user_data_dir(&profile_dir)
            .viewport(Viewport {
                width: self.config.window_width,
                height: self.config.window_height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: self.config.window_width >= self.config.window_height,
                has_touch: false,
            });

        if !self.config.executable_path.is_empty() {
            builder = builder.chrome_executable(&self.config.executable_path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![format!(
            "--window-size={},{}",
            self.config.window_width, self.config.window_height
        )];
        if !self.config.user_agent.is_empty() {
            args.push(format!("--user-agent={}", self.config.user_agent));
        }
        args.extend(self.config.extra_args.iter().cloned());
        args.push("--no-first-run".into());
        builder = builder.args(args);

        let chromium_config = builder.build().map_err(AutomationError::Configuration)?;

        info!(
            profile = profile_name,
            headless = self.config.headless,
            "launching Chromium instance"
        );
        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| AutomationError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let params = CreateTargetParams::new("about:blank");
        let page = browser.new_page(params).await?;

        Ok(BrowserSession {
            browser,
            driver: Arc::new(CdpPage::new(page)),
            handler_task: Some(handler_task),
        })
    }
}

#[derive(Debug)]
pub struct BrowserSession {
    browser: Browser,
    driver: Arc<CdpPage>,
    handler_task: Option<JoinHandle<()>>,
}

impl BrowserSession {
    pub fn driver(&self) -> Arc<dyn PageDriver> {
        Arc::clone(&self.driver) as Arc<dyn PageDriver>
    }

    pub async fn shutdown(mut self) -> AutomationResult<()> {
        info!("shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserSession dropped without explicit shutdown");
            }
        }
    }
}
