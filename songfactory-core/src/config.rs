use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::jobs::JobStore;

#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    pub paths: PathsSection,
    pub chromium: ChromiumSection,
    pub retry: RetrySection,
    pub timeouts: TimeoutsSection,
    pub queue: QueueSection,
    pub downloads: DownloadSection,
    pub site: SiteSection,
}

impl AutomationConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.data_dir).join(path)
        }
    }

    pub fn download_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.download_dir)
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.profile_dir)
    }

    pub fn registry_file(&self) -> PathBuf {
        self.resolve_path(&self.paths.registry_file)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub data_dir: String,
    pub download_dir: String,
    pub profile_dir: String,
    pub registry_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    #[serde(default)]
    pub executable_path: String,
    pub headless: bool,
    pub sandbox: bool,
    pub window_width: u32,
    pub window_height: u32,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub backoff_base: f64,
    #[serde(default)]
    pub jitter_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsSection {
    pub login_wait_s: u64,
    pub generation_poll_s: u64,
    pub poll_interval_s: u64,
    pub element_visible_ms: u64,
    pub page_load_ms: u64,
    pub download_s: u64,
    pub post_submit_delay_s: u64,
}

impl TimeoutsSection {
    pub fn login_wait(&self) -> Duration {
        Duration::from_secs(self.login_wait_s)
    }

    pub fn generation_poll(&self) -> Duration {
        Duration::from_secs(self.generation_poll_s)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_s)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_s)
    }

    pub fn post_submit_delay(&self) -> Duration {
        Duration::from_secs(self.post_submit_delay_s)
    }

    /// Apply per-key overrides stored in the job store's config table.
    /// Keys follow the `timeout_<field>` convention, e.g.
    /// `timeout_login_wait_s = 600`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, store: &JobStore) {
        let mut override_u64 = |key: &str, slot: &mut u64| {
            if let Ok(Some(value)) = store.config_get(&format!("timeout_{key}")) {
                if let Ok(parsed) = value.parse() {
                    *slot = parsed;
                }
            }
        };
        override_u64("login_wait_s", &mut self.login_wait_s);
        override_u64("generation_poll_s", &mut self.generation_poll_s);
        override_u64("poll_interval_s", &mut self.poll_interval_s);
        override_u64("element_visible_ms", &mut self.element_visible_ms);
        override_u64("page_load_ms", &mut self.page_load_ms);
        override_u64("download_s", &mut self.download_s);
        override_u64("post_submit_delay_s", &mut self.post_submit_delay_s);
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    pub delay_between_jobs_s: u64,
    /// Zero means unlimited.
    #[serde(default)]
    pub max_jobs_per_run: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    pub min_file_bytes: u64,
}

/// Declarative description of one target site's submission flow. Selector
/// group names are logical identifiers; the concrete candidate selectors
/// live in `selector_defaults` and, once learned, in the selector registry.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteSection {
    pub name: String,
    pub profile: String,
    pub form_url: String,
    pub login_url: String,
    pub login_path_marker: String,
    #[serde(default)]
    pub fields: Vec<FormFieldSpec>,
    pub submit_group: String,
    #[serde(default)]
    pub ticket_script: Option<String>,
    #[serde(default)]
    pub completion_group: Option<String>,
    #[serde(default)]
    pub completion_script: Option<String>,
    #[serde(default)]
    pub artifact_url_script: Option<String>,
    #[serde(default)]
    pub artifact_link_group: Option<String>,
    #[serde(default)]
    pub selector_defaults: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormFieldSpec {
    pub group: String,
    pub payload_key: String,
    #[serde(default)]
    pub required: bool,
    /// Optional group clicked first to reveal the field (e.g. a mode toggle).
    #[serde(default)]
    pub reveal_group: Option<String>,
}

pub fn load_automation_config<P: AsRef<Path>>(path: P) -> Result<AutomationConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
