use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use super::error::{AutomationError, AutomationResult};

/// Named persistent browser profiles, one directory per target service.
/// Profiles are long-lived on purpose: they hold cookies and local storage,
/// so a manual login survives across runs.
#[derive(Debug, Clone)]
pub struct ProfileManager {
    base_dir: PathBuf,
}

impl ProfileManager {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> AutomationResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir).map_err(|err| {
            AutomationError::Profile(format!("failed to create profile base dir: {err}"))
        })?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory for `name`, created on first use. The `.last_used` marker
    /// lets operators spot abandoned profiles.
    pub fn ensure(&self, name: &str) -> AutomationResult<PathBuf> {
        validate_name(name)?;
        let path = self.base_dir.join(name);
        std::fs::create_dir_all(&path).map_err(|err| {
            AutomationError::Profile(format!("failed to create profile dir for {name}: {err}"))
        })?;
        let marker = path.join(".last_used");
        std::fs::write(&marker, Utc::now().to_rfc3339()).map_err(|err| {
            AutomationError::Profile(format!("failed to write profile marker: {err}"))
        })?;
        Ok(path)
    }

    /// Delete a profile entirely, e.g. to force a fresh login.
    pub fn remove(&self, name: &str) -> AutomationResult<()> {
        validate_name(name)?;
        let path = self.base_dir.join(name);
        if path.is_dir() {
            std::fs::remove_dir_all(&path).map_err(|err| {
                AutomationError::Profile(format!("failed to remove profile {name}: {err}"))
            })?;
            info!(profile = name, "browser profile removed");
        }
        Ok(())
    }

    pub fn list(&self) -> AutomationResult<Vec<String>> {
        let entries = std::fs::read_dir(&self.base_dir).map_err(|err| {
            AutomationError::Profile(format!("failed to list profile directory: {err}"))
        })?;
        let mut names = Vec::new();
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn validate_name(name: &str) -> AutomationResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AutomationError::Profile(format!(
            "invalid profile name: {name:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ensure_creates_directory_and_marker() {
        let dir = tempdir().unwrap();
        let profiles = ProfileManager::new(dir.path()).unwrap();
        let path = profiles.ensure("lalals").unwrap();
        assert!(path.is_dir());
        assert!(path.join(".last_used").is_file());
        assert_eq!(profiles.list().unwrap(), vec!["lalals".to_string()]);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let dir = tempdir().unwrap();
        let profiles = ProfileManager::new(dir.path()).unwrap();
        assert!(profiles.ensure("../escape").is_err());
        assert!(profiles.ensure("").is_err());
    }

    #[test]
    fn remove_deletes_profile() {
        let dir = tempdir().unwrap();
        let profiles = ProfileManager::new(dir.path()).unwrap();
        profiles.ensure("distrokid").unwrap();
        profiles.remove("distrokid").unwrap();
        assert!(profiles.list().unwrap().is_empty());
    }
}
