use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Self-healing selector registry.
///
/// Each group (e.g. "prompt_field") holds candidate selectors in priority
/// order. Selectors that work get promoted to the front, selectors that
/// fail get demoted to the back, and the ordering persists between runs so
/// the learning survives restarts. The whole document is rewritten on every
/// mutation; the registry file is shared by all workers in the process.
#[derive(Debug, Clone)]
pub struct SelectorRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Debug)]
struct RegistryInner {
    path: PathBuf,
    groups: HashMap<String, Vec<String>>,
}

impl SelectorRegistry {
    /// Load the registry from `path`. A missing or corrupt file degrades
    /// to an empty registry rather than failing startup.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let groups = load_groups(&path);
        Self {
            inner: Arc::new(Mutex::new(RegistryInner { path, groups })),
        }
    }

    /// Register a group with default ordering. No-op when the group is
    /// already known, so learned orderings are preserved.
    pub fn register_group(&self, name: &str, defaults: Vec<String>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.groups.contains_key(name) {
            return;
        }
        inner.groups.insert(name.to_string(), defaults);
        inner.save();
    }

    /// Selectors for a group in current priority order. Empty when the
    /// group is unknown; callers must treat that as a configuration error.
    pub fn get_selectors(&self, name: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.groups.get(name).cloned().unwrap_or_default()
    }

    /// Move a selector to the front of its group (it worked).
    pub fn promote(&self, name: &str, selector: &str) {
        let mut inner = self.inner.lock().unwrap();
        let Some(group) = inner.groups.get_mut(name) else {
            return;
        };
        if let Some(position) = group.iter().position(|s| s == selector) {
            let selector = group.remove(position);
            group.insert(0, selector);
            inner.save();
        }
    }

    /// Move a selector to the back of its group (it failed).
    pub fn demote(&self, name: &str, selector: &str) {
        let mut inner = self.inner.lock().unwrap();
        let Some(group) = inner.groups.get_mut(name) else {
            return;
        };
        if let Some(position) = group.iter().position(|s| s == selector) {
            let selector = group.remove(position);
            group.push(selector);
            inner.save();
        }
    }

    /// Force-overwrite a group's selector order.
    pub fn reset_group(&self, name: &str, selectors: Vec<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.groups.insert(name.to_string(), selectors);
        inner.save();
    }

    pub fn group_names(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = inner.groups.keys().cloned().collect();
        names.sort();
        names
    }
}

fn load_groups(path: &Path) -> HashMap<String, Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<HashMap<String, Vec<String>>>(&contents) {
            Ok(groups) => {
                debug!(groups = groups.len(), "selector registry loaded");
                groups
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupt selector registry, starting empty");
                HashMap::new()
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read selector registry, starting empty");
            HashMap::new()
        }
    }
}

impl RegistryInner {
    fn save(&self) {
        if let Err(err) = self.try_save() {
            warn!(path = %self.path.display(), error = %err, "failed to save selector registry");
        }
    }

    // Whole-document write via temp file + rename, so readers never see a
    // partially written registry.
    fn try_save(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.groups)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn promote_moves_selector_to_front_preserving_others() {
        let dir = tempdir().unwrap();
        let registry = SelectorRegistry::open(dir.path().join("registry.json"));
        registry.register_group("login_button", strings(&["a", "b", "c"]));

        registry.promote("login_button", "c");
        assert_eq!(registry.get_selectors("login_button"), strings(&["c", "a", "b"]));
    }

    #[test]
    fn demote_moves_selector_to_back_preserving_others() {
        let dir = tempdir().unwrap();
        let registry = SelectorRegistry::open(dir.path().join("registry.json"));
        registry.register_group("login_button", strings(&["a", "b", "c"]));

        registry.demote("login_button", "a");
        assert_eq!(registry.get_selectors("login_button"), strings(&["b", "c", "a"]));
    }

    #[test]
    fn promote_absent_selector_or_unknown_group_is_noop() {
        let dir = tempdir().unwrap();
        let registry = SelectorRegistry::open(dir.path().join("registry.json"));
        registry.register_group("login_button", strings(&["a", "b"]));

        registry.promote("login_button", "missing");
        registry.promote("unknown_group", "a");
        registry.demote("login_button", "missing");
        registry.demote("unknown_group", "a");

        assert_eq!(registry.get_selectors("login_button"), strings(&["a", "b"]));
        assert!(registry.get_selectors("unknown_group").is_empty());
    }

    #[test]
    fn register_group_preserves_learned_ordering() {
        let dir = tempdir().unwrap();
        let registry = SelectorRegistry::open(dir.path().join("registry.json"));
        registry.register_group("submit", strings(&["a", "b"]));
        registry.promote("submit", "b");

        registry.register_group("submit", strings(&["a", "b"]));
        assert_eq!(registry.get_selectors("submit"), strings(&["b", "a"]));
    }

    #[test]
    fn reset_group_overwrites_unconditionally() {
        let dir = tempdir().unwrap();
        let registry = SelectorRegistry::open(dir.path().join("registry.json"));
        registry.register_group("submit", strings(&["a", "b"]));
        registry.promote("submit", "b");

        registry.reset_group("submit", strings(&["x", "y"]));
        assert_eq!(registry.get_selectors("submit"), strings(&["x", "y"]));
    }

    #[test]
    fn ordering_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let registry = SelectorRegistry::open(&path);
        registry.register_group("submit", strings(&["a", "b", "c"]));
        registry.promote("submit", "b");
        registry.demote("submit", "a");

        let reloaded = SelectorRegistry::open(&path);
        assert_eq!(reloaded.get_selectors("submit"), strings(&["b", "c", "a"]));
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{not valid json").unwrap();

        let registry = SelectorRegistry::open(&path);
        assert!(registry.group_names().is_empty());
    }
}
