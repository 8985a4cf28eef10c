use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A release as prepared by the UI, validated before any upload starts.
#[derive(Debug, Clone, Default)]
pub struct ReleaseDraft {
    pub song_id: Option<i64>,
    pub songwriter: String,
    pub artist_name: String,
    pub album_title: String,
    pub primary_genre: String,
    pub language: String,
    pub cover_art_path: String,
    pub audio_path: String,
    pub is_instrumental: bool,
    pub ai_disclosure: bool,
}

/// Capability surface of one distribution service. Adding a service means
/// implementing this trait and registering it; orchestration code never
/// changes.
pub trait DistributorBackend: Send + Sync {
    /// Human-readable name, e.g. "DistroKid".
    fn name(&self) -> &str;

    /// Stable identifier used in job records and config keys.
    fn slug(&self) -> &str;

    /// Whether uploads to this service go through browser automation.
    fn requires_session(&self) -> bool;

    fn genre_map(&self) -> &HashMap<String, String>;

    /// Map an internal genre to this service's vocabulary, with a safe
    /// fallback for unmapped genres.
    fn map_genre(&self, genre: &str) -> String;

    /// Validation errors for a release; empty means uploadable.
    fn validate_release(&self, release: &ReleaseDraft) -> Vec<String>;

    /// Settings keys this backend reads (credentials, defaults).
    fn config_keys(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

pub struct DistroKid {
    genres: HashMap<String, String>,
}

impl Default for DistroKid {
    fn default() -> Self {
        let genres = [
            ("Pop", "Pop"),
            ("Hip-Hop", "Hip-Hop/Rap"),
            ("Rock", "Rock"),
            ("Country", "Country"),
            ("Latin / Reggaeton", "Latin"),
            ("EDM / Dance", "Dance"),
            ("R&B / Soul", "R&B/Soul"),
            ("Indie Pop", "Pop"),
            ("Afrobeats", "Worldwide"),
            ("K-Pop", "K-Pop"),
            ("Folk / Americana", "Singer/Songwriter"),
            ("Lo-Fi Hip-Hop", "Hip-Hop/Rap"),
            ("Funk", "Funk"),
            ("Electropop", "Electronic"),
            ("Reggae", "Reggae"),
            ("Alt-Rock", "Alternative"),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();
        Self { genres }
    }
}

impl DistributorBackend for DistroKid {
    fn name(&self) -> &str {
        "DistroKid"
    }

    fn slug(&self) -> &str {
        "distrokid"
    }

    fn requires_session(&self) -> bool {
        true
    }

    fn genre_map(&self) -> &HashMap<String, String> {
        &self.genres
    }

    fn map_genre(&self, genre: &str) -> String {
        self.genres
            .get(genre)
            .cloned()
            .unwrap_or_else(|| "Pop".to_string())
    }

    fn validate_release(&self, release: &ReleaseDraft) -> Vec<String> {
        let mut errors = Vec::new();
        if release.songwriter.trim().is_empty() {
            errors.push("Songwriter legal name is required".to_string());
        }
        if release.song_id.is_none() {
            errors.push("A song must be selected".to_string());
        }
        if !release.cover_art_path.is_empty() && !Path::new(&release.cover_art_path).is_file() {
            errors.push(format!(
                "Cover art file not found: {}",
                release.cover_art_path
            ));
        }
        errors
    }

    fn config_keys(&self) -> Vec<&'static str> {
        vec!["dk_email", "dk_password", "dk_artist", "dk_songwriter"]
    }
}

/// Slug-indexed backend registry.
#[derive(Clone, Default)]
pub struct DistributorRegistry {
    backends: HashMap<String, Arc<dyn DistributorBackend>>,
}

impl DistributorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DistroKid::default()));
        registry
    }

    pub fn register(&mut self, backend: Arc<dyn DistributorBackend>) {
        self.backends.insert(backend.slug().to_string(), backend);
    }

    pub fn get(&self, slug: &str) -> Option<Arc<dyn DistributorBackend>> {
        self.backends.get(slug).cloned()
    }

    pub fn list(&self) -> Vec<Arc<dyn DistributorBackend>> {
        let mut backends: Vec<_> = self.backends.values().cloned().collect();
        backends.sort_by(|a, b| a.slug().cmp(b.slug()));
        backends
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_resolves_distrokid() {
        let registry = DistributorRegistry::with_builtin();
        let backend = registry.get("distrokid").expect("builtin backend");
        assert_eq!(backend.name(), "DistroKid");
        assert!(backend.requires_session());
        assert!(registry.get("tunecore").is_none());
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn genre_mapping_falls_back_to_pop() {
        let backend = DistroKid::default();
        assert_eq!(backend.map_genre("Lo-Fi Hip-Hop"), "Hip-Hop/Rap");
        assert_eq!(backend.map_genre("Bavarian Polka"), "Pop");
    }

    #[test]
    fn validate_release_reports_missing_fields() {
        let backend = DistroKid::default();
        let draft = ReleaseDraft {
            cover_art_path: "/nonexistent/cover.png".into(),
            ..Default::default()
        };
        let errors = backend.validate_release(&draft);
        assert_eq!(errors.len(), 3);

        let valid = ReleaseDraft {
            song_id: Some(12),
            songwriter: "Alex Smith".into(),
            ..Default::default()
        };
        assert!(backend.validate_release(&valid).is_empty());
    }
}
