use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::info;
use url::Url;

use super::error::{AutomationError, AutomationResult};

const MAX_TITLE_CHARS: usize = 80;

/// Saves generated artifacts from direct URLs into the download directory,
/// with size verification and content checksums for the log.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    dir: PathBuf,
    min_bytes: u64,
    client: reqwest::Client,
}

impl DownloadManager {
    pub fn new(dir: impl AsRef<Path>, min_bytes: u64, timeout: Duration) -> AutomationResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            dir,
            min_bytes,
            client,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Unique target path for an artifact, derived from the sanitized
    /// title, variant number, and the URL's extension (mp3 by default).
    pub fn target_path(&self, title: &str, variant: u32, extension: &str) -> PathBuf {
        let stem = sanitize_title(title);
        let mut path = self.dir.join(format!("{stem}_v{variant}{extension}"));
        let mut counter = 1;
        while path.exists() {
            path = self
                .dir
                .join(format!("{stem}_v{variant}_{counter}{extension}"));
            counter += 1;
        }
        path
    }

    pub async fn save_from_url(
        &self,
        url: &str,
        title: &str,
        variant: u32,
    ) -> AutomationResult<PathBuf> {
        let parsed = Url::parse(url)
            .map_err(|err| AutomationError::Network(format!("invalid artifact url {url}: {err}")))?;
        let extension = extension_from_url(&parsed);

        let response = self.client.get(parsed).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        if (bytes.len() as u64) < self.min_bytes {
            return Err(AutomationError::Network(format!(
                "downloaded file too small ({} bytes, expected at least {}): {url}",
                bytes.len(),
                self.min_bytes
            )));
        }

        let checksum = hex::encode(Sha256::digest(&bytes));
        let path = self.target_path(title, variant, &extension);
        tokio::fs::write(&path, &bytes).await?;
        info!(
            path = %path.display(),
            bytes = bytes.len(),
            sha256 = %checksum,
            "artifact downloaded"
        );
        Ok(path)
    }
}

fn sanitize_title(title: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let invalid = INVALID.get_or_init(|| Regex::new(r"[^A-Za-z0-9 _-]+").unwrap());
    let cleaned = invalid.replace_all(title, "");
    let mut stem: String = cleaned.trim().replace(' ', "_");
    stem.truncate(MAX_TITLE_CHARS);
    if stem.is_empty() {
        stem.push_str("untitled");
    }
    stem
}

fn extension_from_url(url: &Url) -> String {
    let extension = Path::new(url.path())
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("mp3");
    format!(".{extension}")
}
