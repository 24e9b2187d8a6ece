//! Plugin catalog: discovers `<PLUGINS_DIR>/<key>/plugin.json` manifests

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::manifest::PluginManifest;
use crate::errors::ServiceError;

pub const MANIFEST_FILE: &str = "plugin.json";

static PLUGIN_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").expect("valid regex"));

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("no plugin manifest found for '{0}'")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{0}")]
    Parse(String),
    #[error("invalid manifest: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl From<ManifestError> for ServiceError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::NotFound(key) => ServiceError::NotFound(format!("Plugin manifest '{}' not found", key)),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

/// Keys double as directory names, so only a safe alphabet is accepted
pub fn is_valid_plugin_key(key: &str) -> bool {
    PLUGIN_KEY.is_match(key)
}

/// Parse and validate a manifest; the manifest id must match its directory
pub fn parse_manifest(content: &str, key: &str) -> Result<PluginManifest, ManifestError> {
    let manifest = PluginManifest::parse(content).map_err(ManifestError::Parse)?;
    let mut problems = manifest.validate().err().unwrap_or_default();
    if manifest.id != key {
        problems.push(format!("id '{}' does not match directory '{}'", manifest.id, key));
    }
    if problems.is_empty() {
        Ok(manifest)
    } else {
        Err(ManifestError::Invalid(problems))
    }
}

struct CachedManifest {
    modified: Option<SystemTime>,
    manifest: Arc<PluginManifest>,
}

/// Reads manifests from disk, caching each one until its file changes
pub struct PluginCatalog {
    dir: PathBuf,
    cache: RwLock<HashMap<String, CachedManifest>>,
}

impl PluginCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load one manifest by plugin key
    pub async fn load(&self, key: &str) -> Result<Arc<PluginManifest>, ManifestError> {
        if !is_valid_plugin_key(key) {
            return Err(ManifestError::NotFound(key.to_string()));
        }
        let path = self.dir.join(key).join(MANIFEST_FILE);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.cache.write().remove(key);
                return Err(ManifestError::NotFound(key.to_string()));
            }
            Err(source) => {
                return Err(ManifestError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let modified = metadata.modified().ok();

        if let Some(cached) = self.cache.read().get(key) {
            if modified.is_some() && cached.modified == modified {
                return Ok(cached.manifest.clone());
            }
        }

        let content = tokio::fs::read_to_string(&path).await.map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let manifest = Arc::new(parse_manifest(&content, key)?);

        self.cache.write().insert(
            key.to_string(),
            CachedManifest {
                modified,
                manifest: manifest.clone(),
            },
        );
        Ok(manifest)
    }

    /// Every valid manifest in the directory, sorted by id.
    /// Broken manifests are skipped with a warning.
    pub async fn available(&self) -> Result<Vec<Arc<PluginManifest>>, ManifestError> {
        let mut manifests = Vec::new();

        if !self.dir.exists() {
            return Ok(manifests);
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|source| ManifestError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;

        while let Some(entry) = entries.next_entry().await.map_err(|source| ManifestError::Io {
            path: self.dir.display().to_string(),
            source,
        })? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(key) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if key.starts_with('_') || key.starts_with('.') {
                log::debug!("Skipping plugin directory: {}", path.display());
                continue;
            }
            if !path.join(MANIFEST_FILE).exists() {
                continue;
            }

            match self.load(&key).await {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => log::warn!("Skipping plugin '{}': {}", key, e),
            }
        }

        manifests.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(manifests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, key: &str, body: &str) {
        let plugin_dir = dir.join(key);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join(MANIFEST_FILE), body).unwrap();
    }

    fn manifest_json(id: &str) -> String {
        format!(
            r#"{{"id": "{}", "name": "{} plugin", "version": "0.1.0", "jobs": [{{"name": "sync", "route": "/sync"}}]}}"#,
            id, id
        )
    }

    #[tokio::test]
    async fn test_available_skips_broken_manifests() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "github", &manifest_json("github"));
        write_manifest(dir.path(), "discord", &manifest_json("discord"));
        write_manifest(dir.path(), "broken", "{ not json");
        write_manifest(dir.path(), "mismatch", &manifest_json("other"));
        write_manifest(dir.path(), "_disabled", &manifest_json("_disabled"));

        let catalog = PluginCatalog::new(dir.path());
        let ids: Vec<String> = catalog.available().await.unwrap().iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["discord".to_string(), "github".to_string()]);
    }

    #[tokio::test]
    async fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "broken", "{ not json");
        let catalog = PluginCatalog::new(dir.path());

        assert!(matches!(catalog.load("missing").await, Err(ManifestError::NotFound(_))));
        assert!(matches!(catalog.load("../etc").await, Err(ManifestError::NotFound(_))));
        assert!(matches!(catalog.load("broken").await, Err(ManifestError::Parse(_))));
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let catalog = PluginCatalog::new("/definitely/not/here");
        assert!(catalog.available().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reload_after_change() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "github", &manifest_json("github"));
        let catalog = PluginCatalog::new(dir.path());
        assert_eq!(catalog.load("github").await.unwrap().version, "0.1.0");

        std::fs::remove_dir_all(dir.path().join("github")).unwrap();
        assert!(matches!(catalog.load("github").await, Err(ManifestError::NotFound(_))));
    }
}
