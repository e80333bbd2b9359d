//! Locating the server bundle and detecting when it changes on disk.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Result, SsrError};

/// Decides which file is the current server bundle.
///
/// Resolution runs again before every execution when staleness checks are
/// enabled, so a resolver may return a different path over time.
pub trait BundleResolver: Send + Sync {
    /// Path of the bundle to evaluate.
    fn bundle_path(&self) -> Result<PathBuf>;

    /// Files whose modification makes a loaded bundle stale.
    fn watched_files(&self) -> Result<Vec<PathBuf>> {
        Ok(vec![self.bundle_path()?])
    }
}

/// A bundle at a fixed path.
#[derive(Debug, Clone)]
pub struct StaticBundle {
    path: PathBuf,
    extra_watched: Vec<PathBuf>,
}

impl StaticBundle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            extra_watched: Vec::new(),
        }
    }

    /// Also treat changes to `path` as a bundle change (e.g. a chunk the
    /// bundle was built from).
    pub fn with_watched_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_watched.push(path.into());
        self
    }
}

impl BundleResolver for StaticBundle {
    fn bundle_path(&self) -> Result<PathBuf> {
        Ok(self.path.clone())
    }

    fn watched_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = vec![self.path.clone()];
        files.extend(self.extra_watched.iter().cloned());
        Ok(files)
    }
}

/// A hashed bundle looked up in a build manifest.
///
/// The manifest is a JSON object mapping entry names to file names relative
/// to `dist_dir`, e.g. `{ "server.js": "server-abc123.js" }`. When the entry
/// is missing the entry name itself is used.
#[derive(Debug, Clone)]
pub struct ManifestBundle {
    manifest_path: PathBuf,
    dist_dir: PathBuf,
    entry: String,
}

impl ManifestBundle {
    pub fn new(
        manifest_path: impl Into<PathBuf>,
        dist_dir: impl Into<PathBuf>,
        entry: impl Into<String>,
    ) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            dist_dir: dist_dir.into(),
            entry: entry.into(),
        }
    }

    /// Manifest at `<dist_dir>/manifest.json`.
    pub fn in_dist_dir(dist_dir: impl Into<PathBuf>, entry: impl Into<String>) -> Self {
        let dist_dir = dist_dir.into();
        Self::new(dist_dir.join("manifest.json"), dist_dir, entry)
    }

    fn read_manifest(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let load_error = |reason: String| SsrError::BundleLoad {
            path: self.manifest_path.display().to_string(),
            reason,
        };
        let content =
            std::fs::read_to_string(&self.manifest_path).map_err(|e| load_error(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| load_error(format!("invalid manifest: {e}")))
    }
}

impl BundleResolver for ManifestBundle {
    fn bundle_path(&self) -> Result<PathBuf> {
        let manifest = self.read_manifest()?;
        let file_name = manifest
            .get(&self.entry)
            .and_then(|value| value.as_str())
            .unwrap_or(self.entry.as_str());
        Ok(self.dist_dir.join(file_name))
    }

    fn watched_files(&self) -> Result<Vec<PathBuf>> {
        Ok(vec![self.manifest_path.clone(), self.bundle_path()?])
    }
}

/// Identity of the bundle a context was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFingerprint {
    pub path: PathBuf,
    /// Latest modification time across the watched files at load.
    pub modified: SystemTime,
}

impl BundleFingerprint {
    /// Compute the current fingerprint for `resolver`.
    pub fn current(resolver: &dyn BundleResolver) -> Result<Self> {
        let path = canonical_bundle_path(&resolver.bundle_path()?)?;
        let modified = latest_modification(&resolver.watched_files()?)?;
        Ok(Self { path, modified })
    }

    /// A context is stale when its bundle moved or any watched file is newer.
    pub fn is_stale(&self, current: &BundleFingerprint) -> bool {
        self.path != current.path || current.modified > self.modified
    }
}

/// Bundle source ready to be evaluated.
#[derive(Debug, Clone)]
pub struct BundleSource {
    pub code: String,
    pub fingerprint: BundleFingerprint,
}

impl BundleSource {
    /// Read the current bundle from disk.
    pub fn load(resolver: &dyn BundleResolver) -> Result<Self> {
        let fingerprint = BundleFingerprint::current(resolver)?;
        let code = std::fs::read_to_string(&fingerprint.path).map_err(|e| SsrError::BundleLoad {
            path: fingerprint.path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { code, fingerprint })
    }
}

/// Canonicalize and check the bundle is a `.js` file.
pub fn canonical_bundle_path(path: &Path) -> Result<PathBuf> {
    let canonical = path.canonicalize().map_err(|e| SsrError::BundleLoad {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    if canonical.extension() != Some(OsStr::new("js")) {
        return Err(SsrError::BundleLoad {
            path: path.display().to_string(),
            reason: "Bundle must be a .js file".to_string(),
        });
    }

    Ok(canonical)
}

/// Latest modification time across `files`.
pub fn latest_modification(files: &[PathBuf]) -> Result<SystemTime> {
    files.iter().try_fold(SystemTime::UNIX_EPOCH, |latest, file| {
        let modified = std::fs::metadata(file)
            .and_then(|metadata| metadata.modified())
            .map_err(|e| SsrError::BundleLoad {
                path: file.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(latest.max(modified))
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;

    fn touch(path: &Path, offset_secs: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
            .unwrap();
    }

    #[test]
    fn test_static_bundle_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.js");
        fs::write(&path, "globalThis.x = 1;").unwrap();

        let resolver = StaticBundle::new(&path);
        let source = BundleSource::load(&resolver).unwrap();
        assert_eq!(source.code, "globalThis.x = 1;");
        assert_eq!(source.fingerprint.path, path.canonicalize().unwrap());
    }

    #[test]
    fn test_rejects_non_js_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.txt");
        fs::write(&path, "").unwrap();

        let result = BundleSource::load(&StaticBundle::new(&path));
        assert!(matches!(result, Err(SsrError::BundleLoad { reason, .. }) if reason.contains(".js")));
    }

    #[test]
    fn test_missing_bundle_is_load_error() {
        let result = BundleSource::load(&StaticBundle::new("/nonexistent/server.js"));
        assert!(matches!(result, Err(SsrError::BundleLoad { .. })));
    }

    #[test]
    fn test_newer_watched_file_makes_stale() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("server.js");
        let chunk = dir.path().join("chunk.js");
        fs::write(&bundle, "").unwrap();
        fs::write(&chunk, "").unwrap();

        let resolver = StaticBundle::new(&bundle).with_watched_file(&chunk);
        let loaded = BundleFingerprint::current(&resolver).unwrap();
        assert!(!loaded.is_stale(&BundleFingerprint::current(&resolver).unwrap()));

        touch(&chunk, 60);
        assert!(loaded.is_stale(&BundleFingerprint::current(&resolver).unwrap()));
    }

    #[test]
    fn test_manifest_bundle_resolves_hashed_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("server-abc.js"), "").unwrap();
        fs::write(
            dir.path().join("manifest.json"),
            r#"{ "server.js": "server-abc.js" }"#,
        )
        .unwrap();

        let resolver = ManifestBundle::in_dist_dir(dir.path(), "server.js");
        assert_eq!(
            resolver.bundle_path().unwrap(),
            dir.path().join("server-abc.js")
        );
        assert_eq!(resolver.watched_files().unwrap().len(), 2);
    }

    #[test]
    fn test_manifest_falls_back_to_entry_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("manifest.json"), "{}").unwrap();

        let resolver = ManifestBundle::in_dist_dir(dir.path(), "server.js");
        assert_eq!(resolver.bundle_path().unwrap(), dir.path().join("server.js"));
    }

    #[test]
    fn test_manifest_change_moves_bundle() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("server-v1.js"), "").unwrap();
        fs::write(dir.path().join("server-v2.js"), "").unwrap();
        let manifest = dir.path().join("manifest.json");
        fs::write(&manifest, r#"{ "server.js": "server-v1.js" }"#).unwrap();

        let resolver = ManifestBundle::in_dist_dir(dir.path(), "server.js");
        let loaded = BundleFingerprint::current(&resolver).unwrap();

        fs::write(&manifest, r#"{ "server.js": "server-v2.js" }"#).unwrap();
        assert!(loaded.is_stale(&BundleFingerprint::current(&resolver).unwrap()));
    }

    #[test]
    fn test_invalid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("manifest.json"), "not json").unwrap();

        let result = ManifestBundle::in_dist_dir(dir.path(), "server.js").bundle_path();
        assert!(matches!(result, Err(SsrError::BundleLoad { reason, .. }) if reason.contains("invalid manifest")));
    }
}
