//! Artifact persistence for map and reduction outputs.

use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid artifact name pattern"));

const MAX_STEM_LEN: usize = 64;

/// Where finished outputs go. `save` returns the location written.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(&self, content: &str, logical_name: &str) -> Result<PathBuf>;
    fn name(&self) -> &'static str;
}

/// Filesystem-safe file stem for `logical_name`: unsafe runs collapse to `_`,
/// followed by a short sha256 digest of the original name so distinct names
/// never collide after sanitizing.
pub fn artifact_file_stem(logical_name: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(logical_name, "_");
    let mut stem: String = cleaned.trim_matches(|c| c == '_' || c == '.').to_string();
    if stem.len() > MAX_STEM_LEN {
        stem.truncate(MAX_STEM_LEN);
    }
    if stem.is_empty() {
        stem.push_str("artifact");
    }

    let mut hasher = Sha256::new();
    hasher.update(logical_name.as_bytes());
    let digest: String = hasher
        .finalize()
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect();
    format!("{}-{}", stem, digest)
}

/// Writes each artifact to `<root>/<stem>.<extension>`, creating `root` on demand.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    extension: String,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: "md".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, logical_name: &str) -> PathBuf {
        let stem = artifact_file_stem(logical_name);
        if self.extension.is_empty() {
            self.root.join(stem)
        } else {
            self.root.join(format!("{}.{}", stem, self.extension))
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(&self, content: &str, logical_name: &str) -> Result<PathBuf> {
        let path = self.path_for(logical_name);
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::runtime_with_context(
                format!("cannot create output directory: {}", e),
                ErrorContext::new().with_source(self.root.display().to_string()),
            )
        })?;
        tokio::fs::write(&path, content).await.map_err(|e| {
            Error::runtime_with_context(
                format!("cannot write artifact {}: {}", logical_name, e),
                ErrorContext::new().with_source(path.display().to_string()),
            )
        })?;
        debug!(logical_name, path = %path.display(), bytes = content.len(), "artifact saved");
        Ok(path)
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}

/// Keeps artifacts in memory, keyed by logical name.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<BTreeMap<String, String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content saved under `logical_name`, if any.
    pub fn get(&self, logical_name: &str) -> Option<String> {
        self.artifacts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(logical_name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.artifacts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn save(&self, content: &str, logical_name: &str) -> Result<PathBuf> {
        self.artifacts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(logical_name.to_string(), content.to_string());
        Ok(PathBuf::from("mem://").join(artifact_file_stem(logical_name)))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
