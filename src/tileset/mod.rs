use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::instrument;

pub mod walker;

pub use walker::{tasks_for_manifest, tasks_for_root, DownloadTask};

pub const MANIFEST_EXTENSION: &str = ".json";

#[derive(Debug, Default, Deserialize)]
pub struct ManifestDocument {
    #[serde(default)]
    pub root: ManifestNode,
}

#[derive(Debug, Default, Deserialize)]
pub struct ManifestNode {
    pub content: Option<Content>,
    #[serde(default)]
    pub children: Vec<ManifestNode>,
}

#[derive(Debug, Deserialize)]
pub struct Content {
    // 3D Tiles 1.0 renamed `url` to `uri`, servers in the wild publish either
    #[serde(alias = "uri")]
    pub url: Option<String>,
}

impl ManifestNode {
    pub fn content_reference(&self) -> Option<&str> {
        self.content
            .as_ref()
            .and_then(|content| content.url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

impl ManifestDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<ManifestDocument> {
        serde_json::from_slice(bytes).context("Failed to parse tileset manifest")
    }

    #[instrument(level = "debug")]
    pub async fn read(path: &Path) -> Result<ManifestDocument> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        ManifestDocument::from_slice(&bytes)
            .with_context(|| format!("Malformed manifest {}", path.display()))
    }
}

pub fn is_manifest(reference: &str) -> bool {
    reference.ends_with(MANIFEST_EXTENSION)
}
