use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use super::{is_manifest, ManifestDocument, ManifestNode};

/// One asset to fetch: the reference exactly as it appeared in its manifest, where to save it,
/// and the folder of the manifest that referenced it (used to rebuild the remote URL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub reference: String,
    pub local_path: PathBuf,
    pub parent_folder: String,
}

/// Where a content reference is saved locally.
///
/// Nested manifests are grouped under `output_root/Data/<tile folder>/`, where the tile folder is
/// the second `/`-separated segment of the reference (or `parent_folder` when the reference has no
/// `/`). Everything else is saved next to the manifest that referenced it.
pub fn destination(
    reference: &str,
    base_path: &Path,
    parent_folder: &str,
    output_root: &Path,
) -> PathBuf {
    if is_manifest(reference) {
        let tile_folder = if reference.contains('/') {
            reference.split('/').nth(1).unwrap_or_default()
        } else {
            parent_folder
        };
        let file_name = reference.rsplit('/').next().unwrap_or(reference);
        output_root.join("Data").join(tile_folder).join(file_name)
    } else {
        base_path.join(reference)
    }
}

/// Pre-order walk of `root` producing a task for every node with a content reference.
pub fn collect_tasks(
    root: &ManifestNode,
    base_path: &Path,
    parent_folder: &str,
    output_root: &Path,
) -> Vec<DownloadTask> {
    let mut tasks = vec![];
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if let Some(reference) = node.content_reference() {
            tasks.push(DownloadTask {
                reference: reference.to_string(),
                local_path: destination(reference, base_path, parent_folder, output_root),
                parent_folder: parent_folder.to_string(),
            });
        }
        stack.extend(node.children.iter().rev());
    }
    tasks
}

/// Tasks for the root manifest, whose references resolve against the output root itself.
pub fn tasks_for_root(document: &ManifestDocument, output_root: &Path) -> Vec<DownloadTask> {
    collect_tasks(&document.root, output_root, "", output_root)
}

/// Parses a manifest already written to disk and returns the tasks for everything it references.
#[instrument(level = "debug", skip(output_root))]
pub async fn tasks_for_manifest(
    manifest_path: &Path,
    output_root: &Path,
) -> Result<Vec<DownloadTask>> {
    let document = ManifestDocument::read(manifest_path).await?;
    let base_path = manifest_path.parent().unwrap_or_else(|| Path::new(""));
    let parent_folder = base_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tasks = collect_tasks(&document.root, base_path, &parent_folder, output_root);
    debug!(num_tasks = tasks.len(), %parent_folder, "walked manifest");
    Ok(tasks)
}
