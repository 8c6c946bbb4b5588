use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::path::Path;
use tokio::fs::create_dir_all;
use tracing::{info, info_span, warn};

use crate::config::SessionConfig;
use crate::fetcher::{FetchFailed, Fetched, Fetcher, HttpTransport, Transport};
use crate::tileset::{self, is_manifest, DownloadTask, ManifestDocument};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
}

impl DownloadSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Mirrors the tileset rooted at `tileset_path` into `config.output_root`.
///
/// Only a root manifest that cannot be read, parsed or copied aborts the run. Every other failure
/// is logged and counted in the returned summary.
pub async fn download_tileset(config: &SessionConfig, tileset_path: &Path) -> Result<DownloadSummary> {
    let transport = HttpTransport::new(config)?;
    let mut fetcher = Fetcher::new(transport, &config.base_url, config.retry);
    mirror(&mut fetcher, tileset_path, &config.output_root).await
}

pub async fn mirror<T: Transport>(
    fetcher: &mut Fetcher<T>,
    tileset_path: &Path,
    output_root: &Path,
) -> Result<DownloadSummary> {
    // read once and write those bytes back, the input may itself be `output_root/tileset.json`
    let bytes = tokio::fs::read(tileset_path)
        .await
        .with_context(|| format!("Failed to read root manifest {}", tileset_path.display()))?;
    let document = ManifestDocument::from_slice(&bytes)
        .with_context(|| format!("Malformed root manifest {}", tileset_path.display()))?;

    create_dir_all(output_root)
        .await
        .with_context(|| format!("Failed to create output directory {}", output_root.display()))?;
    let root_copy = output_root.join("tileset.json");
    tokio::fs::write(&root_copy, &bytes)
        .await
        .with_context(|| format!("Failed to copy root manifest to {}", root_copy.display()))?;
    info!(path = %root_copy.display(), "copied root manifest");

    let pending: VecDeque<DownloadTask> = tileset::tasks_for_root(&document, output_root).into();
    Ok(drain(fetcher, pending, output_root).await)
}

fn failure_reason(err: &anyhow::Error) -> &'static str {
    if err.downcast_ref::<FetchFailed>().is_some() {
        "retries exhausted"
    } else {
        "could not save to disk"
    }
}

/// Fetches tasks front to back. Tasks from a fetched manifest go to the front of the queue so the
/// tree is visited depth first, in manifest order.
pub async fn drain<T: Transport>(
    fetcher: &mut Fetcher<T>,
    mut pending: VecDeque<DownloadTask>,
    output_root: &Path,
) -> DownloadSummary {
    let mut summary = DownloadSummary::default();
    while let Some(task) = pending.pop_front() {
        match fetcher.fetch(&task).await {
            Ok(Fetched::AlreadyDownloaded) => {
                summary.skipped += 1;
                continue;
            }
            Ok(Fetched::Written { bytes }) => {
                summary.downloaded += 1;
                summary.bytes += bytes as u64;
            }
            Err(err) => {
                warn!(
                    reference = %task.reference,
                    reason = failure_reason(&err),
                    error = ?err,
                    "failed to download, skipping"
                );
                summary.failed += 1;
                continue;
            }
        }

        if !is_manifest(&task.reference) {
            continue;
        }
        let manifest_span = info_span!("manifest", path = %task.local_path.display());
        let _manifest_span = manifest_span.enter();
        match tileset::tasks_for_manifest(&task.local_path, output_root).await {
            Ok(tasks) => {
                info!(num_tasks = tasks.len(), "queued manifest contents");
                for child in tasks.into_iter().rev() {
                    pending.push_front(child);
                }
            }
            Err(err) => {
                warn!(error = ?err, "failed to process manifest, skipping its contents");
                summary.failed += 1;
            }
        }
    }
    info!(
        downloaded = summary.downloaded,
        skipped = summary.skipped,
        failed = summary.failed,
        bytes = summary.bytes,
        unique_files = fetcher.num_downloaded(),
        "finished downloading tileset"
    );
    summary
}
