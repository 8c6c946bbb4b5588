use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::fs::create_dir_all;
use tracing::{info, instrument};

use crate::tileset::DownloadTask;

pub mod http;
pub mod retry;

pub use http::{HttpTransport, Transport};
pub use retry::RetryPolicy;

/// Marks an error as a download that exhausted its retries.
#[derive(Debug)]
pub struct FetchFailed;

impl Display for FetchFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "all download attempts failed")
    }
}

/// How a reference is turned into a remote URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteRoute<'a> {
    /// `base/Data/<parent folder>/<reference>`
    TileFolder(&'a str),
    /// Reference already starts with `Data/`: `base/<reference>`
    DataRooted,
    /// `base/<reference>`
    Relative,
}

impl<'a> RemoteRoute<'a> {
    pub fn resolve(reference: &str, parent_folder: &'a str) -> RemoteRoute<'a> {
        if !parent_folder.is_empty() {
            RemoteRoute::TileFolder(parent_folder)
        } else if reference.starts_with("Data/") {
            RemoteRoute::DataRooted
        } else {
            RemoteRoute::Relative
        }
    }

    pub fn url(&self, base_url: &str, reference: &str) -> String {
        match self {
            RemoteRoute::TileFolder(folder) => format!("{}/Data/{}/{}", base_url, folder, reference),
            // TODO: both arms build the same URL; find out whether `Data/` references were meant to
            // bypass the base path before merging them
            RemoteRoute::DataRooted => format!("{}/{}", base_url, reference),
            RemoteRoute::Relative => format!("{}/{}", base_url, reference),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    AlreadyDownloaded,
    Written { bytes: usize },
}

/// Downloads assets to disk, writing each local path at most once.
pub struct Fetcher<T> {
    transport: T,
    base_url: String,
    retry: RetryPolicy,
    downloaded: HashSet<PathBuf>,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, base_url: &str, retry: RetryPolicy) -> Fetcher<T> {
        Fetcher {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
            downloaded: HashSet::new(),
        }
    }

    pub fn is_downloaded(&self, path: &Path) -> bool {
        self.downloaded.contains(path)
    }

    pub fn num_downloaded(&self) -> usize {
        self.downloaded.len()
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[instrument(skip(self, task), fields(reference = %task.reference))]
    pub async fn fetch(&mut self, task: &DownloadTask) -> Result<Fetched> {
        if self.is_downloaded(&task.local_path) {
            info!(path = %task.local_path.display(), "already downloaded");
            return Ok(Fetched::AlreadyDownloaded);
        }

        let route = RemoteRoute::resolve(&task.reference, &task.parent_folder);
        let url = route.url(&self.base_url, &task.reference);
        info!(url = %url, route = ?route, "downloading");

        let transport = &self.transport;
        let url_ref = url.as_str();
        let body = self
            .retry
            .run(move || transport.get(url_ref))
            .await
            .context(FetchFailed)
            .with_context(|| format!("Failed to download {}", url))?;

        if let Some(dir) = task.local_path.parent() {
            create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        tokio::fs::write(&task.local_path, &body)
            .await
            .with_context(|| format!("Failed to write {}", task.local_path.display()))?;
        self.downloaded.insert(task.local_path.clone());

        info!(bytes = body.len(), path = %task.local_path.display(), "download finished");
        Ok(Fetched::Written { bytes: body.len() })
    }
}
