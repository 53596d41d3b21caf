//! One downloader per source kind behind a common `download(source, target)` call.

mod hf;
mod http;
mod local;

use std::path::{Path, PathBuf};

pub use hf::{HfDownloader, HF_PROGRESS_ENV};
pub use http::HttpDownloader;
pub use local::LocalFileHandler;

use crate::config::AssetSourceConfig;
use crate::error::AssetError;

/// Downloader selected for a source.
#[derive(Debug, Clone)]
pub enum Downloader {
    Http(HttpDownloader),
    Hf(HfDownloader),
    Local(LocalFileHandler),
}

impl Downloader {
    /// Fetch `source` and place it at `target`, returning the realized path.
    pub async fn download(
        &self,
        source: &AssetSourceConfig,
        target: &Path,
    ) -> Result<PathBuf, AssetError> {
        match self {
            Self::Http(d) => d.download(source, target).await,
            Self::Hf(d) => d.download(source, target).await,
            Self::Local(d) => d.download(source, target).await,
        }
    }
}

/// Pick the downloader for a source.
///
/// Hub sources fail with a configuration error when the hub client is not
/// compiled in.
pub fn get_downloader_for_source(source: &AssetSourceConfig) -> Result<Downloader, AssetError> {
    match source {
        AssetSourceConfig::Http(_) => Ok(Downloader::Http(HttpDownloader::new())),
        AssetSourceConfig::Hf(hf) => HfDownloader::new(hf.token.clone())
            .map(Downloader::Hf)
            .map_err(|e| match e {
                AssetError::HubClientUnavailable => AssetError::Configuration(format!(
                    "Cannot download '{}': {}",
                    hf.repo_id, e
                )),
                other => other,
            }),
        AssetSourceConfig::Local(_) => Ok(Downloader::Local(LocalFileHandler::new())),
    }
}

/// Temporary name used while a download is in flight.
pub(crate) fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}
