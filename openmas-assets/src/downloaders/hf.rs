use std::path::{Component, Path, PathBuf};

use log::{debug, info};
use secrecy::SecretString;

use crate::config::{AssetSourceConfig, HfSource, SourceType};
use crate::error::AssetError;
use crate::utils::env::ScopedEnvVar;
use crate::utils::fs::{copy_file_preserving, copy_tree, remove_path};

/// Environment switch honoured by Hugging Face tooling to hide progress bars.
pub const HF_PROGRESS_ENV: &str = "HF_HUB_DISABLE_PROGRESS_BARS";

/// Held for the whole set/fetch/restore window of the progress switch.
/// Overlapping windows would restore each other's values.
static HF_ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Fetches files (or whole repositories) from a Hugging Face style hub.
#[derive(Debug, Clone)]
pub struct HfDownloader {
    token: Option<SecretString>,
    endpoint: Option<String>,
    cache_dir: Option<PathBuf>,
}

impl HfDownloader {
    /// Fails with [`AssetError::HubClientUnavailable`] when the crate was
    /// built without the `hf` feature.
    pub fn new(token: Option<SecretString>) -> Result<Self, AssetError> {
        if !cfg!(feature = "hf") {
            return Err(AssetError::HubClientUnavailable);
        }
        Ok(Self {
            token,
            endpoint: std::env::var("HF_ENDPOINT").ok().filter(|e| !e.is_empty()),
            cache_dir: None,
        })
    }

    /// Hub base URL (defaults to `HF_ENDPOINT` or huggingface.co).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Directory of the hub client's own cache (defaults to the hub default).
    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub async fn download(
        &self,
        source: &AssetSourceConfig,
        target: &Path,
    ) -> Result<PathBuf, AssetError> {
        let AssetSourceConfig::Hf(hf) = source else {
            return Err(AssetError::Configuration(format!(
                "HfDownloader cannot handle '{}' sources",
                source.source_type()
            )));
        };
        if hf.repo_id.trim().is_empty() {
            return Err(AssetError::Configuration(
                "'repo_id' is required for hf sources".to_string(),
            ));
        }

        let _env_lock = HF_ENV_LOCK.lock().await;
        // Restored on every exit path, including errors and cancellation
        let _progress_env = if hf.progress_report {
            ScopedEnvVar::remove(HF_PROGRESS_ENV)
        } else {
            ScopedEnvVar::set(HF_PROGRESS_ENV, "1")
        };

        info!(
            "Downloading asset from hf://{}@{} to {}",
            source.source_info(),
            hf.revision,
            target.display()
        );

        let request = FetchRequest {
            source: hf.clone(),
            token: hf.token.clone().or_else(|| self.token.clone()),
            endpoint: self.endpoint.clone(),
            cache_dir: self.cache_dir.clone(),
            target: target.to_path_buf(),
        };
        let source_info = source.source_info();

        tokio::task::spawn_blocking(move || request.run())
            .await
            .map_err(|e| {
                AssetError::download("Hub download task failed")
                    .with_source(SourceType::Hf, source_info)
                    .with_cause(e)
            })?
    }
}

/// Everything the blocking hub fetch needs, owned so it can move to another thread.
#[cfg_attr(not(feature = "hf"), allow(dead_code))]
struct FetchRequest {
    source: HfSource,
    token: Option<SecretString>,
    endpoint: Option<String>,
    cache_dir: Option<PathBuf>,
    target: PathBuf,
}

impl FetchRequest {
    fn source_info(&self) -> String {
        AssetSourceConfig::Hf(self.source.clone()).source_info()
    }

    fn error(&self, message: &str, cause: impl Into<crate::error::BoxError>) -> AssetError {
        let info = self.source_info();
        AssetError::download(format!("{} ({})", message, info))
            .with_source(SourceType::Hf, info)
            .with_cause(cause)
    }

    fn run(self) -> Result<PathBuf, AssetError> {
        if let Some(parent) = self.target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| self.error("Failed to create target directory", e))?;
        }

        match self.source.filename.clone() {
            Some(filename) => {
                let cached = self.fetch_file(&filename)?;
                remove_path(&self.target)
                    .and_then(|()| copy_file_preserving(&cached, &self.target).map(|_| ()))
                    .map_err(|e| self.error("Failed to copy downloaded file", e))?;
            }
            None => {
                let files = self.fetch_snapshot()?;
                remove_path(&self.target)
                    .map_err(|e| self.error("Failed to clear snapshot directory", e))?;
                for (name, cached) in files {
                    let dest = self.target.join(&name);
                    let copied = dest
                        .parent()
                        .map_or(Ok(()), std::fs::create_dir_all)
                        .and_then(|()| {
                            if cached.is_dir() {
                                copy_tree(&cached, &dest)
                            } else {
                                copy_file_preserving(&cached, &dest).map(|_| ())
                            }
                        });
                    copied.map_err(|e| self.error("Failed to copy snapshot file", e))?;
                }
            }
        }

        debug!("Hub asset placed at {}", self.target.display());
        Ok(self.target)
    }

    #[cfg(feature = "hf")]
    fn repo(&self) -> Result<hf_hub::api::sync::ApiRepo, AssetError> {
        use crate::config::HfRepoType;
        use secrecy::ExposeSecret;

        let mut builder = hf_hub::api::sync::ApiBuilder::new()
            .with_progress(self.source.progress_report)
            .with_token(self.token.as_ref().map(|t| t.expose_secret().to_string()));
        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint.clone());
        }
        if let Some(cache_dir) = &self.cache_dir {
            builder = builder.with_cache_dir(cache_dir.clone());
        }
        let api = builder
            .build()
            .map_err(|e| self.error("Failed to initialise hub client", e))?;

        let repo_type = match self.source.repo_type {
            HfRepoType::Model => hf_hub::RepoType::Model,
            HfRepoType::Dataset => hf_hub::RepoType::Dataset,
            HfRepoType::Space => hf_hub::RepoType::Space,
        };
        Ok(api.repo(hf_hub::Repo::with_revision(
            self.source.repo_id.clone(),
            repo_type,
            self.source.revision.clone(),
        )))
    }

    #[cfg(feature = "hf")]
    fn fetch_file(&self, filename: &str) -> Result<PathBuf, AssetError> {
        self.repo()?
            .get(filename)
            .map_err(|e| self.error("Failed to download from hub", e))
    }

    #[cfg(feature = "hf")]
    fn fetch_snapshot(&self) -> Result<Vec<(String, PathBuf)>, AssetError> {
        let repo = self.repo()?;
        let info = repo
            .info()
            .map_err(|e| self.error("Failed to list repository files", e))?;

        let mut files = Vec::with_capacity(info.siblings.len());
        for sibling in info.siblings {
            if !is_plain_relative(&sibling.rfilename) {
                log::warn!("Skipping repository file with unsafe path: {}", sibling.rfilename);
                continue;
            }
            let cached = repo
                .get(&sibling.rfilename)
                .map_err(|e| self.error("Failed to download from hub", e))?;
            files.push((sibling.rfilename, cached));
        }
        Ok(files)
    }

    #[cfg(not(feature = "hf"))]
    fn fetch_file(&self, _filename: &str) -> Result<PathBuf, AssetError> {
        Err(AssetError::HubClientUnavailable)
    }

    #[cfg(not(feature = "hf"))]
    fn fetch_snapshot(&self) -> Result<Vec<(String, PathBuf)>, AssetError> {
        Err(AssetError::HubClientUnavailable)
    }
}

#[cfg_attr(not(feature = "hf"), allow(dead_code))]
fn is_plain_relative(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_plain_relative() {
        assert!(is_plain_relative("model.safetensors"));
        assert!(is_plain_relative("onnx/model.onnx"));
        assert!(!is_plain_relative("../escape"));
        assert!(!is_plain_relative("/abs/path"));
        assert!(!is_plain_relative(""));
    }

    #[cfg(not(feature = "hf"))]
    #[test]
    fn test_new_without_hub_client() {
        assert!(matches!(
            HfDownloader::new(None),
            Err(AssetError::HubClientUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_rejects_other_source_types() {
        let Ok(downloader) = HfDownloader::new(None) else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let result = downloader
            .download(
                &AssetSourceConfig::http("https://x/y.bin"),
                &dir.path().join("y.bin"),
            )
            .await;
        assert!(matches!(result, Err(AssetError::Configuration(_))));
    }
}
