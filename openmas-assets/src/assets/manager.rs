use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use openmas_filelock::FileLock;
use tokio_util::sync::CancellationToken;

use super::metadata::{AssetMetadata, UNPACKED_MARKER};
use super::status::AssetStatus;
use super::AssetInfo;
use crate::config::{resolve_cache_dir, AssetConfig, ProjectConfig};
use crate::downloaders::{get_downloader_for_source, partial_path};
use crate::error::AssetError;
use crate::utils::checksum::verify_checksum;
use crate::utils::fs::{dir_size, format_size, remove_path};
use crate::utils::unpack::unpack_archive;

/// Directory under the cache root holding the per-asset lock files.
const LOCKS_DIR: &str = ".locks";

/// Resolves declared assets to local paths, downloading them on first use.
///
/// Every mutation of an asset's cache entry happens while holding that
/// asset's file lock, so concurrent callers (tasks or processes) never
/// download the same `(name, version)` twice.
pub struct AssetManager {
    cache_dir: PathBuf,
    locks_dir: PathBuf,
    assets: Vec<AssetConfig>,
    lock_timeout: Option<Duration>,
    /// Cancellation tokens for downloads running in this process
    downloading: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl AssetManager {
    /// Create a manager for the assets declared in `config`.
    ///
    /// Creates the cache and lock directories if they don't exist.
    pub fn new(config: &ProjectConfig) -> Result<Self, AssetError> {
        config.validate()?;

        let cache_dir = resolve_cache_dir(&config.settings.assets)?;
        let locks_dir = cache_dir.join(LOCKS_DIR);
        std::fs::create_dir_all(&cache_dir)?;
        std::fs::create_dir_all(&locks_dir)?;

        info!(
            "Asset cache directory: {:?} ({} assets declared)",
            cache_dir,
            config.assets.len()
        );

        Ok(Self {
            cache_dir,
            locks_dir,
            assets: config.assets.clone(),
            lock_timeout: None,
            downloading: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Fail lock acquisition with [`AssetError::Lock`] after waiting this long.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn locks_dir(&self) -> &Path {
        &self.locks_dir
    }

    /// Look up a declared asset by name.
    pub fn asset(&self, name: &str) -> Result<&AssetConfig, AssetError> {
        self.assets
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| AssetError::NotDeclared(name.to_string()))
    }

    /// `cache_dir/asset_type/name/version`
    pub fn cache_path_for_asset(&self, asset: &AssetConfig) -> PathBuf {
        self.cache_dir
            .join(&asset.asset_type)
            .join(&asset.name)
            .join(&asset.version)
    }

    /// `locks_dir/{name}_{version}.lock`
    pub fn lock_path_for_asset(&self, asset: &AssetConfig) -> PathBuf {
        self.locks_dir
            .join(format!("{}_{}.lock", asset.name, asset.version))
    }

    fn lock_for(&self, asset: &AssetConfig) -> FileLock {
        let lock = FileLock::new(self.lock_path_for_asset(asset));
        match self.lock_timeout {
            Some(timeout) => lock.with_timeout(timeout),
            None => lock,
        }
    }

    /// Path `get_asset_path` hands out: the file, or the directory for unpacked assets.
    fn result_path(&self, asset: &AssetConfig) -> PathBuf {
        let asset_dir = self.cache_path_for_asset(asset);
        if asset.unpack {
            asset_dir
        } else {
            asset_dir.join(asset.source.filename())
        }
    }

    /// Whether the entry on disk was built from the current declaration and is complete.
    fn is_cache_valid(&self, asset: &AssetConfig, metadata: Option<&AssetMetadata>) -> bool {
        let Some(metadata) = metadata else {
            return false;
        };
        if *metadata != AssetMetadata::from(asset) {
            debug!("Metadata of asset '{}' does not match its declaration", asset.name);
            return false;
        }

        let asset_dir = self.cache_path_for_asset(asset);
        if asset.unpack {
            asset_dir.join(UNPACKED_MARKER).exists()
        } else {
            asset_dir.join(asset.source.filename()).exists()
        }
    }

    /// Resolve an asset to a local path, downloading it if needed.
    ///
    /// Holds the asset's lock for the whole call. On a cache miss the entry
    /// directory is rebuilt: download, checksum verification (if declared),
    /// unpacking (if declared), then the metadata file is written last.
    pub async fn get_asset_path(&self, name: &str) -> Result<PathBuf, AssetError> {
        let asset = self.asset(name)?;
        let _guard = self.lock_for(asset).acquire_async().await?;

        let asset_dir = self.cache_path_for_asset(asset);
        let metadata = AssetMetadata::read(&asset_dir);
        if self.is_cache_valid(asset, metadata.as_ref()) {
            let path = self.result_path(asset);
            debug!("Asset '{}' found in cache at {:?}", name, path);
            return Ok(path);
        }

        info!(
            "Asset '{}' ({}) is not cached or outdated, fetching",
            name, asset
        );

        // Start from an empty entry so no stale file or marker survives
        remove_path(&asset_dir)?;

        let downloaded = self.download_asset(asset).await?;

        if !self.verify_asset(asset, &downloaded)? {
            return Err(AssetError::verification(format!(
                "Checksum verification failed for asset '{}' ({})",
                name,
                downloaded.display()
            ))
            .with_source(asset.source.source_type(), asset.source.source_info()));
        }

        if asset.unpack {
            self.unpack_locked(asset, &downloaded, &asset_dir)?;
        }

        AssetMetadata::from(asset).write(&asset_dir)?;

        let path = self.result_path(asset);
        info!(
            "Asset '{}' ready at {:?} ({})",
            name,
            path,
            format_size(dir_size(&asset_dir).unwrap_or(0))
        );
        Ok(path)
    }

    /// Download an asset into its cache directory and return the downloaded path.
    ///
    /// Does not take the asset lock; `get_asset_path` calls this while holding it.
    pub async fn download_asset(&self, asset: &AssetConfig) -> Result<PathBuf, AssetError> {
        let downloader = get_downloader_for_source(&asset.source)?;

        let asset_dir = self.cache_path_for_asset(asset);
        tokio::fs::create_dir_all(&asset_dir).await.map_err(|e| {
            AssetError::download(format!(
                "Failed to create cache directory for asset '{}'",
                asset.name
            ))
            .with_source(asset.source.source_type(), asset.source.source_info())
            .with_cause(e)
        })?;
        let target = asset_dir.join(asset.source.filename());

        let registration = self.register_download(&asset.name)?;
        let cancel_token = registration.token.clone();

        info!("Starting download of asset '{}'", asset.name);

        let result = tokio::select! {
            result = downloader.download(&asset.source, &target) => result,
            _ = cancel_token.cancelled() => {
                let partial = partial_path(&target);
                if let Err(e) = remove_path(&partial) {
                    warn!("Failed to remove partial download {:?}: {}", partial, e);
                }
                Err(AssetError::download(format!(
                    "Download of asset '{}' was cancelled",
                    asset.name
                ))
                .with_source(asset.source.source_type(), asset.source.source_info()))
            }
        };
        drop(registration);

        match result {
            Ok(path) => {
                info!("Fetched asset '{}' into {:?}", asset.name, path);
                Ok(path)
            }
            Err(e @ (AssetError::Download { .. } | AssetError::Configuration(_))) => {
                error!("Download of asset '{}' failed: {}", asset.name, e);
                Err(e)
            }
            Err(e) => {
                error!("Download of asset '{}' failed: {}", asset.name, e);
                Err(AssetError::download(format!(
                    "Unexpected error downloading asset '{}'",
                    asset.name
                ))
                .with_source(asset.source.source_type(), asset.source.source_info())
                .with_cause(e))
            }
        }
    }

    /// Check a downloaded file against the declared checksum.
    ///
    /// `Ok(true)` when no checksum is declared; a mismatch is `Ok(false)`.
    pub fn verify_asset(&self, asset: &AssetConfig, path: &Path) -> Result<bool, AssetError> {
        let Some(checksum) = &asset.checksum else {
            info!(
                "No checksum declared for asset '{}', skipping verification",
                asset.name
            );
            return Ok(true);
        };

        info!("Verifying checksum of asset '{}'", asset.name);
        verify_checksum(path, checksum).map_err(|e| match e {
            AssetError::Verification { .. } => {
                e.with_source(asset.source.source_type(), asset.source.source_info())
            }
            other => other,
        })
    }

    /// Extract a downloaded archive into `target_dir`.
    ///
    /// No-op for assets without `unpack`. Takes the asset lock with a blocking
    /// wait, so it must not be called while the same asset is being resolved
    /// by `get_asset_path` on the current thread.
    pub fn unpack_asset(
        &self,
        asset: &AssetConfig,
        archive: &Path,
        target_dir: &Path,
    ) -> Result<(), AssetError> {
        if !asset.unpack {
            debug!("Asset '{}' is not marked for unpacking", asset.name);
            return Ok(());
        }
        require_format(asset)?;

        let _guard = self.lock_for(asset).acquire()?;
        self.unpack_locked(asset, archive, target_dir)
    }

    /// Unpack with the asset lock already held. Skips work if the marker exists.
    fn unpack_locked(
        &self,
        asset: &AssetConfig,
        archive: &Path,
        target_dir: &Path,
    ) -> Result<(), AssetError> {
        let format = require_format(asset)?;

        let marker = target_dir.join(UNPACKED_MARKER);
        if marker.exists() {
            info!(
                "Asset '{}' already unpacked in {:?}",
                asset.name, target_dir
            );
            return Ok(());
        }

        unpack_archive(archive, target_dir, format, false).map_err(|e| match e {
            AssetError::Unpack { .. } => {
                e.with_source(asset.source.source_type(), asset.source.source_info())
            }
            other => other,
        })?;
        std::fs::write(&marker, b"")?;

        info!("Unpacked asset '{}' into {:?}", asset.name, target_dir);
        Ok(())
    }

    /// All declared assets with their current status.
    pub fn list_assets(&self) -> Vec<AssetInfo> {
        self.assets
            .iter()
            .map(|asset| {
                let status = self.compute_status(asset);
                AssetInfo::from_config_and_status(asset, &status)
            })
            .collect()
    }

    pub fn asset_status(&self, name: &str) -> Result<AssetStatus, AssetError> {
        let asset = self.asset(name)?;
        Ok(self.compute_status(asset))
    }

    /// Compute runtime status for an asset without taking its lock.
    fn compute_status(&self, asset: &AssetConfig) -> AssetStatus {
        let is_downloading = self
            .downloading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&asset.name);

        let asset_dir = self.cache_path_for_asset(asset);
        let metadata = AssetMetadata::read(&asset_dir);
        let is_cached = self.is_cache_valid(asset, metadata.as_ref());

        let size_on_disk = if asset_dir.exists() {
            dir_size(&asset_dir).unwrap_or_else(|e| {
                warn!("Failed to measure {:?}: {}", asset_dir, e);
                0
            })
        } else {
            0
        };

        AssetStatus {
            is_cached,
            is_downloading,
            path: is_cached.then(|| self.result_path(asset)),
            size_on_disk,
            metadata,
        }
    }

    /// Delete an asset's cache entry. Returns whether anything was removed.
    pub async fn clear_asset_cache(&self, name: &str) -> Result<bool, AssetError> {
        let asset = self.asset(name)?;
        let _guard = self.lock_for(asset).acquire_async().await?;

        let asset_dir = self.cache_path_for_asset(asset);
        if !asset_dir.exists() {
            debug!("Asset '{}' has no cache entry", name);
            return Ok(false);
        }

        let size = dir_size(&asset_dir).unwrap_or(0);
        remove_path(&asset_dir)?;
        info!(
            "Removed cached asset '{}' ({} freed)",
            name,
            format_size(size)
        );
        Ok(true)
    }

    /// Delete the cache entries of every declared asset. Returns how many were removed.
    pub async fn clear_all_assets(&self) -> Result<usize, AssetError> {
        let mut removed = 0;
        for asset in &self.assets {
            if self.clear_asset_cache(&asset.name).await? {
                removed += 1;
            }
        }
        info!("Cleared {} cached assets", removed);
        Ok(removed)
    }

    /// Cancel a download running in this process.
    pub fn cancel_download(&self, name: &str) -> Result<(), AssetError> {
        self.asset(name)?;
        let tokens = self
            .downloading
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = tokens.get(name) {
            token.cancel();
            info!("Cancellation requested for asset '{}'", name);
            Ok(())
        } else {
            Err(AssetError::download(format!(
                "No active download for asset '{}'",
                name
            )))
        }
    }

    fn register_download(&self, name: &str) -> Result<DownloadRegistration, AssetError> {
        let mut downloading = self
            .downloading
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if downloading.contains_key(name) {
            warn!("Asset '{}' is already being downloaded", name);
            return Err(AssetError::download(format!(
                "Asset '{}' is already being downloaded",
                name
            )));
        }

        let token = CancellationToken::new();
        downloading.insert(name.to_string(), token.clone());
        Ok(DownloadRegistration {
            downloading: Arc::clone(&self.downloading),
            name: name.to_string(),
            token,
        })
    }
}

/// Entry in the in-process download table, removed on drop (also when the
/// download future is dropped mid-flight).
struct DownloadRegistration {
    downloading: Arc<Mutex<HashMap<String, CancellationToken>>>,
    name: String,
    token: CancellationToken,
}

impl Drop for DownloadRegistration {
    fn drop(&mut self) {
        self.downloading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

fn require_format(asset: &AssetConfig) -> Result<crate::config::UnpackFormat, AssetError> {
    asset.unpack_format.ok_or_else(|| {
        AssetError::Configuration(format!(
            "Asset '{}' has unpack enabled but no unpack_format",
            asset.name
        ))
    })
}
