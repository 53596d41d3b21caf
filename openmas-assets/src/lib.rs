//! Local, versioned cache for externally sourced assets (model weights,
//! datasets, binaries).
//!
//! Assets are declared in a [`ProjectConfig`] and resolved to a local path
//! with [`AssetManager::get_asset_path`]. The first call downloads (HTTP,
//! Hugging Face Hub or local copy), verifies and optionally unpacks the asset;
//! later calls are cache hits as long as the persisted metadata still matches
//! the declaration. A per-asset file lock makes sure only one caller, in any
//! process, fills a cache entry at a time.

pub mod assets;
pub mod config;
pub mod downloaders;
pub mod error;
pub mod utils;

pub use assets::{AssetInfo, AssetManager, AssetMetadata, AssetStatus};
pub use config::{
    AssetConfig, AssetSettings, AssetSourceConfig, HfRepoType, HfSource, HttpSource,
    LocalSource, ProjectConfig, ProjectSettings, SourceType, UnpackFormat,
};
pub use downloaders::{
    get_downloader_for_source, Downloader, HfDownloader, HttpDownloader, LocalFileHandler,
};
pub use error::AssetError;

pub type Result<T, E = AssetError> = std::result::Result<T, E>;
