mod manager;
mod metadata;
mod status;

pub use manager::AssetManager;
pub use metadata::{AssetMetadata, METADATA_FILE, UNPACKED_MARKER};
pub use status::AssetStatus;

use std::path::PathBuf;

use serde::Serialize;

use crate::config::{AssetConfig, SourceType};

/// Combined view of a declared asset and its cache state.
#[derive(Debug, Clone, Serialize)]
pub struct AssetInfo {
    // From the declaration
    pub name: String,
    pub version: String,
    pub asset_type: String,
    pub source_type: SourceType,
    pub source: String,
    pub description: Option<String>,

    // From status
    pub is_cached: bool,
    pub is_downloading: bool,
    pub path: Option<PathBuf>,
    pub size_on_disk: u64,
}

impl AssetInfo {
    pub fn from_config_and_status(asset: &AssetConfig, status: &AssetStatus) -> Self {
        Self {
            name: asset.name.clone(),
            version: asset.version.clone(),
            asset_type: asset.asset_type.clone(),
            source_type: asset.source.source_type(),
            source: asset.source.source_info(),
            description: asset.description.clone(),
            is_cached: status.is_cached,
            is_downloading: status.is_downloading,
            path: status.path.clone(),
            size_on_disk: status.size_on_disk,
        }
    }
}
