use std::path::PathBuf;

use serde::Serialize;

use super::AssetMetadata;

/// Runtime status of an asset - computed, not stored.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssetStatus {
    /// Is there a cache entry matching the current declaration?
    pub is_cached: bool,
    /// Is this process currently downloading the asset?
    pub is_downloading: bool,
    /// Path `get_asset_path` would return, when cached
    pub path: Option<PathBuf>,
    /// Bytes used by the asset's cache directory
    pub size_on_disk: u64,
    /// Metadata found on disk, even if it no longer matches
    pub metadata: Option<AssetMetadata>,
}
