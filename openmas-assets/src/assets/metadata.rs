use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{AssetConfig, SourceType, UnpackFormat};

/// Name of the metadata file inside an asset's cache directory.
pub const METADATA_FILE: &str = ".asset_info.json";

/// Zero-byte marker written once an archive has been extracted.
pub const UNPACKED_MARKER: &str = ".unpacked";

/// Snapshot of the declaration a cache entry was built from.
///
/// A cache entry is only reused while this equals the snapshot of the current
/// declaration, field for field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub name: String,
    pub version: String,
    pub asset_type: String,
    pub source_type: SourceType,
    pub checksum: Option<String>,
    pub unpack: bool,
    pub unpack_format: Option<UnpackFormat>,
    pub description: Option<String>,
}

impl From<&AssetConfig> for AssetMetadata {
    fn from(asset: &AssetConfig) -> Self {
        Self {
            name: asset.name.clone(),
            version: asset.version.clone(),
            asset_type: asset.asset_type.clone(),
            source_type: asset.source.source_type(),
            checksum: asset.checksum.clone(),
            unpack: asset.unpack,
            unpack_format: asset.unpack_format,
            description: asset.description.clone(),
        }
    }
}

impl AssetMetadata {
    pub fn path_in(asset_dir: &Path) -> PathBuf {
        asset_dir.join(METADATA_FILE)
    }

    /// Read the metadata of a cache entry.
    ///
    /// Missing, unreadable and corrupt files all yield `None`, which callers
    /// treat as a cache miss.
    pub fn read(asset_dir: &Path) -> Option<Self> {
        let path = Self::path_in(asset_dir);
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No metadata at {}", path.display());
                return None;
            }
            Err(e) => {
                warn!("Failed to read metadata {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice(&contents) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Ignoring corrupt metadata {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write the metadata next to the asset, replacing any previous file.
    pub fn write(&self, asset_dir: &Path) -> io::Result<()> {
        let path = Self::path_in(asset_dir);
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // Rename over the old file so readers never see a half-written one
        let tmp = asset_dir.join(format!("{}.tmp", METADATA_FILE));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        debug!("Wrote metadata {}", path.display());
        Ok(())
    }
}
