use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::config::{AssetSourceConfig, SourceType};
use crate::error::AssetError;
use crate::utils::fs::{copy_file_preserving, copy_tree, remove_path};

/// "Downloads" an asset by copying it from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileHandler;

impl LocalFileHandler {
    pub fn new() -> Self {
        Self
    }

    pub async fn download(
        &self,
        source: &AssetSourceConfig,
        target: &Path,
    ) -> Result<PathBuf, AssetError> {
        let AssetSourceConfig::Local(local) = source else {
            return Err(AssetError::Configuration(format!(
                "LocalFileHandler cannot handle '{}' sources",
                source.source_type()
            )));
        };
        if local.path.as_os_str().is_empty() {
            return Err(AssetError::Configuration(
                "'path' is required for local sources".to_string(),
            ));
        }

        let src = local.path.clone();
        let target = target.to_path_buf();
        let src_info = src.display().to_string();
        tokio::task::spawn_blocking(move || copy_local(&src, &target))
            .await
            .map_err(|e| {
                AssetError::download("Local copy task failed")
                    .with_source(SourceType::Local, src_info)
                    .with_cause(e)
            })?
    }
}

fn copy_local(src: &Path, target: &Path) -> Result<PathBuf, AssetError> {
    let local_error = |message: String, cause: std::io::Error| {
        AssetError::download(message)
            .with_source(SourceType::Local, src.display().to_string())
            .with_cause(cause)
    };

    if !src.exists() {
        return Err(AssetError::download(format!(
            "Local source path does not exist: {}",
            src.display()
        ))
        .with_source(SourceType::Local, src.display().to_string()));
    }

    info!(
        "Copying asset from {} to {}",
        src.display(),
        target.display()
    );

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            local_error(
                format!("Failed to create directory {}", parent.display()),
                e,
            )
        })?;
    }

    remove_path(target).map_err(|e| {
        local_error(
            format!("Failed to remove existing {}", target.display()),
            e,
        )
    })?;

    let copied = if src.is_dir() {
        copy_tree(src, target)
    } else {
        copy_file_preserving(src, target).map(|_| ())
    };
    copied.map_err(|e| {
        local_error(
            format!(
                "Failed to copy {} to {}",
                src.display(),
                target.display()
            ),
            e,
        )
    })?;

    Ok(target.to_path_buf())
}
