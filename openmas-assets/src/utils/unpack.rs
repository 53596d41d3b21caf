//! Archive extraction with path-traversal protection.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use log::{debug, info, warn};

use crate::config::UnpackFormat;
use crate::error::AssetError;

/// A file or directory written during extraction, relative to the target dir.
#[derive(Debug)]
struct Member {
    relative: PathBuf,
    is_file: bool,
}

enum ExtractError {
    /// The archive itself is unreadable or malformed
    Corrupt(Box<dyn std::error::Error + Send + Sync>),
    /// Writing the extracted content failed
    Unexpected(io::Error),
}

impl From<io::Error> for ExtractError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::UnexpectedEof => Self::Corrupt(Box::new(e)),
            _ => Self::Unexpected(e),
        }
    }
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => io.into(),
            other => Self::Corrupt(Box::new(other)),
        }
    }
}

/// Extract `archive_path` into `target_dir`.
///
/// Returns `target_dir`, or with `destination_is_file` the single extracted
/// entry (or the preferred file when there are several). Entries that would
/// land outside `target_dir` are skipped.
pub fn unpack_archive(
    archive_path: &Path,
    target_dir: &Path,
    format: UnpackFormat,
    destination_is_file: bool,
) -> Result<PathBuf, AssetError> {
    if !archive_path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Archive not found: {}", archive_path.display()),
        )
        .into());
    }

    info!(
        "Unpacking {} ({}) to {}",
        archive_path.display(),
        format,
        target_dir.display()
    );

    let extracted = fs::create_dir_all(target_dir)
        .map_err(ExtractError::Unexpected)
        .and_then(|()| match format {
            UnpackFormat::Zip => extract_zip(archive_path, target_dir),
            UnpackFormat::Tar => {
                let file = File::open(archive_path)?;
                extract_tar(tar::Archive::new(file), target_dir)
            }
            UnpackFormat::TarGz => {
                let file = File::open(archive_path)?;
                extract_tar(tar::Archive::new(GzDecoder::new(file)), target_dir)
            }
        });

    let members = match extracted {
        Ok(members) => members,
        Err(ExtractError::Corrupt(e)) => {
            return Err(AssetError::unpack(format!(
                "Error unpacking {}: {}",
                archive_path.display(),
                e
            ))
            .with_cause(e))
        }
        Err(ExtractError::Unexpected(e)) => {
            return Err(AssetError::unpack(format!(
                "Unexpected error unpacking {}: {}",
                archive_path.display(),
                e
            ))
            .with_cause(e))
        }
    };

    debug!(
        "Extracted {} entries from {}",
        members.len(),
        archive_path.display()
    );

    if destination_is_file {
        select_file(target_dir, &members)
    } else {
        Ok(target_dir.to_path_buf())
    }
}

fn extract_tar<R: io::Read>(
    mut archive: tar::Archive<R>,
    target_dir: &Path,
) -> Result<Vec<Member>, ExtractError> {
    let mut members = Vec::new();

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?.into_owned();

        let Some(relative) = contained(&path) else {
            warn!("Skipping archive member outside target dir: {}", path.display());
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let link = entry.link_name().map_err(corrupt)?;
            let resolved = match (&link, entry_type.is_symlink()) {
                (Some(link), true) => relative.parent().map(|p| p.join(link)),
                (Some(link), false) => Some(link.to_path_buf()),
                (None, _) => None,
            };
            if resolved.as_deref().and_then(contained).is_none() {
                warn!("Skipping link pointing outside target dir: {}", path.display());
                continue;
            }
        }

        if !entry.unpack_in(target_dir)? {
            warn!("Skipping archive member outside target dir: {}", path.display());
            continue;
        }

        members.push(Member {
            is_file: !entry_type.is_dir(),
            relative,
        });
    }

    Ok(members)
}

fn extract_zip(archive_path: &Path, target_dir: &Path) -> Result<Vec<Member>, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut members = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let Some(relative) = file.enclosed_name() else {
            warn!("Skipping archive member outside target dir: {}", file.name());
            continue;
        };
        let dest_path = target_dir.join(&relative);

        if file.is_dir() {
            fs::create_dir_all(&dest_path).map_err(ExtractError::Unexpected)?;
        } else {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent).map_err(ExtractError::Unexpected)?;
            }
            let mut outfile = File::create(&dest_path).map_err(ExtractError::Unexpected)?;
            io::copy(&mut file, &mut outfile)?;

            #[cfg(unix)]
            if let Some(mode) = file.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode))
                    .map_err(ExtractError::Unexpected)?;
            }
        }

        members.push(Member {
            is_file: !file.is_dir(),
            relative,
        });
    }

    Ok(members)
}

fn corrupt(e: io::Error) -> ExtractError {
    ExtractError::Corrupt(Box::new(e))
}

/// Normalize a member path, or `None` if it would escape the extraction root.
fn contained(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(normalized)
}

fn select_file(target_dir: &Path, members: &[Member]) -> Result<PathBuf, AssetError> {
    let first_file = members.iter().find(|m| m.is_file);
    let Some(first_file) = first_file else {
        return Err(AssetError::unpack(format!(
            "No files found in archive extracted to {}",
            target_dir.display()
        )));
    };

    if let [only] = members {
        return Ok(target_dir.join(&only.relative));
    }

    let chosen = members
        .iter()
        .find(|m| m.is_file && m.relative.components().count() == 1)
        .unwrap_or(first_file);
    Ok(target_dir.join(&chosen.relative))
}
