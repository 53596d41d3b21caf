use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use log::{debug, info};
use sha2::{Digest, Sha256};

use crate::error::AssetError;

/// Read buffer used when hashing.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Files larger than this report hashing progress.
const PROGRESS_THRESHOLD: u64 = 100 * 1024 * 1024;

const SHA256_HEX_LEN: usize = 64;

/// Hex SHA-256 digest of a file, read in `chunk_size` pieces.
///
/// A missing file surfaces as `io::ErrorKind::NotFound`.
pub fn calculate_sha256(path: &Path, chunk_size: usize) -> io::Result<String> {
    let mut file = File::open(path)?;
    let total = file.metadata()?.len();
    let report_progress = total > PROGRESS_THRESHOLD;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut processed = 0u64;
    let mut next_report = 10u64;

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        processed += bytes_read as u64;

        if report_progress {
            let percent = processed * 100 / total;
            if percent >= next_report {
                info!("Hashing {}: {}%", path.display(), percent);
                next_report = (percent / 10 + 1) * 10;
            }
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Split `"sha256:<hex>"` and return the lowercased digest.
pub fn parse_checksum(checksum: &str) -> Result<String, AssetError> {
    let invalid = |reason: &str| AssetError::InvalidChecksum {
        checksum: checksum.to_string(),
        reason: reason.to_string(),
    };

    let (algorithm, digest) = checksum
        .split_once(':')
        .ok_or_else(|| invalid("expected format 'sha256:<hex digest>'"))?;

    if !algorithm.eq_ignore_ascii_case("sha256") {
        return Err(invalid(&format!(
            "unsupported algorithm '{}', only sha256 is supported",
            algorithm
        )));
    }
    if digest.len() != SHA256_HEX_LEN {
        return Err(invalid(&format!(
            "expected {} hex characters, got {}",
            SHA256_HEX_LEN,
            digest.len()
        )));
    }
    if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("digest contains non-hex characters"));
    }

    Ok(digest.to_ascii_lowercase())
}

/// Compare a file against a `"sha256:<hex>"` checksum.
///
/// A mismatch is `Ok(false)`. Malformed checksums are `InvalidChecksum`, a
/// missing file is `Io(NotFound)` and any other read failure is `Verification`.
pub fn verify_checksum(path: &Path, checksum: &str) -> Result<bool, AssetError> {
    let expected = parse_checksum(checksum)?;

    let actual = match calculate_sha256(path, DEFAULT_CHUNK_SIZE) {
        Ok(hash) => hash,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e.into()),
        Err(e) => {
            return Err(AssetError::verification(format!(
                "Failed to compute checksum of {}",
                path.display()
            ))
            .with_cause(e))
        }
    };

    if actual == expected {
        debug!("Checksum verified for {}", path.display());
        Ok(true)
    } else {
        info!(
            "Checksum mismatch for {}: expected {}, got {}",
            path.display(),
            expected,
            actual
        );
        Ok(false)
    }
}
