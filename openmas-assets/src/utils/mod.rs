//! Helpers shared by the downloaders and the manager.

pub mod checksum;
pub mod env;
pub mod fs;
pub mod unpack;

pub use checksum::{calculate_sha256, verify_checksum};
pub use unpack::unpack_archive;
