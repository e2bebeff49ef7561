//! In-place STEM metadata editing for ISO-BMFF / MP4 containers.
//!
//! STEM audio files store a description blob in a `stem` box nested at
//! `moov/udta/stem`. This crate reads and rewrites that blob in place while
//! keeping the container byte-exact: when an edit changes the file's size it
//! patches every ancestor box header (32-bit and 64-bit size fields) and
//! every absolute file offset stored elsewhere in the container (`stco` and
//! `co64` chunk tables, `tfhd` base-data-offsets) in a single pass, and it
//! allocates `free` padding so repeat edits usually avoid shifting the file
//! at all.
//!
//! # Quick Start
//!
//! ```no_run
//! use stem_io::StemFile;
//!
//! # fn main() -> stem_io::Result<()> {
//! let mut stem = StemFile::open("track.stem.mp4")?;
//!
//! // Read the current payload
//! println!("payload: {} bytes", stem.data().len());
//!
//! // Replace it and commit; offsets and sizes are patched automatically
//! stem.set_data(br#"{"stems":[]}"#.to_vec());
//! stem.save()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Lower-level seams
//!
//! The engine is built on two collaborators that are exported for reuse:
//! [`AtomTree`] (parsed box hierarchy with path lookup, recursive search, and
//! handle-based child mutation) and [`BlockFile`] (byte-range splicing with
//! whole-file shifts). Saves are synchronous blocking I/O with no rollback;
//! callers that need atomicity should work on a temporary copy.

mod atoms;
mod block;
mod boxes;
mod error;
mod stem;

pub use atoms::{AtomInfo, AtomTree};
pub use block::BlockFile;
pub use boxes::{BoxHeader, BoxType, HEADER_SIZE, HEADER_SIZE_LARGE};
pub use error::{Error, Result};
pub use stem::StemFile;

// Test utilities - only compiled for tests or when explicitly enabled
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
