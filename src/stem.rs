//! STEM payload mutation engine
//!
//! A STEM container carries its description blob in a `stem` box at
//! `moov/udta/stem`. Editing that blob in place changes the file's size, so a
//! save has to keep three kinds of bookkeeping consistent in one pass:
//!
//! - every ancestor box header must still state its true span,
//! - every absolute offset stored elsewhere in the file (`stco`/`co64` chunk
//!   tables, `tfhd` base-data-offsets) that points past the edit must move by
//!   the same delta,
//! - padding (`free`) boxes absorb small deltas so most edits never touch
//!   anything outside the rewritten region.
//!
//! Saves are synchronous and not crash-safe: a failed write mid-save leaves
//! the file in an unspecified state. Callers needing atomicity should stage
//! to a temporary file and swap it in.

use crate::{
    atoms::AtomTree,
    block::BlockFile,
    boxes::{BoxHeader, BoxType, HEADER_SIZE},
    error::{Error, Result},
};
use atree::Token;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    io::{Read, Seek, SeekFrom},
    path::Path,
};

// Padding rounds the stem region up to multiples of this block size.
const PAD_BLOCK: u64 = 1024;
// Fill byte for padding box content.
const PAD_FILL: u8 = 0x01;

const STEM_PATH: &[BoxType] = &[BoxType::MoovBox, BoxType::UdtaBox, BoxType::StemBox];

/// Render a box as `size(4) + type(4) + data`
fn render_box(name: BoxType, data: &[u8]) -> Result<Vec<u8>> {
    let size = data.len() as u64 + HEADER_SIZE;
    if size > u32::MAX as u64 {
        return Err(Error::InvalidFormat(format!(
            "box '{}' content too large: {} bytes",
            name.fourcc(),
            data.len()
        )));
    }
    let mut out = Vec::with_capacity(size as usize);
    BoxHeader {
        name,
        size,
        large_size: false,
    }
    .write(&mut out)?;
    out.extend_from_slice(data);
    Ok(out)
}

/// Render a `free` box whose total size (header included) is `total`
fn render_free_box(total: u64) -> Result<Vec<u8>> {
    render_box(
        BoxType::FreeBox,
        &vec![PAD_FILL; (total - HEADER_SIZE) as usize],
    )
}

/// Padding box size that rounds `used` bytes up to the next block boundary,
/// skipping remainders too small to host the 8-byte box header.
fn block_padding(used: u64) -> u64 {
    let mut total = (used + (PAD_BLOCK - 1)) & !(PAD_BLOCK - 1);
    if total - used < HEADER_SIZE {
        total += PAD_BLOCK;
    }
    total - used
}

// The save path taken, decided once per save from path resolution and payload
// presence.
enum SaveAction {
    /// Rewrite the existing stem box in place
    Update(Vec<Token>),
    /// Payload cleared: remove the enclosing udta box
    Remove(Vec<Token>),
    /// No stem box yet: insert one (and a udta wrapper if needed)
    Create,
    /// Nothing stored and nothing to store
    Nothing,
}

/// A STEM container opened for payload editing
///
/// The payload is read once at open time and held in memory; [`set_data`]
/// only stages the new bytes, [`save`] commits them to the file.
///
/// [`set_data`]: StemFile::set_data
/// [`save`]: StemFile::save
#[derive(Debug)]
pub struct StemFile {
    blocks: BlockFile,
    atoms: AtomTree,
    raw_data: Vec<u8>,
}

impl StemFile {
    /// Open a container file and load the current stem payload, if any
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut blocks = BlockFile::open(path)?;
        let atoms = AtomTree::parse(&mut blocks)?;

        if atoms.find(BoxType::MoovBox).is_none() {
            return Err(Error::InvalidFormat(
                "not a BMFF container (missing moov box)".into(),
            ));
        }

        let mut raw_data = Vec::new();
        let path = atoms.path(STEM_PATH);
        if path.len() == 3 {
            let stem = atoms.node(path[2]);
            let header = stem.header_len();
            blocks.seek(SeekFrom::Start(stem.offset + header))?;
            raw_data = vec![0u8; (stem.size - header) as usize];
            blocks.read_exact(&mut raw_data)?;
        }

        Ok(Self {
            blocks,
            atoms,
            raw_data,
        })
    }

    /// The in-memory stem payload; empty if the file has none
    pub fn data(&self) -> &[u8] {
        &self.raw_data
    }

    /// Stage a new payload. An empty payload marks the stem box for removal
    /// on the next save.
    pub fn set_data(&mut self, data: impl Into<Vec<u8>>) {
        self.raw_data = data.into();
    }

    /// Commit the staged payload to the file
    pub fn save(&mut self) -> Result<()> {
        // Resolve fresh: the tree may have been mutated by an earlier save.
        let path = self.atoms.path(STEM_PATH);
        let action = if path.len() == 3 {
            if self.raw_data.is_empty() {
                SaveAction::Remove(path)
            } else {
                SaveAction::Update(path)
            }
        } else if self.raw_data.is_empty() {
            SaveAction::Nothing
        } else {
            SaveAction::Create
        };

        match action {
            SaveAction::Update(path) => self.save_existing(path),
            SaveAction::Remove(path) => self.remove_existing(path),
            SaveAction::Create => self.save_new(),
            SaveAction::Nothing => Ok(()),
        }
    }

    /// Rewrite the existing stem box, reclaiming any adjacent `free` padding
    fn save_existing(&mut self, path: Vec<Token>) -> Result<()> {
        let mut data = render_box(BoxType::StemBox, &self.raw_data)?;
        let stem_len = data.len() as u64;

        let udta = path[1];
        let stem = path[2];

        let mut offset = self.atoms.node(stem).offset;
        let mut length = self.atoms.node(stem).size;

        // Absorb free siblings physically adjacent to the stem box so padding
        // from a previous edit is reused instead of orphaned.
        let mut absorbed = Vec::new();
        let children = self.atoms.children(udta);
        let index = children.iter().position(|t| *t == stem).ok_or_else(|| {
            Error::StructuralMismatch("stem box is not a child of its udta box".into())
        })?;
        if index > 0 {
            let token = children[index - 1];
            let prev = self.atoms.node(token);
            if prev.box_type == BoxType::FreeBox {
                offset = prev.offset;
                length += prev.size;
                absorbed.push(token);
            }
        }
        if let Some(&token) = children.get(index + 1) {
            let next = self.atoms.node(token);
            if next.box_type == BoxType::FreeBox {
                length += next.size;
                absorbed.push(token);
            }
        }

        let mut delta = data.len() as i64 - length as i64;
        if delta > 0 || (delta < 0 && delta > -(HEADER_SIZE as i64)) {
            // Region must grow; over-allocate so future edits fit in place.
            data.extend_from_slice(&render_free_box(block_padding(data.len() as u64))?);
            delta = data.len() as i64 - length as i64;
        } else if delta < 0 {
            // Exact fit: pad the shortfall away and skip all offset patching.
            data.extend_from_slice(&render_free_box((-delta) as u64)?);
            delta = 0;
        }

        self.blocks.insert(&data, offset, length)?;

        // Refresh the rewritten region in the tree so a later save in the
        // same session works from the true geometry.
        for token in absorbed {
            self.atoms.remove_child(udta, token);
        }
        self.atoms.set_extent(stem, offset, stem_len, false);
        let free_len = data.len() as u64 - stem_len;
        if free_len > 0 {
            self.atoms
                .insert_leaf_after(udta, stem, BoxType::FreeBox, offset + stem_len, free_len);
        }

        if delta != 0 {
            // The stem box itself was rewritten wholesale; only its ancestors
            // still carry stale sizes.
            self.update_parents(&path, delta, 1)?;
            self.update_offsets(delta, offset)?;
        }
        Ok(())
    }

    /// Remove the whole udta box holding the stem payload
    fn remove_existing(&mut self, path: Vec<Token>) -> Result<()> {
        let moov = path[0];
        let udta = path[1];

        let (offset, size) = {
            let info = self.atoms.node(udta);
            (info.offset, info.size)
        };
        if !self.atoms.remove_child(moov, udta) {
            return Err(Error::StructuralMismatch(
                "udta box is not a child of its moov box".into(),
            ));
        }

        let delta = -(size as i64);
        self.blocks.remove_block(offset, size)?;

        // udta and stem are gone; patch the surviving ancestors only.
        self.update_parents(&path, delta, 2)?;
        self.update_offsets(delta, offset)?;
        Ok(())
    }

    /// Insert a fresh stem box, wrapping it in a new udta box when the file
    /// has none
    fn save_new(&mut self) -> Result<()> {
        let mut data = render_box(BoxType::StemBox, &self.raw_data)?;

        let mut path = self.atoms.path(&[BoxType::MoovBox, BoxType::UdtaBox]);
        if path.len() != 2 {
            path = self.atoms.path(&[BoxType::MoovBox]);
            if path.is_empty() {
                return Err(Error::StructuralMismatch(
                    "container has no moov box".into(),
                ));
            }
            data = render_box(BoxType::UdtaBox, &data)?;
        }

        let parent = path[path.len() - 1];
        let offset = {
            let info = self.atoms.node(parent);
            info.offset + info.header_len()
        };
        let delta = data.len() as i64;

        self.blocks.insert(&data, offset, 0)?;
        self.update_parents(&path, delta, 0)?;
        self.update_offsets(delta, offset)?;

        // Insert the newly written box into the tree so a later save in the
        // same session sees it.
        self.atoms.parse_box_at(&mut self.blocks, offset, parent)?;
        Ok(())
    }

    /// Add `delta` to the stored size of every box on `path`, skipping the
    /// last `ignore` entries (those were rewritten or removed wholesale).
    fn update_parents(&mut self, path: &[Token], delta: i64, ignore: usize) -> Result<()> {
        if path.len() <= ignore {
            return Ok(());
        }

        for &token in &path[..path.len() - ignore] {
            let offset = self.atoms.node(token).offset;
            self.blocks.seek(SeekFrom::Start(offset))?;
            let size = self.blocks.read_u32::<BigEndian>()?;
            if size == 1 {
                // 64-bit: the real size sits after the type code
                self.blocks.seek(SeekFrom::Current(4))?;
                let large = self.blocks.read_u64::<BigEndian>()?;
                let patched = u64::try_from(large as i64 + delta).map_err(|_| {
                    Error::InvalidFormat("box size adjustment out of range".into())
                })?;
                self.blocks.seek(SeekFrom::Start(offset + 8))?;
                self.blocks.write_u64::<BigEndian>(patched)?;
            } else {
                let patched = u32::try_from(size as i64 + delta).map_err(|_| {
                    Error::InvalidFormat("box size adjustment out of range".into())
                })?;
                self.blocks.seek(SeekFrom::Start(offset))?;
                self.blocks.write_u32::<BigEndian>(patched)?;
            }
            // Mirror the patch so the tree keeps stating the true span.
            self.atoms.add_to_size(token, delta);
        }
        Ok(())
    }

    /// Shift every absolute file offset stored beyond `mutation_point` by
    /// `delta`: chunk offset tables under moov and fragment base offsets
    /// under every moof.
    ///
    /// Recorded box offsets are adjusted in the tree first so the following
    /// reads land on the box's new physical position.
    fn update_offsets(&mut self, delta: i64, mutation_point: u64) -> Result<()> {
        if let Some(moov) = self.atoms.find(BoxType::MoovBox) {
            for token in self.atoms.find_all(moov, BoxType::StcoBox) {
                if self.atoms.node(token).offset > mutation_point {
                    self.atoms.add_to_offset(token, delta);
                }
                let offset = self.atoms.node(token).offset;

                self.blocks.seek(SeekFrom::Start(offset + 12))?;
                let count = self.blocks.read_u32::<BigEndian>()?;
                for i in 0..count as u64 {
                    let pos = offset + 16 + i * 4;
                    self.blocks.seek(SeekFrom::Start(pos))?;
                    let entry = self.blocks.read_u32::<BigEndian>()?;
                    if entry as u64 > mutation_point {
                        let patched = u32::try_from(entry as i64 + delta).map_err(|_| {
                            Error::InvalidFormat("chunk offset adjustment out of range".into())
                        })?;
                        self.blocks.seek(SeekFrom::Start(pos))?;
                        self.blocks.write_u32::<BigEndian>(patched)?;
                    }
                }
            }

            for token in self.atoms.find_all(moov, BoxType::Co64Box) {
                if self.atoms.node(token).offset > mutation_point {
                    self.atoms.add_to_offset(token, delta);
                }
                let offset = self.atoms.node(token).offset;

                self.blocks.seek(SeekFrom::Start(offset + 12))?;
                let count = self.blocks.read_u32::<BigEndian>()?;
                for i in 0..count as u64 {
                    let pos = offset + 16 + i * 8;
                    self.blocks.seek(SeekFrom::Start(pos))?;
                    let entry = self.blocks.read_u64::<BigEndian>()?;
                    if entry > mutation_point {
                        let patched = u64::try_from(entry as i64 + delta).map_err(|_| {
                            Error::InvalidFormat("chunk offset adjustment out of range".into())
                        })?;
                        self.blocks.seek(SeekFrom::Start(pos))?;
                        self.blocks.write_u64::<BigEndian>(patched)?;
                    }
                }
            }
        }

        for moof in self.atoms.find_top_level(BoxType::MoofBox) {
            for token in self.atoms.find_all(moof, BoxType::TfhdBox) {
                if self.atoms.node(token).offset > mutation_point {
                    self.atoms.add_to_offset(token, delta);
                }
                let offset = self.atoms.node(token).offset;

                self.blocks.seek(SeekFrom::Start(offset + 8))?;
                let _version = self.blocks.read_u8()?;
                let flags = self.blocks.read_u24::<BigEndian>()?;
                if flags & 1 != 0 {
                    // base-data-offset follows the 4-byte track ID
                    self.blocks.seek(SeekFrom::Start(offset + 16))?;
                    let base = self.blocks.read_u64::<BigEndian>()?;
                    if base > mutation_point {
                        let patched = u64::try_from(base as i64 + delta).map_err(|_| {
                            Error::InvalidFormat("base data offset adjustment out of range".into())
                        })?;
                        self.blocks.seek(SeekFrom::Start(offset + 16))?;
                        self.blocks.write_u64::<BigEndian>(patched)?;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_padding_rounds_to_block() {
        assert_eq!(block_padding(18), 1006);
        assert_eq!(block_padding(8), 1016);
        assert_eq!(block_padding(1000), 24);
    }

    #[test]
    fn test_block_padding_skips_too_small_remainders() {
        // Remainders under 8 bytes cannot host a free box header.
        assert_eq!(block_padding(1020), 1028);
        assert_eq!(block_padding(1017), 1031);
        assert_eq!(block_padding(1024), 1024);
    }

    #[test]
    fn test_render_box_layout() {
        let rendered = render_box(BoxType::StemBox, b"AB").unwrap();
        assert_eq!(rendered.len(), 10);
        assert_eq!(&rendered[0..4], &10u32.to_be_bytes());
        assert_eq!(&rendered[4..8], b"stem");
        assert_eq!(&rendered[8..], b"AB");
    }

    #[test]
    fn test_render_free_box_counts_header() {
        let rendered = render_free_box(8).unwrap();
        assert_eq!(rendered.len(), 8);

        let rendered = render_free_box(20).unwrap();
        assert_eq!(rendered.len(), 20);
        assert_eq!(&rendered[4..8], b"free");
        assert!(rendered[8..].iter().all(|b| *b == PAD_FILL));
    }

    #[test]
    fn test_exact_fit_padding_cancels_delta() {
        // rendered 10 bytes into an old 1024-byte region: shortfall of 1014
        // becomes a free box of exactly that size
        let mut data = render_box(BoxType::StemBox, b"XY").unwrap();
        let length = 1024i64;
        let mut delta = data.len() as i64 - length;
        assert!(delta <= -(HEADER_SIZE as i64));
        data.extend_from_slice(&render_free_box((-delta) as u64).unwrap());
        delta = data.len() as i64 - length;
        assert_eq!(delta, 0);
        assert_eq!(data.len(), 1024);
    }
}
