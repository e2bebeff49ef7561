//! Byte-range editing primitives over a seekable file
//!
//! [`BlockFile`] is the splice layer the mutation engine drives: fixed-width
//! reads and writes at absolute offsets, plus whole-file insert/remove that
//! shift every byte after the edit point.

use crate::error::{Error, Result};
use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

// Size of the scratch buffer used when shifting the file tail.
const MOVE_BUFFER_SIZE: usize = 64 * 1024;

/// A container file opened for in-place editing
#[derive(Debug)]
pub struct BlockFile {
    file: File,
}

impl BlockFile {
    /// Open a file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    /// Current file length in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Replace `replace` bytes at `offset` with `data`, shifting the rest of
    /// the file when the lengths differ.
    pub fn insert(&mut self, data: &[u8], offset: u64, replace: u64) -> Result<()> {
        let old_len = self.len()?;
        let tail_start = offset
            .checked_add(replace)
            .filter(|end| *end <= old_len)
            .ok_or_else(|| {
                Error::InvalidFormat(format!(
                    "splice of {} bytes at offset {} runs past end of file ({})",
                    replace, offset, old_len
                ))
            })?;
        let tail_len = old_len - tail_start;
        let delta = data.len() as i64 - replace as i64;

        if delta > 0 {
            self.shift_tail_right(tail_start, tail_len, delta as u64)?;
        } else if delta < 0 {
            self.shift_tail_left(tail_start, tail_len, (-delta) as u64)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;

        if delta < 0 {
            self.file.set_len((old_len as i64 + delta) as u64)?;
        }
        Ok(())
    }

    /// Remove `len` bytes at `offset`, shifting the rest of the file left
    pub fn remove_block(&mut self, offset: u64, len: u64) -> Result<()> {
        self.insert(&[], offset, len)
    }

    // Moves [tail_start, tail_start + tail_len) to tail_start + by, working
    // back to front so chunks never overwrite bytes not yet moved.
    fn shift_tail_right(&mut self, tail_start: u64, tail_len: u64, by: u64) -> Result<()> {
        let mut buf = vec![0u8; MOVE_BUFFER_SIZE];
        let mut remaining = tail_len;
        while remaining > 0 {
            let chunk = remaining.min(MOVE_BUFFER_SIZE as u64);
            let src = tail_start + remaining - chunk;
            self.copy_chunk(&mut buf[..chunk as usize], src, src + by)?;
            remaining -= chunk;
        }
        Ok(())
    }

    // Moves [tail_start, tail_start + tail_len) to tail_start - by, working
    // front to back.
    fn shift_tail_left(&mut self, tail_start: u64, tail_len: u64, by: u64) -> Result<()> {
        let mut buf = vec![0u8; MOVE_BUFFER_SIZE];
        let mut moved = 0u64;
        while moved < tail_len {
            let chunk = (tail_len - moved).min(MOVE_BUFFER_SIZE as u64);
            let src = tail_start + moved;
            self.copy_chunk(&mut buf[..chunk as usize], src, src - by)?;
            moved += chunk;
        }
        Ok(())
    }

    fn copy_chunk(&mut self, buf: &mut [u8], src: u64, dst: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(src))?;
        self.file.read_exact(buf)?;
        self.file.seek(SeekFrom::Start(dst))?;
        self.file.write_all(buf)?;
        Ok(())
    }
}

impl Read for BlockFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for BlockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for BlockFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::NamedTempFile;

    fn stage(content: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_insert_grows_and_shifts_tail() {
        let f = stage(b"0123456789");
        let mut blocks = BlockFile::open(f.path()).unwrap();

        blocks.insert(b"ABCDE", 3, 2).unwrap();
        assert_eq!(fs::read(f.path()).unwrap(), b"012ABCDE56789");
        assert_eq!(blocks.len().unwrap(), 13);
    }

    #[test]
    fn test_insert_shrinks_and_truncates() {
        let f = stage(b"0123456789");
        let mut blocks = BlockFile::open(f.path()).unwrap();

        blocks.insert(b"X", 2, 5).unwrap();
        assert_eq!(fs::read(f.path()).unwrap(), b"01X789");
        assert_eq!(blocks.len().unwrap(), 6);
    }

    #[test]
    fn test_insert_equal_length_rewrites_in_place() {
        let f = stage(b"0123456789");
        let mut blocks = BlockFile::open(f.path()).unwrap();

        blocks.insert(b"ab", 4, 2).unwrap();
        assert_eq!(fs::read(f.path()).unwrap(), b"0123ab6789");
    }

    #[test]
    fn test_pure_insertion_at_offset() {
        let f = stage(b"0123456789");
        let mut blocks = BlockFile::open(f.path()).unwrap();

        blocks.insert(b"--", 0, 0).unwrap();
        assert_eq!(fs::read(f.path()).unwrap(), b"--0123456789");
    }

    #[test]
    fn test_remove_block() {
        let f = stage(b"0123456789");
        let mut blocks = BlockFile::open(f.path()).unwrap();

        blocks.remove_block(7, 3).unwrap();
        assert_eq!(fs::read(f.path()).unwrap(), b"0123456");
    }

    #[test]
    fn test_shift_larger_than_move_buffer() {
        // Tail longer than one scratch buffer forces the chunked paths.
        let mut content = vec![0u8; 4];
        content.extend((0..(MOVE_BUFFER_SIZE * 2 + 17)).map(|i| (i % 251) as u8));
        let f = stage(&content);
        let mut blocks = BlockFile::open(f.path()).unwrap();

        blocks.insert(b"ABCDEFGH", 4, 0).unwrap();
        let mut expected = content[..4].to_vec();
        expected.extend_from_slice(b"ABCDEFGH");
        expected.extend_from_slice(&content[4..]);
        assert_eq!(fs::read(f.path()).unwrap(), expected);

        blocks.remove_block(4, 8).unwrap();
        assert_eq!(fs::read(f.path()).unwrap(), content);
    }

    #[test]
    fn test_splice_past_end_is_rejected() {
        let f = stage(b"0123");
        let mut blocks = BlockFile::open(f.path()).unwrap();

        let err = blocks.insert(b"x", 2, 10).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
        // nothing was modified
        assert_eq!(fs::read(f.path()).unwrap(), b"0123");
    }
}
