//! Box tree built over an [`atree`] arena
//!
//! The tree records where every box lives in the file (offset, total size,
//! header encoding) and keeps an ordered child list per node so the mutation
//! engine can reason about physical neighbors, prepend freshly written boxes,
//! and detach removed ones by handle.

use crate::{
    boxes::{BoxHeader, BoxType, HEADER_SIZE},
    error::{Error, Result},
};
use atree::{Arena, Token};
use std::io::{Read, Seek, SeekFrom};

// Box types whose content is a sequence of child boxes.
const CONTAINER_TYPES: &[BoxType] = &[
    BoxType::MoovBox,
    BoxType::TrakBox,
    BoxType::EdtsBox,
    BoxType::MdiaBox,
    BoxType::MinfBox,
    BoxType::DinfBox,
    BoxType::StblBox,
    BoxType::MvexBox,
    BoxType::MfraBox,
    BoxType::MoofBox,
    BoxType::TrafBox,
    BoxType::UdtaBox,
];

/// Per-box information stored in the tree
#[derive(Clone, Debug)]
pub struct AtomInfo {
    pub box_type: BoxType,
    /// Absolute file offset of the box header
    pub offset: u64,
    /// Total byte length: header + content + children
    pub size: u64,
    /// Whether the size is stored as a 64-bit extended field
    pub large_size: bool,
    parent: Option<Token>,
    children: Vec<Token>,
}

impl AtomInfo {
    /// Number of header bytes before this box's content
    pub fn header_len(&self) -> u64 {
        BoxHeader {
            name: self.box_type,
            size: self.size,
            large_size: self.large_size,
        }
        .header_len()
    }
}

/// Parsed box hierarchy of a whole container file
#[derive(Debug)]
pub struct AtomTree {
    arena: Arena<AtomInfo>,
    root: Token,
}

impl AtomTree {
    /// Parse the box layout of an entire file
    pub fn parse<R: Read + Seek + ?Sized>(reader: &mut R) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let root_info = AtomInfo {
            box_type: BoxType::Empty,
            offset: 0,
            size: file_size,
            large_size: false,
            parent: None,
            children: Vec::new(),
        };
        let (arena, root) = Arena::with_data(root_info);
        let mut tree = Self { arena, root };

        tree.parse_children(reader, 0, file_size, root)?;
        Ok(tree)
    }

    fn parse_children<R: Read + Seek + ?Sized>(
        &mut self,
        reader: &mut R,
        start: u64,
        end: u64,
        parent: Token,
    ) -> Result<()> {
        let mut current = start;
        while current + HEADER_SIZE <= end {
            reader.seek(SeekFrom::Start(current))?;
            let token = self.parse_box(reader, end, parent)?;
            current = self.node(token).offset + self.node(token).size;
        }
        Ok(())
    }

    /// Parse one box (and its subtree) at the reader's position, appending it
    /// to `parent`'s children.
    fn parse_box<R: Read + Seek + ?Sized>(
        &mut self,
        reader: &mut R,
        limit: u64,
        parent: Token,
    ) -> Result<Token> {
        let header = BoxHeader::read(reader)?;
        let start = reader.stream_position()? - header.header_len();

        let box_end = start.checked_add(header.size).filter(|end| *end <= limit);
        if header.size < header.header_len() || box_end.is_none() {
            return Err(Error::InvalidFormat(format!(
                "box '{}' at offset {} has bad size {}",
                header.name.fourcc(),
                start,
                header.size
            )));
        }

        let info = AtomInfo {
            box_type: header.name,
            offset: start,
            size: header.size,
            large_size: header.large_size,
            parent: Some(parent),
            children: Vec::new(),
        };
        let token = parent.append(&mut self.arena, info);
        self.node_mut(parent).children.push(token);

        if CONTAINER_TYPES.contains(&header.name) {
            let content_start = start + header.header_len();
            self.parse_children(reader, content_start, start + header.size, token)?;
        }

        Ok(token)
    }

    /// Re-parse a single box subtree at an absolute offset and prepend it to
    /// `parent`'s children. Used to pick up freshly written boxes.
    pub fn parse_box_at<R: Read + Seek + ?Sized>(
        &mut self,
        reader: &mut R,
        offset: u64,
        parent: Token,
    ) -> Result<Token> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(offset))?;
        let token = self.parse_box(reader, file_size, parent)?;
        self.prepend_child(parent, token);
        Ok(token)
    }

    pub fn root(&self) -> Token {
        self.root
    }

    pub fn node(&self, token: Token) -> &AtomInfo {
        &self.arena[token].data
    }

    fn node_mut(&mut self, token: Token) -> &mut AtomInfo {
        &mut self.arena[token].data
    }

    pub fn parent(&self, token: Token) -> Option<Token> {
        self.node(token).parent
    }

    pub fn children(&self, token: Token) -> &[Token] {
        &self.node(token).children
    }

    /// Resolve a dotted path of box types from the top level down, returning
    /// the longest matched prefix. Callers branch on the returned length.
    pub fn path(&self, names: &[BoxType]) -> Vec<Token> {
        let mut found = Vec::with_capacity(names.len());
        let mut scope: &[Token] = self.node(self.root).children.as_slice();
        for name in names {
            match scope.iter().find(|t| self.node(**t).box_type == *name) {
                Some(&token) => {
                    found.push(token);
                    scope = self.node(token).children.as_slice();
                }
                None => break,
            }
        }
        found
    }

    /// First top-level box of the given type
    pub fn find(&self, name: BoxType) -> Option<Token> {
        self.node(self.root)
            .children
            .iter()
            .copied()
            .find(|t| self.node(*t).box_type == name)
    }

    /// All top-level boxes of the given type, in file order
    pub fn find_top_level(&self, name: BoxType) -> Vec<Token> {
        self.node(self.root)
            .children
            .iter()
            .copied()
            .filter(|t| self.node(*t).box_type == name)
            .collect()
    }

    /// All descendants of `token` with the given type, depth-first in file
    /// order
    pub fn find_all(&self, token: Token, name: BoxType) -> Vec<Token> {
        let mut out = Vec::new();
        self.collect_descendants(token, name, &mut out);
        out
    }

    fn collect_descendants(&self, token: Token, name: BoxType, out: &mut Vec<Token>) {
        for &child in &self.node(token).children {
            if self.node(child).box_type == name {
                out.push(child);
            }
            self.collect_descendants(child, name, out);
        }
    }

    /// Shift a box's recorded offset. Bookkeeping only, nothing is written.
    pub fn add_to_offset(&mut self, token: Token, delta: i64) {
        let info = self.node_mut(token);
        info.offset = (info.offset as i64 + delta) as u64;
    }

    /// Grow or shrink a box's recorded size. Bookkeeping only.
    pub fn add_to_size(&mut self, token: Token, delta: i64) {
        let info = self.node_mut(token);
        info.size = (info.size as i64 + delta) as u64;
    }

    /// Overwrite a box's recorded extent after its bytes were rewritten
    pub fn set_extent(&mut self, token: Token, offset: u64, size: u64, large_size: bool) {
        let info = self.node_mut(token);
        info.offset = offset;
        info.size = size;
        info.large_size = large_size;
    }

    /// Record a freshly written leaf box directly after `anchor` in
    /// `parent`'s ordered child list.
    pub fn insert_leaf_after(
        &mut self,
        parent: Token,
        anchor: Token,
        box_type: BoxType,
        offset: u64,
        size: u64,
    ) -> Token {
        let info = AtomInfo {
            box_type,
            offset,
            size,
            large_size: false,
            parent: Some(parent),
            children: Vec::new(),
        };
        let token = parent.append(&mut self.arena, info);
        let children = &mut self.node_mut(parent).children;
        let pos = children
            .iter()
            .position(|t| *t == anchor)
            .map(|p| p + 1)
            .unwrap_or(children.len());
        children.insert(pos, token);
        token
    }

    /// Detach `child` from `parent`'s ordered child list. The node stays in
    /// the arena; only reachability changes. Returns false if `child` was not
    /// a child of `parent`.
    pub fn remove_child(&mut self, parent: Token, child: Token) -> bool {
        let children = &mut self.node_mut(parent).children;
        match children.iter().position(|t| *t == child) {
            Some(pos) => {
                children.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Make `child` the first child of `parent`, detaching it from any
    /// previous position in that list.
    pub fn prepend_child(&mut self, parent: Token, child: Token) {
        self.remove_child(parent, child);
        self.node_mut(parent).children.insert(0, child);
        self.node_mut(child).parent = Some(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use std::io::Cursor;

    fn sample_movie() -> Vec<u8> {
        let stbl = container_box(b"stbl", &stco_box(&[200, 300]));
        let minf = container_box(b"minf", &stbl);
        let mdia = container_box(b"mdia", &minf);
        let trak = container_box(b"trak", &mdia);
        let udta = container_box(b"udta", &plain_box(b"stem", b"AB"));
        let moov = container_box(b"moov", &[trak, udta].concat());
        [ftyp_box(), moov, plain_box(b"mdat", &[0u8; 64])].concat()
    }

    #[test]
    fn test_parse_builds_expected_hierarchy() {
        let data = sample_movie();
        let tree = AtomTree::parse(&mut Cursor::new(&data)).unwrap();

        let top: Vec<BoxType> = tree
            .children(tree.root())
            .iter()
            .map(|t| tree.node(*t).box_type)
            .collect();
        assert_eq!(
            top,
            vec![BoxType::FtypBox, BoxType::MoovBox, BoxType::MdatBox]
        );

        let moov = tree.find(BoxType::MoovBox).unwrap();
        assert_eq!(tree.children(moov).len(), 2);
        assert_eq!(tree.node(moov).offset, 16);
    }

    #[test]
    fn test_path_returns_longest_prefix() {
        let data = sample_movie();
        let tree = AtomTree::parse(&mut Cursor::new(&data)).unwrap();

        let full = tree.path(&[BoxType::MoovBox, BoxType::UdtaBox, BoxType::StemBox]);
        assert_eq!(full.len(), 3);
        assert_eq!(tree.node(full[2]).box_type, BoxType::StemBox);
        assert_eq!(tree.node(full[2]).size, 10);

        let partial = tree.path(&[BoxType::MoovBox, BoxType::FreeBox, BoxType::StemBox]);
        assert_eq!(partial.len(), 1);
    }

    #[test]
    fn test_find_all_recurses_in_file_order() {
        let data = sample_movie();
        let tree = AtomTree::parse(&mut Cursor::new(&data)).unwrap();

        let moov = tree.find(BoxType::MoovBox).unwrap();
        let stco = tree.find_all(moov, BoxType::StcoBox);
        assert_eq!(stco.len(), 1);
        assert_eq!(tree.node(stco[0]).box_type, BoxType::StcoBox);
    }

    #[test]
    fn test_extended_size_container() {
        // moov with a 64-bit size header holding one free child
        let free = plain_box(b"free", &[1u8; 8]);
        let mut moov = Vec::new();
        moov.extend_from_slice(&1u32.to_be_bytes());
        moov.extend_from_slice(b"moov");
        moov.extend_from_slice(&(16 + free.len() as u64).to_be_bytes());
        moov.extend_from_slice(&free);

        let tree = AtomTree::parse(&mut Cursor::new(&moov)).unwrap();
        let token = tree.find(BoxType::MoovBox).unwrap();
        let info = tree.node(token);
        assert!(info.large_size);
        assert_eq!(info.header_len(), 16);
        assert_eq!(tree.children(token).len(), 1);
    }

    #[test]
    fn test_remove_and_prepend_child() {
        let data = sample_movie();
        let mut tree = AtomTree::parse(&mut Cursor::new(&data)).unwrap();

        let moov = tree.find(BoxType::MoovBox).unwrap();
        let udta = tree.path(&[BoxType::MoovBox, BoxType::UdtaBox])[1];

        assert!(tree.remove_child(moov, udta));
        assert_eq!(tree.children(moov).len(), 1);
        assert!(!tree.remove_child(moov, udta));

        tree.prepend_child(moov, udta);
        assert_eq!(tree.children(moov)[0], udta);
        assert_eq!(tree.parent(udta), Some(moov));
    }

    #[test]
    fn test_extent_and_leaf_bookkeeping() {
        let data = sample_movie();
        let mut tree = AtomTree::parse(&mut Cursor::new(&data)).unwrap();

        let path = tree.path(&[BoxType::MoovBox, BoxType::UdtaBox, BoxType::StemBox]);
        let (udta, stem) = (path[1], path[2]);

        tree.set_extent(stem, 100, 24, false);
        assert_eq!(tree.node(stem).offset, 100);
        assert_eq!(tree.node(stem).size, 24);

        tree.add_to_size(udta, 16);
        assert_eq!(tree.node(udta).size, 18 + 16);

        let free = tree.insert_leaf_after(udta, stem, BoxType::FreeBox, 124, 16);
        assert_eq!(tree.children(udta), &[stem, free]);
        assert_eq!(tree.parent(free), Some(udta));
        assert_eq!(tree.node(free).offset, 124);
    }

    #[test]
    fn test_truncated_box_is_rejected() {
        let mut data = plain_box(b"moov", &[]);
        data[3] = 0xFF; // declared size overruns the file
        let err = AtomTree::parse(&mut Cursor::new(&data)).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }
}
