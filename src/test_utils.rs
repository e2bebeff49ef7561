//! Synthetic container builders for tests.
//!
//! Real STEM files are multi-megabyte audio containers; tests instead compose
//! minimal but structurally valid BMFF byte layouts from these helpers, so
//! every offset in a fixture is known exactly.

/// A plain box: `size(4) + fourcc(4) + payload`
pub fn plain_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(payload);
    out
}

/// A container box holding already-rendered child boxes
pub fn container_box(fourcc: &[u8; 4], children: &[u8]) -> Vec<u8> {
    plain_box(fourcc, children)
}

/// A box using the 64-bit extended size encoding
pub fn large_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 16);
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(&(payload.len() as u64 + 16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Minimal `ftyp` box (major brand + minor version), 16 bytes total
pub fn ftyp_box() -> Vec<u8> {
    let mut payload = b"isom".to_vec();
    payload.extend_from_slice(&0u32.to_be_bytes());
    plain_box(b"ftyp", &payload)
}

/// A `free` padding box with `payload_len` fill bytes
pub fn free_box(payload_len: usize) -> Vec<u8> {
    plain_box(b"free", &vec![0x01u8; payload_len])
}

/// An `stco` chunk offset table with the given 32-bit entries
pub fn stco_box(entries: &[u32]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + entries.len() * 4);
    payload.extend_from_slice(&0u32.to_be_bytes()); // version + flags
    payload.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in entries {
        payload.extend_from_slice(&entry.to_be_bytes());
    }
    plain_box(b"stco", &payload)
}

/// A `co64` chunk offset table with the given 64-bit entries
pub fn co64_box(entries: &[u64]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + entries.len() * 8);
    payload.extend_from_slice(&0u32.to_be_bytes()); // version + flags
    payload.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in entries {
        payload.extend_from_slice(&entry.to_be_bytes());
    }
    plain_box(b"co64", &payload)
}

/// A `tfhd` box; the base-data-offset flag is set when an offset is given
pub fn tfhd_box(track_id: u32, base_offset: Option<u64>) -> Vec<u8> {
    let mut payload = Vec::new();
    let flags: u32 = if base_offset.is_some() { 1 } else { 0 };
    payload.extend_from_slice(&flags.to_be_bytes()); // version + 24-bit flags
    payload.extend_from_slice(&track_id.to_be_bytes());
    if let Some(offset) = base_offset {
        payload.extend_from_slice(&offset.to_be_bytes());
    }
    plain_box(b"tfhd", &payload)
}

/// `trak(mdia(minf(stbl(stco))))` around a chunk offset table
pub fn track_with_stco(entries: &[u32]) -> Vec<u8> {
    let stbl = container_box(b"stbl", &stco_box(entries));
    let minf = container_box(b"minf", &stbl);
    let mdia = container_box(b"mdia", &minf);
    container_box(b"trak", &mdia)
}

/// `trak(mdia(minf(stbl(co64))))` around a 64-bit chunk offset table
pub fn track_with_co64(entries: &[u64]) -> Vec<u8> {
    let stbl = container_box(b"stbl", &co64_box(entries));
    let minf = container_box(b"minf", &stbl);
    let mdia = container_box(b"mdia", &minf);
    container_box(b"trak", &mdia)
}
