//! BMFF box type codes and the box header codec
//!
//! Reference: ISO/IEC 14496-12:2022

use crate::error::Result;
use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};

/// Compact box header: 4 byte size + 4 byte type
pub const HEADER_SIZE: u64 = 8;
/// Extended box header: 4 byte size sentinel + 4 byte type + 8 byte large size
pub const HEADER_SIZE_LARGE: u64 = 16;

/// Box type enum for the BMFF boxes this crate works with
macro_rules! boxtype {
    ($( $name:ident => $value:expr ),*) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum BoxType {
            $( $name, )*
            UnknownBox(u32),
        }

        impl From<u32> for BoxType {
            fn from(t: u32) -> BoxType {
                match t {
                    $( $value => BoxType::$name, )*
                    _ => BoxType::UnknownBox(t),
                }
            }
        }

        impl From<BoxType> for u32 {
            fn from(t: BoxType) -> u32 {
                match t {
                    $( BoxType::$name => $value, )*
                    BoxType::UnknownBox(t) => t,
                }
            }
        }
    }
}

boxtype! {
    Empty => 0x0000_0000,
    FtypBox => 0x66747970,
    FreeBox => 0x66726565,
    SkipBox => 0x736b6970,
    MdatBox => 0x6d646174,
    MoovBox => 0x6d6f6f76,
    TrakBox => 0x7472616b,
    EdtsBox => 0x65647473,
    MdiaBox => 0x6d646961,
    MinfBox => 0x6d696e66,
    DinfBox => 0x64696e66,
    StblBox => 0x7374626c,
    StcoBox => 0x7374636F,
    Co64Box => 0x636F3634,
    MvexBox => 0x6d766578,
    MfraBox => 0x6d667261,
    MoofBox => 0x6d6f6f66,
    TrafBox => 0x74726166,
    TfhdBox => 0x74666864,
    UdtaBox => 0x75647461,
    StemBox => 0x7374656d
}

impl BoxType {
    /// Printable fourcc, for error messages
    pub fn fourcc(self) -> String {
        let raw: u32 = self.into();
        String::from_utf8_lossy(&raw.to_be_bytes()).into_owned()
    }
}

/// Lightweight box header for efficient parsing
#[derive(Clone, Debug)]
pub struct BoxHeader {
    pub name: BoxType,
    pub size: u64,
    pub large_size: bool,
}

impl BoxHeader {
    pub fn read<R: Read + Seek + ?Sized>(reader: &mut R) -> Result<Self> {
        let box_start = reader.stream_position()?;

        let mut buf = [0u8; 8]; // 8 bytes for box header.
        reader.read_exact(&mut buf)?;

        let mut s = [0u8; 4];
        s.clone_from_slice(&buf[0..4]);
        let size = u32::from_be_bytes(s);

        let mut t = [0u8; 4];
        t.clone_from_slice(&buf[4..8]);
        let typ = u32::from_be_bytes(t);

        // size == 1 escapes to a 64-bit size after the type code
        if size == 1 {
            reader.read_exact(&mut buf)?;
            let largesize = u64::from_be_bytes(buf);

            Ok(BoxHeader {
                name: BoxType::from(typ),
                size: largesize,
                large_size: true,
            })
        } else if size == 0 {
            // special case to indicate the size goes to the end of the file
            let current_pos = reader.stream_position()?;
            let end_of_stream = reader.seek(SeekFrom::End(0))?;
            reader.seek(SeekFrom::Start(current_pos))?;

            Ok(BoxHeader {
                name: BoxType::from(typ),
                size: end_of_stream - box_start,
                large_size: false,
            })
        } else {
            Ok(BoxHeader {
                name: BoxType::from(typ),
                size: size as u64,
                large_size: false,
            })
        }
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<u64> {
        if self.size > u32::MAX as u64 {
            writer.write_u32::<BigEndian>(1)?;
            writer.write_u32::<BigEndian>(self.name.into())?;
            writer.write_u64::<BigEndian>(self.size)?;
            Ok(HEADER_SIZE_LARGE)
        } else {
            writer.write_u32::<BigEndian>(self.size as u32)?;
            writer.write_u32::<BigEndian>(self.name.into())?;
            Ok(HEADER_SIZE)
        }
    }

    /// Number of header bytes this box spends before its content
    pub fn header_len(&self) -> u64 {
        if self.large_size {
            HEADER_SIZE_LARGE
        } else {
            HEADER_SIZE
        }
    }
}
