//! On-disk layout of a container block.
//!
//! # Block layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  ENTRY DATA                     │
//! │  raw bytes of every entry written in the block  │
//! ├─────────────────────────────────────────────────┤
//! │                    INDEX                        │
//! │ ┌─────────────────────────────────────────────┐ │
//! │ │ Entry:                                      │ │
//! │ │  - Name Length: u32                         │ │
//! │ │  - Name: [u8] (utf-8)                       │ │
//! │ │  - Flags: u8 (bit 0 = deleted)              │ │
//! │ │  - Offset: u64 (relative to block start)    │ │
//! │ │  - Size: u64                                │ │
//! │ └─────────────────────────────────────────────┘ │
//! ├─────────────────────────────────────────────────┤
//! │ FOOTER (32 bytes)                               │
//! │  MAGIC: [u8; 4] = "GARC"                        │
//! │  VERSION: u32                                   │
//! │  ENTRY_COUNT: u32                               │
//! │  INDEX_LENGTH: u64                              │
//! │  BLOCK_LENGTH: u64 (data + index + footer)      │
//! │  CRC32: u32 (of the index bytes)                │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Offsets are block relative, so the
//! concatenation of two containers is itself a container.

use thiserror::Error;

/// Magic number closing every block: "GARC" (Git ARChive)
pub const MAGIC: [u8; 4] = [b'G', b'A', b'R', b'C'];

/// Current format version
pub const VERSION: u32 = 1;

/// Footer size in bytes
pub const FOOTER_SIZE: u64 = 32;

/// Flag: entry is a deletion marker
pub const FLAG_DELETED: u8 = 1 << 0;

/// Errors decoding a block footer or index.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("bad magic number")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("index checksum mismatch: expected {expected:08x}, found {found:08x}")]
    ChecksumMismatch { expected: u32, found: u32 },

    #[error("truncated index")]
    Truncated,

    #[error("entry name is not valid utf-8")]
    InvalidName,

    #[error("entry {name} points outside its block")]
    EntryOutOfBounds { name: String },

    #[error("inconsistent lengths: {0}")]
    InconsistentLength(String),
}

/// One index record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Entry path inside the container
    pub name: String,

    /// Flags (see [`FLAG_DELETED`])
    pub flags: u8,

    /// Offset of the entry data from the start of its block
    pub offset: u64,

    /// Size of the entry data
    pub size: u64,
}

impl IndexEntry {
    /// A live entry.
    pub fn file(name: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            flags: 0,
            offset,
            size,
        }
    }

    /// A deletion marker.
    pub fn tombstone(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: FLAG_DELETED,
            offset: 0,
            size: 0,
        }
    }

    /// Check if this entry marks a deletion
    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }
}

/// Block footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub entry_count: u32,
    pub index_len: u64,
    pub block_len: u64,
    pub crc: u32,
}

impl Footer {
    /// Serialize footer to bytes
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE as usize] {
        let mut buf = [0u8; FOOTER_SIZE as usize];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[12..20].copy_from_slice(&self.index_len.to_le_bytes());
        buf[20..28].copy_from_slice(&self.block_len.to_le_bytes());
        buf[28..32].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    /// Deserialize footer from bytes
    pub fn from_bytes(buf: &[u8; FOOTER_SIZE as usize]) -> Result<Self, FormatError> {
        if buf[0..4] != MAGIC {
            return Err(FormatError::BadMagic);
        }

        let version = read_u32(&buf[4..8]);
        if version != VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let footer = Self {
            entry_count: read_u32(&buf[8..12]),
            index_len: read_u64(&buf[12..20]),
            block_len: read_u64(&buf[20..28]),
            crc: read_u32(&buf[28..32]),
        };

        let framed = footer.index_len.checked_add(FOOTER_SIZE);
        if framed.map_or(true, |len| len > footer.block_len) {
            return Err(FormatError::InconsistentLength(format!(
                "index of {} bytes does not fit a block of {} bytes",
                footer.index_len, footer.block_len
            )));
        }

        Ok(footer)
    }

    /// Length of the entry data region at the start of the block.
    pub fn data_len(&self) -> u64 {
        self.block_len - self.index_len - FOOTER_SIZE
    }
}

/// Encode an index, returning the bytes and their checksum.
pub fn encode_index(entries: &[IndexEntry]) -> (Vec<u8>, u32) {
    let mut buf = Vec::new();
    for entry in entries {
        buf.extend_from_slice(&(entry.name.len() as u32).to_le_bytes());
        buf.extend_from_slice(entry.name.as_bytes());
        buf.push(entry.flags);
        buf.extend_from_slice(&entry.offset.to_le_bytes());
        buf.extend_from_slice(&entry.size.to_le_bytes());
    }
    let crc = crc32fast::hash(&buf);
    (buf, crc)
}

/// Decode and validate an index against its footer.
pub fn decode_index(buf: &[u8], footer: &Footer) -> Result<Vec<IndexEntry>, FormatError> {
    let found = crc32fast::hash(buf);
    if found != footer.crc {
        return Err(FormatError::ChecksumMismatch {
            expected: footer.crc,
            found,
        });
    }

    let data_len = footer.data_len();
    let mut entries = Vec::with_capacity(footer.entry_count as usize);
    let mut pos = 0usize;

    for _ in 0..footer.entry_count {
        let name_len = read_u32(take(buf, &mut pos, 4)?) as usize;
        let name = std::str::from_utf8(take(buf, &mut pos, name_len)?)
            .map_err(|_| FormatError::InvalidName)?
            .to_string();
        let flags = take(buf, &mut pos, 1)?[0];
        let offset = read_u64(take(buf, &mut pos, 8)?);
        let size = read_u64(take(buf, &mut pos, 8)?);

        let entry = IndexEntry {
            name,
            flags,
            offset,
            size,
        };

        if !entry.is_deleted() && offset.checked_add(size).map_or(true, |end| end > data_len) {
            return Err(FormatError::EntryOutOfBounds { name: entry.name });
        }

        entries.push(entry);
    }

    if pos != buf.len() {
        return Err(FormatError::InconsistentLength(format!(
            "{} trailing index bytes",
            buf.len() - pos
        )));
    }

    Ok(entries)
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], FormatError> {
    let end = pos.checked_add(len).ok_or(FormatError::Truncated)?;
    let slice = buf.get(*pos..end).ok_or(FormatError::Truncated)?;
    *pos = end;
    Ok(slice)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}
