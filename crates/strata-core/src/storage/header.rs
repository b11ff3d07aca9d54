use crate::error::StorageError;
use crate::types::{DATA_START, HEADER_SLOT_SIZE, Ref};
use xxhash_rust::xxh64::xxh64;

/// Magic bytes identifying a StrataDB database file.
pub const MAGIC: &[u8; 4] = b"STRA";

/// Current file format version.
pub const VERSION: u32 = 1;

/// Header checksum covers bytes `[0..32]` and is stored at `[32..40]`.
const CHECKSUM_OFFSET: usize = 32;

/// Double-buffered file header.
///
/// Header layout (within a 64-byte slot):
/// ```text
/// [0..4]   magic: "STRA"
/// [4..8]   version: u32 little-endian
/// [8..16]  commit_counter: u64 little-endian
/// [16..24] top_ref: u64 little-endian
/// [24..32] data_len: u64 little-endian (end of committed node data)
/// [32..40] xxhash64 checksum (of bytes 0..32) little-endian
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub commit_counter: u64,
    pub top_ref: Ref,
    pub data_len: u64,
}

fn read_u64(slot: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&slot[at..at + 8]);
    u64::from_le_bytes(word)
}

impl FileHeader {
    /// Header of an empty database: no top ref, no node data.
    pub fn new() -> Self {
        Self {
            commit_counter: 0,
            top_ref: Ref::NULL,
            data_len: DATA_START,
        }
    }

    /// Parse a header slot, validating magic, version, and checksum.
    pub fn from_slot(slot: &[u8; HEADER_SLOT_SIZE]) -> Result<Self, StorageError> {
        if &slot[0..4] != MAGIC {
            return Err(StorageError::InvalidMagic);
        }

        let stored_checksum = read_u64(slot, CHECKSUM_OFFSET);
        let computed_checksum = xxh64(&slot[..CHECKSUM_OFFSET], 0);
        if stored_checksum != computed_checksum {
            return Err(StorageError::CorruptedHeader(format!(
                "checksum mismatch: stored={stored_checksum:#018x}, computed={computed_checksum:#018x}"
            )));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&slot[4..8]);
        let version = u32::from_le_bytes(version);
        if version != VERSION {
            return Err(StorageError::UnsupportedVersion(version));
        }

        let header = Self {
            commit_counter: read_u64(slot, 8),
            top_ref: Ref::from_offset(read_u64(slot, 16)),
            data_len: read_u64(slot, 24),
        };
        if header.data_len < DATA_START {
            return Err(StorageError::CorruptedHeader(format!(
                "data length {} precedes the data area",
                header.data_len
            )));
        }
        Ok(header)
    }

    /// Serialize this header into a slot buffer, including the trailing checksum.
    pub fn write_to_slot(&self, slot: &mut [u8; HEADER_SLOT_SIZE]) {
        slot.fill(0);
        slot[0..4].copy_from_slice(MAGIC);
        slot[4..8].copy_from_slice(&VERSION.to_le_bytes());
        slot[8..16].copy_from_slice(&self.commit_counter.to_le_bytes());
        slot[16..24].copy_from_slice(&self.top_ref.offset().to_le_bytes());
        slot[24..32].copy_from_slice(&self.data_len.to_le_bytes());
        let checksum = xxh64(&slot[..CHECKSUM_OFFSET], 0);
        slot[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 8].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Given both header slots, return the valid one with the higher
    /// `commit_counter` and which slot (0 or 1) it came from.
    pub fn select_current(
        slot_a: &[u8; HEADER_SLOT_SIZE],
        slot_b: &[u8; HEADER_SLOT_SIZE],
    ) -> Result<(FileHeader, u8), StorageError> {
        match (Self::from_slot(slot_a), Self::from_slot(slot_b)) {
            (Ok(ha), Ok(hb)) => {
                if ha.commit_counter >= hb.commit_counter {
                    Ok((ha, 0))
                } else {
                    Ok((hb, 1))
                }
            }
            (Ok(ha), Err(_)) => Ok((ha, 0)),
            (Err(_), Ok(hb)) => Ok((hb, 1)),
            // Report slot 0's failure; a fresh or foreign file fails both the same way.
            (Err(e), Err(_)) => Err(e),
        }
    }

    /// Return the other header slot: 0 becomes 1, 1 becomes 0.
    pub fn alternate_slot(current_slot: u8) -> u8 {
        if current_slot == 0 { 1 } else { 0 }
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(header: &FileHeader) -> [u8; HEADER_SLOT_SIZE] {
        let mut buf = [0u8; HEADER_SLOT_SIZE];
        header.write_to_slot(&mut buf);
        buf
    }

    #[test]
    fn test_header_roundtrip() {
        let header = FileHeader {
            commit_counter: 42,
            top_ref: Ref::from_offset(512),
            data_len: 1024,
        };
        let parsed = FileHeader::from_slot(&encode(&header)).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn test_header_checksum_validation() {
        let mut buf = encode(&FileHeader::new());
        buf[20] ^= 0xFF;
        match FileHeader::from_slot(&buf) {
            Err(StorageError::CorruptedHeader(_)) => {}
            other => panic!("expected CorruptedHeader, got {other:?}"),
        }
    }

    #[test]
    fn test_select_current_picks_higher_counter() {
        let mut h1 = FileHeader::new();
        h1.commit_counter = 5;
        let mut h2 = FileHeader::new();
        h2.commit_counter = 10;
        h2.top_ref = Ref::from_offset(DATA_START);

        let (selected, slot) = FileHeader::select_current(&encode(&h1), &encode(&h2)).unwrap();
        assert_eq!(selected, h2);
        assert_eq!(slot, 1);
    }

    #[test]
    fn test_select_current_handles_one_invalid() {
        let header = FileHeader::new();
        let (selected, slot) =
            FileHeader::select_current(&encode(&header), &[0u8; HEADER_SLOT_SIZE]).unwrap();
        assert_eq!(selected, header);
        assert_eq!(slot, 0);
    }

    #[test]
    fn test_select_current_both_invalid() {
        let zeros = [0u8; HEADER_SLOT_SIZE];
        assert!(matches!(
            FileHeader::select_current(&zeros, &zeros),
            Err(StorageError::InvalidMagic)
        ));
    }

    #[test]
    fn test_header_version_validation() {
        let mut buf = encode(&FileHeader::new());
        buf[4..8].copy_from_slice(&99u32.to_le_bytes());
        let checksum = xxh64(&buf[..CHECKSUM_OFFSET], 0);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 8].copy_from_slice(&checksum.to_le_bytes());

        match FileHeader::from_slot(&buf) {
            Err(StorageError::UnsupportedVersion(99)) => {}
            other => panic!("expected UnsupportedVersion(99), got {other:?}"),
        }
    }

    #[test]
    fn test_alternate_slot() {
        assert_eq!(FileHeader::alternate_slot(0), 1);
        assert_eq!(FileHeader::alternate_slot(1), 0);
    }

    #[test]
    fn test_default_header() {
        let header = FileHeader::default();
        assert_eq!(header.commit_counter, 0);
        assert!(header.top_ref.is_null());
        assert_eq!(header.data_len, DATA_START);
    }
}
