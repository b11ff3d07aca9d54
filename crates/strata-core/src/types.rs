//! Core types: node references, epochs, column types and attributes.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Transaction-boundary counter. Accessors stamped with an older epoch are detached.
pub type Epoch = u64;

/// Size of one file header slot in bytes. Two slots precede the node data.
pub const HEADER_SLOT_SIZE: usize = 64;

/// Byte offset of the first node in every address space (after both header slots).
pub const DATA_START: u64 = 2 * HEADER_SLOT_SIZE as u64;

/// Node images are laid out on this alignment.
pub const NODE_ALIGN: usize = 8;

/// Opaque, relocatable reference to a storage node.
///
/// A `Ref` is a byte offset into the store's address space. The header slots
/// occupy the start of that space, so [`Ref::NULL`] never names a node. Refs
/// travel through node slots as their own type: a `HasRefs` node stores them
/// as unsigned little-endian words, never through a signed integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ref(u64);

impl Ref {
    /// The absent reference.
    pub const NULL: Ref = Ref(0);

    /// Wrap a raw byte offset.
    pub const fn from_offset(offset: u64) -> Self {
        Ref(offset)
    }

    /// The byte offset this reference resolves to.
    pub const fn offset(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:#x}", self.0)
    }
}

/// Application-visible column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Bool,
    String,
    Binary,
    Table,
    Mixed,
    Date,
    Float,
    Double,
}

/// Physical column representation.
///
/// Identical to the [`DataType`] except for `StringEnum`, the
/// dictionary-coded form a `String` column takes after an enum upgrade.
/// The discriminants are the codes persisted in a spec's type array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColumnType {
    Int = 0,
    Bool = 1,
    String = 2,
    StringEnum = 3,
    Binary = 4,
    Table = 5,
    Mixed = 6,
    Date = 7,
    Float = 9,
    Double = 10,
}

impl ColumnType {
    /// Decode a persisted type code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ColumnType::Int),
            1 => Some(ColumnType::Bool),
            2 => Some(ColumnType::String),
            3 => Some(ColumnType::StringEnum),
            4 => Some(ColumnType::Binary),
            5 => Some(ColumnType::Table),
            6 => Some(ColumnType::Mixed),
            7 => Some(ColumnType::Date),
            9 => Some(ColumnType::Float),
            10 => Some(ColumnType::Double),
            _ => None,
        }
    }

    /// The code stored in a spec's type array.
    pub fn code(self) -> i64 {
        i64::from(self as u8)
    }

    /// The logical type this representation stores.
    pub fn data_type(self) -> DataType {
        match self {
            ColumnType::Int => DataType::Int,
            ColumnType::Bool => DataType::Bool,
            ColumnType::String | ColumnType::StringEnum => DataType::String,
            ColumnType::Binary => DataType::Binary,
            ColumnType::Table => DataType::Table,
            ColumnType::Mixed => DataType::Mixed,
            ColumnType::Date => DataType::Date,
            ColumnType::Float => DataType::Float,
            ColumnType::Double => DataType::Double,
        }
    }
}

impl From<DataType> for ColumnType {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::Int => ColumnType::Int,
            DataType::Bool => ColumnType::Bool,
            DataType::String => ColumnType::String,
            DataType::Binary => ColumnType::Binary,
            DataType::Table => ColumnType::Table,
            DataType::Mixed => ColumnType::Mixed,
            DataType::Date => ColumnType::Date,
            DataType::Float => ColumnType::Float,
            DataType::Double => ColumnType::Double,
        }
    }
}

bitflags! {
    /// Independent per-column traits.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ColumnAttr: u32 {
        /// The column owns a search index stored next to its data.
        const INDEXED = 0x01;
        /// Values are unique (requires an index to enforce).
        const UNIQUE = 0x02;
        /// Values are kept in sorted order.
        const SORTED = 0x04;
    }
}

impl ColumnAttr {
    /// Decode a persisted attribute word. Unknown bits are rejected.
    pub fn from_code(code: i64) -> Option<Self> {
        u32::try_from(code).ok().and_then(ColumnAttr::from_bits)
    }

    /// The code stored in a spec's attribute array.
    pub fn code(self) -> i64 {
        i64::from(self.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_codes_roundtrip() {
        let all = [
            ColumnType::Int,
            ColumnType::Bool,
            ColumnType::String,
            ColumnType::StringEnum,
            ColumnType::Binary,
            ColumnType::Table,
            ColumnType::Mixed,
            ColumnType::Date,
            ColumnType::Float,
            ColumnType::Double,
        ];
        for ty in all {
            assert_eq!(ColumnType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(ColumnType::from_code(8), None);
        assert_eq!(ColumnType::from_code(-1), None);
    }

    #[test]
    fn test_string_enum_is_logically_string() {
        assert_eq!(ColumnType::StringEnum.data_type(), DataType::String);
        assert_eq!(ColumnType::from(DataType::String), ColumnType::String);
        assert_eq!(ColumnType::from(DataType::Table).data_type(), DataType::Table);
    }

    #[test]
    fn test_attr_is_a_real_flag_set() {
        let attr = ColumnAttr::INDEXED | ColumnAttr::UNIQUE;
        assert!(attr.contains(ColumnAttr::INDEXED));
        assert!(attr.contains(ColumnAttr::UNIQUE));
        assert!(!attr.contains(ColumnAttr::SORTED));
        assert_eq!(ColumnAttr::from_code(attr.code()), Some(attr));
    }

    #[test]
    fn test_attr_rejects_unknown_bits() {
        assert_eq!(ColumnAttr::from_code(0x80), None);
        assert_eq!(ColumnAttr::from_code(-1), None);
        assert_eq!(ColumnAttr::from_code(0), Some(ColumnAttr::empty()));
    }

    #[test]
    fn test_null_ref() {
        assert!(Ref::NULL.is_null());
        assert!(!Ref::from_offset(DATA_START).is_null());
        assert_eq!(Ref::from_offset(256).to_string(), "@0x100");
    }
}
