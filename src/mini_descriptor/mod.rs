//! The mini-descriptor format: a printable base-92 string describing the
//! shape of a message, enum or extension.
//!
//! A descriptor starts with a version byte, then a run of field type codes
//! with optional modifiers and field number skips, and (for messages) a
//! trailing oneof section introduced by `^`.

mod encode;

pub use encode::MtDataEncoder;

/// Version bytes.
pub mod version {
    pub const ENUM: u8 = b'!';
    pub const EXTENSION: u8 = b'#';
    pub const MESSAGE: u8 = b'$';
    pub const MAP: u8 = b'%';
    pub const MESSAGE_SET: u8 = b'&';
}

/// Field type codes as they appear in a descriptor, before base-92 encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncodedType {
    Double = 0,
    Float = 1,
    Fixed32 = 2,
    Fixed64 = 3,
    SFixed32 = 4,
    SFixed64 = 5,
    Int32 = 6,
    UInt32 = 7,
    SInt32 = 8,
    Int64 = 9,
    UInt64 = 10,
    SInt64 = 11,
    OpenEnum = 12,
    Bool = 13,
    Bytes = 14,
    String = 15,
    Group = 16,
    Message = 17,
    ClosedEnum = 18,
}

impl EncodedType {
    /// Added to a type code to mark the field repeated.
    pub const REPEATED_BASE: u8 = 20;

    pub const fn from_u8(v: u8) -> Option<EncodedType> {
        use EncodedType::*;
        Some(match v {
            0 => Double,
            1 => Float,
            2 => Fixed32,
            3 => Fixed64,
            4 => SFixed32,
            5 => SFixed64,
            6 => Int32,
            7 => UInt32,
            8 => SInt32,
            9 => Int64,
            10 => UInt64,
            11 => SInt64,
            12 => OpenEnum,
            13 => Bool,
            14 => Bytes,
            15 => String,
            16 => Group,
            17 => Message,
            18 => ClosedEnum,
            _ => return None,
        })
    }
}

/// Per-field modifier bits as written in a descriptor.
pub mod field_modifier {
    pub const FLIP_PACKED: u32 = 1 << 0;
    pub const FLIP_VALIDATE_UTF8: u32 = 1 << 1;
    pub const IS_REQUIRED: u32 = 1 << 2;
    pub const IS_PROTO3_SINGULAR: u32 = 1 << 3;
}

/// Message modifier bits as written in a descriptor.
pub mod message_modifier {
    pub const VALIDATE_UTF8: u64 = 1 << 0;
    pub const DEFAULT_IS_PACKED: u64 = 1 << 1;
    pub const IS_EXTENDABLE: u64 = 1 << 2;
}

/// Field properties handed to [`MtDataEncoder::put_field`].
///
/// These describe the field itself; the encoder works out which of them
/// differ from the message defaults and need a modifier.
pub mod field_flags {
    pub const IS_REPEATED: u64 = 1 << 0;
    pub const IS_PACKED: u64 = 1 << 1;
    pub const IS_CLOSED_ENUM: u64 = 1 << 2;
    pub const IS_PROTO3_SINGULAR: u64 = 1 << 3;
    pub const IS_REQUIRED: u64 = 1 << 4;
    pub const VALIDATE_UTF8: u64 = 1 << 5;
}

/// Character ranges of the grammar (raw characters, not base-92 values).
pub(crate) mod value {
    pub const MAX_FIELD: u8 = b'I';
    pub const MIN_MODIFIER: u8 = b'L';
    pub const MAX_MODIFIER: u8 = b'[';
    pub const END: u8 = b'^';
    pub const MIN_SKIP: u8 = b'_';
    pub const MAX_SKIP: u8 = b'~';
    pub const ONEOF_SEPARATOR: u8 = b'~';
    pub const FIELD_SEPARATOR: u8 = b'|';
    pub const MIN_ONEOF_FIELD: u8 = b' ';
    pub const MAX_ONEOF_FIELD: u8 = b'b';
    pub const MAX_ENUM_MASK: u8 = b'A';
}

const TO_BASE92: [u8; 92] = *b" !#$%&()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[]^_`abcdefghijklmnopqrstuvwxyz{|}~";

const FROM_BASE92: [i8; 95] = {
    let mut table = [-1i8; 95];
    let mut i = 0;
    while i < TO_BASE92.len() {
        table[(TO_BASE92[i] - b' ') as usize] = i as i8;
        i += 1;
    }
    table
};

/// The character for base-92 value `v` (`v < 92`).
#[inline]
pub const fn to_base92(v: u8) -> u8 {
    TO_BASE92[v as usize]
}

/// The base-92 value of `ch`, or `None` for characters outside the alphabet.
#[inline]
pub const fn from_base92(ch: u8) -> Option<u8> {
    if ch < b' ' || ch > b'~' {
        return None;
    }
    let v = FROM_BASE92[(ch - b' ') as usize];
    if v < 0 { None } else { Some(v as u8) }
}

/// Base-92 value of a character known to be in the alphabet.
#[inline]
pub(crate) const fn idx(ch: u8) -> u32 {
    match from_base92(ch) {
        Some(v) => v as u32,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet() {
        assert_eq!(to_base92(0), b' ');
        assert_eq!(to_base92(91), b'~');
        assert_eq!(from_base92(b'"'), None);
        assert_eq!(from_base92(b'\''), None);
        assert_eq!(from_base92(b'\\'), None);
        assert_eq!(from_base92(b'_'), Some(60));
        assert_eq!(from_base92(b'A'), Some(31));
        assert_eq!(from_base92(b'I'), Some(39));
        assert_eq!(from_base92(b'b'), Some(63));
        for v in 0..92u8 {
            assert_eq!(from_base92(to_base92(v)), Some(v));
        }
    }
}
