use crate::wire::WireType;

/// Protobuf field types, numbered as in `descriptor.proto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Double = 1,
    Float = 2,
    Int64 = 3,
    UInt64 = 4,
    Int32 = 5,
    Fixed64 = 6,
    Fixed32 = 7,
    Bool = 8,
    String = 9,
    Group = 10,
    Message = 11,
    Bytes = 12,
    UInt32 = 13,
    Enum = 14,
    SFixed32 = 15,
    SFixed64 = 16,
    SInt32 = 17,
    SInt64 = 18,
}

impl FieldType {
    pub const fn from_u8(v: u8) -> Option<FieldType> {
        use FieldType::*;
        Some(match v {
            1 => Double,
            2 => Float,
            3 => Int64,
            4 => UInt64,
            5 => Int32,
            6 => Fixed64,
            7 => Fixed32,
            8 => Bool,
            9 => String,
            10 => Group,
            11 => Message,
            12 => Bytes,
            13 => UInt32,
            14 => Enum,
            15 => SFixed32,
            16 => SFixed64,
            17 => SInt32,
            18 => SInt64,
            _ => return None,
        })
    }

    pub const fn is_packable(self) -> bool {
        !matches!(
            self,
            FieldType::String | FieldType::Group | FieldType::Message | FieldType::Bytes
        )
    }

    pub const fn ctype(self) -> CType {
        match self {
            FieldType::Double => CType::Double,
            FieldType::Float => CType::Float,
            FieldType::Int64 | FieldType::SInt64 | FieldType::SFixed64 => CType::Int64,
            FieldType::UInt64 | FieldType::Fixed64 => CType::UInt64,
            FieldType::Int32 | FieldType::SInt32 | FieldType::SFixed32 => CType::Int32,
            FieldType::UInt32 | FieldType::Fixed32 => CType::UInt32,
            FieldType::Enum => CType::Enum,
            FieldType::Bool => CType::Bool,
            FieldType::String => CType::String,
            FieldType::Bytes => CType::Bytes,
            FieldType::Group | FieldType::Message => CType::Message,
        }
    }

    /// Wire type of a single, unpacked value.
    pub const fn wire_type(self) -> WireType {
        match self {
            FieldType::Double | FieldType::Fixed64 | FieldType::SFixed64 => WireType::I64,
            FieldType::Float | FieldType::Fixed32 | FieldType::SFixed32 => WireType::I32,
            FieldType::String | FieldType::Bytes | FieldType::Message => WireType::Delimited,
            FieldType::Group => WireType::StartGroup,
            _ => WireType::Varint,
        }
    }
}

/// In-memory value category of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CType {
    Bool,
    Float,
    Int32,
    UInt32,
    Enum,
    Message,
    Double,
    Int64,
    UInt64,
    String,
    Bytes,
}

impl CType {
    /// log2 of the element size of a repeated field of this type.
    pub const fn size_lg2(self) -> u8 {
        match self {
            CType::Bool => 0,
            CType::Float | CType::Int32 | CType::UInt32 | CType::Enum => 2,
            CType::Double | CType::Int64 | CType::UInt64 | CType::Message => 3,
            CType::String | CType::Bytes => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldMode {
    Map = 0,
    Array = 1,
    Scalar = 2,
}

/// Storage class of a field's slot in the message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FieldRep {
    OneByte = 0,
    FourByte = 1,
    StringView = 2,
    EightByte = 3,
}

impl FieldRep {
    /// Repeated fields, maps and sub-messages are stored as one pointer.
    pub const NATIVE_POINTER: FieldRep = if cfg!(target_pointer_width = "64") {
        FieldRep::EightByte
    } else {
        FieldRep::FourByte
    };

    pub const fn size(self) -> usize {
        match self {
            FieldRep::OneByte => 1,
            FieldRep::FourByte => 4,
            FieldRep::StringView => core::mem::size_of::<crate::StringView>(),
            FieldRep::EightByte => 8,
        }
    }

    pub const fn align(self) -> usize {
        match self {
            FieldRep::OneByte => 1,
            FieldRep::FourByte => 4,
            FieldRep::StringView => core::mem::align_of::<crate::StringView>(),
            FieldRep::EightByte => 8,
        }
    }

    pub(crate) const fn from_bits(v: u8) -> FieldRep {
        match v & 3 {
            0 => FieldRep::OneByte,
            1 => FieldRep::FourByte,
            2 => FieldRep::StringView,
            _ => FieldRep::EightByte,
        }
    }
}

pub(crate) mod mode_bits {
    pub const MODE_MASK: u8 = 3;
    pub const IS_PACKED: u8 = 1 << 2;
    pub const IS_EXTENSION: u8 = 1 << 3;
    pub const IS_ALTERNATE: u8 = 1 << 4;
    pub const REP_SHIFT: u8 = 6;
}

/// `submsg_index` of a field without a sub-table.
pub const NO_SUB: u16 = u16::MAX;

/// Layout and type of one field.
///
/// `presence` is positive for a hasbit index, `!case_offset` (negative) for a
/// oneof member and zero for fields without explicit presence.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniTableField {
    pub(crate) number: u32,
    pub(crate) offset: u16,
    pub(crate) presence: i16,
    pub(crate) submsg_index: u16,
    pub(crate) descriptortype: u8,
    pub(crate) mode: u8,
}

impl MiniTableField {
    pub(crate) const fn zeroed() -> Self {
        MiniTableField {
            number: 0,
            offset: 0,
            presence: 0,
            submsg_index: NO_SUB,
            descriptortype: 0,
            mode: 0,
        }
    }

    #[inline(always)]
    pub const fn number(&self) -> u32 {
        self.number
    }

    #[inline(always)]
    pub const fn offset(&self) -> usize {
        self.offset as usize
    }

    /// Type as it appears on the wire. Open enums read as `Int32` and strings
    /// that skip UTF-8 validation as `Bytes`.
    #[inline(always)]
    pub(crate) const fn descriptor_type(&self) -> FieldType {
        match FieldType::from_u8(self.descriptortype) {
            Some(t) => t,
            None => FieldType::Int32,
        }
    }

    /// The declared type of the field.
    pub const fn field_type(&self) -> FieldType {
        let t = self.descriptor_type();
        if self.is_alternate() {
            match t {
                FieldType::Int32 => return FieldType::Enum,
                FieldType::Bytes => return FieldType::String,
                _ => {}
            }
        }
        t
    }

    pub const fn ctype(&self) -> CType {
        self.field_type().ctype()
    }

    #[inline(always)]
    pub const fn mode(&self) -> FieldMode {
        match self.mode & mode_bits::MODE_MASK {
            0 => FieldMode::Map,
            1 => FieldMode::Array,
            _ => FieldMode::Scalar,
        }
    }

    #[inline(always)]
    pub const fn rep(&self) -> FieldRep {
        FieldRep::from_bits(self.mode >> mode_bits::REP_SHIFT)
    }

    pub const fn is_array(&self) -> bool {
        matches!(self.mode(), FieldMode::Array)
    }

    pub const fn is_map(&self) -> bool {
        matches!(self.mode(), FieldMode::Map)
    }

    pub const fn is_scalar(&self) -> bool {
        matches!(self.mode(), FieldMode::Scalar)
    }

    pub const fn is_repeated_or_map(&self) -> bool {
        !self.is_scalar()
    }

    pub const fn is_packed(&self) -> bool {
        self.mode & mode_bits::IS_PACKED != 0
    }

    pub const fn is_extension(&self) -> bool {
        self.mode & mode_bits::IS_EXTENSION != 0
    }

    pub(crate) const fn is_alternate(&self) -> bool {
        self.mode & mode_bits::IS_ALTERNATE != 0
    }

    pub const fn has_presence(&self) -> bool {
        if self.is_extension() {
            self.is_scalar()
        } else {
            self.presence != 0
        }
    }

    pub const fn is_in_oneof(&self) -> bool {
        self.presence < 0
    }

    /// Hasbit index, if the field's presence is tracked by a hasbit.
    pub const fn hasbit(&self) -> Option<u16> {
        if self.presence > 0 { Some(self.presence as u16) } else { None }
    }

    /// Offset of the oneof case slot, for oneof members.
    pub const fn oneof_case_offset(&self) -> Option<usize> {
        if self.presence < 0 { Some(!self.presence as u16 as usize) } else { None }
    }

    pub const fn is_sub_message(&self) -> bool {
        matches!(self.descriptortype, 10 | 11)
    }

    pub const fn is_closed_enum(&self) -> bool {
        self.descriptortype == FieldType::Enum as u8
    }

    pub(crate) const fn validates_utf8(&self) -> bool {
        self.descriptortype == FieldType::String as u8
    }

    /// Element size of a repeated field.
    pub(crate) const fn elem_size_lg2(&self) -> u8 {
        self.descriptor_type().ctype().size_lg2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternate_types() {
        let mut f = MiniTableField::zeroed();
        f.descriptortype = FieldType::Bytes as u8;
        f.mode = FieldMode::Scalar as u8 | mode_bits::IS_ALTERNATE | ((FieldRep::StringView as u8) << mode_bits::REP_SHIFT);
        assert_eq!(f.field_type(), FieldType::String);
        assert!(!f.validates_utf8());
        assert_eq!(f.rep(), FieldRep::StringView);
        assert!(f.is_scalar());

        f.descriptortype = FieldType::Int32 as u8;
        assert_eq!(f.field_type(), FieldType::Enum);
        assert!(!f.is_closed_enum());
    }

    #[test]
    fn presence() {
        let mut f = MiniTableField::zeroed();
        f.presence = 3;
        assert_eq!(f.hasbit(), Some(3));
        assert_eq!(f.oneof_case_offset(), None);
        f.presence = !12;
        assert!(f.is_in_oneof());
        assert_eq!(f.oneof_case_offset(), Some(12));
        assert_eq!(f.hasbit(), None);
    }

    #[test]
    fn packable() {
        assert!(FieldType::Int32.is_packable());
        assert!(FieldType::Double.is_packable());
        assert!(!FieldType::String.is_packable());
        assert!(!FieldType::Message.is_packable());
        assert_eq!(FieldType::SInt64.wire_type(), WireType::Varint);
        assert_eq!(FieldType::Group.wire_type(), WireType::StartGroup);
    }
}
