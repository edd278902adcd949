use super::{DefPool, EnumDef, FileDef, MessageDef, OneofDef};
use crate::StringView;
use crate::arena::Arena;
use crate::base::MessageValue;
use crate::defs::descriptor::Label;
use crate::mini_table::{CType, FieldType, MiniTableExtension, MiniTableField};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubDef {
    None,
    Message(usize),
    Enum(usize),
}

pub(crate) struct FieldData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) json_name: String,
    pub(crate) has_json_name: bool,
    pub(crate) number: u32,
    pub(crate) label: Label,
    pub(crate) field_type: FieldType,
    pub(crate) file: usize,
    /// The owning message, or the extendee for extensions.
    pub(crate) message: Option<usize>,
    /// Message an extension is declared in.
    pub(crate) scope: Option<usize>,
    pub(crate) is_extension: bool,
    pub(crate) oneof: Option<usize>,
    pub(crate) sub: SubDef,
    pub(crate) default: Option<MessageValue>,
    pub(crate) has_default: bool,
    pub(crate) proto3_optional: bool,
    pub(crate) packed: bool,
    pub(crate) presence: bool,
    /// Position in the owning message or extension list.
    pub(crate) index: usize,
    pub(crate) layout: *const MiniTableField,
    pub(crate) extension: *const MiniTableExtension,
}

/// A field or extension in a [`DefPool`].
#[derive(Clone, Copy)]
pub struct FieldDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) index: usize,
}

impl<'p> FieldDef<'p> {
    fn data(&self) -> &'p FieldData {
        &self.pool.fields[self.index]
    }

    pub fn name(&self) -> &'p str {
        &self.data().name
    }

    pub fn full_name(&self) -> &'p str {
        &self.data().full_name
    }

    pub fn json_name(&self) -> &'p str {
        &self.data().json_name
    }

    /// Whether `json_name` was given explicitly in the descriptor.
    pub fn has_json_name(&self) -> bool {
        self.data().has_json_name
    }

    pub fn number(&self) -> u32 {
        self.data().number
    }

    pub fn label(&self) -> Label {
        self.data().label
    }

    pub fn field_type(&self) -> FieldType {
        self.data().field_type
    }

    pub fn ctype(&self) -> CType {
        self.data().field_type.ctype()
    }

    pub fn index(&self) -> usize {
        self.data().index
    }

    pub fn file(&self) -> FileDef<'p> {
        FileDef { pool: self.pool, index: self.data().file }
    }

    pub fn is_repeated(&self) -> bool {
        self.data().label == Label::Repeated
    }

    pub fn is_required(&self) -> bool {
        self.data().label == Label::Required
    }

    pub fn is_extension(&self) -> bool {
        self.data().is_extension
    }

    pub fn is_packed(&self) -> bool {
        self.data().packed
    }

    pub fn is_sub_message(&self) -> bool {
        matches!(self.data().sub, SubDef::Message(_))
    }

    pub fn is_map(&self) -> bool {
        self.is_repeated() && self.message_type().is_some_and(|m| m.is_map_entry())
    }

    pub fn is_closed_enum(&self) -> bool {
        self.enum_type().is_some_and(|e| e.is_closed())
    }

    /// Explicit presence: hasbit, oneof case or sub-message pointer.
    pub fn has_presence(&self) -> bool {
        self.data().presence
    }

    pub fn is_proto3_optional(&self) -> bool {
        self.data().proto3_optional
    }

    /// The message this field belongs to; for an extension, its extendee.
    pub fn containing_type(&self) -> Option<MessageDef<'p>> {
        let pool = self.pool;
        self.data().message.map(|index| MessageDef { pool, index })
    }

    /// The message an extension is declared in, if any.
    pub fn extension_scope(&self) -> Option<MessageDef<'p>> {
        let pool = self.pool;
        self.data().scope.map(|index| MessageDef { pool, index })
    }

    pub fn containing_oneof(&self) -> Option<OneofDef<'p>> {
        let pool = self.pool;
        self.data().oneof.map(|index| OneofDef { pool, index })
    }

    /// The containing oneof unless it is synthetic.
    pub fn real_containing_oneof(&self) -> Option<OneofDef<'p>> {
        self.containing_oneof().filter(|o| !o.is_synthetic())
    }

    pub fn message_type(&self) -> Option<MessageDef<'p>> {
        match self.data().sub {
            SubDef::Message(index) => Some(MessageDef { pool: self.pool, index }),
            _ => None,
        }
    }

    pub fn enum_type(&self) -> Option<EnumDef<'p>> {
        match self.data().sub {
            SubDef::Enum(index) => Some(EnumDef { pool: self.pool, index }),
            _ => None,
        }
    }

    pub fn has_default(&self) -> bool {
        self.data().has_default
    }

    /// The declared default, or the type's zero value. Message fields have
    /// no default.
    pub fn default_value(&self) -> Option<MessageValue> {
        self.data().default
    }

    /// Layout of this field inside its message's mini-table (or inside the
    /// extension record, for extensions).
    pub fn mini_table_field(&self) -> &'p MiniTableField {
        // Safety: set when the file was laid out; lives in the pool's arena.
        unsafe { &*self.data().layout }
    }

    pub fn mini_extension(&self) -> Option<&'p MiniTableExtension> {
        unsafe { self.data().extension.as_ref() }
    }
}

impl PartialEq for FieldDef<'_> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.pool, other.pool) && self.index == other.index
    }
}

impl core::fmt::Debug for FieldDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("FieldDef").field(&self.full_name()).finish()
    }
}

/// The default JSON name of a field: `foo_bar_baz` becomes `fooBarBaz`.
pub fn to_json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Integer literal with C `strtol(.., 0)` prefixes: `0x` hex, leading `0`
/// octal.
fn parse_int(s: &str) -> Option<i128> {
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let v = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i128::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        i128::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<i128>().ok()?
    };
    Some(if neg { -v } else { v })
}

fn parse_float(s: &str) -> Option<f64> {
    match s {
        "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        "nan" | "-nan" => Some(f64::NAN),
        _ => s.parse().ok(),
    }
}

/// Reverses the C-style escaping `protoc` applies to bytes defaults.
pub(crate) fn unescape_bytes(s: &str) -> Option<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        i += 1;
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let esc = *bytes.get(i)?;
        i += 1;
        match esc {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'\\' | b'\'' | b'"' | b'?' => out.push(esc),
            b'0'..=b'7' => {
                let mut v = (esc - b'0') as u32;
                for _ in 0..2 {
                    match bytes.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            v = v * 8 + (d - b'0') as u32;
                            i += 1;
                        }
                        _ => break,
                    }
                }
                out.push(u8::try_from(v).ok()?);
            }
            b'x' | b'X' => {
                let mut v = 0u32;
                let start = i;
                while i < bytes.len() && i - start < 2 && bytes[i].is_ascii_hexdigit() {
                    v = v * 16 + (bytes[i] as char).to_digit(16)?;
                    i += 1;
                }
                if i == start {
                    return None;
                }
                out.push(v as u8);
            }
            _ => return None,
        }
    }
    Some(out)
}

/// Parses a `default_value` literal for a non-enum scalar field. String
/// and bytes defaults are copied into `arena`.
pub(crate) fn parse_default(field_type: FieldType, raw: &str, arena: &Arena<'_>) -> Option<MessageValue> {
    Some(match field_type {
        FieldType::Bool => match raw {
            "true" => MessageValue::Bool(true),
            "false" => MessageValue::Bool(false),
            _ => return None,
        },
        FieldType::Int32 | FieldType::SInt32 | FieldType::SFixed32 => {
            MessageValue::Int32(i32::try_from(parse_int(raw)?).ok()?)
        }
        FieldType::Int64 | FieldType::SInt64 | FieldType::SFixed64 => {
            MessageValue::Int64(i64::try_from(parse_int(raw)?).ok()?)
        }
        FieldType::UInt32 | FieldType::Fixed32 => MessageValue::UInt32(u32::try_from(parse_int(raw)?).ok()?),
        FieldType::UInt64 | FieldType::Fixed64 => MessageValue::UInt64(u64::try_from(parse_int(raw)?).ok()?),
        FieldType::Float => MessageValue::Float(parse_float(raw)? as f32),
        FieldType::Double => MessageValue::Double(parse_float(raw)?),
        FieldType::String => MessageValue::String(StringView::copy_in(raw.as_bytes(), arena)?),
        FieldType::Bytes => MessageValue::String(StringView::copy_in(&unescape_bytes(raw)?, arena)?),
        FieldType::Enum | FieldType::Message | FieldType::Group => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_names() {
        assert_eq!(to_json_name("foo_bar_baz"), "fooBarBaz");
        assert_eq!(to_json_name("already"), "already");
        assert_eq!(to_json_name("x__y"), "xY");
        assert_eq!(to_json_name("trailing_"), "trailing");
    }

    #[test]
    fn integer_defaults() {
        let arena = Arena::default();
        assert_eq!(parse_default(FieldType::Int32, "-42", &arena), Some(MessageValue::Int32(-42)));
        assert_eq!(parse_default(FieldType::Int32, "0x10", &arena), Some(MessageValue::Int32(16)));
        assert_eq!(parse_default(FieldType::UInt32, "010", &arena), Some(MessageValue::UInt32(8)));
        assert_eq!(parse_default(FieldType::UInt32, "-1", &arena), None);
        assert_eq!(parse_default(FieldType::Int32, "4294967296", &arena), None);
        assert_eq!(
            parse_default(FieldType::UInt64, "18446744073709551615", &arena),
            Some(MessageValue::UInt64(u64::MAX))
        );
    }

    #[test]
    fn float_and_bool_defaults() {
        let arena = Arena::default();
        assert_eq!(parse_default(FieldType::Double, "inf", &arena), Some(MessageValue::Double(f64::INFINITY)));
        assert_eq!(parse_default(FieldType::Float, "1.5", &arena), Some(MessageValue::Float(1.5)));
        assert!(matches!(parse_default(FieldType::Double, "nan", &arena), Some(MessageValue::Double(v)) if v.is_nan()));
        assert_eq!(parse_default(FieldType::Bool, "true", &arena), Some(MessageValue::Bool(true)));
        assert_eq!(parse_default(FieldType::Bool, "yes", &arena), None);
    }

    #[test]
    fn bytes_defaults_are_unescaped() {
        assert_eq!(unescape_bytes(r"a\nb\001\x7f\\").unwrap(), b"a\nb\x01\x7f\\");
        assert!(unescape_bytes(r"\q").is_none());
        let arena = Arena::default();
        let v = parse_default(FieldType::Bytes, r"\000\377", &arena).unwrap();
        assert_eq!(v.as_str_view().unwrap().as_bytes(), &[0, 255]);
    }
}
