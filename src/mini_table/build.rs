//! Mini-descriptor decoding: turns a descriptor string into a laid out
//! [`MiniTable`] (or enum / extension table).

use super::field::mode_bits;
use super::{
    ExtMode, FastEntry, FieldMode, FieldRep, FieldType, MiniTable, MiniTableExtension, MiniTableField,
    MiniTableSub, NO_FASTTABLE, NO_SUB, arena_new, decode_base92_varint,
};
use crate::arena::{Arena, align_up};
use crate::error::{Error, Result};
use crate::mini_descriptor::{EncodedType, field_modifier, from_base92, message_modifier, value, version};

/// Map entries keep their hasbits in the first word, the key and the value
/// in two string-view sized slots after it.
pub(crate) const MAP_ENTRY_KEY_OFFSET: u16 = 8;
pub(crate) const MAP_ENTRY_VALUE_OFFSET: u16 = 24;
pub(crate) const MAP_ENTRY_SIZE: u16 = 40;

const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;
const MAX_REQUIRED: u16 = 63;

// Presence markers while parsing; replaced by real hasbits and case offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    None,
    Hasbit,
    Required,
    Oneof,
}

// Layout order of the representation regions.
const REP_ORDER: [FieldRep; 4] = [FieldRep::EightByte, FieldRep::StringView, FieldRep::FourByte, FieldRep::OneByte];

struct Oneof {
    rep: FieldRep,
    members: Vec<usize>,
}

struct MtDecoder<'d> {
    data: &'d [u8],
    pos: usize,
    // `false` while decoding an extension.
    is_message: bool,
    fields: Vec<MiniTableField>,
    markers: Vec<Marker>,
    oneofs: Vec<Oneof>,
    submsg_count: u16,
    subenum_count: u16,
    size: usize,
    ext: ExtMode,
    dense_below: u16,
    required_count: u8,
}

fn error(msg: String) -> Error {
    tracing::debug!(%msg, "mini-descriptor rejected");
    Error::MiniTable(msg)
}

fn rep_for(t: EncodedType) -> FieldRep {
    use EncodedType::*;
    match t {
        Double | Int64 | UInt64 | Fixed64 | SFixed64 | SInt64 => FieldRep::EightByte,
        Float | Int32 | Fixed32 | UInt32 | OpenEnum | SFixed32 | SInt32 | ClosedEnum => FieldRep::FourByte,
        Bool => FieldRep::OneByte,
        String | Bytes => FieldRep::StringView,
        Group | Message => FieldRep::NATIVE_POINTER,
    }
}

fn field_type_for(t: EncodedType) -> FieldType {
    use EncodedType as E;
    match t {
        E::Double => FieldType::Double,
        E::Float => FieldType::Float,
        E::Fixed32 => FieldType::Fixed32,
        E::Fixed64 => FieldType::Fixed64,
        E::SFixed32 => FieldType::SFixed32,
        E::SFixed64 => FieldType::SFixed64,
        E::Int32 | E::OpenEnum => FieldType::Int32,
        E::UInt32 => FieldType::UInt32,
        E::SInt32 => FieldType::SInt32,
        E::Int64 => FieldType::Int64,
        E::UInt64 => FieldType::UInt64,
        E::SInt64 => FieldType::SInt64,
        E::Bool => FieldType::Bool,
        E::Bytes | E::String => FieldType::Bytes,
        E::Group => FieldType::Group,
        E::Message => FieldType::Message,
        E::ClosedEnum => FieldType::Enum,
    }
}

impl<'d> MtDecoder<'d> {
    fn new(data: &'d [u8], is_message: bool) -> Self {
        MtDecoder {
            data,
            pos: 0,
            is_message,
            fields: Vec::new(),
            markers: Vec::new(),
            oneofs: Vec::new(),
            submsg_count: 0,
            subenum_count: 0,
            size: 0,
            ext: ExtMode::NonExtendable,
            dense_below: 0,
            required_count: 0,
        }
    }

    fn set_field(&mut self, ch: u8, msg_modifiers: u64, number: u32) -> Result<()> {
        let mut type_code = from_base92(ch).ok_or_else(|| error(format!("Invalid char: {}", ch as char)))?;
        let mut field = MiniTableField::zeroed();
        field.number = number;
        let marker;
        let mode;
        let is_array = type_code >= EncodedType::REPEATED_BASE;
        if is_array {
            type_code -= EncodedType::REPEATED_BASE;
        }
        let encoded = EncodedType::from_u8(type_code)
            .ok_or_else(|| error(format!("Invalid field type: {}", type_code)))?;
        let rep = if is_array {
            mode = FieldMode::Array;
            marker = Marker::None;
            FieldRep::NATIVE_POINTER
        } else {
            mode = FieldMode::Scalar;
            marker = Marker::Hasbit;
            rep_for(encoded)
        };
        field.mode = mode as u8 | ((rep as u8) << mode_bits::REP_SHIFT);

        let descriptor_type = field_type_for(encoded);
        field.descriptortype = descriptor_type as u8;
        match encoded {
            EncodedType::OpenEnum => field.mode |= mode_bits::IS_ALTERNATE,
            EncodedType::String if msg_modifiers & message_modifier::VALIDATE_UTF8 == 0 => {
                field.mode |= mode_bits::IS_ALTERNATE
            }
            EncodedType::String => field.descriptortype = FieldType::String as u8,
            _ => {}
        }
        if is_array && msg_modifiers & message_modifier::DEFAULT_IS_PACKED != 0 && descriptor_type.is_packable() {
            field.mode |= mode_bits::IS_PACKED;
        }
        field.submsg_index = match encoded {
            EncodedType::Message | EncodedType::Group => {
                self.submsg_count += 1;
                self.submsg_count - 1
            }
            EncodedType::ClosedEnum => {
                self.subenum_count += 1;
                self.subenum_count - 1
            }
            _ => NO_SUB,
        };
        self.fields.push(field);
        self.markers.push(marker);
        Ok(())
    }

    fn modify_field(&mut self, index: usize, modifiers: u32) -> Result<()> {
        let field = &mut self.fields[index];
        let number = field.number;
        if modifiers & field_modifier::FLIP_PACKED != 0 {
            if !(field.is_array() && field.descriptor_type().is_packable()) {
                return Err(error(format!("Cannot flip packed on unpackable field {}", number)));
            }
            field.mode ^= mode_bits::IS_PACKED;
        }
        if modifiers & field_modifier::FLIP_VALIDATE_UTF8 != 0 {
            if !(field.descriptortype == FieldType::Bytes as u8 && field.is_alternate()) {
                return Err(error(format!(
                    "Cannot flip ValidateUtf8 on field {}, type={}, mode={}",
                    number, field.descriptortype, field.mode
                )));
            }
            field.descriptortype = FieldType::String as u8;
            field.mode &= !mode_bits::IS_ALTERNATE;
        }
        let singular = modifiers & field_modifier::IS_PROTO3_SINGULAR != 0;
        let required = modifiers & field_modifier::IS_REQUIRED != 0;
        if (singular || required) && self.markers[index] != Marker::Hasbit {
            return Err(error(format!("Invalid modifier(s) for repeated field {}", number)));
        }
        if singular && required {
            return Err(error(format!("Field {} cannot be both singular and required", number)));
        }
        if singular && field.is_sub_message() {
            return Err(error(format!("Field {} cannot be a singular submessage", number)));
        }
        if singular {
            self.markers[index] = Marker::None;
        }
        if required {
            self.markers[index] = Marker::Required;
        }
        Ok(())
    }

    fn decode_varint(&mut self, first: u8, min: u8, max: u8) -> Result<u32> {
        let (val, pos) = decode_base92_varint(self.data, self.pos, first, min, max).map_err(error)?;
        self.pos = pos;
        Ok(val)
    }

    fn decode_oneof_field(&mut self, first: u8, oneof: &mut Option<Oneof>) -> Result<()> {
        let number = self.decode_varint(first, value::MIN_ONEOF_FIELD, value::MAX_ONEOF_FIELD)?;
        let Ok(index) = self.fields.binary_search_by_key(&number, |f| f.number) else {
            return Err(error(format!(
                "Couldn't add field number {} to oneof, no such field number.",
                number
            )));
        };
        if self.markers[index] != Marker::Hasbit {
            return Err(error(format!(
                "Cannot add repeated, required, or singular field {} to oneof.",
                number
            )));
        }
        self.markers[index] = Marker::Oneof;
        let rep = self.fields[index].rep();
        let oneof = oneof.get_or_insert(Oneof {
            rep,
            members: Vec::new(),
        });
        if rep.size() > oneof.rep.size() {
            oneof.rep = rep;
        }
        oneof.members.push(index);
        Ok(())
    }

    fn push_oneof(&mut self, oneof: Option<Oneof>) -> Result<()> {
        match oneof {
            Some(o) => {
                self.oneofs.push(o);
                Ok(())
            }
            None => Err(error("Empty oneof".to_string())),
        }
    }

    fn decode_oneofs(&mut self) -> Result<()> {
        let mut current = None;
        while self.pos < self.data.len() {
            let ch = self.data[self.pos];
            self.pos += 1;
            if ch == value::FIELD_SEPARATOR {
                continue;
            } else if ch == value::ONEOF_SEPARATOR {
                self.push_oneof(current.take())?;
            } else {
                self.decode_oneof_field(ch, &mut current)?;
            }
        }
        self.push_oneof(current)
    }

    fn parse(&mut self) -> Result<()> {
        let mut msg_modifiers = 0u64;
        let mut last_number = 0u32;
        let mut need_dense_below = self.is_message;
        while self.pos < self.data.len() {
            let ch = self.data[self.pos];
            self.pos += 1;
            if ch <= value::MAX_FIELD {
                if !self.is_message && !self.fields.is_empty() {
                    // Extensions hold exactly one field.
                    self.pos -= 1;
                    break;
                }
                last_number = last_number.wrapping_add(1);
                self.set_field(ch, msg_modifiers, last_number)?;
            } else if (value::MIN_MODIFIER..=value::MAX_MODIFIER).contains(&ch) {
                let modifiers = self.decode_varint(ch, value::MIN_MODIFIER, value::MAX_MODIFIER)?;
                if let Some(last) = self.fields.len().checked_sub(1) {
                    self.modify_field(last, modifiers)?;
                } else {
                    if !self.is_message {
                        return Err(error("Extensions cannot have message modifiers".to_string()));
                    }
                    msg_modifiers = modifiers as u64;
                    if msg_modifiers & message_modifier::IS_EXTENDABLE != 0 {
                        self.ext = ExtMode::Extendable;
                    }
                }
            } else if ch == value::END {
                if !self.is_message {
                    return Err(error("Extensions cannot have oneofs.".to_string()));
                }
                self.decode_oneofs()?;
            } else if (value::MIN_SKIP..=value::MAX_SKIP).contains(&ch) {
                if need_dense_below {
                    self.dense_below = self.fields.len() as u16;
                    need_dense_below = false;
                }
                let skip = self.decode_varint(ch, value::MIN_SKIP, value::MAX_SKIP)?;
                last_number = last_number.wrapping_add(skip).wrapping_sub(1);
            } else {
                return Err(error(format!("Invalid char: {}", ch as char)));
            }
            if self.fields.len() > u16::MAX as usize {
                return Err(error("Too many fields".to_string()));
            }
        }
        if need_dense_below {
            self.dense_below = self.fields.len() as u16;
        }
        Ok(())
    }

    fn assign_hasbits(&mut self) -> Result<()> {
        let mut last_hasbit = 0u16;
        for (field, marker) in self.fields.iter_mut().zip(&self.markers) {
            if *marker == Marker::Required {
                last_hasbit += 1;
                if last_hasbit > MAX_REQUIRED {
                    return Err(error("Too many required fields".to_string()));
                }
                field.presence = last_hasbit as i16;
            }
        }
        self.required_count = last_hasbit as u8;
        for (field, marker) in self.fields.iter_mut().zip(&self.markers) {
            if *marker == Marker::Hasbit {
                last_hasbit += 1;
                if last_hasbit > i16::MAX as u16 {
                    return Err(error("Too many fields with presence".to_string()));
                }
                field.presence = last_hasbit as i16;
            }
        }
        self.size = if last_hasbit > 0 {
            (last_hasbit as usize + 1).div_ceil(8)
        } else {
            0
        };
        Ok(())
    }

    fn assign_offsets(&mut self) -> Result<()> {
        let mut counts = [0usize; 4];
        for (field, marker) in self.fields.iter().zip(&self.markers) {
            if *marker != Marker::Oneof {
                counts[field.rep() as usize] += 1;
            }
        }
        for oneof in &self.oneofs {
            counts[FieldRep::FourByte as usize] += 1;
            counts[oneof.rep as usize] += 1;
        }

        let mut next = [0usize; 4];
        let mut base = self.size;
        for rep in REP_ORDER {
            let count = counts[rep as usize];
            if count == 0 {
                continue;
            }
            base = align_up(base, rep.align());
            next[rep as usize] = base;
            base += count * rep.size();
            if base > MAX_MESSAGE_SIZE {
                return Err(error(format!(
                    "Message size exceeded maximum size of {} bytes",
                    MAX_MESSAGE_SIZE
                )));
            }
        }

        let mut take = |rep: FieldRep| {
            let off = next[rep as usize];
            next[rep as usize] += rep.size();
            off as u16
        };
        for (field, marker) in self.fields.iter_mut().zip(&self.markers) {
            if *marker != Marker::Oneof {
                field.offset = take(field.rep());
            }
        }
        for oneof in &self.oneofs {
            let case_offset = take(FieldRep::FourByte);
            let data_offset = take(oneof.rep);
            for &i in &oneof.members {
                self.fields[i].offset = data_offset;
                self.fields[i].presence = !(case_offset as i16);
            }
        }

        let size = align_up(base, 8);
        if size > MAX_MESSAGE_SIZE {
            return Err(error(format!(
                "Message size exceeded maximum size of {} bytes",
                MAX_MESSAGE_SIZE
            )));
        }
        self.size = size;
        Ok(())
    }

    fn validate_entry_field(&self, index: usize, expected: u32) -> Result<()> {
        let name = if expected == 1 { "key" } else { "val" };
        let f = &self.fields[index];
        if f.number != expected {
            return Err(error(format!(
                "map {} did not have expected number ({} vs {})",
                name, expected, f.number
            )));
        }
        if !f.is_scalar() {
            return Err(error(format!("map {} cannot be repeated or map, or be in oneof", name)));
        }
        let bad = if expected == 1 {
            matches!(
                f.field_type(),
                FieldType::Float | FieldType::Double | FieldType::Message | FieldType::Group | FieldType::Bytes | FieldType::Enum
            )
        } else {
            f.field_type() == FieldType::Group
        };
        if bad {
            return Err(error(format!("map {} cannot have type {}", name, f.descriptortype)));
        }
        Ok(())
    }

    fn parse_message(&mut self) -> Result<()> {
        self.parse()?;
        self.assign_hasbits()?;
        self.assign_offsets()
    }

    fn parse_map(&mut self) -> Result<()> {
        self.parse()?;
        if self.fields.len() != 2 {
            return Err(error(format!("{} fields in map", self.fields.len())));
        }
        if !self.oneofs.is_empty() {
            return Err(error("Map entry cannot have oneof".to_string()));
        }
        self.validate_entry_field(0, 1)?;
        self.validate_entry_field(1, 2)?;
        self.assign_hasbits()?;
        self.fields[0].offset = MAP_ENTRY_KEY_OFFSET;
        self.fields[1].offset = MAP_ENTRY_VALUE_OFFSET;
        self.size = MAP_ENTRY_SIZE as usize;
        self.ext = ExtMode::IsMapEntry;
        Ok(())
    }

    fn parse_message_set(&mut self) -> Result<()> {
        let rest = self.data.len() - self.pos;
        if rest > 0 {
            return Err(error(format!("Invalid message set encode length: {}", rest)));
        }
        self.ext = ExtMode::IsMessageSet;
        Ok(())
    }

    fn finish<'a>(self, arena: &'a Arena<'_>) -> Result<&'a mut MiniTable> {
        let fields = copy_slice(&self.fields, arena)?;
        let sub_count = self.submsg_count + self.subenum_count;
        let mut subs_vec = Vec::with_capacity(sub_count as usize);
        subs_vec.extend((0..self.submsg_count).map(|_| MiniTableSub::Message(MiniTable::empty())));
        subs_vec.extend((0..self.subenum_count).map(|_| MiniTableSub::Enum(core::ptr::null())));
        let subs = copy_slice(&subs_vec, arena)?;
        // Enum sub indexes follow the message ones.
        for field in fields.iter_mut() {
            if field.is_closed_enum() && field.submsg_index != NO_SUB {
                field.submsg_index += self.submsg_count;
            }
        }

        let max_fast = fields
            .iter()
            .map(|f| f.number)
            .filter(|n| (1..=15).contains(n))
            .max()
            .unwrap_or(0);
        let (table_mask, fasttable) = if max_fast == 0 {
            (NO_FASTTABLE, core::ptr::null_mut())
        } else {
            let entries = (max_fast as usize + 1).next_power_of_two();
            let slots = copy_slice(&vec![FastEntry::EMPTY; entries], arena)?;
            ((((entries - 1) << 3) as u8), slots.as_mut_ptr())
        };

        let table = arena_new(
            MiniTable {
                subs: subs.as_mut_ptr(),
                fields: fields.as_mut_ptr(),
                size: self.size as u16,
                field_count: fields.len() as u16,
                sub_count,
                ext: self.ext,
                dense_below: self.dense_below,
                table_mask,
                required_count: self.required_count,
                fasttable,
            },
            arena,
        )?;
        table.refresh_fasttable();
        Ok(table)
    }
}

fn copy_slice<'a, T: Copy>(items: &[T], arena: &'a Arena<'_>) -> Result<&'a mut [T]> {
    if items.is_empty() {
        return Ok(&mut []);
    }
    let layout = core::alloc::Layout::array::<T>(items.len()).map_err(|_| Error::OutOfMemory)?;
    let ptr = arena.alloc_raw(layout).ok_or(Error::OutOfMemory)?.cast::<T>();
    unsafe {
        core::ptr::copy_nonoverlapping(items.as_ptr(), ptr.as_ptr(), items.len());
        Ok(core::slice::from_raw_parts_mut(ptr.as_ptr(), items.len()))
    }
}

impl MiniTable {
    /// Builds a message table from a mini-descriptor.
    ///
    /// Sub-message slots point at [`MiniTable::empty`] and enum slots are
    /// null until [`link`](MiniTable::link) fills them in.
    pub fn build<'a>(data: &str, arena: &'a Arena<'_>) -> Result<&'a mut MiniTable> {
        let bytes = data.as_bytes();
        let mut d = MtDecoder::new(bytes, true);
        if let Some((&vers, _)) = bytes.split_first() {
            d.pos = 1;
            match vers {
                version::MESSAGE => d.parse_message()?,
                version::MAP => d.parse_map()?,
                version::MESSAGE_SET => d.parse_message_set()?,
                _ => return Err(error(format!("Invalid message version: {}", vers as char))),
            }
        }
        let table = d.finish(arena)?;
        tracing::trace!(size = table.size, fields = table.field_count, "built mini table");
        Ok(table)
    }
}

impl MiniTableExtension {
    /// Builds an extension of `extendee` from an extension mini-descriptor.
    pub fn build<'a>(
        data: &str,
        extendee: &MiniTable,
        sub: MiniTableSub,
        arena: &'a Arena<'_>,
    ) -> Result<&'a mut MiniTableExtension> {
        let bytes = data.as_bytes();
        match bytes.first() {
            Some(&version::EXTENSION) => {}
            Some(&other) => return Err(error(format!("Invalid ext version: {}", other as char))),
            None => return Err(error("Empty extension descriptor".to_string())),
        }
        let mut d = MtDecoder::new(bytes, false);
        d.pos = 1;
        d.parse()?;
        if d.fields.len() != 1 {
            return Err(error(format!("{} fields in extension", d.fields.len())));
        }
        let mut field = d.fields[0];
        field.mode |= mode_bits::IS_EXTENSION;
        field.offset = 0;
        field.presence = 0;
        if extendee.is_message_set() {
            if !field.is_sub_message() {
                return Err(error("MessageSet extensions must be messages".to_string()));
            }
            if field.is_array() {
                return Err(error("MessageSet extensions cannot be repeated".to_string()));
            }
        }
        let ext = arena_new(
            MiniTableExtension {
                field,
                extendee: extendee as *const MiniTable,
                sub,
            },
            arena,
        )?;
        Ok(ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_descriptor::{MtDataEncoder, field_flags, to_base92};

    fn message(fields: &[(FieldType, u32, u64)], msg_mod: u64) -> String {
        let mut e = MtDataEncoder::new();
        e.start_message(msg_mod);
        for &(t, n, flags) in fields {
            assert!(e.put_field(t, n, flags));
        }
        e.finish()
    }

    #[test]
    fn scalar_layout() {
        let arena = Arena::default();
        let desc = message(
            &[
                (FieldType::Bool, 1, 0),
                (FieldType::Int64, 2, 0),
                (FieldType::String, 3, 0),
                (FieldType::Int32, 4, 0),
            ],
            0,
        );
        let t = MiniTable::build(&desc, &arena).unwrap();
        let f: Vec<_> = t.fields().iter().map(|f| (f.offset, f.presence)).collect();
        // Hasbits 1..=4 fit in byte 0; then 8-byte, string view, 4-byte, 1-byte regions.
        assert_eq!(f, vec![(36, 1), (8, 2), (16, 3), (32, 4)]);
        assert_eq!(t.size(), 40);
        assert_eq!(t.fields()[2].field_type(), FieldType::String);
        assert_eq!(t.fields()[2].descriptor_type(), FieldType::Bytes);
        assert_eq!(t.required_count(), 0);
    }

    #[test]
    fn required_fields_take_low_hasbits() {
        let arena = Arena::default();
        let desc = message(
            &[
                (FieldType::Int32, 1, 0),
                (FieldType::Int32, 2, field_flags::IS_REQUIRED),
                (FieldType::Int32, 3, field_flags::IS_PROTO3_SINGULAR),
            ],
            0,
        );
        let t = MiniTable::build(&desc, &arena).unwrap();
        assert_eq!(t.required_count(), 1);
        assert_eq!(t.fields()[1].hasbit(), Some(1));
        assert_eq!(t.fields()[0].hasbit(), Some(2));
        assert_eq!(t.fields()[2].hasbit(), None);
        assert!(!t.fields()[2].has_presence());
        assert_eq!(t.required_mask(), 0b10);
    }

    #[test]
    fn oneof_layout() {
        let arena = Arena::default();
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Int32, 1, 0);
        e.put_field(FieldType::String, 2, 0);
        e.put_field(FieldType::Int32, 3, 0);
        e.start_oneof();
        e.put_oneof_field(1);
        e.put_oneof_field(2);
        let t = MiniTable::build(e.as_str(), &arena).unwrap();
        let (a, b, c) = (t.fields()[0], t.fields()[1], t.fields()[2]);
        assert_eq!(a.offset, b.offset);
        assert_eq!(a.oneof_case_offset(), b.oneof_case_offset());
        assert!(a.is_in_oneof());
        assert_eq!(c.hasbit(), Some(1));
        assert_eq!(b.offset % 8, 0);
    }

    #[test]
    fn repeated_and_packed() {
        let arena = Arena::default();
        let desc = message(
            &[
                (FieldType::Int32, 4, field_flags::IS_REPEATED | field_flags::IS_PACKED),
                (FieldType::Int32, 5, field_flags::IS_REPEATED),
                (FieldType::Message, 6, field_flags::IS_REPEATED),
                (FieldType::Enum, 7, field_flags::IS_CLOSED_ENUM),
            ],
            0,
        );
        let t = MiniTable::build(&desc, &arena).unwrap();
        let f = t.fields();
        assert!(f[0].is_array() && f[0].is_packed());
        assert!(f[1].is_array() && !f[1].is_packed());
        assert_eq!(f[2].submsg_index, 0);
        assert_eq!(f[3].submsg_index, 1);
        assert!(f[3].is_closed_enum());
        assert_eq!(t.dense_below, 0);
        assert!(t.sub_message(&f[2]).is_none());
        assert!(MiniTable::is_empty_placeholder(t.sub_message_raw(&f[2])));
    }

    #[test]
    fn map_entry() {
        let arena = Arena::default();
        let mut e = MtDataEncoder::new();
        assert!(e.encode_map(FieldType::String, FieldType::Int32, 0, 0));
        let t = MiniTable::build(e.as_str(), &arena).unwrap();
        assert!(t.is_map_entry());
        assert_eq!(t.fields()[0].offset, MAP_ENTRY_KEY_OFFSET);
        assert_eq!(t.fields()[1].offset, MAP_ENTRY_VALUE_OFFSET);
        assert_eq!(t.size(), MAP_ENTRY_SIZE as usize);

        let mut e = MtDataEncoder::new();
        e.encode_map(FieldType::Double, FieldType::Int32, 0, 0);
        let err = MiniTable::build(e.as_str(), &arena).unwrap_err();
        assert_eq!(err.to_string(), "Error building mini table: map key cannot have type 1");
    }

    #[test]
    fn message_set() {
        let arena = Arena::default();
        let t = MiniTable::build("&", &arena).unwrap();
        assert!(t.is_message_set());
        let err = MiniTable::build("&a", &arena).unwrap_err();
        assert!(err.to_string().ends_with("Invalid message set encode length: 1"));
    }

    #[test]
    fn errors() {
        let arena = Arena::default();
        let cases = [
            ("x", "Invalid message version: x"),
            ("$J", "Invalid char: J"),
            ("$^", "Empty oneof"),
            ("$(^#", "Couldn't add field number 2 to oneof, no such field number."),
        ];
        for (desc, msg) in cases {
            let err = MiniTable::build(desc, &arena).unwrap_err();
            assert_eq!(err.to_string(), format!("Error building mini table: {}", msg), "{desc}");
        }
        // A repeated field cannot be required.
        let desc = format!("$:{}", to_base92(42 + 4) as char);
        let err = MiniTable::build(&desc, &arena).unwrap_err();
        assert!(err.to_string().contains("Invalid modifier(s) for repeated field 1"));
        // Strings are not packable.
        let desc = format!("$E{}", to_base92(43) as char);
        let err = MiniTable::build(&desc, &arena).unwrap_err();
        assert!(err.to_string().contains("Cannot flip packed on unpackable field 1"));
    }

    #[test]
    fn empty_descriptor_is_empty_message() {
        let arena = Arena::default();
        let t = MiniTable::build("", &arena).unwrap();
        assert_eq!(t.size(), 0);
        assert!(t.fields().is_empty());
    }

    #[test]
    fn extensions() {
        let arena = Arena::default();
        let extendee = MiniTable::build("$P", &arena).unwrap();
        assert!(extendee.is_extendable());
        let mut e = MtDataEncoder::new();
        e.encode_extension(FieldType::Int32, 100, 0);
        let ext = MiniTableExtension::build(e.as_str(), extendee, MiniTableSub::Enum(core::ptr::null()), &arena).unwrap();
        assert_eq!(ext.number(), 100);
        assert!(ext.field().is_extension());
        assert_eq!(ext.field().offset, 0);

        let set = MiniTable::build("&", &arena).unwrap();
        let err = MiniTableExtension::build(e.as_str(), set, MiniTableSub::Enum(core::ptr::null()), &arena).unwrap_err();
        assert!(err.to_string().contains("MessageSet extensions must be messages"));
        let err = MiniTableExtension::build("$(", extendee, MiniTableSub::Enum(core::ptr::null()), &arena).unwrap_err();
        assert!(err.to_string().contains("Invalid ext version: $"));
    }
}
