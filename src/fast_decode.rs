//! Table-driven fast path of the parser.
//!
//! Every field numbered 1 to 15 whose tag fits in one byte can own a slot in
//! its table's fast dispatch array. The slot records the expected tag byte
//! and a specialised parser; the main loop indexes the array with the first
//! byte of each tag and only falls back to the generic path on a mismatch.

use crate::base::Message;
use crate::decoding::Decoder;
use crate::eps_copy::{read_fixed32, read_fixed64, read_varint};
use crate::mini_table::{FieldType, MiniTable, MiniTableField};
use crate::status::DecodeStatus;
use crate::wire::{self, WireType, make_tag};

pub(crate) type FastParseFn = unsafe fn(
    &mut Decoder<'_, '_, '_>,
    *const u8,
    Message,
    &MiniTable,
    &MiniTableField,
) -> Result<*const u8, DecodeStatus>;

const BOOL: u8 = 0;
const I32: u8 = 1;
const U32: u8 = 2;
const S32: u8 = 3;
const I64: u8 = 4;
const U64: u8 = 5;
const S64: u8 = 6;

#[inline(always)]
fn convert<const KIND: u8>(v: u64) -> u64 {
    match KIND {
        BOOL => (v != 0) as u64,
        I32 | U32 => v as u32 as u64,
        S32 => wire::zigzag_decode32(v as u32) as u32 as u64,
        S64 => wire::zigzag_decode64(v) as u64,
        _ => v,
    }
}

/// Writes `size` little-endian bytes of `bits` into a singular field.
#[inline(always)]
fn store_singular(msg: Message, field: &MiniTableField, bits: u64, size: usize) {
    let dst = msg.ptr_at::<u8>(field.offset());
    let bytes = bits.to_le_bytes();
    unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, size) };
    msg.set_presence(field);
}

#[inline(always)]
fn append_raw(d: &mut Decoder<'_, '_, '_>, msg: Message, field: &MiniTableField, bits: u64, size: usize) -> Result<(), DecodeStatus> {
    let array = unsafe { msg.get_or_create_array(field, d.arena) }.ok_or(DecodeStatus::OutOfMemory)?;
    let slot = array.extend_uninit(1, d.arena).ok_or(DecodeStatus::OutOfMemory)?;
    let bytes = bits.to_le_bytes();
    unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), slot, size) };
    Ok(())
}

#[inline(always)]
fn store<const REPEATED: bool>(
    d: &mut Decoder<'_, '_, '_>,
    msg: Message,
    field: &MiniTableField,
    bits: u64,
    size: usize,
) -> Result<(), DecodeStatus> {
    if REPEATED {
        append_raw(d, msg, field, bits, size)
    } else if field.is_in_oneof() {
        // Switching arms clears the previous value, which may be wider.
        let dst = msg.ptr_at::<u8>(field.offset());
        unsafe { core::ptr::write_bytes(dst, 0, field.rep().size()) };
        store_singular(msg, field, bits, size);
        Ok(())
    } else {
        store_singular(msg, field, bits, size);
        Ok(())
    }
}

const fn kind_size(kind: u8) -> usize {
    match kind {
        BOOL => 1,
        I32 | U32 | S32 => 4,
        _ => 8,
    }
}

unsafe fn fast_varint<const KIND: u8, const REPEATED: bool>(
    d: &mut Decoder<'_, '_, '_>,
    ptr: *const u8,
    msg: Message,
    _table: &MiniTable,
    field: &MiniTableField,
) -> Result<*const u8, DecodeStatus> {
    let (v, ptr) = unsafe { read_varint(ptr)? };
    store::<REPEATED>(d, msg, field, convert::<KIND>(v), kind_size(KIND))?;
    Ok(ptr)
}

unsafe fn fast_fixed32<const REPEATED: bool>(
    d: &mut Decoder<'_, '_, '_>,
    ptr: *const u8,
    msg: Message,
    _table: &MiniTable,
    field: &MiniTableField,
) -> Result<*const u8, DecodeStatus> {
    let (v, ptr) = unsafe { read_fixed32(ptr) };
    store::<REPEATED>(d, msg, field, v as u64, 4)?;
    Ok(ptr)
}

unsafe fn fast_fixed64<const REPEATED: bool>(
    d: &mut Decoder<'_, '_, '_>,
    ptr: *const u8,
    msg: Message,
    _table: &MiniTable,
    field: &MiniTableField,
) -> Result<*const u8, DecodeStatus> {
    let (v, ptr) = unsafe { read_fixed64(ptr) };
    store::<REPEATED>(d, msg, field, v, 8)?;
    Ok(ptr)
}

unsafe fn fast_string(
    d: &mut Decoder<'_, '_, '_>,
    ptr: *const u8,
    msg: Message,
    _table: &MiniTable,
    field: &MiniTableField,
) -> Result<*const u8, DecodeStatus> {
    let (view, ptr) = d.read_string(ptr, field)?;
    d.store_scalar(msg, field, crate::base::MessageValue::String(view))?;
    Ok(ptr)
}

unsafe fn fast_message(
    d: &mut Decoder<'_, '_, '_>,
    ptr: *const u8,
    msg: Message,
    table: &MiniTable,
    field: &MiniTableField,
) -> Result<*const u8, DecodeStatus> {
    let sub_table = table.sub_message(field).ok_or(DecodeStatus::UnlinkedSubMessage)?;
    let sub_msg = d.sub_message_for(msg, field, sub_table)?;
    d.decode_sub_message(ptr, sub_msg, sub_table)
}

unsafe fn fast_packed(
    d: &mut Decoder<'_, '_, '_>,
    ptr: *const u8,
    msg: Message,
    _table: &MiniTable,
    field: &MiniTableField,
) -> Result<*const u8, DecodeStatus> {
    d.decode_packed(ptr, msg, msg, field, None)
}

fn varint_parser<const REPEATED: bool>(field_type: FieldType) -> FastParseFn {
    match field_type {
        FieldType::Bool => fast_varint::<BOOL, REPEATED>,
        FieldType::UInt32 => fast_varint::<U32, REPEATED>,
        FieldType::SInt32 => fast_varint::<S32, REPEATED>,
        FieldType::Int64 => fast_varint::<I64, REPEATED>,
        FieldType::UInt64 => fast_varint::<U64, REPEATED>,
        FieldType::SInt64 => fast_varint::<S64, REPEATED>,
        _ => fast_varint::<I32, REPEATED>,
    }
}

/// Picks the first tag byte and parser for `field`, or `None` when the
/// field must go through the generic path.
pub(crate) fn select_parser(table: &MiniTable, field: &MiniTableField) -> Option<(u8, FastParseFn)> {
    let number = field.number();
    if !(1..=15).contains(&number) || field.is_map() || field.is_closed_enum() || field.is_extension() {
        return None;
    }
    let field_type = field.descriptor_type();
    let repeated = field.is_array();
    if repeated && field.is_packed() {
        let tag = make_tag(number, WireType::Delimited) as u8;
        return Some((tag, fast_packed as FastParseFn));
    }
    let tag = make_tag(number, field_type.wire_type()) as u8;
    let parser: FastParseFn = match field_type.wire_type() {
        WireType::Varint if repeated => varint_parser::<true>(field_type),
        WireType::Varint => varint_parser::<false>(field_type),
        WireType::I32 if repeated => fast_fixed32::<true>,
        WireType::I32 => fast_fixed32::<false>,
        WireType::I64 if repeated => fast_fixed64::<true>,
        WireType::I64 => fast_fixed64::<false>,
        WireType::Delimited if field_type == FieldType::Message => {
            table.sub_message(field)?;
            fast_message
        }
        WireType::Delimited => fast_string,
        _ => return None,
    };
    Some((tag, parser))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StringView;
    use crate::arena::Arena;
    use crate::decoding::{DecodeOptions, decode};
    use crate::mini_descriptor::{MtDataEncoder, field_flags};

    #[test]
    fn slots_follow_field_shape() {
        let arena = Arena::default();
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::SInt32, 1, 0);
        e.put_field(FieldType::Double, 2, field_flags::IS_REPEATED);
        e.put_field(FieldType::UInt64, 3, field_flags::IS_REPEATED | field_flags::IS_PACKED);
        e.put_field(FieldType::Message, 4, 0);
        e.put_field(FieldType::Int32, 16, 0);
        let t = MiniTable::build(e.as_str(), &arena).unwrap();
        assert_eq!(select_parser(t, t.field(0)).map(|(tag, _)| tag), Some(0x08));
        assert_eq!(select_parser(t, t.field(1)).map(|(tag, _)| tag), Some(0x11));
        assert_eq!(select_parser(t, t.field(2)).map(|(tag, _)| tag), Some(0x1a));
        // Unlinked sub-messages and large numbers take the generic path.
        assert!(select_parser(t, t.field(3)).is_none());
        assert!(select_parser(t, t.field(4)).is_none());
    }

    #[test]
    fn fast_and_generic_paths_agree() {
        let arena = Arena::default();
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::SInt64, 1, 0);
        e.put_field(FieldType::Fixed32, 2, field_flags::IS_REPEATED);
        e.put_field(FieldType::Bool, 3, 0);
        e.put_field(FieldType::String, 4, 0);
        let t = MiniTable::build(e.as_str(), &arena).unwrap();
        let input = [0x08, 0x03, 0x15, 1, 0, 0, 0, 0x15, 2, 0, 0, 0, 0x18, 0x02, 0x22, 0x01, b'x'];
        let msg = Message::new(t, &arena).unwrap();
        decode(&input, msg, t, None, DecodeOptions::new(), &arena).unwrap();
        assert_eq!(msg.get_i64(t.field(0), 0), -2);
        assert_eq!(unsafe { msg.get_array(t.field(1)) }.unwrap().as_slice::<u32>(), &[1, 2]);
        assert!(msg.get_bool(t.field(2), false));
        assert_eq!(msg.get_string(t.field(3), StringView::empty()), "x");
        assert!(unsafe { msg.unknown() }.is_empty());
    }
}
