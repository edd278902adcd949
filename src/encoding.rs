//! Binary wire-format serializer.
//!
//! Output is produced back to front: a sub-message is written before its
//! length prefix, so the length is known without a separate sizing pass.
//! Within a message the unknown bytes are written first, then extensions,
//! then fields from the highest index down, which puts known fields first
//! in field order and unknown data last in the final output.

use crate::base::{Extension, Message, MessageValue};
use crate::map_sorter::MapSorter;
use crate::mini_table::{FieldType, MiniTable, MiniTableField};
use crate::status::EncodeStatus;
use crate::wire::{self, MAX_VARINT_LEN, WireType, make_tag};

/// Encoder flags plus the nesting limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions(u32);

impl EncodeOptions {
    /// Map entries sorted by key and extensions by number.
    pub const DETERMINISTIC: u32 = 1;
    /// Leave unknown fields out of the output.
    pub const SKIP_UNKNOWN: u32 = 2;
    /// Fail with `MissingRequired` instead of writing an incomplete message.
    pub const CHECK_REQUIRED: u32 = 4;
    pub const DEFAULT_MAX_DEPTH: u32 = 100;

    pub const fn new() -> Self {
        EncodeOptions(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        EncodeOptions(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn with_deterministic(self) -> Self {
        EncodeOptions(self.0 | Self::DETERMINISTIC)
    }

    pub const fn with_skip_unknown(self) -> Self {
        EncodeOptions(self.0 | Self::SKIP_UNKNOWN)
    }

    pub const fn with_check_required(self) -> Self {
        EncodeOptions(self.0 | Self::CHECK_REQUIRED)
    }

    pub const fn with_max_depth(self, depth: u16) -> Self {
        EncodeOptions((self.0 & 0xffff) | ((depth as u32) << 16))
    }

    pub const fn deterministic(self) -> bool {
        self.0 & Self::DETERMINISTIC != 0
    }

    pub const fn skip_unknown(self) -> bool {
        self.0 & Self::SKIP_UNKNOWN != 0
    }

    pub const fn check_required(self) -> bool {
        self.0 & Self::CHECK_REQUIRED != 0
    }

    pub const fn max_depth(self) -> u32 {
        match self.0 >> 16 {
            0 => Self::DEFAULT_MAX_DEPTH,
            d => d,
        }
    }
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

struct Encoder {
    // Live output is `buf[pos..]`.
    buf: Vec<u8>,
    pos: usize,
    options: EncodeOptions,
    depth: u32,
    sorter: MapSorter,
}

impl Encoder {
    fn new(options: EncodeOptions) -> Self {
        Encoder {
            buf: Vec::new(),
            pos: 0,
            options,
            depth: options.max_depth(),
            sorter: MapSorter::new(),
        }
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[cold]
    fn grow(&mut self, need: usize) -> Result<(), EncodeStatus> {
        let live = self.len();
        let new_size = (self.buf.len() * 2).max(live + need).max(128);
        let mut grown = Vec::new();
        grown
            .try_reserve_exact(new_size)
            .map_err(|_| EncodeStatus::OutOfMemory)?;
        grown.resize(new_size - live, 0);
        grown.extend_from_slice(&self.buf[self.pos..]);
        self.pos = new_size - live;
        self.buf = grown;
        Ok(())
    }

    #[inline(always)]
    fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeStatus> {
        if self.pos < bytes.len() {
            self.grow(bytes.len())?;
        }
        self.pos -= bytes.len();
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    #[inline(always)]
    fn put_varint(&mut self, v: u64) -> Result<(), EncodeStatus> {
        let mut tmp = [0u8; MAX_VARINT_LEN];
        let n = wire::encode_varint(v, &mut tmp);
        self.put_bytes(&tmp[..n])
    }

    #[inline(always)]
    fn put_tag(&mut self, number: u32, wire_type: WireType) -> Result<(), EncodeStatus> {
        self.put_varint(make_tag(number, wire_type) as u64)
    }

    fn put_fixed32(&mut self, v: u32) -> Result<(), EncodeStatus> {
        self.put_bytes(&v.to_le_bytes())
    }

    fn put_fixed64(&mut self, v: u64) -> Result<(), EncodeStatus> {
        self.put_bytes(&v.to_le_bytes())
    }

    fn enter(&mut self) -> Result<(), EncodeStatus> {
        if self.depth == 0 {
            return Err(EncodeStatus::MaxDepthExceeded);
        }
        self.depth -= 1;
        Ok(())
    }

    fn encode_message(&mut self, msg: Message, table: &MiniTable) -> Result<(), EncodeStatus> {
        if self.options.check_required() && table.required_count() != 0 {
            let mask = table.required_mask();
            if msg.hasbit_word(table) & mask != mask {
                return Err(EncodeStatus::MissingRequired);
            }
        }
        if !self.options.skip_unknown() {
            self.put_bytes(unsafe { msg.unknown() })?;
        }
        // Safety: nothing mutates `msg` while it is being encoded.
        let exts = unsafe { msg.extensions() };
        if !exts.is_empty() {
            if self.options.deterministic() {
                let range = self.sorter.push_extensions(exts);
                for i in (0..range.len()).rev() {
                    let rec = self.sorter.extensions(range)[i];
                    self.encode_extension(rec, table.is_message_set())?;
                }
                self.sorter.pop_extensions(range);
            } else {
                // Records are stored newest first; write oldest first so
                // the newest ends up at the front.
                for rec in exts.iter().rev() {
                    self.encode_extension(rec, table.is_message_set())?;
                }
            }
        }
        for field in table.fields().iter().rev() {
            let sub = if field.is_sub_message() {
                Some(table.sub_message_raw(field))
            } else {
                None
            };
            self.encode_field(msg, field, sub, false)?;
        }
        Ok(())
    }

    fn encode_extension(&mut self, rec: &Extension, message_set: bool) -> Result<(), EncodeStatus> {
        let ext = rec.extension();
        let field = ext.field();
        let sub = if field.is_sub_message() {
            Some(ext.sub_message_raw())
        } else {
            None
        };
        if message_set && field.is_sub_message() && !field.is_array() {
            let Some(item) = rec.storage().get_message(field) else {
                return Ok(());
            };
            self.put_tag(1, WireType::EndGroup)?;
            self.encode_delimited(item, sub.unwrap_or(MiniTable::empty()))?;
            self.put_tag(3, WireType::Delimited)?;
            self.put_varint(ext.number() as u64)?;
            self.put_tag(2, WireType::Varint)?;
            return self.put_tag(1, WireType::StartGroup);
        }
        self.encode_field(rec.storage(), field, sub, true)
    }

    /// Writes one field. `always` emits singular values even when they
    /// read as unset, which is how extension records are stored.
    fn encode_field(
        &mut self,
        msg: Message,
        field: &MiniTableField,
        sub: Option<&MiniTable>,
        always: bool,
    ) -> Result<(), EncodeStatus> {
        if field.is_map() {
            return match sub {
                Some(entry) => self.encode_map(msg, field, entry),
                None => Ok(()),
            };
        }
        if field.is_array() {
            return self.encode_array(msg, field, sub);
        }
        if !always && !msg.has_field(field) {
            return Ok(());
        }
        match msg.get_field(field) {
            Some(val) => self.encode_value(field.descriptor_type(), val, field.number(), sub),
            None => Ok(()),
        }
    }

    /// Writes a tagged value.
    fn encode_value(
        &mut self,
        field_type: FieldType,
        val: MessageValue,
        number: u32,
        sub: Option<&MiniTable>,
    ) -> Result<(), EncodeStatus> {
        match (field_type, val) {
            (FieldType::Group, MessageValue::Message(m)) => {
                self.put_tag(number, WireType::EndGroup)?;
                self.enter()?;
                self.encode_message(m, sub.unwrap_or(MiniTable::empty()))?;
                self.depth += 1;
                return self.put_tag(number, WireType::StartGroup);
            }
            (FieldType::Message, MessageValue::Message(m)) => {
                self.encode_delimited(m, sub.unwrap_or(MiniTable::empty()))?;
            }
            (FieldType::String | FieldType::Bytes, MessageValue::String(s)) => {
                self.put_bytes(s.as_bytes())?;
                self.put_varint(s.len() as u64)?;
            }
            _ => self.encode_scalar(field_type, val)?,
        }
        self.put_tag(number, field_type.wire_type())
    }

    /// Writes a sub-message followed by its length prefix.
    fn encode_delimited(&mut self, msg: Message, table: &MiniTable) -> Result<(), EncodeStatus> {
        self.enter()?;
        let before = self.len();
        self.encode_message(msg, table)?;
        self.depth += 1;
        self.put_varint((self.len() - before) as u64)
    }

    /// Writes an untagged numeric value.
    fn encode_scalar(&mut self, field_type: FieldType, val: MessageValue) -> Result<(), EncodeStatus> {
        match (field_type, val) {
            (FieldType::Double, MessageValue::Double(v)) => self.put_fixed64(v.to_bits()),
            (FieldType::Float, MessageValue::Float(v)) => self.put_fixed32(v.to_bits()),
            (FieldType::Fixed64, MessageValue::UInt64(v)) => self.put_fixed64(v),
            (FieldType::SFixed64, MessageValue::Int64(v)) => self.put_fixed64(v as u64),
            (FieldType::Fixed32, MessageValue::UInt32(v)) => self.put_fixed32(v),
            (FieldType::SFixed32, MessageValue::Int32(v)) => self.put_fixed32(v as u32),
            (FieldType::SInt32, MessageValue::Int32(v)) => self.put_varint(wire::zigzag_encode32(v) as u64),
            (FieldType::SInt64, MessageValue::Int64(v)) => self.put_varint(wire::zigzag_encode64(v)),
            // Negative int32 and enum values are sign extended to ten bytes.
            (_, MessageValue::Int32(v)) => self.put_varint(v as i64 as u64),
            (_, MessageValue::Int64(v)) => self.put_varint(v as u64),
            (_, MessageValue::UInt32(v)) => self.put_varint(v as u64),
            (_, MessageValue::UInt64(v)) => self.put_varint(v),
            (_, MessageValue::Bool(v)) => self.put_varint(v as u64),
            _ => Ok(()),
        }
    }

    fn encode_array(&mut self, msg: Message, field: &MiniTableField, sub: Option<&MiniTable>) -> Result<(), EncodeStatus> {
        let Some(array) = (unsafe { msg.get_array(field) }) else {
            return Ok(());
        };
        if array.is_empty() {
            return Ok(());
        }
        let field_type = field.descriptor_type();
        let ctype = field.ctype();
        if field.is_packed() && field_type.is_packable() {
            let before = self.len();
            for i in (0..array.size()).rev() {
                if let Some(val) = array.get(i, ctype) {
                    self.encode_scalar(field_type, val)?;
                }
            }
            self.put_varint((self.len() - before) as u64)?;
            return self.put_tag(field.number(), WireType::Delimited);
        }
        for i in (0..array.size()).rev() {
            if let Some(val) = array.get(i, ctype) {
                self.encode_value(field_type, val, field.number(), sub)?;
            }
        }
        Ok(())
    }

    fn encode_map(&mut self, msg: Message, field: &MiniTableField, entry: &MiniTable) -> Result<(), EncodeStatus> {
        let Some(map) = (unsafe { msg.get_map(field) }) else {
            return Ok(());
        };
        if map.is_empty() {
            return Ok(());
        }
        let [key_field, val_field] = entry.fields() else {
            return Ok(());
        };
        let val_sub = if val_field.is_sub_message() {
            Some(entry.sub_message_raw(val_field))
        } else {
            None
        };
        if self.options.deterministic() {
            let range = self.sorter.push_map(map);
            for i in (0..range.len()).rev() {
                let (key, val) = self.sorter.entries(range)[i];
                self.encode_entry(field.number(), key_field, val_field, key, val, val_sub)?;
            }
            self.sorter.pop_map(range);
        } else {
            for (key, val) in map.iter() {
                self.encode_entry(field.number(), key_field, val_field, key, val, val_sub)?;
            }
        }
        Ok(())
    }

    /// Map entries always carry both key and value, even at their defaults.
    fn encode_entry(
        &mut self,
        number: u32,
        key_field: &MiniTableField,
        val_field: &MiniTableField,
        key: MessageValue,
        val: MessageValue,
        val_sub: Option<&MiniTable>,
    ) -> Result<(), EncodeStatus> {
        self.enter()?;
        let before = self.len();
        self.encode_value(val_field.descriptor_type(), val, 2, val_sub)?;
        self.encode_value(key_field.descriptor_type(), key, 1, None)?;
        self.depth += 1;
        self.put_varint((self.len() - before) as u64)?;
        self.put_tag(number, WireType::Delimited)
    }

    fn finish(mut self) -> Vec<u8> {
        self.buf.drain(..self.pos);
        self.buf
    }
}

/// Serializes `msg` to the binary wire format.
pub fn encode(msg: Message, table: &MiniTable, options: EncodeOptions) -> Result<Vec<u8>, EncodeStatus> {
    tracing::trace!(options = options.bits(), "encode");
    let mut e = Encoder::new(options);
    match e.encode_message(msg, table) {
        Ok(()) => Ok(e.finish()),
        Err(status) => {
            tracing::debug!(%status, "encode failed");
            Err(status)
        }
    }
}

/// Like [`encode`], with the message size prepended as a varint.
pub fn encode_length_prefixed(msg: Message, table: &MiniTable, options: EncodeOptions) -> Result<Vec<u8>, EncodeStatus> {
    let mut e = Encoder::new(options);
    let result = e.encode_message(msg, table).and_then(|()| {
        let len = e.len();
        e.put_varint(len as u64)
    });
    match result {
        Ok(()) => Ok(e.finish()),
        Err(status) => {
            tracing::debug!(%status, "encode failed");
            Err(status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StringView;
    use crate::arena::Arena;
    use crate::decoding::{DecodeOptions, decode};
    use crate::mini_descriptor::{MtDataEncoder, field_flags, message_modifier};
    use crate::mini_table::{MiniTableExtension, MiniTableSub};
    use pretty_assertions::assert_eq;

    fn table<'a>(fields: &[(FieldType, u32, u64)], arena: &'a Arena<'_>) -> &'a mut MiniTable {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        for &(t, n, f) in fields {
            assert!(e.put_field(t, n, f));
        }
        MiniTable::build(e.as_str(), arena).unwrap()
    }

    fn roundtrip(bytes: &[u8], t: &MiniTable, options: EncodeOptions) -> Vec<u8> {
        let arena = Arena::default();
        let msg = Message::new(t, &arena).unwrap();
        decode(bytes, msg, t, None, DecodeOptions::new(), &arena).unwrap();
        encode(msg, t, options).unwrap()
    }

    #[test]
    fn scalars_in_field_order() {
        let arena = Arena::default();
        let t = table(
            &[
                (FieldType::Int32, 1, 0),
                (FieldType::String, 2, 0),
                (FieldType::SInt64, 3, 0),
                (FieldType::Double, 4, 0),
            ],
            &arena,
        );
        let msg = Message::new(t, &arena).unwrap();
        msg.set_i32(t.field(0), 150);
        msg.set_string(t.field(1), StringView::from_str("testing"));
        msg.set_i64(t.field(2), -1);
        msg.set_f64(t.field(3), 1.0);
        let out = encode(msg, t, EncodeOptions::new()).unwrap();
        let mut expected = vec![0x08, 0x96, 0x01, 0x12, 0x07];
        expected.extend_from_slice(b"testing");
        expected.extend_from_slice(&[0x18, 0x01, 0x21, 0, 0, 0, 0, 0, 0, 0xf0, 0x3f]);
        assert_eq!(out, expected);
    }

    #[test]
    fn negative_int32_is_ten_bytes() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Int32, 1, 0)], &arena);
        let msg = Message::new(t, &arena).unwrap();
        msg.set_i32(t.field(0), -1);
        let out = encode(msg, t, EncodeOptions::new()).unwrap();
        assert_eq!(out.len(), 11);
        assert_eq!(&out[1..], &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);
    }

    #[test]
    fn implicit_presence_zero_is_skipped() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Int32, 1, field_flags::IS_PROTO3_SINGULAR)], &arena);
        let msg = Message::new(t, &arena).unwrap();
        msg.set_i32(t.field(0), 0);
        assert!(encode(msg, t, EncodeOptions::new()).unwrap().is_empty());
    }

    #[test]
    fn packed_repeated() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Int32, 4, field_flags::IS_REPEATED | field_flags::IS_PACKED)], &arena);
        let unpacked = [0x20, 0x03, 0x20, 0x8e, 0x02, 0x20, 0x9e, 0xa7, 0x05];
        assert_eq!(
            roundtrip(&unpacked, t, EncodeOptions::new()),
            vec![0x22, 0x06, 0x03, 0x8e, 0x02, 0x9e, 0xa7, 0x05]
        );
    }

    #[test]
    fn unknown_fields_trail_and_can_be_skipped() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Int32, 1, 0)], &arena);
        let input = [0x98, 0x06, 0x05, 0x08, 0x01];
        assert_eq!(roundtrip(&input, t, EncodeOptions::new()), vec![0x08, 0x01, 0x98, 0x06, 0x05]);
        assert_eq!(roundtrip(&input, t, EncodeOptions::new().with_skip_unknown()), vec![0x08, 0x01]);
    }

    #[test]
    fn deterministic_maps_sort_by_key() {
        let arena = Arena::default();
        let mut e = MtDataEncoder::new();
        e.encode_map(FieldType::Int32, FieldType::String, 0, 0);
        let entry = MiniTable::build(e.as_str(), &arena).unwrap() as *const MiniTable;
        let t = table(&[(FieldType::Message, 1, field_flags::IS_REPEATED)], &arena);
        unsafe { t.link(&[entry], &[]).unwrap() };
        let msg = Message::new(t, &arena).unwrap();
        let map = unsafe { msg.get_or_create_map(t, t.field(0), &arena) }.unwrap();
        for k in [3, 1, 2, 0] {
            map.set(MessageValue::Int32(k), MessageValue::String(StringView::from_str("")), &arena);
        }
        let out = encode(msg, t, EncodeOptions::new().with_deterministic()).unwrap();
        let expected: Vec<u8> = (0..4).flat_map(|k| [0x0a, 0x04, 0x08, k, 0x12, 0x00]).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn map_entries_include_default_values() {
        let arena = Arena::default();
        let mut e = MtDataEncoder::new();
        e.encode_map(FieldType::String, FieldType::Int32, 0, 0);
        let entry = MiniTable::build(e.as_str(), &arena).unwrap() as *const MiniTable;
        let t = table(&[(FieldType::Message, 1, field_flags::IS_REPEATED)], &arena);
        unsafe { t.link(&[entry], &[]).unwrap() };
        let msg = Message::new(t, &arena).unwrap();
        let map = unsafe { msg.get_or_create_map(t, t.field(0), &arena) }.unwrap();
        map.set(MessageValue::String(StringView::from_str("")), MessageValue::Int32(0), &arena);
        let out = encode(msg, t, EncodeOptions::new()).unwrap();
        assert_eq!(out, vec![0x0a, 0x04, 0x0a, 0x00, 0x10, 0x00]);
    }

    #[test]
    fn required_and_depth_checks() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Int32, 1, field_flags::IS_REQUIRED), (FieldType::Message, 2, 0)], &arena);
        let self_ptr = &*t as *const MiniTable;
        unsafe { t.link(&[self_ptr], &[]).unwrap() };
        let msg = Message::new(t, &arena).unwrap();
        assert!(encode(msg, t, EncodeOptions::new()).is_ok());
        assert_eq!(
            encode(msg, t, EncodeOptions::new().with_check_required()),
            Err(EncodeStatus::MissingRequired)
        );
        let mut cur = msg;
        for _ in 0..3 {
            cur.set_i32(t.field(0), 1);
            cur = cur.get_or_create_message(t, t.field(1), &arena).unwrap();
        }
        cur.set_i32(t.field(0), 1);
        assert!(encode(msg, t, EncodeOptions::new().with_max_depth(3)).is_ok());
        assert_eq!(
            encode(msg, t, EncodeOptions::new().with_max_depth(2)),
            Err(EncodeStatus::MaxDepthExceeded)
        );
    }

    #[test]
    fn extensions_newest_first_unless_deterministic() {
        let arena = Arena::default();
        let mut e = MtDataEncoder::new();
        e.start_message(message_modifier::IS_EXTENDABLE);
        let t: &MiniTable = MiniTable::build(e.as_str(), &arena).unwrap();
        let ext = |number| {
            let mut e = MtDataEncoder::new();
            e.encode_extension(FieldType::Int32, number, 0);
            MiniTableExtension::build(e.as_str(), t, MiniTableSub::Enum(core::ptr::null()), &arena).unwrap()
        };
        let (a, b) = (ext(1), ext(2));
        let msg = Message::new(t, &arena).unwrap();
        msg.set_extension(a, MessageValue::Int32(5), &arena);
        msg.set_extension(b, MessageValue::Int32(0), &arena);
        assert_eq!(encode(msg, t, EncodeOptions::new()).unwrap(), vec![0x10, 0x00, 0x08, 0x05]);
        assert_eq!(
            encode(msg, t, EncodeOptions::new().with_deterministic()).unwrap(),
            vec![0x08, 0x05, 0x10, 0x00]
        );
    }

    #[test]
    fn length_prefixed() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Bool, 1, 0)], &arena);
        let msg = Message::new(t, &arena).unwrap();
        msg.set_bool(t.field(0), true);
        let out = encode_length_prefixed(msg, t, EncodeOptions::new()).unwrap();
        assert_eq!(out, vec![0x02, 0x08, 0x01]);
        let copy = Message::new(t, &arena).unwrap();
        let used = crate::decoding::decode_length_prefixed(&out, copy, t, None, DecodeOptions::new(), &arena).unwrap();
        assert_eq!(used, 3);
        assert!(copy.get_bool(t.field(0), false));
    }
}
