//! Binary wire-format parser.
//!
//! The parser walks the input through an [`EpsCopyInputStream`] so that tags
//! and scalar values can be read through raw pointers without per-field
//! bounds checks. Each message is parsed by one call to
//! [`Decoder::decode_message`], which recurses for sub-messages and groups
//! while keeping a hard cap on nesting depth.
//!
//! Fields numbered 1 to 15 are first tried against the table's fast dispatch
//! slots (see [`crate::fast_decode`]); everything else goes through the
//! generic path below.

use crate::StringView;
use crate::arena::Arena;
use crate::base::{Message, MessageValue};
use crate::eps_copy::{Done, EpsCopyInputStream, read_fixed32, read_fixed64, read_tag, read_varint};
use crate::extension_registry::ExtensionRegistry;
use crate::mini_table::{FieldType, MiniTable, MiniTableField, MiniTableSub};
use crate::status::DecodeStatus;
use crate::utils::is_valid_utf8;
use crate::wire::{self, WireType, make_tag};

/// Decoder flags plus the nesting limit.
///
/// Bit 0 aliases string fields into the input, bit 1 requests the required
/// field check and bits 16..32 carry `max_depth` (zero selects the default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions(u32);

impl DecodeOptions {
    pub const ALIAS_STRING: u32 = 1;
    pub const CHECK_REQUIRED: u32 = 2;
    pub const DEFAULT_MAX_DEPTH: u32 = 100;

    pub const fn new() -> Self {
        DecodeOptions(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        DecodeOptions(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// String and bytes fields point into the input instead of being copied.
    /// The input must then outlive the decoded message.
    pub const fn with_alias_string(self) -> Self {
        DecodeOptions(self.0 | Self::ALIAS_STRING)
    }

    pub const fn with_check_required(self) -> Self {
        DecodeOptions(self.0 | Self::CHECK_REQUIRED)
    }

    pub const fn with_max_depth(self, depth: u16) -> Self {
        DecodeOptions((self.0 & 0xffff) | ((depth as u32) << 16))
    }

    pub const fn alias_string(self) -> bool {
        self.0 & Self::ALIAS_STRING != 0
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

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

const NO_GROUP: u32 = u32::MAX;

const MSGSET_ITEM_END: u32 = make_tag(1, WireType::EndGroup);
const MSGSET_TYPE_ID: u32 = make_tag(2, WireType::Varint);
const MSGSET_MESSAGE: u32 = make_tag(3, WireType::Delimited);

pub(crate) struct Decoder<'i, 'a, 'b> {
    pub(crate) stream: EpsCopyInputStream<'i>,
    pub(crate) arena: &'a Arena<'b>,
    extreg: Option<&'a ExtensionRegistry>,
    options: DecodeOptions,
    // Remaining nesting budget.
    depth: u32,
    // Number of the group whose end tag was just read, or `NO_GROUP`.
    end_group: u32,
    missing_required: bool,
}

#[inline(always)]
fn varint_value(field_type: FieldType, v: u64) -> MessageValue {
    match field_type {
        FieldType::Bool => MessageValue::Bool(v != 0),
        FieldType::UInt32 => MessageValue::UInt32(v as u32),
        FieldType::SInt32 => MessageValue::Int32(wire::zigzag_decode32(v as u32)),
        FieldType::Int64 => MessageValue::Int64(v as i64),
        FieldType::UInt64 => MessageValue::UInt64(v),
        FieldType::SInt64 => MessageValue::Int64(wire::zigzag_decode64(v)),
        _ => MessageValue::Int32(v as i32),
    }
}

#[inline(always)]
fn fixed32_value(field_type: FieldType, v: u32) -> MessageValue {
    match field_type {
        FieldType::Float => MessageValue::Float(f32::from_bits(v)),
        FieldType::SFixed32 => MessageValue::Int32(v as i32),
        _ => MessageValue::UInt32(v),
    }
}

#[inline(always)]
fn fixed64_value(field_type: FieldType, v: u64) -> MessageValue {
    match field_type {
        FieldType::Double => MessageValue::Double(f64::from_bits(v)),
        FieldType::SFixed64 => MessageValue::Int64(v as i64),
        _ => MessageValue::UInt64(v),
    }
}

/// The linked sub-message table behind a sub slot.
pub(crate) fn linked_table(sub: Option<MiniTableSub>) -> Result<&'static MiniTable, DecodeStatus> {
    match sub {
        Some(MiniTableSub::Message(t)) if !t.is_null() && !MiniTable::is_empty_placeholder(t) => {
            Ok(unsafe { &*t })
        }
        _ => Err(DecodeStatus::UnlinkedSubMessage),
    }
}

fn enum_accepts(sub: Option<MiniTableSub>, v: u64) -> bool {
    match sub {
        Some(MiniTableSub::Enum(e)) if !e.is_null() => unsafe { (*e).check_value(v as u32) },
        _ => true,
    }
}

#[inline(always)]
fn to_len(len: u64) -> Result<usize, DecodeStatus> {
    if len > i32::MAX as u64 {
        return Err(DecodeStatus::Malformed);
    }
    Ok(len as usize)
}

fn oom<T>(v: Option<T>) -> Result<T, DecodeStatus> {
    v.ok_or(DecodeStatus::OutOfMemory)
}

impl<'i, 'a, 'b> Decoder<'i, 'a, 'b> {
    fn new(
        input: &'i [u8],
        arena: &'a Arena<'b>,
        extreg: Option<&'a ExtensionRegistry>,
        options: DecodeOptions,
        depth: u32,
    ) -> Self {
        Decoder {
            stream: EpsCopyInputStream::new(input),
            arena,
            extreg,
            options,
            depth,
            end_group: NO_GROUP,
            missing_required: false,
        }
    }

    fn run(&mut self, msg: Message, table: &MiniTable) -> Result<(), DecodeStatus> {
        let ptr = self.stream.start();
        self.decode_message(ptr, msg, table)?;
        if self.end_group != NO_GROUP {
            return Err(DecodeStatus::Malformed);
        }
        Ok(())
    }

    /// Parses fields into `msg` until the current limit or an end-group tag.
    pub(crate) fn decode_message(
        &mut self,
        mut ptr: *const u8,
        msg: Message,
        table: &MiniTable,
    ) -> Result<*const u8, DecodeStatus> {
        loop {
            if self.stream.is_done(&mut ptr)? == Done::Yes {
                break;
            }
            if let Some(next) = self.try_fast(ptr, msg, table)? {
                ptr = next;
                continue;
            }
            let field_start = ptr;
            let (tag, next) = unsafe { read_tag(ptr)? };
            ptr = next;
            let number = wire::tag_number(tag);
            if number == 0 {
                return Err(DecodeStatus::Malformed);
            }
            if tag & 7 == WireType::EndGroup as u32 {
                self.end_group = number;
                break;
            }
            ptr = self.decode_tagged(ptr, field_start, tag, msg, table)?;
        }
        self.check_required(msg, table);
        Ok(ptr)
    }

    #[inline(always)]
    fn try_fast(&mut self, ptr: *const u8, msg: Message, table: &MiniTable) -> Result<Option<*const u8>, DecodeStatus> {
        let fast = table.fasttable();
        if fast.is_empty() {
            return Ok(None);
        }
        let byte = unsafe { *ptr };
        let entry = fast[((byte >> 3) as usize) & (fast.len() - 1)];
        match entry.parser {
            Some(parser) if entry.tag == byte => {
                let field = table.field(entry.field_index as usize);
                Ok(Some(unsafe { parser(self, ptr.add(1), msg, table, field)? }))
            }
            _ => Ok(None),
        }
    }

    #[inline]
    fn check_required(&mut self, msg: Message, table: &MiniTable) {
        if !self.options.check_required() || table.required_count() == 0 {
            return;
        }
        let mask = table.required_mask();
        if msg.hasbit_word(table) & mask != mask {
            self.missing_required = true;
        }
    }

    fn decode_tagged(
        &mut self,
        ptr: *const u8,
        field_start: *const u8,
        tag: u32,
        msg: Message,
        table: &MiniTable,
    ) -> Result<*const u8, DecodeStatus> {
        let number = wire::tag_number(tag);
        let wire_type = tag & 7;
        if let Some(field) = table.find_field_by_number(number) {
            let sub = table.subs().get(field.submsg_index as usize).copied();
            return self.decode_field(ptr, field_start, wire_type, msg, msg, field, sub);
        }
        if table.is_message_set() {
            if tag == make_tag(1, WireType::StartGroup) {
                return self.decode_message_set_item(ptr, field_start, msg, table);
            }
        } else if table.is_extendable() {
            let ext = self.extreg.and_then(|r| r.lookup(table, number));
            if let Some(ext) = ext.filter(|e| wire_type_fits(e.field(), wire_type)) {
                let rec = oom(msg.get_or_create_extension(ext, self.arena))?;
                return self.decode_field(ptr, field_start, wire_type, msg, rec.storage(), ext.field(), Some(ext.sub));
            }
        }
        self.skip_unknown(ptr, field_start, number, wire_type, msg)
    }

    /// Parses one known field. `owner` receives unknown data, `base` holds
    /// the field's storage (the owner itself, or an extension slot).
    #[allow(clippy::too_many_arguments)]
    fn decode_field(
        &mut self,
        ptr: *const u8,
        field_start: *const u8,
        wire_type: u32,
        owner: Message,
        base: Message,
        field: &MiniTableField,
        sub: Option<MiniTableSub>,
    ) -> Result<*const u8, DecodeStatus> {
        let field_type = field.descriptor_type();
        let native = field_type.wire_type() as u32;
        match wire_type {
            0 if native == 0 => {
                let (v, next) = unsafe { read_varint(ptr)? };
                if field.is_closed_enum() && !enum_accepts(sub, v) {
                    let start = self.stream.offset_of(field_start);
                    let raw = self.stream.input_range(start, next)?;
                    if !owner.add_unknown(raw, self.arena) {
                        return Err(DecodeStatus::OutOfMemory);
                    }
                    return Ok(next);
                }
                self.store_scalar(base, field, varint_value(field_type, v))?;
                Ok(next)
            }
            5 if native == 5 => {
                let (v, next) = unsafe { read_fixed32(ptr) };
                self.store_scalar(base, field, fixed32_value(field_type, v))?;
                Ok(next)
            }
            1 if native == 1 => {
                let (v, next) = unsafe { read_fixed64(ptr) };
                self.store_scalar(base, field, fixed64_value(field_type, v))?;
                Ok(next)
            }
            2 => match field_type {
                FieldType::String | FieldType::Bytes => {
                    let (view, next) = self.read_string(ptr, field)?;
                    self.store_scalar(base, field, MessageValue::String(view))?;
                    Ok(next)
                }
                FieldType::Message if field.is_map() => self.decode_map_entry(ptr, field_start, owner, base, field, sub),
                FieldType::Message => {
                    let sub_table = linked_table(sub)?;
                    let sub_msg = self.sub_message_for(base, field, sub_table)?;
                    self.decode_sub_message(ptr, sub_msg, sub_table)
                }
                t if field.is_array() && t.is_packable() => self.decode_packed(ptr, owner, base, field, sub),
                _ => self.skip_unknown(ptr, field_start, field.number(), wire_type, owner),
            },
            3 if field_type == FieldType::Group => {
                let sub_table = linked_table(sub)?;
                let sub_msg = self.sub_message_for(base, field, sub_table)?;
                self.decode_group(ptr, sub_msg, sub_table, field.number())
            }
            _ => self.skip_unknown(ptr, field_start, field.number(), wire_type, owner),
        }
    }

    /// Writes a singular value or appends a repeated one.
    #[inline(always)]
    pub(crate) fn store_scalar(&mut self, base: Message, field: &MiniTableField, val: MessageValue) -> Result<(), DecodeStatus> {
        if field.is_array() {
            let array = oom(unsafe { base.get_or_create_array(field, self.arena) })?;
            if !array.append(val, self.arena) {
                return Err(DecodeStatus::OutOfMemory);
            }
        } else {
            base.set_field(field, val);
        }
        Ok(())
    }

    /// The message a sub-message field parses into: a fresh element for
    /// repeated fields, the existing (or a new) message otherwise.
    #[inline]
    pub(crate) fn sub_message_for(
        &mut self,
        base: Message,
        field: &MiniTableField,
        sub_table: &MiniTable,
    ) -> Result<Message, DecodeStatus> {
        if field.is_array() {
            let sub_msg = oom(Message::new(sub_table, self.arena))?;
            let array = oom(unsafe { base.get_or_create_array(field, self.arena) })?;
            if !array.append(MessageValue::Message(sub_msg), self.arena) {
                return Err(DecodeStatus::OutOfMemory);
            }
            Ok(sub_msg)
        } else {
            oom(base.get_or_create_message_with(field, sub_table, self.arena))
        }
    }

    /// Reads a length-delimited string or bytes value.
    #[inline]
    pub(crate) fn read_string(&mut self, ptr: *const u8, field: &MiniTableField) -> Result<(StringView, *const u8), DecodeStatus> {
        let (len, ptr) = unsafe { read_varint(ptr)? };
        let len = to_len(len)?;
        if !self.stream.check_size(ptr, len) {
            return Err(DecodeStatus::Malformed);
        }
        let bytes = self.stream.input_slice(ptr, len)?;
        if field.validates_utf8() && !is_valid_utf8(bytes) {
            return Err(DecodeStatus::BadUtf8);
        }
        let view = if self.options.alias_string() {
            StringView::from_bytes(bytes)
        } else {
            oom(StringView::copy_in(bytes, self.arena))?
        };
        Ok((view, unsafe { ptr.add(len) }))
    }

    fn enter(&mut self) -> Result<(), DecodeStatus> {
        if self.depth == 0 {
            return Err(DecodeStatus::MaxDepthExceeded);
        }
        self.depth -= 1;
        Ok(())
    }

    /// Parses a length-prefixed sub-message at `ptr` into `sub_msg`.
    pub(crate) fn decode_sub_message(
        &mut self,
        ptr: *const u8,
        sub_msg: Message,
        sub_table: &MiniTable,
    ) -> Result<*const u8, DecodeStatus> {
        let (len, ptr) = unsafe { read_varint(ptr)? };
        let delta = self.stream.push_limit(ptr, to_len(len)?)?;
        self.enter()?;
        let ptr = self.decode_message(ptr, sub_msg, sub_table)?;
        if self.end_group != NO_GROUP {
            return Err(DecodeStatus::Malformed);
        }
        self.depth += 1;
        self.stream.pop_limit(delta);
        Ok(ptr)
    }

    fn decode_group(
        &mut self,
        ptr: *const u8,
        sub_msg: Message,
        sub_table: &MiniTable,
        number: u32,
    ) -> Result<*const u8, DecodeStatus> {
        self.enter()?;
        let ptr = self.decode_message(ptr, sub_msg, sub_table)?;
        if self.end_group != number {
            tracing::debug!(number, end_group = self.end_group, "group end mismatch");
            return Err(DecodeStatus::Malformed);
        }
        self.end_group = NO_GROUP;
        self.depth += 1;
        Ok(ptr)
    }

    /// Parses a packed run of scalars.
    pub(crate) fn decode_packed(
        &mut self,
        ptr: *const u8,
        owner: Message,
        base: Message,
        field: &MiniTableField,
        sub: Option<MiniTableSub>,
    ) -> Result<*const u8, DecodeStatus> {
        let (len, ptr) = unsafe { read_varint(ptr)? };
        let len = to_len(len)?;
        if !self.stream.check_size(ptr, len) {
            return Err(DecodeStatus::Malformed);
        }
        let bytes = self.stream.input_slice(ptr, len)?;
        let field_type = field.descriptor_type();
        let array = oom(unsafe { base.get_or_create_array(field, self.arena) })?;
        match field_type.wire_type() {
            WireType::I32 => {
                if len % 4 != 0 {
                    return Err(DecodeStatus::Malformed);
                }
                if !array.reserve(array.size() + len / 4, self.arena) {
                    return Err(DecodeStatus::OutOfMemory);
                }
                for chunk in bytes.chunks_exact(4) {
                    let v = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    array.append(fixed32_value(field_type, v), self.arena);
                }
            }
            WireType::I64 => {
                if len % 8 != 0 {
                    return Err(DecodeStatus::Malformed);
                }
                if !array.reserve(array.size() + len / 8, self.arena) {
                    return Err(DecodeStatus::OutOfMemory);
                }
                for chunk in bytes.chunks_exact(8) {
                    let mut le = [0u8; 8];
                    le.copy_from_slice(chunk);
                    array.append(fixed64_value(field_type, u64::from_le_bytes(le)), self.arena);
                }
            }
            _ => {
                let mut rest = bytes;
                while !rest.is_empty() {
                    let (v, n) = wire::read_varint(rest).ok_or(DecodeStatus::Malformed)?;
                    rest = &rest[n..];
                    if field.is_closed_enum() && !enum_accepts(sub, v) {
                        let mut unknown = Vec::with_capacity(wire::MAX_VARINT_LEN * 2);
                        wire::push_varint(&mut unknown, make_tag(field.number(), WireType::Varint) as u64);
                        wire::push_varint(&mut unknown, v);
                        if !owner.add_unknown(&unknown, self.arena) {
                            return Err(DecodeStatus::OutOfMemory);
                        }
                        continue;
                    }
                    if !array.append(varint_value(field_type, v), self.arena) {
                        return Err(DecodeStatus::OutOfMemory);
                    }
                }
            }
        }
        Ok(unsafe { ptr.add(len) })
    }

    fn decode_map_entry(
        &mut self,
        ptr: *const u8,
        field_start: *const u8,
        owner: Message,
        base: Message,
        field: &MiniTableField,
        sub: Option<MiniTableSub>,
    ) -> Result<*const u8, DecodeStatus> {
        let entry_table = linked_table(sub)?;
        let [key_field, val_field] = entry_table.fields() else {
            return Err(DecodeStatus::Malformed);
        };
        // Safety: `base` lives in `self.arena` and the map is not aliased
        // while the entry is parsed.
        let map = match unsafe { base.get_mutable_map(field) } {
            Some(map) => map,
            None => {
                let map = oom(Message::new_map_for_entry(entry_table, self.arena))?;
                base.set(field.offset(), map);
                unsafe { &mut *map }
            }
        };
        let entry = oom(Message::new(entry_table, self.arena))?;
        if val_field.is_sub_message() {
            // An entry without a value still maps to an empty message.
            let val_table = linked_table(entry_table.subs().get(val_field.submsg_index as usize).copied())?;
            let val = oom(Message::new(val_table, self.arena))?;
            entry.set(val_field.offset(), val.as_ptr());
        }
        let start = self.stream.offset_of(field_start);
        let ptr = self.decode_sub_message(ptr, entry, entry_table)?;
        if val_field.is_closed_enum() && entry.has_unknown() {
            // The value was rejected by the enum; keep the whole entry.
            let raw = self.stream.input_range(start, ptr)?;
            if !owner.add_unknown(raw, self.arena) {
                return Err(DecodeStatus::OutOfMemory);
            }
            return Ok(ptr);
        }
        let (Some(key), Some(val)) = (entry.get_field(key_field), entry.get_field(val_field)) else {
            return Err(DecodeStatus::Malformed);
        };
        if map.set(key, val, self.arena) == crate::map::MapInsertStatus::OutOfMemory {
            return Err(DecodeStatus::OutOfMemory);
        }
        Ok(ptr)
    }

    /// Parses `{1: group {2: type_id, 3: message}}`. Items whose type id has
    /// no registered extension are kept as unknown fields.
    fn decode_message_set_item(
        &mut self,
        mut ptr: *const u8,
        field_start: *const u8,
        msg: Message,
        table: &MiniTable,
    ) -> Result<*const u8, DecodeStatus> {
        let start = self.stream.offset_of(field_start);
        let mut type_id = 0u32;
        let mut pending: Option<&'i [u8]> = None;
        let mut seen_message = false;
        let mut handled = false;
        self.enter()?;
        loop {
            if self.stream.is_done(&mut ptr)? == Done::Yes {
                return Err(DecodeStatus::Malformed);
            }
            let (tag, next) = unsafe { read_tag(ptr)? };
            ptr = next;
            match tag {
                MSGSET_ITEM_END => break,
                MSGSET_TYPE_ID => {
                    let (v, next) = unsafe { read_varint(ptr)? };
                    ptr = next;
                    if type_id == 0 {
                        type_id = v as u32;
                        if let Some(payload) = pending.take() {
                            handled = self.decode_message_set_payload(msg, table, type_id, payload)?;
                        }
                    }
                }
                MSGSET_MESSAGE => {
                    let (len, next) = unsafe { read_varint(ptr)? };
                    let len = to_len(len)?;
                    if !self.stream.check_size(next, len) {
                        return Err(DecodeStatus::Malformed);
                    }
                    let payload = self.stream.input_slice(next, len)?;
                    ptr = unsafe { next.add(len) };
                    if seen_message {
                        continue;
                    }
                    seen_message = true;
                    if type_id != 0 {
                        handled = self.decode_message_set_payload(msg, table, type_id, payload)?;
                    } else {
                        pending = Some(payload);
                    }
                }
                other => {
                    let number = wire::tag_number(other);
                    if number == 0 || other & 7 == WireType::EndGroup as u32 {
                        return Err(DecodeStatus::Malformed);
                    }
                    ptr = self.skip_value(ptr, number, other & 7)?;
                }
            }
        }
        self.depth += 1;
        if !handled {
            let raw = self.stream.input_range(start, ptr)?;
            if !msg.add_unknown(raw, self.arena) {
                return Err(DecodeStatus::OutOfMemory);
            }
        }
        Ok(ptr)
    }

    fn decode_message_set_payload(
        &mut self,
        msg: Message,
        table: &MiniTable,
        type_id: u32,
        payload: &[u8],
    ) -> Result<bool, DecodeStatus> {
        let Some(ext) = self.extreg.and_then(|r| r.lookup(table, type_id)) else {
            return Ok(false);
        };
        let sub_table = ext.sub_message().ok_or(DecodeStatus::UnlinkedSubMessage)?;
        let rec = oom(msg.get_or_create_extension(ext, self.arena))?;
        let sub_msg = oom(rec.storage().get_or_create_message_with(ext.field(), sub_table, self.arena))?;
        self.decode_nested(payload, sub_msg, sub_table)?;
        Ok(true)
    }

    /// Parses a complete sub-message held in a separate slice.
    fn decode_nested(&mut self, payload: &[u8], msg: Message, table: &MiniTable) -> Result<(), DecodeStatus> {
        self.enter()?;
        let mut inner = Decoder::new(payload, self.arena, self.extreg, self.options, self.depth);
        inner.run(msg, table)?;
        self.missing_required |= inner.missing_required;
        self.depth += 1;
        Ok(())
    }

    /// Skips the value of an unrecognized field and keeps its bytes.
    fn skip_unknown(
        &mut self,
        ptr: *const u8,
        field_start: *const u8,
        number: u32,
        wire_type: u32,
        owner: Message,
    ) -> Result<*const u8, DecodeStatus> {
        let start = self.stream.offset_of(field_start);
        let ptr = self.skip_value(ptr, number, wire_type)?;
        let raw = self.stream.input_range(start, ptr)?;
        if !owner.add_unknown(raw, self.arena) {
            return Err(DecodeStatus::OutOfMemory);
        }
        Ok(ptr)
    }

    fn skip_value(&mut self, ptr: *const u8, number: u32, wire_type: u32) -> Result<*const u8, DecodeStatus> {
        match WireType::from_tag(wire_type) {
            Some(WireType::Varint) => Ok(unsafe { read_varint(ptr)?.1 }),
            Some(WireType::I64) => Ok(unsafe { ptr.add(8) }),
            Some(WireType::I32) => Ok(unsafe { ptr.add(4) }),
            Some(WireType::Delimited) => {
                let (len, ptr) = unsafe { read_varint(ptr)? };
                let len = to_len(len)?;
                if !self.stream.check_size(ptr, len) {
                    return Err(DecodeStatus::Malformed);
                }
                Ok(unsafe { ptr.add(len) })
            }
            Some(WireType::StartGroup) => self.skip_group(ptr, number),
            Some(WireType::EndGroup) | None => Err(DecodeStatus::Malformed),
        }
    }

    fn skip_group(&mut self, mut ptr: *const u8, number: u32) -> Result<*const u8, DecodeStatus> {
        self.enter()?;
        loop {
            if self.stream.is_done(&mut ptr)? == Done::Yes {
                return Err(DecodeStatus::Malformed);
            }
            let (tag, next) = unsafe { read_tag(ptr)? };
            ptr = next;
            let inner = wire::tag_number(tag);
            if inner == 0 {
                return Err(DecodeStatus::Malformed);
            }
            if tag & 7 == WireType::EndGroup as u32 {
                if inner != number {
                    return Err(DecodeStatus::Malformed);
                }
                break;
            }
            ptr = self.skip_value(ptr, inner, tag & 7)?;
        }
        self.depth += 1;
        Ok(ptr)
    }
}

fn wire_type_fits(field: &MiniTableField, wire_type: u32) -> bool {
    let field_type = field.descriptor_type();
    let native = field_type.wire_type() as u32;
    wire_type == native || (wire_type == WireType::Delimited as u32 && field.is_array() && field_type.is_packable())
}

/// Parses `buf` into `msg`, merging with whatever `msg` already holds.
///
/// On error the message may be partially populated. With
/// [`DecodeOptions::CHECK_REQUIRED`] a missing required field is reported
/// as [`DecodeStatus::MissingRequired`] after the whole input was parsed.
pub fn decode(
    buf: &[u8],
    msg: Message,
    table: &MiniTable,
    extreg: Option<&ExtensionRegistry>,
    options: DecodeOptions,
    arena: &Arena<'_>,
) -> Result<(), DecodeStatus> {
    tracing::trace!(len = buf.len(), "decode");
    let mut d = Decoder::new(buf, arena, extreg, options, options.max_depth());
    let result = d.run(msg, table).and_then(|()| {
        if d.missing_required {
            Err(DecodeStatus::MissingRequired)
        } else {
            Ok(())
        }
    });
    if let Err(status) = result {
        tracing::debug!(%status, "decode failed");
    }
    result
}

/// Parses a varint length followed by that many bytes of message; returns
/// the number of bytes consumed.
pub fn decode_length_prefixed(
    buf: &[u8],
    msg: Message,
    table: &MiniTable,
    extreg: Option<&ExtensionRegistry>,
    options: DecodeOptions,
    arena: &Arena<'_>,
) -> Result<usize, DecodeStatus> {
    let (len, n) = wire::read_varint(buf).ok_or(DecodeStatus::Malformed)?;
    let len = to_len(len)?;
    let body = buf.get(n..n + len).ok_or(DecodeStatus::Malformed)?;
    decode(body, msg, table, extreg, options, arena)?;
    Ok(n + len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_descriptor::{MtDataEncoder, field_flags, message_modifier};
    use crate::mini_table::{MiniTableEnum, MiniTableExtension};
    use pretty_assertions::assert_eq;

    fn table<'a>(fields: &[(FieldType, u32, u64)], arena: &'a Arena<'_>) -> &'a mut MiniTable {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        for &(t, n, f) in fields {
            assert!(e.put_field(t, n, f));
        }
        MiniTable::build(e.as_str(), arena).unwrap()
    }

    fn parse(bytes: &[u8], t: &MiniTable, arena: &Arena<'_>) -> Result<Message, DecodeStatus> {
        let msg = Message::new(t, arena).unwrap();
        decode(bytes, msg, t, None, DecodeOptions::new(), arena).map(|()| msg)
    }

    #[test]
    fn varint_field() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Int32, 1, 0)], &arena);
        let msg = parse(&[0x08, 0x96, 0x01], t, &arena).unwrap();
        assert_eq!(msg.get_i32(t.field(0), 0), 150);
        assert!(msg.has_field(t.field(0)));
    }

    #[test]
    fn string_and_utf8() {
        let arena = Arena::default();
        let t = table(&[(FieldType::String, 2, field_flags::VALIDATE_UTF8)], &arena);
        let msg = parse(b"\x12\x07testing", t, &arena).unwrap();
        assert_eq!(msg.get_string(t.field(0), StringView::empty()), "testing");
        assert_eq!(parse(&[0x12, 0x02, 0xc3, 0x28], t, &arena).err(), Some(DecodeStatus::BadUtf8));
        let bytes = table(&[(FieldType::Bytes, 2, 0)], &arena);
        assert!(parse(&[0x12, 0x02, 0xc3, 0x28], bytes, &arena).is_ok());
    }

    #[test]
    fn packed_and_unpacked_both_accepted() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Int32, 4, field_flags::IS_REPEATED | field_flags::IS_PACKED)], &arena);
        let msg = parse(&[0x22, 0x06, 0x03, 0x8e, 0x02, 0x9e, 0xa7, 0x05], t, &arena).unwrap();
        assert_eq!(unsafe { msg.get_array(t.field(0)) }.unwrap().as_slice::<i32>(), &[3, 270, 86942]);
        let msg = parse(&[0x20, 0x03, 0x20, 0x8e, 0x02], t, &arena).unwrap();
        assert_eq!(unsafe { msg.get_array(t.field(0)) }.unwrap().as_slice::<i32>(), &[3, 270]);
    }

    #[test]
    fn unknown_fields_are_kept_in_order() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Int32, 1, 0)], &arena);
        let input = [0x98, 0x06, 0x05, 0x08, 0x01, 0x9a, 0x06, 0x02, 0x61, 0x62, 0xf8, 0x01, 0x01];
        let msg = parse(&input, t, &arena).unwrap();
        assert_eq!(unsafe { msg.unknown() }, &[0x98, 0x06, 0x05, 0x9a, 0x06, 0x02, 0x61, 0x62, 0xf8, 0x01, 0x01]);
        assert_eq!(msg.get_i32(t.field(0), 0), 1);
    }

    #[test]
    fn wire_type_mismatch_goes_to_unknown() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Int32, 1, 0)], &arena);
        let msg = parse(&[0x0d, 1, 2, 3, 4], t, &arena).unwrap();
        assert!(!msg.has_field(t.field(0)));
        assert_eq!(unsafe { msg.unknown() }, &[0x0d, 1, 2, 3, 4]);
    }

    #[test]
    fn malformed_inputs() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Int32, 1, 0)], &arena);
        // Group 3 closed by an end tag for 4.
        assert_eq!(parse(&[0x1b, 0x08, 0x01, 0x24], t, &arena).err(), Some(DecodeStatus::Malformed));
        // Stray end group at top level.
        assert_eq!(parse(&[0x0c], t, &arena).err(), Some(DecodeStatus::Malformed));
        // Field number zero.
        assert_eq!(parse(&[0x00, 0x01], t, &arena).err(), Some(DecodeStatus::Malformed));
        // Truncated varint and length.
        assert_eq!(parse(&[0x08, 0x80], t, &arena).err(), Some(DecodeStatus::Malformed));
        assert_eq!(parse(&[0x12, 0x05, 0x61], t, &arena).err(), Some(DecodeStatus::Malformed));
        // Wire type 6.
        assert_eq!(parse(&[0x0e], t, &arena).err(), Some(DecodeStatus::Malformed));
        // A properly closed unknown group is fine.
        assert!(parse(&[0x1b, 0x08, 0x01, 0x1c], t, &arena).is_ok());
    }

    #[test]
    fn required_fields() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Int32, 1, field_flags::IS_REQUIRED), (FieldType::Int32, 2, 0)], &arena);
        let opts = DecodeOptions::new().with_check_required();
        let msg = Message::new(t, &arena).unwrap();
        assert_eq!(decode(&[0x10, 0x01], msg, t, None, opts, &arena), Err(DecodeStatus::MissingRequired));
        // The parse still completed.
        assert_eq!(msg.get_i32(t.field(1), 0), 1);
        let msg = Message::new(t, &arena).unwrap();
        assert_eq!(decode(&[0x08, 0x01], msg, t, None, opts, &arena), Ok(()));
        let msg = Message::new(t, &arena).unwrap();
        assert_eq!(decode(&[0x10, 0x01], msg, t, None, DecodeOptions::new(), &arena), Ok(()));
    }

    fn nested(depth: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for _ in 0..depth {
            let mut outer = vec![0x0a];
            wire::push_varint(&mut outer, bytes.len() as u64);
            outer.extend_from_slice(&bytes);
            bytes = outer;
        }
        bytes
    }

    #[test]
    fn max_depth() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Message, 1, 0)], &arena);
        let self_ptr = &*t as *const MiniTable;
        unsafe { t.link(&[self_ptr], &[]).unwrap() };
        for limit in [1u16, 5, 20] {
            let opts = DecodeOptions::new().with_max_depth(limit);
            let msg = Message::new(t, &arena).unwrap();
            assert_eq!(decode(&nested(limit as usize), msg, t, None, opts, &arena), Ok(()));
            let msg = Message::new(t, &arena).unwrap();
            assert_eq!(
                decode(&nested(limit as usize + 1), msg, t, None, opts, &arena),
                Err(DecodeStatus::MaxDepthExceeded)
            );
        }
    }

    #[test]
    fn unlinked_sub_message() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Message, 1, 0)], &arena);
        assert_eq!(parse(&[0x0a, 0x00], t, &arena).err(), Some(DecodeStatus::UnlinkedSubMessage));
    }

    #[test]
    fn closed_enum_values_out_of_range_become_unknown() {
        let arena = Arena::default();
        let t = table(
            &[
                (FieldType::Enum, 1, field_flags::IS_CLOSED_ENUM),
                (FieldType::Enum, 2, field_flags::IS_CLOSED_ENUM | field_flags::IS_REPEATED),
            ],
            &arena,
        );
        let mut e = MtDataEncoder::new();
        e.start_enum();
        e.put_enum_value(0);
        e.put_enum_value(1);
        e.end_enum();
        let en = MiniTableEnum::build(e.as_str(), &arena).unwrap() as *const MiniTableEnum;
        unsafe { t.link(&[], &[en, en]).unwrap() };
        let msg = parse(&[0x08, 0x05, 0x12, 0x03, 0x01, 0x07, 0x00], t, &arena).unwrap();
        assert!(!msg.has_field(t.field(0)));
        assert_eq!(unsafe { msg.get_array(t.field(1)) }.unwrap().as_slice::<i32>(), &[1, 0]);
        assert_eq!(unsafe { msg.unknown() }, &[0x08, 0x05, 0x10, 0x07]);
    }

    #[test]
    fn maps_and_groups() {
        let arena = Arena::default();
        let mut e = MtDataEncoder::new();
        e.encode_map(FieldType::String, FieldType::Int32, 0, 0);
        let entry = MiniTable::build(e.as_str(), &arena).unwrap() as *const MiniTable;
        let t = table(&[(FieldType::Message, 1, field_flags::IS_REPEATED), (FieldType::Group, 3, 0)], &arena);
        let inner = table(&[(FieldType::Int32, 1, 0)], &arena) as *const MiniTable;
        unsafe { t.link(&[entry, inner], &[]).unwrap() };
        let input = [0x0a, 0x07, 0x0a, 0x03, b'o', b'n', b'e', 0x10, 0x01, 0x1b, 0x08, 0x07, 0x1c];
        let msg = parse(&input, t, &arena).unwrap();
        let map = unsafe { msg.get_map(t.field(0)) }.unwrap();
        assert_eq!(map.get(MessageValue::String(StringView::from_str("one"))), Some(MessageValue::Int32(1)));
        let group = msg.get_message(t.field(1)).unwrap();
        assert_eq!(group.get_i32(unsafe { (*inner).field(0) }, 0), 7);
    }

    #[test]
    fn aliasing_points_into_input() {
        let arena = Arena::default();
        let t = table(&[(FieldType::Bytes, 1, 0)], &arena);
        let input = b"\x0a\x03abc".to_vec();
        let msg = Message::new(t, &arena).unwrap();
        decode(&input, msg, t, None, DecodeOptions::new().with_alias_string(), &arena).unwrap();
        assert_eq!(msg.get_string(t.field(0), StringView::empty()).data(), input[2..].as_ptr());
    }

    #[test]
    fn extensions_and_message_set() {
        let arena = Arena::default();
        let mut e = MtDataEncoder::new();
        e.start_message(message_modifier::IS_EXTENDABLE);
        e.put_field(FieldType::Int32, 1, 0);
        let t = MiniTable::build(e.as_str(), &arena).unwrap();
        let mut e = MtDataEncoder::new();
        e.encode_extension(FieldType::SInt64, 100, 0);
        let ext = MiniTableExtension::build(e.as_str(), t, MiniTableSub::Enum(core::ptr::null()), &arena).unwrap();
        let mut reg = ExtensionRegistry::new(&arena).unwrap();
        reg.add(ext, &arena).unwrap();
        let msg = Message::new(t, &arena).unwrap();
        decode(&[0xa0, 0x06, 0x03, 0xa8, 0x06, 0x01], msg, t, Some(&reg), DecodeOptions::new(), &arena).unwrap();
        assert_eq!(msg.get_extension(ext), Some(MessageValue::Int64(-2)));
        assert_eq!(unsafe { msg.unknown() }, &[0xa8, 0x06, 0x01]);

        let mut e = MtDataEncoder::new();
        e.encode_message_set();
        let set = MiniTable::build(e.as_str(), &arena).unwrap();
        let payload = table(&[(FieldType::Int32, 1, 0)], &arena);
        let mut e = MtDataEncoder::new();
        e.encode_extension(FieldType::Message, 12345, 0);
        let item = MiniTableExtension::build(e.as_str(), set, MiniTableSub::Message(&*payload), &arena).unwrap();
        let mut reg = ExtensionRegistry::new(&arena).unwrap();
        reg.add(item, &arena).unwrap();
        // Message before type id, plus an item for an unregistered type id.
        let input = [
            0x0b, 0x1a, 0x02, 0x08, 0x2a, 0x10, 0xb9, 0x60, 0x0c, //
            0x0b, 0x10, 0x01, 0x1a, 0x00, 0x0c,
        ];
        let msg = Message::new(set, &arena).unwrap();
        decode(&input, msg, set, Some(&reg), DecodeOptions::new(), &arena).unwrap();
        let sub = msg.get_or_create_extension_message(item, &arena).unwrap();
        assert_eq!(sub.get_i32(payload.field(0), 0), 42);
        assert_eq!(unsafe { msg.unknown() }, &input[9..]);
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(proptest::num::u8::ANY, 0..256)) {
            let arena = Arena::default();
            let t = table(
                &[
                    (FieldType::Int32, 1, 0),
                    (FieldType::String, 2, field_flags::VALIDATE_UTF8),
                    (FieldType::Message, 3, 0),
                    (FieldType::Fixed64, 4, field_flags::IS_REPEATED),
                ],
                &arena,
            );
            let self_ptr = &*t as *const MiniTable;
            unsafe { t.link(&[self_ptr], &[]).unwrap() };
            let msg = Message::new(t, &arena).unwrap();
            let _ = decode(&bytes, msg, t, None, DecodeOptions::new(), &arena);
        }
    }
}
