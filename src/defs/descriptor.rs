//! Owned `descriptor.proto` messages, read and written by this crate's own
//! wire codec.
//!
//! The schema for the descriptor messages is itself a set of mini-tables
//! built from mini-descriptors at run time, so the def layer needs nothing
//! but the core to ingest `FileDescriptorProto` bytes. Only the parts of
//! `descriptor.proto` that the def layer consumes are modelled; everything
//! else is skipped as unknown data.

use crate::StringView;
use crate::arena::Arena;
use crate::base::{Message, MessageValue};
use crate::decoding::{DecodeOptions, decode};
use crate::encoding::{EncodeOptions, encode};
use crate::error::{Error, Result};
use crate::mini_descriptor::{MtDataEncoder, field_flags};
use crate::mini_table::{FieldType, MiniTable, MiniTableField};

const REP: u64 = field_flags::IS_REPEATED;

fn build_table<'a>(fields: &[(FieldType, u32, u64)], arena: &'a Arena<'_>) -> Result<&'a mut MiniTable> {
    let mut e = MtDataEncoder::new();
    e.start_message(0);
    for &(field_type, number, flags) in fields {
        if !e.put_field(field_type, number, flags) {
            return Err(Error::MiniTable(format!("bad bootstrap field {number}")));
        }
    }
    MiniTable::build(e.as_str(), arena)
}

/// Mini-tables for the modelled subset of `descriptor.proto`.
pub(crate) struct Schema<'a> {
    pub(crate) file_set: &'a MiniTable,
    pub(crate) file: &'a MiniTable,
}

impl<'a> Schema<'a> {
    pub(crate) fn new(arena: &'a Arena<'_>) -> Result<Self> {
        use FieldType::{Bool, Int32, Message, String};
        let file_set = build_table(&[(Message, 1, REP)], arena)?;
        let file = build_table(
            &[
                (String, 1, 0),
                (String, 2, 0),
                (String, 3, REP),
                (Message, 4, REP),
                (Message, 5, REP),
                (Message, 6, REP),
                (Message, 7, REP),
                (Int32, 10, REP),
                (Int32, 11, REP),
                (String, 12, 0),
            ],
            arena,
        )?;
        let message = build_table(
            &[
                (String, 1, 0),
                (Message, 2, REP),
                (Message, 3, REP),
                (Message, 4, REP),
                (Message, 5, REP),
                (Message, 6, REP),
                (Message, 7, 0),
                (Message, 8, REP),
                (Message, 9, REP),
                (String, 10, REP),
            ],
            arena,
        )?;
        let range = build_table(&[(Int32, 1, 0), (Int32, 2, 0)], arena)?;
        let field = build_table(
            &[
                (String, 1, 0),
                (String, 2, 0),
                (Int32, 3, 0),
                (Int32, 4, 0),
                (Int32, 5, 0),
                (String, 6, 0),
                (String, 7, 0),
                (Message, 8, 0),
                (Int32, 9, 0),
                (String, 10, 0),
                (Bool, 17, 0),
            ],
            arena,
        )?;
        let oneof = build_table(&[(String, 1, 0)], arena)?;
        let enum_type = build_table(&[(String, 1, 0), (Message, 2, REP), (Message, 4, REP), (String, 5, REP)], arena)?;
        let enum_value = build_table(&[(String, 1, 0), (Int32, 2, 0)], arena)?;
        let service = build_table(&[(String, 1, 0), (Message, 2, REP)], arena)?;
        let method = build_table(
            &[(String, 1, 0), (String, 2, 0), (String, 3, 0), (Bool, 5, 0), (Bool, 6, 0)],
            arena,
        )?;
        let message_options = build_table(&[(Bool, 1, 0), (Bool, 7, 0)], arena)?;
        let field_options = build_table(&[(Bool, 2, 0)], arena)?;

        let p = |t: &MiniTable| t as *const MiniTable;
        let (file_p, message_p, range_p, field_p) = (p(&*file), p(&*message), p(&*range), p(&*field));
        let (enum_p, enum_value_p) = (p(&*enum_type), p(&*enum_value));
        let (service_p, method_p, oneof_p) = (p(&*service), p(&*method), p(&*oneof));
        let (message_options_p, field_options_p) = (p(&*message_options), p(&*field_options));
        // Safety: every table lives in `arena`, which outlives the schema.
        unsafe {
            file_set.link(&[file_p], &[])?;
            file.link(&[message_p, enum_p, service_p, field_p], &[])?;
            message.link(
                &[field_p, message_p, enum_p, range_p, field_p, message_options_p, oneof_p, range_p],
                &[],
            )?;
            field.link(&[field_options_p], &[])?;
            enum_type.link(&[enum_value_p, range_p], &[])?;
            service.link(&[method_p], &[])?;
        }
        Ok(Schema { file_set, file })
    }
}

/// Read access to a decoded descriptor message.
#[derive(Clone, Copy)]
struct Reader<'t> {
    msg: Message,
    table: &'t MiniTable,
}

impl<'t> Reader<'t> {
    fn field(&self, number: u32) -> Option<&'t MiniTableField> {
        self.table.find_field_by_number(number)
    }

    fn has(&self, number: u32) -> bool {
        self.field(number).is_some_and(|f| self.msg.has_field(f))
    }

    fn opt_string(&self, number: u32) -> Result<Option<String>> {
        match self.field(number) {
            Some(f) if self.msg.has_field(f) => {
                let view = self.msg.get_string(f, StringView::empty());
                Ok(Some(view_to_string(view)?))
            }
            _ => Ok(None),
        }
    }

    fn string(&self, number: u32) -> Result<String> {
        Ok(self.opt_string(number)?.unwrap_or_default())
    }

    fn opt_i32(&self, number: u32) -> Option<i32> {
        let f = self.field(number)?;
        self.msg.has_field(f).then(|| self.msg.get_i32(f, 0))
    }

    fn i32(&self, number: u32) -> i32 {
        self.opt_i32(number).unwrap_or(0)
    }

    fn bool(&self, number: u32) -> bool {
        self.field(number).is_some_and(|f| self.msg.get_bool(f, false))
    }

    fn strings(&self, number: u32) -> Result<Vec<String>> {
        // Safety (here and below): the decoded message outlives the reader
        // and nothing writes it while it is read.
        let Some(array) = self.field(number).and_then(|f| unsafe { self.msg.get_array(f) }) else {
            return Ok(Vec::new());
        };
        array.as_slice::<StringView>().iter().map(|v| view_to_string(*v)).collect()
    }

    fn i32s(&self, number: u32) -> Vec<i32> {
        self.field(number)
            .and_then(|f| unsafe { self.msg.get_array(f) })
            .map(|a| a.as_slice::<i32>().to_vec())
            .unwrap_or_default()
    }

    fn message(&self, number: u32) -> Option<Reader<'t>> {
        let f = self.field(number)?;
        let table = self.table.sub_message(f)?;
        let msg = self.msg.get_message(f)?;
        Some(Reader { msg, table })
    }

    fn messages<T: DescriptorMessage>(&self, number: u32) -> Result<Vec<T>> {
        let Some(f) = self.field(number) else {
            return Ok(Vec::new());
        };
        let (Some(table), Some(array)) = (self.table.sub_message(f), unsafe { self.msg.get_array(f) }) else {
            return Ok(Vec::new());
        };
        array
            .iter(f.ctype())
            .filter_map(|v| v.as_message())
            .map(|msg| T::read(Reader { msg, table }))
            .collect()
    }
}

fn view_to_string(view: StringView) -> Result<String> {
    view.to_str()
        .map(str::to_owned)
        .ok_or_else(|| Error::def("descriptor string is not valid UTF-8"))
}

/// Write access to a descriptor message being built for encoding.
struct Writer<'t, 'a, 'b> {
    msg: Message,
    table: &'t MiniTable,
    arena: &'a Arena<'b>,
}

impl<'t, 'a, 'b> Writer<'t, 'a, 'b> {
    fn field(&self, number: u32) -> Result<&'t MiniTableField> {
        self.table
            .find_field_by_number(number)
            .ok_or_else(|| Error::not_found(format!("descriptor field {number}")))
    }

    fn view(&self, s: &str) -> Result<StringView> {
        StringView::copy_in(s.as_bytes(), self.arena).ok_or(Error::OutOfMemory)
    }

    fn string(&self, number: u32, s: &str) -> Result<()> {
        let f = self.field(number)?;
        self.msg.set_string(f, self.view(s)?);
        Ok(())
    }

    fn opt_string(&self, number: u32, s: Option<&str>) -> Result<()> {
        match s {
            Some(s) => self.string(number, s),
            None => Ok(()),
        }
    }

    /// Writes `s` unless it is empty.
    fn nonempty_string(&self, number: u32, s: &str) -> Result<()> {
        if s.is_empty() { Ok(()) } else { self.string(number, s) }
    }

    fn i32(&self, number: u32, v: i32) -> Result<()> {
        self.msg.set_i32(self.field(number)?, v);
        Ok(())
    }

    fn opt_i32(&self, number: u32, v: Option<i32>) -> Result<()> {
        match v {
            Some(v) => self.i32(number, v),
            None => Ok(()),
        }
    }

    fn flag(&self, number: u32, v: bool) -> Result<()> {
        if v {
            self.msg.set_bool(self.field(number)?, true);
        }
        Ok(())
    }

    fn push(&self, number: u32, val: MessageValue) -> Result<()> {
        // Safety: the writer is the only handle to the message it builds.
        let array = unsafe { self.msg.get_or_create_array(self.field(number)?, self.arena) }
            .ok_or(Error::OutOfMemory)?;
        if array.append(val, self.arena) { Ok(()) } else { Err(Error::OutOfMemory) }
    }

    fn strings(&self, number: u32, values: &[String]) -> Result<()> {
        for s in values {
            self.push(number, MessageValue::String(self.view(s)?))?;
        }
        Ok(())
    }

    fn i32s(&self, number: u32, values: &[i32]) -> Result<()> {
        for &v in values {
            self.push(number, MessageValue::Int32(v))?;
        }
        Ok(())
    }

    fn sub_table(&self, f: &MiniTableField) -> Result<&'t MiniTable> {
        self.table
            .sub_message(f)
            .ok_or_else(|| Error::MiniTable("unlinked descriptor table".to_string()))
    }

    fn message(&self, number: u32) -> Result<Writer<'t, 'a, 'b>> {
        let f = self.field(number)?;
        let table = self.sub_table(f)?;
        let msg = self
            .msg
            .get_or_create_message(self.table, f, self.arena)
            .ok_or(Error::OutOfMemory)?;
        Ok(Writer { msg, table, arena: self.arena })
    }

    fn messages<T: DescriptorMessage>(&self, number: u32, values: &[T]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let f = self.field(number)?;
        let table = self.sub_table(f)?;
        for v in values {
            let msg = Message::new(table, self.arena).ok_or(Error::OutOfMemory)?;
            v.write(&Writer { msg, table, arena: self.arena })?;
            self.push(number, MessageValue::Message(msg))?;
        }
        Ok(())
    }
}

trait DescriptorMessage: Sized {
    fn read(r: Reader<'_>) -> Result<Self>;
    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()>;
}

/// `FieldDescriptorProto.Label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum Label {
    #[default]
    Optional = 1,
    Required = 2,
    Repeated = 3,
}

impl Label {
    pub fn from_i32(v: i32) -> Option<Label> {
        match v {
            1 => Some(Label::Optional),
            2 => Some(Label::Required),
            3 => Some(Label::Repeated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileDescriptorSet {
    pub file: Vec<FileDescriptorProto>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileDescriptorProto {
    pub name: String,
    pub package: String,
    pub dependency: Vec<String>,
    pub public_dependency: Vec<i32>,
    pub weak_dependency: Vec<i32>,
    pub message_type: Vec<DescriptorProto>,
    pub enum_type: Vec<EnumDescriptorProto>,
    pub service: Vec<ServiceDescriptorProto>,
    pub extension: Vec<FieldDescriptorProto>,
    /// `"proto2"`, `"proto3"` or empty (proto2).
    pub syntax: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorProto {
    pub name: String,
    pub field: Vec<FieldDescriptorProto>,
    pub extension: Vec<FieldDescriptorProto>,
    pub nested_type: Vec<DescriptorProto>,
    pub enum_type: Vec<EnumDescriptorProto>,
    pub extension_range: Vec<ExtensionRange>,
    pub oneof_decl: Vec<OneofDescriptorProto>,
    pub reserved_range: Vec<ReservedRange>,
    pub reserved_name: Vec<String>,
    pub message_set_wire_format: bool,
    pub map_entry: bool,
}

/// `[start, end)` range of extension numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtensionRange {
    pub start: i32,
    pub end: i32,
}

/// `[start, end)` range of reserved field numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservedRange {
    pub start: i32,
    pub end: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDescriptorProto {
    pub name: String,
    pub number: i32,
    pub label: Label,
    pub r#type: Option<FieldType>,
    pub type_name: String,
    pub extendee: String,
    pub default_value: Option<String>,
    pub oneof_index: Option<i32>,
    pub json_name: Option<String>,
    pub proto3_optional: bool,
    /// `FieldOptions.packed`, when set explicitly.
    pub packed: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OneofDescriptorProto {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumDescriptorProto {
    pub name: String,
    pub value: Vec<EnumValueDescriptorProto>,
    pub reserved_range: Vec<EnumReservedRange>,
    pub reserved_name: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumValueDescriptorProto {
    pub name: String,
    pub number: i32,
}

/// Inclusive `[start, end]` range of reserved enum numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumReservedRange {
    pub start: i32,
    pub end: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDescriptorProto {
    pub name: String,
    pub method: Vec<MethodDescriptorProto>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodDescriptorProto {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

impl DescriptorMessage for FileDescriptorSet {
    fn read(r: Reader<'_>) -> Result<Self> {
        Ok(FileDescriptorSet { file: r.messages(1)? })
    }

    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()> {
        w.messages(1, &self.file)
    }
}

impl DescriptorMessage for FileDescriptorProto {
    fn read(r: Reader<'_>) -> Result<Self> {
        Ok(FileDescriptorProto {
            name: r.string(1)?,
            package: r.string(2)?,
            dependency: r.strings(3)?,
            message_type: r.messages(4)?,
            enum_type: r.messages(5)?,
            service: r.messages(6)?,
            extension: r.messages(7)?,
            public_dependency: r.i32s(10),
            weak_dependency: r.i32s(11),
            syntax: r.string(12)?,
        })
    }

    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()> {
        w.string(1, &self.name)?;
        w.nonempty_string(2, &self.package)?;
        w.strings(3, &self.dependency)?;
        w.messages(4, &self.message_type)?;
        w.messages(5, &self.enum_type)?;
        w.messages(6, &self.service)?;
        w.messages(7, &self.extension)?;
        w.i32s(10, &self.public_dependency)?;
        w.i32s(11, &self.weak_dependency)?;
        w.nonempty_string(12, &self.syntax)
    }
}

impl DescriptorMessage for DescriptorProto {
    fn read(r: Reader<'_>) -> Result<Self> {
        let options = r.message(7);
        Ok(DescriptorProto {
            name: r.string(1)?,
            field: r.messages(2)?,
            nested_type: r.messages(3)?,
            enum_type: r.messages(4)?,
            extension_range: r.messages(5)?,
            extension: r.messages(6)?,
            oneof_decl: r.messages(8)?,
            reserved_range: r.messages(9)?,
            reserved_name: r.strings(10)?,
            message_set_wire_format: options.is_some_and(|o| o.bool(1)),
            map_entry: options.is_some_and(|o| o.bool(7)),
        })
    }

    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()> {
        w.string(1, &self.name)?;
        w.messages(2, &self.field)?;
        w.messages(3, &self.nested_type)?;
        w.messages(4, &self.enum_type)?;
        w.messages(5, &self.extension_range)?;
        w.messages(6, &self.extension)?;
        if self.message_set_wire_format || self.map_entry {
            let options = w.message(7)?;
            options.flag(1, self.message_set_wire_format)?;
            options.flag(7, self.map_entry)?;
        }
        w.messages(8, &self.oneof_decl)?;
        w.messages(9, &self.reserved_range)?;
        w.strings(10, &self.reserved_name)
    }
}

impl DescriptorMessage for ExtensionRange {
    fn read(r: Reader<'_>) -> Result<Self> {
        Ok(ExtensionRange { start: r.i32(1), end: r.i32(2) })
    }

    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()> {
        w.i32(1, self.start)?;
        w.i32(2, self.end)
    }
}

impl DescriptorMessage for ReservedRange {
    fn read(r: Reader<'_>) -> Result<Self> {
        Ok(ReservedRange { start: r.i32(1), end: r.i32(2) })
    }

    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()> {
        w.i32(1, self.start)?;
        w.i32(2, self.end)
    }
}

impl DescriptorMessage for EnumReservedRange {
    fn read(r: Reader<'_>) -> Result<Self> {
        Ok(EnumReservedRange { start: r.i32(1), end: r.i32(2) })
    }

    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()> {
        w.i32(1, self.start)?;
        w.i32(2, self.end)
    }
}

impl DescriptorMessage for FieldDescriptorProto {
    fn read(r: Reader<'_>) -> Result<Self> {
        let label = match r.opt_i32(4) {
            Some(v) => Label::from_i32(v).ok_or_else(|| Error::def(format!("invalid field label {v}")))?,
            None => Label::Optional,
        };
        let r#type = match r.opt_i32(5) {
            Some(v) => Some(
                u8::try_from(v)
                    .ok()
                    .and_then(FieldType::from_u8)
                    .ok_or_else(|| Error::def(format!("invalid field type {v}")))?,
            ),
            None => None,
        };
        let packed = r.message(8).and_then(|o| o.has(2).then(|| o.bool(2)));
        Ok(FieldDescriptorProto {
            name: r.string(1)?,
            extendee: r.string(2)?,
            number: r.i32(3),
            label,
            r#type,
            type_name: r.string(6)?,
            default_value: r.opt_string(7)?,
            oneof_index: r.opt_i32(9),
            json_name: r.opt_string(10)?,
            proto3_optional: r.bool(17),
            packed,
        })
    }

    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()> {
        w.string(1, &self.name)?;
        w.nonempty_string(2, &self.extendee)?;
        w.i32(3, self.number)?;
        w.i32(4, self.label as i32)?;
        w.opt_i32(5, self.r#type.map(|t| t as i32))?;
        w.nonempty_string(6, &self.type_name)?;
        w.opt_string(7, self.default_value.as_deref())?;
        if let Some(packed) = self.packed {
            let options = w.message(8)?;
            options.msg.set_bool(options.field(2)?, packed);
        }
        w.opt_i32(9, self.oneof_index)?;
        w.opt_string(10, self.json_name.as_deref())?;
        w.flag(17, self.proto3_optional)
    }
}

impl DescriptorMessage for OneofDescriptorProto {
    fn read(r: Reader<'_>) -> Result<Self> {
        Ok(OneofDescriptorProto { name: r.string(1)? })
    }

    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()> {
        w.string(1, &self.name)
    }
}

impl DescriptorMessage for EnumDescriptorProto {
    fn read(r: Reader<'_>) -> Result<Self> {
        Ok(EnumDescriptorProto {
            name: r.string(1)?,
            value: r.messages(2)?,
            reserved_range: r.messages(4)?,
            reserved_name: r.strings(5)?,
        })
    }

    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()> {
        w.string(1, &self.name)?;
        w.messages(2, &self.value)?;
        w.messages(4, &self.reserved_range)?;
        w.strings(5, &self.reserved_name)
    }
}

impl DescriptorMessage for EnumValueDescriptorProto {
    fn read(r: Reader<'_>) -> Result<Self> {
        Ok(EnumValueDescriptorProto { name: r.string(1)?, number: r.i32(2) })
    }

    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()> {
        w.string(1, &self.name)?;
        w.i32(2, self.number)
    }
}

impl DescriptorMessage for ServiceDescriptorProto {
    fn read(r: Reader<'_>) -> Result<Self> {
        Ok(ServiceDescriptorProto { name: r.string(1)?, method: r.messages(2)? })
    }

    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()> {
        w.string(1, &self.name)?;
        w.messages(2, &self.method)
    }
}

impl DescriptorMessage for MethodDescriptorProto {
    fn read(r: Reader<'_>) -> Result<Self> {
        Ok(MethodDescriptorProto {
            name: r.string(1)?,
            input_type: r.string(2)?,
            output_type: r.string(3)?,
            client_streaming: r.bool(5),
            server_streaming: r.bool(6),
        })
    }

    fn write(&self, w: &Writer<'_, '_, '_>) -> Result<()> {
        w.string(1, &self.name)?;
        w.string(2, &self.input_type)?;
        w.string(3, &self.output_type)?;
        w.flag(5, self.client_streaming)?;
        w.flag(6, self.server_streaming)
    }
}

fn decode_root<T: DescriptorMessage>(bytes: &[u8], pick: impl Fn(&Schema<'_>) -> *const MiniTable) -> Result<T> {
    let arena = Arena::default();
    let schema = Schema::new(&arena)?;
    // Safety: the table lives in `arena`.
    let table = unsafe { &*pick(&schema) };
    let msg = Message::new(table, &arena).ok_or(Error::OutOfMemory)?;
    decode(bytes, msg, table, None, DecodeOptions::new(), &arena)?;
    T::read(Reader { msg, table })
}

fn encode_root<T: DescriptorMessage>(value: &T, pick: impl Fn(&Schema<'_>) -> *const MiniTable) -> Result<Vec<u8>> {
    let arena = Arena::default();
    let schema = Schema::new(&arena)?;
    let table = unsafe { &*pick(&schema) };
    let msg = Message::new(table, &arena).ok_or(Error::OutOfMemory)?;
    value.write(&Writer { msg, table, arena: &arena })?;
    Ok(encode(msg, table, EncodeOptions::new())?)
}

impl FileDescriptorSet {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode_root(bytes, |s| s.file_set as *const MiniTable)
    }

    pub fn encode_to_vec(&self) -> Result<Vec<u8>> {
        encode_root(self, |s| s.file_set as *const MiniTable)
    }
}

impl FileDescriptorProto {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode_root(bytes, |s| s.file as *const MiniTable)
    }

    pub fn encode_to_vec(&self) -> Result<Vec<u8>> {
        encode_root(self, |s| s.file as *const MiniTable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> FileDescriptorProto {
        FileDescriptorProto {
            name: "shop.proto".into(),
            package: "shop".into(),
            syntax: "proto3".into(),
            message_type: vec![DescriptorProto {
                name: "Order".into(),
                field: vec![
                    FieldDescriptorProto {
                        name: "id".into(),
                        number: 1,
                        r#type: Some(FieldType::Int64),
                        json_name: Some("id".into()),
                        ..Default::default()
                    },
                    FieldDescriptorProto {
                        name: "tags".into(),
                        number: 2,
                        label: Label::Repeated,
                        r#type: Some(FieldType::String),
                        packed: Some(false),
                        ..Default::default()
                    },
                ],
                reserved_range: vec![ReservedRange { start: 5, end: 10 }],
                reserved_name: vec!["old".into()],
                ..Default::default()
            }],
            enum_type: vec![EnumDescriptorProto {
                name: "State".into(),
                value: vec![
                    EnumValueDescriptorProto { name: "NEW".into(), number: 0 },
                    EnumValueDescriptorProto { name: "DONE".into(), number: 1 },
                ],
                ..Default::default()
            }],
            service: vec![ServiceDescriptorProto {
                name: "Shop".into(),
                method: vec![MethodDescriptorProto {
                    name: "Place".into(),
                    input_type: ".shop.Order".into(),
                    output_type: ".shop.Order".into(),
                    server_streaming: true,
                    ..Default::default()
                }],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn file_survives_the_wire() {
        let file = sample();
        let bytes = file.encode_to_vec().unwrap();
        assert_eq!(FileDescriptorProto::decode(&bytes).unwrap(), file);
    }

    #[test]
    fn set_wraps_files() {
        let set = FileDescriptorSet { file: vec![sample(), FileDescriptorProto { name: "empty.proto".into(), ..Default::default() }] };
        let bytes = set.encode_to_vec().unwrap();
        assert_eq!(FileDescriptorSet::decode(&bytes).unwrap(), set);
    }

    #[test]
    fn hand_written_bytes() {
        // name: "a.proto", message_type { name: "M" field { name: "x" number: 1 label: 1 type: 5 } }
        let bytes = [
            0x0a, 0x07, b'a', b'.', b'p', b'r', b'o', b't', b'o', //
            0x22, 0x0e, 0x0a, 0x01, b'M', //
            0x12, 0x09, 0x0a, 0x01, b'x', 0x18, 0x01, 0x20, 0x01, 0x28, 0x05,
        ];
        let file = FileDescriptorProto::decode(&bytes).unwrap();
        assert_eq!(file.name, "a.proto");
        let field = &file.message_type[0].field[0];
        assert_eq!((field.name.as_str(), field.number, field.r#type), ("x", 1, Some(FieldType::Int32)));
        assert_eq!(field.json_name, None);
    }
}
