//! Schema definitions built from `FileDescriptorProto`s.
//!
//! A [`DefPool`] owns every def and mini-table it creates. Defs are small
//! `Copy` handles borrowing the pool; their mini-tables stay valid for as
//! long as the pool lives.

mod builder;
pub mod descriptor;
mod enum_def;
mod field;
mod file;
mod message;
mod oneof;
mod service;

use tracing::{info, warn};

pub use descriptor::{
    DescriptorProto, EnumDescriptorProto, EnumReservedRange, EnumValueDescriptorProto, ExtensionRange,
    FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet, Label, MethodDescriptorProto, OneofDescriptorProto,
    ReservedRange, ServiceDescriptorProto,
};
pub use enum_def::{EnumDef, EnumValueDef};
pub use field::{FieldDef, to_json_name};
pub use file::{FileDef, Syntax};
pub use message::{MessageDef, WellKnownType};
pub use oneof::OneofDef;
pub use service::{MethodDef, ServiceDef};

use crate::arena::{Arena, Checkpoint};
use crate::error::{Error, Result};
use crate::extension_registry::ExtensionRegistry;
use crate::hash::StrTable;
use crate::mini_table::MiniTableExtension;
use crate::status::Status;

/// What a fully-qualified name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Symbol {
    Message(usize),
    Enum(usize),
    EnumValue(usize),
    Extension(usize),
    Service(usize),
}

impl Symbol {
    fn pack(self) -> u64 {
        let (kind, index) = match self {
            Symbol::Message(i) => (0, i),
            Symbol::Enum(i) => (1, i),
            Symbol::EnumValue(i) => (2, i),
            Symbol::Extension(i) => (3, i),
            Symbol::Service(i) => (4, i),
        };
        (index as u64) << 3 | kind
    }

    fn unpack(v: u64) -> Option<Symbol> {
        let index = (v >> 3) as usize;
        Some(match v & 7 {
            0 => Symbol::Message(index),
            1 => Symbol::Enum(index),
            2 => Symbol::EnumValue(index),
            3 => Symbol::Extension(index),
            4 => Symbol::Service(index),
            _ => return None,
        })
    }
}

/// Sizes of the pool before a file build, for backing it out.
struct Marks {
    files: usize,
    messages: usize,
    fields: usize,
    oneofs: usize,
    enums: usize,
    enum_values: usize,
    services: usize,
    methods: usize,
    checkpoint: Checkpoint,
}

/// A set of files and every def they declare.
///
/// Files are added one at a time and must come after their dependencies.
/// Adding a file is all-or-nothing: a file that fails validation leaves no
/// trace in the pool.
pub struct DefPool {
    /// Mini-tables and default values; rolled back when a file fails.
    pub(crate) arena: Arena<'static>,
    /// Symbol tables and the extension registry; never rolled back.
    pub(crate) sym_arena: Arena<'static>,
    pub(crate) extreg: ExtensionRegistry,
    symbols: StrTable,
    file_names: StrTable,
    pub(crate) files: Vec<file::FileData>,
    pub(crate) messages: Vec<message::MessageData>,
    pub(crate) fields: Vec<field::FieldData>,
    pub(crate) oneofs: Vec<oneof::OneofData>,
    pub(crate) enums: Vec<enum_def::EnumData>,
    pub(crate) enum_values: Vec<enum_def::EnumValueData>,
    pub(crate) services: Vec<service::ServiceData>,
    pub(crate) methods: Vec<service::MethodData>,
}

impl DefPool {
    pub fn new() -> Result<Self> {
        let arena = Arena::default();
        let sym_arena = Arena::default();
        let extreg = ExtensionRegistry::new(&sym_arena).ok_or(Error::OutOfMemory)?;
        let symbols = StrTable::new(32, &sym_arena).ok_or(Error::OutOfMemory)?;
        let file_names = StrTable::new(8, &sym_arena).ok_or(Error::OutOfMemory)?;
        Ok(DefPool {
            arena,
            sym_arena,
            extreg,
            symbols,
            file_names,
            files: Vec::new(),
            messages: Vec::new(),
            fields: Vec::new(),
            oneofs: Vec::new(),
            enums: Vec::new(),
            enum_values: Vec::new(),
            services: Vec::new(),
            methods: Vec::new(),
        })
    }

    pub(crate) fn lookup_symbol(&self, name: &str) -> Option<Symbol> {
        self.symbols.lookup(name.as_bytes()).and_then(Symbol::unpack)
    }

    pub(crate) fn insert_symbol(&mut self, name: &str, sym: Symbol) -> Result<()> {
        self.symbols
            .insert(name.as_bytes(), sym.pack(), &self.sym_arena)
            .ok_or(Error::OutOfMemory)
    }

    pub(crate) fn file_index(&self, name: &str) -> Option<usize> {
        self.file_names.lookup(name.as_bytes()).map(|v| v as usize)
    }

    pub(crate) fn insert_file_name(&mut self, name: &str, index: usize) -> Result<()> {
        self.file_names
            .insert(name.as_bytes(), index as u64, &self.sym_arena)
            .ok_or(Error::OutOfMemory)
    }

    fn marks(&self) -> Marks {
        Marks {
            files: self.files.len(),
            messages: self.messages.len(),
            fields: self.fields.len(),
            oneofs: self.oneofs.len(),
            enums: self.enums.len(),
            enum_values: self.enum_values.len(),
            services: self.services.len(),
            methods: self.methods.len(),
            checkpoint: self.arena.checkpoint(),
        }
    }

    fn back_out(&mut self, marks: Marks, added: &[String]) {
        for name in added {
            self.symbols.remove(name.as_bytes());
        }
        if let Some(name) = self.files.get(marks.files).map(|f| f.name.clone()) {
            if self.file_index(&name) == Some(marks.files) {
                self.file_names.remove(name.as_bytes());
            }
        }
        self.files.truncate(marks.files);
        self.messages.truncate(marks.messages);
        self.fields.truncate(marks.fields);
        self.oneofs.truncate(marks.oneofs);
        self.enums.truncate(marks.enums);
        self.enum_values.truncate(marks.enum_values);
        self.services.truncate(marks.services);
        self.methods.truncate(marks.methods);
        if !self.arena.rollback(marks.checkpoint) {
            warn!("pool arena could not be rolled back");
        }
    }

    /// Validates `proto` and adds everything it declares.
    ///
    /// Every dependency must already be in the pool. On error the pool is
    /// left exactly as it was.
    pub fn add_file(&mut self, proto: &FileDescriptorProto) -> Result<FileDef<'_>> {
        let marks = self.marks();
        let mut added = Vec::new();
        match builder::build(self, proto, &mut added) {
            Ok(index) => {
                info!(
                    file = %proto.name,
                    messages = self.files[index].messages.len(),
                    "added file to pool"
                );
                Ok(FileDef { pool: self, index })
            }
            Err(err) => {
                warn!(file = %proto.name, error = %err, "backing out file");
                self.back_out(marks, &added);
                Err(err)
            }
        }
    }

    /// [`add_file`](Self::add_file), reporting failure through a [`Status`].
    pub fn add_file_with_status(&mut self, proto: &FileDescriptorProto, status: &mut Status) -> Option<FileDef<'_>> {
        match self.add_file(proto) {
            Ok(file) => Some(file),
            Err(err) => {
                err.to_status(status);
                None
            }
        }
    }

    /// Decodes a serialized `FileDescriptorProto` and adds it.
    pub fn add_serialized_file(&mut self, bytes: &[u8]) -> Result<FileDef<'_>> {
        let proto = FileDescriptorProto::decode(bytes)?;
        self.add_file(&proto)
    }

    /// Adds every file of a set in order. Files whose name is already in the
    /// pool are skipped.
    pub fn add_file_set(&mut self, set: &FileDescriptorSet) -> Result<()> {
        for proto in &set.file {
            if self.file_index(&proto.name).is_none() {
                self.add_file(proto)?;
            }
        }
        Ok(())
    }

    pub fn add_serialized_file_set(&mut self, bytes: &[u8]) -> Result<()> {
        self.add_file_set(&FileDescriptorSet::decode(bytes)?)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn files(&self) -> impl ExactSizeIterator<Item = FileDef<'_>> + '_ {
        (0..self.files.len()).map(move |index| FileDef { pool: self, index })
    }

    pub fn find_file_by_name(&self, name: &str) -> Option<FileDef<'_>> {
        let index = self.file_index(name)?;
        Some(FileDef { pool: self, index })
    }

    pub fn find_message_by_name(&self, name: &str) -> Option<MessageDef<'_>> {
        match self.lookup_symbol(name)? {
            Symbol::Message(index) => Some(MessageDef { pool: self, index }),
            _ => None,
        }
    }

    pub fn find_enum_by_name(&self, name: &str) -> Option<EnumDef<'_>> {
        match self.lookup_symbol(name)? {
            Symbol::Enum(index) => Some(EnumDef { pool: self, index }),
            _ => None,
        }
    }

    /// Looks up an enum value by its full name, which is scoped like its
    /// enum's siblings (`pkg.VALUE`, not `pkg.Enum.VALUE`).
    pub fn find_enum_value_by_name(&self, name: &str) -> Option<EnumValueDef<'_>> {
        match self.lookup_symbol(name)? {
            Symbol::EnumValue(index) => Some(EnumValueDef { pool: self, index }),
            _ => None,
        }
    }

    pub fn find_extension_by_name(&self, name: &str) -> Option<FieldDef<'_>> {
        match self.lookup_symbol(name)? {
            Symbol::Extension(index) => Some(FieldDef { pool: self, index }),
            _ => None,
        }
    }

    pub fn find_extension_by_number(&self, extendee: MessageDef<'_>, number: u32) -> Option<FieldDef<'_>> {
        let index = self
            .fields
            .iter()
            .position(|f| f.is_extension && f.number == number && f.message == Some(extendee.index))?;
        Some(FieldDef { pool: self, index })
    }

    /// The extension def whose layout is `ext`, as found on a decoded message.
    pub(crate) fn field_for_extension(&self, ext: *const MiniTableExtension) -> Option<FieldDef<'_>> {
        let index = self
            .fields
            .iter()
            .position(|f| f.is_extension && core::ptr::eq(f.extension, ext))?;
        Some(FieldDef { pool: self, index })
    }

    pub fn find_service_by_name(&self, name: &str) -> Option<ServiceDef<'_>> {
        match self.lookup_symbol(name)? {
            Symbol::Service(index) => Some(ServiceDef { pool: self, index }),
            _ => None,
        }
    }

    /// Every extension added to the pool, for decoding messages that carry
    /// them.
    pub fn extension_registry(&self) -> &ExtensionRegistry {
        &self.extreg
    }
}

impl core::fmt::Debug for DefPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DefPool")
            .field("files", &self.files.iter().map(|f| &f.name).collect::<Vec<_>>())
            .field("messages", &self.messages.len())
            .field("extensions", &self.extreg.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{Message, MessageValue};
    use crate::decoding::{DecodeOptions, decode};
    use crate::mini_table::FieldType;

    fn field(name: &str, number: i32, label: Label, ty: FieldType) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: name.to_string(),
            number,
            label,
            r#type: Some(ty),
            ..Default::default()
        }
    }

    fn typed(name: &str, number: i32, label: Label, ty: FieldType, type_name: &str) -> FieldDescriptorProto {
        FieldDescriptorProto {
            type_name: type_name.to_string(),
            ..field(name, number, label, ty)
        }
    }

    fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
        DescriptorProto {
            name: name.to_string(),
            field: fields,
            ..Default::default()
        }
    }

    fn enumeration(name: &str, values: &[(&str, i32)]) -> EnumDescriptorProto {
        EnumDescriptorProto {
            name: name.to_string(),
            value: values
                .iter()
                .map(|&(name, number)| EnumValueDescriptorProto {
                    name: name.to_string(),
                    number,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn file(name: &str, syntax: &str, messages: Vec<DescriptorProto>) -> FileDescriptorProto {
        FileDescriptorProto {
            name: name.to_string(),
            package: "pkg".to_string(),
            syntax: syntax.to_string(),
            message_type: messages,
            ..Default::default()
        }
    }

    fn person_file() -> FileDescriptorProto {
        let mut kind = typed("kind", 4, Label::Optional, FieldType::Enum, ".pkg.Kind");
        kind.default_value = Some("WORK".to_string());
        let mut f = file(
            "person.proto",
            "proto2",
            vec![message(
                "Person",
                vec![
                    field("name", 1, Label::Optional, FieldType::String),
                    field("id", 2, Label::Required, FieldType::Int32),
                    field("email_address", 3, Label::Repeated, FieldType::String),
                    kind,
                    typed("friends", 5, Label::Repeated, FieldType::Message, "Person"),
                ],
            )],
        );
        f.enum_type.push(enumeration("Kind", &[("HOME", 0), ("WORK", 1)]));
        f
    }

    #[test]
    fn field_lookup_with_sparse_numbers() {
        let mut fields: Vec<_> = (1..=40)
            .map(|n| field(&format!("f_{n}"), n, Label::Optional, FieldType::Int32))
            .collect();
        fields.push(field("far", 100_000, Label::Optional, FieldType::Int64));
        fields.push(field("last", 536_870_911, Label::Repeated, FieldType::UInt32));
        let mut pool = DefPool::new().unwrap();
        pool.add_file(&file("sparse.proto", "proto3", vec![message("Sparse", fields)])).unwrap();

        let m = pool.find_message_by_name("pkg.Sparse").unwrap();
        assert_eq!(m.field_count(), 42);
        for n in 1..=40u32 {
            let f = m.find_field_by_number(n).unwrap();
            assert_eq!(f.name(), format!("f_{n}"));
            assert_eq!(m.find_field_by_name(f.name()), Some(f));
            assert_eq!(m.find_field_by_json_name(f.json_name()), Some(f));
        }
        assert_eq!(m.find_field_by_number(100_000).unwrap().name(), "far");
        assert_eq!(m.find_field_by_number(536_870_911).unwrap().name(), "last");
        assert!(m.find_field_by_number(0).is_none());
        assert!(m.find_field_by_number(41).is_none());
        assert!(m.find_field_by_name("f_41").is_none());
        assert_eq!(m.find_field_by_json_name("f41").map(|f| f.number()), None);
        assert_eq!(m.find_field_by_json_name("f1").map(|f| f.number()), Some(1));
    }

    #[test]
    fn builds_messages_fields_and_enums() {
        let mut pool = DefPool::new().unwrap();
        pool.add_file(&person_file()).unwrap();

        let file = pool.find_file_by_name("person.proto").unwrap();
        assert_eq!(file.package(), "pkg");
        assert_eq!(file.syntax(), Syntax::Proto2);

        let person = pool.find_message_by_name("pkg.Person").unwrap();
        assert_eq!(person.field_count(), 5);
        assert_eq!(person.file(), file);
        let id = person.find_field_by_number(2).unwrap();
        assert_eq!(id.full_name(), "pkg.Person.id");
        assert!(id.is_required());
        assert!(id.has_presence());

        let email = person.find_field_by_name("email_address").unwrap();
        assert_eq!(email.json_name(), "emailAddress");
        assert_eq!(person.find_field_by_json_name("emailAddress"), Some(email));
        assert!(email.is_repeated());
        assert!(!email.is_packed());

        let kind = person.find_field_by_name("kind").unwrap();
        let kind_enum = kind.enum_type().unwrap();
        assert_eq!(kind_enum.full_name(), "pkg.Kind");
        assert!(kind_enum.is_closed());
        assert!(kind.is_closed_enum());
        assert_eq!(kind.default_value(), Some(MessageValue::Int32(1)));
        assert_eq!(pool.find_enum_value_by_name("pkg.WORK").unwrap().number(), 1);
        assert!(pool.find_enum_value_by_name("pkg.Kind.WORK").is_none());

        let friends = person.find_field_by_number(5).unwrap();
        assert_eq!(friends.message_type(), Some(person));

        let table = person.mini_table();
        assert_eq!(table.fields().len(), 5);
        assert_eq!(table.required_count(), 1);
        assert!(core::ptr::eq(
            table.sub_message(friends.mini_table_field()).unwrap(),
            table
        ));
        assert!(table.sub_enum(kind.mini_table_field()).is_some());
    }

    #[test]
    fn built_tables_decode() {
        let mut pool = DefPool::new().unwrap();
        pool.add_file(&person_file()).unwrap();
        let person = pool.find_message_by_name("pkg.Person").unwrap();
        let table = person.mini_table();
        let arena = Arena::default();
        let msg = Message::new(table, &arena).unwrap();
        let bytes = [0x0a, 0x03, b'b', b'o', b'b', 0x10, 0x07, 0x2a, 0x02, 0x10, 0x08];
        decode(&bytes, msg, table, None, DecodeOptions::new().with_check_required(), &arena).unwrap();
        let name = person.find_field_by_name("name").unwrap();
        let id = person.find_field_by_name("id").unwrap();
        assert_eq!(msg.get_string(name.mini_table_field(), crate::StringView::empty()), "bob");
        assert_eq!(msg.get_i32(id.mini_table_field(), 0), 7);
        let friends = unsafe { msg.get_array(person.find_field_by_number(5).unwrap().mini_table_field()) }.unwrap();
        assert_eq!(friends.size(), 1);
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let mut pool = DefPool::new().unwrap();
        let mut f = file("a.proto", "proto2", vec![message("A", vec![])]);
        f.dependency.push("other.proto".to_string());
        let err = pool.add_file(&f).unwrap_err();
        assert_eq!(err.to_string(), "Depends on file not in pool: other.proto");
        assert_eq!(pool.file_count(), 0);
        assert!(pool.find_message_by_name("pkg.A").is_none());
    }

    #[test]
    fn failed_file_is_backed_out() {
        let mut pool = DefPool::new().unwrap();
        pool.add_file(&file("a.proto", "proto2", vec![message("A", vec![])])).unwrap();

        let bad = file("b.proto", "proto2", vec![message("B", vec![]), message("A", vec![])]);
        let mut status = Status::new();
        assert!(pool.add_file_with_status(&bad, &mut status).is_none());
        assert_eq!(status.error_message(), "duplicate symbol 'pkg.A'");
        assert!(pool.find_message_by_name("pkg.B").is_none());
        assert!(pool.find_file_by_name("b.proto").is_none());
        assert_eq!(pool.file_count(), 1);

        let good = file("b.proto", "proto2", vec![message("B", vec![])]);
        pool.add_file(&good).unwrap();
        assert!(pool.find_message_by_name("pkg.B").is_some());
        assert!(pool.add_file(&good).is_err());
    }

    #[test]
    fn dependencies_resolve_across_files() {
        let mut pool = DefPool::new().unwrap();
        pool.add_file(&file("a.proto", "proto2", vec![message("A", vec![])])).unwrap();
        let mut b = file(
            "b.proto",
            "proto2",
            vec![message("B", vec![typed("a", 1, Label::Optional, FieldType::Message, "A")])],
        );
        b.dependency.push("a.proto".to_string());
        let file_b = pool.add_file(&b).unwrap();
        assert_eq!(file_b.dependencies().next().unwrap().name(), "a.proto");
        let a_field = pool.find_message_by_name("pkg.B").unwrap().field(0).unwrap();
        assert_eq!(a_field.message_type().unwrap().full_name(), "pkg.A");
    }

    #[test]
    fn forward_references_and_cycles_link() {
        let mut pool = DefPool::new().unwrap();
        let mut b = typed("b", 1, Label::Optional, FieldType::Message, "B");
        b.r#type = None;
        let f = file(
            "cycle.proto",
            "proto3",
            vec![
                message("A", vec![b]),
                message("B", vec![typed("a", 1, Label::Optional, FieldType::Message, ".pkg.A")]),
            ],
        );
        pool.add_file(&f).unwrap();
        let a = pool.find_message_by_name("pkg.A").unwrap();
        let b = pool.find_message_by_name("pkg.B").unwrap();
        let a_b = a.field(0).unwrap();
        assert_eq!(a_b.field_type(), FieldType::Message);
        assert!(core::ptr::eq(
            a.mini_table().sub_message(a_b.mini_table_field()).unwrap(),
            b.mini_table()
        ));
        let b_a = b.field(0).unwrap();
        assert!(core::ptr::eq(
            b.mini_table().sub_message(b_a.mini_table_field()).unwrap(),
            a.mini_table()
        ));
    }

    #[test]
    fn proto3_rules() {
        let mut pool = DefPool::new().unwrap();
        let required = file(
            "r.proto",
            "proto3",
            vec![message("M", vec![field("x", 1, Label::Required, FieldType::Int32)])],
        );
        assert!(pool.add_file(&required).unwrap_err().to_string().contains("cannot be required"));

        let mut bad_enum = file("e.proto", "proto3", vec![]);
        bad_enum.enum_type.push(enumeration("E", &[("ONE", 1)]));
        assert!(pool.add_file(&bad_enum).unwrap_err().to_string().contains("must be zero"));

        let mut with_default = field("x", 1, Label::Optional, FieldType::Int32);
        with_default.default_value = Some("3".to_string());
        let f = file("d.proto", "proto3", vec![message("M", vec![with_default])]);
        assert!(pool.add_file(&f).unwrap_err().to_string().contains("explicit defaults"));

        let mut closed = file("closed.proto", "proto2", vec![]);
        closed.enum_type.push(enumeration("Closed", &[("A", 0)]));
        pool.add_file(&closed).unwrap();
        let mut uses = file(
            "uses.proto",
            "proto3",
            vec![message("M", vec![typed("c", 1, Label::Optional, FieldType::Enum, ".pkg.Closed")])],
        );
        uses.dependency.push("closed.proto".to_string());
        assert!(pool.add_file(&uses).unwrap_err().to_string().contains("not a proto3 enum"));
        assert_eq!(pool.file_count(), 1);
    }

    #[test]
    fn proto3_presence_and_packing() {
        let mut pool = DefPool::new().unwrap();
        let mut opt = field("opt", 2, Label::Optional, FieldType::Int32);
        opt.proto3_optional = true;
        opt.oneof_index = Some(0);
        let mut m = message(
            "M",
            vec![
                field("plain", 1, Label::Optional, FieldType::Int32),
                opt,
                field("nums", 3, Label::Repeated, FieldType::Int32),
                field("s", 4, Label::Optional, FieldType::String),
            ],
        );
        m.oneof_decl.push(OneofDescriptorProto { name: "_opt".to_string() });
        pool.add_file(&file("p3.proto", "proto3", vec![m])).unwrap();

        let m = pool.find_message_by_name("pkg.M").unwrap();
        let plain = m.find_field_by_name("plain").unwrap();
        assert!(!plain.has_presence());
        assert!(!plain.mini_table_field().has_presence());
        let opt = m.find_field_by_name("opt").unwrap();
        assert!(opt.has_presence());
        assert!(opt.containing_oneof().unwrap().is_synthetic());
        assert!(opt.real_containing_oneof().is_none());
        assert_eq!(m.real_oneofs().count(), 0);
        assert!(m.find_field_by_name("nums").unwrap().is_packed());
        assert!(m.find_field_by_name("nums").unwrap().mini_table_field().is_packed());
        assert!(m.find_field_by_name("s").unwrap().mini_table_field().validates_utf8());
    }

    #[test]
    fn maps_are_validated() {
        let entry = |name: &str| DescriptorProto {
            name: name.to_string(),
            field: vec![
                field("key", 1, Label::Optional, FieldType::String),
                field("value", 2, Label::Optional, FieldType::Int32),
            ],
            map_entry: true,
            ..Default::default()
        };
        let mut pool = DefPool::new().unwrap();
        let mut m = message(
            "M",
            vec![typed("counts", 1, Label::Repeated, FieldType::Message, "CountsEntry")],
        );
        m.nested_type.push(entry("CountsEntry"));
        pool.add_file(&file("map.proto", "proto3", vec![m])).unwrap();
        let m = pool.find_message_by_name("pkg.M").unwrap();
        let counts = m.find_field_by_name("counts").unwrap();
        assert!(counts.is_map());
        assert!(counts.mini_table_field().is_map());
        let entry_def = counts.message_type().unwrap();
        assert_eq!(entry_def.map_key().unwrap().field_type(), FieldType::String);
        assert_eq!(entry_def.map_value().unwrap().field_type(), FieldType::Int32);

        let mut bad = message(
            "N",
            vec![typed("counts", 1, Label::Repeated, FieldType::Message, "WrongEntry")],
        );
        bad.nested_type.push(entry("WrongEntry"));
        assert!(pool.add_file(&file("bad.proto", "proto3", vec![bad])).is_err());

        let mut bad_key = entry("CountsEntry");
        bad_key.field[0].r#type = Some(FieldType::Double);
        let mut n = message(
            "N",
            vec![typed("counts", 1, Label::Repeated, FieldType::Message, "CountsEntry")],
        );
        n.nested_type.push(bad_key);
        assert!(pool.add_file(&file("bad_key.proto", "proto3", vec![n])).is_err());
        assert_eq!(pool.file_count(), 1);
    }

    #[test]
    fn extensions_are_registered() {
        let mut pool = DefPool::new().unwrap();
        let mut base = message("Base", vec![]);
        base.extension_range.push(ExtensionRange { start: 100, end: 200 });
        let mut f = file("ext.proto", "proto2", vec![base]);
        let mut ext = field("tag", 150, Label::Optional, FieldType::Int32);
        ext.extendee = ".pkg.Base".to_string();
        f.extension.push(ext);
        pool.add_file(&f).unwrap();

        let base = pool.find_message_by_name("pkg.Base").unwrap();
        assert!(base.is_extendable());
        assert!(base.mini_table().is_extendable());
        let tag = pool.find_extension_by_name("pkg.tag").unwrap();
        assert!(tag.is_extension());
        assert_eq!(tag.containing_type(), Some(base));
        assert!(tag.extension_scope().is_none());
        assert_eq!(pool.find_extension_by_number(base, 150), Some(tag));
        let found = pool.extension_registry().lookup(base.mini_table(), 150).unwrap();
        assert!(core::ptr::eq(found, tag.mini_extension().unwrap()));

        let mut out_of_range = file("ext2.proto", "proto2", vec![]);
        out_of_range.dependency.push("ext.proto".to_string());
        let mut ext = field("far", 300, Label::Optional, FieldType::Int32);
        ext.extendee = "Base".to_string();
        out_of_range.extension.push(ext);
        let err = pool.add_file(&out_of_range).unwrap_err();
        assert!(err.to_string().contains("not in an extension range"));

        let mut duplicate = file("ext3.proto", "proto2", vec![]);
        duplicate.dependency.push("ext.proto".to_string());
        let mut ext = field("again", 150, Label::Optional, FieldType::Int32);
        ext.extendee = "Base".to_string();
        duplicate.extension.push(ext);
        assert!(pool.add_file(&duplicate).is_err());
        assert!(pool.find_extension_by_name("pkg.again").is_none());
        assert_eq!(pool.extension_registry().len(), 1);
    }

    #[test]
    fn defaults_are_parsed() {
        let with_default = |name: &str, number: i32, ty: FieldType, raw: &str| FieldDescriptorProto {
            default_value: Some(raw.to_string()),
            ..field(name, number, Label::Optional, ty)
        };
        let mut pool = DefPool::new().unwrap();
        let f = file(
            "defaults.proto",
            "proto2",
            vec![message(
                "D",
                vec![
                    with_default("hex", 1, FieldType::Int32, "0x10"),
                    with_default("text", 2, FieldType::String, "hi"),
                    with_default("raw", 3, FieldType::Bytes, r"\001z"),
                    with_default("big", 4, FieldType::Double, "-inf"),
                    field("none", 5, Label::Optional, FieldType::UInt64),
                ],
            )],
        );
        pool.add_file(&f).unwrap();
        let d = pool.find_message_by_name("pkg.D").unwrap();
        let get = |name: &str| d.find_field_by_name(name).unwrap();
        assert_eq!(get("hex").default_value(), Some(MessageValue::Int32(16)));
        assert!(get("hex").has_default());
        assert_eq!(get("text").default_value().unwrap().as_str_view().unwrap(), "hi");
        assert_eq!(
            get("raw").default_value().unwrap().as_str_view().unwrap().as_bytes(),
            b"\x01z"
        );
        assert_eq!(get("big").default_value(), Some(MessageValue::Double(f64::NEG_INFINITY)));
        assert_eq!(get("none").default_value(), Some(MessageValue::UInt64(0)));
        assert!(!get("none").has_default());

        let bad = file(
            "bad.proto",
            "proto2",
            vec![message("E", vec![with_default("x", 1, FieldType::Int32, "abc")])],
        );
        assert!(pool.add_file(&bad).unwrap_err().to_string().contains("invalid default"));
    }

    #[test]
    fn field_numbers_and_names_are_checked() {
        let mut pool = DefPool::new().unwrap();
        let cases = [
            message("M", vec![field("x", 0, Label::Optional, FieldType::Int32)]),
            message("M", vec![field("x", 1 << 29, Label::Optional, FieldType::Int32)]),
            message(
                "M",
                vec![
                    field("x", 1, Label::Optional, FieldType::Int32),
                    field("y", 1, Label::Optional, FieldType::Int32),
                ],
            ),
            message(
                "M",
                vec![
                    field("x", 1, Label::Optional, FieldType::Int32),
                    field("x", 2, Label::Optional, FieldType::Int32),
                ],
            ),
            DescriptorProto {
                reserved_range: vec![ReservedRange { start: 5, end: 10 }],
                ..message("M", vec![field("x", 7, Label::Optional, FieldType::Int32)])
            },
            DescriptorProto {
                reserved_name: vec!["x".to_string()],
                ..message("M", vec![field("x", 1, Label::Optional, FieldType::Int32)])
            },
            message("M", vec![typed("x", 1, Label::Optional, FieldType::Message, "Missing")]),
            message("bad name", vec![]),
        ];
        for (i, m) in cases.into_iter().enumerate() {
            let f = file(&format!("case{i}.proto"), "proto2", vec![m]);
            assert!(pool.add_file(&f).is_err(), "case {i} was accepted");
        }
        assert_eq!(pool.file_count(), 0);
        pool.add_file(&file(
            "ok.proto",
            "proto2",
            vec![message("M", vec![field("x", (1 << 29) - 1, Label::Optional, FieldType::Int32)])],
        ))
        .unwrap();
    }

    #[test]
    fn services_resolve_method_types() {
        let mut pool = DefPool::new().unwrap();
        let mut f = file("svc.proto", "proto3", vec![message("Req", vec![]), message("Resp", vec![])]);
        f.service.push(ServiceDescriptorProto {
            name: "Api".to_string(),
            method: vec![MethodDescriptorProto {
                name: "Call".to_string(),
                input_type: ".pkg.Req".to_string(),
                output_type: "Resp".to_string(),
                client_streaming: false,
                server_streaming: true,
            }],
        });
        pool.add_file(&f).unwrap();
        let api = pool.find_service_by_name("pkg.Api").unwrap();
        let call = api.find_method_by_name("Call").unwrap();
        assert_eq!(call.full_name(), "pkg.Api.Call");
        assert_eq!(call.input_type().name(), "Req");
        assert_eq!(call.output_type().name(), "Resp");
        assert!(call.server_streaming());
    }

    #[test]
    fn serialized_files_and_sets() {
        let bytes = person_file().encode_to_vec().unwrap();
        let mut pool = DefPool::new().unwrap();
        pool.add_serialized_file(&bytes).unwrap();
        assert!(pool.find_message_by_name("pkg.Person").is_some());

        let set = FileDescriptorSet {
            file: vec![person_file(), file("other.proto", "proto3", vec![message("Other", vec![])])],
        };
        let mut pool = DefPool::new().unwrap();
        pool.add_serialized_file_set(&set.encode_to_vec().unwrap()).unwrap();
        assert_eq!(pool.file_count(), 2);
        pool.add_file_set(&set).unwrap();
        assert_eq!(pool.file_count(), 2);
    }

    #[test]
    fn message_set_layout() {
        let mut pool = DefPool::new().unwrap();
        let mut set = message("Set", vec![]);
        set.message_set_wire_format = true;
        set.extension_range.push(ExtensionRange { start: 4, end: 1 << 29 });
        let mut f = file("ms.proto", "proto2", vec![set, message("Item", vec![])]);
        let mut ext = typed("item", 10, Label::Optional, FieldType::Message, "Item");
        ext.extendee = "Set".to_string();
        f.extension.push(ext);
        pool.add_file(&f).unwrap();
        let set = pool.find_message_by_name("pkg.Set").unwrap();
        assert!(set.is_message_set());
        assert!(set.mini_table().is_message_set());

        let mut bad = file("ms2.proto", "proto2", vec![]);
        bad.dependency.push("ms.proto".to_string());
        let mut ext = field("num", 11, Label::Optional, FieldType::Int32);
        ext.extendee = "Set".to_string();
        bad.extension.push(ext);
        assert!(pool.add_file(&bad).is_err());
    }
}
