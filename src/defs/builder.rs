//! Turns a `FileDescriptorProto` into defs and mini-tables.
//!
//! The build runs in phases over every message of the file at once, so
//! forward references and cycles need no special handling: all symbols are
//! declared before any type name is resolved, and all tables are built
//! before any of them is linked. The caller owns the rollback; the builder
//! only records which symbols it registered.


use tracing::{debug, trace};

use super::descriptor::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto, Label, MethodDescriptorProto,
    ServiceDescriptorProto,
};
use super::enum_def::{EnumData, EnumValueData};
use super::field::{FieldData, SubDef, parse_default, to_json_name};
use super::file::{FileData, Syntax};
use super::message::MessageData;
use super::oneof::OneofData;
use super::service::{MethodData, ServiceData};
use super::{DefPool, Symbol};
use crate::base::MessageValue;
use crate::error::{Error, Result};
use crate::extension_registry::ExtensionRegistryStatus;
use crate::hash::{IntTable, StrTable};
use crate::mini_descriptor::{MtDataEncoder, field_flags, message_modifier};
use crate::mini_table::{FieldType, MiniTable, MiniTableEnum, MiniTableExtension, MiniTableSub};
use crate::wire::MAX_FIELD_NUMBER;

/// Progress of the messages of the file being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum BuildState {
    /// Names are registered; field types are not yet known.
    Declared,
    FieldsResolved,
    /// Mini-tables exist but sub-message slots hold the placeholder.
    LayoutComputed,
    SubMessagesLinked,
    Finalized,
}

fn fail(msg: String) -> Error {
    debug!(error = %msg, "def build failed");
    Error::Def(msg)
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn check_ident(name: &str, what: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(fail(format!("invalid {what} name '{name}'")))
    }
}

fn check_full_name(name: &str) -> Result<()> {
    name.split('.').try_for_each(|part| check_ident(part, "package"))
}

/// `foo_bar` maps to the entry message `FooBarEntry`.
fn map_entry_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 5);
    let mut upper_next = true;
    for ch in field.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out.push_str("Entry");
    out
}

fn is_options_message(full_name: &str) -> bool {
    full_name
        .strip_prefix("google.protobuf.")
        .is_some_and(|name| name.ends_with("Options") && !name.contains('.'))
}

struct PendingField<'d> {
    index: usize,
    proto: &'d FieldDescriptorProto,
    /// Scope that relative type names are resolved in.
    scope: String,
}

struct PendingMethod<'d> {
    index: usize,
    proto: &'d MethodDescriptorProto,
    scope: String,
}

pub(crate) struct FileBuilder<'p, 'd> {
    pool: &'p mut DefPool,
    proto: &'d FileDescriptorProto,
    added: &'p mut Vec<String>,
    file: usize,
    syntax: Syntax,
    state: BuildState,
    msg_start: usize,
    field_start: usize,
    enum_start: usize,
    fields: Vec<PendingField<'d>>,
    methods: Vec<PendingMethod<'d>>,
}

/// Builds `proto` into `pool` and returns the new file's index. Every
/// symbol name registered along the way is pushed onto `added`, also when
/// the build fails.
pub(crate) fn build(pool: &mut DefPool, proto: &FileDescriptorProto, added: &mut Vec<String>) -> Result<usize> {
    let msg_start = pool.messages.len();
    let field_start = pool.fields.len();
    let enum_start = pool.enums.len();
    let mut b = FileBuilder {
        file: pool.files.len(),
        pool,
        proto,
        added,
        syntax: Syntax::Proto2,
        state: BuildState::Declared,
        msg_start,
        field_start,
        enum_start,
        fields: Vec::new(),
        methods: Vec::new(),
    };
    b.declare()?;
    b.resolve()?;
    b.layout()?;
    b.link()?;
    b.finalize()
}

impl<'d> FileBuilder<'_, 'd> {
    fn advance(&mut self, state: BuildState) {
        debug_assert!(state > self.state);
        trace!(file = %self.proto.name, ?state, "file build");
        self.state = state;
    }

    fn add_symbol(&mut self, name: &str, sym: Symbol) -> Result<()> {
        if self.pool.lookup_symbol(name).is_some() {
            return Err(fail(format!("duplicate symbol '{name}'")));
        }
        self.pool.insert_symbol(name, sym)?;
        self.added.push(name.to_string());
        Ok(())
    }

    fn lookup(&self, scope: &str, name: &str) -> Option<Symbol> {
        if let Some(abs) = name.strip_prefix('.') {
            return self.pool.lookup_symbol(abs);
        }
        let mut scope = scope;
        loop {
            if let Some(sym) = self.pool.lookup_symbol(&join(scope, name)) {
                return Some(sym);
            }
            if scope.is_empty() {
                return None;
            }
            scope = scope.rfind('.').map_or("", |i| &scope[..i]);
        }
    }

    // Declared

    fn declare(&mut self) -> Result<()> {
        let proto = self.proto;
        if proto.name.is_empty() {
            return Err(fail("missing name in FileDescriptorProto".to_string()));
        }
        if self.pool.file_index(&proto.name).is_some() {
            return Err(fail(format!("duplicate file name {}", proto.name)));
        }
        self.syntax =
            Syntax::parse(&proto.syntax).ok_or_else(|| fail(format!("invalid syntax '{}'", proto.syntax)))?;
        if !proto.package.is_empty() {
            check_full_name(&proto.package)?;
        }
        let mut dependencies = Vec::with_capacity(proto.dependency.len());
        for dep in &proto.dependency {
            let index = self
                .pool
                .file_index(dep)
                .ok_or_else(|| fail(format!("Depends on file not in pool: {dep}")))?;
            dependencies.push(index);
        }
        let public_dependencies = proto
            .public_dependency
            .iter()
            .map(|&i| {
                usize::try_from(i)
                    .ok()
                    .and_then(|i| dependencies.get(i).copied())
                    .ok_or_else(|| fail(format!("public_dependency {i} out of range in {}", proto.name)))
            })
            .collect::<Result<Vec<_>>>()?;

        self.pool.files.push(FileData {
            name: proto.name.clone(),
            package: proto.package.clone(),
            syntax: self.syntax,
            dependencies,
            public_dependencies,
            messages: Vec::new(),
            enums: Vec::new(),
            extensions: Vec::new(),
            services: Vec::new(),
        });

        let package = proto.package.as_str();
        for m in &proto.message_type {
            let index = self.declare_message(m, package, None)?;
            self.pool.files[self.file].messages.push(index);
        }
        for e in &proto.enum_type {
            let index = self.declare_enum(e, package, None)?;
            self.pool.files[self.file].enums.push(index);
        }
        for x in &proto.extension {
            let index = self.declare_extension(x, package, None)?;
            self.pool.files[self.file].extensions.push(index);
        }
        for s in &proto.service {
            let index = self.declare_service(s, package)?;
            self.pool.files[self.file].services.push(index);
        }
        Ok(())
    }

    fn declare_message(&mut self, m: &'d DescriptorProto, prefix: &str, containing: Option<usize>) -> Result<usize> {
        check_ident(&m.name, "message")?;
        let full_name = join(prefix, &m.name);
        let index = self.pool.messages.len();
        self.add_symbol(&full_name, Symbol::Message(index))?;

        for r in &m.extension_range {
            if r.start < 1 || r.end <= r.start || r.end > MAX_FIELD_NUMBER as i32 + 1 {
                return Err(fail(format!(
                    "extension range [{}, {}) of {full_name} is invalid",
                    r.start, r.end
                )));
            }
        }
        for r in &m.reserved_range {
            if r.start < 1 || r.end <= r.start {
                return Err(fail(format!("reserved range [{}, {}) of {full_name} is invalid", r.start, r.end)));
            }
        }
        if m.message_set_wire_format {
            if m.extension_range.is_empty() {
                return Err(fail(format!("MessageSet {full_name} must be extendable")));
            }
            if !m.field.is_empty() {
                return Err(fail(format!("MessageSet {full_name} cannot have fields")));
            }
        }
        if m.map_entry && containing.is_none() {
            return Err(fail(format!("map entry {full_name} must be a nested message")));
        }

        let sym_arena = &self.pool.sym_arena;
        let expected = m.field.len();
        let by_name = StrTable::new(expected, sym_arena).ok_or(Error::OutOfMemory)?;
        let by_json_name = StrTable::new(expected, sym_arena).ok_or(Error::OutOfMemory)?;
        // Field numbers are mostly dense from 1.
        let by_number = IntTable::with_sizes(expected + 1, 3, sym_arena).ok_or(Error::OutOfMemory)?;
        self.pool.messages.push(MessageData {
            name: m.name.clone(),
            full_name: full_name.clone(),
            file: self.file,
            containing,
            fields: Vec::new(),
            oneofs: Vec::new(),
            nested_messages: Vec::new(),
            nested_enums: Vec::new(),
            nested_extensions: Vec::new(),
            extension_ranges: m.extension_range.clone(),
            reserved_ranges: m.reserved_range.clone(),
            reserved_names: m.reserved_name.clone(),
            map_entry: m.map_entry,
            message_set: m.message_set_wire_format,
            by_name,
            by_json_name,
            by_number,
            table: core::ptr::null_mut(),
            mini_descriptor: String::new(),
        });

        for o in &m.oneof_decl {
            check_ident(&o.name, "oneof")?;
            let oneof = self.pool.oneofs.len();
            self.pool.oneofs.push(OneofData {
                name: o.name.clone(),
                full_name: join(&full_name, &o.name),
                message: index,
                fields: Vec::new(),
                synthetic: false,
            });
            self.pool.messages[index].oneofs.push(oneof);
        }
        for f in &m.field {
            self.declare_field(f, index)?;
        }
        self.check_oneofs(index)?;

        for n in &m.nested_type {
            let nested = self.declare_message(n, &full_name, Some(index))?;
            self.pool.messages[index].nested_messages.push(nested);
        }
        for e in &m.enum_type {
            let nested = self.declare_enum(e, &full_name, Some(index))?;
            self.pool.messages[index].nested_enums.push(nested);
        }
        for x in &m.extension {
            let nested = self.declare_extension(x, &full_name, Some(index))?;
            self.pool.messages[index].nested_extensions.push(nested);
        }
        Ok(index)
    }

    fn check_number(&self, f: &FieldDescriptorProto, full_name: &str) -> Result<u32> {
        match u32::try_from(f.number) {
            Ok(n) if (1..=MAX_FIELD_NUMBER).contains(&n) => Ok(n),
            _ => Err(fail(format!("invalid field number ({}) for {full_name}", f.number))),
        }
    }

    fn check_label(&self, f: &FieldDescriptorProto, full_name: &str) -> Result<()> {
        match self.syntax {
            Syntax::Proto3 => {
                if f.label == Label::Required {
                    return Err(fail(format!("proto3 fields cannot be required ({full_name})")));
                }
                if f.r#type == Some(FieldType::Group) {
                    return Err(fail(format!("proto3 does not support groups ({full_name})")));
                }
            }
            Syntax::Proto2 => {
                if f.proto3_optional {
                    return Err(fail(format!("field {full_name} has proto3_optional but file is not proto3")));
                }
            }
        }
        Ok(())
    }

    fn declare_field(&mut self, f: &'d FieldDescriptorProto, message: usize) -> Result<()> {
        check_ident(&f.name, "field")?;
        let msg = &self.pool.messages[message];
        let msg_name = msg.full_name.clone();
        let full_name = join(&msg_name, &f.name);
        let number = self.check_number(f, &full_name)?;
        self.check_label(f, &full_name)?;

        let json_name = f.json_name.clone().unwrap_or_else(|| to_json_name(&f.name));
        if msg.field_by_number(number).is_some() {
            return Err(fail(format!("duplicate field number ({number}) in {msg_name}")));
        }
        if msg.field_by_name(&f.name).is_some() {
            return Err(fail(format!("duplicate field name ({}) in {msg_name}", f.name)));
        }
        if msg.field_by_json_name(&json_name).is_some() {
            return Err(fail(format!("duplicate json_name ({json_name}) in {msg_name}")));
        }
        let n = number as i64;
        if msg.reserved_ranges.iter().any(|r| n >= r.start as i64 && n < r.end as i64) {
            return Err(fail(format!("field {full_name} uses reserved number {number}")));
        }
        if msg.reserved_names.contains(&f.name) {
            return Err(fail(format!("field name {} is reserved in {msg_name}", f.name)));
        }
        if msg.extension_ranges.iter().any(|r| n >= r.start as i64 && n < r.end as i64) {
            return Err(fail(format!("field {full_name} number {number} overlaps an extension range")));
        }
        let oneof = match f.oneof_index {
            None if f.proto3_optional => {
                return Err(fail(format!("proto3_optional field {full_name} must be in a oneof")));
            }
            None => None,
            Some(i) => {
                let oneof = usize::try_from(i)
                    .ok()
                    .and_then(|i| msg.oneofs.get(i).copied())
                    .ok_or_else(|| fail(format!("oneof_index out of range for {full_name}")))?;
                if f.label != Label::Optional {
                    return Err(fail(format!("fields in oneof must have OPTIONAL label ({full_name})")));
                }
                Some(oneof)
            }
        };

        let index = self.pool.fields.len();
        let position = msg.fields.len();
        self.pool.fields.push(FieldData {
            name: f.name.clone(),
            full_name,
            json_name: json_name.clone(),
            has_json_name: f.json_name.is_some(),
            number,
            label: f.label,
            field_type: f.r#type.unwrap_or(FieldType::Message),
            file: self.file,
            message: Some(message),
            scope: None,
            is_extension: false,
            oneof,
            sub: SubDef::None,
            default: None,
            has_default: false,
            proto3_optional: f.proto3_optional,
            packed: false,
            presence: false,
            index: position,
            layout: core::ptr::null(),
            extension: core::ptr::null(),
        });
        let pool = &mut *self.pool;
        let msg = &mut pool.messages[message];
        msg.fields.push(index);
        let value = index as u64;
        msg.by_name
            .insert(f.name.as_bytes(), value, &pool.sym_arena)
            .and_then(|()| msg.by_json_name.insert(json_name.as_bytes(), value, &pool.sym_arena))
            .and_then(|()| msg.by_number.insert(number as usize, value, &pool.sym_arena))
            .ok_or(Error::OutOfMemory)?;
        if let Some(oneof) = oneof {
            self.pool.oneofs[oneof].fields.push(index);
        }
        self.fields.push(PendingField {
            index,
            proto: f,
            scope: msg_name,
        });
        Ok(())
    }

    fn check_oneofs(&mut self, message: usize) -> Result<()> {
        let mut seen_synthetic = false;
        let oneofs = self.pool.messages[message].oneofs.clone();
        for oneof in oneofs {
            let o = &self.pool.oneofs[oneof];
            if o.fields.is_empty() {
                return Err(fail(format!("oneof {} has no fields", o.full_name)));
            }
            let optional = o.fields.iter().filter(|&&f| self.pool.fields[f].proto3_optional).count();
            let synthetic = optional > 0;
            if synthetic && (optional != 1 || o.fields.len() != 1) {
                return Err(fail(format!("synthetic oneof {} must have exactly one field", o.full_name)));
            }
            if !synthetic && seen_synthetic {
                return Err(fail(format!("synthetic oneofs must be after all other oneofs ({})", o.full_name)));
            }
            seen_synthetic |= synthetic;
            self.pool.oneofs[oneof].synthetic = synthetic;
        }
        Ok(())
    }

    fn declare_extension(&mut self, f: &'d FieldDescriptorProto, prefix: &str, scope: Option<usize>) -> Result<usize> {
        check_ident(&f.name, "extension")?;
        let full_name = join(prefix, &f.name);
        let number = self.check_number(f, &full_name)?;
        self.check_label(f, &full_name)?;
        if f.oneof_index.is_some() {
            return Err(fail(format!("extension {full_name} cannot be in a oneof")));
        }
        if f.extendee.is_empty() {
            return Err(fail(format!("extension {full_name} has no extendee")));
        }
        let index = self.pool.fields.len();
        self.add_symbol(&full_name, Symbol::Extension(index))?;
        let position = match scope {
            Some(m) => self.pool.messages[m].nested_extensions.len(),
            None => self.pool.files[self.file].extensions.len(),
        };
        self.pool.fields.push(FieldData {
            name: f.name.clone(),
            full_name,
            json_name: f.json_name.clone().unwrap_or_else(|| to_json_name(&f.name)),
            has_json_name: f.json_name.is_some(),
            number,
            label: f.label,
            field_type: f.r#type.unwrap_or(FieldType::Message),
            file: self.file,
            message: None,
            scope,
            is_extension: true,
            oneof: None,
            sub: SubDef::None,
            default: None,
            has_default: false,
            proto3_optional: f.proto3_optional,
            packed: false,
            presence: false,
            index: position,
            layout: core::ptr::null(),
            extension: core::ptr::null(),
        });
        self.fields.push(PendingField {
            index,
            proto: f,
            scope: prefix.to_string(),
        });
        Ok(index)
    }

    fn declare_enum(&mut self, e: &EnumDescriptorProto, prefix: &str, containing: Option<usize>) -> Result<usize> {
        check_ident(&e.name, "enum")?;
        let full_name = join(prefix, &e.name);
        let index = self.pool.enums.len();
        self.add_symbol(&full_name, Symbol::Enum(index))?;
        let Some(first) = e.value.first() else {
            return Err(fail(format!("enums must contain at least one value ({full_name})")));
        };
        if self.syntax == Syntax::Proto3 && first.number != 0 {
            return Err(fail(format!("for proto3, the first enum value must be zero ({full_name})")));
        }
        for r in &e.reserved_range {
            if r.end < r.start {
                return Err(fail(format!("reserved range [{}, {}] of {full_name} is invalid", r.start, r.end)));
            }
        }
        self.pool.enums.push(EnumData {
            name: e.name.clone(),
            full_name: full_name.clone(),
            file: self.file,
            containing,
            values: Vec::with_capacity(e.value.len()),
            reserved_ranges: e.reserved_range.clone(),
            reserved_names: e.reserved_name.clone(),
            closed: self.syntax == Syntax::Proto2,
            table: core::ptr::null(),
        });
        for v in &e.value {
            check_ident(&v.name, "enum value")?;
            if e.reserved_range.iter().any(|r| v.number >= r.start && v.number <= r.end) {
                return Err(fail(format!("enum value {} uses reserved number {}", v.name, v.number)));
            }
            if e.reserved_name.contains(&v.name) {
                return Err(fail(format!("enum value name {} is reserved in {full_name}", v.name)));
            }
            // Values are siblings of their enum, not children.
            let value_name = join(prefix, &v.name);
            let value = self.pool.enum_values.len();
            self.add_symbol(&value_name, Symbol::EnumValue(value))?;
            self.pool.enum_values.push(EnumValueData {
                name: v.name.clone(),
                full_name: value_name,
                number: v.number,
                enum_index: index,
            });
            self.pool.enums[index].values.push(value);
        }
        Ok(index)
    }

    fn declare_service(&mut self, s: &'d ServiceDescriptorProto, prefix: &str) -> Result<usize> {
        check_ident(&s.name, "service")?;
        let full_name = join(prefix, &s.name);
        let index = self.pool.services.len();
        self.add_symbol(&full_name, Symbol::Service(index))?;
        let mut methods = Vec::with_capacity(s.method.len());
        for m in &s.method {
            check_ident(&m.name, "method")?;
            let method = self.pool.methods.len();
            self.pool.methods.push(MethodData {
                name: m.name.clone(),
                full_name: join(&full_name, &m.name),
                service: index,
                input: 0,
                output: 0,
                client_streaming: m.client_streaming,
                server_streaming: m.server_streaming,
            });
            self.methods.push(PendingMethod {
                index: method,
                proto: m,
                scope: full_name.clone(),
            });
            methods.push(method);
        }
        self.pool.services.push(ServiceData {
            name: s.name.clone(),
            full_name,
            file: self.file,
            methods,
        });
        Ok(index)
    }

    // FieldsResolved

    fn resolve(&mut self) -> Result<()> {
        let fields = core::mem::take(&mut self.fields);
        for p in &fields {
            self.resolve_field(p)?;
        }
        for message in self.msg_start..self.pool.messages.len() {
            self.check_map_fields(message)?;
        }
        let methods = core::mem::take(&mut self.methods);
        for p in &methods {
            let input = self.resolve_message(&p.scope, &p.proto.input_type, "input type", p.index)?;
            let output = self.resolve_message(&p.scope, &p.proto.output_type, "output type", p.index)?;
            let m = &mut self.pool.methods[p.index];
            m.input = input;
            m.output = output;
        }
        self.advance(BuildState::FieldsResolved);
        Ok(())
    }

    fn resolve_message(&self, scope: &str, name: &str, what: &str, method: usize) -> Result<usize> {
        match self.lookup(scope, name) {
            Some(Symbol::Message(index)) => Ok(index),
            _ => Err(fail(format!(
                "couldn't resolve {what} '{name}' for method {}",
                self.pool.methods[method].full_name
            ))),
        }
    }

    fn resolve_field(&mut self, p: &PendingField<'d>) -> Result<()> {
        use FieldType::{Enum, Group, Message};

        let f = p.proto;
        let full_name = self.pool.fields[p.index].full_name.clone();
        let target = if f.type_name.is_empty() {
            None
        } else {
            Some(self.lookup(&p.scope, &f.type_name).ok_or_else(|| {
                fail(format!("couldn't resolve name '{}' for field {full_name}", f.type_name))
            })?)
        };
        let (field_type, sub) = match (f.r#type, target) {
            (Some(t @ (Message | Group)), Some(Symbol::Message(m))) => (t, SubDef::Message(m)),
            (None, Some(Symbol::Message(m))) => (Message, SubDef::Message(m)),
            (Some(Enum) | None, Some(Symbol::Enum(e))) => (Enum, SubDef::Enum(e)),
            (Some(Message | Group | Enum), None) => {
                return Err(fail(format!("field {full_name} has no type name")));
            }
            (Some(t), None) => (t, SubDef::None),
            (None, None) => return Err(fail(format!("field {full_name} has no type"))),
            (Some(t), Some(_)) => {
                return Err(fail(format!(
                    "type mismatch for field {full_name}: '{}' is not a {t:?}",
                    f.type_name
                )));
            }
            (None, Some(_)) => {
                return Err(fail(format!("'{}' is not a type (field {full_name})", f.type_name)));
            }
        };

        if let SubDef::Enum(e) = sub {
            if self.syntax == Syntax::Proto3 && self.pool.enums[e].closed {
                return Err(fail(format!(
                    "enum {} is not a proto3 enum, but is used in proto3 field {full_name}",
                    self.pool.enums[e].full_name
                )));
            }
        }

        let repeated = f.label == Label::Repeated;
        let packed = if repeated && field_type.is_packable() {
            f.packed.unwrap_or(self.syntax == Syntax::Proto3)
        } else {
            if f.packed == Some(true) {
                return Err(fail(format!(
                    "[packed = true] can only be specified for repeated primitive fields ({full_name})"
                )));
            }
            false
        };

        let is_extension = self.pool.fields[p.index].is_extension;
        let mut message = self.pool.fields[p.index].message;
        if is_extension {
            let extendee = match self.lookup(&p.scope, &f.extendee) {
                Some(Symbol::Message(m)) => m,
                _ => {
                    return Err(fail(format!(
                        "couldn't resolve extendee '{}' for {full_name}",
                        f.extendee
                    )));
                }
            };
            let ext = &self.pool.messages[extendee];
            let n = f.number as i64;
            if !ext.extension_ranges.iter().any(|r| n >= r.start as i64 && n < r.end as i64) {
                return Err(fail(format!(
                    "extension {full_name} number {} is not in an extension range of {}",
                    f.number, ext.full_name
                )));
            }
            if self.syntax == Syntax::Proto3 && !is_options_message(&ext.full_name) {
                return Err(fail(format!(
                    "extensions in proto3 are only allowed for custom options ({full_name})"
                )));
            }
            if ext.message_set && (field_type != Message || repeated) {
                return Err(fail(format!("MessageSet extension {full_name} must be an optional message")));
            }
            message = Some(extendee);
        }

        let oneof = self.pool.fields[p.index].oneof;
        let presence = !repeated
            && (matches!(field_type, Message | Group)
                || oneof.is_some()
                || is_extension
                || self.syntax == Syntax::Proto2);
        let (default, has_default) = self.resolve_default(f, field_type, sub, repeated, &full_name)?;

        let data = &mut self.pool.fields[p.index];
        data.field_type = field_type;
        data.sub = sub;
        data.packed = packed;
        data.presence = presence;
        data.message = message;
        data.default = default;
        data.has_default = has_default;
        Ok(())
    }

    fn resolve_default(
        &self,
        f: &FieldDescriptorProto,
        field_type: FieldType,
        sub: SubDef,
        repeated: bool,
        full_name: &str,
    ) -> Result<(Option<MessageValue>, bool)> {
        let first_value = |e: usize| {
            let values = &self.pool.enums[e].values;
            values.first().map_or(0, |&v| self.pool.enum_values[v].number)
        };
        let Some(raw) = &f.default_value else {
            let value = match sub {
                SubDef::Enum(e) => Some(MessageValue::Int32(first_value(e))),
                _ => MessageValue::default_for(field_type.ctype()),
            };
            return Ok((value, false));
        };
        if self.syntax == Syntax::Proto3 {
            return Err(fail(format!("proto3 fields cannot have explicit defaults ({full_name})")));
        }
        if repeated || matches!(field_type, FieldType::Message | FieldType::Group) {
            return Err(fail(format!("default value not allowed for field {full_name}")));
        }
        let value = match sub {
            SubDef::Enum(e) => {
                let number = self.pool.enums[e]
                    .values
                    .iter()
                    .map(|&v| &self.pool.enum_values[v])
                    .find(|v| v.name == *raw)
                    .map(|v| v.number)
                    .ok_or_else(|| fail(format!("enum default '{raw}' not found for field {full_name}")))?;
                MessageValue::Int32(number)
            }
            _ => parse_default(field_type, raw, &self.pool.arena)
                .ok_or_else(|| fail(format!("invalid default '{raw}' for field {full_name}")))?,
        };
        Ok((Some(value), true))
    }

    fn check_map_fields(&self, message: usize) -> Result<()> {
        let msg = &self.pool.messages[message];
        for &f in &msg.fields {
            let field = &self.pool.fields[f];
            let SubDef::Message(sub) = field.sub else {
                continue;
            };
            let entry = &self.pool.messages[sub];
            if !entry.map_entry {
                continue;
            }
            if field.label != Label::Repeated {
                return Err(fail(format!(
                    "map entry {} used by non-repeated field {}",
                    entry.full_name, field.full_name
                )));
            }
            if entry.containing != Some(message) || entry.name != map_entry_name(&field.name) {
                return Err(fail(format!(
                    "map entry {} does not match field {}",
                    entry.full_name, field.full_name
                )));
            }
        }
        if !msg.map_entry {
            return Ok(());
        }
        let name = &msg.full_name;
        if msg.fields.len() != 2
            || !msg.oneofs.is_empty()
            || !msg.extension_ranges.is_empty()
            || !msg.nested_messages.is_empty()
            || !msg.nested_enums.is_empty()
        {
            return Err(fail(format!("map entry {name} must have exactly two fields and nothing else")));
        }
        let key = msg.field_by_number(1).map(|f| &self.pool.fields[f]);
        let value = msg.field_by_number(2).map(|f| &self.pool.fields[f]);
        let (Some(key), Some(value)) = (key, value) else {
            return Err(fail(format!("map entry {name} must number its fields 1 and 2")));
        };
        if key.name != "key" || value.name != "value" {
            return Err(fail(format!("map entry {name} fields must be named key and value")));
        }
        if key.label != Label::Optional || value.label != Label::Optional {
            return Err(fail(format!("map entry {name} fields must be optional")));
        }
        if matches!(
            key.field_type,
            FieldType::Float | FieldType::Double | FieldType::Bytes | FieldType::Message | FieldType::Group | FieldType::Enum
        ) {
            return Err(fail(format!("map entry {name} has invalid key type {:?}", key.field_type)));
        }
        Ok(())
    }

    // LayoutComputed

    fn field_flags(&self, f: &FieldData) -> u64 {
        let mut flags = 0;
        if f.label == Label::Repeated {
            flags |= field_flags::IS_REPEATED;
        }
        if f.packed {
            flags |= field_flags::IS_PACKED;
        }
        if let SubDef::Enum(e) = f.sub {
            if self.pool.enums[e].closed {
                flags |= field_flags::IS_CLOSED_ENUM;
            }
        }
        if !f.presence && f.label != Label::Repeated {
            flags |= field_flags::IS_PROTO3_SINGULAR;
        }
        if f.label == Label::Required {
            flags |= field_flags::IS_REQUIRED;
        }
        if f.field_type == FieldType::String && self.syntax == Syntax::Proto3 {
            flags |= field_flags::VALIDATE_UTF8;
        }
        flags
    }

    fn mini_descriptor(&self, message: usize) -> Result<String> {
        let msg = &self.pool.messages[message];
        let mut e = MtDataEncoder::new();
        let ok = if msg.map_entry {
            let entry_flags = field_flags::IS_CLOSED_ENUM | field_flags::VALIDATE_UTF8;
            let (Some(key), Some(value)) = (msg.field_by_number(1), msg.field_by_number(2)) else {
                return Err(fail(format!("map entry {} must number its fields 1 and 2", msg.full_name)));
            };
            let (key, value) = (&self.pool.fields[key], &self.pool.fields[value]);
            e.encode_map(
                key.field_type,
                value.field_type,
                self.field_flags(key) & entry_flags,
                self.field_flags(value) & entry_flags,
            )
        } else if msg.message_set {
            e.encode_message_set();
            true
        } else {
            let mut msg_mod = 0;
            if self.syntax == Syntax::Proto3 {
                msg_mod |= message_modifier::VALIDATE_UTF8 | message_modifier::DEFAULT_IS_PACKED;
            }
            if !msg.extension_ranges.is_empty() {
                msg_mod |= message_modifier::IS_EXTENDABLE;
            }
            e.start_message(msg_mod);
            let mut by_number: Vec<&FieldData> = msg.fields.iter().map(|&f| &self.pool.fields[f]).collect();
            by_number.sort_by_key(|f| f.number);
            let mut ok = by_number
                .iter()
                .all(|f| e.put_field(f.field_type, f.number, self.field_flags(f)));
            for &oneof in &msg.oneofs {
                let o = &self.pool.oneofs[oneof];
                if o.synthetic {
                    continue;
                }
                ok &= e.start_oneof();
                for &f in &o.fields {
                    ok &= e.put_oneof_field(self.pool.fields[f].number);
                }
            }
            ok
        };
        if !ok {
            return Err(fail(format!("cannot describe layout of {}", msg.full_name)));
        }
        Ok(e.finish())
    }

    fn enum_descriptor(&self, index: usize) -> Result<String> {
        let data = &self.pool.enums[index];
        let mut numbers: Vec<u32> = data
            .values
            .iter()
            .map(|&v| self.pool.enum_values[v].number as u32)
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        let mut e = MtDataEncoder::new();
        e.start_enum();
        if !numbers.into_iter().all(|n| e.put_enum_value(n)) {
            return Err(fail(format!("cannot describe enum {}", data.full_name)));
        }
        e.end_enum();
        Ok(e.finish())
    }

    fn layout(&mut self) -> Result<()> {
        for index in self.enum_start..self.pool.enums.len() {
            let desc = self.enum_descriptor(index)?;
            let table = MiniTableEnum::build(&desc, &self.pool.arena)
                .map_err(|e| fail(format!("{}: {e}", self.pool.enums[index].full_name)))?;
            self.pool.enums[index].table = table as *const MiniTableEnum;
        }
        for index in self.msg_start..self.pool.messages.len() {
            let desc = self.mini_descriptor(index)?;
            let table = MiniTable::build(&desc, &self.pool.arena)
                .map_err(|e| fail(format!("{}: {e}", self.pool.messages[index].full_name)))?;
            self.pool.messages[index].table = table as *mut MiniTable;
            self.pool.messages[index].mini_descriptor = desc;
        }
        for index in self.field_start..self.pool.fields.len() {
            if self.pool.fields[index].is_extension {
                self.build_extension(index)?;
            }
        }
        self.advance(BuildState::LayoutComputed);
        Ok(())
    }

    fn build_extension(&mut self, index: usize) -> Result<()> {
        let f = &self.pool.fields[index];
        let mut e = MtDataEncoder::new();
        if !e.encode_extension(f.field_type, f.number, self.field_flags(f)) {
            return Err(fail(format!("cannot describe extension {}", f.full_name)));
        }
        let Some(extendee) = f.message else {
            return Err(fail(format!("extension {} has no extendee", f.full_name)));
        };
        let sub = match f.sub {
            SubDef::Message(m) => MiniTableSub::Message(self.pool.messages[m].table),
            SubDef::Enum(en) if self.pool.enums[en].closed => MiniTableSub::Enum(self.pool.enums[en].table),
            _ => MiniTableSub::Enum(core::ptr::null()),
        };
        // Safety: tables of this file were all built above; earlier files'
        // tables live in the same arena.
        let extendee = unsafe { &*self.pool.messages[extendee].table };
        let ext = MiniTableExtension::build(e.as_str(), extendee, sub, &self.pool.arena)
            .map_err(|err| fail(format!("{}: {err}", self.pool.fields[index].full_name)))?;
        let data = &mut self.pool.fields[index];
        data.layout = ext.field() as *const _;
        data.extension = ext as *const MiniTableExtension;
        Ok(())
    }

    // SubMessagesLinked

    fn link(&mut self) -> Result<()> {
        for index in self.msg_start..self.pool.messages.len() {
            let msg = &self.pool.messages[index];
            let table = msg.table;
            let mut subs = Vec::new();
            let mut enums = Vec::new();
            // Safety: built in `layout` and not shared yet.
            for field in unsafe { &*table }.fields() {
                let Some(f) = msg.field_by_number(field.number()) else {
                    continue;
                };
                match self.pool.fields[f].sub {
                    SubDef::Message(m) if field.is_sub_message() => {
                        subs.push(self.pool.messages[m].table as *const MiniTable);
                    }
                    SubDef::Enum(e) if field.is_closed_enum() => enums.push(self.pool.enums[e].table),
                    _ => {}
                }
            }
            // Safety: every linked table lives in the pool arena for as long
            // as this one does.
            unsafe { (*table).link(&subs, &enums) }.map_err(|e| fail(format!("{}: {e}", msg.full_name)))?;
        }
        for index in self.msg_start..self.pool.messages.len() {
            let msg = &self.pool.messages[index];
            let table = unsafe { &*msg.table };
            for &f in &msg.fields {
                let number = self.pool.fields[f].number;
                let layout = table
                    .find_field_by_number(number)
                    .ok_or_else(|| fail(format!("field {number} missing from layout of {}", msg.full_name)))?
                    as *const _;
                self.pool.fields[f].layout = layout;
            }
        }
        self.advance(BuildState::SubMessagesLinked);
        Ok(())
    }

    // Finalized

    fn finalize(&mut self) -> Result<usize> {
        self.pool.insert_file_name(&self.proto.name, self.file)?;
        let exts: Vec<&MiniTableExtension> = self.pool.fields[self.field_start..]
            .iter()
            .filter(|f| f.is_extension)
            // Safety: set by `build_extension` for every extension.
            .map(|f| unsafe { &*f.extension })
            .collect();
        let pool = &mut *self.pool;
        pool.extreg.add_array(&exts, &pool.sym_arena).map_err(|status| match status {
            ExtensionRegistryStatus::DuplicateEntry => {
                fail(format!("duplicate extension number in {}", self.proto.name))
            }
            ExtensionRegistryStatus::InvalidExtension => fail(format!("invalid extension in {}", self.proto.name)),
            ExtensionRegistryStatus::OutOfMemory => Error::OutOfMemory,
        })?;
        self.advance(BuildState::Finalized);
        Ok(self.file)
    }
}
