use super::{DefPool, EnumDef, FieldDef, FileDef, OneofDef, Syntax};
use crate::defs::descriptor::{ExtensionRange, ReservedRange};
use crate::hash::{IntTable, StrTable};
use crate::mini_table::MiniTable;

pub(crate) struct MessageData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) file: usize,
    pub(crate) containing: Option<usize>,
    /// Fields in declaration order.
    pub(crate) fields: Vec<usize>,
    pub(crate) oneofs: Vec<usize>,
    pub(crate) nested_messages: Vec<usize>,
    pub(crate) nested_enums: Vec<usize>,
    pub(crate) nested_extensions: Vec<usize>,
    pub(crate) extension_ranges: Vec<ExtensionRange>,
    pub(crate) reserved_ranges: Vec<ReservedRange>,
    pub(crate) reserved_names: Vec<String>,
    pub(crate) map_entry: bool,
    pub(crate) message_set: bool,
    /// Field indexes; the tables live in the pool's symbol arena.
    pub(crate) by_name: StrTable,
    pub(crate) by_json_name: StrTable,
    pub(crate) by_number: IntTable,
    pub(crate) table: *mut MiniTable,
    pub(crate) mini_descriptor: String,
}

impl MessageData {
    pub(crate) fn field_by_name(&self, name: &str) -> Option<usize> {
        self.by_name.lookup(name.as_bytes()).map(|v| v as usize)
    }

    pub(crate) fn field_by_json_name(&self, name: &str) -> Option<usize> {
        self.by_json_name.lookup(name.as_bytes()).map(|v| v as usize)
    }

    pub(crate) fn field_by_number(&self, number: u32) -> Option<usize> {
        self.by_number.lookup(number as usize).map(|v| v as usize)
    }
}

/// A message type in a [`DefPool`].
#[derive(Clone, Copy)]
pub struct MessageDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) index: usize,
}

impl<'p> MessageDef<'p> {
    fn data(&self) -> &'p MessageData {
        &self.pool.messages[self.index]
    }

    pub fn name(&self) -> &'p str {
        &self.data().name
    }

    pub fn full_name(&self) -> &'p str {
        &self.data().full_name
    }

    pub fn file(&self) -> FileDef<'p> {
        FileDef { pool: self.pool, index: self.data().file }
    }

    pub fn syntax(&self) -> Syntax {
        self.file().syntax()
    }

    pub fn pool(&self) -> &'p DefPool {
        self.pool
    }

    pub fn containing_type(&self) -> Option<MessageDef<'p>> {
        let pool = self.pool;
        self.data().containing.map(|index| MessageDef { pool, index })
    }

    pub fn field_count(&self) -> usize {
        self.data().fields.len()
    }

    /// Field `i` in declaration order.
    pub fn field(&self, i: usize) -> Option<FieldDef<'p>> {
        let index = *self.data().fields.get(i)?;
        Some(FieldDef { pool: self.pool, index })
    }

    pub fn fields(&self) -> impl ExactSizeIterator<Item = FieldDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().fields.iter().map(move |&index| FieldDef { pool, index })
    }

    pub fn find_field_by_name(&self, name: &str) -> Option<FieldDef<'p>> {
        let index = self.data().field_by_name(name)?;
        Some(FieldDef { pool: self.pool, index })
    }

    pub fn find_field_by_json_name(&self, name: &str) -> Option<FieldDef<'p>> {
        let index = self.data().field_by_json_name(name)?;
        Some(FieldDef { pool: self.pool, index })
    }

    pub fn find_field_by_number(&self, number: u32) -> Option<FieldDef<'p>> {
        let index = self.data().field_by_number(number)?;
        Some(FieldDef { pool: self.pool, index })
    }

    /// Oneofs in declaration order, synthetic ones included.
    pub fn oneofs(&self) -> impl ExactSizeIterator<Item = OneofDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().oneofs.iter().map(move |&index| OneofDef { pool, index })
    }

    /// Oneofs written in the source, without the synthetic ones.
    pub fn real_oneofs(&self) -> impl Iterator<Item = OneofDef<'p>> + use<'p> {
        self.oneofs().filter(|o| !o.is_synthetic())
    }

    pub fn find_oneof_by_name(&self, name: &str) -> Option<OneofDef<'p>> {
        self.oneofs().find(|o| o.name() == name)
    }

    pub fn nested_messages(&self) -> impl ExactSizeIterator<Item = MessageDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().nested_messages.iter().map(move |&index| MessageDef { pool, index })
    }

    pub fn nested_enums(&self) -> impl ExactSizeIterator<Item = EnumDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().nested_enums.iter().map(move |&index| EnumDef { pool, index })
    }

    pub fn nested_extensions(&self) -> impl ExactSizeIterator<Item = FieldDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().nested_extensions.iter().map(move |&index| FieldDef { pool, index })
    }

    pub fn extension_ranges(&self) -> &'p [ExtensionRange] {
        &self.data().extension_ranges
    }

    pub fn is_extendable(&self) -> bool {
        !self.data().extension_ranges.is_empty()
    }

    pub fn in_extension_range(&self, number: u32) -> bool {
        let n = number as i64;
        self.extension_ranges()
            .iter()
            .any(|r| n >= r.start as i64 && n < r.end as i64)
    }

    pub fn reserved_ranges(&self) -> &'p [ReservedRange] {
        &self.data().reserved_ranges
    }

    pub fn reserved_names(&self) -> &'p [String] {
        &self.data().reserved_names
    }

    pub fn is_map_entry(&self) -> bool {
        self.data().map_entry
    }

    pub fn is_message_set(&self) -> bool {
        self.data().message_set
    }

    /// Key field of a map entry message.
    pub fn map_key(&self) -> Option<FieldDef<'p>> {
        self.is_map_entry().then(|| self.find_field_by_number(1)).flatten()
    }

    /// Value field of a map entry message.
    pub fn map_value(&self) -> Option<FieldDef<'p>> {
        self.is_map_entry().then(|| self.find_field_by_number(2)).flatten()
    }

    /// Whether this is one of the `google.protobuf` well-known types with a
    /// special JSON mapping.
    pub fn well_known_type(&self) -> Option<WellKnownType> {
        match self.full_name() {
            "google.protobuf.Timestamp" => Some(WellKnownType::Timestamp),
            "google.protobuf.Duration" => Some(WellKnownType::Duration),
            _ => None,
        }
    }

    pub fn mini_table(&self) -> &'p MiniTable {
        // Safety: the table lives in the pool's arena and is only mutated
        // while its file is being added.
        unsafe { &*self.data().table }
    }

    /// The mini-descriptor string the layout table was built from.
    pub fn mini_descriptor(&self) -> &'p str {
        &self.data().mini_descriptor
    }
}

/// Messages with a dedicated JSON representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnownType {
    Timestamp,
    Duration,
}

impl PartialEq for MessageDef<'_> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.pool, other.pool) && self.index == other.index
    }
}

impl core::fmt::Debug for MessageDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("MessageDef").field(&self.full_name()).finish()
    }
}
