//! Compact runtime schemas.
//!
//! A [`MiniTable`] describes the in-memory layout of one message type: the
//! fields sorted by number, where each one lives in the message body, how
//! its presence is tracked and which sub-tables it refers to. Tables are
//! normally built from a mini-descriptor string (see [`build`](MiniTable::build))
//! and then linked to their sub-message and enum tables.
//!
//! Tables refer to each other through raw pointers because message types
//! may be recursive. All tables of one schema are expected to live in the
//! same arena (or in static memory) and to outlive every message built
//! against them.

mod build;
mod enum_table;
mod extension;
mod field;
mod link;

pub use enum_table::MiniTableEnum;
pub use extension::MiniTableExtension;
pub use field::{CType, FieldMode, FieldRep, FieldType, MiniTableField, NO_SUB};

pub(crate) use enum_table::{arena_new, decode_base92_varint};

use crate::fast_decode::FastParseFn;

/// How a message treats extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtMode {
    NonExtendable = 0,
    Extendable = 1,
    IsMessageSet = 2,
    IsMapEntry = 4,
}

/// Sub-table slot referenced by a field's `submsg_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiniTableSub {
    Message(*const MiniTable),
    /// A null enum table accepts every value.
    Enum(*const MiniTableEnum),
}

/// One slot of the fast dispatch table.
#[derive(Clone, Copy)]
pub(crate) struct FastEntry {
    /// Expected first tag byte; zero marks an empty slot.
    pub(crate) tag: u8,
    pub(crate) field_index: u16,
    pub(crate) parser: Option<FastParseFn>,
}

impl FastEntry {
    pub(crate) const EMPTY: FastEntry = FastEntry {
        tag: 0,
        field_index: 0,
        parser: None,
    };
}

impl core::fmt::Debug for FastEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FastEntry")
            .field("tag", &self.tag)
            .field("field_index", &self.field_index)
            .field("has_parser", &self.parser.is_some())
            .finish()
    }
}

/// Table mask value meaning "no fast table".
pub(crate) const NO_FASTTABLE: u8 = u8::MAX;

pub struct MiniTable {
    pub(crate) subs: *mut MiniTableSub,
    pub(crate) fields: *mut MiniTableField,
    pub(crate) size: u16,
    pub(crate) field_count: u16,
    pub(crate) sub_count: u16,
    pub(crate) ext: ExtMode,
    pub(crate) dense_below: u16,
    pub(crate) table_mask: u8,
    pub(crate) required_count: u8,
    pub(crate) fasttable: *mut FastEntry,
}

unsafe impl Send for MiniTable {}
unsafe impl Sync for MiniTable {}

static EMPTY: MiniTable = MiniTable {
    subs: core::ptr::null_mut(),
    fields: core::ptr::null_mut(),
    size: 0,
    field_count: 0,
    sub_count: 0,
    ext: ExtMode::NonExtendable,
    dense_below: 0,
    table_mask: NO_FASTTABLE,
    required_count: 0,
    fasttable: core::ptr::null_mut(),
};

impl MiniTable {
    /// The placeholder every sub-message slot points to until it is linked.
    pub fn empty() -> &'static MiniTable {
        &EMPTY
    }

    pub fn is_empty_placeholder(table: *const MiniTable) -> bool {
        core::ptr::eq(table, &EMPTY)
    }

    /// Size of the message body in bytes.
    pub const fn size(&self) -> usize {
        self.size as usize
    }

    pub const fn ext_mode(&self) -> ExtMode {
        self.ext
    }

    pub const fn is_extendable(&self) -> bool {
        matches!(self.ext, ExtMode::Extendable | ExtMode::IsMessageSet)
    }

    pub const fn is_message_set(&self) -> bool {
        matches!(self.ext, ExtMode::IsMessageSet)
    }

    pub const fn is_map_entry(&self) -> bool {
        matches!(self.ext, ExtMode::IsMapEntry)
    }

    pub const fn required_count(&self) -> usize {
        self.required_count as usize
    }

    /// Hasbit mask covering every required field (hasbits `1..=required_count`).
    pub(crate) const fn required_mask(&self) -> u64 {
        ((1u64 << self.required_count) - 1) << 1
    }

    pub fn fields(&self) -> &[MiniTableField] {
        if self.fields.is_null() {
            return &[];
        }
        unsafe { core::slice::from_raw_parts(self.fields, self.field_count as usize) }
    }

    pub(crate) fn subs(&self) -> &[MiniTableSub] {
        if self.subs.is_null() {
            return &[];
        }
        unsafe { core::slice::from_raw_parts(self.subs, self.sub_count as usize) }
    }

    pub(crate) fn fasttable(&self) -> &[FastEntry] {
        if self.table_mask == NO_FASTTABLE || self.fasttable.is_null() {
            return &[];
        }
        let len = ((self.table_mask >> 3) as usize) + 1;
        unsafe { core::slice::from_raw_parts(self.fasttable, len) }
    }

    pub fn field(&self, index: usize) -> &MiniTableField {
        &self.fields()[index]
    }

    /// Index of the field with `number`.
    #[inline]
    pub fn field_index_by_number(&self, number: u32) -> Option<usize> {
        let fields = self.fields();
        let i = number.wrapping_sub(1) as usize;
        if i < self.dense_below as usize {
            return Some(i);
        }
        let rest = &fields[(self.dense_below as usize).min(fields.len())..];
        rest.binary_search_by_key(&number, |f| f.number)
            .ok()
            .map(|i| i + self.dense_below as usize)
    }

    #[inline]
    pub fn find_field_by_number(&self, number: u32) -> Option<&MiniTableField> {
        self.field_index_by_number(number).map(|i| &self.fields()[i])
    }

    /// Sub-message table of a message or group field, unless it is still
    /// the unlinked placeholder.
    pub fn sub_message(&self, field: &MiniTableField) -> Option<&MiniTable> {
        match self.subs().get(field.submsg_index as usize)? {
            MiniTableSub::Message(t) if !MiniTable::is_empty_placeholder(*t) && !t.is_null() => {
                Some(unsafe { &**t })
            }
            _ => None,
        }
    }

    /// Sub-message table of a field, placeholder included.
    pub(crate) fn sub_message_raw(&self, field: &MiniTableField) -> &MiniTable {
        match self.subs().get(field.submsg_index as usize) {
            Some(MiniTableSub::Message(t)) if !t.is_null() => unsafe { &**t },
            _ => &EMPTY,
        }
    }

    pub fn sub_enum(&self, field: &MiniTableField) -> Option<&MiniTableEnum> {
        match self.subs().get(field.submsg_index as usize)? {
            MiniTableSub::Enum(e) if !e.is_null() => Some(unsafe { &**e }),
            _ => None,
        }
    }
}

impl core::fmt::Debug for MiniTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MiniTable")
            .field("size", &self.size)
            .field("ext", &self.ext)
            .field("dense_below", &self.dense_below)
            .field("required_count", &self.required_count)
            .field("fields", &self.fields())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    #[test]
    fn lookup_by_number() {
        let arena = Arena::default();
        // Fields 1, 2, 3, then a skip to 10 and 11.
        let mut e = crate::mini_descriptor::MtDataEncoder::new();
        e.start_message(0);
        for n in [1, 2, 3, 10, 11] {
            assert!(e.put_field(FieldType::Int32, n, 0));
        }
        let table = MiniTable::build(e.as_str(), &arena).unwrap();
        assert_eq!(table.dense_below, 3);
        assert_eq!(table.find_field_by_number(2).map(|f| f.number()), Some(2));
        assert_eq!(table.find_field_by_number(11).map(|f| f.number()), Some(11));
        assert!(table.find_field_by_number(4).is_none());
        assert!(table.find_field_by_number(0).is_none());
        assert!(table.find_field_by_number(12).is_none());
    }

    #[test]
    fn empty_placeholder() {
        let empty = MiniTable::empty();
        assert!(MiniTable::is_empty_placeholder(empty));
        assert!(empty.fields().is_empty());
        assert_eq!(empty.required_mask(), 0);
        assert!(empty.find_field_by_number(1).is_none());
    }
}
