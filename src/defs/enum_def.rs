use super::{DefPool, FileDef, MessageDef};
use crate::defs::descriptor::EnumReservedRange;
use crate::mini_table::MiniTableEnum;

pub(crate) struct EnumData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) file: usize,
    pub(crate) containing: Option<usize>,
    pub(crate) values: Vec<usize>,
    pub(crate) reserved_ranges: Vec<EnumReservedRange>,
    pub(crate) reserved_names: Vec<String>,
    /// Unknown numbers are rejected (proto2 semantics).
    pub(crate) closed: bool,
    pub(crate) table: *const MiniTableEnum,
}

pub(crate) struct EnumValueData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) number: i32,
    pub(crate) enum_index: usize,
}

#[derive(Clone, Copy)]
pub struct EnumDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) index: usize,
}

impl<'p> EnumDef<'p> {
    fn data(&self) -> &'p EnumData {
        &self.pool.enums[self.index]
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

    pub fn containing_type(&self) -> Option<MessageDef<'p>> {
        let pool = self.pool;
        self.data().containing.map(|index| MessageDef { pool, index })
    }

    pub fn is_closed(&self) -> bool {
        self.data().closed
    }

    pub fn value_count(&self) -> usize {
        self.data().values.len()
    }

    /// Values in declaration order.
    pub fn values(&self) -> impl ExactSizeIterator<Item = EnumValueDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().values.iter().map(move |&index| EnumValueDef { pool, index })
    }

    /// The first declared value, which is the default of fields of this type.
    pub fn default_value(&self) -> i32 {
        self.values().next().map_or(0, |v| v.number())
    }

    pub fn find_value_by_name(&self, name: &str) -> Option<EnumValueDef<'p>> {
        self.values().find(|v| v.name() == name)
    }

    /// The first declared value with this number; aliases are skipped.
    pub fn find_value_by_number(&self, number: i32) -> Option<EnumValueDef<'p>> {
        self.values().find(|v| v.number() == number)
    }

    pub fn reserved_ranges(&self) -> &'p [EnumReservedRange] {
        &self.data().reserved_ranges
    }

    pub fn reserved_names(&self) -> &'p [String] {
        &self.data().reserved_names
    }

    pub fn mini_table(&self) -> &'p MiniTableEnum {
        // Safety: the table lives in the pool's arena.
        unsafe { &*self.data().table }
    }

    pub fn check_value(&self, number: i32) -> bool {
        !self.is_closed() || self.mini_table().check_value(number as u32)
    }
}

#[derive(Clone, Copy)]
pub struct EnumValueDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) index: usize,
}

impl<'p> EnumValueDef<'p> {
    fn data(&self) -> &'p EnumValueData {
        &self.pool.enum_values[self.index]
    }

    pub fn name(&self) -> &'p str {
        &self.data().name
    }

    /// Values live in the scope that encloses their enum.
    pub fn full_name(&self) -> &'p str {
        &self.data().full_name
    }

    pub fn number(&self) -> i32 {
        self.data().number
    }

    pub fn enum_type(&self) -> EnumDef<'p> {
        EnumDef { pool: self.pool, index: self.data().enum_index }
    }
}

impl PartialEq for EnumDef<'_> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.pool, other.pool) && self.index == other.index
    }
}

impl core::fmt::Debug for EnumDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("EnumDef").field(&self.full_name()).finish()
    }
}

impl core::fmt::Debug for EnumValueDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} = {}", self.full_name(), self.number())
    }
}
