use super::{DefPool, FieldDef, MessageDef};

pub(crate) struct OneofData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) message: usize,
    pub(crate) fields: Vec<usize>,
    /// Wraps a single proto3 `optional` field.
    pub(crate) synthetic: bool,
}

#[derive(Clone, Copy)]
pub struct OneofDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) index: usize,
}

impl<'p> OneofDef<'p> {
    fn data(&self) -> &'p OneofData {
        &self.pool.oneofs[self.index]
    }

    pub fn name(&self) -> &'p str {
        &self.data().name
    }

    pub fn full_name(&self) -> &'p str {
        &self.data().full_name
    }

    pub fn containing_type(&self) -> MessageDef<'p> {
        MessageDef { pool: self.pool, index: self.data().message }
    }

    pub fn is_synthetic(&self) -> bool {
        self.data().synthetic
    }

    pub fn field_count(&self) -> usize {
        self.data().fields.len()
    }

    pub fn fields(&self) -> impl ExactSizeIterator<Item = FieldDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().fields.iter().map(move |&index| FieldDef { pool, index })
    }

    pub fn find_field_by_name(&self, name: &str) -> Option<FieldDef<'p>> {
        self.fields().find(|f| f.name() == name)
    }

    pub fn find_field_by_number(&self, number: u32) -> Option<FieldDef<'p>> {
        self.fields().find(|f| f.number() == number)
    }
}

impl PartialEq for OneofDef<'_> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.pool, other.pool) && self.index == other.index
    }
}

impl core::fmt::Debug for OneofDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("OneofDef").field(&self.full_name()).finish()
    }
}
