use super::{DefPool, EnumDef, FieldDef, MessageDef, ServiceDef};

/// Source syntax of a `.proto` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Proto2,
    Proto3,
}

impl Syntax {
    pub(crate) fn parse(s: &str) -> Option<Syntax> {
        match s {
            "" | "proto2" => Some(Syntax::Proto2),
            "proto3" => Some(Syntax::Proto3),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
        }
    }
}

pub(crate) struct FileData {
    pub(crate) name: String,
    pub(crate) package: String,
    pub(crate) syntax: Syntax,
    pub(crate) dependencies: Vec<usize>,
    pub(crate) public_dependencies: Vec<usize>,
    pub(crate) messages: Vec<usize>,
    pub(crate) enums: Vec<usize>,
    pub(crate) extensions: Vec<usize>,
    pub(crate) services: Vec<usize>,
}

/// A file added to a [`DefPool`].
#[derive(Clone, Copy)]
pub struct FileDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) index: usize,
}

impl<'p> FileDef<'p> {
    fn data(&self) -> &'p FileData {
        &self.pool.files[self.index]
    }

    pub fn name(&self) -> &'p str {
        &self.data().name
    }

    pub fn package(&self) -> &'p str {
        &self.data().package
    }

    pub fn syntax(&self) -> Syntax {
        self.data().syntax
    }

    pub fn pool(&self) -> &'p DefPool {
        self.pool
    }

    pub fn dependencies(&self) -> impl ExactSizeIterator<Item = FileDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().dependencies.iter().map(move |&index| FileDef { pool, index })
    }

    pub fn public_dependencies(&self) -> impl ExactSizeIterator<Item = FileDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().public_dependencies.iter().map(move |&index| FileDef { pool, index })
    }

    /// Top-level messages in declaration order.
    pub fn messages(&self) -> impl ExactSizeIterator<Item = MessageDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().messages.iter().map(move |&index| MessageDef { pool, index })
    }

    pub fn enums(&self) -> impl ExactSizeIterator<Item = EnumDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().enums.iter().map(move |&index| EnumDef { pool, index })
    }

    /// Top-level extensions in declaration order.
    pub fn extensions(&self) -> impl ExactSizeIterator<Item = FieldDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().extensions.iter().map(move |&index| FieldDef { pool, index })
    }

    pub fn services(&self) -> impl ExactSizeIterator<Item = ServiceDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().services.iter().map(move |&index| ServiceDef { pool, index })
    }
}

impl PartialEq for FileDef<'_> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.pool, other.pool) && self.index == other.index
    }
}

impl core::fmt::Debug for FileDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("FileDef").field(&self.name()).finish()
    }
}
