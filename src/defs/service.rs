use super::{DefPool, FileDef, MessageDef};

pub(crate) struct ServiceData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) file: usize,
    pub(crate) methods: Vec<usize>,
}

pub(crate) struct MethodData {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) service: usize,
    pub(crate) input: usize,
    pub(crate) output: usize,
    pub(crate) client_streaming: bool,
    pub(crate) server_streaming: bool,
}

#[derive(Clone, Copy)]
pub struct ServiceDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) index: usize,
}

impl<'p> ServiceDef<'p> {
    fn data(&self) -> &'p ServiceData {
        &self.pool.services[self.index]
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

    pub fn methods(&self) -> impl ExactSizeIterator<Item = MethodDef<'p>> + use<'p> {
        let pool = self.pool;
        self.data().methods.iter().map(move |&index| MethodDef { pool, index })
    }

    pub fn find_method_by_name(&self, name: &str) -> Option<MethodDef<'p>> {
        self.methods().find(|m| m.name() == name)
    }
}

#[derive(Clone, Copy)]
pub struct MethodDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) index: usize,
}

impl<'p> MethodDef<'p> {
    fn data(&self) -> &'p MethodData {
        &self.pool.methods[self.index]
    }

    pub fn name(&self) -> &'p str {
        &self.data().name
    }

    pub fn full_name(&self) -> &'p str {
        &self.data().full_name
    }

    pub fn service(&self) -> ServiceDef<'p> {
        ServiceDef { pool: self.pool, index: self.data().service }
    }

    pub fn input_type(&self) -> MessageDef<'p> {
        MessageDef { pool: self.pool, index: self.data().input }
    }

    pub fn output_type(&self) -> MessageDef<'p> {
        MessageDef { pool: self.pool, index: self.data().output }
    }

    pub fn client_streaming(&self) -> bool {
        self.data().client_streaming
    }

    pub fn server_streaming(&self) -> bool {
        self.data().server_streaming
    }
}

impl core::fmt::Debug for ServiceDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("ServiceDef").field(&self.full_name()).finish()
    }
}

impl core::fmt::Debug for MethodDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("MethodDef").field(&self.full_name()).finish()
    }
}
