use super::{MiniTable, MiniTableEnum, MiniTableField, MiniTableSub};

/// Layout of an extension field together with the message it extends.
///
/// The field's offset is always zero: extension values are stored in a
/// record of their own rather than in the extendee's body.
#[repr(C)]
#[derive(Debug)]
pub struct MiniTableExtension {
    pub(crate) field: MiniTableField,
    pub(crate) extendee: *const MiniTable,
    pub(crate) sub: MiniTableSub,
}

unsafe impl Send for MiniTableExtension {}
unsafe impl Sync for MiniTableExtension {}

impl MiniTableExtension {
    pub fn field(&self) -> &MiniTableField {
        &self.field
    }

    pub fn number(&self) -> u32 {
        self.field.number
    }

    pub fn extendee(&self) -> &MiniTable {
        unsafe { &*self.extendee }
    }

    pub(crate) fn extendee_ptr(&self) -> *const MiniTable {
        self.extendee
    }

    pub fn sub_message(&self) -> Option<&MiniTable> {
        match self.sub {
            MiniTableSub::Message(t) if !t.is_null() && !MiniTable::is_empty_placeholder(t) => Some(unsafe { &*t }),
            _ => None,
        }
    }

    pub(crate) fn sub_message_raw(&self) -> &MiniTable {
        match self.sub {
            MiniTableSub::Message(t) if !t.is_null() => unsafe { &*t },
            _ => MiniTable::empty(),
        }
    }

    pub fn sub_enum(&self) -> Option<&MiniTableEnum> {
        match self.sub {
            MiniTableSub::Enum(e) if !e.is_null() => Some(unsafe { &*e }),
            _ => None,
        }
    }

    /// Points a message-typed extension at its message table.
    pub fn set_sub_message(&mut self, sub: *const MiniTable) -> bool {
        if !self.field.is_sub_message() {
            return false;
        }
        self.sub = MiniTableSub::Message(sub);
        true
    }

    pub fn set_sub_enum(&mut self, sub: *const MiniTableEnum) -> bool {
        if !self.field.is_closed_enum() {
            return false;
        }
        self.sub = MiniTableSub::Enum(sub);
        true
    }
}
