use super::field::mode_bits;
use super::{FastEntry, FieldMode, FieldType, MiniTable, MiniTableEnum, MiniTableSub};
use crate::error::{Error, Result};

impl MiniTable {
    /// Fills in the sub-tables of every message and closed enum field.
    ///
    /// `subs` are taken in field order by the message and group fields,
    /// `enums` by the closed enum fields. Both lists must match exactly.
    ///
    /// # Safety
    /// Every pointer must stay valid for as long as this table is used. Null
    /// enum tables are allowed and accept every value.
    pub unsafe fn link(&mut self, subs: &[*const MiniTable], enums: &[*const MiniTableEnum]) -> Result<()> {
        let mut msg_count = 0;
        let mut enum_count = 0;
        for index in 0..self.field_count as usize {
            let field = self.fields()[index];
            if field.is_sub_message() {
                let sub = *subs
                    .get(msg_count)
                    .ok_or_else(|| Error::MiniTable("too few sub-message tables to link".to_string()))?;
                msg_count += 1;
                if !unsafe { self.set_sub_message(index, sub) } {
                    return Err(Error::MiniTable(format!(
                        "cannot link sub-message of field {}",
                        field.number()
                    )));
                }
            }
        }
        for index in 0..self.field_count as usize {
            let field = self.fields()[index];
            if field.is_closed_enum() {
                let sub = *enums
                    .get(enum_count)
                    .ok_or_else(|| Error::MiniTable("too few enum tables to link".to_string()))?;
                enum_count += 1;
                self.set_sub_enum(index, sub);
            }
        }
        if msg_count != subs.len() || enum_count != enums.len() {
            return Err(Error::MiniTable("too many sub-tables to link".to_string()));
        }
        self.refresh_fasttable();
        Ok(())
    }

    /// Links one message or group field. A repeated message field whose
    /// sub-table is a map entry becomes a map field.
    ///
    /// # Safety
    /// `sub` must be non-null and outlive this table.
    pub unsafe fn set_sub_message(&mut self, field_index: usize, sub: *const MiniTable) -> bool {
        if sub.is_null() || field_index >= self.field_count as usize {
            return false;
        }
        let table_is_map = self.is_map_entry();
        let sub_is_map = if core::ptr::eq(sub, self) {
            table_is_map
        } else {
            unsafe { (*sub).is_map_entry() }
        };
        let field = unsafe { &mut *self.fields.add(field_index) };
        if !field.is_sub_message() {
            return false;
        }
        if sub_is_map {
            if table_is_map || !field.is_array() || field.descriptor_type() != FieldType::Message {
                return false;
            }
            field.mode = (field.mode & !mode_bits::MODE_MASK) | FieldMode::Map as u8;
        }
        let index = field.submsg_index as usize;
        if index >= self.sub_count as usize {
            return false;
        }
        unsafe { *self.subs.add(index) = MiniTableSub::Message(sub) };
        self.refresh_fasttable();
        true
    }

    pub fn set_sub_enum(&mut self, field_index: usize, sub: *const MiniTableEnum) -> bool {
        let Some(field) = self.fields().get(field_index).copied() else {
            return false;
        };
        if !field.is_closed_enum() || field.submsg_index as usize >= self.sub_count as usize {
            return false;
        }
        unsafe { *self.subs.add(field.submsg_index as usize) = MiniTableSub::Enum(sub) };
        true
    }

    /// Recomputes the fast dispatch slots. Only fields numbered 1 to 15 get a
    /// slot; sub-message fields only once they are linked.
    pub(crate) fn refresh_fasttable(&mut self) {
        if self.fasttable.is_null() {
            return;
        }
        let len = self.fasttable().len();
        for slot in 0..len {
            unsafe { *self.fasttable.add(slot) = FastEntry::EMPTY };
        }
        for (index, field) in self.fields().iter().enumerate() {
            let number = field.number() as usize;
            if number == 0 || number >= len {
                continue;
            }
            if let Some((tag, parser)) = crate::fast_decode::select_parser(self, field) {
                let entry = FastEntry {
                    tag,
                    field_index: index as u16,
                    parser: Some(parser),
                };
                unsafe { *self.fasttable.add(number) = entry };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::mini_descriptor::{MtDataEncoder, field_flags};

    #[test]
    fn links_messages_and_maps() {
        let arena = Arena::default();
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Message, 1, 0);
        e.put_field(FieldType::Message, 2, field_flags::IS_REPEATED);
        e.put_field(FieldType::Enum, 3, field_flags::IS_CLOSED_ENUM);
        let parent = MiniTable::build(e.as_str(), &arena).unwrap();
        let mut e = MtDataEncoder::new();
        e.encode_map(FieldType::Int32, FieldType::Int32, 0, 0);
        let entry = MiniTable::build(e.as_str(), &arena).unwrap() as *const MiniTable;
        let enum_table = MiniTableEnum::build("!#", &arena).unwrap() as *const MiniTableEnum;

        let self_ptr = &*parent as *const MiniTable;
        unsafe { parent.link(&[self_ptr, entry], &[enum_table]).unwrap() };
        assert!(parent.fields()[1].is_map());
        assert!(core::ptr::eq(parent.sub_message(&parent.fields()[0]).unwrap(), self_ptr));
        assert!(parent.sub_enum(&parent.fields()[2]).is_some());
        assert!(!parent.fasttable().is_empty());
        assert!(parent.fasttable()[1].parser.is_some());
    }

    #[test]
    fn link_count_mismatch() {
        let arena = Arena::default();
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Message, 1, 0);
        let t = MiniTable::build(e.as_str(), &arena).unwrap();
        assert!(unsafe { t.link(&[], &[]) }.is_err());
        let other = MiniTable::empty() as *const MiniTable;
        assert!(unsafe { t.link(&[other, other], &[]) }.is_err());
    }

    #[test]
    fn map_entry_cannot_be_singular() {
        let arena = Arena::default();
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Message, 1, 0);
        let t = MiniTable::build(e.as_str(), &arena).unwrap();
        let mut e = MtDataEncoder::new();
        e.encode_map(FieldType::Int32, FieldType::Int32, 0, 0);
        let entry = MiniTable::build(e.as_str(), &arena).unwrap() as *const MiniTable;
        assert!(!unsafe { t.set_sub_message(0, entry) });
    }
}
