//! Whole-message operations: deep copy, semantic equality, required-field
//! checks and recursive unknown-field removal.

use crate::StringView;
use crate::arena::Arena;
use crate::array::Array;
use crate::base::{Extension, Message, MessageValue};
use crate::map::{Map, MapInsertStatus};
use crate::mini_table::{CType, MiniTable, MiniTableField};

/// Where a field's sub-message table comes from.
#[derive(Clone, Copy)]
enum SubTable<'t> {
    Field(&'t MiniTable),
    Extension(Option<&'t MiniTable>),
}

impl<'t> SubTable<'t> {
    fn of(self, field: &MiniTableField) -> Option<&'t MiniTable> {
        match self {
            SubTable::Field(table) => table.sub_message(field),
            SubTable::Extension(sub) => sub,
        }
    }
}

fn clone_value(val: MessageValue, sub: Option<&MiniTable>, arena: &Arena<'_>) -> Option<MessageValue> {
    Some(match val {
        MessageValue::String(s) => MessageValue::String(StringView::copy_in(s.as_bytes(), arena)?),
        MessageValue::Message(m) => MessageValue::Message(m.deep_clone(sub?, arena)?),
        scalar => scalar,
    })
}

fn values_equal(a: MessageValue, b: MessageValue, sub: Option<&MiniTable>) -> bool {
    match (a, b) {
        (MessageValue::Float(x), MessageValue::Float(y)) => x.to_bits() == y.to_bits(),
        (MessageValue::Double(x), MessageValue::Double(y)) => x.to_bits() == y.to_bits(),
        (MessageValue::Message(x), MessageValue::Message(y)) => match sub {
            Some(sub) => x.compare(y, sub),
            None => x == y,
        },
        (x, y) => x == y,
    }
}

fn map_value_table(entry: Option<&MiniTable>) -> Option<&MiniTable> {
    let entry = entry?;
    entry.sub_message(entry.fields().get(1)?)
}

fn clone_array(src: &Array, ctype: CType, sub: Option<&MiniTable>, arena: &Arena<'_>) -> Option<*mut Array> {
    let dst = Array::with_lg2(arena, src.size(), src.elem_size_lg2())?;
    for val in src.iter(ctype) {
        if !dst.append(clone_value(val, sub, arena)?, arena) {
            return None;
        }
    }
    Some(dst)
}

fn clone_map(src: &Map, entry: Option<&MiniTable>, arena: &Arena<'_>) -> Option<*mut Map> {
    let dst = Map::new(arena, src.key_type(), src.value_type())?;
    let val_table = map_value_table(entry);
    for (k, v) in src.iter() {
        let v = clone_value(v, val_table, arena)?;
        if dst.set(k, v, arena) == MapInsertStatus::OutOfMemory {
            return None;
        }
    }
    Some(dst)
}

fn arrays_equal(a: Option<&Array>, b: Option<&Array>, ctype: CType, sub: Option<&MiniTable>) -> bool {
    let len = |x: Option<&Array>| x.map_or(0, |x| x.size());
    if len(a) != len(b) {
        return false;
    }
    match (a, b) {
        (Some(a), Some(b)) => a.iter(ctype).zip(b.iter(ctype)).all(|(x, y)| values_equal(x, y, sub)),
        _ => true,
    }
}

fn maps_equal(a: Option<&Map>, b: Option<&Map>, entry: Option<&MiniTable>) -> bool {
    let len = |x: Option<&Map>| x.map_or(0, |x| x.len());
    if len(a) != len(b) {
        return false;
    }
    let (Some(a), Some(b)) = (a, b) else {
        return true;
    };
    let val_table = map_value_table(entry);
    a.iter()
        .all(|(k, v)| b.get(k).is_some_and(|w| values_equal(v, w, val_table)))
}

/// Copies the contents of `field` from `src` into `dst`, whose body already
/// holds a bytewise copy of `src`'s.
fn deep_copy_field(
    dst: Message,
    src: Message,
    field: &MiniTableField,
    subs: SubTable<'_>,
    arena: &Arena<'_>,
) -> Option<()> {
    if field.is_map() {
        if let Some(map) = unsafe { src.get_map(field) } {
            let copy = clone_map(map, subs.of(field), arena)?;
            dst.set::<*mut Map>(field.offset(), copy);
        }
    } else if field.is_array() {
        if let Some(array) = unsafe { src.get_array(field) } {
            let copy = clone_array(array, field.ctype(), subs.of(field), arena)?;
            dst.set::<*mut Array>(field.offset(), copy);
        }
    } else if field
        .oneof_case_offset()
        .is_some_and(|case| src.oneof_case(case) != field.number())
    {
        // The slot belongs to another arm.
    } else if let Some(val) = src.get_field(field) {
        if matches!(val, MessageValue::String(_) | MessageValue::Message(_)) {
            let copy = clone_value(val, subs.of(field), arena)?;
            unsafe { copy.write(dst.ptr_at::<u8>(field.offset())) };
        }
    }
    Some(())
}

fn fields_equal(a: Message, b: Message, field: &MiniTableField, subs: SubTable<'_>) -> bool {
    let sub = subs.of(field);
    if field.is_map() {
        return maps_equal(unsafe { a.get_map(field) }, unsafe { b.get_map(field) }, sub);
    }
    if field.is_array() {
        return arrays_equal(unsafe { a.get_array(field) }, unsafe { b.get_array(field) }, field.ctype(), sub);
    }
    let has = a.has_field(field);
    if has != b.has_field(field) {
        return false;
    }
    if !has {
        return true;
    }
    match (a.get_field(field), b.get_field(field)) {
        (Some(x), Some(y)) => values_equal(x, y, sub),
        (x, y) => x.is_none() && y.is_none(),
    }
}

fn extension_sub<'e>(ext: &'e Extension) -> SubTable<'e> {
    SubTable::Extension(ext.extension().sub_message())
}

impl Message {
    /// Copies this message and everything reachable from it into `arena`.
    pub fn deep_clone(self, table: &MiniTable, arena: &Arena<'_>) -> Option<Message> {
        let copy = Message::new(table, arena)?;
        unsafe { core::ptr::copy_nonoverlapping(self.as_ptr(), copy.as_ptr(), table.size()) };
        for field in table.fields() {
            deep_copy_field(copy, self, field, SubTable::Field(table), arena)?;
        }
        if !copy.add_unknown(unsafe { self.unknown() }, arena) {
            return None;
        }
        // Oldest first, so the copy keeps the same order.
        for ext in unsafe { self.extensions() }.iter().rev() {
            let mini = ext.extension();
            let rec = copy.get_or_create_extension(mini, arena)?;
            rec.data = ext.data;
            deep_copy_field(rec.storage(), ext.storage(), mini.field(), extension_sub(ext), arena)?;
        }
        Some(copy)
    }

    /// Field-by-field equality, including unknown bytes and extensions.
    ///
    /// Unset fields equal unset fields, empty containers equal absent ones,
    /// and floating point values compare by bit pattern.
    pub fn compare(self, other: Message, table: &MiniTable) -> bool {
        if self == other {
            return true;
        }
        if !table
            .fields()
            .iter()
            .all(|f| fields_equal(self, other, f, SubTable::Field(table)))
        {
            return false;
        }
        if unsafe { self.unknown() } != unsafe { other.unknown() } {
            return false;
        }
        let (mine, theirs) = (unsafe { self.extensions() }, unsafe { other.extensions() });
        mine.len() == theirs.len()
            && mine.iter().all(|ext| {
                let mini = ext.extension();
                other.find_extension(mini).is_some_and(|o| {
                    fields_equal(ext.storage(), o.storage(), mini.field(), extension_sub(ext))
                })
            })
    }

    /// Whether every required field is set, here and in every sub-message.
    pub fn is_initialized(self, table: &MiniTable) -> bool {
        let mask = table.required_mask();
        if self.hasbit_word(table) & mask != mask {
            return false;
        }
        let sub_ok = |field: &MiniTableField, base: Message, subs: SubTable<'_>| -> bool {
            let Some(sub) = subs.of(field) else {
                return true;
            };
            if field.is_map() {
                let Some(val_table) = map_value_table(Some(sub)) else {
                    return true;
                };
                return unsafe { base.get_map(field) }.is_none_or(|m| {
                    m.iter()
                        .all(|(_, v)| v.as_message().is_none_or(|m| m.is_initialized(val_table)))
                });
            }
            if field.is_array() {
                return unsafe { base.get_array(field) }.is_none_or(|a| {
                    a.iter(CType::Message)
                        .all(|v| v.as_message().is_none_or(|m| m.is_initialized(sub)))
                });
            }
            if !base.has_field(field) {
                return true;
            }
            base.get_message(field).is_none_or(|m| m.is_initialized(sub))
        };
        table
            .fields()
            .iter()
            .filter(|f| f.is_sub_message())
            .all(|f| sub_ok(f, self, SubTable::Field(table)))
            && unsafe { self.extensions() }.iter().all(|ext| {
                let field = ext.extension().field();
                !field.is_sub_message() || sub_ok(field, ext.storage(), extension_sub(ext))
            })
    }

    /// Removes unknown fields from this message and all sub-messages.
    ///
    /// Returns `false` if the message tree is deeper than `max_depth`.
    pub fn discard_unknown(self, table: &MiniTable, max_depth: u32) -> bool {
        if max_depth == 0 {
            return false;
        }
        self.discard_unknown_shallow();
        let depth = max_depth - 1;
        let visit = |field: &MiniTableField, base: Message, subs: SubTable<'_>| -> bool {
            let Some(sub) = subs.of(field) else {
                return true;
            };
            if field.is_map() {
                let Some(val_table) = map_value_table(Some(sub)) else {
                    return true;
                };
                return unsafe { base.get_map(field) }.is_none_or(|m| {
                    m.iter()
                        .all(|(_, v)| v.as_message().is_none_or(|m| m.discard_unknown(val_table, depth)))
                });
            }
            if field.is_array() {
                return unsafe { base.get_array(field) }.is_none_or(|a| {
                    a.iter(CType::Message)
                        .all(|v| v.as_message().is_none_or(|m| m.discard_unknown(sub, depth)))
                });
            }
            if !base.has_field(field) {
                return true;
            }
            base.get_message(field).is_none_or(|m| m.discard_unknown(sub, depth))
        };
        table
            .fields()
            .iter()
            .filter(|f| f.is_sub_message())
            .all(|f| visit(f, self, SubTable::Field(table)))
            && unsafe { self.extensions() }.iter().all(|ext| {
                let field = ext.extension().field();
                !field.is_sub_message() || visit(field, ext.storage(), extension_sub(ext))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_descriptor::{MtDataEncoder, field_flags};
    use crate::mini_table::FieldType;

    struct Schema<'a> {
        outer: &'a MiniTable,
        inner: &'a MiniTable,
    }

    fn schema<'a>(arena: &'a Arena<'_>) -> Schema<'a> {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Int32, 1, field_flags::IS_REQUIRED);
        let inner = MiniTable::build(e.as_str(), arena).unwrap();

        let mut e = MtDataEncoder::new();
        e.encode_map(FieldType::String, FieldType::Message, 0, 0);
        let entry = MiniTable::build(e.as_str(), arena).unwrap();
        let inner_ptr = &*inner as *const MiniTable;
        unsafe { entry.link(&[inner_ptr], &[]).unwrap() };

        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::String, 1, 0);
        e.put_field(FieldType::Message, 2, 0);
        e.put_field(FieldType::Message, 3, field_flags::IS_REPEATED);
        e.put_field(FieldType::Message, 4, field_flags::IS_REPEATED);
        e.put_field(FieldType::Float, 5, 0);
        let outer = MiniTable::build(e.as_str(), arena).unwrap();
        let entry_ptr = &*entry as *const MiniTable;
        unsafe { outer.link(&[inner_ptr, inner_ptr, entry_ptr], &[]).unwrap() };
        Schema { outer, inner }
    }

    fn populate(s: &Schema<'_>, arena: &Arena<'_>) -> Message {
        let t = s.outer;
        let msg = Message::new(t, arena).unwrap();
        msg.set_string(t.field(0), StringView::from_str("name"));
        let sub = msg.get_or_create_message(t, t.field(1), arena).unwrap();
        sub.set_i32(s.inner.field(0), 5);
        let list = unsafe { msg.get_or_create_array(t.field(2), arena) }.unwrap();
        for i in 0..3 {
            let m = Message::new(s.inner, arena).unwrap();
            m.set_i32(s.inner.field(0), i);
            list.append(MessageValue::Message(m), arena);
        }
        let map = unsafe { msg.get_or_create_map(t, t.field(3), arena) }.unwrap();
        let v = Message::new(s.inner, arena).unwrap();
        v.set_i32(s.inner.field(0), 9);
        map.set(MessageValue::String(StringView::from_str("k")), MessageValue::Message(v), arena);
        msg.set_f32(t.field(4), f32::NAN);
        msg.add_unknown(&[0x98, 0x06, 0x01], arena);
        msg
    }

    #[test]
    fn clone_is_deep_and_equal() {
        let arena = Arena::default();
        let s = schema(&arena);
        let msg = populate(&s, &arena);
        let other_arena = Arena::default();
        let copy = msg.deep_clone(s.outer, &other_arena).unwrap();
        assert!(msg.compare(copy, s.outer));
        assert_ne!(
            msg.get_string(s.outer.field(0), StringView::empty()).data(),
            copy.get_string(s.outer.field(0), StringView::empty()).data()
        );
        // Mutating the copy's sub-message does not touch the original.
        let sub = copy.get_message(s.outer.field(1)).unwrap();
        sub.set_i32(s.inner.field(0), 6);
        assert!(!msg.compare(copy, s.outer));
    }

    #[test]
    fn unknown_bytes_participate_in_equality() {
        let arena = Arena::default();
        let s = schema(&arena);
        let a = populate(&s, &arena);
        let b = populate(&s, &arena);
        assert!(a.compare(b, s.outer));
        b.add_unknown(&[0x08, 0x01], &arena);
        assert!(!a.compare(b, s.outer));
        assert!(b.discard_unknown(s.outer, 100));
        a.discard_unknown_shallow();
        assert!(a.compare(b, s.outer));
    }

    #[test]
    fn required_fields_are_checked_deeply() {
        let arena = Arena::default();
        let s = schema(&arena);
        let msg = populate(&s, &arena);
        assert!(msg.is_initialized(s.outer));
        let list = unsafe { msg.get_mutable_array(s.outer.field(2)) }.unwrap();
        list.append(MessageValue::Message(Message::new(s.inner, &arena).unwrap()), &arena);
        assert!(!msg.is_initialized(s.outer));
    }

    #[test]
    fn discard_unknown_respects_depth() {
        let arena = Arena::default();
        let s = schema(&arena);
        let msg = populate(&s, &arena);
        assert!(!msg.discard_unknown(s.outer, 1));
        assert!(msg.discard_unknown(s.outer, 2));
    }
}
