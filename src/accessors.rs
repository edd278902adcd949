//! Field access by [`MiniTableField`].
//!
//! These are the building blocks every other layer uses: the decoder and
//! encoder, reflection, JSON and the binding surface all read and write
//! message bodies through here.

use crate::StringView;
use crate::arena::Arena;
use crate::array::Array;
use crate::base::{Message, MessageValue};
use crate::map::Map;
use crate::mini_table::{FieldRep, MiniTable, MiniTableExtension, MiniTableField};

fn slot_is_zero(ptr: *const u8, rep: FieldRep) -> bool {
    unsafe {
        match rep {
            FieldRep::OneByte => ptr.read() == 0,
            FieldRep::FourByte => ptr.cast::<u32>().read_unaligned() == 0,
            FieldRep::EightByte => ptr.cast::<u64>().read_unaligned() == 0,
            FieldRep::StringView => ptr.cast::<StringView>().read_unaligned().is_empty(),
        }
    }
}

macro_rules! typed_accessors {
    ($($get:ident, $set:ident, $t:ty, $variant:ident;)*) => {
        $(
            pub fn $get(self, field: &MiniTableField, default: $t) -> $t {
                match self.get_field_or(field, MessageValue::$variant(default)) {
                    MessageValue::$variant(v) => v,
                    _ => default,
                }
            }

            pub fn $set(self, field: &MiniTableField, val: $t) {
                self.set_field(field, MessageValue::$variant(val));
            }
        )*
    };
}

impl Message {
    #[inline(always)]
    fn slot(self, field: &MiniTableField) -> *mut u8 {
        self.ptr_at::<u8>(field.offset())
    }

    /// Whether a field is set.
    ///
    /// Fields with explicit presence consult their hasbit or oneof case;
    /// repeated fields and maps are set when non-empty; other fields when
    /// their value differs from zero.
    pub fn has_field(self, field: &MiniTableField) -> bool {
        if let Some(bit) = field.hasbit() {
            return self.has_bit(bit);
        }
        if let Some(case) = field.oneof_case_offset() {
            return self.oneof_case(case) == field.number();
        }
        if field.is_array() {
            return unsafe { self.get_array(field) }.is_some_and(|a| !a.is_empty());
        }
        if field.is_map() {
            return unsafe { self.get_map(field) }.is_some_and(|m| !m.is_empty());
        }
        !slot_is_zero(self.slot(field), field.rep())
    }

    /// Resets a field to its zero state and drops its presence.
    pub fn clear_field(self, field: &MiniTableField) {
        if let Some(case) = field.oneof_case_offset() {
            if self.oneof_case(case) != field.number() {
                return;
            }
            self.set_oneof_case(case, 0);
        }
        if let Some(bit) = field.hasbit() {
            self.clear_has_bit(bit);
        }
        unsafe { core::ptr::write_bytes(self.slot(field), 0, field.rep().size()) };
    }

    /// Number of the oneof arm that is set, for the oneof containing `field`.
    pub fn which_oneof(self, field: &MiniTableField) -> Option<u32> {
        let case = field.oneof_case_offset()?;
        match self.oneof_case(case) {
            0 => None,
            n => Some(n),
        }
    }

    #[inline(always)]
    pub(crate) fn set_presence(self, field: &MiniTableField) {
        if let Some(bit) = field.hasbit() {
            self.set_has_bit(bit);
        } else if let Some(case) = field.oneof_case_offset() {
            self.set_oneof_case(case, field.number());
        }
    }

    /// Current value of a singular field. An unset oneof arm reads as zero,
    /// an unset message field as `None`.
    pub fn get_field(self, field: &MiniTableField) -> Option<MessageValue> {
        if !field.is_scalar() {
            return None;
        }
        if let Some(case) = field.oneof_case_offset() {
            if self.oneof_case(case) != field.number() {
                return MessageValue::default_for(field.ctype());
            }
        }
        unsafe { MessageValue::read(self.slot(field), field.ctype()) }
    }

    /// Like [`get_field`](Self::get_field), with `default` for fields that
    /// track presence and are not set.
    pub fn get_field_or(self, field: &MiniTableField, default: MessageValue) -> MessageValue {
        if field.has_presence() && !self.has_field(field) {
            return default;
        }
        self.get_field(field).unwrap_or(default)
    }

    /// Stores a singular value and marks the field present. Setting a oneof
    /// arm replaces whatever arm was set before.
    pub fn set_field(self, field: &MiniTableField, val: MessageValue) {
        debug_assert!(field.is_scalar());
        if let Some(case) = field.oneof_case_offset() {
            if self.oneof_case(case) != field.number() {
                unsafe { core::ptr::write_bytes(self.slot(field), 0, field.rep().size()) };
            }
        }
        unsafe { val.write(self.slot(field)) };
        self.set_presence(field);
    }

    typed_accessors! {
        get_bool, set_bool, bool, Bool;
        get_i32, set_i32, i32, Int32;
        get_u32, set_u32, u32, UInt32;
        get_i64, set_i64, i64, Int64;
        get_u64, set_u64, u64, UInt64;
        get_f32, set_f32, f32, Float;
        get_f64, set_f64, f64, Double;
        get_string, set_string, StringView, String;
    }

    pub fn get_message(self, field: &MiniTableField) -> Option<Message> {
        self.get_field(field)?.as_message()
    }

    pub fn set_message(self, field: &MiniTableField, sub: Message) {
        self.set_field(field, MessageValue::Message(sub));
    }

    /// Returns the sub-message in `field`, creating an empty one from `sub`
    /// if the field is unset.
    pub(crate) fn get_or_create_message_with(
        self,
        field: &MiniTableField,
        sub: &MiniTable,
        arena: &Arena<'_>,
    ) -> Option<Message> {
        if let Some(case) = field.oneof_case_offset() {
            if self.oneof_case(case) != field.number() {
                self.set::<*mut u8>(field.offset(), core::ptr::null_mut());
            }
        }
        let existing = Message::from_slot(self.get::<*mut u8>(field.offset()));
        let msg = match existing {
            Some(m) => m,
            None => {
                let m = Message::new(sub, arena)?;
                self.set::<*mut u8>(field.offset(), m.as_ptr());
                m
            }
        };
        self.set_presence(field);
        Some(msg)
    }

    /// Mutable access to a sub-message, creating it if needed. Fails if the
    /// field's sub-table has not been linked.
    pub fn get_or_create_message(self, table: &MiniTable, field: &MiniTableField, arena: &Arena<'_>) -> Option<Message> {
        let sub = table.sub_message(field)?;
        self.get_or_create_message_with(field, sub, arena)
    }

    /// The array stored in a repeated field, if one was created.
    ///
    /// # Safety
    /// `'r` must not outlive the arena holding this message, and no mutable
    /// reference to the same array may be live while the result is used.
    pub unsafe fn get_array<'r>(self, field: &MiniTableField) -> Option<&'r Array> {
        unsafe { self.get::<*const Array>(field.offset()).as_ref() }
    }

    /// Mutable access to the array stored in a repeated field.
    ///
    /// Every copy of a [`Message`] can reach the same array, so this is not
    /// callable from safe code:
    ///
    /// ```compile_fail
    /// # use miniproto::{Arena, Message};
    /// # use miniproto::test_utils::test_pool;
    /// # let pool = test_pool().unwrap();
    /// # let def = pool.find_message_by_name("miniproto.test.TestAllTypes").unwrap();
    /// # let field = def.find_field_by_name("rep_i32").unwrap().mini_table_field();
    /// let arena = Arena::default();
    /// let msg = Message::new(def.mini_table(), &arena).unwrap();
    /// // Handing out `&mut Array` from a copyable handle needs `unsafe`.
    /// let array = msg.get_mutable_array(field);
    /// ```
    ///
    /// [`DynamicMessage`](crate::DynamicMessage) is the safe route.
    ///
    /// # Safety
    /// As for [`Message::get_array`], and the result must be the only live
    /// reference to the array.
    pub unsafe fn get_mutable_array<'r>(self, field: &MiniTableField) -> Option<&'r mut Array> {
        unsafe { self.get::<*mut Array>(field.offset()).as_mut() }
    }

    /// # Safety
    /// As for [`Message::get_mutable_array`]; `arena` must be the message's
    /// arena or one fused with it.
    pub unsafe fn get_or_create_array<'r>(self, field: &MiniTableField, arena: &Arena<'_>) -> Option<&'r mut Array> {
        debug_assert!(field.is_array());
        if let Some(array) = unsafe { self.get_mutable_array(field) } {
            return Some(array);
        }
        let array: *mut Array = Array::with_lg2(arena, 0, field.elem_size_lg2())?;
        self.set::<*mut Array>(field.offset(), array);
        unsafe { array.as_mut() }
    }

    /// # Safety
    /// As for [`Message::get_array`].
    pub unsafe fn get_map<'r>(self, field: &MiniTableField) -> Option<&'r Map> {
        unsafe { self.get::<*const Map>(field.offset()).as_ref() }
    }

    /// # Safety
    /// As for [`Message::get_mutable_array`].
    pub unsafe fn get_mutable_map<'r>(self, field: &MiniTableField) -> Option<&'r mut Map> {
        unsafe { self.get::<*mut Map>(field.offset()).as_mut() }
    }

    /// The map in `field`, created with key and value types taken from the
    /// linked map-entry table.
    ///
    /// # Safety
    /// As for [`Message::get_or_create_array`].
    pub unsafe fn get_or_create_map<'r>(
        self,
        table: &MiniTable,
        field: &MiniTableField,
        arena: &Arena<'_>,
    ) -> Option<&'r mut Map> {
        if let Some(map) = unsafe { self.get_mutable_map(field) } {
            return Some(map);
        }
        let entry = table.sub_message(field)?;
        let map = Self::new_map_for_entry(entry, arena)?;
        self.set::<*mut Map>(field.offset(), map);
        unsafe { map.as_mut() }
    }

    pub(crate) fn new_map_for_entry(entry: &MiniTable, arena: &Arena<'_>) -> Option<*mut Map> {
        let [key, val] = entry.fields() else {
            return None;
        };
        let map: *mut Map = Map::new(arena, key.ctype(), val.ctype())?;
        Some(map)
    }

    pub fn has_extension(self, ext: &MiniTableExtension) -> bool {
        self.find_extension(ext).is_some()
    }

    /// Value of a singular extension; zero (or `None` for messages) when absent.
    pub fn get_extension(self, ext: &MiniTableExtension) -> Option<MessageValue> {
        let field = ext.field();
        match self.find_extension(ext) {
            Some(rec) if field.is_scalar() => unsafe { MessageValue::read(rec.data_ptr(), field.ctype()) },
            Some(_) => None,
            None => MessageValue::default_for(field.ctype()),
        }
    }

    pub fn set_extension(self, ext: &MiniTableExtension, val: MessageValue, arena: &Arena<'_>) -> bool {
        debug_assert!(ext.field().is_scalar());
        match self.get_or_create_extension(ext, arena) {
            Some(rec) => {
                unsafe { val.write(rec.data_ptr()) };
                true
            }
            None => false,
        }
    }

    pub fn get_or_create_extension_message(self, ext: &MiniTableExtension, arena: &Arena<'_>) -> Option<Message> {
        let sub = ext.sub_message()?;
        let rec = self.get_or_create_extension(ext, arena)?;
        let slot = rec.data_ptr().cast::<*mut u8>();
        if let Some(m) = Message::from_slot(unsafe { slot.read() }) {
            return Some(m);
        }
        let m = Message::new(sub, arena)?;
        unsafe { slot.write(m.as_ptr()) };
        Some(m)
    }

    /// # Safety
    /// As for [`Message::get_array`].
    pub unsafe fn get_extension_array<'r>(self, ext: &MiniTableExtension) -> Option<&'r Array> {
        let rec = self.find_extension(ext)?;
        unsafe { rec.data_ptr().cast::<*const Array>().read().as_ref() }
    }

    /// # Safety
    /// As for [`Message::get_or_create_array`].
    pub unsafe fn get_or_create_extension_array<'r>(
        self,
        ext: &MiniTableExtension,
        arena: &Arena<'_>,
    ) -> Option<&'r mut Array> {
        let rec = self.get_or_create_extension(ext, arena)?;
        let slot = rec.data_ptr().cast::<*mut Array>();
        if let Some(array) = unsafe { slot.read().as_mut() } {
            return Some(array);
        }
        let array: *mut Array = Array::with_lg2(arena, 0, ext.field().elem_size_lg2())?;
        unsafe {
            slot.write(array);
            array.as_mut()
        }
    }
}
