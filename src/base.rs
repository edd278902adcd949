//! Message representation.
//!
//! A message is an arena allocation laid out as
//!
//! ```text
//! [ *mut Internal ][ body: hasbits | fields ... ]
//!                  ^ Message points here
//! ```
//!
//! The body layout comes from the message's [`MiniTable`]. The internal
//! area is allocated lazily the first time the message needs to keep
//! unknown bytes or extensions: unknown field bytes grow forward from the
//! start of its data, extension records grow backward from its end.

use core::ptr::NonNull;

use crate::StringView;
use crate::arena::{Arena, align_up};
use crate::mini_table::{CType, MiniTable, MiniTableExtension};

/// Opaque message body.
pub struct Object;

/// Type-erased handle to a message body.
///
/// A `Message` is a plain pointer: copying it does not copy the message, and
/// it stays valid for as long as the arena that allocated it.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Message(NonNull<Object>);

const HEADER_SIZE: usize = core::mem::size_of::<*mut Internal>();

#[repr(C)]
struct Internal {
    size: u32,
    unknown_end: u32,
    ext_begin: u32,
    _pad: u32,
}

const INTERNAL_DATA: usize = core::mem::size_of::<Internal>();
const MIN_INTERNAL_SIZE: usize = 128;

/// One extension value attached to a message.
///
/// `data` holds the value laid out as if it were a field at offset zero:
/// a scalar, a string view, or a pointer to a message or array.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Extension {
    pub(crate) ext: *const MiniTableExtension,
    pub(crate) data: [u64; 2],
}

impl Extension {
    pub fn extension(&self) -> &MiniTableExtension {
        unsafe { &*self.ext }
    }

    pub(crate) fn data_ptr(&self) -> *mut u8 {
        self.data.as_ptr() as *mut u8
    }

    /// The value slot viewed as a message body whose only field sits at
    /// offset zero, so the field accessors apply to it unchanged.
    pub(crate) fn storage(&self) -> Message {
        Message(NonNull::from(&self.data).cast::<Object>())
    }
}

/// A single field value of any type, as read from or written to a field,
/// an array element or a map entry. Enums are carried as `Int32`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageValue {
    Bool(bool),
    Float(f32),
    Double(f64),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    String(StringView),
    Message(Message),
}

impl MessageValue {
    /// The zero value of a type. Message fields have no zero value.
    pub fn default_for(ctype: CType) -> Option<MessageValue> {
        Some(match ctype {
            CType::Bool => MessageValue::Bool(false),
            CType::Float => MessageValue::Float(0.0),
            CType::Double => MessageValue::Double(0.0),
            CType::Int32 | CType::Enum => MessageValue::Int32(0),
            CType::Int64 => MessageValue::Int64(0),
            CType::UInt32 => MessageValue::UInt32(0),
            CType::UInt64 => MessageValue::UInt64(0),
            CType::String | CType::Bytes => MessageValue::String(StringView::empty()),
            CType::Message => return None,
        })
    }

    /// Reads a value of `ctype` stored at `ptr`.
    ///
    /// # Safety
    /// `ptr` must point at a slot holding a value of that type.
    pub(crate) unsafe fn read(ptr: *const u8, ctype: CType) -> Option<MessageValue> {
        unsafe {
            Some(match ctype {
                CType::Bool => MessageValue::Bool(ptr.read() != 0),
                CType::Float => MessageValue::Float(ptr.cast::<f32>().read_unaligned()),
                CType::Double => MessageValue::Double(ptr.cast::<f64>().read_unaligned()),
                CType::Int32 | CType::Enum => MessageValue::Int32(ptr.cast::<i32>().read_unaligned()),
                CType::Int64 => MessageValue::Int64(ptr.cast::<i64>().read_unaligned()),
                CType::UInt32 => MessageValue::UInt32(ptr.cast::<u32>().read_unaligned()),
                CType::UInt64 => MessageValue::UInt64(ptr.cast::<u64>().read_unaligned()),
                CType::String | CType::Bytes => MessageValue::String(ptr.cast::<StringView>().read_unaligned()),
                CType::Message => MessageValue::Message(Message::from_slot(ptr.cast::<*mut u8>().read_unaligned())?),
            })
        }
    }

    /// Stores the value at `ptr`.
    ///
    /// # Safety
    /// `ptr` must point at a slot large enough for this value's type.
    pub(crate) unsafe fn write(self, ptr: *mut u8) {
        unsafe {
            match self {
                MessageValue::Bool(v) => ptr.write(v as u8),
                MessageValue::Float(v) => ptr.cast::<f32>().write_unaligned(v),
                MessageValue::Double(v) => ptr.cast::<f64>().write_unaligned(v),
                MessageValue::Int32(v) => ptr.cast::<i32>().write_unaligned(v),
                MessageValue::Int64(v) => ptr.cast::<i64>().write_unaligned(v),
                MessageValue::UInt32(v) => ptr.cast::<u32>().write_unaligned(v),
                MessageValue::UInt64(v) => ptr.cast::<u64>().write_unaligned(v),
                MessageValue::String(v) => ptr.cast::<StringView>().write_unaligned(v),
                MessageValue::Message(m) => ptr.cast::<*mut u8>().write_unaligned(m.as_ptr()),
            }
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            MessageValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            MessageValue::Int32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            MessageValue::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            MessageValue::UInt32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            MessageValue::UInt64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            MessageValue::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            MessageValue::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_view(&self) -> Option<StringView> {
        match *self {
            MessageValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<Message> {
        match *self {
            MessageValue::Message(m) => Some(m),
            _ => None,
        }
    }
}

impl Message {
    /// Allocates a zeroed message for `table` in `arena`.
    pub fn new(table: &MiniTable, arena: &Arena<'_>) -> Option<Message> {
        let size = HEADER_SIZE + table.size();
        let raw = arena.malloc_zeroed(size)?;
        let body = unsafe { raw.as_ptr().add(HEADER_SIZE) };
        NonNull::new(body.cast::<Object>()).map(Message)
    }

    /// Wraps a body pointer stored in a message slot; null means "not set".
    #[inline(always)]
    pub(crate) fn from_slot(ptr: *mut u8) -> Option<Message> {
        NonNull::new(ptr.cast::<Object>()).map(Message)
    }

    #[inline(always)]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr().cast::<u8>()
    }

    #[inline(always)]
    pub(crate) fn ptr_at<T>(self, offset: usize) -> *mut T {
        unsafe { self.as_ptr().add(offset).cast::<T>() }
    }

    #[inline(always)]
    pub(crate) fn get<T: Copy>(self, offset: usize) -> T {
        unsafe { self.ptr_at::<T>(offset).read_unaligned() }
    }

    #[inline(always)]
    pub(crate) fn set<T>(self, offset: usize, val: T) {
        unsafe { self.ptr_at::<T>(offset).write_unaligned(val) }
    }

    #[inline(always)]
    pub(crate) fn has_bit(self, index: u16) -> bool {
        self.get::<u8>(index as usize / 8) & (1 << (index % 8)) != 0
    }

    #[inline(always)]
    pub(crate) fn set_has_bit(self, index: u16) {
        let byte = self.ptr_at::<u8>(index as usize / 8);
        unsafe { *byte |= 1 << (index % 8) };
    }

    #[inline(always)]
    pub(crate) fn clear_has_bit(self, index: u16) {
        let byte = self.ptr_at::<u8>(index as usize / 8);
        unsafe { *byte &= !(1 << (index % 8)) };
    }

    #[inline(always)]
    pub(crate) fn oneof_case(self, case_offset: usize) -> u32 {
        self.get::<u32>(case_offset)
    }

    #[inline(always)]
    pub(crate) fn set_oneof_case(self, case_offset: usize, number: u32) {
        self.set::<u32>(case_offset, number)
    }

    /// The first 64 hasbits as one word, for required-field checks.
    pub(crate) fn hasbit_word(self, table: &MiniTable) -> u64 {
        let mut bytes = [0u8; 8];
        let n = table.size().min(8);
        unsafe { core::ptr::copy_nonoverlapping(self.as_ptr(), bytes.as_mut_ptr(), n) };
        u64::from_le_bytes(bytes)
    }

    fn internal_slot(self) -> *mut *mut Internal {
        unsafe { self.as_ptr().sub(HEADER_SIZE).cast::<*mut Internal>() }
    }

    fn internal(self) -> Option<&'static mut Internal> {
        unsafe { self.internal_slot().read().as_mut() }
    }

    fn internal_base(internal: &Internal) -> *mut u8 {
        internal as *const Internal as *mut u8
    }

    /// Zeroes the body and forgets unknown fields and extensions.
    pub fn clear(self, table: &MiniTable) {
        unsafe { core::ptr::write_bytes(self.as_ptr(), 0, table.size()) };
        if let Some(internal) = self.internal() {
            internal.unknown_end = INTERNAL_DATA as u32;
            internal.ext_begin = internal.size;
        }
    }

    /// Makes room for `need` more bytes between the unknown data and the
    /// extension records.
    fn reserve(self, need: usize, arena: &Arena<'_>) -> Option<&'static mut Internal> {
        match self.internal() {
            None => {
                let size = align_up((INTERNAL_DATA + need).max(MIN_INTERNAL_SIZE), 8);
                let raw = arena.malloc(size)?.cast::<Internal>();
                unsafe {
                    raw.as_ptr().write(Internal {
                        size: size as u32,
                        unknown_end: INTERNAL_DATA as u32,
                        ext_begin: size as u32,
                        _pad: 0,
                    });
                    self.internal_slot().write(raw.as_ptr());
                    Some(&mut *raw.as_ptr())
                }
            }
            Some(internal) => {
                let free = (internal.ext_begin - internal.unknown_end) as usize;
                if free >= need {
                    return Some(internal);
                }
                let old_size = internal.size as usize;
                let new_size = align_up((old_size + need).next_power_of_two(), 8);
                if new_size > u32::MAX as usize {
                    return None;
                }
                let ext_bytes = old_size - internal.ext_begin as usize;
                let old = NonNull::new(Self::internal_base(internal))?;
                let raw = arena.realloc(Some(old), old_size, new_size)?;
                unsafe {
                    let fresh = &mut *raw.as_ptr().cast::<Internal>();
                    let new_ext_begin = new_size - ext_bytes;
                    core::ptr::copy(
                        raw.as_ptr().add(fresh.ext_begin as usize),
                        raw.as_ptr().add(new_ext_begin),
                        ext_bytes,
                    );
                    fresh.ext_begin = new_ext_begin as u32;
                    fresh.size = new_size as u32;
                    self.internal_slot().write(fresh);
                    Some(fresh)
                }
            }
        }
    }

    /// Appends raw wire bytes to the unknown field storage.
    pub fn add_unknown(self, bytes: &[u8], arena: &Arena<'_>) -> bool {
        if bytes.is_empty() {
            return true;
        }
        let Some(internal) = self.reserve(bytes.len(), arena) else {
            return false;
        };
        unsafe {
            let dst = Self::internal_base(internal).add(internal.unknown_end as usize);
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        internal.unknown_end += bytes.len() as u32;
        true
    }

    /// All unknown field bytes, in the order they were added.
    ///
    /// # Safety
    /// `'r` must not outlive the arena holding this message, and no unknown
    /// fields may be added or discarded while the slice is in use.
    pub unsafe fn unknown<'r>(self) -> &'r [u8] {
        match self.internal() {
            Some(internal) => unsafe {
                let start = Self::internal_base(internal).add(INTERNAL_DATA);
                core::slice::from_raw_parts(start, internal.unknown_end as usize - INTERNAL_DATA)
            },
            None => &[],
        }
    }

    pub fn has_unknown(self) -> bool {
        self.internal().is_some_and(|internal| internal.unknown_end as usize > INTERNAL_DATA)
    }

    /// Iterates the unknown data one wire-format field at a time.
    ///
    /// # Safety
    /// As for [`Message::unknown`].
    pub unsafe fn unknown_chunks<'r>(self) -> UnknownChunks<'r> {
        UnknownChunks { rest: unsafe { self.unknown() } }
    }

    /// Drops this message's unknown fields (not those of sub-messages).
    pub fn discard_unknown_shallow(self) {
        if let Some(internal) = self.internal() {
            internal.unknown_end = INTERNAL_DATA as u32;
        }
    }

    /// Extension records, most recently added first.
    ///
    /// # Safety
    /// `'r` must not outlive the arena holding this message, and no
    /// extension may be added or cleared while the slice is in use.
    pub unsafe fn extensions<'r>(self) -> &'r [Extension] {
        match self.internal() {
            Some(internal) => unsafe {
                let start = Self::internal_base(internal).add(internal.ext_begin as usize);
                let count = (internal.size - internal.ext_begin) as usize / core::mem::size_of::<Extension>();
                core::slice::from_raw_parts(start.cast::<Extension>(), count)
            },
            None => &[],
        }
    }

    pub fn extension_count(self) -> usize {
        unsafe { self.extensions() }.len()
    }

    /// Iteration helper: the extension after position `*iter`, advancing it.
    ///
    /// # Safety
    /// As for [`Message::extensions`].
    pub unsafe fn next_extension<'r>(self, iter: &mut usize) -> Option<&'r Extension> {
        let ext = unsafe { self.extensions() }.get(*iter)?;
        *iter += 1;
        Some(ext)
    }

    pub(crate) fn find_extension(self, ext: &MiniTableExtension) -> Option<&'static mut Extension> {
        let exts = unsafe { self.extensions() };
        let i = exts.iter().position(|e| core::ptr::eq(e.ext, ext))?;
        unsafe { Some(&mut *(exts.as_ptr().add(i) as *mut Extension)) }
    }

    /// Finds the record for `ext`, appending a zeroed one if needed.
    pub(crate) fn get_or_create_extension(
        self,
        ext: &MiniTableExtension,
        arena: &Arena<'_>,
    ) -> Option<&'static mut Extension> {
        if let Some(found) = self.find_extension(ext) {
            return Some(found);
        }
        let record = core::mem::size_of::<Extension>();
        let internal = self.reserve(record, arena)?;
        internal.ext_begin -= record as u32;
        unsafe {
            let slot = Self::internal_base(internal)
                .add(internal.ext_begin as usize)
                .cast::<Extension>();
            slot.write(Extension {
                ext,
                data: [0; 2],
            });
            Some(&mut *slot)
        }
    }

    /// Removes the record for `ext`, if any.
    pub fn clear_extension(self, ext: &MiniTableExtension) {
        let Some(internal) = self.internal() else {
            return;
        };
        if let Some(found) = self.find_extension(ext) {
            unsafe {
                let first = Self::internal_base(internal)
                    .add(internal.ext_begin as usize)
                    .cast::<Extension>();
                *found = first.read();
            }
            internal.ext_begin += core::mem::size_of::<Extension>() as u32;
        }
    }
}

impl core::fmt::Debug for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Message({:p})", self.0)
    }
}

/// Iterator over unknown fields, yielding the complete bytes of each.
///
/// Stops early if the stored bytes do not parse as wire format.
pub struct UnknownChunks<'r> {
    rest: &'r [u8],
}

impl<'r> Iterator for UnknownChunks<'r> {
    type Item = &'r [u8];

    fn next(&mut self) -> Option<&'r [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        let len = crate::wire::field_len(self.rest, 100)?;
        let (chunk, rest) = self.rest.split_at(len);
        self.rest = rest;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_table::{FieldType, MiniTableSub};
    use crate::mini_descriptor::MtDataEncoder;

    fn table<'a>(arena: &'a Arena<'_>) -> &'a MiniTable {
        let mut e = MtDataEncoder::new();
        e.start_message(crate::mini_descriptor::message_modifier::IS_EXTENDABLE);
        e.put_field(FieldType::Int32, 1, 0);
        MiniTable::build(e.as_str(), arena).unwrap()
    }

    #[test]
    fn new_message_is_zeroed() {
        let arena = Arena::default();
        let t = table(&arena);
        let msg = Message::new(t, &arena).unwrap();
        assert!(!msg.has_bit(1));
        assert_eq!(msg.get::<i32>(t.fields()[0].offset()), 0);
        assert!(unsafe { msg.unknown() }.is_empty());
        assert_eq!(msg.extension_count(), 0);
        msg.set_has_bit(1);
        assert!(msg.has_bit(1));
        msg.clear_has_bit(1);
        assert!(!msg.has_bit(1));
    }

    #[test]
    fn unknown_bytes_grow() {
        let arena = Arena::default();
        let msg = Message::new(table(&arena), &arena).unwrap();
        let mut expected = Vec::new();
        for i in 0..100u8 {
            let field = [0x98, 0x06, i & 0x7f];
            assert!(msg.add_unknown(&field, &arena));
            expected.extend_from_slice(&field);
        }
        assert_eq!(unsafe { msg.unknown() }, &expected[..]);
        assert_eq!(unsafe { msg.unknown_chunks() }.count(), 100);
        msg.discard_unknown_shallow();
        assert!(unsafe { msg.unknown() }.is_empty());
    }

    #[test]
    fn extensions_survive_unknown_growth() {
        let arena = Arena::default();
        let t = table(&arena);
        let msg = Message::new(t, &arena).unwrap();
        let mut exts = Vec::new();
        for n in 0..3u32 {
            let mut e = MtDataEncoder::new();
            e.encode_extension(FieldType::Int64, 100 + n, 0);
            let ext = MiniTableExtension::build(e.as_str(), t, MiniTableSub::Enum(core::ptr::null()), &arena).unwrap();
            exts.push(&*ext);
        }
        for (i, ext) in exts.iter().enumerate() {
            let rec = msg.get_or_create_extension(ext, &arena).unwrap();
            rec.data[0] = i as u64 + 7;
        }
        assert!(msg.add_unknown(&[0u8; 300], &arena));
        assert_eq!(msg.extension_count(), 3);
        // Newest first.
        assert_eq!(unsafe { msg.extensions() }[0].extension().number(), 102);
        for (i, ext) in exts.iter().enumerate() {
            assert_eq!(msg.find_extension(ext).unwrap().data[0], i as u64 + 7);
        }
        msg.clear_extension(exts[1]);
        assert_eq!(msg.extension_count(), 2);
        assert!(msg.find_extension(exts[1]).is_none());
        assert_eq!(msg.find_extension(exts[0]).unwrap().data[0], 7);
        assert_eq!(unsafe { msg.unknown() }.len(), 300);
    }
}
