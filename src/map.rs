//! Map fields.
//!
//! A [`Map`] is a [`StrTable`] whose keys are the raw bytes of the map key:
//! string keys verbatim, scalar keys as their little-endian in-memory bytes.
//! Values are packed into the table's 64-bit slot. Scalars are stored as their
//! bits, messages as their body pointer, and strings as a pointer to an
//! arena-held [`StringView`].

use core::cmp::Ordering;

use crate::StringView;
use crate::arena::Arena;
use crate::base::{Message, MessageValue};
use crate::hash::{StrTable, StrTableIter, TableValue};
use crate::mini_table::CType;

/// Result of [`Map::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapInsertStatus {
    Inserted,
    Replaced,
    OutOfMemory,
}

pub struct Map {
    // Zero for string-like keys, otherwise the in-memory size.
    key_size: u8,
    key_type: CType,
    val_type: CType,
    table: StrTable,
}

const fn type_size(ctype: CType) -> u8 {
    match ctype {
        CType::String | CType::Bytes => 0,
        other => 1 << other.size_lg2(),
    }
}

impl Map {
    pub fn new<'a>(arena: &'a Arena<'_>, key_type: CType, val_type: CType) -> Option<&'a mut Map> {
        let table = StrTable::new(4, arena)?;
        let raw = arena.malloc(core::mem::size_of::<Map>())?.cast::<Map>();
        unsafe {
            raw.as_ptr().write(Map {
                key_size: type_size(key_type),
                key_type,
                val_type,
                table,
            });
            Some(&mut *raw.as_ptr())
        }
    }

    pub fn key_type(&self) -> CType {
        self.key_type
    }

    pub fn value_type(&self) -> CType {
        self.val_type
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn with_key<R>(&self, key: &MessageValue, f: impl FnOnce(&[u8]) -> R) -> R {
        let mut buf = [0u8; 8];
        match *key {
            MessageValue::String(s) => f(s.as_bytes()),
            MessageValue::Message(_) => f(&[]),
            scalar => {
                unsafe { scalar.write(buf.as_mut_ptr()) };
                f(&buf[..self.key_size as usize])
            }
        }
    }

    fn key_from_bytes(&self, bytes: &[u8]) -> MessageValue {
        if self.key_size == 0 {
            return MessageValue::String(StringView::from_bytes(bytes));
        }
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        // A scalar key type never yields `None`.
        unsafe { MessageValue::read(buf.as_ptr(), self.key_type) }.unwrap_or(MessageValue::Bool(false))
    }

    fn pack_value(&self, val: MessageValue, arena: &Arena<'_>) -> Option<TableValue> {
        Some(match val {
            MessageValue::String(s) => {
                let slot = arena.malloc(core::mem::size_of::<StringView>())?.cast::<StringView>();
                unsafe { slot.as_ptr().write(s) };
                slot.as_ptr() as usize as u64
            }
            MessageValue::Message(m) => m.as_ptr() as usize as u64,
            scalar => {
                let mut bits = 0u64;
                unsafe { scalar.write((&mut bits as *mut u64).cast::<u8>()) };
                bits
            }
        })
    }

    fn unpack_value(&self, bits: TableValue) -> Option<MessageValue> {
        match self.val_type {
            CType::String | CType::Bytes => {
                let view = unsafe { (bits as usize as *const StringView).read() };
                Some(MessageValue::String(view))
            }
            CType::Message => Message::from_slot(bits as usize as *mut u8).map(MessageValue::Message),
            ctype => unsafe { MessageValue::read((&bits as *const u64).cast::<u8>(), ctype) },
        }
    }

    pub fn get(&self, key: MessageValue) -> Option<MessageValue> {
        let bits = self.with_key(&key, |k| self.table.lookup(k))?;
        self.unpack_value(bits)
    }

    pub fn contains_key(&self, key: MessageValue) -> bool {
        self.with_key(&key, |k| self.table.lookup(k).is_some())
    }

    /// Inserts or replaces the entry for `key`.
    ///
    /// String keys are copied into the arena; string values are not, so their
    /// bytes must outlive the map.
    pub fn set(&mut self, key: MessageValue, val: MessageValue, arena: &Arena<'_>) -> MapInsertStatus {
        let Some(packed) = self.pack_value(val, arena) else {
            return MapInsertStatus::OutOfMemory;
        };
        let mut buf = [0u8; 8];
        let key_bytes: &[u8] = match key {
            MessageValue::String(ref s) => s.as_bytes(),
            MessageValue::Message(_) => return MapInsertStatus::OutOfMemory,
            scalar => {
                unsafe { scalar.write(buf.as_mut_ptr()) };
                &buf[..self.key_size as usize]
            }
        };
        if let Some(slot) = self.table.lookup_mut(key_bytes) {
            *slot = packed;
            return MapInsertStatus::Replaced;
        }
        match self.table.insert(key_bytes, packed, arena) {
            Some(()) => MapInsertStatus::Inserted,
            None => MapInsertStatus::OutOfMemory,
        }
    }

    /// Removes `key`, returning its value if it was present.
    pub fn delete(&mut self, key: MessageValue) -> Option<MessageValue> {
        let mut buf = [0u8; 8];
        let key_bytes: &[u8] = match key {
            MessageValue::String(ref s) => s.as_bytes(),
            MessageValue::Message(_) => return None,
            scalar => {
                unsafe { scalar.write(buf.as_mut_ptr()) };
                &buf[..self.key_size as usize]
            }
        };
        let bits = self.table.remove(key_bytes)?;
        self.unpack_value(bits)
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn iter(&self) -> MapIter<'_> {
        MapIter {
            map: self,
            inner: self.table.iter(),
        }
    }
}

/// Numeric keys compare by value, string keys bytewise.
pub(crate) fn compare_keys(a: &MessageValue, b: &MessageValue) -> Ordering {
    match (a, b) {
        (MessageValue::Bool(x), MessageValue::Bool(y)) => x.cmp(y),
        (MessageValue::Int32(x), MessageValue::Int32(y)) => x.cmp(y),
        (MessageValue::Int64(x), MessageValue::Int64(y)) => x.cmp(y),
        (MessageValue::UInt32(x), MessageValue::UInt32(y)) => x.cmp(y),
        (MessageValue::UInt64(x), MessageValue::UInt64(y)) => x.cmp(y),
        (MessageValue::String(x), MessageValue::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Iterator over the entries of a [`Map`] in unspecified order.
pub struct MapIter<'m> {
    map: &'m Map,
    inner: StrTableIter<'m>,
}

impl Iterator for MapIter<'_> {
    type Item = (MessageValue, MessageValue);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (k, bits) = self.inner.next()?;
            if let Some(v) = self.map.unpack_value(bits) {
                return Some((self.map.key_from_bytes(k), v));
            }
        }
    }
}

impl core::fmt::Debug for Map {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
