//! Host-facing surface for embedding the runtime in another language.
//!
//! A host registers its generated classes against a [`DescriptorPool`] and
//! drives messages through [`HostMessage`], [`RepeatedField`] and
//! [`MapField`]. Every message owns its arena, so a host object maps to
//! exactly one Rust value. Errors carry context for the host to surface.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow, bail};

use crate::arena::Arena;
use crate::array::Array;
use crate::base::{Message, MessageValue};
use crate::decoding::DecodeOptions;
use crate::defs::{DefPool, FieldDef, MessageDef};
use crate::encoding::EncodeOptions;
use crate::map::{Map, MapInsertStatus, MapIter};
use crate::reflection::{DynamicMessage, DynamicMessageRef, fits};

/// A [`DefPool`] plus the host classes bound to its messages.
pub struct DescriptorPool {
    pool: DefPool,
    classes: HashMap<String, String>,
}

impl DescriptorPool {
    pub fn new() -> Result<Self> {
        Ok(DescriptorPool {
            pool: DefPool::new().context("creating def pool")?,
            classes: HashMap::new(),
        })
    }

    /// Adds a serialized `FileDescriptorProto`.
    pub fn add(&mut self, file_descriptor: &[u8]) -> Result<()> {
        self.pool
            .add_serialized_file(file_descriptor)
            .map(|_| ())
            .context("adding file to descriptor pool")
    }

    /// Binds host class `class` to the message named `name`.
    pub fn register(&mut self, name: &str, class: impl Into<String>) -> Result<()> {
        if self.pool.find_message_by_name(name).is_none() {
            bail!("cannot register class for unknown message {name}");
        }
        let class = class.into();
        tracing::debug!(%class, message = name, "registered host class");
        self.classes.insert(class, name.to_string());
        Ok(())
    }

    pub fn def_pool(&self) -> &DefPool {
        &self.pool
    }

    /// The message bound to `class`, or else the message of that name.
    pub fn message_def(&self, class_or_name: &str) -> Option<MessageDef<'_>> {
        let name = self.classes.get(class_or_name).map_or(class_or_name, String::as_str);
        self.pool.find_message_by_name(name)
    }
}

/// A message owned by the host, with its own arena.
pub struct HostMessage<'p> {
    arena: Arena<'static>,
    msg: Message,
    def: MessageDef<'p>,
}

impl<'p> HostMessage<'p> {
    /// An empty message of the class (or message name) `class`.
    pub fn new(pool: &'p DescriptorPool, class: &str) -> Result<Self> {
        let def = pool
            .message_def(class)
            .ok_or_else(|| anyhow!("no message registered for {class}"))?;
        let arena = Arena::default();
        let msg = Message::new(def.mini_table(), &arena).ok_or_else(|| anyhow!("arena alloc failed"))?;
        Ok(HostMessage { arena, msg, def })
    }

    pub fn descriptor(&self) -> MessageDef<'p> {
        self.def
    }

    pub fn as_ref(&self) -> DynamicMessageRef<'p, '_> {
        // Safety: `msg` lives in `self.arena` and is only written through
        // `&mut self`.
        unsafe { DynamicMessageRef::new(self.msg, self.def) }
    }

    pub fn as_dynamic(&mut self) -> DynamicMessage<'p, '_> {
        // Safety: as in `as_ref`; the result borrows `self` mutably.
        unsafe { DynamicMessage::wrap(self.msg, self.def, &self.arena) }
    }

    pub fn serialize_to_string(&self) -> Result<Vec<u8>> {
        self.as_ref()
            .encode(EncodeOptions::new())
            .with_context(|| format!("serializing {}", self.def.full_name()))
    }

    /// Decodes `bytes` on top of the current contents.
    pub fn merge_from_string(&mut self, bytes: &[u8]) -> Result<()> {
        let name = self.def.full_name();
        self.as_dynamic()
            .decode(bytes, DecodeOptions::new())
            .with_context(|| format!("parsing {name}"))
    }

    fn field(&self, name: &str) -> Result<FieldDef<'p>> {
        self.def
            .find_field_by_name(name)
            .ok_or_else(|| anyhow!("{} has no field {name}", self.def.full_name()))
    }

    pub fn set(&mut self, name: &str, value: MessageValue) -> Result<()> {
        let field = self.field(name)?;
        Ok(self.as_dynamic().set_field(field, value)?)
    }

    pub fn set_str(&mut self, name: &str, value: &str) -> Result<()> {
        let field = self.field(name)?;
        Ok(self.as_dynamic().set_str(field, value)?)
    }

    pub fn has(&self, name: &str) -> Result<bool> {
        Ok(self.as_ref().has_field(self.field(name)?))
    }

    pub fn clear(&mut self, name: &str) -> Result<()> {
        let field = self.field(name)?;
        self.as_dynamic().clear_field(field);
        Ok(())
    }

    /// The repeated field `name`, created empty on first access.
    pub fn repeated(&mut self, name: &str) -> Result<RepeatedField<'p, '_>> {
        let field = self.field(name)?;
        if !field.is_repeated() || field.is_map() {
            bail!("{} is not a repeated field", field.full_name());
        }
        // Safety: the array is only reachable through the returned view,
        // which borrows `self` mutably.
        let array = unsafe { self.msg.get_or_create_array(field.mini_table_field(), &self.arena) }
            .ok_or_else(|| anyhow!("arena alloc failed"))?;
        Ok(RepeatedField { array, field, arena: &self.arena })
    }

    /// The map field `name`, created empty on first access.
    pub fn map(&mut self, name: &str) -> Result<MapField<'p, '_>> {
        let field = self.field(name)?;
        if !field.is_map() {
            bail!("{} is not a map field", field.full_name());
        }
        // Safety: as in `repeated`.
        let map = unsafe { self.msg.get_or_create_map(self.def.mini_table(), field.mini_table_field(), &self.arena) }
            .ok_or_else(|| anyhow!("arena alloc failed"))?;
        Ok(MapField { map, field, arena: &self.arena })
    }
}

impl core::fmt::Debug for HostMessage<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&self.as_ref(), f)
    }
}

/// Index-addressed view of a repeated field.
pub struct RepeatedField<'p, 'm> {
    array: &'m mut Array,
    field: FieldDef<'p>,
    arena: &'m Arena<'static>,
}

impl<'p> RepeatedField<'p, '_> {
    fn check(&self, value: &MessageValue) -> Result<()> {
        if !fits(self.field.ctype(), value) {
            bail!("value {value:?} does not fit {}", self.field.full_name());
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.array.len()
    }

    pub fn has(&self, index: usize) -> bool {
        index < self.array.len()
    }

    pub fn index(&self, index: usize) -> Option<MessageValue> {
        self.array.get(index, self.field.ctype())
    }

    /// Replaces element `index`; `index == count()` appends.
    pub fn set(&mut self, index: usize, value: MessageValue) -> Result<()> {
        self.check(&value)?;
        if index == self.array.len() {
            return self.push(value);
        }
        if !self.array.set(index, value) {
            bail!("index {index} out of range for {}", self.field.full_name());
        }
        Ok(())
    }

    pub fn push(&mut self, value: MessageValue) -> Result<()> {
        self.check(&value)?;
        if !self.array.append(value, self.arena) {
            bail!("arena alloc failed");
        }
        Ok(())
    }

    /// Appends a new empty message to a repeated message field.
    pub fn push_message(&mut self) -> Result<DynamicMessage<'p, '_>> {
        let def = self
            .field
            .message_type()
            .ok_or_else(|| anyhow!("{} is not a message field", self.field.full_name()))?;
        let msg = Message::new(def.mini_table(), self.arena).ok_or_else(|| anyhow!("arena alloc failed"))?;
        self.push(MessageValue::Message(msg))?;
        // Safety: the new element is only reachable through this view.
        Ok(unsafe { DynamicMessage::wrap(msg, def, self.arena) })
    }

    /// Removes element `index`, shifting the rest down.
    pub fn unset(&mut self, index: usize) -> Result<()> {
        if !self.has(index) {
            bail!("index {index} out of range for {}", self.field.full_name());
        }
        self.array.delete(index, 1);
        Ok(())
    }
}

/// Key-addressed view of a map field.
pub struct MapField<'p, 'm> {
    map: &'m mut Map,
    field: FieldDef<'p>,
    arena: &'m Arena<'static>,
}

impl MapField<'_, '_> {
    pub fn count(&self) -> usize {
        self.map.len()
    }

    pub fn get(&self, key: MessageValue) -> Option<MessageValue> {
        self.map.get(key)
    }

    pub fn set(&mut self, key: MessageValue, value: MessageValue) -> Result<MapInsertStatus> {
        let entry = self.field.message_type();
        let key_ok = entry.and_then(|e| e.map_key()).is_some_and(|f| fits(f.ctype(), &key));
        let value_ok = entry.and_then(|e| e.map_value()).is_some_and(|f| fits(f.ctype(), &value));
        if !key_ok || !value_ok {
            bail!("entry ({key:?}, {value:?}) does not fit {}", self.field.full_name());
        }
        match self.map.set(key, value, self.arena) {
            MapInsertStatus::OutOfMemory => bail!("arena alloc failed"),
            status => Ok(status),
        }
    }

    /// Removes `key`; returns whether it was present.
    pub fn unset(&mut self, key: MessageValue) -> bool {
        self.map.delete(key).is_some()
    }

    pub fn iter(&self) -> MapIter<'_> {
        self.map.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StringView;
    use crate::test_utils::{duration_file, test_file, timestamp_file};

    fn pool() -> DescriptorPool {
        let mut pool = DescriptorPool::new().unwrap();
        for file in [timestamp_file(), duration_file(), test_file()] {
            pool.add(&file.encode_to_vec().unwrap()).unwrap();
        }
        pool.register("miniproto.test.TestAllTypes", "TestAllTypes").unwrap();
        pool
    }

    fn s(text: &'static str) -> MessageValue {
        MessageValue::String(StringView::from_str(text))
    }

    #[test]
    fn registration() {
        let mut pool = pool();
        assert!(pool.register("miniproto.test.Missing", "Missing").is_err());
        assert!(pool.add(b"\x0a").is_err());
        assert_eq!(pool.message_def("TestAllTypes").unwrap().full_name(), "miniproto.test.TestAllTypes");
        assert!(HostMessage::new(&pool, "Unregistered").is_err());
    }

    #[test]
    fn serialize_and_merge() {
        let pool = pool();
        let mut msg = HostMessage::new(&pool, "TestAllTypes").unwrap();
        msg.set("i32", MessageValue::Int32(150)).unwrap();
        msg.set_str("text", "hi").unwrap();
        assert!(msg.set("i32", MessageValue::Int64(1)).is_err());
        assert!(msg.set("nope", MessageValue::Int32(1)).is_err());
        let bytes = msg.serialize_to_string().unwrap();
        assert_eq!(&bytes[..3], &[0x08, 0x96, 0x01]);

        let mut copy = HostMessage::new(&pool, "miniproto.test.TestAllTypes").unwrap();
        copy.merge_from_string(&bytes).unwrap();
        assert!(copy.has("text").unwrap());
        assert_eq!(format!("{copy:?}"), "TestAllTypes { i32: 150, text: \"hi\" }");

        let err = copy.merge_from_string(&[0x08]).unwrap_err();
        assert!(format!("{err:#}").contains("parsing miniproto.test.TestAllTypes"));
    }

    #[test]
    fn repeated_field_surface() {
        let pool = pool();
        let mut msg = HostMessage::new(&pool, "TestAllTypes").unwrap();
        let mut rep = msg.repeated("rep_i32").unwrap();
        assert_eq!(rep.count(), 0);
        for v in [1, 2, 3] {
            rep.push(MessageValue::Int32(v)).unwrap();
        }
        rep.set(1, MessageValue::Int32(20)).unwrap();
        rep.set(3, MessageValue::Int32(4)).unwrap();
        assert!(rep.set(9, MessageValue::Int32(0)).is_err());
        assert!(rep.push(s("x")).is_err());
        rep.unset(0).unwrap();
        assert_eq!(rep.count(), 3);
        assert!(rep.has(2) && !rep.has(3));
        assert_eq!(rep.index(0), Some(MessageValue::Int32(20)));

        let mut nested = msg.repeated("rep_nested").unwrap();
        let mut sub = nested.push_message().unwrap();
        let a = sub.find_field("a").unwrap();
        sub.set_field(a, MessageValue::Int32(5)).unwrap();
        assert_eq!(nested.count(), 1);

        assert!(msg.repeated("i32").is_err());
        assert!(msg.repeated("text_to_i32").is_err());
        assert_eq!(
            format!("{msg:?}"),
            "TestAllTypes { rep_i32: [20, 3, 4], rep_nested: [NestedMessage { a: 5 }] }"
        );
    }

    #[test]
    fn map_field_surface() {
        let pool = pool();
        let mut msg = HostMessage::new(&pool, "TestAllTypes").unwrap();
        let mut map = msg.map("text_to_i32").unwrap();
        assert_eq!(map.set(s("a"), MessageValue::Int32(1)).unwrap(), MapInsertStatus::Inserted);
        assert_eq!(map.set(s("b"), MessageValue::Int32(2)).unwrap(), MapInsertStatus::Inserted);
        assert_eq!(map.set(s("a"), MessageValue::Int32(3)).unwrap(), MapInsertStatus::Replaced);
        assert!(map.set(MessageValue::Int32(1), MessageValue::Int32(1)).is_err());
        assert_eq!(map.count(), 2);
        assert_eq!(map.get(s("a")), Some(MessageValue::Int32(3)));
        assert!(map.unset(s("b")));
        assert!(!map.unset(s("b")));
        let entries: Vec<_> = map.iter().collect();
        assert_eq!(entries, vec![(s("a"), MessageValue::Int32(3))]);

        let bytes = msg.serialize_to_string().unwrap();
        let mut copy = HostMessage::new(&pool, "TestAllTypes").unwrap();
        copy.merge_from_string(&bytes).unwrap();
        assert_eq!(copy.map("text_to_i32").unwrap().count(), 1);
    }
}
