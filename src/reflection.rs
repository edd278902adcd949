//! Runtime reflection for protobuf messages.
//!
//! Pairs a [`Message`] with the [`MessageDef`] describing it so fields can be
//! read and written by def instead of by mini-table field.
//!
//! # Key Types
//!
//! - [`DynamicMessageRef`]: Read-only view of a message for inspection and encoding
//! - [`DynamicMessage`]: Mutable view for decoding and modification
//! - [`Value`]: Enum representing any protobuf field value
//!
//! # Example
//!
//! ```
//! use miniproto::{Arena, DynamicMessage, MessageValue};
//! use miniproto::test_utils::test_pool;
//!
//! let pool = test_pool().unwrap();
//! let def = pool.find_message_by_name("miniproto.test.TestAllTypes").unwrap();
//! let arena = Arena::default();
//! let mut msg = DynamicMessage::new(def, &arena).unwrap();
//! msg.set_field(def.find_field_by_name("i32").unwrap(), MessageValue::Int32(7)).unwrap();
//!
//! for (field, value) in msg.present_fields() {
//!     println!("{}: {:?}", field.name(), value);
//! }
//! ```

use core::fmt;
use core::marker::PhantomData;

use crate::arena::Arena;
use crate::array::Array;
use crate::base::{Extension, Message, MessageValue};
use crate::decoding::{DecodeOptions, decode};
use crate::defs::{FieldDef, MessageDef, OneofDef};
use crate::encoding::{EncodeOptions, encode};
use crate::error::{Error, Result};
use crate::map::{Map, MapInsertStatus, compare_keys};
use crate::mini_table::CType;
use crate::status::EncodeStatus;
use crate::string_view::StringView;

/// Read-only view of a message of a known type.
///
/// `'a` is a span during which the message stays allocated and is not
/// modified; lists, maps and unknown bytes read through the view borrow for
/// that long.
#[derive(Clone, Copy, PartialEq)]
pub struct DynamicMessageRef<'p, 'a> {
    msg: Message,
    def: MessageDef<'p>,
    _frozen: PhantomData<&'a Arena<'a>>,
}

impl<'p, 'a> DynamicMessageRef<'p, 'a> {
    /// Views a raw message.
    ///
    /// # Safety
    /// `msg` must have been created from `def`'s mini-table, its arena must
    /// outlive `'a`, and nothing may modify it during `'a`.
    pub unsafe fn new(msg: Message, def: MessageDef<'p>) -> Self {
        DynamicMessageRef { msg, def, _frozen: PhantomData }
    }

    pub fn message(&self) -> Message {
        self.msg
    }

    pub fn descriptor(&self) -> MessageDef<'p> {
        self.def
    }

    pub fn find_field(&self, name: &str) -> Option<FieldDef<'p>> {
        self.def.find_field_by_name(name)
    }

    fn owns(&self, field: FieldDef<'p>) -> bool {
        field.containing_type() == Some(self.def)
    }

    /// Whether the field is set. Repeated fields and maps are set when
    /// non-empty, implicit-presence fields when non-zero.
    pub fn has_field(&self, field: FieldDef<'p>) -> bool {
        if !self.owns(field) {
            return false;
        }
        match field.mini_extension() {
            Some(_) if field.is_repeated() => self.extension_array(field).is_some_and(|a| !a.is_empty()),
            Some(ext) => self.msg.has_extension(ext),
            None => self.msg.has_field(field.mini_table_field()),
        }
    }

    fn extension_array(&self, field: FieldDef<'p>) -> Option<&'a Array> {
        // Safety: the message is frozen and alive for `'a`.
        unsafe { self.msg.get_extension_array(field.mini_extension()?) }
    }

    /// The field's value if it is set.
    pub fn get_field(&self, field: FieldDef<'p>) -> Option<Value<'p, 'a>> {
        if !self.has_field(field) {
            return None;
        }
        if let Some(ext) = field.mini_extension() {
            if field.is_repeated() {
                let array = self.extension_array(field)?;
                return Some(Value::List(ListRef { array: Some(array), field }));
            }
            return Value::wrap(field, self.msg.get_extension(ext)?);
        }
        let layout = field.mini_table_field();
        // Safety: as in `extension_array`.
        if field.is_map() {
            Some(Value::Map(MapRef { map: unsafe { self.msg.get_map(layout) }, field }))
        } else if field.is_repeated() {
            Some(Value::List(ListRef { array: unsafe { self.msg.get_array(layout) }, field }))
        } else {
            Value::wrap(field, self.msg.get_field(layout)?)
        }
    }

    /// The field's value, falling back to its declared default. Repeated
    /// fields read as empty lists; only unset message fields give `None`.
    pub fn get_or_default(&self, field: FieldDef<'p>) -> Option<Value<'p, 'a>> {
        if let Some(value) = self.get_field(field) {
            return Some(value);
        }
        if field.is_map() {
            return Some(Value::Map(MapRef { map: None, field }));
        }
        if field.is_repeated() {
            return Some(Value::List(ListRef { array: None, field }));
        }
        let default = field.default_value().or_else(|| MessageValue::default_for(field.ctype()))?;
        Value::wrap(field, default)
    }

    /// The field of `oneof` that is currently set.
    pub fn which_oneof(&self, oneof: OneofDef<'p>) -> Option<FieldDef<'p>> {
        if oneof.is_synthetic() {
            return oneof.fields().find(|f| self.has_field(*f));
        }
        let first = oneof.fields().next()?;
        let number = self.msg.which_oneof(first.mini_table_field())?;
        oneof.find_field_by_number(number)
    }

    /// Set fields in declaration order, followed by extensions.
    pub fn present_fields(&self) -> impl Iterator<Item = (FieldDef<'p>, Value<'p, 'a>)> + use<'p, 'a> {
        let this = *self;
        let fields = this.def.fields().filter_map(move |f| Some((f, this.get_field(f)?)));
        fields.chain(this.extensions())
    }

    /// Extensions set on the message that are known to the pool.
    pub fn extensions(&self) -> impl Iterator<Item = (FieldDef<'p>, Value<'p, 'a>)> + use<'p, 'a> {
        let this = *self;
        let pool = self.def.pool();
        // Safety: the message is frozen and alive for `'a`.
        let records: &'a [Extension] = unsafe { self.msg.extensions() };
        records.iter().filter_map(move |e| {
            let field = pool.field_for_extension(e.ext)?;
            Some((field, this.get_field(field)?))
        })
    }

    pub fn unknown(&self) -> &'a [u8] {
        // Safety: the message is frozen and alive for `'a`.
        unsafe { self.msg.unknown() }
    }

    pub fn is_initialized(&self) -> bool {
        self.msg.is_initialized(self.def.mini_table())
    }

    pub fn encode(&self, options: EncodeOptions) -> core::result::Result<Vec<u8>, EncodeStatus> {
        encode(self.msg, self.def.mini_table(), options)
    }
}

impl fmt::Debug for DynamicMessageRef<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug_struct = f.debug_struct(self.def.name());
        for field in self.def.fields() {
            if let Some(value) = self.get_field(field) {
                debug_struct.field(field.name(), &value);
            }
        }
        for (field, value) in self.extensions() {
            debug_struct.field(&format!("[{}]", field.full_name()), &value);
        }
        debug_struct.finish()
    }
}

/// Mutable view of a message; new values are allocated in `arena`.
///
/// Reads go through [`DynamicMessage::as_ref`], whose borrow keeps the
/// message frozen while lists, maps or sub-messages read from it are alive:
///
/// ```compile_fail
/// use miniproto::{Arena, DynamicMessage, MessageValue};
/// use miniproto::test_utils::test_pool;
///
/// let pool = test_pool().unwrap();
/// let def = pool.find_message_by_name("miniproto.test.TestAllTypes").unwrap();
/// let rep = def.find_field_by_name("rep_i32").unwrap();
/// let arena = Arena::default();
/// let mut msg = DynamicMessage::new(def, &arena).unwrap();
/// msg.append(rep, MessageValue::Int32(1)).unwrap();
/// let list = msg.get_field(rep).unwrap().as_list().unwrap();
/// msg.append(rep, MessageValue::Int32(2)).unwrap();
/// assert_eq!(list.len(), 1);
/// ```
pub struct DynamicMessage<'p, 'a> {
    msg: Message,
    def: MessageDef<'p>,
    arena: &'a Arena<'a>,
}

impl fmt::Debug for DynamicMessage<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.as_ref(), f)
    }
}

impl<'p, 'a> DynamicMessage<'p, 'a> {
    /// Allocates an empty message of type `def`.
    pub fn new(def: MessageDef<'p>, arena: &'a Arena<'a>) -> Result<Self> {
        let msg = Message::new(def.mini_table(), arena).ok_or(Error::OutOfMemory)?;
        Ok(DynamicMessage { msg, def, arena })
    }

    /// Wraps an existing message allocated in `arena`.
    ///
    /// # Safety
    /// `msg` must have been created from `def`'s mini-table in `arena` (or an
    /// arena fused with it), and no other handle may read or write it while
    /// the result is alive.
    pub unsafe fn wrap(msg: Message, def: MessageDef<'p>, arena: &'a Arena<'a>) -> Self {
        DynamicMessage { msg, def, arena }
    }

    pub fn as_ref(&self) -> DynamicMessageRef<'p, '_> {
        // Safety: `self` is the only handle and is borrowed for the result.
        unsafe { DynamicMessageRef::new(self.msg, self.def) }
    }

    pub fn message(&self) -> Message {
        self.msg
    }

    pub fn descriptor(&self) -> MessageDef<'p> {
        self.def
    }

    pub fn arena(&self) -> &'a Arena<'a> {
        self.arena
    }

    pub fn find_field(&self, name: &str) -> Option<FieldDef<'p>> {
        self.def.find_field_by_name(name)
    }

    pub fn has_field(&self, field: FieldDef<'p>) -> bool {
        self.as_ref().has_field(field)
    }

    pub fn get_field(&self, field: FieldDef<'p>) -> Option<Value<'p, '_>> {
        self.as_ref().get_field(field)
    }

    pub fn get_or_default(&self, field: FieldDef<'p>) -> Option<Value<'p, '_>> {
        self.as_ref().get_or_default(field)
    }

    pub fn which_oneof(&self, oneof: OneofDef<'p>) -> Option<FieldDef<'p>> {
        self.as_ref().which_oneof(oneof)
    }

    pub fn present_fields(&self) -> impl Iterator<Item = (FieldDef<'p>, Value<'p, '_>)> {
        self.as_ref().present_fields()
    }

    pub fn extensions(&self) -> impl Iterator<Item = (FieldDef<'p>, Value<'p, '_>)> {
        self.as_ref().extensions()
    }

    pub fn unknown(&self) -> &[u8] {
        self.as_ref().unknown()
    }

    pub fn is_initialized(&self) -> bool {
        self.as_ref().is_initialized()
    }

    pub fn encode(&self, options: EncodeOptions) -> core::result::Result<Vec<u8>, EncodeStatus> {
        self.as_ref().encode(options)
    }

    fn owns(&self, field: FieldDef<'p>) -> bool {
        field.containing_type() == Some(self.def)
    }

    fn check_owner(&self, field: FieldDef<'p>) -> Result<()> {
        if self.owns(field) {
            Ok(())
        } else {
            Err(Error::def(format!(
                "field {} does not belong to {}",
                field.full_name(),
                self.def.full_name()
            )))
        }
    }

    fn check_value(field: FieldDef<'p>, val: &MessageValue) -> Result<()> {
        if fits(field.ctype(), val) {
            Ok(())
        } else {
            Err(Error::def(format!("value {val:?} does not fit field {}", field.full_name())))
        }
    }

    /// Clears every field, extension and unknown byte.
    pub fn clear(&mut self) {
        self.msg.clear(self.def.mini_table());
    }

    pub fn clear_field(&mut self, field: FieldDef<'p>) {
        if !self.owns(field) {
            return;
        }
        match field.mini_extension() {
            Some(ext) => self.msg.clear_extension(ext),
            None => self.msg.clear_field(field.mini_table_field()),
        }
    }

    /// Sets a singular field. Message values must have been built from the
    /// field's message type.
    pub fn set_field(&mut self, field: FieldDef<'p>, val: MessageValue) -> Result<()> {
        self.check_owner(field)?;
        if field.is_repeated() {
            return Err(Error::def(format!("{} is repeated", field.full_name())));
        }
        Self::check_value(field, &val)?;
        match field.mini_extension() {
            Some(ext) => {
                if !self.msg.set_extension(ext, val, self.arena) {
                    return Err(Error::OutOfMemory);
                }
            }
            None => self.msg.set_field(field.mini_table_field(), val),
        }
        Ok(())
    }

    /// Copies `s` into the arena and stores it in a string field.
    pub fn set_str(&mut self, field: FieldDef<'p>, s: &str) -> Result<()> {
        self.set_bytes(field, s.as_bytes())
    }

    pub fn set_bytes(&mut self, field: FieldDef<'p>, bytes: &[u8]) -> Result<()> {
        let view = StringView::copy_in(bytes, self.arena).ok_or(Error::OutOfMemory)?;
        self.set_field(field, MessageValue::String(view))
    }

    /// The sub-message in `field`, created empty if unset.
    pub fn mutable_message(&mut self, field: FieldDef<'p>) -> Result<DynamicMessage<'p, '_>> {
        self.check_owner(field)?;
        let def = match field.message_type() {
            Some(def) if !field.is_repeated() => def,
            _ => return Err(Error::def(format!("{} is not a singular message field", field.full_name()))),
        };
        let msg = match field.mini_extension() {
            Some(ext) => self.msg.get_or_create_extension_message(ext, self.arena),
            None => self
                .msg
                .get_or_create_message(self.def.mini_table(), field.mini_table_field(), self.arena),
        }
        .ok_or(Error::OutOfMemory)?;
        // Safety: the sub-message is only reachable through `self`, which
        // stays mutably borrowed.
        Ok(unsafe { DynamicMessage::wrap(msg, def, self.arena) })
    }

    fn mutable_array(&mut self, field: FieldDef<'p>) -> Result<&mut Array> {
        self.check_owner(field)?;
        if !field.is_repeated() || field.is_map() {
            return Err(Error::def(format!("{} is not a repeated field", field.full_name())));
        }
        // Safety: `self` is the only handle to the message.
        unsafe {
            match field.mini_extension() {
                Some(ext) => self.msg.get_or_create_extension_array(ext, self.arena),
                None => self.msg.get_or_create_array(field.mini_table_field(), self.arena),
            }
        }
        .ok_or(Error::OutOfMemory)
    }

    /// Appends one element to a repeated field.
    pub fn append(&mut self, field: FieldDef<'p>, val: MessageValue) -> Result<()> {
        Self::check_value(field, &val)?;
        let arena = self.arena;
        let array = self.mutable_array(field)?;
        if array.append(val, arena) {
            Ok(())
        } else {
            Err(Error::OutOfMemory)
        }
    }

    /// Appends a new empty message to a repeated message field.
    pub fn append_message(&mut self, field: FieldDef<'p>) -> Result<DynamicMessage<'p, '_>> {
        let def = field
            .message_type()
            .ok_or_else(|| Error::def(format!("{} is not a message field", field.full_name())))?;
        let arena = self.arena;
        let array = self.mutable_array(field)?;
        let msg = Message::new(def.mini_table(), arena).ok_or(Error::OutOfMemory)?;
        if !array.append(MessageValue::Message(msg), arena) {
            return Err(Error::OutOfMemory);
        }
        // Safety: as in `mutable_message`.
        Ok(unsafe { DynamicMessage::wrap(msg, def, arena) })
    }

    /// Inserts or replaces one map entry.
    pub fn insert(&mut self, field: FieldDef<'p>, key: MessageValue, val: MessageValue) -> Result<MapInsertStatus> {
        self.check_owner(field)?;
        let entry = field
            .message_type()
            .filter(|_| field.is_map())
            .ok_or_else(|| Error::def(format!("{} is not a map field", field.full_name())))?;
        if let Some(k) = entry.map_key() {
            Self::check_value(k, &key)?;
        }
        if let Some(v) = entry.map_value() {
            Self::check_value(v, &val)?;
        }
        // Safety: `self` is the only handle to the message.
        let map = unsafe {
            self.msg
                .get_or_create_map(self.def.mini_table(), field.mini_table_field(), self.arena)
        }
        .ok_or(Error::OutOfMemory)?;
        match map.set(key, val, self.arena) {
            MapInsertStatus::OutOfMemory => Err(Error::OutOfMemory),
            status => Ok(status),
        }
    }

    /// Merges the binary encoding `bytes` into this message, resolving
    /// extensions through the pool.
    pub fn decode(&mut self, bytes: &[u8], options: DecodeOptions) -> Result<()> {
        let pool = self.def.pool();
        decode(
            bytes,
            self.msg,
            self.def.mini_table(),
            Some(pool.extension_registry()),
            options,
            self.arena,
        )?;
        Ok(())
    }
}

/// Whether `val` can be stored in a slot of type `ctype`.
pub(crate) fn fits(ctype: CType, val: &MessageValue) -> bool {
    matches!(
        (ctype, val),
        (CType::Bool, MessageValue::Bool(_))
            | (CType::Float, MessageValue::Float(_))
            | (CType::Double, MessageValue::Double(_))
            | (CType::Int32 | CType::Enum, MessageValue::Int32(_))
            | (CType::Int64, MessageValue::Int64(_))
            | (CType::UInt32, MessageValue::UInt32(_))
            | (CType::UInt64, MessageValue::UInt64(_))
            | (CType::String | CType::Bytes, MessageValue::String(_))
            | (CType::Message, MessageValue::Message(_))
    )
}

/// A field value read through reflection.
#[derive(Clone, Copy)]
pub enum Value<'p, 'a> {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Enum(i32),
    String(StringView),
    Bytes(StringView),
    Message(DynamicMessageRef<'p, 'a>),
    List(ListRef<'p, 'a>),
    Map(MapRef<'p, 'a>),
}

impl<'p, 'a> Value<'p, 'a> {
    /// Callers pass values read from a message frozen for `'a`.
    fn wrap(field: FieldDef<'p>, val: MessageValue) -> Option<Value<'p, 'a>> {
        Some(match (field.ctype(), val) {
            (CType::Enum, MessageValue::Int32(v)) => Value::Enum(v),
            (CType::Bytes, MessageValue::String(v)) => Value::Bytes(v),
            (_, MessageValue::String(v)) => Value::String(v),
            (_, MessageValue::Message(msg)) => Value::Message(DynamicMessageRef {
                msg,
                def: field.message_type()?,
                _frozen: PhantomData,
            }),
            (_, MessageValue::Bool(v)) => Value::Bool(v),
            (_, MessageValue::Int32(v)) => Value::Int32(v),
            (_, MessageValue::Int64(v)) => Value::Int64(v),
            (_, MessageValue::UInt32(v)) => Value::UInt32(v),
            (_, MessageValue::UInt64(v)) => Value::UInt64(v),
            (_, MessageValue::Float(v)) => Value::Float(v),
            (_, MessageValue::Double(v)) => Value::Double(v),
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => s.to_str(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) | Value::Bytes(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<DynamicMessageRef<'p, 'a>> {
        match self {
            Value::Message(m) => Some(*m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<ListRef<'p, 'a>> {
        match self {
            Value::List(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<MapRef<'p, 'a>> {
        match self {
            Value::Map(m) => Some(*m),
            _ => None,
        }
    }
}

impl fmt::Debug for Value<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use fmt::Debug;
        match self {
            Value::Bool(v) => v.fmt(f),
            Value::Int32(v) | Value::Enum(v) => v.fmt(f),
            Value::Int64(v) => v.fmt(f),
            Value::UInt32(v) => v.fmt(f),
            Value::UInt64(v) => v.fmt(f),
            Value::Float(v) => v.fmt(f),
            Value::Double(v) => v.fmt(f),
            Value::String(s) => match s.to_str() {
                Some(s) => s.fmt(f),
                None => s.as_bytes().fmt(f),
            },
            Value::Bytes(s) => s.as_bytes().fmt(f),
            Value::Message(m) => m.fmt(f),
            Value::List(l) => l.fmt(f),
            Value::Map(m) => m.fmt(f),
        }
    }
}

/// Elements of a repeated field.
#[derive(Clone, Copy)]
pub struct ListRef<'p, 'a> {
    array: Option<&'a Array>,
    field: FieldDef<'p>,
}

impl<'p, 'a> ListRef<'p, 'a> {
    pub fn field(&self) -> FieldDef<'p> {
        self.field
    }

    pub fn len(&self) -> usize {
        self.array.map_or(0, |a| a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<Value<'p, 'a>> {
        Value::wrap(self.field, self.array?.get(i, self.field.ctype())?)
    }

    pub fn iter(&self) -> impl Iterator<Item = Value<'p, 'a>> + use<'p, 'a> {
        let field = self.field;
        self.array
            .into_iter()
            .flat_map(move |a| a.iter(field.ctype()))
            .filter_map(move |v| Value::wrap(field, v))
    }
}

impl fmt::Debug for ListRef<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Entries of a map field.
#[derive(Clone, Copy)]
pub struct MapRef<'p, 'a> {
    map: Option<&'a Map>,
    field: FieldDef<'p>,
}

impl<'p, 'a> MapRef<'p, 'a> {
    pub fn field(&self) -> FieldDef<'p> {
        self.field
    }

    fn entry_fields(&self) -> Option<(FieldDef<'p>, FieldDef<'p>)> {
        let entry = self.field.message_type()?;
        Some((entry.map_key()?, entry.map_value()?))
    }

    pub fn len(&self) -> usize {
        self.map.map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: MessageValue) -> Option<Value<'p, 'a>> {
        let (_, value_field) = self.entry_fields()?;
        Value::wrap(value_field, self.map?.get(key)?)
    }

    /// Entries in hash order.
    pub fn iter(&self) -> impl Iterator<Item = (Value<'p, 'a>, Value<'p, 'a>)> + use<'p, 'a> {
        let fields = self.entry_fields();
        self.map
            .into_iter()
            .flat_map(|m| m.iter())
            .filter_map(move |(k, v)| {
                let (key_field, value_field) = fields?;
                Some((Value::wrap(key_field, k)?, Value::wrap(value_field, v)?))
            })
    }

    /// Entries ordered by key.
    pub fn sorted_entries(&self) -> Vec<(Value<'p, 'a>, Value<'p, 'a>)> {
        let Some((key_field, value_field)) = self.entry_fields() else {
            return Vec::new();
        };
        let mut entries: Vec<_> = self.map.into_iter().flat_map(|m| m.iter()).collect();
        entries.sort_by(|a, b| compare_keys(&a.0, &b.0));
        entries
            .into_iter()
            .filter_map(|(k, v)| Some((Value::wrap(key_field, k)?, Value::wrap(value_field, v)?)))
            .collect()
    }
}

impl fmt::Debug for MapRef<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.sorted_entries()).finish()
    }
}
