//! An arena-backed protobuf runtime driven by compact mini-tables.
//!
//! Schemas reach the runtime either as mini-descriptor strings, which
//! [`mini_table::MiniTable::build`] turns into layout tables, or as
//! `FileDescriptorProto`s loaded into a [`DefPool`]. Messages are
//! untyped arena allocations; every accessor, the binary codec and JSON
//! take the table (or def) that describes them.
//!
//! ```
//! use miniproto::{Arena, DynamicMessage, MessageValue};
//! use miniproto::test_utils::test_pool;
//!
//! let pool = test_pool().unwrap();
//! let def = pool.find_message_by_name("miniproto.test.TestAllTypes").unwrap();
//! let arena = Arena::default();
//! let mut msg = DynamicMessage::new(def, &arena).unwrap();
//! msg.set_field(def.find_field_by_name("i32").unwrap(), MessageValue::Int32(150)).unwrap();
//! let bytes = msg.encode(miniproto::EncodeOptions::new()).unwrap();
//! assert_eq!(bytes, [0x08, 0x96, 0x01]);
//! ```

pub mod arena;
pub mod string_view;
pub mod status;
pub mod error;
pub mod wire;
pub mod hash;

pub mod mini_descriptor;
pub mod mini_table;

pub mod base;
pub mod array;
pub mod map;
pub mod extension_registry;
mod accessors;
mod message_ops;
mod map_sorter;

mod eps_copy;
mod fast_decode;
pub mod decoding;
pub mod encoding;

pub mod defs;
pub mod reflection;
#[cfg(feature = "json")]
pub mod json;
pub mod binding;

pub mod test_utils;

pub(crate) mod utils;

pub use arena::Arena;
pub use base::{Message, MessageValue};
pub use decoding::{DecodeOptions, decode};
pub use defs::{DefPool, FieldDef, MessageDef};
pub use encoding::{EncodeOptions, encode};
pub use error::{Error, Result};
pub use extension_registry::ExtensionRegistry;
pub use mini_table::{CType, FieldType, MiniTable};
pub use reflection::{DynamicMessage, DynamicMessageRef, Value};
pub use status::{DecodeStatus, EncodeStatus};
pub use string_view::StringView;
