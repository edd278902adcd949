//! Test utilities for miniproto - available to downstream crates for testing.
//!
//! Schemas here are built the same way applications build them: as
//! `FileDescriptorProto`s fed through a [`DefPool`].

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use allocator_api2::alloc::{AllocError, Allocator, Global};

use crate::arena::Arena;
use crate::base::Message;
use crate::decoding::{DecodeOptions, decode};
use crate::defs::{
    DefPool, DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, ExtensionRange, FieldDescriptorProto,
    FileDescriptorProto, Label, OneofDescriptorProto,
};
use crate::encoding::{EncodeOptions, encode};
use crate::error::Result;
use crate::mini_descriptor::MtDataEncoder;
use crate::mini_table::{FieldType, MiniTable};

pub const TEST_PACKAGE: &str = "miniproto.test";
pub const TEST2_PACKAGE: &str = "miniproto.test2";

/// Builds a message table straight from `(type, number, field_flags)`
/// triples, without any defs.
pub fn message_table<'a>(fields: &[(FieldType, u32, u64)], msg_mod: u64, arena: &'a Arena<'_>) -> &'a mut MiniTable {
    let mut e = MtDataEncoder::new();
    e.start_message(msg_mod);
    for &(t, n, flags) in fields {
        assert!(e.put_field(t, n, flags), "field {n} out of order");
    }
    MiniTable::build(e.as_str(), arena).expect("test table should build")
}

pub fn field(name: &str, number: i32, label: Label, ty: FieldType) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: name.to_string(),
        number,
        label,
        r#type: Some(ty),
        ..Default::default()
    }
}

pub fn typed_field(name: &str, number: i32, label: Label, ty: FieldType, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: type_name.to_string(),
        ..field(name, number, label, ty)
    }
}

pub fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: name.to_string(),
        field: fields,
        ..Default::default()
    }
}

pub fn enumeration(name: &str, values: &[(&str, i32)]) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: name.to_string(),
        value: values
            .iter()
            .map(|&(name, number)| EnumValueDescriptorProto {
                name: name.to_string(),
                number,
            })
            .collect(),
        ..Default::default()
    }
}

/// The nested `XxxEntry` message `protoc` generates for a map field.
pub fn map_entry(name: &str, key: FieldType, value: FieldType, value_type_name: &str) -> DescriptorProto {
    DescriptorProto {
        map_entry: true,
        ..message(
            name,
            vec![
                field("key", 1, Label::Optional, key),
                typed_field("value", 2, Label::Optional, value, value_type_name),
            ],
        )
    }
}

fn well_known(name: &str, message_name: &str) -> FileDescriptorProto {
    FileDescriptorProto {
        name: name.to_string(),
        package: "google.protobuf".to_string(),
        syntax: "proto3".to_string(),
        message_type: vec![message(
            message_name,
            vec![
                field("seconds", 1, Label::Optional, FieldType::Int64),
                field("nanos", 2, Label::Optional, FieldType::Int32),
            ],
        )],
        ..Default::default()
    }
}

pub fn timestamp_file() -> FileDescriptorProto {
    well_known("google/protobuf/timestamp.proto", "Timestamp")
}

pub fn duration_file() -> FileDescriptorProto {
    well_known("google/protobuf/duration.proto", "Duration")
}

/// `test.proto`: a proto3 file with one field of every kind in
/// `miniproto.test.TestAllTypes`.
pub fn test_file() -> FileDescriptorProto {
    use FieldType::*;
    use Label::{Optional, Repeated};

    let mut opt = field("opt_i32", 61, Optional, Int32);
    opt.proto3_optional = true;
    opt.oneof_index = Some(1);
    let in_choice = |mut f: FieldDescriptorProto| {
        f.oneof_index = Some(0);
        f
    };

    let mut all = message(
        "TestAllTypes",
        vec![
            field("i32", 1, Optional, Int32),
            field("i64", 2, Optional, Int64),
            field("u32", 3, Optional, UInt32),
            field("u64", 4, Optional, UInt64),
            field("s32", 5, Optional, SInt32),
            field("s64", 6, Optional, SInt64),
            field("fx32", 7, Optional, Fixed32),
            field("fx64", 8, Optional, Fixed64),
            field("sfx32", 9, Optional, SFixed32),
            field("sfx64", 10, Optional, SFixed64),
            field("flt", 11, Optional, Float),
            field("dbl", 12, Optional, Double),
            field("flag", 13, Optional, Bool),
            field("text", 14, Optional, String),
            field("blob", 15, Optional, Bytes),
            typed_field("color", 16, Optional, Enum, ".miniproto.test.Color"),
            typed_field("nested", 17, Optional, Message, "NestedMessage"),
            field("rep_i32", 31, Repeated, Int32),
            field("rep_text", 32, Repeated, String),
            typed_field("rep_nested", 33, Repeated, Message, "NestedMessage"),
            typed_field("rep_color", 34, Repeated, Enum, "Color"),
            typed_field("text_to_i32", 41, Repeated, Message, "TextToI32Entry"),
            typed_field("i32_to_nested", 42, Repeated, Message, "I32ToNestedEntry"),
            in_choice(field("choice_u32", 51, Optional, UInt32)),
            in_choice(field("choice_text", 52, Optional, String)),
            in_choice(typed_field("choice_nested", 53, Optional, Message, "NestedMessage")),
            opt,
            typed_field("created", 71, Optional, Message, ".google.protobuf.Timestamp"),
            typed_field("ttl", 72, Optional, Message, ".google.protobuf.Duration"),
        ],
    );
    all.oneof_decl = vec![
        OneofDescriptorProto {
            name: "choice".to_string(),
        },
        OneofDescriptorProto {
            name: "_opt_i32".to_string(),
        },
    ];
    all.nested_type = vec![
        message(
            "NestedMessage",
            vec![
                field("a", 1, Optional, Int32),
                typed_field("child", 2, Optional, Message, ".miniproto.test.TestAllTypes"),
            ],
        ),
        map_entry("TextToI32Entry", String, Int32, ""),
        map_entry("I32ToNestedEntry", Int32, Message, "NestedMessage"),
    ];

    FileDescriptorProto {
        name: "test.proto".to_string(),
        package: TEST_PACKAGE.to_string(),
        dependency: vec![
            "google/protobuf/timestamp.proto".to_string(),
            "google/protobuf/duration.proto".to_string(),
        ],
        message_type: vec![all],
        enum_type: vec![enumeration("Color", &[("COLOR_UNSPECIFIED", 0), ("RED", 1), ("GREEN", 2)])],
        syntax: "proto3".to_string(),
        ..Default::default()
    }
}

/// `test2.proto`: proto2 with required fields, defaults, a closed enum and
/// extensions of `miniproto.test2.Request`.
pub fn test2_file() -> FileDescriptorProto {
    use FieldType::*;
    use Label::{Optional, Repeated, Required};

    let mut name = field("name", 2, Optional, String);
    name.default_value = Some("anon".to_string());
    let mut kind = typed_field("kind", 3, Optional, Enum, "Kind");
    kind.default_value = Some("KIND_B".to_string());
    let mut request = message(
        "Request",
        vec![
            field("id", 1, Required, Int32),
            name,
            kind,
            field("samples", 4, Repeated, SInt32),
            typed_field("inner", 5, Optional, Message, "Request"),
        ],
    );
    request.extension_range.push(ExtensionRange { start: 100, end: 200 });

    let extend = |mut f: FieldDescriptorProto| {
        f.extendee = ".miniproto.test2.Request".to_string();
        f
    };
    FileDescriptorProto {
        name: "test2.proto".to_string(),
        package: TEST2_PACKAGE.to_string(),
        message_type: vec![request],
        enum_type: vec![enumeration("Kind", &[("KIND_A", 0), ("KIND_B", 1), ("KIND_C", 5)])],
        extension: vec![
            extend(field("ext_num", 100, Optional, Int32)),
            extend(field("ext_tags", 101, Repeated, String)),
            extend(typed_field("ext_request", 102, Optional, Message, "Request")),
        ],
        syntax: "proto2".to_string(),
        ..Default::default()
    }
}

/// A pool holding the well-known types, `test.proto` and `test2.proto`.
pub fn test_pool() -> Result<DefPool> {
    let mut pool = DefPool::new()?;
    pool.add_file(&timestamp_file())?;
    pool.add_file(&duration_file())?;
    pool.add_file(&test_file())?;
    pool.add_file(&test2_file())?;
    Ok(pool)
}

/// Assert that a message can be encoded and decoded without loss.
pub fn assert_roundtrip(msg: Message, table: &MiniTable) {
    let options = EncodeOptions::new().with_deterministic();
    let data = encode(msg, table, options).expect("msg should encode");

    let arena = Arena::default();
    let copy = Message::new(table, &arena).expect("arena alloc");
    decode(&data, copy, table, None, DecodeOptions::new(), &arena).expect("encoded bytes should decode");
    assert!(msg.compare(copy, table), "decoded message differs from the original");

    let again = encode(copy, table, options).expect("msg should encode");
    assert_eq!(again, data);
}

/// Global allocator wrapper that tracks outstanding blocks.
#[derive(Default)]
pub struct CountingAllocator {
    live: AtomicUsize,
}

impl CountingAllocator {
    /// Blocks allocated and not yet freed.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

unsafe impl Allocator for CountingAllocator {
    fn allocate(&self, layout: Layout) -> core::result::Result<NonNull<[u8]>, AllocError> {
        let block = Global.allocate(layout)?;
        self.live.fetch_add(1, Ordering::Relaxed);
        Ok(block)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live.fetch_sub(1, Ordering::Relaxed);
        unsafe { Global.deallocate(ptr, layout) }
    }
}
