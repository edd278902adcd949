//! Loading schemas from a serialized `FileDescriptorSet`, the way the CLI does.

use miniproto::defs::descriptor::FileDescriptorSet;
use miniproto::mini_descriptor::{MtDataEncoder, field_flags, message_modifier};
use miniproto::test_utils::{duration_file, test2_file, test_file, timestamp_file};
use miniproto::{Arena, DecodeOptions, DefPool, DynamicMessage, EncodeOptions, FieldType, Message, MessageValue, MiniTable};
use pretty_assertions::assert_eq;

fn pool_from_set() -> DefPool {
    let set = FileDescriptorSet {
        file: vec![timestamp_file(), duration_file(), test_file(), test2_file()],
    };
    let bytes = set.encode_to_vec().unwrap();
    let mut pool = DefPool::new().unwrap();
    pool.add_serialized_file_set(&bytes).unwrap();
    pool
}

#[test]
fn every_file_is_loaded_once() {
    let mut pool = pool_from_set();
    assert_eq!(pool.file_count(), 4);
    let again = FileDescriptorSet {
        file: vec![timestamp_file(), test_file()],
    };
    pool.add_serialized_file_set(&again.encode_to_vec().unwrap()).unwrap();
    assert_eq!(pool.file_count(), 4);
    assert!(pool.find_message_by_name("miniproto.test.TestAllTypes.NestedMessage").is_some());
    assert!(pool.find_extension_by_name("miniproto.test2.ext_num").is_some());
}

#[test]
fn mini_descriptor_matches_hand_encoding() {
    let pool = pool_from_set();
    let def = pool.find_message_by_name("miniproto.test2.Request").unwrap();

    let mut e = MtDataEncoder::new();
    e.start_message(message_modifier::IS_EXTENDABLE);
    assert!(e.put_field(FieldType::Int32, 1, field_flags::IS_REQUIRED));
    assert!(e.put_field(FieldType::String, 2, 0));
    assert!(e.put_field(FieldType::Enum, 3, field_flags::IS_CLOSED_ENUM));
    assert!(e.put_field(FieldType::SInt32, 4, field_flags::IS_REPEATED));
    assert!(e.put_field(FieldType::Message, 5, 0));
    assert_eq!(def.mini_descriptor(), e.finish());

    // A table rebuilt from the string has the same shape.
    let arena = Arena::default();
    let table: &MiniTable = MiniTable::build(def.mini_descriptor(), &arena).unwrap();
    assert_eq!(table.size(), def.mini_table().size());
    assert_eq!(table.fields().len(), 5);
    assert!(table.is_extendable());
}

#[test]
fn payload_decoded_with_a_loaded_schema() {
    let pool = pool_from_set();
    let def = pool.find_message_by_name("miniproto.test2.Request").unwrap();
    let arena = Arena::default();

    let mut msg = DynamicMessage::new(def, &arena).unwrap();
    msg.set_field(def.find_field_by_name("id").unwrap(), MessageValue::Int32(9)).unwrap();
    let ext = pool.find_extension_by_name("miniproto.test2.ext_num").unwrap();
    msg.set_field(ext, MessageValue::Int32(-4)).unwrap();
    let bytes = msg.encode(EncodeOptions::new()).unwrap();

    let mut copy = DynamicMessage::new(def, &arena).unwrap();
    copy.decode(&bytes, DecodeOptions::new().with_check_required()).unwrap();
    assert!(copy.message().compare(msg.message(), def.mini_table()));
    assert_eq!(copy.get_field(ext).map(|v| format!("{v:?}")), Some("-4".to_string()));

    // Without the registry the extension stays unknown.
    let raw = Message::new(def.mini_table(), &arena).unwrap();
    miniproto::decode(&bytes, raw, def.mini_table(), None, DecodeOptions::new(), &arena).unwrap();
    assert!(raw.has_unknown());
}

#[cfg(feature = "json")]
#[test]
fn json_roundtrip_through_loaded_schema() {
    use miniproto::json::{JsonDecodeOptions, JsonEncodeOptions, decode, encode};

    let pool = pool_from_set();
    let def = pool.find_message_by_name("miniproto.test.TestAllTypes").unwrap();
    let arena = Arena::default();
    let input = r#"{"i64":"-7","text":"hé","color":"GREEN","repI32":[1,2],"textToI32":{"b":2,"a":1},"ttl":"1.500s"}"#;
    let msg = Message::new(def.mini_table(), &arena).unwrap();
    decode(input.as_bytes(), msg, def, JsonDecodeOptions::new(), &arena).unwrap();

    let out = encode(msg, def, JsonEncodeOptions::new()).unwrap();
    assert_eq!(
        out,
        r#"{"i64":"-7","text":"hé","color":"GREEN","repI32":[1,2],"textToI32":{"a":1,"b":2},"ttl":"1.500s"}"#
    );
}
