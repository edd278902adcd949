//! End-to-end wire scenarios through the public API.

use miniproto::defs::descriptor::{FileDescriptorProto, Label};
use miniproto::mini_descriptor::field_flags;
use miniproto::test_utils::{map_entry, message, message_table, test_pool, typed_field};
use miniproto::{
    Arena, DecodeOptions, DecodeStatus, DefPool, EncodeOptions, EncodeStatus, FieldType, Message, MessageValue, MiniTable,
    StringView, decode, encode,
};
use pretty_assertions::assert_eq;

fn parse(bytes: &[u8], table: &MiniTable, options: DecodeOptions, arena: &Arena<'_>) -> Result<Message, DecodeStatus> {
    let msg = Message::new(table, arena).expect("arena alloc");
    decode(bytes, msg, table, None, options, arena).map(|()| msg)
}

#[test]
fn int32_varint_roundtrips_byte_for_byte() {
    let arena = Arena::default();
    let t = message_table(&[(FieldType::Int32, 1, 0)], 0, &arena);
    let msg = parse(&[0x08, 0x96, 0x01], t, DecodeOptions::new(), &arena).unwrap();
    assert_eq!(msg.get_field(t.field(0)), Some(MessageValue::Int32(150)));
    assert_eq!(encode(msg, t, EncodeOptions::new()).unwrap(), vec![0x08, 0x96, 0x01]);
}

#[test]
fn string_field_and_utf8_validation() {
    let arena = Arena::default();
    let t = message_table(&[(FieldType::String, 2, field_flags::VALIDATE_UTF8)], 0, &arena);
    let msg = parse(b"\x12\x07testing", t, DecodeOptions::new(), &arena).unwrap();
    assert_eq!(msg.get_field(t.field(0)), Some(MessageValue::String(StringView::from_str("testing"))));
    assert_eq!(
        parse(&[0x12, 0x02, 0xc3, 0x28], t, DecodeOptions::new(), &arena).err(),
        Some(DecodeStatus::BadUtf8)
    );
}

#[test]
fn packed_int32_array() {
    let arena = Arena::default();
    let flags = field_flags::IS_REPEATED | field_flags::IS_PACKED;
    let t = message_table(&[(FieldType::Int32, 4, flags)], 0, &arena);
    let input = [0x22, 0x06, 0x03, 0x8e, 0x02, 0x9e, 0xa7, 0x05];
    let msg = parse(&input, t, DecodeOptions::new(), &arena).unwrap();
    let array = unsafe { msg.get_array(t.field(0)) }.unwrap();
    assert_eq!(array.as_slice::<i32>(), &[3, 270, 86942]);
    assert_eq!(encode(msg, t, EncodeOptions::new()).unwrap(), input.to_vec());
}

fn map_pool() -> DefPool {
    let mut holder = message(
        "Holder",
        vec![typed_field("counts", 1, Label::Repeated, FieldType::Message, "CountsEntry")],
    );
    holder.nested_type.push(map_entry("CountsEntry", FieldType::String, FieldType::Int32, ""));
    let file = FileDescriptorProto {
        name: "map.proto".to_string(),
        package: "scenario".to_string(),
        message_type: vec![holder],
        syntax: "proto3".to_string(),
        ..Default::default()
    };
    let mut pool = DefPool::new().unwrap();
    pool.add_file(&file).unwrap();
    pool
}

#[test]
fn string_to_int32_map_encodes_deterministically() {
    let pool = map_pool();
    let def = pool.find_message_by_name("scenario.Holder").unwrap();
    let t = def.mini_table();
    let field = def.find_field_by_name("counts").unwrap().mini_table_field();

    let arena = Arena::default();
    let input = [0x0a, 0x07, 0x0a, 0x03, b'o', b'n', b'e', 0x10, 0x01];
    let msg = parse(&input, t, DecodeOptions::new(), &arena).unwrap();
    let map = unsafe { msg.get_map(field) }.unwrap();
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(MessageValue::String(StringView::from_str("one"))), Some(MessageValue::Int32(1)));

    let map = unsafe { msg.get_or_create_map(t, field, &arena) }.unwrap();
    for (i, key) in ["zeta", "alpha", "mid", "beta"].into_iter().enumerate() {
        map.set(MessageValue::String(StringView::from_str(key)), MessageValue::Int32(i as i32), &arena);
    }
    let options = EncodeOptions::new().with_deterministic();
    let first = encode(msg, t, options).unwrap();
    let second = encode(msg, t, options).unwrap();
    assert_eq!(first, second);
    // Sorted by key: "alpha" comes first.
    assert_eq!(&first[..4], &[0x0a, 0x09, 0x0a, 0x05]);
    assert_eq!(&first[4..9], b"alpha");
}

#[test]
fn unknown_fields_survive_reencoding() {
    let arena = Arena::default();
    let t = message_table(&[(FieldType::Int32, 1, 0)], 0, &arena);
    // Field 99 varint, field 1, field 99 length-delimited.
    let unknown_a = [0x98, 0x06, 0x05];
    let unknown_b = [0x9a, 0x06, 0x02, b'h', b'i'];
    let mut input = unknown_a.to_vec();
    input.extend_from_slice(&[0x08, 0x01]);
    input.extend_from_slice(&unknown_b);

    let msg = parse(&input, t, DecodeOptions::new(), &arena).unwrap();
    let out = encode(msg, t, EncodeOptions::new()).unwrap();
    let mut expected_unknown = unknown_a.to_vec();
    expected_unknown.extend_from_slice(&unknown_b);
    assert!(out.windows(expected_unknown.len()).any(|w| w == expected_unknown.as_slice()));

    let skipped = encode(msg, t, EncodeOptions::new().with_skip_unknown()).unwrap();
    assert_eq!(skipped, vec![0x08, 0x01]);
}

#[test]
fn mismatched_end_group_is_malformed() {
    let arena = Arena::default();
    let t = message_table(&[(FieldType::Int32, 1, 0)], 0, &arena);
    assert_eq!(
        parse(&[0x1b, 0x08, 0x01, 0x24], t, DecodeOptions::new(), &arena).err(),
        Some(DecodeStatus::Malformed)
    );
}

#[test]
fn required_check_reports_after_full_parse() {
    let pool = test_pool().unwrap();
    let def = pool.find_message_by_name("miniproto.test2.Request").unwrap();
    let t = def.mini_table();
    let name = def.find_field_by_name("name").unwrap().mini_table_field();
    let arena = Arena::default();
    let options = DecodeOptions::new().with_check_required();

    let msg = Message::new(t, &arena).unwrap();
    assert_eq!(
        decode(b"\x12\x02ok", msg, t, None, options, &arena),
        Err(DecodeStatus::MissingRequired)
    );
    assert_eq!(msg.get_field(name), Some(MessageValue::String(StringView::from_str("ok"))));

    let msg = Message::new(t, &arena).unwrap();
    assert_eq!(decode(b"\x08\x07\x12\x02ok", msg, t, None, options, &arena), Ok(()));
    assert!(msg.is_initialized(t));
    assert_eq!(
        encode(Message::new(t, &arena).unwrap(), t, EncodeOptions::new().with_check_required()),
        Err(EncodeStatus::MissingRequired)
    );
}
