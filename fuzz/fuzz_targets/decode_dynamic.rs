#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use miniproto::test_utils::test_pool;
use miniproto::{Arena, DecodeOptions, EncodeOptions, Message, decode, encode};

#[derive(Arbitrary, Debug)]
struct Input {
    data: Vec<u8>,
    proto2: bool,
    alias: bool,
    max_depth: u8,
}

fuzz_target!(|input: Input| {
    let pool = test_pool().expect("test schemas should load");
    let name = if input.proto2 { "miniproto.test2.Request" } else { "miniproto.test.TestAllTypes" };
    let table = pool.find_message_by_name(name).expect("message exists").mini_table();

    let depth = u16::from(input.max_depth);
    let mut options = DecodeOptions::new().with_max_depth(depth);
    if input.alias {
        options = options.with_alias_string();
    }
    let arena = Arena::default();
    let msg = Message::new(table, &arena).expect("arena alloc");
    if decode(&input.data, msg, table, Some(pool.extension_registry()), options, &arena).is_err() {
        return;
    }

    let encode_options = EncodeOptions::new().with_deterministic().with_max_depth(depth);
    let bytes = encode(msg, table, encode_options).expect("decoded message should encode");
    let copy = Message::new(table, &arena).expect("arena alloc");
    decode(&bytes, copy, table, Some(pool.extension_registry()), DecodeOptions::new().with_max_depth(depth), &arena)
        .expect("encoder output should decode");
});
