#![no_main]

use libfuzzer_sys::fuzz_target;
use miniproto::DefPool;
use miniproto::defs::descriptor::FileDescriptorProto;

fuzz_target!(|data: &[u8]| {
    let Ok(file) = FileDescriptorProto::decode(data) else {
        return;
    };
    let bytes = file.encode_to_vec().expect("decoded descriptor should encode");
    let again = FileDescriptorProto::decode(&bytes).expect("encoded descriptor should decode");
    assert_eq!(again.encode_to_vec().expect("second encode"), bytes);

    // Building defs must reject bad input without panicking.
    if let Ok(mut pool) = DefPool::new() {
        let _ = pool.add_file(&file);
    }
});
