/// Smallest `n` with `1 << n >= x`; zero for `x <= 1`.
pub(crate) const fn log2_ceiling(x: usize) -> u32 {
    if x <= 1 {
        0
    } else {
        usize::BITS - (x - 1).leading_zeros()
    }
}

/// UTF-8 check used for validated string fields.
///
/// Runs of ASCII are skipped eight bytes at a time; anything else is handed
/// to the standard library validator.
#[inline]
pub(crate) fn is_valid_utf8(bytes: &[u8]) -> bool {
    let mut i = 0;
    while i + 8 <= bytes.len() {
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[i..i + 8]);
        if u64::from_ne_bytes(word) & 0x8080_8080_8080_8080 != 0 {
            break;
        }
        i += 8;
    }
    while i < bytes.len() && bytes[i] < 0x80 {
        i += 1;
    }
    i == bytes.len() || core::str::from_utf8(&bytes[i..]).is_ok()
}
