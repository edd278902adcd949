use core::ptr::NonNull;

use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::mini_descriptor::{from_base92, idx, value, version};

/// Set of values a closed enum accepts.
///
/// Values below `mask_limit` live in a bitmask (at least 64 bits); the rest
/// are listed explicitly after the mask words.
#[derive(Debug)]
pub struct MiniTableEnum {
    mask_limit: u32,
    value_count: u32,
    data: *const u32,
}

unsafe impl Send for MiniTableEnum {}
unsafe impl Sync for MiniTableEnum {}

impl MiniTableEnum {
    fn data(&self) -> &[u32] {
        let len = (self.mask_limit / 32 + self.value_count) as usize;
        unsafe { core::slice::from_raw_parts(self.data, len) }
    }

    #[inline]
    pub fn check_value(&self, val: u32) -> bool {
        let data = self.data();
        if val < 64 {
            let mask = data[0] as u64 | ((data[1] as u64) << 32);
            return mask & (1 << val) != 0;
        }
        if val < self.mask_limit {
            return data[(val / 32) as usize] & (1 << (val % 32)) != 0;
        }
        data[(self.mask_limit / 32) as usize..].contains(&val)
    }

    /// Every accepted value, mask values first.
    pub fn values(&self) -> impl Iterator<Item = u32> + '_ {
        let mask_words = (self.mask_limit / 32) as usize;
        let data = self.data();
        (0..self.mask_limit)
            .filter(move |v| data[(*v / 32) as usize] & (1 << (v % 32)) != 0)
            .chain(data[mask_words..].iter().copied())
    }

    /// Builds an enum table from an enum mini-descriptor.
    pub fn build<'a>(data: &str, arena: &'a Arena<'_>) -> Result<&'a MiniTableEnum> {
        let mut bytes = data.as_bytes();
        if let Some((&first, rest)) = bytes.split_first() {
            if first != version::ENUM {
                return Err(enum_error(format!("Invalid enum version: {}", first as char)));
            }
            bytes = rest;
        }

        let mut words: Vec<u32> = vec![0, 0];
        let mut mask_limit = 64u32;
        let mut explicit: Vec<u32> = Vec::new();
        let mut value_count = 0u32;
        let mut add = |val: u32, words: &mut Vec<u32>, mask_limit: &mut u32| {
            value_count += 1;
            if !explicit.is_empty() || (val > 512 && value_count < val / 32) {
                explicit.push(val);
            } else {
                let needed = (val / 32 + 1) * 32;
                while *mask_limit < needed {
                    words.push(0);
                    *mask_limit += 32;
                }
                words[(val / 32) as usize] |= 1 << (val % 32);
            }
        };

        let mut base = 0u32;
        let mut pos = 0;
        while pos < bytes.len() {
            let ch = bytes[pos];
            pos += 1;
            if ch <= value::MAX_ENUM_MASK {
                let mut mask = from_base92(ch).ok_or_else(|| unexpected(ch))?;
                for _ in 0..5 {
                    if mask & 1 != 0 {
                        add(base, &mut words, &mut mask_limit);
                    }
                    base = base.wrapping_add(1);
                    mask >>= 1;
                }
            } else if (value::MIN_SKIP..=value::MAX_SKIP).contains(&ch) {
                let (skip, next) = decode_base92_varint(bytes, pos, ch, value::MIN_SKIP, value::MAX_SKIP)
                    .map_err(enum_error)?;
                pos = next;
                base = base.wrapping_add(skip);
            } else {
                return Err(unexpected(ch));
            }
        }

        drop(add);
        words.extend_from_slice(&explicit);
        let ptr = copy_words(&words, arena)?;
        let table = arena_new(
            MiniTableEnum {
                mask_limit,
                value_count: explicit.len() as u32,
                data: ptr,
            },
            arena,
        )?;
        Ok(table)
    }
}

fn unexpected(ch: u8) -> Error {
    enum_error(format!("Unexpected character: {}", ch as char))
}

fn enum_error(msg: String) -> Error {
    tracing::debug!(%msg, "enum mini-descriptor rejected");
    Error::MiniTable(msg)
}

fn copy_words(words: &[u32], arena: &Arena<'_>) -> Result<*const u32> {
    let size = core::mem::size_of_val(words);
    let ptr = arena.malloc(size).ok_or(Error::OutOfMemory)?;
    unsafe {
        core::ptr::copy_nonoverlapping(words.as_ptr(), ptr.as_ptr().cast::<u32>(), words.len());
    }
    Ok(ptr.as_ptr().cast::<u32>())
}

/// Moves `val` into `arena`. Only used for plain-data types without `Drop`.
pub(crate) fn arena_new<'a, T>(val: T, arena: &'a Arena<'_>) -> Result<&'a mut T> {
    let ptr: NonNull<u8> = arena
        .alloc_raw(core::alloc::Layout::new::<T>())
        .ok_or(Error::OutOfMemory)?;
    let ptr = ptr.cast::<T>();
    unsafe {
        ptr.as_ptr().write(val);
        Ok(&mut *ptr.as_ptr())
    }
}

/// Decodes a base-92 varint whose first character `first` was already read.
/// Returns the value and the position after the last character consumed.
pub(crate) fn decode_base92_varint(
    bytes: &[u8],
    mut pos: usize,
    first: u8,
    min: u8,
    max: u8,
) -> core::result::Result<(u32, usize), String> {
    let bits_per_char = crate::utils::log2_ceiling((idx(max) - idx(min)) as usize);
    let mut val = 0u32;
    let mut shift = 0u32;
    let mut ch = first;
    loop {
        let bits = idx(ch) - idx(min);
        val |= bits << shift;
        match bytes.get(pos) {
            Some(&next) if (min..=max).contains(&next) => {
                ch = next;
                pos += 1;
                shift += bits_per_char;
                if shift >= 32 {
                    return Err("Overlong varint".to_string());
                }
            }
            _ => return Ok((val, pos)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_descriptor::MtDataEncoder;

    fn build_enum(values: &[u32], arena: &Arena<'_>) -> *const MiniTableEnum {
        let mut sorted = values.to_vec();
        sorted.sort_unstable();
        let mut e = MtDataEncoder::new();
        e.start_enum();
        for v in sorted {
            assert!(e.put_enum_value(v));
        }
        e.end_enum();
        MiniTableEnum::build(e.as_str(), arena).unwrap()
    }

    #[test]
    fn dense_and_sparse_values() {
        let arena = Arena::default();
        let values = [0, 1, 5, 63, 64, 100, 5000, (-1i32) as u32];
        let table = unsafe { &*build_enum(&values, &arena) };
        for v in values {
            assert!(table.check_value(v), "{v}");
        }
        for v in [2, 62, 65, 99, 4999, 5001, (-2i32) as u32] {
            assert!(!table.check_value(v), "{v}");
        }
        let mut all: Vec<u32> = table.values().collect();
        all.sort_unstable();
        let mut expected = values.to_vec();
        expected.sort_unstable();
        assert_eq!(all, expected);
    }

    #[test]
    fn empty_enum_accepts_nothing() {
        let arena = Arena::default();
        let table = MiniTableEnum::build("", &arena).unwrap();
        assert!(!table.check_value(0));
        assert!(!table.check_value(1000));
    }

    #[test]
    fn rejects_bad_input() {
        let arena = Arena::default();
        let err = MiniTableEnum::build("$", &arena).unwrap_err();
        assert_eq!(err.to_string(), "Error building mini table: Invalid enum version: $");
        let err = MiniTableEnum::build("!^", &arena).unwrap_err();
        assert_eq!(err.to_string(), "Error building mini table: Unexpected character: ^");
    }

    proptest::proptest! {
        #[test]
        fn membership_matches_input(values in proptest::collection::btree_set(proptest::num::u32::ANY, 0..40),
                                    probes in proptest::collection::vec(0u32..2000, 0..40)) {
            let arena = Arena::default();
            let values: Vec<u32> = values.into_iter().collect();
            let table = unsafe { &*build_enum(&values, &arena) };
            for v in values.iter().chain(probes.iter()) {
                proptest::prop_assert_eq!(table.check_value(*v), values.contains(v));
            }
        }
    }
}
