//! Protobuf binary wire format primitives.

/// Bytes past the logical end of input that the decoder may always read.
pub const SLOP_BYTES: usize = 16;

pub const MAX_VARINT_LEN: usize = 10;

/// Largest legal field number, `2^29 - 1`.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    I64 = 1,
    Delimited = 2,
    StartGroup = 3,
    EndGroup = 4,
    I32 = 5,
}

impl WireType {
    pub const fn from_tag(tag: u32) -> Option<WireType> {
        match tag & 7 {
            0 => Some(WireType::Varint),
            1 => Some(WireType::I64),
            2 => Some(WireType::Delimited),
            3 => Some(WireType::StartGroup),
            4 => Some(WireType::EndGroup),
            5 => Some(WireType::I32),
            _ => None,
        }
    }
}

#[inline(always)]
pub const fn make_tag(number: u32, wire_type: WireType) -> u32 {
    (number << 3) | wire_type as u32
}

#[inline(always)]
pub const fn tag_number(tag: u32) -> u32 {
    tag >> 3
}

#[inline(always)]
pub const fn zigzag_encode32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

#[inline(always)]
pub const fn zigzag_encode64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[inline(always)]
pub const fn zigzag_decode32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

#[inline(always)]
pub const fn zigzag_decode64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

pub const fn varint_size(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Writes `v` as a varint into `buf`, returning the number of bytes used.
#[inline]
pub fn encode_varint(mut v: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf[i] = byte;
            return i + 1;
        }
        buf[i] = byte | 0x80;
        i += 1;
    }
}

pub fn push_varint(out: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let n = encode_varint(v, &mut buf);
    out.extend_from_slice(&buf[..n]);
}

/// Reads a varint from the start of `bytes`.
///
/// Returns the value and the number of bytes consumed, or `None` if the
/// varint is truncated or longer than ten bytes.
pub fn read_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &b) in bytes.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= ((b & 0x7f) as u64) << (7 * i);
        if b < 0x80 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Length of the complete field (tag included) at the start of `bytes`.
///
/// Groups are walked up to `depth_limit` levels. Used to split unknown field
/// storage back into individual fields.
pub fn field_len(bytes: &[u8], depth_limit: u32) -> Option<usize> {
    let (tag, tag_len) = read_varint(bytes)?;
    let tag = u32::try_from(tag).ok()?;
    let rest = &bytes[tag_len..];
    let body = match WireType::from_tag(tag)? {
        WireType::Varint => read_varint(rest)?.1,
        WireType::I64 => 8,
        WireType::I32 => 4,
        WireType::Delimited => {
            let (len, n) = read_varint(rest)?;
            n.checked_add(usize::try_from(len).ok()?)?
        }
        WireType::StartGroup => {
            if depth_limit == 0 {
                return None;
            }
            let mut pos = 0;
            loop {
                let (inner, inner_len) = read_varint(rest.get(pos..)?)?;
                if inner as u32 == make_tag(tag_number(tag), WireType::EndGroup) {
                    break pos + inner_len;
                }
                pos += field_len(rest.get(pos..)?, depth_limit - 1)?;
            }
        }
        WireType::EndGroup => return None,
    };
    let total = tag_len + body;
    if total > bytes.len() { None } else { Some(total) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zigzag() {
        assert_eq!(zigzag_encode32(0), 0);
        assert_eq!(zigzag_encode32(-1), 1);
        assert_eq!(zigzag_encode32(1), 2);
        assert_eq!(zigzag_encode32(i32::MIN), u32::MAX);
        assert_eq!(zigzag_decode64(zigzag_encode64(i64::MIN)), i64::MIN);
        assert_eq!(zigzag_decode32(3), -2);
    }

    #[test]
    fn varints() {
        let mut buf = [0u8; MAX_VARINT_LEN];
        assert_eq!(encode_varint(150, &mut buf), 2);
        assert_eq!(&buf[..2], &[0x96, 0x01]);
        assert_eq!(read_varint(&[0x96, 0x01]), Some((150, 2)));
        assert_eq!(encode_varint(u64::MAX, &mut buf), 10);
        assert_eq!(read_varint(&buf), Some((u64::MAX, 10)));
        assert_eq!(read_varint(&[0x80; 11]), None);
        assert_eq!(read_varint(&[0x80]), None);
        assert_eq!(varint_size(0), 1);
        assert_eq!(varint_size(1 << 63), 10);
    }

    #[test]
    fn field_lengths() {
        assert_eq!(field_len(&[0x08, 0x96, 0x01, 0xff], 10), Some(3));
        assert_eq!(field_len(&[0x12, 0x02, b'h', b'i'], 10), Some(4));
        assert_eq!(field_len(&[0x12, 0x05, b'h'], 10), None);
        // group 3 { field 1: 1 }
        assert_eq!(field_len(&[0x1b, 0x08, 0x01, 0x1c], 10), Some(4));
        assert_eq!(field_len(&[0x1b, 0x08, 0x01, 0x1c], 0), None);
        assert_eq!(field_len(&[0x0e], 10), None);
    }
}
