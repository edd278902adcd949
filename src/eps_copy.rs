//! Input stream that keeps `SLOP_BYTES` of readable memory past its end.
//!
//! The decoder reads tags, varints and fixed-width values through raw pointers
//! without checking bounds field by field. That is sound because the stream
//! guarantees that at least [`SLOP_BYTES`] bytes past `end` are always
//! addressable: while parsing the bulk of the input `end` sits `SLOP_BYTES`
//! before the real end, and the last stretch of input is copied into a zero
//! padded patch buffer. Overruns are detected afterwards by [`is_done`].
//!
//! Positions are tracked relative to `end`; a *limit* is the distance from
//! `end` to the end of the innermost length-delimited region.
//!
//! [`is_done`]: EpsCopyInputStream::is_done

use crate::status::DecodeStatus;
use crate::wire::SLOP_BYTES;

const PATCH_SIZE: usize = SLOP_BYTES * 2;

/// Outcome of an end-of-region check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Done {
    No,
    Yes,
}

pub(crate) struct EpsCopyInputStream<'i> {
    input: &'i [u8],
    end: *const u8,
    limit_ptr: *const u8,
    limit: isize,
    // Offset into `input` of `patch[0]` while reading from the patch buffer.
    patch_base: Option<usize>,
    patch: [u8; PATCH_SIZE],
}

impl<'i> EpsCopyInputStream<'i> {
    pub(crate) fn new(input: &'i [u8]) -> Self {
        EpsCopyInputStream {
            input,
            end: core::ptr::null(),
            limit_ptr: core::ptr::null(),
            limit: 0,
            patch_base: None,
            patch: [0; PATCH_SIZE],
        }
    }

    /// Positions the stream at the start of input and returns the read pointer.
    ///
    /// The stream refers to its own patch buffer afterwards, so it must not be
    /// moved until parsing is finished.
    pub(crate) fn start(&mut self) -> *const u8 {
        let size = self.input.len();
        let ptr;
        if size <= SLOP_BYTES {
            self.patch = [0; PATCH_SIZE];
            self.patch[..size].copy_from_slice(self.input);
            self.patch_base = Some(0);
            ptr = self.patch.as_ptr();
            self.end = unsafe { ptr.add(size) };
            self.limit = 0;
        } else {
            self.patch_base = None;
            ptr = self.input.as_ptr();
            self.end = unsafe { ptr.add(size - SLOP_BYTES) };
            self.limit = SLOP_BYTES as isize;
        }
        self.limit_ptr = self.end;
        ptr
    }

    #[inline(always)]
    fn overrun(&self, ptr: *const u8) -> isize {
        ptr as isize - self.end as isize
    }

    /// Whether `ptr` has reached the current limit.
    ///
    /// Flips to the patch buffer when `ptr` has entered the final slop region
    /// of the input. A pointer that ran past the limit is malformed input.
    #[inline(always)]
    pub(crate) fn is_done(&mut self, ptr: &mut *const u8) -> Result<Done, DecodeStatus> {
        if (*ptr as usize) < self.limit_ptr as usize {
            return Ok(Done::No);
        }
        let overrun = self.overrun(*ptr);
        if overrun == self.limit {
            return Ok(Done::Yes);
        }
        self.is_done_fallback(ptr, overrun)
    }

    #[inline(never)]
    fn is_done_fallback(&mut self, ptr: &mut *const u8, overrun: isize) -> Result<Done, DecodeStatus> {
        if overrun < self.limit && self.patch_base.is_none() {
            let base = self.input.len() - SLOP_BYTES;
            self.patch = [0; PATCH_SIZE];
            self.patch[..SLOP_BYTES].copy_from_slice(&self.input[base..]);
            self.patch_base = Some(base);
            let start = self.patch.as_ptr();
            *ptr = unsafe { start.offset(overrun) };
            self.end = unsafe { start.add(SLOP_BYTES) };
            self.limit -= SLOP_BYTES as isize;
            self.limit_ptr = unsafe { self.end.offset(self.limit.min(0)) };
            return self.is_done(ptr);
        }
        tracing::debug!(overrun, limit = self.limit, "read past end of region");
        Err(DecodeStatus::Malformed)
    }

    /// Whether `size` more bytes starting at `ptr` lie within the current limit.
    #[inline(always)]
    pub(crate) fn check_size(&self, ptr: *const u8, size: usize) -> bool {
        match isize::try_from(size) {
            Ok(size) => self.overrun(ptr) + size <= self.limit,
            Err(_) => false,
        }
    }

    /// Narrows the limit to `size` bytes from `ptr`; returns the delta needed
    /// to restore the enclosing limit.
    #[inline(always)]
    pub(crate) fn push_limit(&mut self, ptr: *const u8, size: usize) -> Result<isize, DecodeStatus> {
        if !self.check_size(ptr, size) {
            return Err(DecodeStatus::Malformed);
        }
        let limit = size as isize + self.overrun(ptr);
        let delta = self.limit - limit;
        self.limit = limit;
        self.limit_ptr = unsafe { self.end.offset(limit.min(0)) };
        Ok(delta)
    }

    #[inline(always)]
    pub(crate) fn pop_limit(&mut self, delta: isize) {
        self.limit += delta;
        self.limit_ptr = unsafe { self.end.offset(self.limit.min(0)) };
    }

    /// Offset of `ptr` within the original input.
    pub(crate) fn offset_of(&self, ptr: *const u8) -> usize {
        match self.patch_base {
            Some(base) => base + (ptr as usize - self.patch.as_ptr() as usize),
            None => ptr as usize - self.input.as_ptr() as usize,
        }
    }

    /// The original input bytes in `[start, start + size)`.
    ///
    /// The caller has checked the size against the limit, so the range is in
    /// bounds; slicing still verifies it.
    pub(crate) fn input_slice(&self, start: *const u8, size: usize) -> Result<&'i [u8], DecodeStatus> {
        let off = self.offset_of(start);
        self.input
            .get(off..off.checked_add(size).ok_or(DecodeStatus::Malformed)?)
            .ok_or(DecodeStatus::Malformed)
    }

    /// The original input bytes between two read pointers.
    pub(crate) fn input_range(&self, start_offset: usize, end: *const u8) -> Result<&'i [u8], DecodeStatus> {
        let end = self.offset_of(end);
        self.input.get(start_offset..end).ok_or(DecodeStatus::Malformed)
    }
}

/// Reads a varint through a raw pointer. At most ten bytes are touched.
///
/// # Safety
/// `ptr` must have `SLOP_BYTES` readable bytes after it.
#[inline(always)]
pub(crate) unsafe fn read_varint(ptr: *const u8) -> Result<(u64, *const u8), DecodeStatus> {
    unsafe {
        let first = *ptr;
        if first < 0x80 {
            return Ok((first as u64, ptr.add(1)));
        }
        let mut value = (first & 0x7f) as u64;
        for i in 1..10 {
            let b = *ptr.add(i);
            value |= ((b & 0x7f) as u64) << (7 * i);
            if b < 0x80 {
                return Ok((value, ptr.add(i + 1)));
            }
        }
        Err(DecodeStatus::Malformed)
    }
}

/// Reads a tag, which must fit in 32 bits.
///
/// # Safety
/// Same as [`read_varint`].
#[inline(always)]
pub(crate) unsafe fn read_tag(ptr: *const u8) -> Result<(u32, *const u8), DecodeStatus> {
    let (tag, ptr) = unsafe { read_varint(ptr)? };
    let tag = u32::try_from(tag).map_err(|_| DecodeStatus::Malformed)?;
    Ok((tag, ptr))
}

/// # Safety
/// `ptr` must have four readable bytes.
#[inline(always)]
pub(crate) unsafe fn read_fixed32(ptr: *const u8) -> (u32, *const u8) {
    unsafe { (u32::from_le_bytes(ptr.cast::<[u8; 4]>().read_unaligned()), ptr.add(4)) }
}

/// # Safety
/// `ptr` must have eight readable bytes.
#[inline(always)]
pub(crate) unsafe fn read_fixed64(ptr: *const u8) -> (u64, *const u8) {
    unsafe { (u64::from_le_bytes(ptr.cast::<[u8; 8]>().read_unaligned()), ptr.add(8)) }
}
