//! Non-owning byte slice used for string and bytes fields.

use core::ptr::NonNull;

use crate::arena::Arena;

/// Pointer plus length into memory owned by some arena (or static data).
///
/// This is the in-message representation of `string` and `bytes` fields, so
/// it is `#[repr(C)]` and exactly two words wide.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct StringView {
    data: *const u8,
    size: usize,
}

impl StringView {
    pub const fn empty() -> Self {
        StringView {
            data: core::ptr::null(),
            size: 0,
        }
    }

    /// Views `bytes` without copying. The caller keeps `bytes` alive.
    pub const fn from_bytes(bytes: &[u8]) -> Self {
        StringView {
            data: bytes.as_ptr(),
            size: bytes.len(),
        }
    }

    pub const fn from_str(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    /// Copies `bytes` into `arena` and views the copy.
    pub fn copy_in(bytes: &[u8], arena: &Arena<'_>) -> Option<Self> {
        if bytes.is_empty() {
            return Some(Self::empty());
        }
        let ptr = arena.copy_bytes(bytes)?;
        Some(StringView {
            data: ptr.as_ptr(),
            size: bytes.len(),
        })
    }

    pub const fn len(&self) -> usize {
        self.size
    }

    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub const fn data(&self) -> *const u8 {
        self.data
    }

    /// The viewed bytes.
    ///
    /// The slice is valid as long as the memory the view was created from;
    /// for decoded fields that is the owning arena (or the aliased input).
    pub fn as_bytes(&self) -> &[u8] {
        match NonNull::new(self.data as *mut u8) {
            Some(ptr) => unsafe { core::slice::from_raw_parts(ptr.as_ptr(), self.size) },
            None => &[],
        }
    }

    pub fn to_str(&self) -> Option<&str> {
        core::str::from_utf8(self.as_bytes()).ok()
    }
}

impl Default for StringView {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for StringView {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for StringView {}

impl PartialEq<[u8]> for StringView {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl PartialEq<&str> for StringView {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialOrd for StringView {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StringView {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl core::fmt::Debug for StringView {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.to_str() {
            Some(s) => core::fmt::Debug::fmt(s, f),
            None => core::fmt::Debug::fmt(self.as_bytes(), f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allocator_api2::alloc::Global;

    #[test]
    fn copy_in_outlives_source() {
        let arena = Arena::new(&Global);
        let view = {
            let owned = std::string::String::from("testing");
            StringView::copy_in(owned.as_bytes(), &arena).unwrap()
        };
        assert_eq!(view, "testing");
        assert_eq!(view.len(), 7);
    }

    #[test]
    fn empty_view_has_empty_slice() {
        let view = StringView::default();
        assert!(view.is_empty());
        assert_eq!(view.as_bytes(), b"");
        assert_eq!(view, StringView::from_str(""));
    }

    #[test]
    fn ordering_is_bytewise() {
        let a = StringView::from_str("abc");
        let b = StringView::from_str("abd");
        let c = StringView::from_str("ab");
        assert!(a < b);
        assert!(c < a);
    }
}
