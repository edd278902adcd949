//! Repeated field storage.
//!
//! An [`Array`] is a growable buffer of fixed-size elements living in an
//! arena. The element size is stored in the low bits of the data pointer,
//! so an array is three words regardless of its element type:
//!
//! ```
//! use miniproto::array::Array;
//! use miniproto::mini_table::CType;
//! use miniproto::{Arena, MessageValue};
//!
//! let arena = Arena::default();
//! let array = Array::new(&arena, 4, CType::Int32).unwrap();
//! array.append(MessageValue::Int32(3), &arena);
//! array.append(MessageValue::Int32(270), &arena);
//! assert_eq!(array.as_slice::<i32>(), &[3, 270]);
//! ```

use core::ptr;

use crate::arena::Arena;
use crate::base::MessageValue;
use crate::mini_table::CType;

const LG2_MASK: usize = 7;

/// `{data, size, capacity}` with the element size's log2 tagged into `data`.
#[repr(C)]
pub struct Array {
    data: usize,
    size: usize,
    capacity: usize,
}

/// Element types that can be viewed as a typed slice.
pub trait ArrayElem: Copy {
    const SIZE_LG2: u8;
}

macro_rules! array_elem {
    ($($t:ty => $lg2:expr),* $(,)?) => {
        $(impl ArrayElem for $t { const SIZE_LG2: u8 = $lg2; })*
    };
}

array_elem!(
    bool => 0,
    i32 => 2,
    u32 => 2,
    f32 => 2,
    i64 => 3,
    u64 => 3,
    f64 => 3,
    crate::StringView => 4,
    *mut u8 => 3,
);

#[inline(always)]
fn tag(ptr: *mut u8, lg2: u8) -> usize {
    debug_assert!(lg2 != 1);
    // Element sizes 1, 4, 8, 16 encode as 0, 2, 3, 4.
    ptr as usize | lg2 as usize
}

impl Array {
    /// Allocates an empty array with room for `init_capacity` elements of
    /// `ctype`. Header and first buffer share one allocation.
    pub fn new<'a>(arena: &'a Arena<'_>, init_capacity: usize, ctype: CType) -> Option<&'a mut Array> {
        Self::with_lg2(arena, init_capacity, ctype.size_lg2())
    }

    pub(crate) fn with_lg2<'a>(arena: &'a Arena<'_>, init_capacity: usize, lg2: u8) -> Option<&'a mut Array> {
        let header = core::mem::size_of::<Array>();
        let bytes = init_capacity.checked_shl(lg2 as u32)?;
        let raw = arena.malloc(header.checked_add(bytes)?)?;
        unsafe {
            let array = raw.as_ptr().cast::<Array>();
            let data = raw.as_ptr().add(header);
            array.write(Array {
                data: tag(data, lg2),
                size: 0,
                capacity: init_capacity,
            });
            Some(&mut *array)
        }
    }

    #[inline(always)]
    pub fn elem_size_lg2(&self) -> u8 {
        (self.data & LG2_MASK) as u8
    }

    #[inline(always)]
    pub(crate) fn data_ptr(&self) -> *mut u8 {
        (self.data & !LG2_MASK) as *mut u8
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline(always)]
    pub(crate) fn elem_ptr(&self, i: usize) -> *mut u8 {
        unsafe { self.data_ptr().add(i << self.elem_size_lg2()) }
    }

    /// Views the elements as `T`, which must have the array's element size.
    pub fn as_slice<T: ArrayElem>(&self) -> &[T] {
        assert_eq!(T::SIZE_LG2, self.elem_size_lg2(), "element size mismatch");
        unsafe { core::slice::from_raw_parts(self.data_ptr().cast::<T>(), self.size) }
    }

    pub fn as_mut_slice<T: ArrayElem>(&mut self) -> &mut [T] {
        assert_eq!(T::SIZE_LG2, self.elem_size_lg2(), "element size mismatch");
        unsafe { core::slice::from_raw_parts_mut(self.data_ptr().cast::<T>(), self.size) }
    }

    /// Grows the buffer to hold at least `min_capacity` elements.
    #[inline]
    pub fn reserve(&mut self, min_capacity: usize, arena: &Arena<'_>) -> bool {
        if min_capacity <= self.capacity {
            return true;
        }
        self.grow(min_capacity, arena)
    }

    #[inline(never)]
    fn grow(&mut self, min_capacity: usize, arena: &Arena<'_>) -> bool {
        let lg2 = self.elem_size_lg2();
        let mut new_cap = self.capacity.max(4);
        while new_cap < min_capacity {
            let Some(doubled) = new_cap.checked_mul(2) else {
                return false;
            };
            new_cap = doubled;
        }
        let (Some(old_bytes), Some(new_bytes)) = (
            self.capacity.checked_shl(lg2 as u32),
            new_cap.checked_shl(lg2 as u32).filter(|b| *b <= isize::MAX as usize),
        ) else {
            return false;
        };
        let old = ptr::NonNull::new(self.data_ptr()).filter(|_| old_bytes > 0);
        let Some(fresh) = arena.realloc(old, old_bytes, new_bytes) else {
            return false;
        };
        self.data = tag(fresh.as_ptr(), lg2);
        self.capacity = new_cap;
        true
    }

    /// Sets the size, zero-filling any new elements.
    pub fn resize(&mut self, size: usize, arena: &Arena<'_>) -> bool {
        let old = self.size;
        if !self.reserve(size, arena) {
            return false;
        }
        if size > old {
            unsafe { ptr::write_bytes(self.elem_ptr(old), 0, (size - old) << self.elem_size_lg2()) };
        }
        self.size = size;
        true
    }

    /// Appends `count` uninitialized elements and returns a pointer to the first.
    pub(crate) fn extend_uninit(&mut self, count: usize, arena: &Arena<'_>) -> Option<*mut u8> {
        let old = self.size;
        let new = old.checked_add(count)?;
        if !self.reserve(new, arena) {
            return None;
        }
        self.size = new;
        Some(self.elem_ptr(old))
    }

    /// Reads element `i` as a value of `ctype`.
    pub fn get(&self, i: usize, ctype: CType) -> Option<MessageValue> {
        if i >= self.size {
            return None;
        }
        unsafe { MessageValue::read(self.elem_ptr(i), ctype) }
    }

    /// Overwrites element `i`. Returns `false` if `i` is out of range.
    pub fn set(&mut self, i: usize, val: MessageValue) -> bool {
        if i >= self.size {
            return false;
        }
        unsafe { val.write(self.elem_ptr(i)) };
        true
    }

    pub fn append(&mut self, val: MessageValue, arena: &Arena<'_>) -> bool {
        match self.extend_uninit(1, arena) {
            Some(slot) => {
                unsafe { val.write(slot) };
                true
            }
            None => false,
        }
    }

    /// Moves `count` elements from `src` to `dst` within the array.
    pub fn move_range(&mut self, dst: usize, src: usize, count: usize) {
        let lg2 = self.elem_size_lg2();
        assert!(dst.max(src) + count <= self.size, "range out of bounds");
        unsafe { ptr::copy(self.elem_ptr(src), self.elem_ptr(dst), count << lg2) };
    }

    /// Opens a zeroed gap of `count` elements at `i`.
    pub fn insert(&mut self, i: usize, count: usize, arena: &Arena<'_>) -> bool {
        let old = self.size;
        if i > old || !self.resize(old + count, arena) {
            return false;
        }
        self.move_range(i + count, i, old - i);
        unsafe { ptr::write_bytes(self.elem_ptr(i), 0, count << self.elem_size_lg2()) };
        true
    }

    /// Removes `count` elements starting at `i`.
    pub fn delete(&mut self, i: usize, count: usize) {
        let end = i + count;
        assert!(end <= self.size, "range out of bounds");
        let tail = self.size - end;
        self.move_range(i, end, tail);
        self.size -= count;
    }

    pub fn clear(&mut self) {
        self.size = 0;
    }

    pub fn iter(&self, ctype: CType) -> impl Iterator<Item = MessageValue> + '_ {
        (0..self.size).filter_map(move |i| self.get(i, ctype))
    }
}

impl core::fmt::Debug for Array {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Array")
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .field("elem_size_lg2", &self.elem_size_lg2())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StringView;

    #[test]
    fn tagged_pointer_keeps_element_size() {
        let arena = Arena::default();
        for (ctype, lg2) in [(CType::Bool, 0), (CType::Int32, 2), (CType::Double, 3), (CType::String, 4)] {
            let array = Array::new(&arena, 0, ctype).unwrap();
            assert_eq!(array.elem_size_lg2(), lg2);
            assert!(array.resize(9, &arena));
            assert_eq!(array.elem_size_lg2(), lg2);
            assert_eq!(array.data_ptr() as usize % 8, 0);
        }
    }

    #[test]
    fn insert_and_delete() {
        let arena = Arena::default();
        let array = Array::new(&arena, 1, CType::Int64).unwrap();
        for v in [1i64, 2, 5] {
            assert!(array.append(MessageValue::Int64(v), &arena));
        }
        assert!(array.insert(2, 2, &arena));
        array.set(2, MessageValue::Int64(3));
        array.set(3, MessageValue::Int64(4));
        assert_eq!(array.as_slice::<i64>(), &[1, 2, 3, 4, 5]);
        array.delete(0, 2);
        assert_eq!(array.as_slice::<i64>(), &[3, 4, 5]);
        assert_eq!(array.get(5, CType::Int64), None);
        assert!(!array.set(5, MessageValue::Int64(0)));
    }

    #[test]
    fn strings() {
        let arena = Arena::default();
        let array = Array::new(&arena, 0, CType::String).unwrap();
        array.append(MessageValue::String(StringView::from_str("a")), &arena);
        array.append(MessageValue::String(StringView::from_str("bc")), &arena);
        let got: Vec<_> = array.iter(CType::String).collect();
        assert_eq!(
            got,
            vec![
                MessageValue::String(StringView::from_str("a")),
                MessageValue::String(StringView::from_str("bc"))
            ]
        );
    }

    proptest::proptest! {
        #[test]
        fn append_then_get_last(values in proptest::collection::vec(proptest::num::i32::ANY, 1..200)) {
            let arena = Arena::default();
            let array = Array::new(&arena, 0, CType::Int32).unwrap();
            for v in &values {
                proptest::prop_assert!(array.append(MessageValue::Int32(*v), &arena));
                proptest::prop_assert_eq!(array.get(array.size() - 1, CType::Int32), Some(MessageValue::Int32(*v)));
            }
            proptest::prop_assert_eq!(array.as_slice::<i32>(), &values[..]);
        }
    }
}
