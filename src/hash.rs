//! Arena backed hash tables keyed by byte strings or integers.
//!
//! Both tables keep their entries inline in a single arena allocation and
//! resolve collisions by chaining through other slots of the same array
//! (chained scatter). Insertion uses Brent's variation: when a new key's main
//! position is occupied by an entry that was only parked there, that entry is
//! evicted to a free slot, so every chain starts at its own main position and a
//! lookup walks exactly one chain.
//!
//! Values are plain `u64` words; callers pack pointers or scalars into them.

use core::ptr;

use crate::arena::Arena;

pub type TableValue = u64;

const EMPTY_KEY: usize = 0;

/// Largest array part `IntTable::compact` will choose, as a power of two.
const MAX_ARRAY_SIZE_LG2: usize = 16;
const MIN_DENSITY: f64 = 0.1;

const ARRAY_SENTINEL: TableValue = u64::MAX;

#[repr(C)]
#[derive(Clone, Copy)]
struct TabEnt {
    key: usize,
    val: TableValue,
    next: *mut TabEnt,
}

impl TabEnt {
    fn is_empty(&self) -> bool {
        self.key == EMPTY_KEY
    }
}

/// Shared chained-scatter core. Keys are opaque words; the owning table
/// supplies hashing and equality.
struct Table {
    entries: *mut TabEnt,
    mask: u32,
    count: u32,
}

impl Table {
    fn init(size_lg2: u32, arena: &Arena<'_>) -> Option<Self> {
        if size_lg2 >= 32 {
            return None;
        }
        let size = 1usize << size_lg2;
        let bytes = size.checked_mul(core::mem::size_of::<TabEnt>())?;
        let entries = arena.malloc_zeroed(bytes)?.as_ptr() as *mut TabEnt;
        Some(Table {
            entries,
            mask: (size - 1) as u32,
            count: 0,
        })
    }

    fn size(&self) -> usize {
        self.mask as usize + 1
    }

    fn size_lg2(&self) -> u32 {
        self.size().trailing_zeros()
    }

    fn is_full(&self) -> bool {
        let size = self.size() as u32;
        self.count == size - (size >> 3)
    }

    fn ent(&self, i: usize) -> *mut TabEnt {
        debug_assert!(i < self.size());
        unsafe { self.entries.add(i) }
    }

    fn main_position(&self, hash: u32) -> *mut TabEnt {
        self.ent((hash & self.mask) as usize)
    }

    fn find(&self, hash: u32, mut eq: impl FnMut(usize) -> bool) -> Option<*mut TabEnt> {
        if self.count == 0 {
            return None;
        }
        let mut e = self.main_position(hash);
        unsafe {
            if (*e).is_empty() {
                return None;
            }
            loop {
                if eq((*e).key) {
                    return Some(e);
                }
                e = (*e).next;
                if e.is_null() {
                    return None;
                }
            }
        }
    }

    fn empty_after(&self, e: *mut TabEnt) -> *mut TabEnt {
        let start = (e as usize - self.entries as usize) / core::mem::size_of::<TabEnt>();
        let size = self.size();
        for i in (start + 1..size).chain(0..start) {
            let candidate = self.ent(i);
            if unsafe { (*candidate).is_empty() } {
                return candidate;
            }
        }
        unreachable!("hash table has no empty slot below its load factor")
    }

    /// Inserts a key known to be absent. The table must not be full.
    fn insert(&mut self, key: usize, val: TableValue, hash: u32, hash_of: impl Fn(usize) -> u32) {
        debug_assert!(!self.is_full());
        self.count += 1;
        let main = self.main_position(hash);
        let ours;
        unsafe {
            if (*main).is_empty() {
                (*main).next = ptr::null_mut();
                ours = main;
            } else {
                let free = self.empty_after(main);
                let mut chain = self.main_position(hash_of((*main).key));
                if chain == main {
                    // The occupant belongs here; hang ourselves off its chain.
                    (*free).next = (*main).next;
                    (*main).next = free;
                    ours = free;
                } else {
                    // The occupant was parked; move it and take the slot.
                    *free = *main;
                    while (*chain).next != main {
                        chain = (*chain).next;
                        debug_assert!(!chain.is_null());
                    }
                    (*chain).next = free;
                    (*main).next = ptr::null_mut();
                    ours = main;
                }
            }
            (*ours).key = key;
            (*ours).val = val;
        }
    }

    fn remove(&mut self, hash: u32, mut eq: impl FnMut(usize) -> bool) -> Option<(usize, TableValue)> {
        let chain = self.main_position(hash);
        unsafe {
            if (*chain).is_empty() {
                return None;
            }
            if eq((*chain).key) {
                self.count -= 1;
                let removed = ((*chain).key, (*chain).val);
                let next = (*chain).next;
                if next.is_null() {
                    (*chain).key = EMPTY_KEY;
                } else {
                    *chain = *next;
                    (*next).key = EMPTY_KEY;
                    (*next).next = ptr::null_mut();
                }
                return Some(removed);
            }
            let mut prev = chain;
            while !(*prev).next.is_null() && !eq((*(*prev).next).key) {
                prev = (*prev).next;
            }
            let target = (*prev).next;
            if target.is_null() {
                return None;
            }
            self.count -= 1;
            let removed = ((*target).key, (*target).val);
            (*prev).next = (*target).next;
            (*target).key = EMPTY_KEY;
            (*target).next = ptr::null_mut();
            Some(removed)
        }
    }

    /// Index of the first occupied slot at or after `from`.
    fn next_occupied(&self, from: usize) -> Option<usize> {
        (from..self.size()).find(|&i| unsafe { !(*self.ent(i)).is_empty() })
    }

    fn clear(&mut self) {
        self.count = 0;
        unsafe { ptr::write_bytes(self.entries, 0, self.size()) };
    }
}

/// Number of slots needed to hold `expected` entries under the load factor.
fn entries_needed_for(expected: usize) -> usize {
    let need = expected + 1 + expected / 7;
    debug_assert!(need - (need >> 3) >= expected);
    need
}

const WYHASH_SALT: [u64; 5] = [
    0x243F6A8885A308D3,
    0x13198A2E03707344,
    0xA4093822299F31D0,
    0x082EFA98EC4E6C89,
    0x452821E638D01377,
];

static HASH_SEED: u8 = 0;

fn seed() -> u64 {
    &HASH_SEED as *const u8 as u64
}

#[inline]
fn wyhash_mix(a: u64, b: u64) -> u64 {
    let product = (a as u128) * (b as u128);
    (product as u64) ^ ((product >> 64) as u64)
}

fn load64(bytes: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(word)
}

fn load32(bytes: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word) as u64
}

/// Wyhash over `bytes`, mixed with `seed`.
pub fn wyhash(bytes: &[u8], seed: u64) -> u64 {
    let salt = &WYHASH_SALT;
    let mut rest = bytes;
    let mut state = seed ^ salt[0];
    if rest.len() > 64 {
        let mut dup = state;
        while rest.len() > 64 {
            let cs0 = wyhash_mix(load64(rest, 0) ^ salt[1], load64(rest, 8) ^ state);
            let cs1 = wyhash_mix(load64(rest, 16) ^ salt[2], load64(rest, 24) ^ state);
            state = cs0 ^ cs1;
            let ds0 = wyhash_mix(load64(rest, 32) ^ salt[3], load64(rest, 40) ^ dup);
            let ds1 = wyhash_mix(load64(rest, 48) ^ salt[4], load64(rest, 56) ^ dup);
            dup = ds0 ^ ds1;
            rest = &rest[64..];
        }
        state ^= dup;
    }
    while rest.len() > 16 {
        state = wyhash_mix(load64(rest, 0) ^ salt[1], load64(rest, 8) ^ state);
        rest = &rest[16..];
    }
    let len = rest.len();
    let (a, b) = if len > 8 {
        (load64(rest, 0), load64(rest, len - 8))
    } else if len > 3 {
        (load32(rest, 0), load32(rest, len - 4))
    } else if len > 0 {
        let a = ((rest[0] as u64) << 16) | ((rest[len >> 1] as u64) << 8) | rest[len - 1] as u64;
        (a, 0)
    } else {
        (0, 0)
    };
    let w = wyhash_mix(a ^ salt[1], b ^ state);
    wyhash_mix(w, salt[1] ^ bytes.len() as u64)
}

fn str_hash(bytes: &[u8]) -> u32 {
    wyhash(bytes, seed()) as u32
}

/// Reads the bytes of an arena key stored as `[u32 len][bytes][NUL]`.
fn prefixed_bytes<'t>(key: usize) -> &'t [u8] {
    unsafe {
        let size = *(key as *const u32) as usize;
        core::slice::from_raw_parts((key as *const u8).add(4), size)
    }
}

fn copy_prefixed(bytes: &[u8], arena: &Arena<'_>) -> Option<usize> {
    let size = u32::try_from(bytes.len()).ok()?;
    let mem = arena.malloc(4 + bytes.len() + 1)?.as_ptr();
    unsafe {
        (mem as *mut u32).write(size);
        ptr::copy_nonoverlapping(bytes.as_ptr(), mem.add(4), bytes.len());
        *mem.add(4 + bytes.len()) = 0;
    }
    Some(mem as usize)
}

/// Byte-string keyed table. Keys are copied into the arena on insert.
pub struct StrTable {
    t: Table,
}

impl StrTable {
    /// Creates a table sized to hold `expected` entries without growing.
    pub fn new(expected: usize, arena: &Arena<'_>) -> Option<Self> {
        let size_lg2 = crate::utils::log2_ceiling(entries_needed_for(expected));
        Some(StrTable {
            t: Table::init(size_lg2, arena)?,
        })
    }

    pub fn len(&self) -> usize {
        self.t.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.t.count == 0
    }

    /// Inserts `key`, which must not already be present.
    ///
    /// Fails only when the arena cannot satisfy the allocation.
    pub fn insert(&mut self, key: &[u8], val: TableValue, arena: &Arena<'_>) -> Option<()> {
        debug_assert!(self.lookup(key).is_none());
        if self.t.is_full() {
            self.resize(self.t.size_lg2() + 1, arena)?;
        }
        let stored = copy_prefixed(key, arena)?;
        self.t
            .insert(stored, val, str_hash(key), |k| str_hash(prefixed_bytes(k)));
        Some(())
    }

    pub fn lookup(&self, key: &[u8]) -> Option<TableValue> {
        self.t
            .find(str_hash(key), |k| prefixed_bytes(k) == key)
            .map(|e| unsafe { (*e).val })
    }

    pub fn lookup_mut(&mut self, key: &[u8]) -> Option<&mut TableValue> {
        self.t
            .find(str_hash(key), |k| prefixed_bytes(k) == key)
            .map(|e| unsafe { &mut (*e).val })
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<TableValue> {
        self.t
            .remove(str_hash(key), |k| prefixed_bytes(k) == key)
            .map(|(_, v)| v)
    }

    /// Rebuilds the table with `1 << size_lg2` slots, reusing the stored keys.
    pub fn resize(&mut self, size_lg2: u32, arena: &Arena<'_>) -> Option<()> {
        let mut fresh = Table::init(size_lg2, arena)?;
        let mut i = 0;
        while let Some(idx) = self.t.next_occupied(i) {
            let e = unsafe { *self.t.ent(idx) };
            let bytes = prefixed_bytes(e.key);
            fresh.insert(e.key, e.val, str_hash(bytes), |k| str_hash(prefixed_bytes(k)));
            i = idx + 1;
        }
        self.t = fresh;
        Some(())
    }

    pub fn clear(&mut self) {
        self.t.clear();
    }

    pub fn iter(&self) -> StrTableIter<'_> {
        StrTableIter {
            table: &self.t,
            next: 0,
        }
    }
}

impl core::fmt::Debug for StrTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(k, v)| (crate::string_view::StringView::from_bytes(k), v)))
            .finish()
    }
}

/// Iterator over `(key, value)` pairs of a [`StrTable`] in slot order.
pub struct StrTableIter<'t> {
    table: &'t Table,
    next: usize,
}

impl<'t> Iterator for StrTableIter<'t> {
    type Item = (&'t [u8], TableValue);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.table.next_occupied(self.next)?;
        self.next = idx + 1;
        let e = unsafe { &*self.table.ent(idx) };
        Some((prefixed_bytes(e.key), e.val))
    }
}

fn int_hash(key: usize) -> u32 {
    let key = key as u64;
    (key as u32) ^ ((key >> 32) as u32)
}

/// Integer keyed table: a dense array for small keys plus a hash part.
///
/// The array part always has at least one slot so key 0 never reaches the
/// hash part, where 0 marks an empty slot.
pub struct IntTable {
    t: Table,
    array: *mut TableValue,
    presence: *mut u8,
    array_size: usize,
    array_count: usize,
}

impl IntTable {
    pub fn new(arena: &Arena<'_>) -> Option<Self> {
        Self::with_sizes(0, 3, arena)
    }

    pub fn with_sizes(array_size: usize, hash_size_lg2: u32, arena: &Arena<'_>) -> Option<Self> {
        let t = Table::init(hash_size_lg2, arena)?;
        let array_size = array_size.max(1);
        let array_bytes = array_size.checked_mul(core::mem::size_of::<TableValue>())?;
        let presence_bytes = array_size.div_ceil(8);
        let mem = arena.malloc(array_bytes.checked_add(presence_bytes)?)?.as_ptr();
        unsafe {
            ptr::write_bytes(mem, 0xff, array_bytes);
            ptr::write_bytes(mem.add(array_bytes), 0, presence_bytes);
        }
        Some(IntTable {
            t,
            array: mem as *mut TableValue,
            presence: unsafe { mem.add(array_bytes) },
            array_size,
            array_count: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.t.count as usize + self.array_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn array_has(&self, key: usize) -> bool {
        debug_assert!(key < self.array_size);
        unsafe { *self.presence.add(key / 8) & (1 << (key % 8)) != 0 }
    }

    fn value_slot(&self, key: usize) -> Option<*mut TableValue> {
        if key < self.array_size {
            if self.array_has(key) {
                Some(unsafe { self.array.add(key) })
            } else {
                None
            }
        } else {
            self.t
                .find(int_hash(key), |k| k == key)
                .map(|e| unsafe { ptr::addr_of_mut!((*e).val) })
        }
    }

    /// Inserts `key`, which must not already be present.
    pub fn insert(&mut self, key: usize, val: TableValue, arena: &Arena<'_>) -> Option<()> {
        debug_assert!(self.lookup(key).is_none());
        if key < self.array_size {
            self.array_count += 1;
            unsafe {
                *self.array.add(key) = val;
                *self.presence.add(key / 8) |= 1 << (key % 8);
            }
            return Some(());
        }
        if self.t.is_full() {
            let mut fresh = Table::init(self.t.size_lg2() + 1, arena)?;
            let mut i = 0;
            while let Some(idx) = self.t.next_occupied(i) {
                let e = unsafe { *self.t.ent(idx) };
                fresh.insert(e.key, e.val, int_hash(e.key), int_hash);
                i = idx + 1;
            }
            self.t = fresh;
        }
        self.t.insert(key, val, int_hash(key), int_hash);
        Some(())
    }

    pub fn lookup(&self, key: usize) -> Option<TableValue> {
        self.value_slot(key).map(|slot| unsafe { *slot })
    }

    /// Overwrites the value of an existing key. Returns `false` if absent.
    pub fn replace(&mut self, key: usize, val: TableValue) -> bool {
        match self.value_slot(key) {
            Some(slot) => {
                unsafe { *slot = val };
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: usize) -> Option<TableValue> {
        if key < self.array_size {
            if !self.array_has(key) {
                return None;
            }
            self.array_count -= 1;
            unsafe {
                let old = *self.array.add(key);
                *self.array.add(key) = ARRAY_SENTINEL;
                *self.presence.add(key / 8) &= !(1 << (key % 8));
                Some(old)
            }
        } else {
            self.t.remove(int_hash(key), |k| k == key).map(|(_, v)| v)
        }
    }

    /// Re-chooses the array part so that it is the largest power-of-two
    /// prefix of key space that is at least 10% occupied, then rebuilds.
    pub fn compact(&mut self, arena: &Arena<'_>) -> Option<()> {
        let mut counts = [0usize; MAX_ARRAY_SIZE_LG2 + 1];
        let mut max = [0usize; MAX_ARRAY_SIZE_LG2 + 1];
        let mut overflow = 0;
        for (key, _) in self.iter() {
            let bucket = crate::utils::log2_ceiling(key) as usize;
            if bucket > MAX_ARRAY_SIZE_LG2 {
                overflow += 1;
                continue;
            }
            max[bucket] = max[bucket].max(key);
            counts[bucket] += 1;
        }
        let mut arr_count = self.len() - overflow;
        let mut size_lg2 = MAX_ARRAY_SIZE_LG2;
        while size_lg2 > 0 {
            if counts[size_lg2] != 0 {
                if arr_count as f64 >= (1usize << size_lg2) as f64 * MIN_DENSITY {
                    break;
                }
                arr_count -= counts[size_lg2];
            }
            size_lg2 -= 1;
        }
        let arr_size = max[size_lg2] + 1;
        let hash_count = self.len() - arr_count;
        let hash_size_lg2 = if hash_count == 0 {
            0
        } else {
            crate::utils::log2_ceiling(entries_needed_for(hash_count))
        };
        let mut fresh = IntTable::with_sizes(arr_size, hash_size_lg2, arena)?;
        for (key, val) in self.iter() {
            fresh.insert(key, val, arena)?;
        }
        *self = fresh;
        Some(())
    }

    pub fn clear(&mut self) {
        self.array_count = 0;
        unsafe {
            ptr::write_bytes(self.array as *mut u8, 0xff, self.array_size * core::mem::size_of::<TableValue>());
            ptr::write_bytes(self.presence, 0, self.array_size.div_ceil(8));
        }
        self.t.clear();
    }

    pub fn iter(&self) -> IntTableIter<'_> {
        IntTableIter { table: self, next: 0 }
    }

    #[cfg(test)]
    fn array_size(&self) -> usize {
        self.array_size
    }
}

/// Iterator over an [`IntTable`]: array part in key order, then hash slots.
pub struct IntTableIter<'t> {
    table: &'t IntTable,
    next: usize,
}

impl Iterator for IntTableIter<'_> {
    type Item = (usize, TableValue);

    fn next(&mut self) -> Option<Self::Item> {
        let t = self.table;
        while self.next < t.array_size {
            let key = self.next;
            self.next += 1;
            if t.array_has(key) {
                return Some((key, unsafe { *t.array.add(key) }));
            }
        }
        let idx = t.t.next_occupied(self.next - t.array_size)?;
        self.next = t.array_size + idx + 1;
        let e = unsafe { &*t.t.ent(idx) };
        Some((e.key, e.val))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allocator_api2::alloc::Global;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn strtable_basic() {
        let arena = Arena::new(&Global);
        let mut t = StrTable::new(0, &arena).unwrap();
        for i in 0..1000u64 {
            let key = format!("key{i}");
            t.insert(key.as_bytes(), i, &arena).unwrap();
        }
        assert_eq!(t.len(), 1000);
        for i in 0..1000u64 {
            assert_eq!(t.lookup(format!("key{i}").as_bytes()), Some(i));
        }
        assert_eq!(t.lookup(b"missing"), None);
        for i in (0..1000u64).step_by(2) {
            assert_eq!(t.remove(format!("key{i}").as_bytes()), Some(i));
        }
        assert_eq!(t.len(), 500);
        for i in 0..1000u64 {
            let expected = if i % 2 == 0 { None } else { Some(i) };
            assert_eq!(t.lookup(format!("key{i}").as_bytes()), expected);
        }
        assert_eq!(t.iter().count(), 500);
    }

    #[test]
    fn strtable_empty_key_and_binary_keys() {
        let arena = Arena::new(&Global);
        let mut t = StrTable::new(4, &arena).unwrap();
        t.insert(b"", 1, &arena).unwrap();
        t.insert(b"\0\x01", 2, &arena).unwrap();
        assert_eq!(t.lookup(b""), Some(1));
        assert_eq!(t.lookup(b"\0\x01"), Some(2));
        *t.lookup_mut(b"").unwrap() = 9;
        assert_eq!(t.lookup(b""), Some(9));
    }

    #[test]
    fn strtable_resize_keeps_entries() {
        let arena = Arena::new(&Global);
        let mut t = StrTable::new(2, &arena).unwrap();
        t.insert(b"a", 1, &arena).unwrap();
        t.insert(b"b", 2, &arena).unwrap();
        t.resize(8, &arena).unwrap();
        assert_eq!(t.lookup(b"a"), Some(1));
        assert_eq!(t.lookup(b"b"), Some(2));
        t.clear();
        assert!(t.is_empty());
        assert_eq!(t.lookup(b"a"), None);
    }

    #[test]
    fn inttable_array_and_hash_parts() {
        let arena = Arena::new(&Global);
        let mut t = IntTable::new(&arena).unwrap();
        t.insert(0, 100, &arena).unwrap();
        for key in [5usize, 17, 1 << 20, usize::MAX >> 1] {
            t.insert(key, key as u64, &arena).unwrap();
        }
        assert_eq!(t.len(), 5);
        assert_eq!(t.lookup(0), Some(100));
        assert_eq!(t.lookup(1 << 20), Some(1 << 20));
        assert!(t.replace(17, 3));
        assert_eq!(t.lookup(17), Some(3));
        assert!(!t.replace(18, 3));
        assert_eq!(t.remove(0), Some(100));
        assert_eq!(t.remove(0), None);
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn inttable_compact_moves_dense_keys_into_array() {
        let arena = Arena::new(&Global);
        let mut t = IntTable::new(&arena).unwrap();
        for key in 1..=40usize {
            t.insert(key, key as u64 * 2, &arena).unwrap();
        }
        t.insert(1_000_000, 7, &arena).unwrap();
        t.compact(&arena).unwrap();
        assert_eq!(t.array_size(), 41);
        for key in 1..=40usize {
            assert_eq!(t.lookup(key), Some(key as u64 * 2));
        }
        assert_eq!(t.lookup(1_000_000), Some(7));
        let mut keys: Vec<_> = t.iter().map(|(k, _)| k).collect();
        keys.sort();
        assert_eq!(keys.len(), 41);
        assert_eq!(keys[40], 1_000_000);
    }

    #[test]
    fn wyhash_spreads_lengths() {
        let a = wyhash(b"", 1);
        let b = wyhash(b"\0", 1);
        let c = wyhash(&[7u8; 100], 1);
        let d = wyhash(&[7u8; 101], 1);
        assert_ne!(a, b);
        assert_ne!(c, d);
    }

    proptest! {
        #[test]
        fn strtable_matches_hashmap(ops in proptest::collection::vec((any::<bool>(), proptest::collection::vec(0u8..4, 0..4)), 0..200)) {
            let arena = Arena::new(&Global);
            let mut t = StrTable::new(0, &arena).unwrap();
            let mut model: HashMap<Vec<u8>, u64> = HashMap::new();
            for (i, (insert, key)) in ops.into_iter().enumerate() {
                if insert {
                    if model.contains_key(&key) {
                        continue;
                    }
                    t.insert(&key, i as u64, &arena).unwrap();
                    model.insert(key, i as u64);
                } else {
                    prop_assert_eq!(t.remove(&key), model.remove(&key));
                }
                prop_assert_eq!(t.len(), model.len());
            }
            for (k, v) in &model {
                prop_assert_eq!(t.lookup(k), Some(*v));
            }
            prop_assert_eq!(t.iter().count(), model.len());
        }

        #[test]
        fn inttable_matches_hashmap(ops in proptest::collection::vec((any::<bool>(), 0usize..300), 0..300)) {
            let arena = Arena::new(&Global);
            let mut t = IntTable::new(&arena).unwrap();
            let mut model: HashMap<usize, u64> = HashMap::new();
            for (i, (insert, key)) in ops.into_iter().enumerate() {
                if insert {
                    if model.contains_key(&key) {
                        continue;
                    }
                    t.insert(key, i as u64, &arena).unwrap();
                    model.insert(key, i as u64);
                } else {
                    prop_assert_eq!(t.remove(key), model.remove(&key));
                }
            }
            t.compact(&arena).unwrap();
            prop_assert_eq!(t.len(), model.len());
            for (k, v) in &model {
                prop_assert_eq!(t.lookup(*k), Some(*v));
            }
        }
    }
}
