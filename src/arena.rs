//! Bump allocator that owns every message, array, map and string of a parse.
//!
//! An [`Arena`] hands out 8-byte aligned memory by bumping a cursor through a
//! list of blocks obtained from a caller supplied [`Allocator`]. Nothing is
//! freed individually; the blocks are released when the arena is dropped.
//! Allocation only needs `&self`, so everything carved out of an arena can
//! borrow it for as long as the arena lives.
//!
//! Arenas can be *fused*. Fused arenas form a union-find group whose root
//! carries a reference count; dropping any member decrements it and the last
//! drop frees the blocks of every member. The parent-or-count word is the only
//! state touched concurrently and is updated with compare-and-swap.
//!
//! # Example
//!
//! ```
//! use miniproto::arena::Arena;
//! use allocator_api2::alloc::Global;
//!
//! let a = Arena::new(&Global);
//! let b = Arena::new(&Global);
//! let p = a.malloc(24).unwrap();
//! assert_eq!(p.as_ptr() as usize % 8, 0);
//! assert!(a.fuse(&b));
//! assert!(a.is_fused(&b));
//! ```

use core::alloc::Layout;
use core::cell::Cell;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use allocator_api2::alloc::Allocator;

/// Alignment of every pointer returned by [`Arena::malloc`].
pub const MALLOC_ALIGN: usize = 8;

const DEFAULT_MAX_BLOCK_SIZE: usize = 32 << 10;
const FIRST_BLOCK_SIZE: usize = 256;

static MAX_BLOCK_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_BLOCK_SIZE);

pub(crate) const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

#[repr(C)]
struct MemBlock {
    next: *mut MemBlock,
    size: usize,
}

const BLOCK_RESERVE: usize = align_up(core::mem::size_of::<MemBlock>(), MALLOC_ALIGN);

/// Decoded form of the tagged parent-or-count word.
///
/// Low bit set: the arena is a root and the remaining bits are the group's
/// reference count. Low bit clear: the word is a pointer to a parent arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParentOrCount {
    Root { refcount: usize },
    Child(NonNull<ArenaState>),
}

impl ParentOrCount {
    fn pack(self) -> usize {
        match self {
            ParentOrCount::Root { refcount } => (refcount << 1) | 1,
            ParentOrCount::Child(parent) => parent.as_ptr() as usize,
        }
    }

    fn unpack(word: usize) -> Self {
        if word & 1 == 1 {
            ParentOrCount::Root {
                refcount: word >> 1,
            }
        } else {
            // Safety: child words are only ever produced by `pack` from a live state.
            ParentOrCount::Child(unsafe { NonNull::new_unchecked(word as *mut ArenaState) })
        }
    }
}

// Lives inside the arena's first block (or the caller's initial block).
struct ArenaState {
    ptr: Cell<*mut u8>,
    end: Cell<*mut u8>,
    blocks: Cell<*mut MemBlock>,
    last_size: Cell<usize>,
    // Lifetime erased; `Arena<'a>` keeps it alive.
    allocator: Option<NonNull<dyn Allocator>>,
    has_initial_block: bool,
    space_allocated: AtomicUsize,
    parent_or_count: AtomicUsize,
    next: AtomicPtr<ArenaState>,
    tail: AtomicPtr<ArenaState>,
}

const STATE_OVERHEAD: usize =
    align_up(BLOCK_RESERVE + core::mem::size_of::<ArenaState>(), MALLOC_ALIGN);

/// Snapshot of an arena's bump cursor, see [`Arena::checkpoint`].
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    ptr: *mut u8,
    end: *mut u8,
    blocks: *mut MemBlock,
    last_size: usize,
}

/// Arena allocator with fuse support.
///
/// The handle is not `Clone`; a second owner of the same lifetime group is
/// obtained by creating another arena and fusing it.
pub struct Arena<'a> {
    state: NonNull<ArenaState>,
    _allocator: PhantomData<&'a dyn Allocator>,
}

impl<'a> Arena<'a> {
    /// Creates an empty arena that grows using `allocator`.
    ///
    /// Aborts through [`std::alloc::handle_alloc_error`] when the first block
    /// cannot be obtained; use [`Arena::try_new`] to observe that failure.
    pub fn new(allocator: &'a dyn Allocator) -> Self {
        match Self::try_new(allocator) {
            Some(arena) => arena,
            None => std::alloc::handle_alloc_error(
                Layout::from_size_align(FIRST_BLOCK_SIZE, MALLOC_ALIGN)
                    .unwrap_or(Layout::new::<u64>()),
            ),
        }
    }

    pub fn try_new(allocator: &'a dyn Allocator) -> Option<Self> {
        let size = FIRST_BLOCK_SIZE.max(STATE_OVERHEAD + 64);
        let layout = Layout::from_size_align(size, MALLOC_ALIGN).ok()?;
        let block = allocator.allocate(layout).ok()?.cast::<u8>().as_ptr();
        unsafe {
            let mem_block = block as *mut MemBlock;
            mem_block.write(MemBlock {
                next: ptr::null_mut(),
                size,
            });
            let state = block.add(BLOCK_RESERVE) as *mut ArenaState;
            Self::write_state(
                state,
                block.add(STATE_OVERHEAD),
                block.add(size),
                mem_block,
                Some(allocator),
                false,
            );
            (*state).last_size.set(size);
            (*state).space_allocated.store(size, Ordering::Relaxed);
            tracing::trace!(size, "arena created");
            Some(Arena {
                state: NonNull::new_unchecked(state),
                _allocator: PhantomData,
            })
        }
    }

    /// Creates an arena that first allocates out of `mem`.
    ///
    /// When `allocator` is `None` the arena cannot grow past `mem`; such an
    /// arena also refuses to fuse. Returns `None` if `mem` is too small to hold
    /// the arena's bookkeeping and there is no allocator to fall back to.
    pub fn init(mem: &'a mut [MaybeUninit<u8>], allocator: Option<&'a dyn Allocator>) -> Option<Self> {
        let start = mem.as_mut_ptr() as *mut u8;
        let misalign = align_up(start as usize, MALLOC_ALIGN) - start as usize;
        let state_size = align_up(core::mem::size_of::<ArenaState>(), MALLOC_ALIGN);
        if mem.len() < misalign + state_size {
            return match allocator {
                Some(allocator) => Self::try_new(allocator),
                None => None,
            };
        }
        unsafe {
            let state = start.add(misalign) as *mut ArenaState;
            Self::write_state(
                state,
                start.add(misalign + state_size),
                start.add(mem.len()),
                ptr::null_mut(),
                allocator,
                true,
            );
            (*state).last_size.set(mem.len());
            Some(Arena {
                state: NonNull::new_unchecked(state),
                _allocator: PhantomData,
            })
        }
    }

    unsafe fn write_state(
        state: *mut ArenaState,
        ptr: *mut u8,
        end: *mut u8,
        blocks: *mut MemBlock,
        allocator: Option<&'a dyn Allocator>,
        has_initial_block: bool,
    ) {
        let allocator = allocator.map(|a| {
            // Safety: only the lifetime changes; `Arena<'a>` outlives every use.
            unsafe { core::mem::transmute::<NonNull<dyn Allocator + 'a>, NonNull<dyn Allocator + 'static>>(NonNull::from(a)) }
        });
        unsafe {
            state.write(ArenaState {
                ptr: Cell::new(ptr),
                end: Cell::new(end),
                blocks: Cell::new(blocks),
                last_size: Cell::new(0),
                allocator,
                has_initial_block,
                space_allocated: AtomicUsize::new(0),
                parent_or_count: AtomicUsize::new(ParentOrCount::Root { refcount: 1 }.pack()),
                next: AtomicPtr::new(ptr::null_mut()),
                tail: AtomicPtr::new(state),
            });
        }
    }

    /// Sets the upper bound for blocks allocated after the first one.
    pub fn set_max_block_size(max: usize) {
        MAX_BLOCK_SIZE.store(max.max(FIRST_BLOCK_SIZE), Ordering::Relaxed);
    }

    fn st(&self) -> &ArenaState {
        unsafe { self.state.as_ref() }
    }

    /// Allocates `size` bytes aligned to [`MALLOC_ALIGN`].
    ///
    /// The returned memory is uninitialized. Returns `None` when the backing
    /// allocator fails or the arena cannot grow.
    #[inline]
    pub fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        let size = align_up(size, MALLOC_ALIGN);
        let st = self.st();
        let ptr = st.ptr.get();
        if st.end.get() as usize - ptr as usize >= size {
            st.ptr.set(unsafe { ptr.add(size) });
            return NonNull::new(ptr);
        }
        self.slow_malloc(size)
    }

    #[inline(never)]
    fn slow_malloc(&self, size: usize) -> Option<NonNull<u8>> {
        let st = self.st();
        let allocator = unsafe { st.allocator?.as_ref() };
        let max_block = MAX_BLOCK_SIZE.load(Ordering::Relaxed);
        let clamped = (st.last_size.get() * 2).min(max_block);
        let block_size = (BLOCK_RESERVE + size).max(clamped);
        let layout = Layout::from_size_align(block_size, MALLOC_ALIGN).ok()?;
        let block = allocator.allocate(layout).ok()?.cast::<u8>().as_ptr();
        unsafe {
            let mem_block = block as *mut MemBlock;
            mem_block.write(MemBlock {
                next: st.blocks.get(),
                size: block_size,
            });
            st.blocks.set(mem_block);
            st.ptr.set(block.add(BLOCK_RESERVE + size));
            st.end.set(block.add(block_size));
        }
        st.last_size.set(block_size);
        st.space_allocated.fetch_add(block_size, Ordering::Relaxed);
        tracing::trace!(block_size, "arena block allocated");
        NonNull::new(unsafe { block.add(BLOCK_RESERVE) })
    }

    /// Allocates memory for `layout`, honouring alignments above 8.
    pub fn alloc_raw(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.align() <= MALLOC_ALIGN {
            return self.malloc(layout.size());
        }
        let raw = self.malloc(layout.size() + layout.align() - MALLOC_ALIGN)?;
        let aligned = align_up(raw.as_ptr() as usize, layout.align());
        NonNull::new(aligned as *mut u8)
    }

    /// Allocates `size` zeroed bytes.
    pub fn malloc_zeroed(&self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.malloc(size)?;
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
        Some(ptr)
    }

    /// Copies `bytes` into the arena.
    pub fn copy_bytes(&self, bytes: &[u8]) -> Option<NonNull<u8>> {
        let ptr = self.malloc(bytes.len())?;
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len()) };
        Some(ptr)
    }

    fn is_last_alloc(&self, ptr: NonNull<u8>, size: usize) -> bool {
        unsafe { ptr.as_ptr().add(align_up(size, MALLOC_ALIGN)) == self.st().ptr.get() }
    }

    /// Resizes an allocation previously returned by this arena.
    ///
    /// Extends in place when `ptr` is the most recent allocation and the
    /// current block has room; otherwise allocates and copies.
    pub fn realloc(&self, ptr: Option<NonNull<u8>>, old_size: usize, new_size: usize) -> Option<NonNull<u8>> {
        let old_aligned = align_up(old_size, MALLOC_ALIGN);
        let new_aligned = align_up(new_size, MALLOC_ALIGN);
        if let Some(p) = ptr {
            if self.is_last_alloc(p, old_size) {
                let st = self.st();
                let room = st.end.get() as usize - p.as_ptr() as usize;
                if new_aligned <= room {
                    st.ptr.set(unsafe { p.as_ptr().add(new_aligned) });
                    return Some(p);
                }
            } else if new_aligned <= old_aligned {
                return Some(p);
            }
        }
        let fresh = self.malloc(new_size)?;
        if let Some(p) = ptr {
            unsafe {
                ptr::copy_nonoverlapping(p.as_ptr(), fresh.as_ptr(), old_size.min(new_size));
            }
        }
        Some(fresh)
    }

    /// Shrinks the most recent allocation in place. No-op for older ones.
    pub fn shrink_last(&self, ptr: NonNull<u8>, old_size: usize, new_size: usize) {
        debug_assert!(new_size <= old_size);
        if self.is_last_alloc(ptr, old_size) {
            self.st()
                .ptr
                .set(unsafe { ptr.as_ptr().add(align_up(new_size, MALLOC_ALIGN)) });
        }
    }

    /// Fuses the lifetimes of `self` and `other`.
    ///
    /// After a successful fuse, memory from either arena stays valid until
    /// both have been dropped. Returns `false` if either arena was created
    /// with an initial block, or if the two draw blocks from different
    /// allocators: the group is freed by whichever member drops last, so
    /// every member's allocator must live as long as all of them.
    pub fn fuse(&self, other: &Arena<'a>) -> bool {
        if self.state == other.state {
            return true;
        }
        if self.st().has_initial_block || other.st().has_initial_block {
            return false;
        }
        match (self.st().allocator, other.st().allocator) {
            (Some(a), Some(b)) if same_allocator(a, b) => {}
            _ => return false,
        }
        unsafe {
            loop {
                let (mut r1, mut w1) = find_root(self.state);
                let (mut r2, mut w2) = find_root(other.state);
                if r1 == r2 {
                    return true;
                }
                // The lower address wins so concurrent fuses agree on a root.
                if r1.as_ptr() > r2.as_ptr() {
                    core::mem::swap(&mut r1, &mut r2);
                    core::mem::swap(&mut w1, &mut w2);
                }
                let (c1, c2) = match (ParentOrCount::unpack(w1), ParentOrCount::unpack(w2)) {
                    (ParentOrCount::Root { refcount: c1 }, ParentOrCount::Root { refcount: c2 }) => {
                        (c1, c2)
                    }
                    _ => continue,
                };
                let summed = ParentOrCount::Root { refcount: c1 + c2 }.pack();
                if r1
                    .as_ref()
                    .parent_or_count
                    .compare_exchange(w1, summed, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }
                let child = ParentOrCount::Child(r1).pack();
                if r2
                    .as_ref()
                    .parent_or_count
                    .compare_exchange(w2, child, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return_refs(r1, c2);
                    continue;
                }
                append_group(r1, r2);
                tracing::trace!(refcount = c1 + c2, "arenas fused");
                return true;
            }
        }
    }

    /// Whether `self` and `other` belong to the same fuse group.
    pub fn is_fused(&self, other: &Arena<'a>) -> bool {
        unsafe { find_root(self.state).0 == find_root(other.state).0 }
    }

    /// Number of arenas in this arena's fuse group.
    pub fn fuse_count(&self) -> usize {
        let mut count = 0;
        self.for_each_in_group(|_| count += 1);
        count
    }

    /// Total bytes obtained from backing allocators by the whole fuse group.
    pub fn space_allocated(&self) -> usize {
        let mut total = 0;
        self.for_each_in_group(|st| total += st.space_allocated.load(Ordering::Relaxed));
        total
    }

    fn for_each_in_group(&self, mut f: impl FnMut(&ArenaState)) {
        unsafe {
            let (root, _) = find_root(self.state);
            let mut cur = root.as_ptr();
            while !cur.is_null() {
                f(&*cur);
                cur = (*cur).next.load(Ordering::Acquire);
            }
        }
    }

    fn is_alone(&self) -> bool {
        let st = self.st();
        ParentOrCount::unpack(st.parent_or_count.load(Ordering::Acquire))
            == ParentOrCount::Root { refcount: 1 }
            && st.next.load(Ordering::Acquire).is_null()
    }

    /// Records the current allocation position.
    pub fn checkpoint(&self) -> Checkpoint {
        let st = self.st();
        Checkpoint {
            ptr: st.ptr.get(),
            end: st.end.get(),
            blocks: st.blocks.get(),
            last_size: st.last_size.get(),
        }
    }

    /// Releases everything allocated after `cp`.
    ///
    /// Refused (returns `false`) once the arena has been fused, because other
    /// arenas may hold pointers into the memory being released.
    pub fn rollback(&mut self, cp: Checkpoint) -> bool {
        if !self.is_alone() {
            return false;
        }
        let st = self.st();
        let mut released = 0;
        unsafe {
            let mut block = st.blocks.get();
            while block != cp.blocks && !block.is_null() {
                let next = (*block).next;
                let size = (*block).size;
                if let Some(allocator) = st.allocator {
                    allocator.as_ref().deallocate(
                        NonNull::new_unchecked(block as *mut u8),
                        Layout::from_size_align_unchecked(size, MALLOC_ALIGN),
                    );
                }
                released += size;
                block = next;
            }
        }
        st.blocks.set(cp.blocks);
        st.ptr.set(cp.ptr);
        st.end.set(cp.end);
        st.last_size.set(cp.last_size);
        st.space_allocated.fetch_sub(released, Ordering::Relaxed);
        true
    }
}

impl Default for Arena<'static> {
    fn default() -> Self {
        Arena::new(&allocator_api2::alloc::Global)
    }
}

impl core::fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arena")
            .field("state", &self.state)
            .field("space_allocated", &self.space_allocated())
            .finish()
    }
}

impl Drop for Arena<'_> {
    fn drop(&mut self) {
        unsafe { release(self.state) }
    }
}

/// Zero-sized allocators hold no state, so any two instances are
/// interchangeable; others must be the same object.
fn same_allocator(a: NonNull<dyn Allocator>, b: NonNull<dyn Allocator>) -> bool {
    // Safety: both point at allocators kept alive by their arenas.
    let (ra, rb) = unsafe { (a.as_ref(), b.as_ref()) };
    ptr::addr_eq(a.as_ptr(), b.as_ptr()) || (size_of_val(ra) == 0 && size_of_val(rb) == 0)
}

unsafe fn find_root(mut a: NonNull<ArenaState>) -> (NonNull<ArenaState>, usize) {
    unsafe {
        let mut word = a.as_ref().parent_or_count.load(Ordering::Acquire);
        while let ParentOrCount::Child(next) = ParentOrCount::unpack(word) {
            let next_word = next.as_ref().parent_or_count.load(Ordering::Acquire);
            if let ParentOrCount::Child(_) = ParentOrCount::unpack(next_word) {
                // Path splitting: point `a` at its grandparent.
                a.as_ref().parent_or_count.store(next_word, Ordering::Relaxed);
            }
            a = next;
            word = next_word;
        }
        (a, word)
    }
}

unsafe fn return_refs(start: NonNull<ArenaState>, count: usize) {
    unsafe {
        let mut cur = start;
        loop {
            let (root, word) = find_root(cur);
            if let ParentOrCount::Root { refcount } = ParentOrCount::unpack(word) {
                let lowered = ParentOrCount::Root {
                    refcount: refcount - count,
                }
                .pack();
                if root
                    .as_ref()
                    .parent_or_count
                    .compare_exchange(word, lowered, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return;
                }
            }
            cur = root;
        }
    }
}

unsafe fn append_group(root: NonNull<ArenaState>, other: NonNull<ArenaState>) {
    unsafe {
        let mut tail = root.as_ref().tail.load(Ordering::Acquire);
        loop {
            let next = (*tail).next.load(Ordering::Acquire);
            if next.is_null() {
                if (*tail)
                    .next
                    .compare_exchange(ptr::null_mut(), other.as_ptr(), Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
                continue;
            }
            tail = next;
        }
        let other_tail = other.as_ref().tail.load(Ordering::Acquire);
        root.as_ref().tail.store(other_tail, Ordering::Release);
    }
}

unsafe fn release(start: NonNull<ArenaState>) {
    unsafe {
        let mut cur = start;
        let mut word = cur.as_ref().parent_or_count.load(Ordering::Acquire);
        loop {
            match ParentOrCount::unpack(word) {
                ParentOrCount::Child(parent) => {
                    cur = parent;
                    word = cur.as_ref().parent_or_count.load(Ordering::Acquire);
                }
                ParentOrCount::Root { refcount: 1 } => {
                    free_group(cur);
                    return;
                }
                ParentOrCount::Root { refcount } => {
                    let lowered = ParentOrCount::Root {
                        refcount: refcount - 1,
                    }
                    .pack();
                    match cur.as_ref().parent_or_count.compare_exchange_weak(
                        word,
                        lowered,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        Err(actual) => word = actual,
                    }
                }
            }
        }
    }
}

unsafe fn free_group(root: NonNull<ArenaState>) {
    unsafe {
        let mut cur = root.as_ptr();
        while !cur.is_null() {
            // The state lives inside one of the blocks, read it out first.
            let next = (*cur).next.load(Ordering::Acquire);
            let allocator = (*cur).allocator;
            let mut block = (*cur).blocks.get();
            if let Some(allocator) = allocator {
                while !block.is_null() {
                    let next_block = (*block).next;
                    let size = (*block).size;
                    allocator.as_ref().deallocate(
                        NonNull::new_unchecked(block as *mut u8),
                        Layout::from_size_align_unchecked(size, MALLOC_ALIGN),
                    );
                    block = next_block;
                }
            }
            cur = next;
        }
    }
}
