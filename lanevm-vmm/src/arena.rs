use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use lanevm_types::{Ref, VmmOffset, PAGE_SIZE};

use crate::range::{MemoryRange, ToAddr};
use crate::DEFAULT_COMMITTED_SIZE;

/// Errors raised by the VMM allocator and byte-access API. These are
/// surfaced to the interpreter as `FaultReason::MemoryOverflow` or
/// `FaultReason::PageAllocationFailed` (see `lanevm-asm`); this crate has no
/// dependency on `lanevm-asm` so it keeps its own small error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The reserved window has no free 1 MiB page left.
    #[error("VMM arena exhausted")]
    Exhausted,
    /// The requested range falls outside the committed window.
    #[error("address outside the committed VMM window")]
    OutOfWindow,
    /// `free()` was called twice on the same page.
    #[error("double free of VMM page")]
    DoubleFree,
    /// A debug guard page rejected the access.
    #[error("access to a debug guard page")]
    GuardPage,
}

/// Tunables for a [`Vmm`] instance, surfaced through `lanevm`'s
/// `EngineConfig`.
#[derive(Debug, Clone, Copy)]
pub struct VmmConfig {
    /// Size, in bytes, of the committed read/write window. Rounded down to
    /// a whole number of 1 MiB pages.
    pub committed_size: u32,
    /// Enable debug guard pages: page 0 becomes read-only and double-frees
    /// panic loudly instead of returning `AllocError::DoubleFree`, matching
    /// spec §4.1's "debug builds" behavior.
    pub debug_guards: bool,
}

impl Default for VmmConfig {
    fn default() -> Self {
        Self {
            committed_size: DEFAULT_COMMITTED_SIZE,
            debug_guards: cfg!(debug_assertions),
        }
    }
}

/// The reserved VM memory region.
///
/// Conceptually a 4 GiB address window of which `committed_size` bytes are
/// backed by real storage and the remainder is an inaccessible guard region;
/// in this implementation the guard region simply doesn't exist as
/// addressable storage, since there is no OS-level reservation to make (see
/// `DESIGN.md`). Allocation is page-granular: a page is 1 MiB, and a
/// word-sized (64-page) bitmap segment is freed back with `advise_unused`
/// bookkeeping when every page in it becomes free.
pub struct Vmm {
    bytes: RwLock<Vec<u8>>,
    bitmap: Vec<AtomicU64>,
    page_count: u32,
    debug_guards: bool,
}

impl Vmm {
    /// Construct a new arena with the given configuration.
    pub fn new(config: VmmConfig) -> Self {
        let committed_size = config.committed_size - (config.committed_size % PAGE_SIZE);
        let page_count = committed_size / PAGE_SIZE;
        let word_count = (page_count as usize).div_ceil(64).max(1);
        let mut bitmap: Vec<AtomicU64> = (0..word_count).map(|_| AtomicU64::new(0)).collect();

        // Debug guard: page 0 is permanently "allocated" so it's never
        // handed out by `alloc()`, and writes to it are separately rejected
        // by `verify_write`.
        if config.debug_guards && page_count > 0 {
            bitmap[0].store(1, Ordering::Relaxed);
        }

        Self {
            bytes: RwLock::new(vec![0u8; committed_size as usize]),
            bitmap,
            page_count,
            debug_guards: config.debug_guards,
        }
    }

    /// Construct an arena with the default configuration.
    pub fn with_default_config() -> Self {
        Self::new(VmmConfig::default())
    }

    /// Size of the committed window, in bytes.
    pub fn committed_size(&self) -> u32 {
        self.page_count * PAGE_SIZE
    }

    /// Whether a `Ref` lies entirely within the committed window.
    pub fn in_arena(&self, slice: Ref) -> bool {
        slice.end() <= self.committed_size()
    }

    /// Allocate one 1 MiB page, returning a `Ref` over its full extent.
    /// Returns `AllocError::Exhausted` if no page is free.
    pub fn alloc(&self) -> Result<Ref, AllocError> {
        for (word_idx, word) in self.bitmap.iter().enumerate() {
            loop {
                let current = word.load(Ordering::Acquire);
                let free_bit = (!current).trailing_zeros();
                if free_bit >= 64 {
                    break;
                }
                let page = word_idx as u32 * 64 + free_bit;
                if page >= self.page_count {
                    break;
                }
                let attempt = current | (1 << free_bit);
                match word.compare_exchange_weak(
                    current,
                    attempt,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        let offset = page * PAGE_SIZE;
                        tracing::trace!(page, offset, "vmm: allocated page");
                        return Ok(Ref::new(offset, PAGE_SIZE));
                    }
                    Err(_) => continue,
                }
            }
        }
        tracing::warn!("vmm: arena exhausted");
        Err(AllocError::Exhausted)
    }

    /// Release a page previously returned by `alloc`. Must be called
    /// exactly once per allocation; a second call panics (spec §4.1:
    /// "double-free panics").
    pub fn free(&self, slice: Ref) {
        assert_eq!(
            slice.length(),
            PAGE_SIZE,
            "free() must be called with a full page-sized Ref"
        );
        let page = slice.offset() / PAGE_SIZE;
        let word_idx = (page / 64) as usize;
        let bit = page % 64;
        let mask = 1u64 << bit;
        let word = &self.bitmap[word_idx];
        let previous = word.fetch_and(!mask, Ordering::AcqRel);
        if previous & mask == 0 {
            panic!("double free of vmm page {page}");
        }
        let now_empty = previous & !mask == 0;
        if now_empty {
            self.advise_unused(word_idx);
        }
    }

    /// Zero a freed 64-page word's backing storage, simulating returning
    /// the pages to the OS (`madvise(MADV_DONTNEED)` in a real reservation).
    fn advise_unused(&self, word_idx: usize) {
        let start = word_idx as u32 * 64 * PAGE_SIZE;
        let end = (start + 64 * PAGE_SIZE).min(self.committed_size());
        if start >= end {
            return;
        }
        let mut bytes = self.bytes.write();
        bytes[start as usize..end as usize].fill(0);
        tracing::debug!(start, end, "vmm: advised word unused");
    }

    /// Verify that a range is addressable, returning it as a [`MemoryRange`].
    pub fn verify<A: ToAddr, B: ToAddr>(&self, addr: A, len: B) -> Result<MemoryRange, AllocError> {
        let start = addr.to_addr()?;
        let len = len.to_addr()?;
        let end = start.saturating_add(len);
        if end > self.committed_size() as usize {
            return Err(AllocError::OutOfWindow);
        }
        Ok(MemoryRange(start..end))
    }

    /// Read a byte range.
    pub fn read(&self, addr: VmmOffset, len: VmmOffset) -> Result<Vec<u8>, AllocError> {
        let range = self.verify(addr, len)?;
        Ok(self.bytes.read()[range.usizes()].to_vec())
    }

    /// Read a `Ref` directly.
    pub fn read_ref(&self, r: Ref) -> Result<Vec<u8>, AllocError> {
        self.read(r.offset(), r.length())
    }

    /// Write bytes at an address, zero-padding is not performed: `data.len()`
    /// must already match the caller's intended span.
    pub fn write(&self, addr: VmmOffset, data: &[u8]) -> Result<(), AllocError> {
        if self.debug_guards && addr < PAGE_SIZE {
            return Err(AllocError::GuardPage);
        }
        let range = self.verify(addr, data.len() as VmmOffset)?;
        self.bytes.write()[range.usizes()].copy_from_slice(data);
        Ok(())
    }

    /// Append `data` starting at `addr`, returning a `Ref` over the bytes
    /// written. Used by boxing/scratch-append opcodes.
    pub fn write_ref(&self, addr: VmmOffset, data: &[u8]) -> Result<Ref, AllocError> {
        self.write(addr, data)?;
        Ok(Ref::new(addr, data.len() as VmmOffset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_vmm() -> Vmm {
        Vmm::new(VmmConfig {
            committed_size: 4 * PAGE_SIZE,
            debug_guards: false,
        })
    }

    #[test]
    fn alloc_returns_disjoint_page_sized_refs() {
        let vmm = tiny_vmm();
        let a = vmm.alloc().unwrap();
        let b = vmm.alloc().unwrap();
        assert_eq!(a.length(), PAGE_SIZE);
        assert_ne!(a.offset(), b.offset());
    }

    #[test]
    fn exhausts_after_all_pages_taken() {
        let vmm = tiny_vmm();
        for _ in 0..4 {
            vmm.alloc().unwrap();
        }
        assert_eq!(vmm.alloc(), Err(AllocError::Exhausted));
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let vmm = tiny_vmm();
        let a = vmm.alloc().unwrap();
        vmm.free(a);
        vmm.free(a);
    }

    #[test]
    fn freed_page_is_reusable() {
        let vmm = tiny_vmm();
        let a = vmm.alloc().unwrap();
        vmm.free(a);
        let b = vmm.alloc().unwrap();
        assert_eq!(a.offset(), b.offset());
    }

    #[test]
    fn in_arena_respects_committed_window() {
        let vmm = tiny_vmm();
        let inside = Ref::new(0, PAGE_SIZE);
        let outside = Ref::new(4 * PAGE_SIZE, PAGE_SIZE);
        assert!(vmm.in_arena(inside));
        assert!(!vmm.in_arena(outside));
    }

    #[test]
    fn write_then_read_round_trips() {
        let vmm = tiny_vmm();
        let page = vmm.alloc().unwrap();
        vmm.write(page.offset(), b"hello").unwrap();
        assert_eq!(vmm.read(page.offset(), 5).unwrap(), b"hello");
    }

    #[test]
    fn guard_page_rejects_writes_to_page_zero() {
        let vmm = Vmm::new(VmmConfig {
            committed_size: 4 * PAGE_SIZE,
            debug_guards: true,
        });
        assert_eq!(vmm.write(0, b"x"), Err(AllocError::GuardPage));
    }

    #[quickcheck_macros::quickcheck]
    fn alloc_free_never_double_allocates(ops: Vec<bool>) -> bool {
        let vmm = Vmm::new(VmmConfig {
            committed_size: 8 * PAGE_SIZE,
            debug_guards: false,
        });
        let mut held = Vec::new();
        for alloc in ops {
            if alloc {
                if let Ok(r) = vmm.alloc() {
                    held.push(r);
                }
            } else if let Some(r) = held.pop() {
                vmm.free(r);
            }
        }
        let mut offsets: Vec<_> = held.iter().map(Ref::offset).collect();
        offsets.sort_unstable();
        offsets.windows(2).all(|w| w[0] != w[1])
    }
}
