//! Fixed-size chunk pool with a lock-free tagged-index free list

use std::{
    ptr::NonNull,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use super::header::ChunkHeader;

/// Magic number for pool header validation
pub const POOL_MAGIC: u32 = 0x4850_4F4C; // "HPOL"

/// Sentinel index marking the end of the free list
pub const EMPTY_INDEX: u32 = u32::MAX;

/// Byte offset within a free chunk where the next-index link lives.
///
/// Offset 8 keeps the link clear of the reference count, so a dead chunk
/// always reads as `ref_count == 0` and misuse stays detectable.
const FREE_LINK_OFFSET: usize = 8;

/// In-segment descriptor of one chunk pool.
///
/// The free list is an index stack threaded through a link word inside
/// each free chunk. The head packs `(aba_tag, index)` into one 64-bit word
/// so a compare-and-swap detects a concurrent pop/push cycle that reuses
/// the same head index.
#[repr(C)]
#[derive(Debug)]
pub struct PoolHeader {
    pub magic: u32,
    pub pool_id: u32,
    /// Stride of one chunk in bytes, header included
    pub chunk_size: u32,
    pub chunk_count: u32,
    /// Segment offset of chunk 0
    pub base_offset: u64,
    /// Free-list head: `(aba_tag << 32) | head_index`
    pub free_head: AtomicU64,
    /// Number of chunks currently outside the free list
    pub used_count: AtomicU32,
    pub _reserved: u32,
}

fn pack_head(tag: u32, index: u32) -> u64 {
    ((tag as u64) << 32) | index as u64
}

fn unpack_head(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// Handle over a pool living in a mapped segment
#[derive(Debug, Clone, Copy)]
pub struct ChunkPool {
    header: NonNull<PoolHeader>,
    /// Segment base in this process's address space
    base: NonNull<u8>,
}

unsafe impl Send for ChunkPool {}
unsafe impl Sync for ChunkPool {}

impl ChunkPool {
    /// Carve and initialize a pool inside a segment.
    ///
    /// # Safety
    /// `base` must be the segment base; `header_offset` and `chunk_offset`
    /// must address exclusive, properly aligned storage for the header and
    /// `chunk_count * chunk_size` bytes of chunks.
    pub unsafe fn init_at(
        base: NonNull<u8>,
        header_offset: usize,
        pool_id: u32,
        chunk_size: u32,
        chunk_count: u32,
        chunk_offset: u64,
    ) -> Self {
        let header = base.as_ptr().add(header_offset) as *mut PoolHeader;
        (*header).magic = POOL_MAGIC;
        (*header).pool_id = pool_id;
        (*header).chunk_size = chunk_size;
        (*header).chunk_count = chunk_count;
        (*header).base_offset = chunk_offset;
        (*header).used_count = AtomicU32::new(0);
        (*header)._reserved = 0;

        let pool = Self {
            header: NonNull::new_unchecked(header),
            base,
        };

        // Link every chunk through its free-list word; the last terminates
        for index in 0..chunk_count {
            let next = if index + 1 == chunk_count {
                EMPTY_INDEX
            } else {
                index + 1
            };
            *(pool.free_link_ptr(index)) = next as u64;
        }

        let head = if chunk_count == 0 { EMPTY_INDEX } else { 0 };
        (*header).free_head = AtomicU64::new(pack_head(0, head));

        pool
    }

    fn header(&self) -> &PoolHeader {
        unsafe { self.header.as_ref() }
    }

    /// Pool identifier
    pub fn pool_id(&self) -> u32 {
        self.header().pool_id
    }

    /// Stride of one chunk in bytes, header included
    pub fn chunk_size(&self) -> u32 {
        self.header().chunk_size
    }

    /// Number of chunks in the pool
    pub fn chunk_count(&self) -> u32 {
        self.header().chunk_count
    }

    /// Payload bytes one chunk can carry
    pub fn payload_capacity(&self) -> u32 {
        self.chunk_size() - ChunkHeader::SIZE as u32
    }

    /// Number of chunks currently in the free list
    pub fn free_chunks(&self) -> u32 {
        self.chunk_count() - self.header().used_count.load(Ordering::Acquire)
    }

    /// Pop a free chunk index, or `None` when the pool is exhausted
    pub fn pop(&self) -> Option<u32> {
        let head = &self.header().free_head;
        loop {
            let current = head.load(Ordering::Acquire);
            let (tag, index) = unpack_head(current);
            if index == EMPTY_INDEX {
                return None;
            }

            let next = unsafe { *self.free_link_ptr(index) } as u32;

            match head.compare_exchange_weak(
                current,
                pack_head(tag.wrapping_add(1), next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.header().used_count.fetch_add(1, Ordering::Relaxed);
                    return Some(index);
                }
                Err(_) => {
                    std::hint::spin_loop();
                    continue;
                }
            }
        }
    }

    /// Push a chunk index back onto the free list
    pub fn push(&self, index: u32) {
        debug_assert!(index < self.chunk_count());
        let head = &self.header().free_head;
        loop {
            let current = head.load(Ordering::Acquire);
            let (tag, old_index) = unpack_head(current);

            unsafe {
                *self.free_link_ptr(index) = old_index as u64;
            }

            match head.compare_exchange_weak(
                current,
                pack_head(tag.wrapping_add(1), index),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.header().used_count.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
                Err(_) => {
                    std::hint::spin_loop();
                    continue;
                }
            }
        }
    }

    /// Segment offset of the chunk with the given index
    pub fn chunk_offset(&self, index: u32) -> u64 {
        self.header().base_offset + index as u64 * self.chunk_size() as u64
    }

    /// Whether the given segment offset addresses a chunk of this pool
    pub fn contains_offset(&self, offset: u64) -> bool {
        let header = self.header();
        let end =
            header.base_offset + header.chunk_count as u64 * header.chunk_size as u64;
        offset >= header.base_offset
            && offset < end
            && (offset - header.base_offset) % header.chunk_size as u64 == 0
    }

    /// Index of the chunk at the given segment offset
    pub fn index_of(&self, offset: u64) -> Option<u32> {
        if !self.contains_offset(offset) {
            return None;
        }
        Some(((offset - self.header().base_offset) / self.chunk_size() as u64) as u32)
    }

    /// Raw pointer to the chunk with the given index
    pub(crate) fn chunk_ptr(&self, index: u32) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.chunk_offset(index) as usize) }
    }

    fn free_link_ptr(&self, index: u32) -> *mut u64 {
        unsafe { self.chunk_ptr(index).add(FREE_LINK_OFFSET) as *mut u64 }
    }
}
