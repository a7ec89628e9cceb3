//! Chunk header definitions and the reference-count protocol

use std::sync::atomic::{fence, AtomicU32, Ordering};

/// Fixed prefix of every chunk in a payload segment.
///
/// A chunk is live iff `ref_count > 0`. The transition to 0 returns the
/// chunk to its origin pool exactly once: increments and non-final
/// decrements use release ordering, the decrement that observes zero pairs
/// with an acquire fence, so payload writes happen-before any consumer load
/// and the pool never recycles a chunk a reader can still observe.
#[repr(C)]
#[derive(Debug)]
pub struct ChunkHeader {
    /// Number of live references to this chunk
    pub ref_count: AtomicU32,
    /// Pool that owns the chunk's storage
    pub origin_pool_id: u32,
    /// Payload length in bytes
    pub payload_size: u32,
    /// Optional user header length in bytes (0 when unused)
    pub user_header_size: u32,
    /// Monotonic per-publisher sequence number, stamped at publish
    pub sequence_number: u64,
    /// Port that published the chunk, stamped at publish
    pub originator_port_id: u64,
}

/// Reference counts beyond this are treated as a leaked-retain logic error
pub const REF_COUNT_CEILING: u32 = u32::MAX / 2;

impl ChunkHeader {
    /// Size of the chunk header in bytes
    pub const SIZE: usize = std::mem::size_of::<ChunkHeader>();

    /// Initialize a header in place for a freshly acquired chunk.
    ///
    /// # Safety
    /// `ptr` must point at `SIZE` writable bytes inside a payload segment
    /// and no other thread may hold a reference to the chunk.
    pub unsafe fn init(ptr: *mut ChunkHeader, origin_pool_id: u32, payload_size: u32) {
        ptr.write(ChunkHeader {
            ref_count: AtomicU32::new(0),
            origin_pool_id,
            payload_size,
            user_header_size: 0,
            sequence_number: 0,
            originator_port_id: 0,
        });
        // publishes the header fields together with liveness
        (*ptr).ref_count.store(1, Ordering::Release);
    }

    /// Increment the reference count.
    ///
    /// Returns the previous count; the caller must treat `0` (retain on a
    /// dead chunk) and values above [`REF_COUNT_CEILING`] as logic errors.
    pub fn retain(&self) -> u32 {
        self.ref_count.fetch_add(1, Ordering::Release)
    }

    /// Decrement the reference count.
    ///
    /// Returns `true` when this call released the final reference; the
    /// caller must then return the chunk to its origin pool.
    pub fn release(&self) -> bool {
        let previous = self.ref_count.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "release on a dead chunk");
        if previous == 1 {
            fence(Ordering::Acquire);
            return true;
        }
        false
    }

    /// Undo an increment that detected a contract violation
    pub(crate) fn undo_retain(&self) {
        self.ref_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current reference count (diagnostic only)
    pub fn references(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size_is_compact() {
        assert_eq!(ChunkHeader::SIZE, 32);
    }

    #[test]
    fn test_retain_release_cycle() {
        let mut header = std::mem::MaybeUninit::<ChunkHeader>::uninit();
        unsafe {
            ChunkHeader::init(header.as_mut_ptr(), 3, 128);
            let header = header.assume_init_ref();

            assert_eq!(header.references(), 1);
            assert_eq!(header.origin_pool_id, 3);
            assert_eq!(header.payload_size, 128);

            assert_eq!(header.retain(), 1);
            assert!(!header.release());
            assert!(header.release());
            assert_eq!(header.references(), 0);
        }
    }
}
