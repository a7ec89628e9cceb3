//! Bump arena for delivery-queue storage in the management segment

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{
    error::{HermodError, Result},
    memory::Segment,
};

/// Carves delivery-queue storage out of the management segment.
///
/// Allocation is a lock-free bump of the cursor; storage is returned to the
/// operating system when the daemon unlinks the segment.
#[derive(Debug)]
pub struct QueueArena {
    segment: Arc<Segment>,
    cursor: AtomicUsize,
}

impl QueueArena {
    /// Alignment of every arena allocation
    pub const ALIGNMENT: usize = 8;

    /// Create an arena over the whole of a segment
    pub fn new(segment: Arc<Segment>) -> Self {
        Self {
            segment,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Allocate `size` bytes; returns the segment offset of the block
    pub fn alloc(&self, size: usize) -> Result<usize> {
        let limit = self.segment.size();

        let offset = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                let aligned = (cursor + Self::ALIGNMENT - 1) & !(Self::ALIGNMENT - 1);
                let end = aligned.checked_add(size)?;
                if end > limit {
                    return None;
                }
                Some(end)
            })
            .map_err(|_| {
                HermodError::invalid_parameter(
                    "management segment",
                    format!("arena exhausted: cannot serve {} bytes", size),
                )
            })?;

        Ok((offset + Self::ALIGNMENT - 1) & !(Self::ALIGNMENT - 1))
    }

    /// Resolve an arena offset to a raw pointer.
    ///
    /// # Safety
    /// `offset` must come from [`alloc`](Self::alloc) on this arena.
    pub unsafe fn ptr_at(&self, offset: usize) -> *mut u8 {
        self.segment.ptr_at(offset)
    }

    /// Bytes handed out so far, padding included
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Bytes still available
    pub fn available(&self) -> usize {
        self.segment.size() - self.used()
    }
}
