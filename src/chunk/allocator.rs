//! Tiered chunk allocator over the payload segment

use std::{ptr::NonNull, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    error::{HermodError, Result},
    memory::{Segment, SegmentId},
};

use super::{
    header::{ChunkHeader, REF_COUNT_CEILING},
    pool::{ChunkPool, PoolHeader},
    reference::ChunkRef,
};

/// Alignment of pool headers and chunk arrays within the payload segment
const POOL_ALIGNMENT: usize = 64;

/// One size class in the payload segment layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolEntry {
    /// Payload bytes one chunk of this class can carry
    pub payload_size: usize,
    /// Number of chunks in the class
    pub chunk_count: u32,
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Segment bytes the given size classes need when carved by
/// [`ChunkAllocator::carve`]
pub fn required_segment_size(entries: &[MempoolEntry]) -> usize {
    let mut cursor = 0usize;
    for entry in entries {
        let stride = align_up(ChunkHeader::SIZE + entry.payload_size, 8);
        let header_offset = align_up(cursor, POOL_ALIGNMENT);
        let chunk_offset = align_up(
            header_offset + std::mem::size_of::<PoolHeader>(),
            POOL_ALIGNMENT,
        );
        cursor = chunk_offset + stride * entry.chunk_count as usize;
    }
    cursor
}

/// Set of chunk pools carved out of one shared-memory segment.
///
/// `acquire` serves a request from the smallest size class that fits,
/// promoting to larger classes while the smaller ones are exhausted.
#[derive(Debug)]
pub struct ChunkAllocator {
    segment: Arc<Segment>,
    segment_id: SegmentId,
    /// Pools in ascending chunk-size order
    pools: Vec<ChunkPool>,
}

impl ChunkAllocator {
    /// Carve pools for the given size classes out of a fresh segment
    pub fn carve(segment: Arc<Segment>, entries: &[MempoolEntry]) -> Result<Self> {
        if entries.is_empty() {
            return Err(HermodError::invalid_parameter(
                "mempools",
                "at least one size class is required",
            ));
        }

        for window in entries.windows(2) {
            if window[1].payload_size <= window[0].payload_size {
                return Err(HermodError::invalid_parameter(
                    "mempools",
                    "size classes must be strictly ascending",
                ));
            }
        }

        let base = NonNull::new(segment.base_ptr()).ok_or_else(|| {
            HermodError::invalid_parameter("segment", "segment base pointer is null")
        })?;

        let mut pools = Vec::with_capacity(entries.len());
        let mut cursor = 0usize;

        for (pool_id, entry) in entries.iter().enumerate() {
            if entry.chunk_count == 0 {
                return Err(HermodError::invalid_parameter(
                    "mempools",
                    "chunk count must be greater than 0",
                ));
            }

            let stride = align_up(ChunkHeader::SIZE + entry.payload_size, 8);
            let header_offset = align_up(cursor, POOL_ALIGNMENT);
            let chunk_offset = align_up(
                header_offset + std::mem::size_of::<PoolHeader>(),
                POOL_ALIGNMENT,
            );
            let end = chunk_offset + stride * entry.chunk_count as usize;

            if end > segment.size() {
                return Err(HermodError::invalid_parameter(
                    "mempools",
                    format!(
                        "pool layout requires {} bytes but the segment holds {}",
                        end,
                        segment.size()
                    ),
                ));
            }

            let pool = unsafe {
                ChunkPool::init_at(
                    base,
                    header_offset,
                    pool_id as u32,
                    stride as u32,
                    entry.chunk_count,
                    chunk_offset as u64,
                )
            };
            pools.push(pool);
            cursor = end;
        }

        Ok(Self {
            segment_id: segment.id(),
            segment,
            pools,
        })
    }

    /// Acquire a chunk able to carry `payload_size` bytes.
    ///
    /// Walks size classes smallest-fit upward; fails with `OutOfChunks`
    /// only when every class large enough is exhausted, or immediately when
    /// the request exceeds the largest configured class.
    pub fn acquire(&self, payload_size: usize) -> Result<ChunkRef> {
        for pool in &self.pools {
            if (pool.payload_capacity() as usize) < payload_size {
                continue;
            }
            if let Some(index) = pool.pop() {
                let offset = pool.chunk_offset(index);
                unsafe {
                    ChunkHeader::init(
                        pool.chunk_ptr(index) as *mut ChunkHeader,
                        pool.pool_id(),
                        payload_size as u32,
                    );
                }
                return Ok(ChunkRef::new(self.segment_id, offset as u32));
            }
        }

        Err(HermodError::out_of_chunks(payload_size))
    }

    /// Increment the reference count of a live chunk
    pub fn retain(&self, chunk: ChunkRef) -> Result<()> {
        let header = self.header(chunk)?;
        let previous = header.retain();
        if previous == 0 || previous >= REF_COUNT_CEILING {
            header.undo_retain();
            let what = if previous == 0 {
                "retain on dead chunk"
            } else {
                "reference count overflow on chunk"
            };
            return Err(HermodError::chunk_logic(format!("{} {}", what, chunk)));
        }
        Ok(())
    }

    /// Decrement the reference count; the final release returns the chunk
    /// to its origin pool
    pub fn release(&self, chunk: ChunkRef) -> Result<()> {
        let header = self.header(chunk)?;
        if header.references() == 0 {
            return Err(HermodError::chunk_logic(format!(
                "release on dead chunk {}",
                chunk
            )));
        }

        if header.release() {
            let pool = self.pool_of(header.origin_pool_id)?;
            let index = pool.index_of(chunk.offset as u64).ok_or_else(|| {
                HermodError::chunk_logic(format!("chunk {} outside its origin pool", chunk))
            })?;
            pool.push(index);
        }
        Ok(())
    }

    /// Stamp publish metadata into the chunk header.
    ///
    /// Must be called by the single owner before the chunk becomes visible
    /// in any delivery queue.
    pub fn stamp(&self, chunk: ChunkRef, sequence: u64, originator_port_id: u64) -> Result<()> {
        self.validate(chunk)?;
        unsafe {
            let header = self.segment.ptr_at(chunk.offset as usize) as *mut ChunkHeader;
            (*header).sequence_number = sequence;
            (*header).originator_port_id = originator_port_id;
        }
        Ok(())
    }

    /// Access the header of a chunk
    pub fn header(&self, chunk: ChunkRef) -> Result<&ChunkHeader> {
        self.validate(chunk)?;
        Ok(unsafe { &*(self.segment.ptr_at(chunk.offset as usize) as *const ChunkHeader) })
    }

    /// Borrow the payload of a chunk
    pub fn payload(&self, chunk: ChunkRef) -> Result<&[u8]> {
        let header = self.header(chunk)?;
        let len = header.payload_size as usize;
        let data = unsafe {
            self.segment
                .ptr_at(chunk.offset as usize + ChunkHeader::SIZE)
        };
        Ok(unsafe { std::slice::from_raw_parts(data, len) })
    }

    /// Borrow the payload of a chunk mutably.
    ///
    /// The caller must be the chunk's single owner; a chunk already visible
    /// in a delivery queue must not be written.
    pub fn payload_mut(&self, chunk: ChunkRef) -> Result<&mut [u8]> {
        let header = self.header(chunk)?;
        let len = header.payload_size as usize;
        let data = unsafe {
            self.segment
                .ptr_at(chunk.offset as usize + ChunkHeader::SIZE)
        };
        Ok(unsafe { std::slice::from_raw_parts_mut(data, len) })
    }

    /// Total free chunks across all size classes
    pub fn free_chunks(&self) -> usize {
        self.pools.iter().map(|p| p.free_chunks() as usize).sum()
    }

    /// Free chunks in one size class
    pub fn free_chunks_in(&self, pool_id: u32) -> Result<u32> {
        Ok(self.pool_of(pool_id)?.free_chunks())
    }

    /// Number of size classes
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Payload capacity of the largest size class
    pub fn max_payload_size(&self) -> usize {
        self.pools
            .last()
            .map(|p| p.payload_capacity() as usize)
            .unwrap_or(0)
    }

    /// Segment the pools live in
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    fn pool_of(&self, pool_id: u32) -> Result<&ChunkPool> {
        self.pools.get(pool_id as usize).ok_or_else(|| {
            HermodError::chunk_logic(format!("unknown origin pool {}", pool_id))
        })
    }

    fn validate(&self, chunk: ChunkRef) -> Result<()> {
        if chunk.segment_id != self.segment_id {
            return Err(HermodError::chunk_logic(format!(
                "chunk {} belongs to another segment",
                chunk
            )));
        }
        if chunk.offset as usize + ChunkHeader::SIZE > self.segment.size() {
            return Err(HermodError::chunk_logic(format!(
                "chunk {} outside the segment",
                chunk
            )));
        }
        if !self.pools.iter().any(|p| p.contains_offset(chunk.offset as u64)) {
            return Err(HermodError::chunk_logic(format!(
                "chunk {} does not address a chunk boundary",
                chunk
            )));
        }
        Ok(())
    }
}
