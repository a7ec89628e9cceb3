//! POSIX shared-memory segment implementation

use std::{fs::File, os::fd::OwnedFd};

use memmap2::{MmapMut, MmapOptions};
use nix::{
    fcntl::OFlag,
    sys::mman::{shm_open, shm_unlink},
    sys::stat::{umask, Mode},
    unistd::ftruncate,
};

use crate::error::{HermodError, Result, SegmentError};

use super::config::{AccessPolicy, SegmentConfig};

/// Identifier for a segment within one daemon instance
pub type SegmentId = u32;

/// Restores the previous umask when dropped.
///
/// The creation mask must be cleared so the permissions requested in the
/// segment config are applied verbatim by `shm_open`.
struct UmaskGuard {
    previous: Mode,
}

impl UmaskGuard {
    fn clear() -> Self {
        Self {
            previous: umask(Mode::empty()),
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.previous);
    }
}

/// A mapped POSIX shared-memory segment
#[derive(Debug)]
pub struct Segment {
    /// Daemon-assigned identifier
    id: SegmentId,
    /// Segment configuration
    config: SegmentConfig,
    /// Memory-mapped region
    mmap: MmapMut,
    /// Backing file handle; keeps the descriptor alive for the mapping
    _file: File,
    /// Whether this instance owns the backing object and unlinks it on drop
    has_ownership: bool,
}

impl Segment {
    /// Create or open a shared memory segment according to its config
    pub fn new(id: SegmentId, config: SegmentConfig) -> Result<Self> {
        config.validate()?;

        let (fd, has_ownership) = Self::open_backing(&config)?;

        if has_ownership {
            ftruncate(&fd, config.size as i64).map_err(|errno| {
                HermodError::segment(&config.name, SegmentError::from_errno(errno))
            })?;
        }

        let file = File::from(fd);
        let mmap = unsafe {
            MmapOptions::new()
                .len(config.size)
                .map_mut(&file)
                .map_err(|e| HermodError::from_io(e, "Failed to map segment"))?
        };

        Ok(Self {
            id,
            config,
            mmap,
            _file: file,
            has_ownership,
        })
    }

    /// Open the shm object per the configured access policy
    fn open_backing(config: &SegmentConfig) -> Result<(OwnedFd, bool)> {
        let _umask_guard = UmaskGuard::clear();
        let mode = Mode::from_bits_truncate(config.permissions);

        if config.policy == AccessPolicy::PurgeAndCreate {
            Self::unlink_if_exists(&config.name)?;
        }

        let oflag = Self::oflags_for(config.policy);

        match shm_open(config.name.as_str(), oflag, mode) {
            Ok(fd) => Ok((fd, config.policy.takes_ownership())),
            Err(nix::errno::Errno::EEXIST) if config.policy == AccessPolicy::CreateOrOpen => {
                // someone else owns the object, attach as non-owner
                let fd = shm_open(config.name.as_str(), OFlag::O_RDWR, mode).map_err(|errno| {
                    HermodError::segment(&config.name, SegmentError::from_errno(errno))
                })?;
                Ok((fd, false))
            }
            Err(errno) => Err(HermodError::segment(
                &config.name,
                SegmentError::from_errno(errno),
            )),
        }
    }

    fn oflags_for(policy: AccessPolicy) -> OFlag {
        let mut oflag = OFlag::O_RDWR;
        if policy != AccessPolicy::Open {
            oflag |= OFlag::O_CREAT | OFlag::O_EXCL;
        }
        oflag
    }

    /// Unlink a shm object by name, treating an absent object as success
    pub fn unlink_if_exists(name: &str) -> Result<bool> {
        match shm_unlink(name) {
            Ok(()) => Ok(true),
            Err(nix::errno::Errno::ENOENT) => Ok(false),
            Err(errno) => Err(HermodError::segment(name, SegmentError::from_errno(errno))),
        }
    }

    /// Get the segment identifier
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Get the segment name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the size of the segment in bytes
    pub fn size(&self) -> usize {
        self.config.size
    }

    /// Whether this instance owns the backing object
    pub fn has_ownership(&self) -> bool {
        self.has_ownership
    }

    /// Get the segment configuration
    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Base pointer of the mapping.
    ///
    /// # Safety
    /// The mapping is shared; callers must uphold the synchronization
    /// protocol of the structure they resolve at an offset (atomic queue
    /// indices, chunk reference counts).
    pub fn base_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    /// Resolve a byte offset to a raw pointer within the mapping.
    ///
    /// # Safety
    /// `offset` must lie within the segment and point at a properly
    /// initialized structure for the type it is cast to.
    pub unsafe fn ptr_at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset < self.size());
        self.base_ptr().add(offset)
    }

    /// Get the raw memory slice (read-only)
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if self.has_ownership {
            let _ = Self::unlink_if_exists(&self.config.name);
        }
    }
}

unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}
