//! Shared memory region implementation

use std::{
    fs::{File, OpenOptions},
    os::fd::{AsFd, AsRawFd, OwnedFd, RawFd},
    os::unix::fs::OpenOptionsExt,
};

#[cfg(target_os = "linux")]
use std::ffi::CString;

use memmap2::{MmapMut, MmapOptions};
#[cfg(target_os = "linux")]
use nix::{
    sys::memfd::{memfd_create, MemFdCreateFlag},
    unistd::ftruncate,
};

use crate::error::{AudioError, Result};

use super::config::{BackingType, RegionConfig};

/// A duplicated file descriptor plus the size of the region behind it.
///
/// This is what crosses the process boundary; the receiver maps it with
/// [`SharedMemoryRegion::map_descriptor`].
#[derive(Debug)]
pub struct RegionDescriptor {
    pub fd: OwnedFd,
    pub size: usize,
}

impl RegionDescriptor {
    /// Wrap a received descriptor
    pub fn new(fd: OwnedFd, size: usize) -> Self {
        Self { fd, size }
    }
}

/// A mapped shared memory region
#[derive(Debug)]
pub struct SharedMemoryRegion {
    name: String,
    backing_type: BackingType,
    mmap: MmapMut,
    fd: OwnedFd,
}

impl SharedMemoryRegion {
    /// Create a new zero-filled region
    pub fn new(config: RegionConfig) -> Result<Self> {
        config.validate()?;

        let fd = Self::create_backing(&config)?;
        let mmap = Self::create_mapping(&fd, config.size)?;

        Ok(Self {
            name: config.name,
            backing_type: config.backing_type,
            mmap,
            fd,
        })
    }

    /// Map a region that another process (or another part of this one)
    /// created and shared through a descriptor
    pub fn map_descriptor(descriptor: RegionDescriptor) -> Result<Self> {
        if descriptor.size == 0 {
            return Err(AudioError::illegal_argument(
                "size",
                "Shared region descriptor has zero size",
            ));
        }

        let actual = File::from(descriptor.fd.try_clone().map_err(|e| {
            AudioError::no_memory_io(e, "Failed to duplicate region descriptor")
        })?)
        .metadata()
        .map_err(|e| AudioError::no_memory_io(e, "Failed to stat region descriptor"))?
        .len();
        if (actual as usize) < descriptor.size {
            return Err(AudioError::out_of_range(
                "region_size",
                descriptor.size as i64,
                0,
                actual as i64,
            ));
        }

        let mmap = Self::create_mapping(&descriptor.fd, descriptor.size)?;

        Ok(Self {
            name: format!("fd{}", descriptor.fd.as_raw_fd()),
            backing_type: BackingType::default(),
            mmap,
            fd: descriptor.fd,
        })
    }

    /// Create the backing storage for the region
    fn create_backing(config: &RegionConfig) -> Result<OwnedFd> {
        match config.backing_type {
            BackingType::FileBacked => Self::create_file_backing(config),
            #[cfg(target_os = "linux")]
            BackingType::MemFd => Self::create_memfd_backing(config),
        }
    }

    /// Create file-backed storage. The file is unlinked right away; the
    /// descriptor keeps the pages alive.
    fn create_file_backing(config: &RegionConfig) -> Result<OwnedFd> {
        let path = config.file_path();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(config.permissions)
            .open(&path)
            .map_err(|e| AudioError::no_memory_io(e, "Failed to create region file"))?;

        file.set_len(config.size as u64)
            .map_err(|e| AudioError::no_memory_io(e, "Failed to set region file size"))?;

        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("Could not unlink region file {}: {}", path.display(), e);
        }

        Ok(OwnedFd::from(file))
    }

    /// Create memfd-backed storage
    #[cfg(target_os = "linux")]
    fn create_memfd_backing(config: &RegionConfig) -> Result<OwnedFd> {
        let name_cstr = CString::new(config.name.clone())
            .map_err(|_| AudioError::illegal_argument("name", "Name contains null bytes"))?;

        let owned_fd = memfd_create(&name_cstr, MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| AudioError::no_memory(format!("Failed to create memfd: {}", e)))?;

        ftruncate(&owned_fd, config.size as i64)
            .map_err(|e| AudioError::no_memory(format!("Failed to set memfd size: {}", e)))?;

        Ok(owned_fd)
    }

    fn create_mapping(fd: &OwnedFd, size: usize) -> Result<MmapMut> {
        unsafe {
            MmapOptions::new()
                .len(size)
                .map_mut(fd.as_raw_fd())
                .map_err(|e| AudioError::no_memory_io(e, "Failed to create memory mapping"))
        }
    }

    /// Duplicate the descriptor so the region can be handed to a peer
    pub fn descriptor(&self) -> Result<RegionDescriptor> {
        let fd = self
            .fd
            .as_fd()
            .try_clone_to_owned()
            .map_err(|e| AudioError::no_memory_io(e, "Failed to duplicate region fd"))?;
        Ok(RegionDescriptor::new(fd, self.size()))
    }

    /// Get a typed pointer to the start of the region
    pub fn as_ptr<T>(&self) -> *const T {
        self.mmap.as_ptr() as *const T
    }

    /// Get a mutable pointer into a region shared through `Arc`.
    ///
    /// # Safety
    /// Writers must coordinate through the atomics stored in the region.
    pub unsafe fn as_mut_ptr_unsafe<T>(&self) -> *mut T {
        self.mmap.as_ptr() as *mut T
    }

    /// Size of the region in bytes
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// Name of the region
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing type of the region
    pub fn backing_type(&self) -> BackingType {
        self.backing_type
    }

    /// Raw file descriptor (still owned by the region)
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

unsafe impl Send for SharedMemoryRegion {}
unsafe impl Sync for SharedMemoryRegion {}
