//! Frame FIFO over a shared memory region

use std::{
    ptr::NonNull,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use crate::{
    error::{AudioError, Result},
    memory::{RegionConfig, SharedMemoryRegion},
};

/// Bytes taken by the two counters at the start of the region
pub const FIFO_HEADER_SIZE: usize = std::mem::size_of::<FifoHeader>();

/// Counter block at the start of every FIFO region
#[repr(C)]
struct FifoHeader {
    /// Total frames ever written, modulo the wrap boundary (producer only)
    write_counter: AtomicU32,
    /// Total frames ever read, modulo the wrap boundary (consumer only)
    read_counter: AtomicU32,
}

/// Single-producer single-consumer FIFO of fixed-size frames.
///
/// Each side of the pipe holds its own `FifoBuffer` over the same pages.
/// The capacity never changes after creation; the threshold limits how full
/// the producer lets it get.
#[derive(Debug)]
pub struct FifoBuffer {
    region: Arc<SharedMemoryRegion>,
    header: NonNull<FifoHeader>,
    data: NonNull<u8>,
    capacity: u32,
    bytes_per_frame: usize,
    /// Counters wrap here; always a multiple of the capacity
    boundary: u64,
    /// Usable frames for the producer (local to this side)
    threshold: AtomicU32,
}

impl FifoBuffer {
    /// Region size needed for a FIFO of `capacity` frames
    pub fn region_size(capacity: u32, bytes_per_frame: usize) -> usize {
        FIFO_HEADER_SIZE + capacity as usize * bytes_per_frame
    }

    /// Allocate a fresh region and create an empty FIFO in it
    pub fn allocate(config: RegionConfig, capacity: u32, bytes_per_frame: usize) -> Result<Self> {
        let config = config.with_size(Self::region_size(capacity, bytes_per_frame));
        let region = Arc::new(SharedMemoryRegion::new(config)?);
        Self::create(region, capacity, bytes_per_frame)
    }

    /// Create an empty FIFO in `region`, resetting both counters
    pub fn create(region: Arc<SharedMemoryRegion>, capacity: u32, bytes_per_frame: usize) -> Result<Self> {
        let fifo = Self::from_region(region, capacity, bytes_per_frame)?;
        fifo.header().write_counter.store(0, Ordering::Release);
        fifo.header().read_counter.store(0, Ordering::Release);
        Ok(fifo)
    }

    /// Attach to a FIFO that the peer already created in `region`
    pub fn attach(region: Arc<SharedMemoryRegion>, capacity: u32, bytes_per_frame: usize) -> Result<Self> {
        Self::from_region(region, capacity, bytes_per_frame)
    }

    fn from_region(region: Arc<SharedMemoryRegion>, capacity: u32, bytes_per_frame: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(AudioError::illegal_argument(
                "capacity",
                "FIFO capacity must be greater than 0",
            ));
        }
        if bytes_per_frame == 0 {
            return Err(AudioError::illegal_argument(
                "bytes_per_frame",
                "Frame size must be greater than 0",
            ));
        }

        let needed = Self::region_size(capacity, bytes_per_frame);
        if region.size() < needed {
            return Err(AudioError::out_of_range(
                "fifo_region_size",
                region.size() as i64,
                needed as i64,
                i64::MAX,
            ));
        }

        let base = unsafe { region.as_mut_ptr_unsafe::<u8>() };
        let header = NonNull::new(base as *mut FifoHeader)
            .ok_or_else(|| AudioError::no_memory("FIFO region is not mapped"))?;
        let data = NonNull::new(unsafe { base.add(FIFO_HEADER_SIZE) })
            .ok_or_else(|| AudioError::no_memory("FIFO region is not mapped"))?;

        let boundary = (u32::MAX as u64 / capacity as u64) * capacity as u64;

        Ok(Self {
            region,
            header,
            data,
            capacity,
            bytes_per_frame,
            boundary,
            threshold: AtomicU32::new(capacity),
        })
    }

    fn header(&self) -> &FifoHeader {
        unsafe { self.header.as_ref() }
    }

    /// The region backing this FIFO
    pub fn region(&self) -> &Arc<SharedMemoryRegion> {
        &self.region
    }

    /// Allocated capacity in frames
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Size of one frame in bytes
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    /// Usable size in frames
    pub fn threshold(&self) -> u32 {
        self.threshold.load(Ordering::Relaxed)
    }

    /// Set the usable size, clamped to `[1, capacity]`. Returns the value
    /// actually applied.
    pub fn set_threshold(&self, frames: u32) -> u32 {
        let frames = frames.clamp(1, self.capacity);
        self.threshold.store(frames, Ordering::Relaxed);
        frames
    }

    /// Raw write counter as published by the producer
    pub fn write_counter(&self) -> u32 {
        self.header().write_counter.load(Ordering::Acquire)
    }

    /// Raw read counter as published by the consumer
    pub fn read_counter(&self) -> u32 {
        self.header().read_counter.load(Ordering::Acquire)
    }

    /// Frames between two counter values, `later - earlier` modulo the wrap
    /// boundary
    pub fn counter_distance(&self, later: u32, earlier: u32) -> u32 {
        let later = later as u64 % self.boundary;
        let earlier = earlier as u64 % self.boundary;
        ((later + self.boundary - earlier) % self.boundary) as u32
    }

    fn advance(&self, counter: u32, frames: u32) -> u32 {
        ((counter as u64 % self.boundary + frames as u64) % self.boundary) as u32
    }

    fn index_of(&self, counter: u32) -> usize {
        (counter as u64 % self.capacity as u64) as usize
    }

    /// Frames ready for the consumer
    pub fn frames_available(&self) -> u32 {
        let write = self.write_counter();
        let read = self.read_counter();
        self.counter_distance(write, read).min(self.capacity)
    }

    /// Frames the producer may still write under the current threshold
    pub fn empty_frames(&self) -> u32 {
        self.threshold().saturating_sub(self.frames_available())
    }

    /// Write up to `frames` frames from `src`. Never blocks; returns the
    /// number of frames accepted.
    pub fn write(&self, src: &[u8], frames: u32) -> u32 {
        let frames = frames.min((src.len() / self.bytes_per_frame) as u32);
        self.produce(frames, |dst, offset| {
            dst.copy_from_slice(&src[offset..offset + dst.len()]);
        })
    }

    /// Write up to `frames` frames of silence (all-zero bytes)
    pub fn write_zeros(&self, frames: u32) -> u32 {
        self.produce(frames, |dst, _| dst.fill(0))
    }

    fn produce<F>(&self, frames: u32, mut fill: F) -> u32
    where
        F: FnMut(&mut [u8], usize),
    {
        let read = self.header().read_counter.load(Ordering::Acquire);
        let write = self.header().write_counter.load(Ordering::Relaxed);

        let full = self.counter_distance(write, read).min(self.capacity);
        let empty = self.threshold().saturating_sub(full);
        let count = frames.min(empty);
        if count == 0 {
            return 0;
        }

        let start = self.index_of(write);
        let first = (count as usize).min(self.capacity as usize - start);
        let second = count as usize - first;
        let bpf = self.bytes_per_frame;

        unsafe {
            let head = std::slice::from_raw_parts_mut(self.data.as_ptr().add(start * bpf), first * bpf);
            fill(head, 0);
            if second > 0 {
                let tail = std::slice::from_raw_parts_mut(self.data.as_ptr(), second * bpf);
                fill(tail, first * bpf);
            }
        }

        self.header()
            .write_counter
            .store(self.advance(write, count), Ordering::Release);
        count
    }

    /// Read up to `frames` frames into `dst`. Never blocks; returns the
    /// number of frames delivered.
    pub fn read(&self, dst: &mut [u8], frames: u32) -> u32 {
        let frames = frames.min((dst.len() / self.bytes_per_frame) as u32);
        self.consume(frames, |src, offset| {
            dst[offset..offset + src.len()].copy_from_slice(src);
        })
    }

    /// Drop up to `frames` frames without copying them
    pub fn discard(&self, frames: u32) -> u32 {
        self.consume(frames, |_, _| {})
    }

    fn consume<F>(&self, frames: u32, mut drain: F) -> u32
    where
        F: FnMut(&[u8], usize),
    {
        let write = self.header().write_counter.load(Ordering::Acquire);
        let read = self.header().read_counter.load(Ordering::Relaxed);

        let full = self.counter_distance(write, read).min(self.capacity);
        let count = frames.min(full);
        if count == 0 {
            return 0;
        }

        let start = self.index_of(read);
        let first = (count as usize).min(self.capacity as usize - start);
        let second = count as usize - first;
        let bpf = self.bytes_per_frame;

        unsafe {
            let head = std::slice::from_raw_parts(self.data.as_ptr().add(start * bpf), first * bpf);
            drain(head, 0);
            if second > 0 {
                let tail = std::slice::from_raw_parts(self.data.as_ptr(), second * bpf);
                drain(tail, first * bpf);
            }
        }

        self.header()
            .read_counter
            .store(self.advance(read, count), Ordering::Release);
        count
    }

    /// Consumer-side flush: drop everything written so far. Returns the
    /// number of frames discarded.
    pub fn flush(&self) -> u32 {
        let available = self.frames_available();
        self.discard(available)
    }
}

unsafe impl Send for FifoBuffer {}
unsafe impl Sync for FifoBuffer {}
