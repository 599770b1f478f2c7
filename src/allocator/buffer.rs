//! Uniform Buffer Sub-Allocator
//!
//! Carves aligned byte ranges out of a growing list of fixed-capacity
//! backing buffers.
//!
//! # Strategy
//!
//! - **Allocate**: first-fit scan across the existing buffers. When nothing
//!   fits, one new buffer of the same fixed capacity is appended. Backing
//!   buffers are never resized, so blocks handed out earlier stay valid.
//! - **Free**: the block's range returns to its own buffer's tracker and is
//!   coalesced with free neighbours.
//! - **Free all**: every tracker is wiped in one step (transient data at a
//!   frame boundary). Buffers stay allocated for reuse.
//!
//! A request larger than the fixed capacity fails with
//! [`CacheError::AllocationExhaustion`]; it is never retried.

use std::ops::Range;

use rustc_hash::FxHashMap;

use crate::backend::GpuDevice;
use crate::errors::{CacheError, ResourceKind, Result};

#[inline]
fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

// ─── Range Tracker ───────────────────────────────────────────────────────────

/// Free-list bookkeeping for one backing buffer.
#[derive(Debug)]
pub struct RangeTracker {
    capacity: u64,
    /// Sorted, non-overlapping, non-adjacent free ranges.
    free: Vec<Range<u64>>,
    live: FxHashMap<u64, Range<u64>>,
    next_token: u64,
}

impl RangeTracker {
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            free: vec![0..capacity],
            live: FxHashMap::default(),
            next_token: 1,
        }
    }

    /// First-fit allocation of `size` bytes at an `align`-aligned offset.
    ///
    /// Returns `(offset, token)`; the token identifies the block on free.
    pub fn allocate(&mut self, size: u64, align: u64) -> Option<(u64, u64)> {
        let (index, start) = self.free.iter().enumerate().find_map(|(i, range)| {
            let start = align_up(range.start, align);
            (start + size <= range.end).then_some((i, start))
        })?;

        let range = self.free.remove(index);
        let end = start + size;
        let mut insert_at = index;
        if range.start < start {
            self.free.insert(insert_at, range.start..start);
            insert_at += 1;
        }
        if end < range.end {
            self.free.insert(insert_at, end..range.end);
        }

        let token = self.next_token;
        self.next_token += 1;
        self.live.insert(token, start..end);
        Some((start, token))
    }

    /// Returns a block's range to the free list. Unknown tokens are ignored.
    pub fn free(&mut self, token: u64) -> bool {
        let Some(range) = self.live.remove(&token) else {
            return false;
        };

        let index = self.free.partition_point(|r| r.start < range.start);
        self.free.insert(index, range);

        // Merge with the right neighbour, then the left one.
        if index + 1 < self.free.len() && self.free[index].end == self.free[index + 1].start {
            let right = self.free.remove(index + 1);
            self.free[index].end = right.end;
        }
        if index > 0 && self.free[index - 1].end == self.free[index].start {
            let current = self.free.remove(index);
            self.free[index - 1].end = current.end;
        }
        true
    }

    /// Wipes every live block.
    pub fn free_all(&mut self) {
        self.live.clear();
        self.free.clear();
        self.free.push(0..self.capacity);
    }

    /// Sum of live block sizes.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.live.values().map(|r| r.end - r.start).sum()
    }

    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

// ─── Blocks ──────────────────────────────────────────────────────────────────

/// A sub-allocated range, owned by the entry that requested it.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferBlock {
    /// Index of the backing buffer inside its allocator.
    pub buffer: usize,
    pub offset: u64,
    pub size: u64,
    token: u64,
}

struct BackingBuffer<D: GpuDevice> {
    buffer: D::Buffer,
    tracker: RangeTracker,
}

// ─── Sub-Allocator ───────────────────────────────────────────────────────────

/// Virtual allocator over fixed-capacity uniform buffers.
pub struct BufferSubAllocator<D: GpuDevice> {
    label: String,
    capacity: u64,
    alignment: u64,
    buffers: Vec<BackingBuffer<D>>,
}

impl<D: GpuDevice> BufferSubAllocator<D> {
    /// `alignment` is the device's uniform offset alignment; blocks start and
    /// end on multiples of it.
    #[must_use]
    pub fn new(label: &str, capacity: u64, alignment: u64) -> Self {
        Self {
            label: label.to_string(),
            capacity,
            alignment: alignment.max(1),
            buffers: Vec::new(),
        }
    }

    pub fn allocate(&mut self, device: &D, size: u64) -> Result<BufferBlock> {
        let size = align_up(size.max(1), self.alignment);
        if size > self.capacity {
            return Err(CacheError::AllocationExhaustion {
                resource: "uniform buffer",
                requested: size,
                capacity: self.capacity,
            });
        }

        for (index, backing) in self.buffers.iter_mut().enumerate() {
            if let Some((offset, token)) = backing.tracker.allocate(size, self.alignment) {
                return Ok(BufferBlock {
                    buffer: index,
                    offset,
                    size,
                    token,
                });
            }
        }

        let label = format!("{} #{}", self.label, self.buffers.len());
        let buffer = device
            .create_buffer(&label, self.capacity)
            .map_err(|e| CacheError::build(ResourceKind::Buffer, &label, e))?;
        log::info!(
            "{}: appended backing buffer #{} ({} bytes)",
            self.label,
            self.buffers.len(),
            self.capacity
        );

        let mut tracker = RangeTracker::new(self.capacity);
        let (offset, token) = tracker
            .allocate(size, self.alignment)
            .ok_or(CacheError::AllocationExhaustion {
                resource: "uniform buffer",
                requested: size,
                capacity: self.capacity,
            })?;
        self.buffers.push(BackingBuffer { buffer, tracker });

        Ok(BufferBlock {
            buffer: self.buffers.len() - 1,
            offset,
            size,
            token,
        })
    }

    pub fn free(&mut self, block: BufferBlock) {
        let released = self
            .buffers
            .get_mut(block.buffer)
            .is_some_and(|b| b.tracker.free(block.token));
        if !released {
            log::warn!("{}: freeing unknown block {:?}", self.label, block);
        }
    }

    pub fn free_all(&mut self) {
        for backing in &mut self.buffers {
            backing.tracker.free_all();
        }
    }

    /// Writes `data` at the start of `block`.
    pub fn write(&self, device: &D, block: &BufferBlock, data: &[u8]) {
        debug_assert!(data.len() as u64 <= block.size);
        if let Some(backing) = self.buffers.get(block.buffer) {
            device.write_buffer(&backing.buffer, block.offset, data);
        }
    }

    #[must_use]
    pub fn buffer(&self, block: &BufferBlock) -> Option<&D::Buffer> {
        self.buffers.get(block.buffer).map(|b| &b.buffer)
    }

    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.buffers.iter().map(|b| b.tracker.used_bytes()).sum()
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Destroys every backing buffer. Outstanding blocks become invalid.
    pub fn destroy(&mut self, device: &D) {
        for backing in self.buffers.drain(..) {
            device.destroy_buffer(backing.buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;

    #[test]
    fn tracker_reuses_freed_offset() {
        let mut tracker = RangeTracker::new(1024);
        let (a, token_a) = tracker.allocate(256, 256).unwrap();
        let (b, _) = tracker.allocate(256, 256).unwrap();
        assert_eq!((a, b), (0, 256));

        tracker.free(token_a);
        let (again, _) = tracker.allocate(256, 256).unwrap();
        assert_eq!(again, a);
    }

    #[test]
    fn tracker_coalesces_neighbours() {
        let mut tracker = RangeTracker::new(768);
        let (_, t0) = tracker.allocate(256, 256).unwrap();
        let (_, t1) = tracker.allocate(256, 256).unwrap();
        let (_, t2) = tracker.allocate(256, 256).unwrap();
        assert!(tracker.allocate(256, 256).is_none());

        tracker.free(t0);
        tracker.free(t2);
        tracker.free(t1);
        assert_eq!(tracker.free, vec![0..768]);
        assert_eq!(tracker.allocate(768, 256).map(|(o, _)| o), Some(0));
    }

    #[test]
    fn tracker_aligns_offsets() {
        let mut tracker = RangeTracker::new(1024);
        tracker.allocate(10, 1).unwrap();
        let (offset, _) = tracker.allocate(16, 64).unwrap();
        assert_eq!(offset, 64);
        // The padding in front stays usable.
        assert_eq!(tracker.allocate(8, 1).map(|(o, _)| o), Some(10));
    }

    #[test]
    fn allocator_grows_by_whole_buffers() {
        let device = HeadlessDevice::new();
        let mut alloc = BufferSubAllocator::<HeadlessDevice>::new("test", 512, 256);

        let blocks: Vec<_> = (0..3).map(|_| alloc.allocate(&device, 200).unwrap()).collect();
        assert_eq!(alloc.buffer_count(), 2);
        assert_eq!(blocks[2].buffer, 1);
        assert_eq!(blocks[2].offset, 0);
        assert!(alloc.used_bytes() <= 2 * alloc.capacity());
    }

    #[test]
    fn oversized_request_is_rejected() {
        let device = HeadlessDevice::new();
        let mut alloc = BufferSubAllocator::<HeadlessDevice>::new("test", 512, 256);
        let err = alloc.allocate(&device, 4096).unwrap_err();
        assert!(matches!(err, CacheError::AllocationExhaustion { capacity: 512, .. }));
        assert_eq!(alloc.buffer_count(), 0);
    }

    #[test]
    fn free_all_keeps_buffers() {
        let device = HeadlessDevice::new();
        let mut alloc = BufferSubAllocator::<HeadlessDevice>::new("test", 512, 256);
        alloc.allocate(&device, 256).unwrap();
        alloc.allocate(&device, 256).unwrap();
        alloc.free_all();
        assert_eq!(alloc.used_bytes(), 0);
        assert_eq!(alloc.buffer_count(), 1);
        assert_eq!(alloc.allocate(&device, 256).unwrap().offset, 0);
    }
}
