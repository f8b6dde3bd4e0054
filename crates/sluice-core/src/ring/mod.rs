//! Chunked single-producer/single-consumer ring buffer
//!
//! The ring stores a fixed number of equal-size chunks. The writer fills
//! chunks through a write vector and commits them with `write_advance`; the
//! reader consumes them through a read vector and releases them with
//! `read_advance`. Both vectors are exposed as two contiguous segments so
//! that callers can work on ring storage directly, without an intermediate
//! copy, even when the region wraps past the physical end of storage.
//!
//! ```text
//!  storage:  [ 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 ]
//!                    ▲read       ▲write
//!  read vector:  first = 2..4, second = empty
//!  write vector: first = 4..8, second = 0..2   (wraps)
//! ```
//!
//! Cursors are free-running `usize` positions. Physical slots are the
//! cursor masked with `slots - 1`, so storage is always a power of two of
//! chunks even when the writer capacity is not.

mod vector;

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use thiserror::Error;

pub use vector::{ChunkRef, ReadVector, Segment, Segments, WriteVector};

/// Errors from ring buffer creation and cursor movement
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// Storage for the requested capacity could not be reserved
    #[error("Failed to allocate ring buffer of {chunks} x {chunk_size} bytes")]
    Allocation { chunks: usize, chunk_size: usize },

    /// A cursor was advanced past the available space
    #[error("Ring buffer overflow: advance by {requested}, only {available} available")]
    Overflow { requested: usize, available: usize },
}

/// How much of the storage the writer may use
///
/// `Exact` makes exactly the requested chunk count writable, so every read
/// advance hands the freed chunk straight back to the writer. `Slack` lets
/// the writer use every physical slot but one, which exposes more chunks
/// than were requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpacePolicy {
    Exact,
    Slack,
}

impl SpacePolicy {
    /// Policy for the `advance_space_immediately` creation flag
    pub fn from_flag(advance_space_immediately: bool) -> Self {
        if advance_space_immediately {
            SpacePolicy::Exact
        } else {
            SpacePolicy::Slack
        }
    }
}

/// Fixed-capacity circular buffer of equal-size chunks
///
/// At most one thread may advance the write cursor and at most one thread
/// may advance the read cursor at any time. Space queries may be issued from
/// any thread.
pub struct RingBuffer {
    write_pos: CachePadded<AtomicUsize>,
    read_pos: CachePadded<AtomicUsize>,
    /// Chunks the writer may hold at once
    capacity: usize,
    /// Physical slot count minus one
    slot_mask: usize,
    chunk_size: usize,
    policy: SpacePolicy,
    storage: Box<[UnsafeCell<u8>]>,
}

// Storage is only reached through the SPSC discipline documented on the
// vector accessors: the writer touches the write region, the reader touches
// the read region, and the cursors never let the two overlap.
unsafe impl Sync for RingBuffer {}
unsafe impl Send for RingBuffer {}

impl RingBuffer {
    /// Create a ring holding `chunk_count` chunks of `chunk_size` bytes
    pub fn new(chunk_count: usize, chunk_size: usize, policy: SpacePolicy) -> Result<Self, RingError> {
        let alloc_err = RingError::Allocation {
            chunks: chunk_count,
            chunk_size,
        };
        if chunk_count == 0 || chunk_size == 0 {
            return Err(alloc_err);
        }

        let slots = match policy {
            SpacePolicy::Exact => chunk_count.checked_next_power_of_two(),
            SpacePolicy::Slack => chunk_count
                .checked_add(1)
                .and_then(usize::checked_next_power_of_two),
        }
        .ok_or_else(|| alloc_err.clone())?;
        let bytes = slots.checked_mul(chunk_size).ok_or_else(|| alloc_err.clone())?;

        let mut storage: Vec<UnsafeCell<u8>> = Vec::new();
        storage.try_reserve_exact(bytes).map_err(|_| alloc_err)?;
        storage.resize_with(bytes, || UnsafeCell::new(0));

        let capacity = match policy {
            SpacePolicy::Exact => chunk_count,
            SpacePolicy::Slack => slots - 1,
        };

        log::debug!(
            "RingBuffer: {} chunks of {} bytes ({} slots, {:?})",
            capacity,
            chunk_size,
            slots,
            policy
        );

        Ok(Self {
            write_pos: CachePadded::new(AtomicUsize::new(0)),
            read_pos: CachePadded::new(AtomicUsize::new(0)),
            capacity,
            slot_mask: slots - 1,
            chunk_size,
            policy,
            storage: storage.into_boxed_slice(),
        })
    }

    /// Create a ring from the raw creation flag
    pub fn create(
        chunk_count: usize,
        chunk_size: usize,
        advance_space_immediately: bool,
    ) -> Result<Self, RingError> {
        Self::new(
            chunk_count,
            chunk_size,
            SpacePolicy::from_flag(advance_space_immediately),
        )
    }

    /// Chunks the writer may hold at once
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes per chunk
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Physical slot count
    pub fn slots(&self) -> usize {
        self.slot_mask + 1
    }

    pub fn policy(&self) -> SpacePolicy {
        self.policy
    }

    /// One load of each cursor: `(write, read)`
    fn cursors(&self) -> (usize, usize) {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        (w, r)
    }

    /// Committed chunks not yet released by the reader
    pub fn read_space(&self) -> usize {
        let (w, r) = self.cursors();
        w.wrapping_sub(r)
    }

    /// Chunks the writer can fill right now
    pub fn write_space(&self) -> usize {
        self.capacity.saturating_sub(self.read_space())
    }

    /// Commit `n` chunks as populated
    pub fn write_advance(&self, n: usize) -> Result<(), RingError> {
        let available = self.write_space();
        if n > available {
            return Err(RingError::Overflow {
                requested: n,
                available,
            });
        }
        self.write_pos.fetch_add(n, Ordering::AcqRel);
        Ok(())
    }

    /// Release `n` chunks back to the writer
    pub fn read_advance(&self, n: usize) -> Result<(), RingError> {
        let available = self.read_space();
        if n > available {
            return Err(RingError::Overflow {
                requested: n,
                available,
            });
        }
        self.read_pos.fetch_add(n, Ordering::AcqRel);
        Ok(())
    }

    /// Zero both cursors
    ///
    /// Must not race with an advance; engines call this while stopped.
    pub fn reset(&self) {
        self.write_pos.store(0, Ordering::Release);
        self.read_pos.store(0, Ordering::Release);
    }

    /// Slot ranges of the writable region
    ///
    /// Start and length come from a single snapshot of both cursors, so the
    /// region always ends `capacity` chunks past the read cursor it saw.
    pub fn write_segments(&self) -> Segments {
        let (w, r) = self.cursors();
        let len = self.capacity.saturating_sub(w.wrapping_sub(r));
        self.split(w & self.slot_mask, len)
    }

    /// Slot ranges of the readable region
    pub fn read_segments(&self) -> Segments {
        let (w, r) = self.cursors();
        self.split(r & self.slot_mask, w.wrapping_sub(r).min(self.capacity))
    }

    /// The last `n` chunks of the write region
    ///
    /// Measured back from the read cursor only, so the writer may advance
    /// concurrently. These are the chunks the last `read_advance(n)` handed
    /// to the writer. Only the reader may call this.
    pub fn write_tail(&self, n: usize) -> Segments {
        let n = n.min(self.capacity);
        let r = self.read_pos.load(Ordering::Acquire);
        let start = r.wrapping_add(self.capacity).wrapping_sub(n) & self.slot_mask;
        self.split(start, n)
    }

    fn split(&self, start: usize, len: usize) -> Segments {
        let slots = self.slots();
        if start + len > slots {
            Segments {
                first: Segment {
                    start,
                    len: slots - start,
                },
                second: Segment {
                    start: 0,
                    len: start + len - slots,
                },
            }
        } else {
            Segments {
                first: Segment { start, len },
                second: Segment { start: 0, len: 0 },
            }
        }
    }

    /// Writable storage as up to two byte slices
    ///
    /// # Safety
    ///
    /// The caller must be the ring's only writer and must not hold the
    /// returned slices across a `write_advance`, nor while a chunk of the
    /// write region is owned by a device queue.
    pub unsafe fn write_vector(&self) -> WriteVector<'_> {
        let segs = self.write_segments();
        WriteVector {
            first: self.segment_mut(segs.first),
            second: self.segment_mut(segs.second),
        }
    }

    /// Readable storage as up to two byte slices
    ///
    /// # Safety
    ///
    /// The caller must be the ring's only reader and must not hold the
    /// returned slices across a `read_advance`.
    pub unsafe fn read_vector(&self) -> ReadVector<'_> {
        let segs = self.read_segments();
        ReadVector {
            first: &*self.segment_mut(segs.first),
            second: &*self.segment_mut(segs.second),
        }
    }

    /// Handle to a single physical slot
    ///
    /// Handles are given to device queues, which read (playback) or fill
    /// (capture) the slot until its completion is reported.
    pub fn chunk_ref(self: &Arc<Self>, slot: usize) -> ChunkRef {
        ChunkRef::new(Arc::clone(self), slot & self.slot_mask)
    }

    /// Mutable bytes of `seg`, empty for an empty segment
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn segment_mut(&self, seg: Segment) -> &mut [u8] {
        if seg.len == 0 {
            return &mut [];
        }
        let offset = seg.start * self.chunk_size;
        let len = seg.len * self.chunk_size;
        debug_assert!(offset + len <= self.storage.len());
        let ptr = UnsafeCell::raw_get(self.storage.as_ptr().add(offset));
        std::slice::from_raw_parts_mut(ptr, len)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("chunk_size", &self.chunk_size)
            .field("read_space", &self.read_space())
            .field("write_space", &self.write_space())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_chunk_accounting_scenario() {
        let ring = RingBuffer::create(4, 256, true).unwrap();
        assert_eq!(ring.write_space(), 4);
        assert_eq!(ring.read_space(), 0);

        ring.write_advance(3).unwrap();
        assert_eq!(ring.write_space(), 1);
        assert_eq!(ring.read_space(), 3);

        ring.read_advance(2).unwrap();
        assert_eq!(ring.read_space(), 1);
        assert_eq!(ring.write_space(), 3);
    }

    #[test]
    fn test_spaces_always_sum_to_capacity() {
        let ring = RingBuffer::new(5, 8, SpacePolicy::Exact).unwrap();
        let steps = [(3, 0), (0, 2), (4, 0), (0, 5), (2, 1), (3, 3), (0, 1)];
        for (w, r) in steps {
            ring.write_advance(w).unwrap();
            assert_eq!(ring.write_space() + ring.read_space(), ring.capacity());
            ring.read_advance(r).unwrap();
            assert_eq!(ring.write_space() + ring.read_space(), ring.capacity());
        }
    }

    #[test]
    fn test_advance_round_trip_restores_spaces() {
        let ring = RingBuffer::new(6, 4, SpacePolicy::Exact).unwrap();
        ring.write_advance(2).unwrap();
        let (ws, rs) = (ring.write_space(), ring.read_space());

        ring.write_advance(3).unwrap();
        ring.read_advance(3).unwrap();

        assert_eq!(ring.write_space(), ws);
        assert_eq!(ring.read_space(), rs);
    }

    #[test]
    fn test_overflow_is_rejected_not_clamped() {
        let ring = RingBuffer::new(4, 16, SpacePolicy::Exact).unwrap();
        ring.write_advance(3).unwrap();
        assert_eq!(
            ring.write_advance(2),
            Err(RingError::Overflow {
                requested: 2,
                available: 1
            })
        );
        assert_eq!(ring.read_space(), 3);

        assert!(ring.read_advance(4).is_err());
        assert_eq!(ring.read_space(), 3);
    }

    #[test]
    fn test_full_ring_has_empty_write_vector() {
        let ring = RingBuffer::new(4, 16, SpacePolicy::Exact).unwrap();
        ring.write_advance(4).unwrap();
        let segs = ring.write_segments();
        assert!(segs.first.is_empty());
        assert!(segs.second.is_empty());

        let vec = unsafe { ring.write_vector() };
        assert!(vec.first.is_empty());
        assert!(vec.second.is_empty());
    }

    #[test]
    fn test_write_vector_wraps_into_second_segment() {
        let ring = RingBuffer::new(4, 2, SpacePolicy::Exact).unwrap();
        ring.write_advance(3).unwrap();
        ring.read_advance(3).unwrap();

        let segs = ring.write_segments();
        assert_eq!(segs.first, Segment { start: 3, len: 1 });
        assert_eq!(segs.second, Segment { start: 0, len: 3 });
        assert_eq!(segs.total(), ring.write_space());
    }

    #[test]
    fn test_data_survives_wraparound() {
        let ring = RingBuffer::new(4, 3, SpacePolicy::Exact).unwrap();
        // Move the cursors so the next write wraps
        ring.write_advance(3).unwrap();
        ring.read_advance(3).unwrap();

        let pattern: Vec<u8> = (0..12).map(|i| i as u8 * 7 + 1).collect();
        {
            let vec = unsafe { ring.write_vector() };
            assert_eq!(vec.first.len() + vec.second.len(), 12);
            let split = vec.first.len();
            vec.first.copy_from_slice(&pattern[..split]);
            vec.second.copy_from_slice(&pattern[split..]);
        }
        ring.write_advance(4).unwrap();

        let vec = unsafe { ring.read_vector() };
        let mut out = Vec::new();
        out.extend_from_slice(vec.first);
        out.extend_from_slice(vec.second);
        assert_eq!(out, pattern);
    }

    #[test]
    fn test_slack_policy_exposes_extra_slots() {
        let ring = RingBuffer::new(5, 4, SpacePolicy::Slack).unwrap();
        assert_eq!(ring.slots(), 8);
        assert_eq!(ring.capacity(), 7);
        assert_eq!(ring.write_space(), 7);

        let ring = RingBuffer::new(4, 4, SpacePolicy::Slack).unwrap();
        assert_eq!(ring.slots(), 8);
        assert_eq!(ring.capacity(), 7);
    }

    #[test]
    fn test_exact_policy_rounds_storage_only() {
        let ring = RingBuffer::new(3, 4, SpacePolicy::Exact).unwrap();
        assert_eq!(ring.slots(), 4);
        assert_eq!(ring.capacity(), 3);
    }

    #[test]
    fn test_reset_zeroes_cursors() {
        let ring = RingBuffer::new(4, 4, SpacePolicy::Exact).unwrap();
        ring.write_advance(4).unwrap();
        ring.read_advance(1).unwrap();
        ring.reset();
        assert_eq!(ring.read_space(), 0);
        assert_eq!(ring.write_space(), 4);
        assert_eq!(ring.write_segments().first.start, 0);
    }

    #[test]
    fn test_zero_sized_ring_fails_allocation() {
        assert!(matches!(
            RingBuffer::new(0, 16, SpacePolicy::Exact),
            Err(RingError::Allocation { .. })
        ));
        assert!(matches!(
            RingBuffer::new(usize::MAX / 2, usize::MAX / 2, SpacePolicy::Exact),
            Err(RingError::Allocation { .. })
        ));
    }

    #[test]
    fn test_cross_thread_producer_consumer() {
        let ring = Arc::new(RingBuffer::new(4, 1, SpacePolicy::Exact).unwrap());
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                let mut next = 0u8;
                while next < 200 {
                    if ring.write_space() == 0 {
                        std::thread::yield_now();
                        continue;
                    }
                    let vec = unsafe { ring.write_vector() };
                    vec.first[0] = next;
                    ring.write_advance(1).unwrap();
                    next += 1;
                }
            })
        };

        let mut expected = 0u8;
        while expected < 200 {
            if ring.read_space() == 0 {
                std::thread::yield_now();
                continue;
            }
            let vec = unsafe { ring.read_vector() };
            assert_eq!(vec.first[0], expected);
            ring.read_advance(1).unwrap();
            expected += 1;
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_write_tail_is_the_chunk_just_released() {
        // 8 slots, 7 writable
        let ring = RingBuffer::new(5, 1, SpacePolicy::Slack).unwrap();
        ring.write_advance(1).unwrap();
        ring.read_advance(1).unwrap();
        // Writer commits another chunk before the reader looks
        ring.write_advance(1).unwrap();

        let tail = ring.write_tail(1);
        assert_eq!(tail.total(), 1);
        assert_eq!(tail.first.start, 7);
        assert_eq!(ring.write_segments().first.tail(1).start, 7);
    }

    #[test]
    fn test_write_tail_wraps() {
        let ring = RingBuffer::new(4, 1, SpacePolicy::Exact).unwrap();
        ring.write_advance(4).unwrap();
        ring.read_advance(3).unwrap();
        // Region ends at logical 7; the three released chunks are 4, 5, 6
        let tail = ring.write_tail(3);
        assert_eq!(tail.slots().collect::<Vec<_>>(), vec![0, 1, 2]);

        ring.write_advance(3).unwrap();
        ring.read_advance(4).unwrap();
        let tail = ring.write_tail(4);
        assert_eq!(tail.slots().collect::<Vec<_>>(), vec![3, 0, 1, 2]);
    }

    #[test]
    fn test_write_segments_consistent_while_writer_runs() {
        let ring = Arc::new(RingBuffer::new(5, 1, SpacePolicy::Slack).unwrap());
        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let ring = Arc::clone(&ring);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    if ring.write_advance(1).is_err() {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mask = ring.slots() - 1;
        let mut read = 0usize;
        for _ in 0..20_000 {
            let segs = ring.write_segments();
            let end = (segs.first.start + segs.total()) & mask;
            assert_eq!(end, (read + ring.capacity()) & mask);
            if ring.read_advance(1).is_ok() {
                read += 1;
            }
        }
        done.store(true, Ordering::Release);
        writer.join().unwrap();
    }
}
