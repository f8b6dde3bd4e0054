//! Two-segment views into ring storage

use std::sync::Arc;

use super::RingBuffer;

/// Contiguous run of physical slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    /// First physical slot
    pub start: usize,
    /// Number of chunks
    pub len: usize,
}

impl Segment {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Physical slots covered by this segment, in order
    pub fn slots(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }

    /// The last `n` slots of this segment
    pub fn tail(&self, n: usize) -> Segment {
        let n = n.min(self.len);
        Segment {
            start: self.start + self.len - n,
            len: n,
        }
    }
}

/// A region of the ring split at the physical end of storage
///
/// `second` is only non-empty when the region wraps; callers must always
/// handle both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segments {
    pub first: Segment,
    pub second: Segment,
}

impl Segments {
    /// Total chunks across both segments
    pub fn total(&self) -> usize {
        self.first.len + self.second.len
    }

    /// Physical slots in logical order
    pub fn slots(&self) -> impl Iterator<Item = usize> {
        self.first.slots().chain(self.second.slots())
    }

    /// The leading `n` chunks of this region
    pub fn take(&self, n: usize) -> Segments {
        let first = n.min(self.first.len);
        let second = (n - first).min(self.second.len);
        Segments {
            first: Segment {
                start: self.first.start,
                len: first,
            },
            second: Segment {
                start: self.second.start,
                len: second,
            },
        }
    }
}

/// Writable ring storage
pub struct WriteVector<'a> {
    pub first: &'a mut [u8],
    pub second: &'a mut [u8],
}

/// Readable ring storage
pub struct ReadVector<'a> {
    pub first: &'a [u8],
    pub second: &'a [u8],
}

/// One chunk of ring storage handed to a device queue
///
/// Keeps the ring alive for as long as the device holds on to the chunk.
/// A playback queue only reads the chunk; a capture queue fills it before
/// reporting completion. Engines hand out a slot only while it sits outside
/// the region their own side may touch, so the device has exclusive use of
/// it until the completion that releases it.
pub struct ChunkRef {
    ring: Arc<RingBuffer>,
    slot: usize,
}

impl ChunkRef {
    pub(crate) fn new(ring: Arc<RingBuffer>, slot: usize) -> Self {
        Self { ring, slot }
    }

    /// Physical slot index
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Chunk length in bytes
    pub fn len(&self) -> usize {
        self.ring.chunk_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chunk contents
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: see the type-level contract; the slot is not written by
        // the engine while the device holds this handle.
        unsafe { self.ring.segment_mut(self.segment()) }
    }

    /// Fill the chunk in place
    pub fn fill_with<F>(&mut self, fill: F)
    where
        F: FnOnce(&mut [u8]),
    {
        // SAFETY: see the type-level contract; the slot is not read by the
        // engine until the device completes it.
        let buf = unsafe { self.ring.segment_mut(self.segment()) };
        fill(buf);
    }

    fn segment(&self) -> Segment {
        Segment {
            start: self.slot,
            len: 1,
        }
    }
}

impl std::fmt::Debug for ChunkRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkRef")
            .field("slot", &self.slot)
            .field("len", &self.len())
            .finish()
    }
}
