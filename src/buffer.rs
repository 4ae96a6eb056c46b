//! Fixed-capacity byte ring with sub-linear pattern search.
//!
//! [`RingBuffer`] is the storage backing every frame extractor. Appends past
//! capacity evict the oldest bytes (callers must treat the buffer as
//! non-durable staging, not a backlog guarantee), and
//! [`RingBuffer::find_pattern`] runs Knuth-Morris-Pratt across the wraparound
//! boundary so delimiter scans stay O(n + m) even when a frame straddles the
//! physical end of the allocation.

/// Fixed-capacity byte store with append/read/peek and KMP substring search.
///
/// Invariant: `0 <= len() <= capacity()`.
#[derive(Debug)]
pub struct RingBuffer {
    data: Vec<u8>,
    head: usize,
    size: usize,
}

impl RingBuffer {
    /// Create a buffer holding at most `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; configuration validation rejects that
    /// before an extractor is built.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self { data: vec![0; capacity], head: 0, size: 0 }
    }

    /// Number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the buffer holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether the buffer is at capacity.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.size == self.data.len()
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Remaining free space in bytes.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.data.len() - self.size
    }

    /// Fill level in `[0.0, 1.0]`.
    #[inline]
    pub fn utilization(&self) -> f64 {
        self.size as f64 / self.data.len() as f64
    }

    /// Drop all buffered bytes without reallocating.
    pub fn clear(&mut self) {
        self.head = 0;
        self.size = 0;
    }

    /// Replace the backing allocation. Clears any buffered bytes.
    pub fn set_capacity(&mut self, capacity: usize) {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        self.data = vec![0; capacity];
        self.clear();
    }

    /// Copy `bytes` in, evicting the oldest buffered bytes on overflow.
    ///
    /// A chunk larger than the whole buffer keeps only its trailing
    /// `capacity()` bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let capacity = self.data.len();
        let src = if bytes.len() > capacity { &bytes[bytes.len() - capacity..] } else { bytes };
        let incoming = src.len();

        // Advance head over bytes that will be overwritten
        if incoming > self.free_space() {
            let evicted = incoming - self.free_space();
            self.head = (self.head + evicted) % capacity;
            self.size -= evicted;
        }

        let tail = (self.head + self.size) % capacity;
        let first = incoming.min(capacity - tail);
        self.data[tail..tail + first].copy_from_slice(&src[..first]);
        if incoming > first {
            self.data[..incoming - first].copy_from_slice(&src[first..]);
        }

        self.size += incoming;
    }

    /// Copy out up to `count` bytes without removing them.
    pub fn peek(&self, count: usize) -> Vec<u8> {
        let count = count.min(self.size);
        let capacity = self.data.len();
        let mut out = Vec::with_capacity(count);

        let first = count.min(capacity - self.head);
        out.extend_from_slice(&self.data[self.head..self.head + first]);
        if count > first {
            out.extend_from_slice(&self.data[..count - first]);
        }

        out
    }

    /// Remove and return up to `count` bytes.
    pub fn read(&mut self, count: usize) -> Vec<u8> {
        let out = self.peek(count);
        self.discard(out.len());
        out
    }

    /// Remove up to `count` bytes without materializing them.
    pub fn discard(&mut self, count: usize) {
        let count = count.min(self.size);
        self.head = (self.head + count) % self.data.len();
        self.size -= count;
    }

    /// Byte at logical offset `index` from the front.
    #[inline]
    fn at(&self, index: usize) -> u8 {
        debug_assert!(index < self.size);
        self.data[(self.head + index) % self.data.len()]
    }

    /// First logical offset at which `pattern` occurs, or `None`.
    ///
    /// Scans across the ring's wraparound boundary.
    pub fn find_pattern(&self, pattern: &[u8]) -> Option<usize> {
        self.find_pattern_from(pattern, 0)
    }

    /// First occurrence of `pattern` at or after logical offset `start`.
    ///
    /// Knuth-Morris-Pratt with the failure table built per call: delimiter
    /// patterns are typically <= 8 bytes, while the buffer can hold megabytes,
    /// so avoiding quadratic rescans on the buffer side is what matters.
    pub fn find_pattern_from(&self, pattern: &[u8], start: usize) -> Option<usize> {
        if pattern.is_empty() || self.size < pattern.len() || start + pattern.len() > self.size {
            return None;
        }

        let lps = failure_table(pattern);
        let mut i = start;
        let mut j = 0;

        while i < self.size {
            if self.at(i) == pattern[j] {
                i += 1;
                j += 1;
                if j == pattern.len() {
                    return Some(i - j);
                }
            } else if j != 0 {
                j = lps[j - 1];
            } else {
                i += 1;
            }
        }

        None
    }
}

/// KMP longest-proper-prefix-suffix table.
fn failure_table(pattern: &[u8]) -> Vec<usize> {
    let mut lps = vec![0; pattern.len()];
    let mut len = 0;
    let mut i = 1;

    while i < pattern.len() {
        if pattern[i] == pattern[len] {
            len += 1;
            lps[i] = len;
            i += 1;
        } else if len != 0 {
            len = lps[len - 1];
        } else {
            lps[i] = 0;
            i += 1;
        }
    }

    lps
}
