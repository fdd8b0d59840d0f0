//! Lock-free SPSC byte ring buffer for streaming playback audio.
//!
//! [`AudioRing`] decouples the network receive path (producer) from the
//! real-time playback callback (consumer).  Both sides are wait-free: a full
//! buffer drops the overflowing suffix instead of blocking the writer, and an
//! empty buffer returns zero bytes so the audio callback can zero-fill
//! instead of stalling.
//!
//! The write cursor `w` and read cursor `r` are *cumulative* byte counters
//! (they never wrap within the lifetime of a session); the physical store is
//! addressed by `cursor % capacity`.  Available data is always `w - r`, which
//! stays in `0..=capacity` because the writer never advances past
//! `r + capacity` and the reader never advances past `w`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Fixed-capacity single-producer single-consumer circular byte store.
///
/// # Concurrency contract
///
/// Exactly one thread may call [`write`](Self::write), and exactly one thread
/// may call [`read`](Self::read) / [`clear`](Self::clear).  Any thread may
/// call [`len`](Self::len), [`close`](Self::close) and the other advisory
/// accessors.
pub struct AudioRing {
    /// Physical byte store; addressed modulo `capacity`.
    buf: UnsafeCell<Box<[u8]>>,
    capacity: u64,
    /// Cumulative bytes written.  Only the producer stores to this.
    w: AtomicU64,
    /// Cumulative bytes read.  Only the consumer stores to this.
    r: AtomicU64,
    closed: AtomicBool,
}

// SAFETY: AudioRing is an SPSC structure.  The producer writes buffer slots
// in `[w, w + n)` and only then publishes the new `w` with Release ordering;
// the consumer reads `w` with Acquire ordering before touching any slot below
// it, so every slot it reads was fully written (happens-before via the `w`
// store/load pair).  Symmetrically the producer never reuses a slot until it
// has observed the advanced `r` with Acquire ordering.  The two cursor ranges
// never overlap because `w - r <= capacity` is maintained on both sides.
unsafe impl Send for AudioRing {}
unsafe impl Sync for AudioRing {}

impl AudioRing {
    /// Create a ring buffer with the given capacity in bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "AudioRing capacity must be > 0");
        Self {
            buf: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            capacity: capacity as u64,
            w: AtomicU64::new(0),
            r: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Append as many leading bytes of `data` as fit in the remaining
    /// capacity and return how many were accepted.
    ///
    /// Returns `0` once the ring has been [`close`](Self::close)d, or when
    /// the ring is full.  Never blocks; the dropped suffix is the caller's
    /// problem (a persistently full ring means the consumer has stalled).
    ///
    /// Producer-side only.
    pub fn write(&self, data: &[u8]) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }

        let r = self.r.load(Ordering::Acquire);
        let w = self.w.load(Ordering::Relaxed); // producer owns w

        let avail = self.capacity - (w - r);
        let n = (data.len() as u64).min(avail) as usize;
        if n == 0 {
            return 0;
        }

        let pos = (w % self.capacity) as usize;
        // A write that crosses the physical end is split into a tail segment
        // and a head segment.
        let first = n.min(self.capacity as usize - pos);
        unsafe {
            let base = (*self.buf.get()).as_mut_ptr();
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(pos), first);
            if first < n {
                std::ptr::copy_nonoverlapping(data.as_ptr().add(first), base, n - first);
            }
        }

        // Publish: the consumer must observe the slot contents before the
        // advanced cursor.
        self.w.store(w + n as u64, Ordering::Release);
        n
    }

    /// Fill `out` with up to `out.len()` available bytes.
    ///
    /// Returns `(bytes_read, drained)` where `drained` is `true` only once
    /// the ring is closed *and* no unread data remains.  An open, empty ring
    /// returns `(0, false)`.
    ///
    /// Consumer-side only.
    pub fn read(&self, out: &mut [u8]) -> (usize, bool) {
        let w = self.w.load(Ordering::Acquire);
        let r = self.r.load(Ordering::Relaxed); // consumer owns r

        let avail = w - r;
        let n = (out.len() as u64).min(avail) as usize;
        if n == 0 {
            return (0, self.closed.load(Ordering::Acquire));
        }

        let pos = (r % self.capacity) as usize;
        let first = n.min(self.capacity as usize - pos);
        unsafe {
            let base = (*self.buf.get()).as_ptr();
            std::ptr::copy_nonoverlapping(base.add(pos), out.as_mut_ptr(), first);
            if first < n {
                std::ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), n - first);
            }
        }

        self.r.store(r + n as u64, Ordering::Release);

        let drained = self.closed.load(Ordering::Acquire)
            && r + n as u64 == self.w.load(Ordering::Acquire);
        (n, drained)
    }

    /// Number of unread bytes.  Advisory: may be stale by the time the caller
    /// acts on it.
    pub fn len(&self) -> usize {
        let w = self.w.load(Ordering::Acquire);
        let r = self.r.load(Ordering::Acquire);
        (w - r) as usize
    }

    /// Returns `true` when there is no unread data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of bytes the ring can hold.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Discard all unread bytes by advancing the read cursor to the current
    /// write cursor.  Consumer-side; used on interruption so stale response
    /// audio is never played after a new utterance starts.
    pub fn clear(&self) {
        let w = self.w.load(Ordering::Acquire);
        self.r.store(w, Ordering::Release);
    }

    /// Mark the ring closed.  Idempotent.  Subsequent writes return 0; reads
    /// keep draining until empty and then report `drained = true`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // ---- Basic write / read ------------------------------------------------

    #[test]
    fn write_then_read_round_trip() {
        let ring = AudioRing::new(64);
        assert_eq!(ring.write(&[1, 2, 3, 4]), 4);
        assert_eq!(ring.len(), 4);

        let mut out = [0u8; 8];
        let (n, drained) = ring.read(&mut out);
        assert_eq!(n, 4);
        assert!(!drained);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        assert!(ring.is_empty());
    }

    #[test]
    fn read_empty_open_ring_returns_zero_not_drained() {
        let ring = AudioRing::new(16);
        let mut out = [0u8; 4];
        assert_eq!(ring.read(&mut out), (0, false));
    }

    #[test]
    fn write_more_than_capacity_accepts_prefix_only() {
        let ring = AudioRing::new(8);
        let data: Vec<u8> = (0..12).collect();
        assert_eq!(ring.write(&data), 8);
        assert_eq!(ring.len(), 8);

        // Ring is full; further writes accept nothing.
        assert_eq!(ring.write(&[99]), 0);

        let mut out = [0u8; 8];
        let (n, _) = ring.read(&mut out);
        assert_eq!(n, 8);
        assert_eq!(&out[..], &data[..8]);
    }

    // ---- Capacity invariant ------------------------------------------------

    #[test]
    fn length_never_exceeds_capacity_under_interleaving() {
        let ring = AudioRing::new(32);
        let mut out = [0u8; 7];
        for i in 0..200 {
            ring.write(&[i as u8; 13]);
            assert!(ring.len() <= ring.capacity());
            ring.read(&mut out);
            assert!(ring.len() <= ring.capacity());
        }
    }

    // ---- Wraparound (split-copy path) --------------------------------------

    #[test]
    fn wraparound_write_straddling_physical_end() {
        // capacity 16: write 10, read 6, write 10 — the second write starts
        // at physical offset 10 and wraps past the end of the store.
        let ring = AudioRing::new(16);
        let first: Vec<u8> = (0..10).collect();
        assert_eq!(ring.write(&first), 10);

        let mut out = [0u8; 6];
        assert_eq!(ring.read(&mut out).0, 6);
        assert_eq!(&out[..], &first[..6]);

        let second: Vec<u8> = (100..110).collect();
        assert_eq!(ring.write(&second), 10);
        assert_eq!(ring.len(), 14);

        // Remaining 4 bytes of the first write, then the wrapped second
        // write, must read back contiguously.
        let mut rest = [0u8; 14];
        assert_eq!(ring.read(&mut rest).0, 14);
        assert_eq!(&rest[..4], &first[6..]);
        assert_eq!(&rest[4..], &second[..]);
    }

    #[test]
    fn wraparound_read_straddling_physical_end() {
        let ring = AudioRing::new(8);
        ring.write(&[1, 2, 3, 4, 5, 6]);
        let mut out = [0u8; 6];
        ring.read(&mut out);

        // Next write occupies offsets 6,7,0,1.
        ring.write(&[7, 8, 9, 10]);
        let (n, _) = ring.read(&mut out);
        assert_eq!(n, 4);
        assert_eq!(&out[..4], &[7, 8, 9, 10]);
    }

    // ---- Clear -------------------------------------------------------------

    #[test]
    fn clear_discards_unread_data() {
        let ring = AudioRing::new(32);
        ring.write(&[1; 20]);
        ring.clear();

        assert_eq!(ring.len(), 0);
        let mut out = [0u8; 8];
        assert_eq!(ring.read(&mut out), (0, false));

        // Usable again after clear.
        ring.write(&[9, 9]);
        assert_eq!(ring.read(&mut out).0, 2);
        assert_eq!(&out[..2], &[9, 9]);
    }

    // ---- Close -------------------------------------------------------------

    #[test]
    fn close_rejects_writes_but_drains_reads() {
        let ring = AudioRing::new(16);
        ring.write(&[1, 2, 3]);
        ring.close();
        ring.close(); // idempotent

        assert_eq!(ring.write(&[4]), 0);

        let mut out = [0u8; 2];
        let (n, drained) = ring.read(&mut out);
        assert_eq!(n, 2);
        assert!(!drained, "still one byte left");

        let (n, drained) = ring.read(&mut out);
        assert_eq!(n, 1);
        assert!(drained, "closed and fully drained");

        let (n, drained) = ring.read(&mut out);
        assert_eq!(n, 0);
        assert!(drained);
    }

    // ---- Cross-thread SPSC -------------------------------------------------

    #[test]
    fn spsc_transfer_preserves_byte_sequence() {
        let ring = Arc::new(AudioRing::new(64));
        let total = 10_000usize;

        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                let mut sent = 0usize;
                while sent < total {
                    let chunk: Vec<u8> =
                        (sent..(sent + 17).min(total)).map(|i| (i % 251) as u8).collect();
                    let n = ring.write(&chunk);
                    sent += n;
                    if n == 0 {
                        std::thread::yield_now();
                    }
                }
                ring.close();
            })
        };

        let mut received = Vec::with_capacity(total);
        let mut out = [0u8; 23];
        loop {
            let (n, drained) = ring.read(&mut out);
            received.extend_from_slice(&out[..n]);
            if drained {
                break;
            }
            if n == 0 {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();

        assert_eq!(received.len(), total);
        for (i, &b) in received.iter().enumerate() {
            assert_eq!(b, (i % 251) as u8, "byte {i} corrupted");
        }
    }
}
