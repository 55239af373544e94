//! Lock-Free Sample Ring
//!
//! Single-producer single-consumer ring between the CoreAudio IO proc
//! (producer, real-time thread) and the adapter's `read` (consumer,
//! capture worker). The producer path takes no locks and allocates
//! nothing.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct SampleRing {
    buffer: UnsafeCell<Vec<f32>>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    capacity: usize,
}

// Safety: exactly one producer (the IO proc) writes and exactly one
// consumer reads; positions are published with release/acquire.
unsafe impl Send for SampleRing {}
unsafe impl Sync for SampleRing {}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: UnsafeCell::new(vec![0.0; capacity]),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Samples currently readable.
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        if write >= read {
            write - read
        } else {
            self.capacity - read + write
        }
    }

    fn free_space(&self) -> usize {
        // One slot stays empty to distinguish full from empty
        self.capacity - self.available() - 1
    }

    /// Write samples from the producer side; excess is dropped.
    ///
    /// # Safety
    ///
    /// Must only be called from the single producer.
    pub unsafe fn write(&self, input: &[f32]) -> usize {
        let to_write = input.len().min(self.free_space());
        if to_write == 0 {
            return 0;
        }

        let write_pos = self.write_pos.load(Ordering::Acquire);
        let buffer = &mut *self.buffer.get();
        for (i, &sample) in input.iter().take(to_write).enumerate() {
            buffer[(write_pos + i) % self.capacity] = sample;
        }

        self.write_pos
            .store((write_pos + to_write) % self.capacity, Ordering::Release);
        to_write
    }

    /// Read up to `output.len()` samples from the consumer side.
    pub fn read(&self, output: &mut [f32]) -> usize {
        let to_read = output.len().min(self.available());
        if to_read == 0 {
            return 0;
        }

        let read_pos = self.read_pos.load(Ordering::Acquire);
        // Safety: sole consumer; the producer never touches [read, write)
        let buffer = unsafe { &*self.buffer.get() };
        for (i, out) in output.iter_mut().take(to_read).enumerate() {
            *out = buffer[(read_pos + i) % self.capacity];
        }

        self.read_pos
            .store((read_pos + to_read) % self.capacity, Ordering::Release);
        to_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring_reads_nothing() {
        let ring = SampleRing::new(64);
        let mut out = [0.0f32; 16];
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.read(&mut out), 0);
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let ring = SampleRing::new(8);
        unsafe {
            assert_eq!(ring.write(&[1.0, 2.0, 3.0]), 3);
        }
        let mut out = [0.0f32; 3];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_overfill_drops_excess() {
        let ring = SampleRing::new(4);
        let written = unsafe { ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0]) };
        // capacity-1 usable slots
        assert_eq!(written, 3);
        let mut out = [0.0f32; 8];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(&out[..3], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_wrap_around() {
        let ring = SampleRing::new(4);
        let mut out = [0.0f32; 2];
        for round in 0..10 {
            let v = round as f32;
            unsafe {
                assert_eq!(ring.write(&[v, v + 0.5]), 2);
            }
            assert_eq!(ring.read(&mut out), 2);
            assert_eq!(out, [v, v + 0.5]);
        }
    }
}
