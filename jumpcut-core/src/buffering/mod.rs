//! Lock-free SPSC ring buffer for the live sample feed.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice`
//! safe to call from the real-time output callback of the playback engine.
//! Samples are interleaved; the pipeline thread deinterleaves them into
//! [`block::SampleBlock`]s.

pub mod block;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the playback engine's audio callback.
pub type SampleProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the live analysis thread.
pub type SampleConsumer = ringbuf::HeapCons<f32>;

/// Default capacity: 2^18 = 262 144 f32 samples ≈ 2.7 s of stereo at 48 kHz.
pub const LIVE_RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    HeapRb::<f32>::new(capacity.max(1)).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_round_trips_in_order() {
        let (mut prod, mut cons) = create_sample_ring(8);
        assert_eq!(prod.push_slice(&[1.0, 2.0, 3.0]), 3);
        let mut out = [0.0f32; 3];
        assert_eq!(cons.pop_slice(&mut out), 3);
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn full_ring_rejects_excess_without_blocking() {
        let (mut prod, _cons) = create_sample_ring(4);
        assert_eq!(prod.push_slice(&[0.0; 6]), 4);
    }
}
