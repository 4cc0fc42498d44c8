/// Fixed-capacity circular buffer of per-sample mean squares.
///
/// Capacity never changes after construction. Starts zero-filled, so a
/// freshly created estimator behaves as if preceded by digital silence.
#[derive(Debug, Clone)]
pub struct SquaresRing {
    buf: Vec<f32>,
    /// Index of the most recently pushed element.
    last: usize,
}

impl SquaresRing {
    /// # Panics
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SquaresRing capacity must be > 0");
        Self {
            buf: vec![0.0; capacity],
            last: capacity - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, value: f32) {
        self.last += 1;
        if self.last >= self.buf.len() {
            self.last = 0;
        }
        self.buf[self.last] = value;
    }

    /// The element pushed `depth` pushes before the latest one.
    ///
    /// `depth` must be `< capacity`; in release builds it is reduced modulo
    /// the capacity instead of panicking.
    pub fn get_reverse(&self, depth: usize) -> f32 {
        let len = self.buf.len();
        debug_assert!(depth < len, "depth {depth} out of range for capacity {len}");
        let depth = depth % len;
        self.buf[(self.last + len - depth) % len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_reads_wrap() {
        let mut ring = SquaresRing::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            ring.push(v);
        }
        assert_eq!(ring.get_reverse(0), 4.0);
        assert_eq!(ring.get_reverse(1), 3.0);
        assert_eq!(ring.get_reverse(2), 2.0);
    }

    #[test]
    fn starts_zeroed() {
        let ring = SquaresRing::new(4);
        assert_eq!(ring.get_reverse(3), 0.0);
    }
}
