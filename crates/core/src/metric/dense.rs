//! Dense metrics: present on every node, updated on every enter/exit pair.

/// Statistics of the differences between exit and enter samples.
///
/// All arithmetic wraps at 64 bits; overflow is not detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenseMetric {
    pub sum: u64,
    pub min: u64,
    pub max: u64,
    pub squares: u64,
    /// Sample taken on the most recent enter.
    pub start_value: u64,
}

impl Default for DenseMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl DenseMetric {
    pub const fn new() -> Self {
        Self {
            sum: 0,
            min: u64::MAX,
            max: 0,
            squares: 0,
            start_value: 0,
        }
    }

    #[inline]
    pub fn start(&mut self, value: u64) {
        self.start_value = value;
    }

    /// Account one enter/exit interval ending at `end_value`.
    #[inline]
    pub fn update(&mut self, end_value: u64) {
        let diff = end_value.wrapping_sub(self.start_value);
        self.sum = self.sum.wrapping_add(diff);
        self.squares = self.squares.wrapping_add(diff.wrapping_mul(diff));
        self.min = self.min.min(diff);
        self.max = self.max.max(diff);
    }

    pub fn copy_from(&mut self, source: &DenseMetric) {
        *self = *source;
    }

    /// `self += source`; associative and commutative.
    pub fn merge(&mut self, source: &DenseMetric) {
        self.sum = self.sum.wrapping_add(source.sum);
        self.squares = self.squares.wrapping_add(source.squares);
        self.min = self.min.min(source.min);
        self.max = self.max.max(source.max);
    }

    /// True when no interval was ever accounted.
    pub fn is_untouched(&self) -> bool {
        self.sum == 0 && self.max == 0 && self.min == u64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_tracks_interval_statistics() {
        let mut m = DenseMetric::new();
        m.start(10);
        m.update(15);
        m.start(20);
        m.update(23);
        assert_eq!(m.sum, 8);
        assert_eq!(m.min, 3);
        assert_eq!(m.max, 5);
        assert_eq!(m.squares, 25 + 9);
    }

    #[test]
    fn merge_is_order_independent() {
        let mut a = DenseMetric::new();
        a.start(0);
        a.update(7);
        let mut b = DenseMetric::new();
        b.start(0);
        b.update(2);
        let c = DenseMetric::new();

        let mut left = a;
        left.merge(&b);
        left.merge(&c);
        let mut right = c;
        right.merge(&b);
        right.merge(&a);
        assert_eq!(left, DenseMetric { start_value: 0, ..right });
        assert_eq!(left.sum, 9);
        assert_eq!(left.min, 2);
    }

    #[test]
    fn counters_wrap_instead_of_overflowing() {
        let mut m = DenseMetric::new();
        m.sum = u64::MAX;
        m.start(0);
        m.update(2);
        assert_eq!(m.sum, 1);
    }
}
