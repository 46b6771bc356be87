//! Small integer helpers shared by kernels and launch-shape code.

/// Ceiling division for launch-grid sizing.
///
/// # Panics
///
/// Panics if `divisor` is zero.
#[inline]
pub const fn ceil_div(dividend: usize, divisor: usize) -> usize {
    dividend.div_ceil(divisor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_div_rounds_up() {
        assert_eq!(ceil_div(0, 16), 0);
        assert_eq!(ceil_div(1, 16), 1);
        assert_eq!(ceil_div(16, 16), 1);
        assert_eq!(ceil_div(17, 16), 2);
        assert_eq!(ceil_div(768 * 8, 256), 24);
    }
}
