//! Element types a device buffer may hold

use bytemuck::Pod;
use half::{bf16, f16};

/// Element type with a lossy conversion from and to the reference
/// precision (`f32`).
pub trait DeviceElement: Pod + Send + Sync + 'static {
    const NAME: &'static str;

    fn from_f32(value: f32) -> Self;

    fn to_f32(self) -> f32;
}

impl DeviceElement for f32 {
    const NAME: &'static str = "f32";

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
}

impl DeviceElement for f16 {
    const NAME: &'static str = "f16";

    #[inline]
    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }
}

impl DeviceElement for bf16 {
    const NAME: &'static str = "bf16";

    #[inline]
    fn from_f32(value: f32) -> Self {
        bf16::from_f32(value)
    }

    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_is_identity() {
        for v in [0.0f32, -1.5, 1e-30, f32::MAX, f32::INFINITY] {
            assert_eq!(<f32 as DeviceElement>::from_f32(v).to_f32(), v);
        }
    }

    #[test]
    fn test_half_rounds_to_nearest() {
        // 1 + 2^-11 sits exactly between two f16 values and rounds to even
        let halfway = 1.0f32 + 2.0f32.powi(-11);
        assert_eq!(<f16 as DeviceElement>::from_f32(halfway).to_f32(), 1.0);

        let v = 0.1f32;
        let err = (<f16 as DeviceElement>::from_f32(v).to_f32() - v).abs();
        assert!(err <= 2.0f32.powi(-14));

        let err = (<bf16 as DeviceElement>::from_f32(v).to_f32() - v).abs();
        assert!(err <= 2.0f32.powi(-11));
    }

    #[test]
    fn test_names() {
        assert_eq!(<f32 as DeviceElement>::NAME, "f32");
        assert_eq!(<f16 as DeviceElement>::NAME, "f16");
        assert_eq!(<bf16 as DeviceElement>::NAME, "bf16");
    }
}
