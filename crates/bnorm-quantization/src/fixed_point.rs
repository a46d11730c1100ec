//! Scalar fixed-point conversion

use bnorm_common::{DataType, Element};

/// Signed integer storage used by a fixed-point data type.
pub trait FixedPoint: Element + PartialOrd {
    const DATA_TYPE: DataType;
    const MIN: Self;
    const MAX: Self;

    fn to_f64(self) -> f64;

    /// Convert an already-rounded value that lies within `MIN..=MAX`.
    fn from_f64_unchecked(value: f64) -> Self;
}

impl FixedPoint for i8 {
    const DATA_TYPE: DataType = DataType::QS8;
    const MIN: Self = i8::MIN;
    const MAX: Self = i8::MAX;

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64_unchecked(value: f64) -> Self {
        value as i8
    }
}

impl FixedPoint for i16 {
    const DATA_TYPE: DataType = DataType::QS16;
    const MIN: Self = i16::MIN;
    const MAX: Self = i16::MAX;

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64_unchecked(value: f64) -> Self {
        value as i16
    }
}

/// Real value of one least significant bit at `position`, i.e. `2^-position`.
pub fn scale(position: u8) -> f64 {
    2f64.powi(-i32::from(position))
}

/// Exact real value of `raw` at `position`.
#[inline]
pub fn to_real<T: FixedPoint>(raw: T, position: u8) -> f64 {
    raw.to_f64() * scale(position)
}

/// Nearest representable raw value for `value` at `position`.
///
/// Ties round away from zero; out-of-range values (including infinities)
/// saturate to `T::MIN`/`T::MAX`; NaN maps to zero.
#[inline]
pub fn from_real<T: FixedPoint>(value: f64, position: u8) -> T {
    if value.is_nan() {
        return T::ZERO;
    }
    let scaled = (value * 2f64.powi(i32::from(position))).round();
    let (lo, hi) = (T::MIN.to_f64(), T::MAX.to_f64());
    T::from_f64_unchecked(scaled.clamp(lo, hi))
}

/// Whether `value` falls outside what `T` can represent at `position`.
pub fn saturates<T: FixedPoint>(value: f64, position: u8) -> bool {
    let scaled = (value * 2f64.powi(i32::from(position))).round();
    scaled < T::MIN.to_f64() || scaled > T::MAX.to_f64()
}
