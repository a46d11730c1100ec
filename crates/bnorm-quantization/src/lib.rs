//! Fixed-point arithmetic for bnorm
//!
//! This crate provides the signed fixed-point formats used by the
//! normalization kernels:
//! - QS8: `i8` storage, fixed-point position 1..=7
//! - QS16: `i16` storage, fixed-point position 1..=15
//!
//! A raw value `r` at position `p` represents `r * 2^-p`. Conversion back
//! from real values rounds half away from zero and saturates at the storage
//! type's bounds.

pub mod fixed_point;
pub mod utils;

pub use fixed_point::{FixedPoint, from_real, saturates, scale, to_real};
pub use utils::{dequantize_slice, dequantize_tensor, quantize_slice, quantized_tensor};
