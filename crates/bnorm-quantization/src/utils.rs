//! Slice and tensor helpers built on the scalar conversions

use crate::fixed_point::{FixedPoint, from_real, saturates, to_real};
use bnorm_common::{DataType, Result, Tensor, TensorInfo, ValidationError};
use rayon::prelude::*;

/// Quantize real values to raw fixed-point values at `position`.
pub fn quantize_slice<T: FixedPoint>(values: &[f32], position: u8) -> Vec<T> {
    let saturated =
        values.par_iter().filter(|&&v| saturates::<T>(f64::from(v), position)).count();
    if saturated > 0 {
        let dtype = T::DATA_TYPE;
        tracing::trace!(
            saturated,
            total = values.len(),
            %dtype,
            position,
            "fixed-point quantization saturated"
        );
    }
    values.par_iter().map(|&v| from_real::<T>(f64::from(v), position)).collect()
}

/// Real values of raw fixed-point values at `position`.
pub fn dequantize_slice<T: FixedPoint>(raw: &[T], position: u8) -> Vec<f32> {
    raw.par_iter().map(|&r| to_real(r, position) as f32).collect()
}

/// Dense QS8 or QS16 tensor holding `values` quantized at `position`.
pub fn quantized_tensor(
    shape: &[usize],
    data_type: DataType,
    position: u8,
    values: &[f32],
) -> Result<Tensor> {
    let info = TensorInfo::dense_fixed_point(shape, data_type, position)?;
    match data_type {
        DataType::QS8 => Tensor::from_vec(info, quantize_slice::<i8>(values, position)),
        DataType::QS16 => Tensor::from_vec(info, quantize_slice::<i16>(values, position)),
        dtype => Err(ValidationError::UnsupportedDatatype { dtype }.into()),
    }
}

/// Logical elements of a QS8 or QS16 tensor as real values, in dense order.
pub fn dequantize_tensor(tensor: &Tensor) -> Result<Vec<f32>> {
    let position = tensor.info().fixed_point_position();
    let values = match tensor.data_type() {
        DataType::QS8 => tensor.gather::<i8>().map(|raw| dequantize_slice(&raw, position)),
        DataType::QS16 => tensor.gather::<i16>().map(|raw| dequantize_slice(&raw, position)),
        _ => None,
    };
    values.ok_or_else(|| ValidationError::UnsupportedDatatype { dtype: tensor.data_type() }.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_slice_basic() {
        let raw = quantize_slice::<i8>(&[0.5, -0.25, 1.0], 2);
        assert_eq!(raw, vec![2, -1, 4]);
        assert_eq!(dequantize_slice(&raw, 2), vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn quantize_slice_saturates() {
        let raw = quantize_slice::<i8>(&[10.0, -10.0], 4);
        assert_eq!(raw, vec![i8::MAX, i8::MIN]);
    }

    #[test]
    fn quantized_tensor_carries_position() {
        let t = quantized_tensor(&[2, 2], DataType::QS16, 8, &[1.0, 2.0, -1.5, 0.0]).unwrap();
        assert_eq!(t.info().fixed_point_position(), 8);
        assert_eq!(t.to_vec::<i16>().unwrap(), vec![256, 512, -384, 0]);
        assert_eq!(dequantize_tensor(&t).unwrap(), vec![1.0, 2.0, -1.5, 0.0]);
    }

    #[test]
    fn non_fixed_point_types_rejected() {
        assert!(quantized_tensor(&[2], DataType::F32, 0, &[1.0, 2.0]).is_err());
        let t = Tensor::from_f32(&[2], vec![1.0, 2.0]).unwrap();
        let err = dequantize_tensor(&t).unwrap_err();
        assert_eq!(
            err.validation_kind(),
            Some(bnorm_common::ValidationErrorKind::UnsupportedDatatype)
        );
    }
}
