//! Batch normalization kernels.
//!
//! Each supported data type has its own kernel variant, picked once when an
//! operation is configured. Variants hold typed storage handles, so an
//! execution never inspects element types.
//!
//! Per element, with `c` the element's feature map:
//!
//! ```text
//! out = gamma[c] * (in - mean[c]) / sqrt(var[c] + epsilon) + beta[c]
//! ```
//!
//! - `F32`: native `f32` arithmetic.
//! - `F16`: `half::f16` arithmetic, rounding after every operation. The
//!   denominator `sqrt(var + epsilon)` is taken in `f32` and rounded back.
//! - `QS8`/`QS16`: operands are dequantized exactly to `f64`, the formula is
//!   evaluated there with epsilon at full precision, and the result is
//!   re-quantized rounding half away from zero and saturating at the storage
//!   bounds.

use crate::dispatch::Dispatcher;
use crate::geometry::{DispatchGeometry, ExecutionPlan};
use crate::params::NormalizationParams;
use crate::validation::ValidatedFormat;
use bnorm_common::{
    DataType, Element, Result, SharedBuffer, Tensor, TensorError, ValidationError,
};
use bnorm_quantization::{from_real, to_real};
use half::f16;

// ---------------------------------------------------------------------------
// Per-element arithmetic
// ---------------------------------------------------------------------------

/// Per-feature-map coefficients in the arithmetic type of one variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCoefficients<A> {
    pub mean: A,
    /// `sqrt(var + epsilon)`
    pub denominator: A,
    pub gamma: A,
    pub beta: A,
}

/// Element types the normalization kernel can compute on.
pub trait Normalize: Element {
    /// Type the formula is evaluated in.
    type Arith: Copy + Send + Sync;

    fn coefficients(
        mean: Self,
        var: Self,
        gamma: Self,
        beta: Self,
        epsilon: f32,
        position: u8,
    ) -> ChannelCoefficients<Self::Arith>;

    fn normalize(x: Self, c: &ChannelCoefficients<Self::Arith>, position: u8) -> Self;
}

impl Normalize for f32 {
    type Arith = f32;

    fn coefficients(
        mean: f32,
        var: f32,
        gamma: f32,
        beta: f32,
        epsilon: f32,
        _: u8,
    ) -> ChannelCoefficients<f32> {
        ChannelCoefficients { mean, denominator: (var + epsilon).sqrt(), gamma, beta }
    }

    #[inline]
    fn normalize(x: f32, c: &ChannelCoefficients<f32>, _: u8) -> f32 {
        c.gamma * (x - c.mean) / c.denominator + c.beta
    }
}

impl Normalize for f16 {
    type Arith = f16;

    fn coefficients(
        mean: f16,
        var: f16,
        gamma: f16,
        beta: f16,
        epsilon: f32,
        _: u8,
    ) -> ChannelCoefficients<f16> {
        // Epsilon stays in f32: rounding it to f16 flushes small values to zero.
        let denominator = f16::from_f32((var.to_f32() + epsilon).sqrt());
        ChannelCoefficients { mean, denominator, gamma, beta }
    }

    #[inline]
    fn normalize(x: f16, c: &ChannelCoefficients<f16>, _: u8) -> f16 {
        c.gamma * (x - c.mean) / c.denominator + c.beta
    }
}

macro_rules! impl_fixed_point_normalize {
    ($ty:ty) => {
        impl Normalize for $ty {
            type Arith = f64;

            fn coefficients(
                mean: $ty,
                var: $ty,
                gamma: $ty,
                beta: $ty,
                epsilon: f32,
                position: u8,
            ) -> ChannelCoefficients<f64> {
                let var = to_real(var, position);
                ChannelCoefficients {
                    mean: to_real(mean, position),
                    denominator: (var + f64::from(epsilon)).sqrt(),
                    gamma: to_real(gamma, position),
                    beta: to_real(beta, position),
                }
            }

            #[inline]
            fn normalize(x: $ty, c: &ChannelCoefficients<f64>, position: u8) -> $ty {
                let x = to_real(x, position);
                from_real::<$ty>(c.gamma * (x - c.mean) / c.denominator + c.beta, position)
            }
        }
    };
}

impl_fixed_point_normalize!(i8);
impl_fixed_point_normalize!(i16);

// ---------------------------------------------------------------------------
// Typed kernel
// ---------------------------------------------------------------------------

/// A 1-D statistic vector: typed storage plus its strided view.
#[derive(Debug, Clone)]
struct StatVector<T> {
    buffer: SharedBuffer<T>,
    offset: usize,
    stride: usize,
}

impl<T: Element> StatVector<T> {
    fn from_tensor(name: &'static str, tensor: &Tensor) -> Result<Self> {
        Ok(Self {
            buffer: typed_buffer(name, tensor)?,
            offset: tensor.info().offset(),
            stride: tensor.info().stride(0),
        })
    }

    /// Copy of the `len` logical elements.
    fn read(&self, len: usize) -> Vec<T> {
        let data = self.buffer.read();
        (0..len).map(|c| data[self.offset + c * self.stride]).collect()
    }
}

fn typed_buffer<T: Element>(name: &'static str, tensor: &Tensor) -> Result<SharedBuffer<T>> {
    tensor.buffer::<T>().cloned().ok_or_else(|| {
        tracing::error!(tensor = name, "storage kind does not match validated data type");
        TensorError::StorageMismatch {
            dtype: tensor.data_type(),
            expected: T::KIND.name(),
            actual: tensor.storage().kind().name(),
        }
        .into()
    })
}

/// Raw output pointer shared across workers.
#[derive(Clone, Copy)]
struct SharedPtr<T>(*mut T);

// SAFETY: workers only write through the pointer at offsets of their own
// units, which are pairwise disjoint (tensor views never overlap) and in
// bounds of the locked buffer.
unsafe impl<T: Send> Send for SharedPtr<T> {}
unsafe impl<T: Send> Sync for SharedPtr<T> {}

impl<T> SharedPtr<T> {
    fn get(&self) -> *mut T {
        self.0
    }
}

/// Buffers of one configured operation for element type `T`.
#[derive(Debug, Clone)]
pub struct TypedKernel<T> {
    input: SharedBuffer<T>,
    /// `None` writes back into `input`.
    output: Option<SharedBuffer<T>>,
    mean: StatVector<T>,
    variance: StatVector<T>,
    gamma: StatVector<T>,
    beta: StatVector<T>,
}

impl<T: Normalize> TypedKernel<T> {
    fn new(params: &NormalizationParams) -> Result<Self> {
        Ok(Self {
            input: typed_buffer("input", &params.input)?,
            output: params.mode.output().map(|t| typed_buffer("output", t)).transpose()?,
            mean: StatVector::from_tensor("mean", &params.mean)?,
            variance: StatVector::from_tensor("variance", &params.variance)?,
            gamma: StatVector::from_tensor("gamma", &params.gamma)?,
            beta: StatVector::from_tensor("beta", &params.beta)?,
        })
    }

    /// Current per-feature-map coefficients. Each statistic lock is
    /// released before this returns.
    fn coefficients(
        &self,
        channels: usize,
        epsilon: f32,
        position: u8,
    ) -> Vec<ChannelCoefficients<T::Arith>> {
        let mean = self.mean.read(channels);
        let var = self.variance.read(channels);
        let gamma = self.gamma.read(channels);
        let beta = self.beta.read(channels);
        (0..channels)
            .map(|c| T::coefficients(mean[c], var[c], gamma[c], beta[c], epsilon, position))
            .collect()
    }

    fn run(
        &self,
        plan: &ExecutionPlan,
        geometry: &DispatchGeometry,
        dispatcher: &dyn Dispatcher,
        epsilon: f32,
        position: u8,
    ) {
        let coeffs = self.coefficients(plan.feature_maps(), epsilon, position);
        let width = plan.width();

        match &self.output {
            None => {
                let mut data = self.input.write();
                let len = data.len();
                let dst = SharedPtr(data.as_mut_ptr());
                let stride = plan.input_stride();
                dispatcher.dispatch(geometry, &|range| {
                    for unit in range.map(|i| plan.unit(i)) {
                        let c = &coeffs[unit.channel];
                        for x in 0..width {
                            let off = unit.input_offset + x * stride;
                            debug_assert!(off < len);
                            // SAFETY: `off` is in bounds of the locked buffer and
                            // belongs to this unit only. Each element is read
                            // before it is overwritten.
                            unsafe {
                                let p = dst.get().add(off);
                                p.write(T::normalize(p.read(), c, position));
                            }
                        }
                    }
                });
            }
            Some(output) => {
                // Lock in storage-address order so operations sharing
                // buffers in opposite roles cannot deadlock.
                let (src, mut out) = if self.input.addr() < output.addr() {
                    let src = self.input.read();
                    (src, output.write())
                } else {
                    let out = output.write();
                    (self.input.read(), out)
                };
                let len = out.len();
                let dst = SharedPtr(out.as_mut_ptr());
                let src: &[T] = &src;
                let (in_stride, out_stride) = (plan.input_stride(), plan.output_stride());
                dispatcher.dispatch(geometry, &|range| {
                    for unit in range.map(|i| plan.unit(i)) {
                        let c = &coeffs[unit.channel];
                        for x in 0..width {
                            let x_in = src[unit.input_offset + x * in_stride];
                            let value = T::normalize(x_in, c, position);
                            let off = unit.output_offset + x * out_stride;
                            debug_assert!(off < len);
                            // SAFETY: `off` is in bounds of the locked output
                            // buffer and belongs to this unit only.
                            unsafe { dst.get().add(off).write(value) };
                        }
                    }
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel variants
// ---------------------------------------------------------------------------

/// Normalization kernel for one configured operation.
#[derive(Debug, Clone)]
pub enum NormalizationKernel {
    F32(TypedKernel<f32>),
    F16(TypedKernel<f16>),
    Qs8 { position: u8, kernel: TypedKernel<i8> },
    Qs16 { position: u8, kernel: TypedKernel<i16> },
}

impl NormalizationKernel {
    /// Bind the buffers of validated `params` to the variant for `format`.
    pub fn new(params: &NormalizationParams, format: ValidatedFormat) -> Result<Self> {
        let position = format.fixed_point_position;
        Ok(match format.data_type {
            DataType::F32 => Self::F32(TypedKernel::new(params)?),
            DataType::F16 => Self::F16(TypedKernel::new(params)?),
            DataType::QS8 => Self::Qs8 { position, kernel: TypedKernel::new(params)? },
            DataType::QS16 => Self::Qs16 { position, kernel: TypedKernel::new(params)? },
            dtype => return Err(ValidationError::UnsupportedDatatype { dtype }.into()),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::F32(_) => "f32",
            Self::F16(_) => "f16",
            Self::Qs8 { .. } => "qs8",
            Self::Qs16 { .. } => "qs16",
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::F32(_) => DataType::F32,
            Self::F16(_) => DataType::F16,
            Self::Qs8 { .. } => DataType::QS8,
            Self::Qs16 { .. } => DataType::QS16,
        }
    }

    /// Normalize every unit of `plan`, returning once all have been written.
    pub fn run(
        &self,
        plan: &ExecutionPlan,
        geometry: &DispatchGeometry,
        dispatcher: &dyn Dispatcher,
        epsilon: f32,
    ) {
        match self {
            Self::F32(k) => k.run(plan, geometry, dispatcher, epsilon, 0),
            Self::F16(k) => k.run(plan, geometry, dispatcher, epsilon, 0),
            Self::Qs8 { position, kernel } => {
                kernel.run(plan, geometry, dispatcher, epsilon, *position)
            }
            Self::Qs16 { position, kernel } => {
                kernel.run(plan, geometry, dispatcher, epsilon, *position)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_formula() {
        let c = f32::coefficients(1.0, 3.0, 2.0, 0.5, 1.0, 0);
        assert_eq!(c.denominator, 2.0);
        assert_eq!(f32::normalize(5.0, &c, 0), 2.0 * 4.0 / 2.0 + 0.5);
    }

    #[test]
    fn f16_rounds_per_operation() {
        let h = f16::from_f32;
        let c = f16::coefficients(h(0.0), h(1.0), h(1.0), h(0.0), 0.0, 0);
        assert_eq!(c.denominator, h(1.0));
        // 2049 is not representable in f16; the input already rounded to 2048.
        assert_eq!(f16::normalize(h(2049.0), &c, 0), h(2048.0));
        let c = f16::coefficients(h(0.0), h(2.0), h(1.0), h(0.0), 0.0, 0);
        assert_eq!(c.denominator, h(std::f32::consts::SQRT_2));
    }

    #[test]
    fn f16_keeps_tiny_epsilon() {
        let h = f16::from_f32;
        // 1e-8 is below the smallest f16 subnormal.
        let c = f16::coefficients(h(0.0), h(0.0), h(1.0), h(0.0), 1e-8, 0);
        assert!(c.denominator > h(0.0));
        assert_eq!(c.denominator, h(1e-8f32.sqrt()));
    }

    #[test]
    fn qs8_identity() {
        // Position 4: raw 16 == 1.0.
        let c = i8::coefficients(0, 16, 16, 0, 0.0, 4);
        for raw in [-128i8, -17, 0, 1, 100, 127] {
            assert_eq!(i8::normalize(raw, &c, 4), raw);
        }
    }

    #[test]
    fn qs8_saturates() {
        // gamma just under 4.0 at position 5 overflows for inputs past 1.0.
        let c = i8::coefficients(0, 32, 127, 0, 0.0, 5);
        assert_eq!(i8::normalize(100, &c, 5), i8::MAX);
        assert_eq!(i8::normalize(-100, &c, 5), i8::MIN);
    }

    #[test]
    fn qs16_uses_full_precision_epsilon() {
        // Variance raw 0 with epsilon 0.25 gives denominator 0.5.
        let c = i16::coefficients(0, 0, 256, 0, 0.25, 8);
        assert_eq!(c.denominator, 0.5);
        assert_eq!(i16::normalize(256, &c, 8), 512);
    }

    #[test]
    fn fixed_point_nan_is_zero() {
        // Zero variance and epsilon with x == mean: 0/0.
        let c = i16::coefficients(10, 0, 256, 0, 0.0, 8);
        assert_eq!(i16::normalize(10, &c, 8), 0);
    }
}
