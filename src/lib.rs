//! Batch normalization over strided, multi-datatype tensors.
//!
//! ```no_run
//! use bnorm::{NormalizationParams, Tensor, configure};
//!
//! let input = Tensor::from_f32(&[4, 4, 2], vec![1.0; 32])?;
//! let stat = |v: f32| Tensor::from_f32(&[2], vec![v; 2]);
//! let params = NormalizationParams::new(input, stat(0.0)?, stat(1.0)?, stat(2.0)?, stat(0.5)?, 1e-5);
//! let op = configure(params)?;
//! op.execute();
//! # Ok::<(), bnorm::BnormError>(())
//! ```

pub use bnorm_common::{
    Axis, BnormError, ConfigError, DataType, DispatchBackend, DispatchConfig, Element,
    ElementKind, Result, SharedBuffer, Tensor, TensorError, TensorInfo, TensorStorage,
    ValidationError, ValidationErrorKind,
};
pub use bnorm_kernels::{
    AutoDispatcher, BatchNormalizationLayer, ConfiguredBatchNorm, DispatchGeometry, Dispatcher,
    ExecutionMode, ExecutionPlan, ExecutionUnit, NormalizationParams, RayonDispatcher,
    SequentialDispatcher, configure, select_dispatcher,
};
pub use bnorm_quantization::{dequantize_tensor, quantized_tensor};

pub mod quantization {
    pub use bnorm_quantization::*;
}
