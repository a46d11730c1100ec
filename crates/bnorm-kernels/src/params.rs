//! Operation parameters supplied by the caller

use bnorm_common::Tensor;

/// Where normalized values are written.
#[derive(Debug, Clone)]
pub enum ExecutionMode {
    /// Overwrite the input tensor.
    InPlace,
    /// Write into a separate tensor of identical shape and format.
    OutOfPlace(Tensor),
}

impl ExecutionMode {
    pub fn is_in_place(&self) -> bool {
        matches!(self, Self::InPlace)
    }

    pub fn output(&self) -> Option<&Tensor> {
        match self {
            Self::InPlace => None,
            Self::OutOfPlace(t) => Some(t),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InPlace => "in-place",
            Self::OutOfPlace(_) => "out-of-place",
        }
    }
}

/// Tensors and epsilon for one batch normalization operation.
///
/// `mean`, `variance`, `gamma` and `beta` are 1-D per-feature-map vectors
/// in the input's data type. Variance is expected to be non-negative; it is
/// not checked.
#[derive(Debug, Clone)]
pub struct NormalizationParams {
    pub input: Tensor,
    pub mode: ExecutionMode,
    pub mean: Tensor,
    pub variance: Tensor,
    pub gamma: Tensor,
    pub beta: Tensor,
    pub epsilon: f32,
}

impl NormalizationParams {
    /// In-place parameters; use [`Self::with_output`] for out-of-place.
    pub fn new(
        input: Tensor,
        mean: Tensor,
        variance: Tensor,
        gamma: Tensor,
        beta: Tensor,
        epsilon: f32,
    ) -> Self {
        Self { input, mode: ExecutionMode::InPlace, mean, variance, gamma, beta, epsilon }
    }

    /// Switches to out-of-place execution into `output`.
    ///
    /// `output` must live in storage separate from `input`. A disjoint view of
    /// the input's own buffer is rejected at configure time with
    /// `AliasedOutput`, since each buffer is locked once per execution.
    #[must_use]
    pub fn with_output(mut self, output: Tensor) -> Self {
        self.mode = ExecutionMode::OutOfPlace(output);
        self
    }

    /// Tensor results are written to.
    pub fn output(&self) -> &Tensor {
        self.mode.output().unwrap_or(&self.input)
    }

    /// Statistic vectors paired with their names, in validation order.
    pub(crate) fn statistics(&self) -> [(&'static str, &Tensor); 4] {
        [
            ("mean", &self.mean),
            ("variance", &self.variance),
            ("gamma", &self.gamma),
            ("beta", &self.beta),
        ]
    }
}
