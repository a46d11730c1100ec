//! Batch normalization kernels for bnorm
//!
//! An operation is configured once from [`NormalizationParams`]: the
//! parameters are validated, the tensor is split into row units, a kernel
//! variant is bound to the typed buffers, and a dispatcher is attached.
//! The resulting [`ConfiguredBatchNorm`] can then be executed any number of
//! times; execution cannot fail.

use bnorm_common::{DataType, DispatchConfig, Result};
use std::sync::Arc;
use tracing::instrument;

pub mod dispatch;
pub mod geometry;
pub mod kernel;
pub mod params;
pub mod validation;

pub use dispatch::{
    AutoDispatcher, Dispatcher, RayonDispatcher, SequentialDispatcher, select_dispatcher,
};
pub use geometry::{DispatchGeometry, ExecutionPlan, ExecutionUnit, Units};
pub use kernel::NormalizationKernel;
pub use params::{ExecutionMode, NormalizationParams};
pub use validation::{ValidatedFormat, validate};

/// Configure a batch normalization with the default dispatch configuration.
pub fn configure(params: NormalizationParams) -> Result<ConfiguredBatchNorm> {
    BatchNormalizationLayer::new().configure(params)
}

/// Produces configured operations that share one dispatcher.
#[derive(Debug, Clone)]
pub struct BatchNormalizationLayer {
    config: DispatchConfig,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Default for BatchNormalizationLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchNormalizationLayer {
    pub fn new() -> Self {
        let config = DispatchConfig::default();
        Self { dispatcher: select_dispatcher(&config), config }
    }

    /// Layer using `config`, which is validated first.
    pub fn with_config(config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { dispatcher: select_dispatcher(&config), config })
    }

    /// Layer configured from `BNORM_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::with_config(DispatchConfig::from_env()?)
    }

    /// Layer running on a caller-provided dispatcher.
    pub fn with_dispatcher(config: DispatchConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { config, dispatcher }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn dispatcher_name(&self) -> &'static str {
        self.dispatcher.name()
    }

    /// Validate `params` and prepare them for execution. All errors surface
    /// here; nothing is read from or written to tensor storage.
    #[instrument(skip_all, fields(shape = ?params.input.shape(), mode = params.mode.name()))]
    pub fn configure(&self, params: NormalizationParams) -> Result<ConfiguredBatchNorm> {
        let format = validate(&params)?;
        let plan = ExecutionPlan::new(params.input.info(), params.output().info());
        let geometry = DispatchGeometry::new(&plan, self.config.units_per_task);
        let kernel = NormalizationKernel::new(&params, format)?;

        tracing::debug!(
            dtype = %format.data_type,
            position = format.fixed_point_position,
            kernel = kernel.name(),
            units = plan.unit_count(),
            units_per_task = geometry.units_per_task(),
            tasks = geometry.tasks(),
            dispatcher = self.dispatcher.name(),
            "configured batch normalization"
        );

        Ok(ConfiguredBatchNorm {
            params,
            format,
            plan,
            geometry,
            kernel,
            dispatcher: Arc::clone(&self.dispatcher),
        })
    }
}

/// A validated batch normalization, ready to execute.
///
/// Holds handles to the caller's tensors; their contents are read at every
/// execution, so inputs and statistics may be rewritten between runs.
#[derive(Debug, Clone)]
pub struct ConfiguredBatchNorm {
    params: NormalizationParams,
    format: ValidatedFormat,
    plan: ExecutionPlan,
    geometry: DispatchGeometry,
    kernel: NormalizationKernel,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ConfiguredBatchNorm {
    /// Normalize every element, returning once all of the output is written.
    #[instrument(
        level = "trace",
        skip_all,
        fields(kernel = self.kernel.name(), tasks = self.geometry.tasks())
    )]
    pub fn execute(&self) {
        tracing::trace!(dispatcher = self.dispatcher.name(), "executing");
        self.kernel.run(&self.plan, &self.geometry, self.dispatcher.as_ref(), self.params.epsilon);
    }

    pub fn mode(&self) -> &ExecutionMode {
        &self.params.mode
    }

    pub fn data_type(&self) -> DataType {
        self.format.data_type
    }

    pub fn fixed_point_position(&self) -> u8 {
        self.format.fixed_point_position
    }

    pub fn epsilon(&self) -> f32 {
        self.params.epsilon
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn geometry(&self) -> &DispatchGeometry {
        &self.geometry
    }

    pub fn kernel(&self) -> &NormalizationKernel {
        &self.kernel
    }

    pub fn dispatcher_name(&self) -> &'static str {
        self.dispatcher.name()
    }

    /// The tensor results are written to.
    pub fn output(&self) -> &bnorm_common::Tensor {
        self.params.output()
    }
}
