//! Configuration-time validation of batch normalization parameters.
//!
//! Checks run in a fixed order and stop at the first failure:
//! epsilon, input data type, input rank, the four statistic vectors
//! (mean, variance, gamma, beta; format then shape), then the output
//! tensor for out-of-place operations (format, shape, aliasing).
//! Nothing is read from or written to tensor storage.

use crate::params::{ExecutionMode, NormalizationParams};
use bnorm_common::{Axis, DataType, TensorInfo, ValidationError};

/// Minimum input rank: width, height and feature maps.
pub const MIN_INPUT_RANK: usize = 3;

/// Data types the normalization kernel supports.
pub const SUPPORTED_DATA_TYPES: [DataType; 4] =
    [DataType::QS8, DataType::QS16, DataType::F16, DataType::F32];

/// The element format every tensor of a validated operation shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedFormat {
    pub data_type: DataType,
    pub fixed_point_position: u8,
}

pub fn is_supported(data_type: DataType) -> bool {
    SUPPORTED_DATA_TYPES.contains(&data_type)
}

/// Validate `params`, returning the shared element format.
pub fn validate(params: &NormalizationParams) -> Result<ValidatedFormat, ValidationError> {
    validate_epsilon(params.epsilon)?;

    let input = params.input.info();
    if !is_supported(input.data_type()) {
        return Err(ValidationError::UnsupportedDatatype { dtype: input.data_type() });
    }
    if input.num_dimensions() < MIN_INPUT_RANK {
        return Err(ValidationError::ShapeMismatch {
            tensor: "input",
            expected: format!("at least {MIN_INPUT_RANK} dimensions"),
            actual: format!("{:?}", input.shape()),
        });
    }

    for (name, stat) in params.statistics() {
        validate_statistic(name, input, stat.info())?;
    }

    if let ExecutionMode::OutOfPlace(output) = &params.mode {
        check_format("output", input, output.info())?;
        if output.shape() != input.shape() {
            return Err(ValidationError::ShapeMismatch {
                tensor: "output",
                expected: format!("{:?}", input.shape()),
                actual: format!("{:?}", output.shape()),
            });
        }
        if output.shares_storage_with(&params.input) {
            return Err(ValidationError::AliasedOutput);
        }
    }

    Ok(ValidatedFormat {
        data_type: input.data_type(),
        fixed_point_position: input.fixed_point_position(),
    })
}

fn validate_epsilon(epsilon: f32) -> Result<(), ValidationError> {
    if epsilon.is_finite() && epsilon >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidEpsilon { value: epsilon })
    }
}

fn validate_statistic(
    name: &'static str,
    input: &TensorInfo,
    stat: &TensorInfo,
) -> Result<(), ValidationError> {
    check_format(name, input, stat)?;
    let feature_maps = Axis::FeatureMaps.index();
    if stat.num_dimensions() != 1 || !stat.matches_dimension(0, input, feature_maps) {
        return Err(ValidationError::ShapeMismatch {
            tensor: name,
            expected: format!("[{}]", input.dimension(feature_maps)),
            actual: format!("{:?}", stat.shape()),
        });
    }
    Ok(())
}

fn check_format(
    name: &'static str,
    input: &TensorInfo,
    other: &TensorInfo,
) -> Result<(), ValidationError> {
    if input.same_format(other) {
        Ok(())
    } else {
        Err(ValidationError::DatatypeMismatch {
            tensor: name,
            expected: input.format_name(),
            actual: other.format_name(),
        })
    }
}
