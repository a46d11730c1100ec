//! Execution geometry: how a tensor is split into independent work units
//! and how those units are grouped into dispatched tasks.
//!
//! A unit is one row: every element along dimension 0 at a fixed height,
//! feature map and batch position. Units therefore never straddle a
//! feature map, and because tensor views cannot overlap, no two units touch
//! the same output element.

use bnorm_common::{Axis, TensorInfo};
use std::ops::Range;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Round `value` up to the next multiple of `multiple`.
#[inline]
fn round_up(value: usize, multiple: usize) -> usize {
    if multiple == 0 {
        return value;
    }
    let remainder = value % multiple;
    if remainder == 0 { value } else { value + multiple - remainder }
}

#[inline]
fn ceil_div(value: usize, divisor: usize) -> usize {
    if divisor == 0 { value } else { round_up(value, divisor) / divisor }
}

// ---------------------------------------------------------------------------
// Execution units
// ---------------------------------------------------------------------------

/// One independently computable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionUnit {
    /// Feature map every element of the row belongs to.
    pub channel: usize,
    /// Storage offset of the row's first input element.
    pub input_offset: usize,
    /// Storage offset of the row's first output element.
    pub output_offset: usize,
}

/// Strides of the row-indexing dimensions (1..) of one tensor view.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RowLayout {
    offset: usize,
    strides: Vec<usize>,
}

impl RowLayout {
    fn new(info: &TensorInfo) -> Self {
        let rank = info.num_dimensions().max(Axis::Batch.index());
        let strides = (1..rank).map(|d| info.stride(d)).collect();
        Self { offset: info.offset(), strides }
    }
}

/// Decomposition of a W × H × FM × batch tensor into row units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    width: usize,
    /// Extents of dimensions 1.. (height, feature maps, batch dims).
    row_shape: Vec<usize>,
    input: RowLayout,
    input_stride: usize,
    output: RowLayout,
    output_stride: usize,
    unit_count: usize,
}

impl ExecutionPlan {
    /// Plan over `input`, writing to `output`. The two views must have the
    /// same shape; pass `input` twice for in-place operation.
    pub fn new(input: &TensorInfo, output: &TensorInfo) -> Self {
        debug_assert_eq!(input.shape(), output.shape());
        let rank = input.num_dimensions().max(Axis::Batch.index());
        let row_shape: Vec<usize> = (1..rank).map(|d| input.dimension(d)).collect();
        let unit_count = row_shape.iter().product();
        Self {
            width: input.dim(Axis::Width),
            row_shape,
            input: RowLayout::new(input),
            input_stride: input.stride(Axis::Width.index()),
            output: RowLayout::new(output),
            output_stride: output.stride(Axis::Width.index()),
            unit_count,
        }
    }

    /// Elements per unit.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn feature_maps(&self) -> usize {
        self.row_shape[Axis::FeatureMaps.index() - 1]
    }

    pub fn unit_count(&self) -> usize {
        self.unit_count
    }

    pub fn total_elements(&self) -> usize {
        self.unit_count * self.width
    }

    /// Element stride along a row of the input.
    pub fn input_stride(&self) -> usize {
        self.input_stride
    }

    /// Element stride along a row of the output.
    pub fn output_stride(&self) -> usize {
        self.output_stride
    }

    /// The unit at `index`. Height varies fastest, then feature map, then
    /// the batch dimensions in order.
    pub fn unit(&self, index: usize) -> ExecutionUnit {
        debug_assert!(index < self.unit_count);
        let mut rest = index;
        let mut input_offset = self.input.offset;
        let mut output_offset = self.output.offset;
        let mut channel = 0;
        for (d, &extent) in self.row_shape.iter().enumerate() {
            let coord = rest % extent;
            rest /= extent;
            if d + 1 == Axis::FeatureMaps.index() {
                channel = coord;
            }
            input_offset += coord * self.input.strides[d];
            output_offset += coord * self.output.strides[d];
        }
        ExecutionUnit { channel, input_offset, output_offset }
    }

    /// Every unit in index order. Calling this again restarts the sequence.
    pub fn units(&self) -> Units<'_> {
        Units { plan: self, next: 0 }
    }
}

/// Iterator over the units of an [`ExecutionPlan`].
#[derive(Debug, Clone)]
pub struct Units<'a> {
    plan: &'a ExecutionPlan,
    next: usize,
}

impl Iterator for Units<'_> {
    type Item = ExecutionUnit;

    fn next(&mut self) -> Option<ExecutionUnit> {
        if self.next >= self.plan.unit_count {
            return None;
        }
        let unit = self.plan.unit(self.next);
        self.next += 1;
        Some(unit)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.unit_count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Units<'_> {}

impl std::iter::FusedIterator for Units<'_> {}

// ---------------------------------------------------------------------------
// Dispatch geometry
// ---------------------------------------------------------------------------

/// Element count a task covers when units-per-task is not configured.
pub const MIN_ELEMENTS_PER_TASK: usize = 1024;

/// Grouping of consecutive units into tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGeometry {
    unit_count: usize,
    units_per_task: usize,
    tasks: usize,
    elements: usize,
}

impl DispatchGeometry {
    /// Group the units of `plan`. Without an explicit `units_per_task`,
    /// each task covers at least [`MIN_ELEMENTS_PER_TASK`] elements.
    pub fn new(plan: &ExecutionPlan, units_per_task: Option<usize>) -> Self {
        let unit_count = plan.unit_count();
        let requested = units_per_task
            .unwrap_or_else(|| ceil_div(MIN_ELEMENTS_PER_TASK, plan.width().max(1)));
        let units_per_task = requested.clamp(1, unit_count.max(1));
        Self {
            unit_count,
            units_per_task,
            tasks: ceil_div(unit_count, units_per_task),
            elements: plan.total_elements(),
        }
    }

    pub fn unit_count(&self) -> usize {
        self.unit_count
    }

    pub fn units_per_task(&self) -> usize {
        self.units_per_task
    }

    pub fn tasks(&self) -> usize {
        self.tasks
    }

    /// Elements covered by all tasks together.
    pub fn total_elements(&self) -> usize {
        self.elements
    }

    /// Unit indices of task `task`. The last task may be short.
    pub fn task_range(&self, task: usize) -> Range<usize> {
        let start = (task * self.units_per_task).min(self.unit_count);
        let end = (start + self.units_per_task).min(self.unit_count);
        start..end
    }
}
