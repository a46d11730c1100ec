//! Property and concurrency tests for `bnorm-kernels` dispatch.
//!
//! 1. **Backend agreement** – sequential, rayon and auto dispatch produce
//!    bit-identical output for random shapes, statistics and task sizes.
//! 2. **Shape preservation** – the output view keeps the input shape and
//!    every element is written.
//! 3. **Fixed-point bounds** – QS8 output never leaves the i8 range and
//!    matches the f64 reference after re-quantization.
//! 4. **Concurrent operations** – operations sharing buffers in opposite
//!    roles can execute from several threads without deadlocking.

use std::sync::Arc;

use bnorm_common::{DataType, DispatchBackend, DispatchConfig, Tensor, TensorInfo};
use bnorm_kernels::{
    BatchNormalizationLayer, NormalizationParams, RayonDispatcher, SequentialDispatcher,
};
use bnorm_quantization::{from_real, quantized_tensor, to_real};
use proptest::prelude::*;

fn shape_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..=6, 3..=5)
}

fn case_strategy() -> impl Strategy<Value = (Vec<usize>, Vec<f32>, Vec<[f32; 4]>, usize)> {
    shape_strategy().prop_flat_map(|shape| {
        let n: usize = shape.iter().product();
        let fm = shape[2];
        (
            Just(shape),
            prop::collection::vec(-100.0f32..100.0, n),
            prop::collection::vec(
                (-5.0f32..5.0, 0.0f32..10.0, -3.0f32..3.0, -5.0f32..5.0)
                    .prop_map(|(m, v, g, b)| [m, v, g, b]),
                fm,
            ),
            1usize..=8,
        )
    })
}

fn f32_params(shape: &[usize], values: &[f32], stats: &[[f32; 4]]) -> NormalizationParams {
    let stat = |k: usize| {
        Tensor::from_f32(&[stats.len()], stats.iter().map(|s| s[k]).collect()).unwrap()
    };
    let input = Tensor::from_f32(shape, values.to_vec()).unwrap();
    NormalizationParams::new(input, stat(0), stat(1), stat(2), stat(3), 1e-5)
}

fn run_with(layer: &BatchNormalizationLayer, params: NormalizationParams) -> Vec<u32> {
    let op = layer.configure(params).unwrap();
    op.execute();
    op.output().gather::<f32>().unwrap().iter().map(|v| v.to_bits()).collect()
}

fn layer(backend: DispatchBackend, units_per_task: usize) -> BatchNormalizationLayer {
    let config = DispatchConfig {
        backend,
        units_per_task: Some(units_per_task),
        parallel_threshold: 0,
        ..DispatchConfig::default()
    };
    BatchNormalizationLayer::with_config(config).unwrap()
}

// ── Backend agreement ───────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_backends_agree((shape, values, stats, upt) in case_strategy()) {
        let run = |backend| run_with(&layer(backend, upt), f32_params(&shape, &values, &stats));
        let sequential = run(DispatchBackend::Sequential);
        let rayon = run(DispatchBackend::Rayon);
        let auto = run(DispatchBackend::Auto);
        prop_assert_eq!(&sequential, &rayon);
        prop_assert_eq!(&sequential, &auto);
    }
}

// ── Shape preservation ──────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_output_shape_and_coverage((shape, values, stats, _) in case_strategy()) {
        let params = f32_params(&shape, &values, &stats);
        let output = Tensor::zeros(TensorInfo::dense(&shape, DataType::F32).unwrap()).unwrap();
        output.scatter(&vec![f32::NAN; values.len()]).unwrap();
        let op = BatchNormalizationLayer::new()
            .configure(params.with_output(output.clone()))
            .unwrap();
        op.execute();

        prop_assert_eq!(output.shape(), shape.as_slice());
        let out = output.gather::<f32>().unwrap();
        // Statistics keep var + eps > 0, so every output is finite.
        prop_assert!(out.iter().all(|v| v.is_finite()));
    }
}

// ── Fixed-point bounds ──────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_qs8_matches_reference(
        (shape, values, stats, _) in case_strategy(),
        position in 1u8..=7,
    ) {
        let q = |vals: &[f32], shape: &[usize]| {
            quantized_tensor(shape, DataType::QS8, position, vals).unwrap()
        };
        let fm = stats.len();
        let stat = |k: usize| q(&stats.iter().map(|s| s[k]).collect::<Vec<_>>(), &[fm]);
        let input = q(&values, &shape);
        let raw_in = input.to_vec::<i8>().unwrap();
        let (mean, var, gamma, beta) = (stat(0), stat(1), stat(2), stat(3));
        let raw = |t: &Tensor| t.to_vec::<i8>().unwrap();
        let (rm, rv, rg, rb) = (raw(&mean), raw(&var), raw(&gamma), raw(&beta));

        let eps = 0.5f32;
        let params = NormalizationParams::new(input.clone(), mean, var, gamma, beta, eps);
        BatchNormalizationLayer::new().configure(params).unwrap().execute();
        let out = input.to_vec::<i8>().unwrap();

        let plane = shape[0] * shape[1];
        for (i, (&x, &y)) in raw_in.iter().zip(&out).enumerate() {
            let c = (i / plane) % fm;
            let r = |v: i8| to_real(v, position);
            let denom = (r(rv[c]) + f64::from(eps)).sqrt();
            let real = r(rg[c]) * (r(x) - r(rm[c])) / denom + r(rb[c]);
            let expected = from_real::<i8>(real, position);
            prop_assert_eq!(y, expected, "element {}", i);
        }
    }
}

// ── Concurrent operations ───────────────────────────────────────────────────

#[test]
fn opposite_role_operations_run_concurrently() {
    let shape = [16, 8, 2];
    let n: usize = shape.iter().product();
    let a = Tensor::from_f32(&shape, vec![1.0; n]).unwrap();
    let b = Tensor::from_f32(&shape, vec![2.0; n]).unwrap();
    let stat = |v: f32| Tensor::from_f32(&[2], vec![v; 2]).unwrap();
    let params = |input: &Tensor, output: &Tensor| {
        NormalizationParams::new(input.clone(), stat(0.0), stat(1.0), stat(1.0), stat(0.0), 0.0)
            .with_output(output.clone())
    };

    let layer = BatchNormalizationLayer::with_dispatcher(
        DispatchConfig { units_per_task: Some(1), ..DispatchConfig::default() },
        Arc::new(RayonDispatcher::new(Some(4))),
    );
    let a_to_b = layer.configure(params(&a, &b)).unwrap();
    let b_to_a = layer.configure(params(&b, &a)).unwrap();

    std::thread::scope(|s| {
        s.spawn(|| (0..200).for_each(|_| a_to_b.execute()));
        s.spawn(|| (0..200).for_each(|_| b_to_a.execute()));
    });

    // Identity statistics: both buffers settle on one of the original values.
    let a_out = a.gather::<f32>().unwrap();
    assert!(a_out.iter().all(|&v| v == 1.0 || v == 2.0));
}

#[test]
fn custom_dispatcher_is_shared_by_operations() {
    let layer = BatchNormalizationLayer::with_dispatcher(
        DispatchConfig::sequential(),
        Arc::new(SequentialDispatcher),
    );
    let params = f32_params(&[2, 2, 1], &[1.0, 2.0, 3.0, 4.0], &[[0.0, 1.0, 1.0, 0.0]]);
    let op = layer.configure(params).unwrap();
    assert_eq!(op.dispatcher_name(), "sequential");
    op.execute();

    let denom = (1.0f32 + 1e-5).sqrt();
    let expected: Vec<f32> = [1.0f32, 2.0, 3.0, 4.0].iter().map(|x| 1.0 * x / denom).collect();
    assert_eq!(op.output().gather::<f32>().unwrap(), expected);
}
