//! Falsification tests for the conformance metrics and verdict.
//!
//! Each test targets one property of MSE/MAE/verdict that a plausible
//! implementation bug (reading padding, dividing by the padded length,
//! exclusive threshold, sign handling) would break.

mod common;

use proptest::prelude::*;
use vitmoe_conformance::layout::BlockLayout;
use vitmoe_conformance::report::{Verdict, aggregate_error, sample_trace, verdict};

/// FALSIFY-MET-001: Identity
/// Prediction: computed == reference gives MSE = MAE = 0 and PASS
/// If fails: metric reads uninitialized or padding lanes
#[test]
fn falsify_met_001_identity() {
    let layout = BlockLayout::new(5, 7, 4);
    let t = common::tensor(layout, |p, d| (p as f64 * 0.5) - (d as f64 * 0.125));
    let m = aggregate_error(&t, &t).unwrap();
    assert_eq!(m.mse, 0.0);
    assert_eq!(m.mae, 0.0);
    assert_eq!(m.max_abs_error, 0.0);
    assert_eq!(verdict(m.mse, 0.1), Verdict::Pass);
}

/// FALSIFY-MET-002: Zero scenario
/// Prediction: all-zero computed and reference tensors print "MSE: 0.00000000"
/// If fails: formatting or normalization is wrong
#[test]
fn falsify_met_002_zero_scenario_prints_zero() {
    let layout = BlockLayout::new(4, 6, 4);
    let z = common::tensor(layout, |_, _| 0.0);
    let m = aggregate_error(&z, &z).unwrap();
    assert_eq!(format!("MSE: {:.8}", m.mse), "MSE: 0.00000000");
    assert_eq!(format!("MAE: {:.8}", m.mae), "MAE: 0.00000000");
}

/// FALSIFY-MET-003: Normalization by logical size
/// Prediction: a single unit error among P*D lanes gives MSE = 1/(P*D)
/// If fails: divisor includes padding lanes
#[test]
fn falsify_met_003_divides_by_logical_lanes() {
    let layout = BlockLayout::new(3, 5, 4);
    let c = common::tensor(layout, |_, _| 0.0);
    let r = common::tensor(layout, |p, d| if p == 2 && d == 4 { 1.0 } else { 0.0 });
    let m = aggregate_error(&c, &r).unwrap();
    assert_eq!(m.elements, 15);
    assert!((m.mse - 1.0 / 15.0).abs() < 1e-15);
    assert!((m.mae - 1.0 / 15.0).abs() < 1e-15);
    assert_eq!(m.max_abs_error, 1.0);
}

/// FALSIFY-MET-004: Inclusive threshold
/// Prediction: MSE exactly equal to the threshold passes; just above fails
/// If fails: comparison is strict
#[test]
fn falsify_met_004_threshold_boundary() {
    let layout = BlockLayout::new(2, 3, 4);
    let c = common::tensor(layout, |_, _| 1.0);
    let r = common::tensor(layout, |_, _| 1.25);
    let m = aggregate_error(&c, &r).unwrap();
    assert_eq!(m.mse, 0.0625);
    assert_eq!(verdict(m.mse, 0.0625), Verdict::Pass);
    assert_eq!(verdict(m.mse, 0.0625 - f64::EPSILON), Verdict::Fail);
}

proptest! {
    /// FALSIFY-MET-005: Symmetry
    /// Prediction: swapping computed and reference leaves MSE and MAE unchanged
    /// If fails: error is signed or one side is read from the wrong tensor
    #[test]
    fn falsify_met_005_symmetry(
        seed in 0u64..10_000,
        dim in 1usize..20,
        block in 1usize..9,
    ) {
        let layout = BlockLayout::new(3, dim, block);
        let s = seed as usize;
        let a = common::tensor(layout, |p, d| ((s + p * 31 + d * 7) % 97) as f64 / 13.0 - 3.0);
        let b = common::tensor(layout, |p, d| ((s * 3 + p * 11 + d) % 89) as f64 / 17.0 - 2.0);
        let ab = aggregate_error(&a, &b).unwrap();
        let ba = aggregate_error(&b, &a).unwrap();
        prop_assert_eq!(ab.mse, ba.mse);
        prop_assert_eq!(ab.mae, ba.mae);
    }

    /// FALSIFY-MET-006: Constant offset
    /// Prediction: reference = computed + c in every lane gives MSE = c^2, MAE = |c|
    /// If fails: padding contributes, or the mean uses the wrong count
    #[test]
    fn falsify_met_006_constant_offset(
        k in -512i32..512,
        dim in 1usize..24,
        block in 1usize..9,
    ) {
        let c = f64::from(k) / 256.0;
        let layout = BlockLayout::new(4, dim, block);
        let computed = common::tensor(layout, |p, d| (p + d) as f64 / 64.0);
        let reference = common::tensor(layout, |p, d| (p + d) as f64 / 64.0 + c);
        let m = aggregate_error(&computed, &reference).unwrap();
        prop_assert!((m.mse - c * c).abs() < 1e-12, "mse {} vs {}", m.mse, c * c);
        prop_assert!((m.mae - c.abs()).abs() < 1e-12, "mae {} vs {}", m.mae, c.abs());
    }

    /// FALSIFY-MET-007: Trace shape
    /// Prediction: the trace has min(limit, patches) lines of 2*min(limit, dim) values
    /// If fails: limits are not clamped or padding lanes are printed
    #[test]
    fn falsify_met_007_trace_shape(
        patches in 1usize..8,
        dim in 1usize..12,
        block in 1usize..6,
        patch_limit in 0usize..10,
        dim_limit in 1usize..15,
    ) {
        let layout = BlockLayout::new(patches, dim, block);
        let t = common::tensor(layout, |_, _| -0.5);
        let trace = sample_trace(&t, &t, patch_limit, dim_limit).unwrap();
        let lines: Vec<&str> = trace.lines().collect();
        prop_assert_eq!(lines.len(), patch_limit.min(patches));
        for line in lines {
            prop_assert_eq!(line.matches("-0.50000000").count(), 2 * dim_limit.min(dim));
        }
    }
}
