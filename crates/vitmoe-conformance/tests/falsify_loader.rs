//! Falsification tests for contract-checked loading through the harness.
//!
//! A table that disagrees with the shape contract must stop the run before
//! the engine is ever called.

mod common;

use common::{CountingEngine, FailingEngine};
use vitmoe_conformance::HarnessError;
use vitmoe_conformance::fixed::FixedScalar;
use vitmoe_conformance::harness::Harness;
use vitmoe_conformance::shapes::TensorId;
use vitmoe_conformance::synth::synthesize;
use vitmoe_conformance::tables::SourceTable;

/// FALSIFY-LDR-001: Mis-sized table
/// Prediction: an attention weight table one row short fails with
/// ShapeMismatch and the engine is never invoked
/// If fails: the loader writes or runs before verifying shapes
#[test]
fn falsify_ldr_001_mis_sized_table_blocks_engine() {
    let config = common::tiny_config();
    let mut tables = synthesize(&config, 11).unwrap();
    let attn = tables.require(TensorId::AttnWeights).unwrap();
    let mut shape = attn.shape().to_vec();
    let last = shape.len() - 1;
    shape[last] -= 1;
    let n: usize = shape.iter().product();
    let short = SourceTable::new(attn.name(), shape, attn.data()[..n].to_vec()).unwrap();
    tables.insert(short);

    let mut harness = Harness::new(config).unwrap();
    let mut engine = CountingEngine::default();
    let err = harness.evaluate(&tables, &mut engine).unwrap_err();
    assert!(
        matches!(&err, HarnessError::ShapeMismatch { tensor, .. } if tensor == "attn_weights"),
        "{err}"
    );
    assert_eq!(engine.calls, 0);
}

/// FALSIFY-LDR-002: Missing table
/// Prediction: removing pos_embed fails with MissingTable naming it
/// If fails: absent tables are silently left zero
#[test]
fn falsify_ldr_002_missing_table() {
    let config = common::tiny_config();
    let mut tables = synthesize(&config, 12).unwrap();
    tables.remove(TensorId::PosEmbed.table_name());

    let mut harness = Harness::new(config).unwrap();
    let mut engine = CountingEngine::default();
    let err = harness.evaluate(&tables, &mut engine).unwrap_err();
    assert!(matches!(&err, HarnessError::MissingTable { name } if name == "pos_embed"));
    assert_eq!(engine.calls, 0);
}

/// FALSIFY-LDR-003: Nothing written on failure
/// Prediction: a rejected load leaves images and references all zero
/// If fails: verification is interleaved with writes
#[test]
fn falsify_ldr_003_rejected_load_writes_nothing() {
    let config = common::tiny_config();
    let mut tables = synthesize(&config, 13).unwrap();
    let reference = tables.require(TensorId::Reference).unwrap();
    let bad = SourceTable::new(
        reference.name(),
        vec![reference.len()],
        reference.data().to_vec(),
    )
    .unwrap();
    tables.insert(bad);

    let mut harness = Harness::new(config).unwrap();
    assert!(harness.load(&tables).is_err());
    assert!(harness.images().as_slice().iter().all(|v| v.raw() == 0));
    assert!(harness.references()[0].to_rows().iter().all(|v| v.raw() == 0));
    assert!(harness.store().pos_embed.to_rows().iter().all(|v| v.raw() == 0));
}

/// FALSIFY-LDR-004: Successful load reaches the engine once
/// Prediction: a well-formed table set loads every contract tensor and one
/// run makes exactly one engine call
/// If fails: the harness calls the engine per image or per layer
#[test]
fn falsify_ldr_004_one_call_per_run() {
    let mut config = common::tiny_config();
    config.harness.num_images = 2;
    let tables = synthesize(&config, 14).unwrap();

    let mut harness = Harness::new(config).unwrap();
    let summary = harness.load(&tables).unwrap();
    assert_eq!(summary.tables, TensorId::ALL.len());
    let mut engine = CountingEngine::default();
    harness.run(&mut engine).unwrap();
    assert_eq!(engine.calls, 1);
    let report = harness.report().unwrap();
    assert_eq!(report.engine, "counting");
    assert_eq!(report.images.len(), 2);
}

/// FALSIFY-LDR-005: Structural engine failure
/// Prediction: an engine error surfaces as HarnessError::Engine, not a verdict
/// If fails: structural errors are reported as numeric FAIL
#[test]
fn falsify_ldr_005_engine_error_is_structural() {
    let config = common::tiny_config();
    let tables = synthesize(&config, 15).unwrap();
    let mut harness = Harness::new(config).unwrap();
    let err = harness.evaluate(&tables, &mut FailingEngine).unwrap_err();
    assert!(matches!(err, HarnessError::Engine(_)), "{err}");
    assert!(matches!(harness.report(), Err(HarnessError::Precondition(_))));
}

/// FALSIFY-LDR-006: Out-of-range debug tap
/// Prediction: a tap naming a layer past num_layers is a precondition error
/// and the engine is not called
/// If fails: the tap code is passed through unchecked
#[test]
fn falsify_ldr_006_debug_tap_out_of_range() {
    let mut config = common::tiny_config();
    config.harness.debug_tap = 3 + 2 * 3;
    let tables = synthesize(&common::tiny_config(), 16).unwrap();
    let mut harness = Harness::new(config).unwrap();
    let mut engine = CountingEngine::default();
    let err = harness.evaluate(&tables, &mut engine).unwrap_err();
    assert!(matches!(err, HarnessError::Precondition(_)), "{err}");
    assert_eq!(engine.calls, 0);
}
