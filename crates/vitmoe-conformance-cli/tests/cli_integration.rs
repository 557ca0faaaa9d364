use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use vitmoe_conformance::shapes::TensorId;
use vitmoe_conformance::tables::{SourceTable, TableSet};

/// Helper to get the path to a configuration fixture.
fn config_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../configs")
        .join(name)
}

/// Helper to get the vmc binary path.
fn vmc_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_vmc"))
}

fn vmc(args: &[&str]) -> Output {
    Command::new(vmc_bin()).args(args).output().unwrap()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

/// Synthesize tiny tables into a fresh temp directory.
fn synth_tiny(seed: u64) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let tiny = config_path("tiny.yaml");
    let out = vmc(&[
        "synth",
        "--config",
        tiny.to_str().unwrap(),
        "--output",
        dir.path().to_str().unwrap(),
        "--seed",
        &seed.to_string(),
    ]);
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    dir
}

fn run_tiny(tables: &Path, extra: &[&str]) -> Output {
    let tiny = config_path("tiny.yaml");
    let mut args = vec![
        "run",
        "--tables",
        tables.to_str().unwrap(),
        "--config",
        tiny.to_str().unwrap(),
    ];
    args.extend_from_slice(extra);
    vmc(&args)
}

// ================================================================
// run command
// ================================================================

mod run {
    use super::*;

    #[test]
    fn synthesized_tables_pass() {
        let dir = synth_tiny(1);
        let out = run_tiny(dir.path(), &[]);
        assert_eq!(out.status.code(), Some(0));
        let text = stdout(&out);
        assert!(text.starts_with("Loading inputs... done!\nRunning kernel... done!\n\n"));
        assert!(text.contains("Sample of values from x vs. reference:\n[["));
        assert!(text.contains("MSE: 0.00000000\n"));
        assert!(text.contains("MAE: "));
    }

    #[test]
    fn json_report_is_parseable() {
        let dir = synth_tiny(2);
        let out = run_tiny(dir.path(), &["--format", "json", "--no-reload"]);
        assert_eq!(out.status.code(), Some(0));
        let report: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
        assert_eq!(report["verdict"], "PASS");
        assert_eq!(report["engine"], "reference");
        assert_eq!(report["images"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn perturbed_reference_fails_with_exit_1() {
        let dir = synth_tiny(3);
        let mut tables = TableSet::load_dir(dir.path()).unwrap();
        let reference = tables.require(TensorId::Reference).unwrap();
        let shifted: Vec<f32> = reference.data().iter().map(|v| v + 1.0).collect();
        let table =
            SourceTable::new(reference.name(), reference.shape().to_vec(), shifted).unwrap();
        tables.insert(table);
        tables.save_dir(dir.path()).unwrap();

        let out = run_tiny(dir.path(), &[]);
        assert_eq!(out.status.code(), Some(1));
        assert!(stdout(&out).contains("MSE: 1.0000"));
    }

    #[test]
    fn truncated_table_is_structural_error() {
        let dir = synth_tiny(4);
        let file = dir.path().join("attn_weights.float32.bin");
        let bytes = std::fs::read(&file).unwrap();
        std::fs::write(&file, &bytes[..bytes.len() - 4]).unwrap();

        let out = run_tiny(dir.path(), &[]);
        assert_eq!(out.status.code(), Some(2));
        assert!(String::from_utf8_lossy(&out.stderr).contains("error:"));
    }

    #[test]
    fn negative_threshold_is_structural_error() {
        let dir = synth_tiny(5);
        let out = run_tiny(dir.path(), &["--threshold", "-1"]);
        assert_eq!(out.status.code(), Some(2));
    }

    #[test]
    fn gate_task_out_of_range_is_structural_error() {
        let dir = synth_tiny(6);
        let out = run_tiny(dir.path(), &["--gate-task", "2"]);
        assert_eq!(out.status.code(), Some(2));
    }

    #[test]
    fn debug_tap_does_not_change_verdict() {
        let dir = synth_tiny(7);
        let out = run_tiny(dir.path(), &["--debug-tap", "4"]);
        assert_eq!(out.status.code(), Some(0));
    }

    #[test]
    fn missing_tables_dir_is_structural_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_tiny(&dir.path().join("nowhere"), &[]);
        assert_eq!(out.status.code(), Some(2));
    }
}

// ================================================================
// validate / shapes commands
// ================================================================

mod validate {
    use super::*;

    #[test]
    fn canonical_config_is_valid() {
        let path = config_path("canonical.yaml");
        let out = vmc(&["validate", "--config", path.to_str().unwrap()]);
        assert_eq!(out.status.code(), Some(0));
        assert!(stdout(&out).contains("0 error(s), 0 warning(s)"));
    }

    #[test]
    fn bad_patch_count_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "model:\n  num_patches: 100\n").unwrap();
        let out = vmc(&["validate", "--config", path.to_str().unwrap()]);
        assert_eq!(out.status.code(), Some(2));
        assert!(stdout(&out).contains("CFG-003"));
    }
}

mod shapes {
    use super::*;

    #[test]
    fn canonical_contract_lists_every_table() {
        let out = vmc(&["shapes"]);
        assert_eq!(out.status.code(), Some(0));
        let text = stdout(&out);
        for id in TensorId::ALL {
            assert!(text.contains(id.table_name()), "{id}");
        }
        assert!(text.contains("[6, 2, 16, 192]"));
        assert!(text.contains("select task 0"));
    }
}

// ================================================================
// import command
// ================================================================

mod import {
    use super::*;

    #[test]
    fn missing_dumps_is_structural_error() {
        let dir = tempfile::tempdir().unwrap();
        let tiny = config_path("tiny.yaml");
        let out = vmc(&[
            "import",
            "--dumps",
            dir.path().join("none").to_str().unwrap(),
            "--output",
            dir.path().join("out").to_str().unwrap(),
            "--config",
            tiny.to_str().unwrap(),
        ]);
        assert_eq!(out.status.code(), Some(2));
    }
}
