use std::path::Path;

use vitmoe_conformance::config::{is_usable, validate_config};
use vitmoe_conformance::shapes::{Transform, shape_contract};

use crate::exit::CliExitCode;

pub fn run(config: Option<&Path>) -> Result<CliExitCode, Box<dyn std::error::Error>> {
    let config = super::load_config(config)?;
    if !is_usable(&validate_config(&config)) {
        return Err("configuration has validation errors; run `vmc validate`".into());
    }
    let h = &config.harness;
    let m = &config.model;
    println!(
        "Shape contract: {} layers ({} dense, {} moe), {} patches x {} features in blocks of {}",
        m.num_layers,
        m.dense_ffn_slots(),
        m.moe_slots(),
        m.num_patches,
        m.feature_dim,
        m.feature_block_size
    );
    println!();
    println!("{:<22} {:<26} {:<26} transform", "table", "source", "destination");
    for entry in shape_contract(m, h.num_images, h.gate_task) {
        let transform = match entry.transform {
            Transform::Direct => "direct".to_string(),
            Transform::Block => "block".to_string(),
            Transform::SelectTask { task } => format!("select task {task}"),
        };
        println!(
            "{:<22} {:<26} {:<26} {transform}",
            entry.id.table_name(),
            format!("{:?}", entry.source_shape),
            format!("{:?}", entry.dest_shape),
        );
    }
    Ok(CliExitCode::Pass)
}
