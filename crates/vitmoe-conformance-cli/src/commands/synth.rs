use std::path::Path;

use vitmoe_conformance::synth::synthesize;

use crate::exit::CliExitCode;

pub fn run(
    output: &Path,
    config: Option<&Path>,
    seed: u64,
) -> Result<CliExitCode, Box<dyn std::error::Error>> {
    let config = super::load_config(config)?;
    let tables = synthesize(&config, seed)?;
    tables.save_dir(output)?;
    println!(
        "Wrote {} synthetic tables (seed {seed}) to {}",
        tables.len(),
        output.display()
    );
    Ok(CliExitCode::Pass)
}
