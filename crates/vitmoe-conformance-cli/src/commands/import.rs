use std::path::Path;

use vitmoe_conformance::tables::import_layer_dumps;

use crate::exit::CliExitCode;

pub fn run(
    dumps: &Path,
    output: &Path,
    config: Option<&Path>,
) -> Result<CliExitCode, Box<dyn std::error::Error>> {
    let config = super::load_config(config)?;
    let tables = import_layer_dumps(dumps, &config.model)?;
    tables.save_dir(output)?;
    println!(
        "Imported {} tables from {} into {}",
        tables.len(),
        dumps.display(),
        output.display()
    );
    Ok(CliExitCode::Pass)
}
