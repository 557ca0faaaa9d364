use std::path::Path;

use vitmoe_conformance::config::{parse_config, validate_config};
use vitmoe_conformance::error::Severity;

use crate::exit::CliExitCode;

pub fn run(path: &Path) -> Result<CliExitCode, Box<dyn std::error::Error>> {
    let config = parse_config(path)?;
    let violations = validate_config(&config);

    let errors = violations
        .iter()
        .filter(|v| v.severity == Severity::Error)
        .count();
    let warnings = violations
        .iter()
        .filter(|v| v.severity == Severity::Warning)
        .count();

    for v in &violations {
        println!("{v}");
    }

    println!("\n{errors} error(s), {warnings} warning(s)");

    if errors == 0 {
        println!("Configuration is valid.");
        Ok(CliExitCode::Pass)
    } else {
        Err(format!("Configuration has {errors} validation error(s)").into())
    }
}
