pub mod import;
pub mod run;
pub mod shapes;
pub mod synth;
pub mod validate;

use std::path::Path;

use vitmoe_conformance::config::{ConformanceConfig, parse_config};

/// The configuration at `path`, or the canonical one.
pub fn load_config(path: Option<&Path>) -> Result<ConformanceConfig, Box<dyn std::error::Error>> {
    match path {
        Some(p) => Ok(parse_config(p)?),
        None => Ok(ConformanceConfig::default()),
    }
}
