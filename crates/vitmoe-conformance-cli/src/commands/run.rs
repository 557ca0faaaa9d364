use std::io::Write;
use std::path::PathBuf;

use tracing::info;
use vitmoe_conformance::harness::Harness;
use vitmoe_conformance::reference::ReferenceEngine;
use vitmoe_conformance::tables::TableSet;

use crate::exit::CliExitCode;

pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown format '{other}', expected 'text' or 'json'"
            )),
        }
    }
}

pub struct RunOptions {
    pub tables: PathBuf,
    pub config: Option<PathBuf>,
    pub threshold: Option<f64>,
    pub reload: bool,
    pub debug_tap: Option<u32>,
    pub gate_task: Option<usize>,
    pub format: ReportFormat,
}

pub fn run(options: &RunOptions) -> Result<CliExitCode, Box<dyn std::error::Error>> {
    let mut config = super::load_config(options.config.as_deref())?;
    let h = &mut config.harness;
    if let Some(threshold) = options.threshold {
        h.mse_threshold = threshold;
    }
    if let Some(tap) = options.debug_tap {
        h.debug_tap = tap;
    }
    if let Some(task) = options.gate_task {
        h.gate_task = task;
    }
    h.reload_weights = h.reload_weights && options.reload;
    let text = matches!(options.format, ReportFormat::Text);

    progress(text, "Loading inputs... ")?;
    let tables = TableSet::load_dir(&options.tables)?;
    let mut harness = Harness::new(config)?;
    harness.load(&tables)?;
    progress(text, "done!\n")?;

    progress(text, "Running kernel... ")?;
    let mut engine = ReferenceEngine::new(&harness.config().model);
    harness.run(&mut engine)?;
    progress(text, "done!\n\n")?;

    let report = harness.report()?;
    info!(verdict = %report.verdict, images = report.images.len(), "run complete");
    match options.format {
        ReportFormat::Text => print!("{}", report.render_text()),
        ReportFormat::Json => println!("{}", report.to_json()?),
    }

    Ok(if report.passed() {
        CliExitCode::Pass
    } else {
        CliExitCode::Fail
    })
}

/// Progress goes to stdout ahead of the text report only.
fn progress(enabled: bool, message: &str) -> std::io::Result<()> {
    if enabled {
        let mut out = std::io::stdout().lock();
        out.write_all(message.as_bytes())?;
        out.flush()?;
    }
    Ok(())
}
