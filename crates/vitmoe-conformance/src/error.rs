use thiserror::Error;

use crate::engine::EngineError;

/// Result alias used throughout the harness.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {}", summarize(.0))]
    InvalidConfig(Vec<Violation>),

    #[error("Missing source table: {name}")]
    MissingTable { name: String },

    #[error("Table {name} declares {declared} elements but holds {actual}")]
    TableSize {
        name: String,
        declared: usize,
        actual: usize,
    },

    #[error("Shape mismatch for {tensor}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        tensor: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("Engine precondition violated: {0}")]
    Precondition(String),

    #[error("Weights not loaded; call load() before run()")]
    NotLoaded,

    #[error("Engine failure: {0}")]
    Engine(#[from] EngineError),
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .filter(|v| v.severity == Severity::Error)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub severity: Severity,
    pub rule: String,
    pub message: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        write!(f, "[{prefix}] {}: {}", self.rule, self.message)
    }
}
