//! Process exit codes.
//!
//! A numerical disagreement is a normal outcome and exits 1. Anything that
//! prevented the comparison from happening at all exits 2, so a broken table
//! directory never reads as a failing engine.

/// Exit code of one `vmc` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CliExitCode {
    /// Command completed; for `run`, every image passed
    Pass = 0,
    /// `run` completed and at least one image exceeded the threshold
    Fail = 1,
    /// Structural failure: configuration, tables, I/O or engine error
    Error = 2,
}

impl From<CliExitCode> for i32 {
    fn from(code: CliExitCode) -> Self {
        code as i32
    }
}
