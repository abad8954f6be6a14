//! Compiler diagnostics collected per compile attempt.
//!
//! Every backend message is classified by severity into two ordered
//! sequences, errors first. A report belongs to exactly one compile
//! attempt and is cleared before the next one begins.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a single compiler message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Diagnostic codes emitted by the Nickel backend.
pub mod codes {
    /// Source could not be read or prepared for evaluation.
    pub const PREPARE: &str = "KN0001";
    /// Compilation of a unit failed (parse, scope, typecheck or eval).
    pub const COMPILE: &str = "KN0002";
    /// A statement executed through `run` failed.
    pub const RUN: &str = "KN0003";
    /// Evaluation of an already compiled entry point failed.
    pub const INVOKE: &str = "KN0004";
}

/// One compiler message with location and classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Name of the evaluated source, e.g. `<kiln:unit:3>`.
    pub location: String,
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    pub fn error(
        location: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            location: location.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn warning(
        location: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            location: location.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}: {}",
            self.location, self.severity, self.code, self.message
        )
    }
}

/// All errors and warnings produced by one compile attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileReport {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl CompileReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any attempt yielding at least one error is a failure.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.errors.push(diagnostic),
            Severity::Warning => self.warnings.push(diagnostic),
        }
    }

    /// Error messages formatted `<location> <severity> <code>: <message>`.
    pub fn error_strings(&self) -> Vec<String> {
        self.errors.iter().map(|d| d.to_string()).collect()
    }

    /// Warning messages in the same format as [`Self::error_strings`].
    pub fn warning_strings(&self) -> Vec<String> {
        self.warnings.iter().map(|d| d.to_string()).collect()
    }
}

impl fmt::Display for CompileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() && self.warnings.is_empty() {
            return write!(f, "no diagnostics");
        }
        for diagnostic in self.errors.iter().chain(self.warnings.iter()) {
            writeln!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}
