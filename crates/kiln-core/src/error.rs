use crate::diagnostics::CompileReport;
use thiserror::Error;

/// Errors surfaced by the script engine.
///
/// Every recoverable variant is local to the call that produced it: the
/// engine rebuilds its backend session and replays accepted usings, so
/// the next call starts from a consistent state.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Using text did not match `(using <dotted-name>;)+`. No state mutated.
    #[error("malformed using directive text: {0:?}")]
    UsingSyntax(String),

    /// A syntactically valid clause named a namespace no loaded library
    /// provides. No state mutated.
    #[error("namespace `{0}` does not resolve to any loaded library")]
    UnresolvableReference(String),

    /// Removal asked for a directive that is not active.
    #[error("using directive for `{0}` is not active")]
    UnknownUsing(String),

    /// Fragment id is not usable as a cross-referencable identifier.
    #[error("invalid fragment id `{0}`")]
    InvalidFragmentId(String),

    /// The compile attempt produced one or more errors. The engine has
    /// already soft-reset and replayed usings.
    #[error("compilation failed with {} error(s)", .0.errors.len())]
    Compile(CompileReport),

    /// A backend failure outside the compile-diagnostic channel.
    #[error("backend fault: {0}")]
    Backend(String),

    /// Evaluation of an already compiled entry point failed.
    #[error("script evaluation failed: {0}")]
    Runtime(String),
}

impl EngineError {
    /// The diagnostic report carried by a compile failure, if any.
    pub fn report(&self) -> Option<&CompileReport> {
        match self {
            EngineError::Compile(report) => Some(report),
            _ => None,
        }
    }
}
