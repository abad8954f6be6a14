//! The compilation backend seam.

use crate::diagnostics::CompileReport;
use crate::error::EngineError;
use crate::library::LibraryHandle;
use crate::reference::ReferenceTable;
use std::path::PathBuf;
use std::sync::Arc;

/// Immutable snapshot of one successfully compiled unit.
///
/// Scripts and type descriptors keep an `Arc` to their snapshot, so a
/// previously compiled entry point stays invocable regardless of what the
/// engine compiles (or fails to compile) afterwards. Snapshots accumulate
/// until the engine — or the isolated host process around it — is torn
/// down; that teardown is the only point where this memory is reclaimed.
#[derive(Debug)]
pub struct UnitSnapshot {
    generation: u64,
    source: String,
    import_paths: Vec<PathBuf>,
}

/// Shared handle to the most recently compiled unit.
#[derive(Debug, Clone)]
pub struct UnitHandle {
    inner: Arc<UnitSnapshot>,
}

impl UnitHandle {
    pub fn new(generation: u64, source: String, import_paths: Vec<PathBuf>) -> Self {
        Self {
            inner: Arc::new(UnitSnapshot {
                generation,
                source,
                import_paths,
            }),
        }
    }

    /// Monotonic, per-backend generation stamp.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// The full compiled blob: visibility preamble plus the fragment record.
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn import_paths(&self) -> &[PathBuf] {
        &self.inner.import_paths
    }
}

/// A dynamic compilation provider.
///
/// The engine drives one backend instance at a time, synchronously; no
/// two compile attempts are ever in flight against the same session.
pub trait CompilerService {
    /// Compiles a full fragment record into a unit.
    ///
    /// Diagnostics for the attempt replace the previous report. Any
    /// attempt yielding at least one error fails, and a failed attempt
    /// soft-resets the session as an unconditional side effect.
    fn compile_unit(&mut self, text: &str) -> Result<UnitHandle, EngineError>;

    /// Executes a statement for its side effects, bypassing diagnostic
    /// bookkeeping. Statements are either using directives (which bind a
    /// previously referenced library into the session) or expressions.
    fn run(&mut self, statement: &str) -> Result<(), EngineError>;

    /// Discards the whole session, references included.
    fn reset(&mut self);

    /// Discards compiled state only; previously accepted references are
    /// replayed into the fresh session.
    fn soft_reset(&mut self);

    /// Makes a library visible to subsequently compiled code. Idempotent.
    fn reference_library(&mut self, library: LibraryHandle);

    fn references(&self) -> &ReferenceTable;

    /// Diagnostics of the most recent compile attempt.
    fn last_report(&self) -> &CompileReport;
}
