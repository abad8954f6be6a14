//! Nickel-backed compilation service.
//!
//! Wraps the Nickel evaluator behind [`CompilerService`]. A session is the
//! reference table plus the using bindings accepted so far; every compile
//! renders those bindings as a `let` preamble above the fragment record and
//! evaluates a spine probe (`std.record.fields`) over the blob, which
//! resolves and scope-checks the whole unit without forcing fragment
//! bodies. Entry points are forced later, in a fresh evaluation of the
//! unit snapshot.

use crate::backend::{CompilerService, UnitHandle};
use crate::diagnostics::{codes, CompileReport, Diagnostic};
use crate::error::EngineError;
use crate::library::{self, LibraryHandle, LibrarySource};
use crate::reference::ReferenceTable;
use crate::usings;

use nickel_lang_core::error::report::{report_as_str, ColorOpt};
use nickel_lang_core::error::NullReporter;
use nickel_lang_core::eval::cache::CacheImpl;
use nickel_lang_core::program::Program;

use std::io;
use std::path::PathBuf;
use tracing::{debug, trace};

/// A `using` clause accepted into the session, rendered as one `let`.
#[derive(Debug, Clone)]
struct UsingBinding {
    alias: String,
    expr: String,
}

/// Compilation provider backed by the Nickel runtime.
pub struct NickelBackend {
    references: ReferenceTable,
    bindings: Vec<UsingBinding>,
    report: CompileReport,
    /// Per-backend monotonic unit counter; never reused, not even across
    /// resets, so two units can never collide on identity.
    generation: u64,
    /// Library roots, also exposed to user `import`s inside fragments.
    import_paths: Vec<PathBuf>,
    last_unit: Option<UnitHandle>,
}

impl NickelBackend {
    pub fn new(import_paths: Vec<PathBuf>) -> Self {
        Self {
            references: ReferenceTable::new(),
            bindings: Vec::new(),
            report: CompileReport::new(),
            generation: 0,
            import_paths,
            last_unit: None,
        }
    }

    /// The most recently compiled unit, if any.
    pub fn last_unit(&self) -> Option<&UnitHandle> {
        self.last_unit.as_ref()
    }

    /// Renders the session preamble: the bootstrap binding (when the
    /// bootstrap library is referenced) followed by every using binding in
    /// acceptance order.
    fn preamble(&self) -> String {
        let mut out = String::new();
        if self.references.bootstrap().is_some() {
            out.push_str(&format!(
                "let {} = ({}) in\n",
                library::BOOTSTRAP_NAME,
                library::BOOTSTRAP_SOURCE
            ));
        }
        for binding in &self.bindings {
            out.push_str(&format!("let {} = ({}) in\n", binding.alias, binding.expr));
        }
        out
    }

    /// Registers the binding for one validated using clause.
    ///
    /// The clause's namespace is matched against the referenced libraries
    /// by longest dotted prefix; the segments past the matched library
    /// name become a field path into the imported record.
    fn bind_using(&mut self, namespace: &str) -> Result<(), EngineError> {
        let segments: Vec<&str> = namespace.split('.').collect();
        let (library, matched) = (1..=segments.len())
            .rev()
            .find_map(|end| {
                let prefix = segments[..end].join(".");
                self.references.find(&prefix).map(|handle| (handle, end))
            })
            .ok_or_else(|| {
                EngineError::Backend(format!(
                    "using `{namespace}` does not match any referenced library"
                ))
            })?;

        let base = match &library.source {
            LibrarySource::Builtin => library::BOOTSTRAP_NAME.to_string(),
            LibrarySource::File(path) => {
                let escaped = path
                    .display()
                    .to_string()
                    .replace('\\', "\\\\")
                    .replace('"', "\\\"");
                format!("import \"{escaped}\"")
            }
        };
        let mut expr = format!("({base})");
        for segment in &segments[matched..] {
            expr.push('.');
            expr.push_str(segment);
        }

        let alias = segments[segments.len() - 1].to_string();
        trace!(namespace, alias, expr, "binding registered");
        match self.bindings.iter_mut().find(|b| b.alias == alias) {
            Some(existing) => existing.expr = expr,
            None => self.bindings.push(UsingBinding { alias, expr }),
        }
        Ok(())
    }

    /// Builds a program the way the Nickel CLI embedding expects and fully
    /// evaluates it, rendering the result.
    fn eval_source(&self, source: &str, name: &str, code: &str) -> Result<String, Diagnostic> {
        eval_rendered(source, name, code, &self.import_paths)
    }
}

impl CompilerService for NickelBackend {
    fn compile_unit(&mut self, text: &str) -> Result<UnitHandle, EngineError> {
        self.report = CompileReport::new();
        self.generation += 1;
        let generation = self.generation;

        let blob = format!("{}{}", self.preamble(), text);
        let probe = format!("std.record.fields ({blob})");
        let location = format!("<kiln:unit:{generation}>");

        match self.eval_source(&probe, &location, codes::COMPILE) {
            Ok(fields) => {
                trace!(generation, fields, "unit spine evaluated");
                let unit = UnitHandle::new(generation, blob, self.import_paths.clone());
                self.last_unit = Some(unit.clone());
                debug!(generation, "unit compiled");
                Ok(unit)
            }
            Err(diagnostic) => {
                self.report.push(diagnostic);
                let report = self.report.clone();
                // The session is unusable after a failed compile; rebuild
                // it before the caller sees the error.
                self.soft_reset();
                Err(EngineError::Compile(report))
            }
        }
    }

    fn run(&mut self, statement: &str) -> Result<(), EngineError> {
        if usings::is_using_text(statement) {
            for directive in usings::parse_directives(statement)? {
                self.bind_using(&directive.namespace)?;
            }
            return Ok(());
        }

        let source = format!("{}({statement})", self.preamble());
        self.eval_source(&source, "<kiln:run>", codes::RUN)
            .map(|_| ())
            .map_err(|diagnostic| EngineError::Backend(diagnostic.to_string()))
    }

    fn reset(&mut self) {
        self.references.clear();
        self.bindings.clear();
        self.last_unit = None;
        self.report = CompileReport::new();
        debug!("backend session reset");
    }

    fn soft_reset(&mut self) {
        self.bindings.clear();
        self.last_unit = None;
        debug!(
            references = self.references.len(),
            "backend session rebuilt, references replayed"
        );
    }

    fn reference_library(&mut self, library: LibraryHandle) {
        self.references.add(library);
    }

    fn references(&self) -> &ReferenceTable {
        &self.references
    }

    fn last_report(&self) -> &CompileReport {
        &self.report
    }
}

/// Evaluates an expression against a unit snapshot and renders the result.
///
/// Used to force entry points of already compiled units; failures are
/// invocation faults, not compile diagnostics.
pub(crate) fn eval_unit_expr(unit: &UnitHandle, expr: &str) -> Result<String, EngineError> {
    eval_unit_diag(unit, expr).map_err(|diagnostic| EngineError::Runtime(diagnostic.to_string()))
}

/// Same as [`eval_unit_expr`], keeping the raw diagnostic for callers that
/// reclassify the failure.
pub(crate) fn eval_unit_diag(unit: &UnitHandle, expr: &str) -> Result<String, Diagnostic> {
    let location = format!("<kiln:eval:{}>", unit.generation());
    eval_rendered(expr, &location, codes::INVOKE, unit.import_paths())
}

fn eval_rendered(
    source: &str,
    name: &str,
    code: &str,
    import_paths: &[PathBuf],
) -> Result<String, Diagnostic> {
    let mut program = Program::<CacheImpl>::new_from_source(
        source.as_bytes(),
        name,
        io::sink(),
        NullReporter {},
    )
    .map_err(|e| Diagnostic::error(name, codes::PREPARE, format!("{e}")))?;

    if !import_paths.is_empty() {
        program.add_import_paths(import_paths.iter());
    }

    // Failures go through the evaluator's own reporting path; the rendered
    // report is the message. Debug formatting is not safe here, it
    // recurses through contract applications.
    program
        .eval_full()
        .map(|value| format!("{value}"))
        .map_err(|e| {
            let mut files = program.files();
            let rendered = report_as_str(&mut files, e, ColorOpt::Never);
            Diagnostic::error(name, code, rendered.trim_end().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_produces_monotonic_generations() {
        let mut backend = NickelBackend::new(Vec::new());
        let first = backend.compile_unit("{ a = 1 }").unwrap();
        let second = backend.compile_unit("{ a = 1 }").unwrap();
        assert!(second.generation() > first.generation());
    }

    #[test]
    fn failed_compile_reports_and_soft_resets() {
        let mut backend = NickelBackend::new(Vec::new());
        backend.reference_library(library::bootstrap());
        backend.run("using kiln.host;").unwrap();

        let err = backend.compile_unit("{ a = ][ }").unwrap_err();
        assert!(matches!(err, EngineError::Compile(_)));
        assert!(backend.last_report().has_errors());
        // Bindings are compiled state and must be gone; references stay.
        assert!(backend.bindings.is_empty());
        assert_eq!(backend.references().len(), 1);
    }

    #[test]
    fn unbound_identifier_is_caught_without_forcing_bodies() {
        let mut backend = NickelBackend::new(Vec::new());
        let err = backend.compile_unit("{ a = some_missing_name }").unwrap_err();
        assert!(matches!(err, EngineError::Compile(_)));
    }

    #[test]
    fn run_evaluates_plain_statements() {
        let mut backend = NickelBackend::new(Vec::new());
        backend.run("1 + 1").unwrap();
        assert!(backend.run("][").is_err());
    }

    #[test]
    fn bootstrap_binding_appears_in_preamble() {
        let mut backend = NickelBackend::new(Vec::new());
        assert!(!backend.preamble().contains("let kiln"));
        backend.reference_library(library::bootstrap());
        assert!(backend.preamble().contains("let kiln"));
    }

    #[test]
    fn binding_requires_a_referenced_library() {
        let mut backend = NickelBackend::new(Vec::new());
        let err = backend.run("using Ghost;").unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));
    }

    #[test]
    fn type_errors_render_as_diagnostics_without_aborting() {
        let mut backend = NickelBackend::new(Vec::new());
        let unit = backend.compile_unit("{ a = 1 }").unwrap();
        // Applying an array primitive to a number is a contract failure;
        // it must come back as a rendered diagnostic, not tear the
        // process down.
        let err = eval_unit_expr(&unit, "std.array.length 5").unwrap_err();
        match err {
            EngineError::Runtime(message) => assert!(message.contains("error")),
            other => panic!("expected a runtime fault, got {other:?}"),
        }
    }

    #[test]
    fn import_paths_are_escaped_in_bindings() {
        use std::path::PathBuf;

        let mut backend = NickelBackend::new(Vec::new());
        backend.reference_library(LibraryHandle {
            name: "Odd".to_string(),
            source: LibrarySource::File(PathBuf::from("/tmp/od\"d/Odd.ncl")),
        });
        backend.run("using Odd;").unwrap();
        assert_eq!(backend.bindings[0].expr, "(import \"/tmp/od\\\"d/Odd.ncl\")");
    }
}
