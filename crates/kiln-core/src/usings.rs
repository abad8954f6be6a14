//! Using-directive grammar and the active-declaration table.
//!
//! Visibility text must consist of one or more whole `using <dotted-name>;`
//! clauses and nothing else. Each accepted clause is backed by exactly one
//! resolved library: an entry in the reference table plus a binding in the
//! backend session.

use crate::error::EngineError;
use crate::library::{self, LibraryHandle, LibraryIndex};
use crate::registry::TypeRegistry;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

static USING_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*using\s+[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*\s*;\s*)+$")
        .expect("using grammar regex")
});

static USING_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"using\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*;")
        .expect("using clause regex")
});

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

/// True for names usable as fragment ids and binding aliases.
pub fn is_identifier(text: &str) -> bool {
    IDENTIFIER.is_match(text)
}

/// True when the text is a well-formed sequence of using clauses.
pub fn is_using_text(text: &str) -> bool {
    USING_TEXT.is_match(text)
}

/// One parsed `using <dotted-name>;` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsingDirective {
    /// Canonical clause text, `using <namespace>;`.
    pub text: String,
    /// The dotted namespace.
    pub namespace: String,
}

impl UsingDirective {
    fn new(namespace: &str) -> Self {
        Self {
            text: format!("using {namespace};"),
            namespace: namespace.to_string(),
        }
    }

    /// Final segment of the namespace; the name bound in compiled code.
    pub fn alias(&self) -> &str {
        self.namespace.rsplit('.').next().unwrap_or(&self.namespace)
    }
}

/// Validates the grammar and splits the text into directives.
pub fn parse_directives(text: &str) -> Result<Vec<UsingDirective>, EngineError> {
    if !is_using_text(text) {
        return Err(EngineError::UsingSyntax(text.to_string()));
    }
    Ok(USING_CLAUSE
        .captures_iter(text)
        .map(|captures| UsingDirective::new(&captures[1]))
        .collect())
}

/// An accepted directive together with the library it resolved to.
#[derive(Debug, Clone)]
pub struct UsingDeclaration {
    pub directive: UsingDirective,
    pub library: LibraryHandle,
}

/// The active using declarations, in acceptance order.
#[derive(Debug, Default)]
pub struct UsingTable {
    declarations: Vec<UsingDeclaration>,
}

impl UsingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.declarations
            .iter()
            .any(|declaration| declaration.directive.namespace == namespace)
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Canonical clause text of every active declaration.
    pub fn directive_texts(&self) -> Vec<String> {
        self.declarations
            .iter()
            .map(|declaration| declaration.directive.text.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.declarations.clear();
    }

    /// Adds using clauses, all-or-nothing.
    ///
    /// Already-active clauses are skipped. Every remaining clause is
    /// resolved before any state is mutated, so an unresolvable clause
    /// leaves the session exactly as it was. Committed clauses register
    /// their declaration, reference their library and run their text
    /// against the backend.
    pub fn add(
        &mut self,
        text: &str,
        index: &LibraryIndex,
        registry: &mut TypeRegistry,
    ) -> Result<(), EngineError> {
        let directives = parse_directives(text)?;

        let mut pending: Vec<(UsingDirective, LibraryHandle)> = Vec::new();
        for directive in directives {
            if self.contains(&directive.namespace) {
                debug!(namespace = %directive.namespace, "using already active, skipping");
                continue;
            }
            if pending
                .iter()
                .any(|(accepted, _)| accepted.namespace == directive.namespace)
            {
                continue;
            }
            match index.resolve(&directive.namespace) {
                Some(library) => pending.push((directive, library)),
                None => {
                    return Err(EngineError::UnresolvableReference(directive.namespace));
                }
            }
        }

        if pending.is_empty() {
            return Ok(());
        }

        for (_, library) in &pending {
            registry.reference_library(library.clone());
        }

        let joined = pending
            .iter()
            .map(|(directive, _)| directive.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if let Err(fault) = registry.run(&joined) {
            // The declarations were validated, so a failing run is a
            // backend fault. Rebuild the session from the pre-call state
            // and surface it.
            warn!("using declaration failed after validation, rolling session back");
            if let Err(rollback) = self.restore_session(registry) {
                // A session that cannot be rebuilt is the more urgent
                // fault; the original one is still in the log.
                warn!(fault = %fault, "session rollback failed after using fault");
                return Err(rollback);
            }
            return Err(fault);
        }

        for (directive, library) in pending {
            debug!(namespace = %directive.namespace, library = %library.name, "using accepted");
            self.declarations.push(UsingDeclaration { directive, library });
        }
        Ok(())
    }

    /// Removes active using clauses.
    ///
    /// Every clause must be active, otherwise nothing is mutated. The
    /// backend has no way to undeclare a single binding, so removal resets
    /// the whole session and replays every remaining declaration; the cost
    /// is proportional to what stays, not to what was removed.
    pub fn remove(
        &mut self,
        text: &str,
        registry: &mut TypeRegistry,
    ) -> Result<(), EngineError> {
        let directives = parse_directives(text)?;
        for directive in &directives {
            if !self.contains(&directive.namespace) {
                return Err(EngineError::UnknownUsing(directive.namespace.clone()));
            }
        }

        self.declarations.retain(|declaration| {
            !directives
                .iter()
                .any(|directive| directive.namespace == declaration.directive.namespace)
        });
        debug!(remaining = self.declarations.len(), "usings removed, replaying session");
        self.restore_session(registry)
    }

    /// Re-runs every active clause against the backend. Used after soft
    /// resets, which drop bindings but keep references.
    pub fn replay(&self, registry: &mut TypeRegistry) -> Result<(), EngineError> {
        if self.declarations.is_empty() {
            return Ok(());
        }
        let joined = self
            .declarations
            .iter()
            .map(|declaration| declaration.directive.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        registry.run(&joined)
    }

    /// Full backend reset followed by re-referencing the bootstrap library
    /// and every remaining declaration's library, then a clause replay.
    fn restore_session(&self, registry: &mut TypeRegistry) -> Result<(), EngineError> {
        registry.reset_backend();
        registry.reference_library(library::bootstrap());
        for declaration in &self.declarations {
            registry.reference_library(declaration.library.clone());
        }
        self.replay(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CompilerService, UnitHandle};
    use crate::diagnostics::CompileReport;
    use crate::reference::ReferenceTable;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parses_single_clause() {
        let directives = parse_directives("using Core;").unwrap();
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].namespace, "Core");
        assert_eq!(directives[0].text, "using Core;");
    }

    #[test]
    fn parses_multiple_clauses_with_whitespace() {
        let directives =
            parse_directives("  using Core; using Devtools.Math;\nusing kiln.host;  ").unwrap();
        let namespaces: Vec<_> = directives.iter().map(|d| d.namespace.as_str()).collect();
        assert_eq!(namespaces, vec!["Core", "Devtools.Math", "kiln.host"]);
    }

    #[test]
    fn alias_is_last_segment() {
        let directives = parse_directives("using Devtools.Math;").unwrap();
        assert_eq!(directives[0].alias(), "Math");
    }

    #[test]
    fn rejects_text_that_is_not_only_clauses() {
        for bad in [
            "using Core",
            "using Core;;",
            "using Core; let x = 1 in x",
            "using 1Core;",
            "using Core.;",
            "",
            "   ",
        ] {
            assert!(
                matches!(parse_directives(bad), Err(EngineError::UsingSyntax(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn identifier_check() {
        assert!(is_identifier("Core"));
        assert!(is_identifier("_hidden"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier(""));
    }

    /// Backend whose `run` faults on statements mentioning `Boom`.
    struct FaultingBackend {
        references: ReferenceTable,
        report: CompileReport,
    }

    impl FaultingBackend {
        fn new() -> Self {
            Self {
                references: ReferenceTable::new(),
                report: CompileReport::new(),
            }
        }
    }

    impl CompilerService for FaultingBackend {
        fn compile_unit(&mut self, text: &str) -> Result<UnitHandle, EngineError> {
            Ok(UnitHandle::new(1, text.to_string(), Vec::new()))
        }

        fn run(&mut self, statement: &str) -> Result<(), EngineError> {
            if statement.contains("Boom") {
                return Err(EngineError::Backend("boom".to_string()));
            }
            Ok(())
        }

        fn reset(&mut self) {
            self.references.clear();
        }

        fn soft_reset(&mut self) {}

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

    fn index_with(names: &[&str]) -> (TempDir, LibraryIndex) {
        let dir = TempDir::new().unwrap();
        for name in names {
            fs::write(dir.path().join(format!("{name}.ncl")), "{ }").unwrap();
        }
        let index = LibraryIndex::new(vec![dir.path().to_path_buf()]);
        (dir, index)
    }

    #[test]
    fn backend_fault_rolls_the_session_back() {
        let (_dir, index) = index_with(&["Core", "Boom"]);
        let mut registry = TypeRegistry::new(Box::new(FaultingBackend::new()));
        registry.reference_library(library::bootstrap());

        let mut table = UsingTable::new();
        let err = table.add("using Boom;", &index, &mut registry).unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));

        // Nothing committed; the session was rebuilt to the pre-call
        // state, bootstrap included.
        assert!(table.is_empty());
        assert_eq!(registry.reference_count(), 1);

        // The rebuilt session is usable.
        table.add("using Core;", &index, &mut registry).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(registry.reference_count(), 2);
    }
}
