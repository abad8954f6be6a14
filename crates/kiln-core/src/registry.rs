//! The fragment store and whole-set compilation.
//!
//! Fragments are named source texts. `compile_all` renders them as one
//! recursive record literal and submits it to the backend in a single
//! attempt: the live unit always reflects the entire current fragment set
//! or nothing. A failed attempt never mutates the store.

use crate::backend::{CompilerService, UnitHandle};
use crate::diagnostics::{CompileReport, Diagnostic};
use crate::error::EngineError;
use crate::library::LibraryHandle;
use crate::usings;
use std::collections::BTreeMap;
use tracing::debug;

/// Callback invoked with the report of a finished compile attempt.
pub type CompileHook = Box<dyn FnMut(&CompileReport)>;

/// Token returned by hook registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookHandle(u64);

pub struct TypeRegistry {
    backend: Box<dyn CompilerService>,
    fragments: BTreeMap<String, String>,
    last_unit: Option<UnitHandle>,
    /// Report of the last completed compile attempt, including diagnostics
    /// from unit checks the backend itself does not see.
    report: CompileReport,
    on_success: Vec<(HookHandle, CompileHook)>,
    on_failure: Vec<(HookHandle, CompileHook)>,
    next_hook: u64,
}

impl TypeRegistry {
    pub fn new(backend: Box<dyn CompilerService>) -> Self {
        Self {
            backend,
            fragments: BTreeMap::new(),
            last_unit: None,
            report: CompileReport::new(),
            on_success: Vec::new(),
            on_failure: Vec::new(),
            next_hook: 0,
        }
    }

    /// Inserts or replaces a fragment, returning the previous text.
    pub fn upsert(&mut self, id: &str, text: &str) -> Option<String> {
        self.fragments.insert(id.to_string(), text.to_string())
    }

    /// Deletes a fragment if present, else a no-op.
    pub fn remove(&mut self, id: &str) -> Option<String> {
        self.fragments.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.fragments.contains_key(id)
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn fragment_ids(&self) -> impl Iterator<Item = &str> {
        self.fragments.keys().map(String::as_str)
    }

    /// The unit of the last successful compile, if any.
    pub fn last_unit(&self) -> Option<&UnitHandle> {
        self.last_unit.as_ref()
    }

    /// Compiles the entire fragment set as one unit.
    ///
    /// On success the new unit atomically replaces the previous one and
    /// the success hooks fire; on a compile failure the failure hooks fire
    /// and the fragment store is left untouched, so the caller can fix and
    /// retry without having lost anything. Exactly one hook set fires per
    /// attempt; backend faults bypass both.
    pub fn compile_all(&mut self) -> Result<UnitHandle, EngineError> {
        self.compile_all_with(|_| Ok(()))
    }

    /// Like [`Self::compile_all`], with an additional unit check inside
    /// the same attempt. A failing check is a compile failure: its
    /// diagnostic joins the report, the failure hooks fire once, and the
    /// session is rebuilt the way a backend compile failure rebuilds it.
    pub fn compile_all_with<F>(&mut self, check: F) -> Result<UnitHandle, EngineError>
    where
        F: FnOnce(&UnitHandle) -> Result<(), Diagnostic>,
    {
        let source = self.render_unit_source();
        debug!(fragments = self.fragments.len(), "compiling fragment set");

        match self.backend.compile_unit(&source) {
            Ok(unit) => match check(&unit) {
                Ok(()) => {
                    self.last_unit = Some(unit.clone());
                    self.report = self.backend.last_report().clone();
                    let report = self.report.clone();
                    for (_, hook) in &mut self.on_success {
                        hook(&report);
                    }
                    Ok(unit)
                }
                Err(diagnostic) => {
                    let mut report = self.backend.last_report().clone();
                    report.push(diagnostic);
                    self.backend.soft_reset();
                    self.report = report.clone();
                    for (_, hook) in &mut self.on_failure {
                        hook(&report);
                    }
                    Err(EngineError::Compile(report))
                }
            },
            Err(EngineError::Compile(report)) => {
                self.report = report.clone();
                for (_, hook) in &mut self.on_failure {
                    hook(&report);
                }
                Err(EngineError::Compile(report))
            }
            Err(fault) => Err(fault),
        }
    }

    /// Renders all fragments into one recursive record literal. Fields of
    /// a record may reference each other regardless of textual order, so
    /// fragment declarations are order-independent by construction.
    fn render_unit_source(&self) -> String {
        let mut out = String::from("{\n");
        for (id, text) in &self.fragments {
            if usings::is_identifier(id) {
                out.push_str(&format!("  {id} = ({text}),\n"));
            } else {
                out.push_str(&format!("  \"{}\" = ({text}),\n", id.replace('"', "\\\"")));
            }
        }
        out.push('}');
        out
    }

    // Backend forwarding.

    pub fn run(&mut self, statement: &str) -> Result<(), EngineError> {
        self.backend.run(statement)
    }

    pub fn reference_library(&mut self, library: LibraryHandle) {
        self.backend.reference_library(library);
    }

    pub fn reference_count(&self) -> usize {
        self.backend.references().len()
    }

    pub fn soft_reset(&mut self) {
        self.backend.soft_reset();
    }

    /// Resets the backend session only; the fragment store survives and
    /// is recompiled in full by the next attempt.
    pub fn reset_backend(&mut self) {
        self.backend.reset();
    }

    /// Full reset: fragments, unit, report and backend session.
    pub fn reset(&mut self) {
        self.fragments.clear();
        self.last_unit = None;
        self.report = CompileReport::new();
        self.backend.reset();
    }

    /// Report of the last completed compile attempt.
    pub fn last_report(&self) -> &CompileReport {
        &self.report
    }

    // Compile hooks.

    pub fn add_on_success(&mut self, hook: CompileHook) -> HookHandle {
        let handle = self.next_hook_handle();
        self.on_success.push((handle, hook));
        handle
    }

    pub fn add_on_failure(&mut self, hook: CompileHook) -> HookHandle {
        let handle = self.next_hook_handle();
        self.on_failure.push((handle, hook));
        handle
    }

    pub fn remove_on_success(&mut self, handle: HookHandle) {
        self.on_success.retain(|(id, _)| *id != handle);
    }

    pub fn remove_on_failure(&mut self, handle: HookHandle) {
        self.on_failure.retain(|(id, _)| *id != handle);
    }

    fn next_hook_handle(&mut self) -> HookHandle {
        self.next_hook += 1;
        HookHandle(self.next_hook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{codes, Diagnostic};
    use crate::reference::ReferenceTable;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Scripted backend: fails whenever the rendered source mentions the
    /// word `broken`.
    struct StubBackend {
        references: ReferenceTable,
        report: CompileReport,
        generation: u64,
        soft_resets: u64,
    }

    impl StubBackend {
        fn new() -> Self {
            Self {
                references: ReferenceTable::new(),
                report: CompileReport::new(),
                generation: 0,
                soft_resets: 0,
            }
        }
    }

    impl CompilerService for StubBackend {
        fn compile_unit(&mut self, text: &str) -> Result<UnitHandle, EngineError> {
            self.report = CompileReport::new();
            self.generation += 1;
            if text.contains("broken") {
                self.report
                    .push(Diagnostic::error("<stub>", codes::COMPILE, "broken fragment"));
                let report = self.report.clone();
                self.soft_reset();
                return Err(EngineError::Compile(report));
            }
            Ok(UnitHandle::new(self.generation, text.to_string(), Vec::new()))
        }

        fn run(&mut self, _statement: &str) -> Result<(), EngineError> {
            Ok(())
        }

        fn reset(&mut self) {
            self.references.clear();
        }

        fn soft_reset(&mut self) {
            self.soft_resets += 1;
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

    #[test]
    fn failed_compile_keeps_fragment_store() {
        let mut registry = TypeRegistry::new(Box::new(StubBackend::new()));
        registry.upsert("Good", "{ a = 1 }");
        registry.upsert("Bad", "broken");

        assert!(registry.compile_all().is_err());
        assert!(registry.contains("Good"));
        assert!(registry.contains("Bad"));
        assert!(registry.last_unit().is_none());
    }

    #[test]
    fn failed_unit_check_is_a_compile_failure() {
        let successes = Rc::new(Cell::new(0u32));
        let failures = Rc::new(Cell::new(0u32));

        let mut registry = TypeRegistry::new(Box::new(StubBackend::new()));
        let s = Rc::clone(&successes);
        registry.add_on_success(Box::new(move |_| s.set(s.get() + 1)));
        let f = Rc::clone(&failures);
        registry.add_on_failure(Box::new(move |_| f.set(f.get() + 1)));

        registry.upsert("Ok", "{ a = 1 }");
        let err = registry
            .compile_all_with(|_| {
                Err(Diagnostic::error("<stub>", codes::COMPILE, "steps are not an array"))
            })
            .unwrap_err();

        assert!(matches!(err, EngineError::Compile(_)));
        assert_eq!((successes.get(), failures.get()), (0, 1));
        assert!(registry.last_report().has_errors());
        assert!(registry.last_unit().is_none());
    }

    #[test]
    fn exactly_one_hook_fires_per_attempt() {
        let successes = Rc::new(Cell::new(0u32));
        let failures = Rc::new(Cell::new(0u32));

        let mut registry = TypeRegistry::new(Box::new(StubBackend::new()));
        let s = Rc::clone(&successes);
        registry.add_on_success(Box::new(move |_| s.set(s.get() + 1)));
        let f = Rc::clone(&failures);
        registry.add_on_failure(Box::new(move |_| f.set(f.get() + 1)));

        registry.upsert("Ok", "{ a = 1 }");
        registry.compile_all().unwrap();
        registry.upsert("Bad", "broken");
        registry.compile_all().unwrap_err();

        assert_eq!(successes.get(), 1);
        assert_eq!(failures.get(), 1);
    }

    #[test]
    fn removed_hook_no_longer_fires() {
        let successes = Rc::new(Cell::new(0u32));
        let mut registry = TypeRegistry::new(Box::new(StubBackend::new()));
        let s = Rc::clone(&successes);
        let handle = registry.add_on_success(Box::new(move |_| s.set(s.get() + 1)));
        registry.remove_on_success(handle);

        registry.compile_all().unwrap();
        assert_eq!(successes.get(), 0);
    }

    #[test]
    fn upsert_replaces_and_returns_previous() {
        let mut registry = TypeRegistry::new(Box::new(StubBackend::new()));
        assert!(registry.upsert("T", "{ a = 1 }").is_none());
        assert_eq!(registry.upsert("T", "{ a = 2 }").as_deref(), Some("{ a = 1 }"));
        assert_eq!(registry.fragment_count(), 1);
    }

    #[test]
    fn remove_missing_fragment_is_noop() {
        let mut registry = TypeRegistry::new(Box::new(StubBackend::new()));
        assert!(registry.remove("ghost").is_none());
    }

    #[test]
    fn render_quotes_non_identifier_ids() {
        let mut registry = TypeRegistry::new(Box::new(StubBackend::new()));
        registry.upsert("weird id", "1");
        registry.upsert("plain", "2");
        let rendered = registry.render_unit_source();
        assert!(rendered.contains("\"weird id\" = (1)"));
        assert!(rendered.contains("plain = (2)"));
    }
}
