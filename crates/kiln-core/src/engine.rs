//! The script engine facade.
//!
//! High-level operations over the fragment registry, the namespace
//! resolver and the compilation backend. One engine instance is driven by
//! exactly one logical caller at a time; every call completes fully on
//! the caller's thread before returning.

use crate::backend::CompilerService;
use crate::diagnostics::{codes, CompileReport, Diagnostic};
use crate::error::EngineError;
use crate::library::{self, LibraryIndex};
use crate::nickel::{self, NickelBackend};
use crate::registry::{CompileHook, HookHandle, TypeRegistry};
use crate::script::{CoroutineScript, Script, TypeDescriptor};
use crate::usings::{self, UsingTable};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Prefix of reserved fragment ids; rejected for user types.
const ENTRY_PREFIX: &str = "__kiln_entry_";

/// Engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directories scanned for `.ncl` libraries.
    pub library_roots: Vec<PathBuf>,
}

#[derive(Clone, Copy)]
enum EntryKind {
    Exec,
    Steps,
}

/// Compiles source text submitted at run time into invocable units.
///
/// Every successful recompile leaves the previous unit snapshot resident
/// as long as any script or descriptor still references it. Sustained use
/// therefore grows memory; recycling the engine (or the isolated host
/// process around it, see `kiln-remote`) is the way to reclaim it.
pub struct ScriptEngine {
    registry: TypeRegistry,
    usings: UsingTable,
    libraries: LibraryIndex,
    /// Per-engine counter for reserved entry-point ids. Monotonic and
    /// never reused, so two compiles of identical source cannot collide
    /// on entry identity.
    entry_counter: u64,
}

impl ScriptEngine {
    /// Creates an engine with the default Nickel backend.
    pub fn new(config: EngineConfig) -> Self {
        let backend = NickelBackend::new(config.library_roots.clone());
        Self::with_backend(Box::new(backend), config)
    }

    /// Creates an engine over a caller-provided compilation backend.
    pub fn with_backend(backend: Box<dyn CompilerService>, config: EngineConfig) -> Self {
        let mut registry = TypeRegistry::new(backend);
        // The bootstrap library is permanently referenced; it carries the
        // host API compiled code is always allowed to see.
        registry.reference_library(library::bootstrap());
        info!(roots = config.library_roots.len(), "script engine created");
        Self {
            registry,
            usings: UsingTable::new(),
            libraries: LibraryIndex::new(config.library_roots),
            entry_counter: 0,
        }
    }

    // Namespace visibility.

    /// Adds using directives; see [`UsingTable::add`] for the
    /// all-or-nothing batch policy.
    pub fn add_usings(&mut self, text: &str) -> Result<(), EngineError> {
        self.usings.add(text, &self.libraries, &mut self.registry)
    }

    /// Removes active using directives and replays the remaining session.
    pub fn remove_usings(&mut self, text: &str) -> Result<(), EngineError> {
        self.usings.remove(text, &mut self.registry)
    }

    /// Canonical text of every active using declaration.
    pub fn active_usings(&self) -> Vec<String> {
        self.usings.directive_texts()
    }

    /// Number of libraries currently visible to compiled code.
    pub fn reference_count(&self) -> usize {
        self.registry.reference_count()
    }

    /// Rescans the library roots for newly installed libraries.
    pub fn refresh_libraries(&mut self) {
        self.libraries.refresh();
    }

    // Compilation.

    /// Compiles classless code into an invocable script.
    ///
    /// The text becomes the immediate entry point of a generated fragment
    /// under a reserved id; the id is removed again after the attempt, so
    /// the entry point is never name-addressable by later code.
    pub fn compile_code(&mut self, code: &str) -> Result<Script, EngineError> {
        self.compile_entry(code, EntryKind::Exec)
    }

    /// Compiles coroutine code into a single-use lazy step sequence.
    pub fn compile_coroutine(&mut self, code: &str) -> Result<CoroutineScript, EngineError> {
        self.compile_entry(code, EntryKind::Steps)?.coroutine()
    }

    /// Compiles a named type fragment into the live unit.
    ///
    /// Replacing an existing id soft-resets the session first, so the
    /// stale type identity from the previous generation cannot leak into
    /// newly compiled code. A failed attempt restores the fragment store
    /// to its pre-call state.
    pub fn compile_type(&mut self, id: &str, code: &str) -> Result<TypeDescriptor, EngineError> {
        if !usings::is_identifier(id) || id.starts_with(ENTRY_PREFIX) {
            return Err(EngineError::InvalidFragmentId(id.to_string()));
        }

        if self.registry.contains(id) {
            debug!(id, "replacing existing type, rebuilding session");
            self.registry.soft_reset();
            self.update_usings()?;
        }

        let previous = self.registry.upsert(id, code);
        match self.registry.compile_all() {
            Ok(unit) => Ok(TypeDescriptor::new(id.to_string(), unit)),
            Err(err) => {
                match previous {
                    Some(old) => {
                        self.registry.upsert(id, &old);
                    }
                    None => {
                        self.registry.remove(id);
                    }
                }
                self.update_usings()?;
                Err(err)
            }
        }
    }

    /// Removes named types and rebuilds the session, guaranteeing the
    /// removed identities are unreachable from subsequently compiled code.
    pub fn remove_types(&mut self, ids: &[&str]) -> Result<(), EngineError> {
        for id in ids {
            self.registry.remove(id);
        }
        self.registry.soft_reset();
        self.update_usings()
    }

    /// Whether a type fragment is currently registered.
    pub fn has_type(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    pub fn type_count(&self) -> usize {
        self.registry.fragment_count()
    }

    /// Diagnostics of the most recent compile attempt.
    pub fn last_report(&self) -> &CompileReport {
        self.registry.last_report()
    }

    /// Full session reinitialization: fragments, references and usings.
    pub fn reset(&mut self) {
        self.registry.reset();
        self.usings.clear();
        self.registry.reference_library(library::bootstrap());
        info!("engine reset");
    }

    // Compile hooks, forwarded to the registry.

    pub fn add_on_success(&mut self, hook: CompileHook) -> HookHandle {
        self.registry.add_on_success(hook)
    }

    pub fn add_on_failure(&mut self, hook: CompileHook) -> HookHandle {
        self.registry.add_on_failure(hook)
    }

    pub fn remove_on_success(&mut self, handle: HookHandle) {
        self.registry.remove_on_success(handle);
    }

    pub fn remove_on_failure(&mut self, handle: HookHandle) {
        self.registry.remove_on_failure(handle);
    }

    fn compile_entry(&mut self, code: &str, kind: EntryKind) -> Result<Script, EngineError> {
        self.entry_counter += 1;
        let id = format!("{ENTRY_PREFIX}{}", self.entry_counter);
        let body = match kind {
            EntryKind::Exec => format!("{{ exec = ({code}), steps = [] }}"),
            EntryKind::Steps => format!("{{ exec = null, steps = ({code}) }}"),
        };

        self.registry.upsert(&id, &body);
        let result = match kind {
            EntryKind::Exec => self.registry.compile_all(),
            // A coroutine body that is not a step array fails the compile
            // attempt itself, so the failure hooks see it.
            EntryKind::Steps => self.registry.compile_all_with(|unit| {
                let expr = format!("std.array.length (({}).{id}.steps)", unit.source());
                match nickel::eval_unit_diag(unit, &expr) {
                    Ok(_) => Ok(()),
                    Err(diagnostic) => Err(Diagnostic::error(
                        format!("<kiln:unit:{}>", unit.generation()),
                        codes::COMPILE,
                        format!("coroutine body is not a step array\n{}", diagnostic.message),
                    )),
                }
            }),
        };
        // The reserved id is removed regardless of outcome, so it is
        // never addressable by later compiles.
        self.registry.remove(&id);

        match result {
            Ok(unit) => Ok(Script::new(unit, id)),
            Err(err) => {
                self.update_usings()?;
                Err(err)
            }
        }
    }

    /// Replays the accepted using declarations into a rebuilt session.
    fn update_usings(&mut self) -> Result<(), EngineError> {
        self.usings.replay(&mut self.registry)
    }
}
