//! Runtime script compilation engine built on the Nickel evaluator.
//!
//! A host application submits fragments of source text at run time, has
//! them compiled into a single unit, and invokes the result, while
//! controlling which libraries are visible to submitted code through
//! `using <dotted-name>;` declarations.
//!
//! ```rust,ignore
//! use kiln_core::{EngineConfig, ScriptEngine};
//!
//! let mut engine = ScriptEngine::new(EngineConfig {
//!     library_roots: vec!["./lib".into()],
//! });
//!
//! engine.add_usings("using Core;")?;
//! let script = engine.compile_code("Core.add 20 22")?;
//! assert_eq!(script.execute()?, "42");
//! ```
//!
//! Compilation is incremental but atomic: the whole live fragment set is
//! compiled as one unit every time, and a failed attempt leaves both the
//! fragment store and the previously compiled unit untouched. See the
//! `kiln-remote` crate for running a full engine inside a disposable host
//! process whose teardown reclaims accumulated compilation memory.

pub mod backend;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod library;
pub mod nickel;
pub mod reference;
pub mod registry;
pub mod script;
pub mod usings;

pub use backend::{CompilerService, UnitHandle};
pub use diagnostics::{CompileReport, Diagnostic, Severity};
pub use engine::{EngineConfig, ScriptEngine};
pub use error::EngineError;
pub use library::{LibraryHandle, LibraryIndex, LibrarySource};
pub use reference::ReferenceTable;
pub use registry::{CompileHook, HookHandle, TypeRegistry};
pub use script::{CoroutineScript, Script, TypeDescriptor};
