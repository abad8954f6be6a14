//! Handles to compiled entry points.

use crate::backend::UnitHandle;
use crate::error::EngineError;
use crate::nickel;
use tracing::trace;

/// A compiled, invocable script.
///
/// Holds a snapshot of the unit it was compiled into, so it stays
/// invocable even after later failed compiles, soft resets or type
/// removals. Execution forces the entry-point expression in a fresh
/// evaluation of that snapshot and renders the resulting value.
#[derive(Debug, Clone)]
pub struct Script {
    unit: UnitHandle,
    entry: String,
}

impl Script {
    pub(crate) fn new(unit: UnitHandle, entry: String) -> Self {
        Self { unit, entry }
    }

    /// The reserved registry id this script was compiled under.
    pub fn entry_id(&self) -> &str {
        &self.entry
    }

    /// Generation of the unit this script belongs to.
    pub fn generation(&self) -> u64 {
        self.unit.generation()
    }

    /// Runs the immediate entry point and renders its value.
    pub fn execute(&self) -> Result<String, EngineError> {
        trace!(entry = %self.entry, "executing script");
        let expr = format!("({}).{}.exec", self.unit.source(), self.entry);
        nickel::eval_unit_expr(&self.unit, &expr)
    }

    /// The lazy-sequence entry point of this script.
    ///
    /// Evaluating the step count forces the step array's spine, so this
    /// can fail with a runtime fault even though the script compiled.
    pub fn coroutine(&self) -> Result<CoroutineScript, EngineError> {
        let expr = format!(
            "std.array.length (({}).{}.steps)",
            self.unit.source(),
            self.entry
        );
        let rendered = nickel::eval_unit_expr(&self.unit, &expr)?;
        let len: u64 = rendered.trim().parse().map_err(|_| {
            EngineError::Runtime(format!("step count evaluated to `{rendered}`, not a number"))
        })?;
        Ok(CoroutineScript {
            unit: self.unit.clone(),
            entry: self.entry.clone(),
            len,
            index: 0,
        })
    }
}

/// A single-use lazy sequence of cooperative resumption steps.
///
/// Each call to [`Iterator::next`] forces exactly one step; the host owns
/// pacing, and stopping early is simply ceasing to request further steps.
/// The sequence is not restartable: once exhausted, it stays exhausted.
#[derive(Debug)]
pub struct CoroutineScript {
    unit: UnitHandle,
    entry: String,
    len: u64,
    index: u64,
}

impl CoroutineScript {
    /// Steps remaining before exhaustion.
    pub fn remaining(&self) -> u64 {
        self.len - self.index
    }
}

impl Iterator for CoroutineScript {
    type Item = Result<String, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.len {
            return None;
        }
        let expr = format!(
            "std.array.at {} (({}).{}.steps)",
            self.index,
            self.unit.source(),
            self.entry
        );
        self.index += 1;
        trace!(entry = %self.entry, step = self.index, "forcing coroutine step");
        Some(nickel::eval_unit_expr(&self.unit, &expr))
    }
}

/// Descriptor of a successfully compiled named type.
///
/// A recompile under the same id always produces a descriptor with a new
/// generation: type identity is per compile, not per id.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    id: String,
    unit: UnitHandle,
}

impl TypeDescriptor {
    pub(crate) fn new(id: String, unit: UnitHandle) -> Self {
        Self { id, unit }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.unit.generation()
    }

    /// Renders the type's compiled value from its unit snapshot.
    pub fn render(&self) -> Result<String, EngineError> {
        let expr = format!("({}).{}", self.unit.source(), self.id);
        nickel::eval_unit_expr(&self.unit, &expr)
    }
}
