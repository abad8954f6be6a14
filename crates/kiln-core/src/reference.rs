//! The set of libraries visible to compiled code.

use crate::library::{LibraryHandle, LibrarySource};
use tracing::debug;

/// Unique library handles currently referenced by the backend session.
///
/// The table grows monotonically except on a full reset; adding a handle
/// twice is a no-op. The Nickel standard library is implicitly visible to
/// every unit and never appears here, and compiled units themselves are
/// not libraries, so they cannot be added either.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: Vec<LibraryHandle>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a library. Returns `false` when it was already referenced.
    pub fn add(&mut self, library: LibraryHandle) -> bool {
        if self.contains(&library) {
            return false;
        }
        debug!(library = %library.name, "referencing library");
        self.entries.push(library);
        true
    }

    pub fn contains(&self, library: &LibraryHandle) -> bool {
        self.entries.iter().any(|entry| entry == library)
    }

    /// Looks a referenced library up by its dotted name.
    pub fn find(&self, name: &str) -> Option<&LibraryHandle> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn bootstrap(&self) -> Option<&LibraryHandle> {
        self.entries
            .iter()
            .find(|entry| entry.source == LibrarySource::Builtin)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LibraryHandle> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library;
    use std::path::PathBuf;

    fn file_handle(name: &str) -> LibraryHandle {
        LibraryHandle {
            name: name.to_string(),
            source: LibrarySource::File(PathBuf::from(format!("/lib/{name}.ncl"))),
        }
    }

    #[test]
    fn duplicate_add_is_noop() {
        let mut table = ReferenceTable::new();
        assert!(table.add(file_handle("Core")));
        assert!(!table.add(file_handle("Core")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn find_by_name() {
        let mut table = ReferenceTable::new();
        table.add(library::bootstrap());
        table.add(file_handle("Devtools.Math"));

        assert!(table.find("Devtools.Math").is_some());
        assert!(table.find("Devtools").is_none());
        assert_eq!(table.bootstrap(), table.find(library::BOOTSTRAP_NAME));
    }
}
