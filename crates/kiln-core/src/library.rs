//! Library discovery and namespace-to-library resolution.
//!
//! A library is a Nickel module: either a `.ncl` file found under one of
//! the engine's library roots, or the built-in bootstrap record exposing
//! the host API. File libraries are named after their root-relative path,
//! so `Devtools/Math.ncl` becomes the library `Devtools.Math`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Dotted name the bootstrap library is bound under.
pub const BOOTSTRAP_NAME: &str = "kiln";

/// Namespaces exported by the bootstrap library, exact-match resolvable.
pub const BOOTSTRAP_NAMESPACES: &[&str] = &["kiln", "kiln.host"];

/// The embedded host API, always referenced by a fresh engine.
pub const BOOTSTRAP_SOURCE: &str = r#"{
  host = {
    engine = "kiln",
    log = fun msg => std.trace msg msg,
    render = fun value => std.serialize 'Json value,
  },
}"#;

/// Where a library's source lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySource {
    /// The embedded bootstrap record.
    Builtin,
    /// A `.ncl` file under one of the configured roots.
    File(PathBuf),
}

/// A resolved, referenceable library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryHandle {
    /// Dotted library name, e.g. `Devtools.Math`.
    pub name: String,
    pub source: LibrarySource,
}

/// Handle to the bootstrap library.
pub fn bootstrap() -> LibraryHandle {
    LibraryHandle {
        name: BOOTSTRAP_NAME.to_string(),
        source: LibrarySource::Builtin,
    }
}

/// Index of every library discoverable by the engine.
#[derive(Debug)]
pub struct LibraryIndex {
    roots: Vec<PathBuf>,
    entries: BTreeMap<String, LibraryHandle>,
}

impl LibraryIndex {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let mut index = Self {
            roots,
            entries: BTreeMap::new(),
        };
        index.refresh();
        index
    }

    /// Rescans the library roots, picking up newly installed libraries.
    pub fn refresh(&mut self) {
        self.entries.clear();
        for root in &self.roots {
            for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("ncl") {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                let Some(name) = library_name(relative) else {
                    warn!(path = %path.display(), "skipping library with unusable name");
                    continue;
                };
                self.entries.insert(
                    name.clone(),
                    LibraryHandle {
                        name,
                        source: LibrarySource::File(path.to_path_buf()),
                    },
                );
            }
        }
        debug!(libraries = self.entries.len(), "library index refreshed");
    }

    /// Resolves a using-directive namespace to a library.
    ///
    /// First checks whether the bootstrap library exports the namespace
    /// exactly. Otherwise the dotted name is treated as a library name and
    /// searched from the full path down to its first segment; the longest
    /// remaining prefix naming an indexed library wins.
    pub fn resolve(&self, namespace: &str) -> Option<LibraryHandle> {
        if BOOTSTRAP_NAMESPACES.contains(&namespace) {
            debug!(namespace, "resolved to bootstrap library");
            return Some(bootstrap());
        }

        let segments: Vec<&str> = namespace.split('.').collect();
        for end in (1..=segments.len()).rev() {
            let prefix = segments[..end].join(".");
            if let Some(handle) = self.entries.get(&prefix) {
                debug!(namespace, library = %handle.name, "resolved by prefix search");
                return Some(handle.clone());
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps a root-relative path like `Devtools/Math.ncl` to `Devtools.Math`.
///
/// Every path component must be a plain identifier, otherwise the file
/// cannot be bound in compiled code and is not indexed.
fn library_name(relative: &std::path::Path) -> Option<String> {
    let mut segments = Vec::new();
    for component in relative.with_extension("").components() {
        let segment = component.as_os_str().to_str()?;
        if !crate::usings::is_identifier(segment) {
            return None;
        }
        segments.push(segment.to_string());
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("."))
    }
}
