//! Include Host Boundary
//!
//! `include "path"` is an immediate word: the compiler asks the host to
//! resolve the path to a canonical key plus source text and compiles that
//! source in place. Canonical keys drive pragma-once deduplication — a path
//! is marked before its source compiles, so a transitive include that loops
//! back is a no-op and both files' definitions still materialize.

use std::path::{Path, PathBuf};

use tacit_core::ErrorKind;

/// A resolved include: the deduplication key and the file's source text.
pub struct Resolved {
    pub canonical: PathBuf,
    pub source: String,
}

pub trait IncludeHost {
    /// Resolve `path` as written in the source, relative to the file
    /// currently being compiled (`from`), into a canonical key and the
    /// source text behind it.
    fn resolve(&mut self, path: &str, from: Option<&Path>) -> Result<Resolved, ErrorKind>;
}

/// Host for embeddings without a filesystem: every include fails.
pub struct NullHost;

impl IncludeHost for NullHost {
    fn resolve(&mut self, path: &str, _from: Option<&Path>) -> Result<Resolved, ErrorKind> {
        Err(ErrorKind::SyntaxError(format!(
            "include \"{path}\": no include host available"
        )))
    }
}
