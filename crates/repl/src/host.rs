//! Filesystem include host.
//!
//! Paths resolve relative to the file being compiled when there is one,
//! otherwise relative to the host's root (the directory of the script being
//! run, or the working directory in the REPL). Canonicalized paths are the
//! pragma-once keys.

use std::fs;
use std::path::{Path, PathBuf};

use tacit_vm::{ErrorKind, IncludeHost, Resolved};

pub struct FsHost {
    root: PathBuf,
}

impl FsHost {
    pub fn new(root: PathBuf) -> Self {
        FsHost { root }
    }
}

impl IncludeHost for FsHost {
    fn resolve(&mut self, path: &str, from: Option<&Path>) -> Result<Resolved, ErrorKind> {
        let base = from
            .and_then(|f| f.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        let full = base.join(path);
        let canonical = full
            .canonicalize()
            .map_err(|e| ErrorKind::SyntaxError(format!("include \"{path}\": {e}")))?;
        let source = fs::read_to_string(&canonical)
            .map_err(|e| ErrorKind::SyntaxError(format!("include \"{path}\": {e}")))?;
        Ok(Resolved { canonical, source })
    }
}
