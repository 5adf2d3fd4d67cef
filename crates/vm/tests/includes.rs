//! Include-host behavior: relative resolution, pragma-once, circular
//! includes settling with both files defined.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use tacit_vm::{ErrorKind, IncludeHost, Resolved, Vm};

/// Filesystem host rooted at a directory, resolving relative to the
/// including file when there is one.
struct DirHost {
    root: PathBuf,
}

impl IncludeHost for DirHost {
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

fn fixture(files: &[(&str, &str)]) -> (TempDir, DirHost) {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    let host = DirHost {
        root: dir.path().to_path_buf(),
    };
    (dir, host)
}

fn top_number(vm: &Vm) -> f32 {
    vm.stack_snapshot().last().unwrap().to_number().unwrap()
}

#[test]
fn include_defines_words() {
    let (_dir, mut host) = fixture(&[("util.tacit", ": triple dup dup add add ;\n")]);
    let mut vm = Vm::new().unwrap();
    vm.interpret_with_host("include \"util.tacit\" 5 triple", &mut host)
        .unwrap();
    assert_eq!(top_number(&vm), 15.0);
}

#[test]
fn include_is_pragma_once() {
    let (_dir, mut host) = fixture(&[("util.tacit", ": once 1 ;\n")]);
    let mut vm = Vm::new().unwrap();
    // A second include of the same canonical path must not re-compile the
    // file (re-definition would be refused).
    vm.interpret_with_host(
        "include \"util.tacit\" include \"util.tacit\" once",
        &mut host,
    )
    .unwrap();
    assert_eq!(top_number(&vm), 1.0);
}

#[test]
fn circular_includes_settle() {
    let (_dir, mut host) = fixture(&[
        ("a.tacit", "include \"b.tacit\"\n: from-a 1 ;\n"),
        ("b.tacit", "include \"a.tacit\"\n: from-b 2 ;\n"),
    ]);
    let mut vm = Vm::new().unwrap();
    vm.interpret_with_host("include \"a.tacit\"", &mut host)
        .unwrap();
    // Re-entry was a no-op, and both files' definitions exist.
    vm.interpret_with_host("from-a from-b add", &mut host).unwrap();
    assert_eq!(top_number(&vm), 3.0);
}

#[test]
fn nested_includes_resolve_relative_to_the_including_file() {
    let (_dir, mut host) = fixture(&[
        ("sub/outer.tacit", "include \"inner.tacit\"\n: outer inner 1 add ;\n"),
        ("sub/inner.tacit", ": inner 10 ;\n"),
    ]);
    let mut vm = Vm::new().unwrap();
    vm.interpret_with_host("include \"sub/outer.tacit\" outer", &mut host)
        .unwrap();
    assert_eq!(top_number(&vm), 11.0);
}

#[test]
fn missing_include_is_a_compile_error() {
    let (_dir, mut host) = fixture(&[]);
    let mut vm = Vm::new().unwrap();
    let err = vm
        .interpret_with_host("include \"nope.tacit\"", &mut host)
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::SyntaxError(_)));
}

#[test]
fn include_without_host_fails() {
    let mut vm = Vm::new().unwrap();
    let err = vm.interpret("include \"anything.tacit\"").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::SyntaxError(_)));
}

#[test]
fn unclosed_definition_inside_include_is_reported() {
    let (_dir, mut host) = fixture(&[("bad.tacit", ": broken dup\n")]);
    let mut vm = Vm::new().unwrap();
    let err = vm
        .interpret_with_host("include \"bad.tacit\"", &mut host)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnclosedDefinition("broken".into()));
}
