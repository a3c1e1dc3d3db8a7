//! End-to-end runs of the `nelli-opt` binary.

use std::io::Write;
use std::process::{Command, Stdio};

const MODULE: &str = "core.module @m {
  func.func @f(%0: core.index) -> core.index {
    %1 = arith.constant {value = 2} : core.index
    %2 = arith.constant {value = 3} : core.index
    %3 = arith.muli %1, %2 : core.index
    %4 = arith.addi %0, %3 : core.index
    func.return %4
  }
}
";

fn nelli_opt() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nelli-opt"))
}

#[test]
fn canonicalizes_a_file_into_an_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.mlir");
    let output = dir.path().join("out.mlir");
    std::fs::write(&input, MODULE).unwrap();

    let status = nelli_opt()
        .arg(&input)
        .args(["--apply-patterns", "canonicalization", "-o"])
        .arg(&output)
        .status()
        .unwrap();
    assert!(status.success());

    insta::assert_snapshot!(std::fs::read_to_string(&output).unwrap(), @r"
    core.module @m {
      func.func @f(%0: core.index) -> core.index {
        %1 = arith.constant {value = 6} : core.index
        %2 = arith.addi %0, %1 : core.index
        func.return %2
      }
    }
    ");
}

#[test]
fn reads_stdin_and_writes_stdout() {
    let mut child = nelli_opt()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(MODULE.as_bytes())
        .unwrap();
    let out = child.wait_with_output().unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap(), MODULE);
}

#[test]
fn malformed_input_fails() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "core.module @m {").unwrap();
    let out = nelli_opt().arg(file.path()).output().unwrap();
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
}

#[test]
fn missing_input_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = nelli_opt()
        .arg(dir.path().join("absent.mlir"))
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("cannot read"));
}
