//! CLI smoke tests: drive the basc binary end-to-end over a temp dir.
//!
//! These verify argument parsing, the JSON AST boundary, exit codes, and
//! that the IR file is produced only on success.

mod common;

use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

use basc::ast::{JumpTarget, Program, StmtKind};

use common::*;

struct TestContext {
    basc_bin: PathBuf,
    dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let basc_bin = PathBuf::from(env!("CARGO_BIN_EXE_basc"));
        TestContext {
            basc_bin,
            dir: TempDir::new().unwrap(),
        }
    }

    fn write_ast(&self, name: &str, program: &Program) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, serde_json::to_string(program).unwrap()).unwrap();
        path
    }

    fn run(&self, args: &[&str]) -> std::process::Output {
        Command::new(&self.basc_bin)
            .args(args)
            .output()
            .expect("failed to run basc")
    }
}

fn sample_program() -> Program {
    program_with_ints(
        vec![
            let_var(10, "X", int(1)),
            if_then(
                20,
                binop(basc::ast::BinaryOp::Eq, var("X"), int(1)),
                vec![print_str(30, "A"), gosub(40, 100), print_str(50, "B")],
            ),
            print_str(70, "C"),
            end(80),
            print_str(100, "S"),
            ret(110),
        ],
        &["X"],
    )
}

#[test]
fn compile_writes_ir_file() {
    let ctx = TestContext::new();
    let ast = ctx.write_ast("prog.json", &sample_program());
    let out = ctx.dir.path().join("prog.ssa");

    let result = ctx.run(&[
        "compile",
        ast.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
    ]);
    assert!(result.status.success(), "stderr: {}", String::from_utf8_lossy(&result.stderr));

    let ir = std::fs::read_to_string(&out).unwrap();
    assert!(ir.contains("export function w $main() {"));
    assert!(ir.contains("data $gosub_return_stack"));
}

#[test]
fn compile_fails_on_unresolved_goto() {
    let ctx = TestContext::new();
    let program = program_with_ints(
        vec![stmt(
            10,
            StmtKind::Goto {
                target: JumpTarget::Line(999),
            },
        )],
        &[],
    );
    let ast = ctx.write_ast("bad.json", &program);
    let out = ctx.dir.path().join("bad.ssa");

    let result = ctx.run(&[
        "compile",
        ast.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
    ]);
    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("999"), "stderr: {}", stderr);
    // The IR file is produced only on full success.
    assert!(!out.exists());
}

#[test]
fn cfg_exports_dot() {
    let ctx = TestContext::new();
    let ast = ctx.write_ast("prog.json", &sample_program());

    let result = ctx.run(&["cfg", ast.to_str().unwrap(), "--format", "dot"]);
    assert!(result.status.success());
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.starts_with("digraph \"main\" {"));
    assert!(stdout.contains("color=green"));
}

#[test]
fn check_reports_unreachable_code() {
    let ctx = TestContext::new();
    let program = program_with_ints(
        vec![
            let_var(10, "A", int(1)),
            end(20),
            let_var(30, "B", int(2)),
        ],
        &["A", "B"],
    );
    let ast = ctx.write_ast("dead.json", &program);

    let result = ctx.run(&["--output", "json", "check", ast.to_str().unwrap()]);
    assert!(result.status.success(), "unreachable code is not fatal");
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("\"unreachable\""));
}

#[test]
fn malformed_json_is_rejected() {
    let ctx = TestContext::new();
    let path = ctx.dir.path().join("garbage.json");
    std::fs::write(&path, "not json").unwrap();

    let result = ctx.run(&["compile", path.to_str().unwrap()]);
    assert!(!result.status.success());
}
