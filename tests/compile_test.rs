//! End-to-end scenarios: build the CFG from a typed AST, emit IR, and check
//! the structures the historical regressions hinged on.

mod common;

use basc::ast::{BinaryOp, Expr, JumpTarget, PrintItem, PrintSep, Program, Stmt, StmtKind};
use basc::cfg::{verify_cfg, CfgBuilder, EdgeType};
use basc::emit::{EmitOptions, Emitter};
use basc::symbols::{BasicType, SymbolTable};

use common::*;

fn emit(program: &Program) -> String {
    let pcfg = CfgBuilder::build_program(program).expect("build");
    let emitter = Emitter::new(program, &pcfg, EmitOptions::default());
    emitter.emit_program().ir
}

/// GOSUB inside a multi-line IF: the RETURN must land on the statement
/// after the GOSUB, not after END IF.
#[test]
fn gosub_inside_if_returns_after_gosub() {
    let statements = vec![
        let_var(10, "X", int(1)),
        if_then(
            20,
            binop(BinaryOp::Eq, var("X"), int(1)),
            vec![print_str(30, "A"), gosub(40, 100), print_str(50, "B")],
        ),
        print_str(70, "C"),
        end(80),
        print_str(100, "S"),
        ret(110),
    ];
    let program = program_with_ints(statements, &["X"]);
    let pcfg = CfgBuilder::build_program(&program).unwrap();
    let main = &pcfg.main;
    assert!(verify_cfg(main).is_empty());

    // The continuation is the block that starts at line 50, not line 70.
    let line50 = main.line_to_block[&50];
    let line70 = main.line_to_block[&70];
    assert!(main.gosub_return_blocks.contains(&line50));
    assert!(!main.gosub_return_blocks.contains(&line70));

    // The call edge targets the subroutine entry at line 100.
    let call = main
        .edges
        .iter()
        .find(|e| e.kind == EdgeType::Call)
        .expect("call edge");
    assert_eq!(call.to, main.line_to_block[&100]);

    // The emitted dispatch only tests the registered continuation.
    let ir = emit(&program);
    assert!(ir.contains("ceqw %t"), "return dispatch missing");
    assert!(ir.contains("gosub_return_sp"));
    assert!(ir.contains(&format!("jmp @b{}", line50)) || ir.contains(&format!("@b{},", line50)));
}

/// FOR with EXIT FOR inside an IF: the EXIT block jumps straight to the
/// loop's exit block.
#[test]
fn for_with_exit_inside_if() {
    let statements = vec![
        let_var(10, "F", int(0)),
        for_loop(
            20,
            "K",
            int(1),
            int(100),
            vec![if_then(
                30,
                binop(BinaryOp::Gt, binop(BinaryOp::Mul, var("K"), var("K")), int(50)),
                vec![
                    let_var(40, "F", var("K")),
                    stmt(
                        50,
                        StmtKind::Exit {
                            kind: basc::ast::ExitKind::For,
                        },
                    ),
                ],
            )],
            70,
        ),
        print_var(80, "F"),
    ];
    let program = program_with_ints(statements, &["F", "K"]);
    let pcfg = CfgBuilder::build_program(&program).unwrap();
    let main = &pcfg.main;
    assert!(verify_cfg(main).is_empty());

    let info = &main.loops[0];
    // The EXIT's block has exactly one out-edge, targeting the FOR exit.
    let exit_block = main.line_to_block[&50];
    let out = main.out_edges(exit_block);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind, EdgeType::Jump);
    assert_eq!(out[0].to, info.exit);

    // Exactly one allocation triple in the init block, one step addition.
    let ir = emit(&program);
    let header = info.header;
    assert_eq!(
        ir.matches(&format!("%f{}_var =l alloc4 4", header)).count(),
        1
    );
    assert_eq!(
        ir.matches(&format!("%f{}_limit =l alloc4 4", header)).count(),
        1
    );
    assert_eq!(
        ir.matches(&format!("%f{}_step =l alloc4 4", header)).count(),
        1
    );
}

/// Nested FOR loops: EXIT FOR in the inner loop exits the inner loop only.
#[test]
fn nested_for_exit_inner_only() {
    let inner = for_loop(
        20,
        "J",
        int(1),
        int(5),
        vec![if_then(
            30,
            binop(BinaryOp::Eq, var("J"), int(3)),
            vec![stmt(
                40,
                StmtKind::Exit {
                    kind: basc::ast::ExitKind::For,
                },
            )],
        )],
        50,
    );
    let statements = vec![for_loop(10, "I", int(1), int(3), vec![inner], 60)];
    let program = program_with_ints(statements, &["I", "J"]);
    let pcfg = CfgBuilder::build_program(&program).unwrap();
    let main = &pcfg.main;
    assert!(verify_cfg(main).is_empty());

    // Inner loop closes first, so it is loops[0].
    assert_eq!(main.loops.len(), 2);
    let inner_info = &main.loops[0];
    let outer_info = &main.loops[1];
    assert_ne!(inner_info.exit, outer_info.exit);

    let exit_block = main.line_to_block[&40];
    let out = main.out_edges(exit_block);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].to, inner_info.exit);

    // The inner exit continues into the outer increment, not out of the
    // outer loop.
    let inner_exit_out = main.out_edges(inner_info.exit);
    assert_eq!(inner_exit_out.len(), 1);
    assert_eq!(inner_exit_out[0].to, outer_info.increment.unwrap());
}

/// ON n GOSUB with an out-of-range selector falls through to the next
/// statement without calling either subroutine.
#[test]
fn on_gosub_out_of_range_falls_through() {
    let statements = vec![
        stmt(
            10,
            StmtKind::OnGosub {
                selector: int(3),
                targets: vec![JumpTarget::Line(100), JumpTarget::Line(200)],
            },
        ),
        print_str(20, "after"),
        end(30),
        print_str(100, "one"),
        ret(110),
        print_str(200, "two"),
        ret(210),
    ];
    let program = program_with_ints(statements, &[]);
    let pcfg = CfgBuilder::build_program(&program).unwrap();
    let main = &pcfg.main;
    assert!(verify_cfg(main).is_empty());

    let dispatch = main.line_to_block[&10];
    let out = main.out_edges(dispatch);
    let calls: Vec<_> = out.iter().filter(|e| e.kind == EdgeType::Call).collect();
    assert_eq!(calls.len(), 2);
    let ft = out
        .iter()
        .find(|e| e.kind == EdgeType::Fallthrough)
        .expect("fallthrough");
    assert_eq!(ft.to, main.line_to_block[&20]);
    assert!(main.gosub_return_blocks.contains(&ft.to));

    // The emitted chain compares the selector against 1 and 2 and falls
    // through past both.
    let ir = emit(&program);
    assert!(ir.contains(", 1\n") || ir.contains(", 1"), "selector compare against 1");
    assert!(ir.contains(&format!("jmp @b{}", ft.to)));
}

/// REPEAT/UNTIL in the ELSE arm of an IF terminates: the condition block
/// carries a paired conditional out-edge set, one of which leaves the loop.
#[test]
fn repeat_inside_else_terminates() {
    let statements = vec![if_else(
        10,
        binop(BinaryOp::Eq, var("X"), int(0)),
        vec![print_str(20, "zero")],
        vec![
            stmt(
                30,
                StmtKind::Repeat {
                    body: vec![let_var(40, "X", binop(BinaryOp::Sub, var("X"), int(1)))],
                    until: binop(BinaryOp::Eq, var("X"), int(0)),
                },
            ),
            print_str(50, "done"),
        ],
    )];
    let program = program_with_ints(statements, &["X"]);
    let pcfg = CfgBuilder::build_program(&program).unwrap();
    let main = &pcfg.main;
    assert!(verify_cfg(main).is_empty());

    let info = &main.loops[0];
    // Condition block: one back-edge into the body, one edge out.
    let cond_block = main
        .edges
        .iter()
        .find(|e| e.to == info.header && e.kind == EdgeType::FalseBranch)
        .map(|e| e.from)
        .expect("back-edge from the condition block");
    let out = main.out_edges(cond_block);
    assert_eq!(out.len(), 2);
    assert!(out.iter().any(|e| e.to == info.header));
    assert!(out.iter().any(|e| e.to == info.exit));

    // PRINT "done" lands in the loop's exit block, which joins the merge.
    assert_eq!(main.line_to_block[&50], info.exit);
    let exit_out = main.out_edges(info.exit);
    assert_eq!(exit_out.len(), 1);
    assert_eq!(exit_out[0].kind, EdgeType::Fallthrough);
}

/// REDIM PRESERVE growth keeps contents; plain REDIM zero-initializes
/// under the default options.
#[test]
fn redim_preserve_and_zeroing() {
    let mut symbols = SymbolTable::default();
    symbols.global_array("A", BasicType::Integer, &[2]);
    let statements = vec![
        stmt(
            10,
            StmtKind::Dim {
                name: "A".to_string(),
                bounds: vec![int(2)],
            },
        ),
        let_elem(20, "A", int(0), int(10)),
        let_elem(30, "A", int(1), int(20)),
        stmt(
            40,
            StmtKind::Redim {
                name: "A".to_string(),
                bounds: vec![int(4)],
                preserve: true,
            },
        ),
        stmt(
            50,
            StmtKind::Redim {
                name: "A".to_string(),
                bounds: vec![int(4)],
                preserve: false,
            },
        ),
    ];
    let program = Program {
        statements,
        symbols,
    };
    let ir = emit(&program);

    assert!(ir.contains("call $array_new(w 37, w 1, w 2, w 0, w 0)"));
    // PRESERVE: preserve=1, zero=0.
    assert!(ir.contains("call $array_redim(l %t"));
    assert!(ir.contains(", w 1, w 0, w 1, w 4, w 0)"));
    // Plain REDIM under default options: preserve=0, zero=1.
    assert!(ir.contains(", w 0, w 1, w 1, w 4, w 0)"));
    assert!(ir.contains("call $array_get_address(l %t"));
}

/// Empty program: one block, `ret 0`.
#[test]
fn empty_program_emits_ret_zero() {
    let program = program_with_ints(vec![], &[]);
    let pcfg = CfgBuilder::build_program(&program).unwrap();
    assert_eq!(pcfg.main.blocks.len(), 1);
    let ir = emit(&program);
    assert!(ir.contains("export function w $main() {"));
    assert!(ir.contains("\tret 0"));
}

/// Emission is deterministic: same AST, byte-identical IR.
#[test]
fn emission_is_idempotent() {
    let statements = vec![
        let_var(10, "X", int(5)),
        for_loop(
            20,
            "K",
            int(1),
            var("X"),
            vec![print_var(30, "K")],
            40,
        ),
        print_str(50, "done"),
        end(60),
    ];
    let program = program_with_ints(statements, &["X", "K"]);
    let first = emit(&program);
    let second = emit(&program);
    assert_eq!(first, second);
}

/// String assignment follows the retain/store/release protocol, releasing
/// the old value only after the store.
#[test]
fn string_assignment_refcount_protocol() {
    let mut symbols = SymbolTable::default();
    symbols.global_scalar("S$", BasicType::Str);
    let program = Program {
        statements: vec![stmt(
            10,
            StmtKind::Let {
                target: basc::ast::Target::Var("S$".to_string()),
                value: Expr::StringLit("hi".to_string()),
            },
        )],
        symbols,
    };
    let ir = emit(&program);
    let retain = ir.find("call $string_retain").expect("retain");
    let store = ir.find("storel %t").expect("store");
    let release = ir.find("call $string_release").expect("release");
    assert!(retain < store, "retain must precede the store");
    assert!(store < release, "release must follow the store");
}

/// PRINT separators: comma advances to a tab stop, trailing semicolon
/// suppresses the newline.
#[test]
fn print_separators() {
    let statements = vec![stmt(
        10,
        StmtKind::Print {
            items: vec![
                PrintItem {
                    expr: var("A"),
                    sep: PrintSep::Comma,
                },
                PrintItem {
                    expr: var("B"),
                    sep: PrintSep::Semicolon,
                },
            ],
        },
    )];
    let program = program_with_ints(statements, &["A", "B"]);
    let ir = emit(&program);
    assert!(ir.contains("call $print_tab()"));
    assert!(!ir.contains("call $print_newline()"));
}

/// User SUB and FUNCTION bodies become their own IR functions; calls are
/// direct with floats widened to d.
#[test]
fn functions_emit_direct_calls() {
    let mut symbols = SymbolTable::default();
    symbols.global_scalar("R", BasicType::Double);
    symbols.functions.push(basc::symbols::FunctionSig {
        name: "Area".to_string(),
        params: vec![basc::symbols::Param {
            name: "X".to_string(),
            ty: BasicType::Single,
        }],
        ret: Some(BasicType::Double),
    });
    symbols.define_var(basc::symbols::VarRecord {
        name: "X".to_string(),
        ty: BasicType::Single,
        scope: basc::symbols::VarScope::Local {
            owner: "Area".to_string(),
        },
        array: None,
        is_param: true,
    });
    let program = Program {
        statements: vec![
            let_var(
                10,
                "R",
                Expr::Call {
                    name: "Area".to_string(),
                    args: vec![Expr::FloatLit(2.0)],
                },
            ),
            end(20),
            Stmt::new(
                None,
                StmtKind::Function {
                    name: "Area".to_string(),
                    params: vec!["X".to_string()],
                    body: vec![let_var(100, "Area", var("X"))],
                },
            ),
        ],
        symbols,
    };
    let ir = emit(&program);
    // The Single parameter is declared at d width and truncated inside.
    assert!(ir.contains("function d $f_area(d %p_x) {"));
    assert!(ir.contains("truncd %p_x"));
    assert!(ir.contains("call $f_area(d "));
}
