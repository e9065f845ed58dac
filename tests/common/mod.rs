//! Shared AST builders for integration tests
//!
//! The front-end is an external collaborator, so tests construct the typed
//! AST directly, the same way it would arrive over the JSON boundary.

#![allow(dead_code)]

use basc::ast::{
    BinaryOp, Expr, JumpTarget, PrintItem, PrintSep, Program, Stmt, StmtKind, Target,
};
use basc::symbols::{BasicType, SymbolTable};

pub fn stmt(line: u32, kind: StmtKind) -> Stmt {
    Stmt::new(Some(line), kind)
}

pub fn int(v: i64) -> Expr {
    Expr::IntLit(v)
}

pub fn var(name: &str) -> Expr {
    Expr::Var(name.to_string())
}

pub fn binop(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn let_var(line: u32, name: &str, value: Expr) -> Stmt {
    stmt(
        line,
        StmtKind::Let {
            target: Target::Var(name.to_string()),
            value,
        },
    )
}

pub fn let_elem(line: u32, name: &str, index: Expr, value: Expr) -> Stmt {
    stmt(
        line,
        StmtKind::Let {
            target: Target::ArrayElem {
                name: name.to_string(),
                indices: vec![index],
            },
            value,
        },
    )
}

pub fn print_str(line: u32, text: &str) -> Stmt {
    stmt(
        line,
        StmtKind::Print {
            items: vec![PrintItem {
                expr: Expr::StringLit(text.to_string()),
                sep: PrintSep::End,
            }],
        },
    )
}

pub fn print_var(line: u32, name: &str) -> Stmt {
    stmt(
        line,
        StmtKind::Print {
            items: vec![PrintItem {
                expr: var(name),
                sep: PrintSep::End,
            }],
        },
    )
}

pub fn goto(line: u32, target: u32) -> Stmt {
    stmt(
        line,
        StmtKind::Goto {
            target: JumpTarget::Line(target),
        },
    )
}

pub fn gosub(line: u32, target: u32) -> Stmt {
    stmt(
        line,
        StmtKind::Gosub {
            target: JumpTarget::Line(target),
        },
    )
}

pub fn ret(line: u32) -> Stmt {
    stmt(line, StmtKind::Return)
}

pub fn end(line: u32) -> Stmt {
    stmt(line, StmtKind::End)
}

pub fn next(line: u32, name: &str) -> Stmt {
    stmt(
        line,
        StmtKind::Next {
            var: Some(name.to_string()),
        },
    )
}

/// FOR loop with its closing NEXT appended to the body, as the parser
/// delivers it.
pub fn for_loop(line: u32, name: &str, from: Expr, to: Expr, mut body: Vec<Stmt>, next_line: u32) -> Stmt {
    body.push(next(next_line, name));
    stmt(
        line,
        StmtKind::For {
            var: name.to_string(),
            from,
            to,
            step: None,
            body,
        },
    )
}

pub fn if_then(line: u32, cond: Expr, then_body: Vec<Stmt>) -> Stmt {
    stmt(
        line,
        StmtKind::If {
            cond,
            then_body,
            else_body: vec![],
        },
    )
}

pub fn if_else(line: u32, cond: Expr, then_body: Vec<Stmt>, else_body: Vec<Stmt>) -> Stmt {
    stmt(
        line,
        StmtKind::If {
            cond,
            then_body,
            else_body,
        },
    )
}

/// Program with integer globals for the named variables.
pub fn program_with_ints(statements: Vec<Stmt>, names: &[&str]) -> Program {
    let mut symbols = SymbolTable::default();
    for name in names {
        symbols.global_scalar(name, BasicType::Integer);
    }
    Program {
        statements,
        symbols,
    }
}
