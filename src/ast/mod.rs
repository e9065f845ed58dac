//! Typed AST delivered by the front-end
//!
//! The lexer, parser and semantic analyzer are external collaborators; they
//! hand over a validated, typed AST plus a symbol table, serialized as JSON.
//! Structured constructs own their bodies as nested statement lists. The one
//! closer keyword that survives into the AST is `NEXT`: the CFG builder moves
//! it into the loop's increment block and uses its line number as a jump
//! target (`GOTO` to a NEXT line is legal in this dialect).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::symbols::SymbolTable;

/// A whole program: top-level statements (including FUNCTION/SUB
/// definitions) plus the analyzer's symbol table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
    pub symbols: SymbolTable,
}

/// One statement, with its BASIC line number when the source carried one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub line: Option<u32>,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn new(line: Option<u32>, kind: StmtKind) -> Self {
        Stmt { line, kind }
    }

    /// Line number for diagnostics, 0 when the statement is unnumbered.
    pub fn line_or_zero(&self) -> u32 {
        self.line.unwrap_or(0)
    }
}

/// Assignment / READ / INPUT target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Target {
    Var(String),
    ArrayElem { name: String, indices: Vec<Expr> },
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Var(n) => n,
            Target::ArrayElem { name, .. } => name,
        }
    }
}

/// Separator following a PRINT item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrintSep {
    /// `,` — advance to the next tab stop.
    Comma,
    /// `;` — no separation; on the final item, suppresses the newline.
    Semicolon,
    /// Final item with no trailing separator; a newline follows.
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintItem {
    pub expr: Expr,
    pub sep: PrintSep,
}

/// The four DO shapes. Pre-test forms test before the first iteration,
/// post-test forms after each iteration; WHILE loops while the predicate is
/// true, UNTIL while it is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DoTest {
    PreWhile(Expr),
    PreUntil(Expr),
    PostWhile(Expr),
    PostUntil(Expr),
}

impl DoTest {
    pub fn is_pre_test(&self) -> bool {
        matches!(self, DoTest::PreWhile(_) | DoTest::PreUntil(_))
    }

    /// True when the loop continues on a true predicate (WHILE forms).
    pub fn loops_while_true(&self) -> bool {
        matches!(self, DoTest::PreWhile(_) | DoTest::PostWhile(_))
    }

    pub fn condition(&self) -> &Expr {
        match self {
            DoTest::PreWhile(e) | DoTest::PreUntil(e) | DoTest::PostWhile(e) | DoTest::PostUntil(e) => e,
        }
    }
}

/// One CASE arm label: a single value or an inclusive range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CaseLabel {
    Value(Expr),
    Range(Expr, Expr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseArm {
    pub labels: Vec<CaseLabel>,
    pub body: Vec<Stmt>,
}

/// Loop kinds an EXIT or CONTINUE can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopKind {
    For,
    While,
    Do,
    Repeat,
}

/// What an EXIT statement exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitKind {
    For,
    While,
    Do,
    Select,
    Function,
    Sub,
}

/// A GOTO/GOSUB destination: a line number or a symbolic label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JumpTarget {
    Line(u32),
    Label(String),
}

impl fmt::Display for JumpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JumpTarget::Line(n) => write!(f, "{}", n),
            JumpTarget::Label(s) => write!(f, "{}", s),
        }
    }
}

/// A literal value in a DATA statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataValue {
    Int(i64),
    Number(f64),
    Str(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StmtKind {
    Let {
        target: Target,
        value: Expr,
    },
    Print {
        items: Vec<PrintItem>,
    },
    Input {
        prompt: Option<String>,
        targets: Vec<Target>,
    },
    Read {
        targets: Vec<Target>,
    },
    Restore {
        line: Option<u32>,
    },
    Data {
        values: Vec<DataValue>,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        var: String,
        from: Expr,
        to: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    /// Closer of a FOR body; always the final statement of `For::body`.
    Next {
        var: Option<String>,
    },
    Repeat {
        body: Vec<Stmt>,
        until: Expr,
    },
    Do {
        test: DoTest,
        body: Vec<Stmt>,
    },
    Select {
        selector: Expr,
        arms: Vec<CaseArm>,
        otherwise: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        catch_var: Option<String>,
        catch_body: Vec<Stmt>,
        finally_body: Vec<Stmt>,
    },
    Dim {
        name: String,
        bounds: Vec<Expr>,
    },
    Redim {
        name: String,
        bounds: Vec<Expr>,
        preserve: bool,
    },
    Erase {
        names: Vec<String>,
    },
    Local {
        names: Vec<String>,
    },
    Shared {
        names: Vec<String>,
    },
    Global {
        names: Vec<String>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Goto {
        target: JumpTarget,
    },
    Gosub {
        target: JumpTarget,
    },
    Return,
    OnGoto {
        selector: Expr,
        targets: Vec<JumpTarget>,
    },
    OnGosub {
        selector: Expr,
        targets: Vec<JumpTarget>,
    },
    Exit {
        kind: ExitKind,
    },
    Continue {
        kind: Option<LoopKind>,
    },
    End,
    Throw {
        code: Expr,
    },
    Function {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    Sub {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    Label {
        name: String,
    },
    Rem {
        text: String,
    },
}

impl StmtKind {
    /// Short keyword for diagnostics and CFG listings.
    pub fn keyword(&self) -> &'static str {
        match self {
            StmtKind::Let { .. } => "LET",
            StmtKind::Print { .. } => "PRINT",
            StmtKind::Input { .. } => "INPUT",
            StmtKind::Read { .. } => "READ",
            StmtKind::Restore { .. } => "RESTORE",
            StmtKind::Data { .. } => "DATA",
            StmtKind::If { .. } => "IF",
            StmtKind::While { .. } => "WHILE",
            StmtKind::For { .. } => "FOR",
            StmtKind::Next { .. } => "NEXT",
            StmtKind::Repeat { .. } => "REPEAT",
            StmtKind::Do { .. } => "DO",
            StmtKind::Select { .. } => "SELECT CASE",
            StmtKind::Try { .. } => "TRY",
            StmtKind::Dim { .. } => "DIM",
            StmtKind::Redim { .. } => "REDIM",
            StmtKind::Erase { .. } => "ERASE",
            StmtKind::Local { .. } => "LOCAL",
            StmtKind::Shared { .. } => "SHARED",
            StmtKind::Global { .. } => "GLOBAL",
            StmtKind::Call { .. } => "CALL",
            StmtKind::Goto { .. } => "GOTO",
            StmtKind::Gosub { .. } => "GOSUB",
            StmtKind::Return => "RETURN",
            StmtKind::OnGoto { .. } => "ON GOTO",
            StmtKind::OnGosub { .. } => "ON GOSUB",
            StmtKind::Exit { .. } => "EXIT",
            StmtKind::Continue { .. } => "CONTINUE",
            StmtKind::End => "END",
            StmtKind::Throw { .. } => "THROW",
            StmtKind::Function { .. } => "FUNCTION",
            StmtKind::Sub { .. } => "SUB",
            StmtKind::Label { .. } => "LABEL",
            StmtKind::Rem { .. } => "REM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_bitwise(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "MOD",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Xor => "XOR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    IntLit(i64),
    FloatLit(f64),
    StringLit(String),
    Var(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    ArrayRef {
        name: String,
        indices: Vec<Expr>,
    },
    /// Intrinsic or user-defined function call.
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Iif {
        cond: Box<Expr>,
        then_val: Box<Expr>,
        else_val: Box<Expr>,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntLit(v) => write!(f, "{}", v),
            Expr::FloatLit(v) => write!(f, "{}", v),
            Expr::StringLit(s) => write!(f, "\"{}\"", s),
            Expr::Var(n) => write!(f, "{}", n),
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Neg => write!(f, "-{}", operand),
                UnaryOp::Not => write!(f, "NOT {}", operand),
            },
            Expr::ArrayRef { name, indices } => {
                write!(f, "{}(", name)?;
                for (i, idx) in indices.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", idx)?;
                }
                write!(f, ")")
            }
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Expr::Iif { cond, then_val, else_val } => {
                write!(f, "IIF({}, {}, {})", cond, then_val, else_val)
            }
        }
    }
}
