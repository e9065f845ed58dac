// CFG data structures shared by the builder and the IR emitter

pub mod analysis;
pub mod builder;
pub mod export;

pub use analysis::{find_unreachable, verify_cfg, InvariantViolation};
pub use builder::CfgBuilder;
pub use export::{export_dot, export_json, CfgExport};

use std::collections::{BTreeSet, HashMap};

use crate::ast::{Expr, Stmt};

/// Block identifier: index into the owning graph's block arena. Ids are
/// assigned in creation order and carry no sequentiality meaning; the
/// emitter never assumes id+1 follows id.
pub type BlockId = usize;

/// Type of control flow edge between basic blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeType {
    /// Conditional branch taken (true)
    TrueBranch,
    /// Conditional branch not taken (false)
    FalseBranch,
    /// Sequential fallthrough
    Fallthrough,
    /// Unconditional jump (GOTO, EXIT, CONTINUE, loop back-edge)
    Jump,
    /// GOSUB call site to subroutine entry
    Call,
    /// RETURN; target resolved at runtime via the GOSUB stack
    Return,
    /// THROW path to the enclosing CATCH
    Exception,
}

impl EdgeType {
    /// Color for DOT visualization
    pub fn dot_color(&self) -> &'static str {
        match self {
            EdgeType::TrueBranch => "green",
            EdgeType::FalseBranch => "red",
            EdgeType::Fallthrough => "black",
            EdgeType::Jump => "blue",
            EdgeType::Call => "gray",
            EdgeType::Return => "darkgray",
            EdgeType::Exception => "purple",
        }
    }

    /// Label for DOT visualization
    pub fn dot_label(&self) -> &'static str {
        match self {
            EdgeType::TrueBranch => "T",
            EdgeType::FalseBranch => "F",
            EdgeType::Fallthrough => "",
            EdgeType::Jump => "jmp",
            EdgeType::Call => "call",
            EdgeType::Return => "ret",
            EdgeType::Exception => "throw",
        }
    }
}

/// A directed, typed edge between two blocks.
///
/// `label` carries dispatch information: the case predicate text on SELECT
/// edges, `"default"` on the otherwise edge, `"1"`..`"n"` on ON targets.
#[derive(Debug, Clone)]
pub struct CfgEdge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeType,
    pub label: Option<String>,
}

/// Emitter-facing role of a block, carrying the AST node the role needs.
///
/// Roles drive the pre-statement steps of per-block emission: loop headers
/// evaluate their condition, FOR increments add the step, catch entries
/// load the error code.
#[derive(Debug, Clone, Copy)]
pub enum BlockRole<'ast> {
    Normal,
    /// FOR init: the attached statement is the `For`; emits the
    /// var/limit/step allocation triple.
    ForInit { stmt: &'ast Stmt },
    /// FOR header: synthesizes the continuation predicate from the triple.
    ForHeader { stmt: &'ast Stmt },
    /// FOR increment: holds the NEXT; emits the step addition.
    ForIncrement { stmt: &'ast Stmt },
    /// WHILE header or pre-test DO header; evaluates `cond` for the
    /// paired conditional edges.
    CondHeader { cond: &'ast Expr },
    /// REPEAT/post-test DO condition block.
    PostTest { cond: &'ast Expr },
    /// SELECT CASE dispatch; evaluates the selector for the labeled edges.
    SelectDispatch { stmt: &'ast Stmt },
    /// ON ... GOTO/GOSUB dispatch.
    OnDispatch { stmt: &'ast Stmt },
    /// CATCH entry; stores the error code into the named variable.
    CatchEntry { var: Option<&'ast str> },
}

/// Basic block: a straight-line statement sequence with one entry and one
/// exit. Statements are borrowed from the AST, which outlives the CFG.
#[derive(Debug, Clone)]
pub struct BasicBlock<'ast> {
    pub id: BlockId,
    /// Symbolic label, e.g. `For_Header`, `Line_100`.
    pub label: Option<String>,
    pub statements: Vec<&'ast Stmt>,
    pub role: BlockRole<'ast>,
    pub is_loop_header: bool,
    pub is_loop_exit: bool,
    /// Last statement is END/GOTO/RETURN/EXIT/THROW; nothing falls out.
    pub is_terminated: bool,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
}

impl<'ast> BasicBlock<'ast> {
    fn new(id: BlockId, label: Option<String>) -> Self {
        BasicBlock {
            id,
            label,
            statements: Vec::new(),
            role: BlockRole::Normal,
            is_loop_header: false,
            is_loop_exit: false,
            is_terminated: false,
            predecessors: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn last_stmt(&self) -> Option<&'ast Stmt> {
        self.statements.last().copied()
    }

    /// First source line attached to a statement in this block.
    pub fn first_line(&self) -> Option<u32> {
        self.statements.iter().find_map(|s| s.line)
    }
}

/// Loop shape, for per-loop metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopShape {
    For,
    While,
    DoPreTest,
    DoPostTest,
    Repeat,
}

/// Per-loop block map so the emitter can locate FOR init/header/increment
/// blocks without re-walking the AST.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub shape: LoopShape,
    pub header: BlockId,
    /// FOR only.
    pub init: Option<BlockId>,
    /// FOR only.
    pub increment: Option<BlockId>,
    pub exit: BlockId,
}

/// Control-flow graph for one callable (main or a FUNCTION/SUB body).
///
/// Blocks live in an arena; ids are indices, adjacency is kept consistent
/// with the flat edge list. Constructed mutably by the builder, then handed
/// to the emitter read-only.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph<'ast> {
    pub blocks: Vec<BasicBlock<'ast>>,
    pub edges: Vec<CfgEdge>,
    pub entry: BlockId,
    /// Every line-numbered statement registers its starting block here.
    pub line_to_block: HashMap<u32, BlockId>,
    pub label_to_block: HashMap<String, BlockId>,
    /// Continuation points of GOSUB calls; the emitter restricts RETURN
    /// dispatch to exactly this set.
    pub gosub_return_blocks: BTreeSet<BlockId>,
    /// Call-site block -> continuation block, one entry per GOSUB.
    pub gosub_return_map: HashMap<BlockId, BlockId>,
    pub loops: Vec<LoopInfo>,
    /// Blocks not reachable from entry; non-fatal, emitted anyway.
    pub unreachable: Vec<BlockId>,
}

impl<'ast> ControlFlowGraph<'ast> {
    pub fn new() -> Self {
        ControlFlowGraph {
            blocks: Vec::new(),
            edges: Vec::new(),
            entry: 0,
            line_to_block: HashMap::new(),
            label_to_block: HashMap::new(),
            gosub_return_blocks: BTreeSet::new(),
            gosub_return_map: HashMap::new(),
            loops: Vec::new(),
            unreachable: Vec::new(),
        }
    }

    /// Create a block; ids are handed out in creation order, never reused.
    pub fn add_block(&mut self, label: Option<String>) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock::new(id, label));
        id
    }

    /// Append an edge, keeping the adjacency lists consistent.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeType) {
        self.add_labeled_edge(from, to, kind, None);
    }

    pub fn add_labeled_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeType, label: Option<String>) {
        self.edges.push(CfgEdge { from, to, kind, label });
        // Return edges have no static target; the stored id is a
        // placeholder and must not appear in the adjacency lists.
        if kind != EdgeType::Return {
            self.blocks[from].successors.push(to);
            self.blocks[to].predecessors.push(from);
        }
    }

    /// Out-edges of a block, in insertion order.
    pub fn out_edges(&self, block: BlockId) -> Vec<&CfgEdge> {
        self.edges.iter().filter(|e| e.from == block).collect()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock<'ast> {
        &self.blocks[id]
    }

    pub fn loop_by_increment(&self, block: BlockId) -> Option<&LoopInfo> {
        self.loops.iter().find(|l| l.increment == Some(block))
    }

    pub fn loop_by_header(&self, block: BlockId) -> Option<&LoopInfo> {
        self.loops.iter().find(|l| l.header == block)
    }
}

impl<'ast> Default for ControlFlowGraph<'ast> {
    fn default() -> Self {
        Self::new()
    }
}

/// One CFG per user FUNCTION/SUB, in source order.
#[derive(Debug, Clone)]
pub struct FunctionCfg<'ast> {
    pub name: String,
    pub cfg: ControlFlowGraph<'ast>,
}

/// The whole program: main plus every user-defined callable.
#[derive(Debug, Clone)]
pub struct ProgramCfg<'ast> {
    pub main: ControlFlowGraph<'ast>,
    pub functions: Vec<FunctionCfg<'ast>>,
}

impl<'ast> ProgramCfg<'ast> {
    pub fn function(&self, name: &str) -> Option<&ControlFlowGraph<'ast>> {
        self.functions
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| &f.cfg)
    }
}
