//! Single-pass recursive CFG construction
//!
//! The builder walks the statement tree once, creating blocks as constructs
//! open and close. Each construct handler receives the block control flows
//! in from and returns the block control flows out of; everything in
//! between (nested constructs included) is a recursive sub-invocation. Two
//! supporting mechanisms cover the unstructured parts of the dialect:
//!
//! - a pre-scan collects every GOTO/GOSUB/ON target so numbered lines and
//!   labels that are jumped to always begin a fresh block;
//! - forward jumps whose target block does not exist yet are recorded as
//!   deferred edges and resolved after the recursive pass completes.
//!
//! FOR exits are the one place block creation is delayed on purpose: the
//! exit block materializes at NEXT, never at FOR, so ids stay in creation
//! order and EXIT FOR sites collect in a pending list until then.

use std::collections::HashSet;

use tracing::debug;

use crate::ast::{CaseLabel, ExitKind, JumpTarget, LoopKind, Program, Stmt, StmtKind};
use crate::cfg::{
    BlockId, BlockRole, ControlFlowGraph, EdgeType, FunctionCfg, LoopInfo, LoopShape, ProgramCfg,
};
use crate::diag::CompileError;
use crate::mangle;

/// A jump recorded before its target block existed.
#[derive(Debug, Clone)]
struct DeferredJump {
    from: BlockId,
    target: JumpTarget,
    kind: EdgeType,
    line: u32,
}

/// An ON ... GOTO/GOSUB site; target edges are wired after the recursive
/// pass, when every numbered line has its block.
struct OnSite<'ast> {
    block: BlockId,
    stmt: &'ast Stmt,
    is_gosub: bool,
}

struct LoopCtx {
    kind: LoopKind,
    /// Back-edge target for CONTINUE; None while the block is pending
    /// (FOR increment, post-test condition).
    continue_target: Option<BlockId>,
    /// Exit block; None while deferred (FOR).
    exit: Option<BlockId>,
    pending_exits: Vec<BlockId>,
    pending_continues: Vec<BlockId>,
}

struct SelectCtx {
    pending_exits: Vec<BlockId>,
}

struct TryCtx {
    catch: BlockId,
}

enum Ctx {
    Loop(LoopCtx),
    Select(SelectCtx),
    Try(TryCtx),
}

/// Builds one [`ControlFlowGraph`] per callable.
pub struct CfgBuilder<'ast> {
    cfg: ControlFlowGraph<'ast>,
    jump_lines: HashSet<u32>,
    jump_labels: HashSet<String>,
    deferred: Vec<DeferredJump>,
    on_sites: Vec<OnSite<'ast>>,
    ctx: Vec<Ctx>,
    /// Lines of REM-only statements awaiting the next real statement.
    pending_rem_lines: Vec<u32>,
    /// Top-level FUNCTION/SUB nodes are skipped (main build) rather than
    /// rejected (callable-body build).
    skip_definitions: bool,
}

impl<'ast> CfgBuilder<'ast> {
    /// Build the CFG for one callable body.
    ///
    /// Fails with [`CompileError::MalformedAst`] on structural violations
    /// (NEXT without FOR, EXIT outside a matching construct, nested
    /// FUNCTION definitions) and with
    /// [`CompileError::UnresolvedTarget`] when a jump references a line or
    /// label that does not exist. Unreachable code is never an error.
    pub fn build(statements: &'ast [Stmt]) -> Result<ControlFlowGraph<'ast>, CompileError> {
        let mut builder = CfgBuilder::empty(false);
        builder.scan_jump_targets(statements);
        debug!(
            lines = builder.jump_lines.len(),
            labels = builder.jump_labels.len(),
            "collected jump targets"
        );

        let entry = builder.cfg.add_block(Some("Entry".to_string()));
        builder.cfg.entry = entry;
        let tail = builder.build_range(statements, entry)?;
        builder.flush_rem_lines(tail);

        builder.resolve_deferred()?;
        builder.wire_on_sites()?;
        builder.check_returns()?;
        builder.compute_unreachable();
        debug!(
            blocks = builder.cfg.blocks.len(),
            edges = builder.cfg.edges.len(),
            unreachable = builder.cfg.unreachable.len(),
            "CFG built"
        );
        Ok(builder.cfg)
    }

    /// Build the whole program: separate FUNCTION/SUB bodies from the
    /// top-level statements, then build one CFG per callable.
    pub fn build_program(program: &'ast Program) -> Result<ProgramCfg<'ast>, CompileError> {
        let mut callables: Vec<(&str, &'ast [Stmt])> = Vec::new();
        for stmt in &program.statements {
            if let StmtKind::Function { name, body, .. } | StmtKind::Sub { name, body, .. } =
                &stmt.kind
            {
                callables.push((name, body));
            }
        }

        // Main is built from the full top-level list with definition nodes
        // skipped in place, so line numbers around them stay attached to
        // the right blocks.
        let main = Self::build_filtered(&program.statements)?;
        let mut functions = Vec::with_capacity(callables.len());
        for (name, body) in callables {
            let cfg = Self::build(body)?;
            functions.push(FunctionCfg {
                name: name.to_string(),
                cfg,
            });
        }
        Ok(ProgramCfg { main, functions })
    }

    fn empty(skip_definitions: bool) -> Self {
        CfgBuilder {
            cfg: ControlFlowGraph::new(),
            jump_lines: HashSet::new(),
            jump_labels: HashSet::new(),
            deferred: Vec::new(),
            on_sites: Vec::new(),
            ctx: Vec::new(),
            pending_rem_lines: Vec::new(),
            skip_definitions,
        }
    }

    /// `build`, but top-level FUNCTION/SUB definition nodes are skipped
    /// rather than rejected.
    fn build_filtered(statements: &'ast [Stmt]) -> Result<ControlFlowGraph<'ast>, CompileError> {
        let mut builder = CfgBuilder::empty(true);
        builder.scan_jump_targets(statements);
        let entry = builder.cfg.add_block(Some("Entry".to_string()));
        builder.cfg.entry = entry;
        let tail = builder.build_range(statements, entry)?;
        builder.flush_rem_lines(tail);
        builder.resolve_deferred()?;
        builder.wire_on_sites()?;
        builder.check_returns()?;
        builder.compute_unreachable();
        Ok(builder.cfg)
    }

    // ------------------------------------------------------------------
    // Phase 0: jump-target collection
    // ------------------------------------------------------------------

    fn note_target(&mut self, target: &JumpTarget) {
        match target {
            JumpTarget::Line(n) => {
                self.jump_lines.insert(*n);
            }
            JumpTarget::Label(s) => {
                self.jump_labels.insert(s.to_ascii_lowercase());
            }
        }
    }

    fn scan_jump_targets(&mut self, stmts: &'ast [Stmt]) {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Goto { target } | StmtKind::Gosub { target } => self.note_target(target),
                StmtKind::OnGoto { targets, .. } | StmtKind::OnGosub { targets, .. } => {
                    for t in targets {
                        self.note_target(t);
                    }
                }
                StmtKind::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    self.scan_jump_targets(then_body);
                    self.scan_jump_targets(else_body);
                }
                StmtKind::While { body, .. }
                | StmtKind::For { body, .. }
                | StmtKind::Repeat { body, .. }
                | StmtKind::Do { body, .. } => self.scan_jump_targets(body),
                StmtKind::Select {
                    arms, otherwise, ..
                } => {
                    for arm in arms {
                        self.scan_jump_targets(&arm.body);
                    }
                    self.scan_jump_targets(otherwise);
                }
                StmtKind::Try {
                    body,
                    catch_body,
                    finally_body,
                    ..
                } => {
                    self.scan_jump_targets(body);
                    self.scan_jump_targets(catch_body);
                    self.scan_jump_targets(finally_body);
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Block and line bookkeeping
    // ------------------------------------------------------------------

    /// A block that can still absorb a jump-target line without splitting.
    fn block_is_fresh(&self, block: BlockId) -> bool {
        let b = &self.cfg.blocks[block];
        b.statements.is_empty() && matches!(b.role, BlockRole::Normal)
    }

    fn is_terminated(&self, block: BlockId) -> bool {
        self.cfg.blocks[block].is_terminated
    }

    /// Register pending REM lines and the statement's own line as starting
    /// at `block`. First registration per line wins.
    fn register_stmt_lines(&mut self, block: BlockId, stmt: &Stmt) {
        for line in self.pending_rem_lines.drain(..) {
            self.cfg.line_to_block.entry(line).or_insert(block);
        }
        if let Some(line) = stmt.line {
            self.cfg.line_to_block.entry(line).or_insert(block);
        }
    }

    fn flush_rem_lines(&mut self, block: BlockId) {
        for line in self.pending_rem_lines.drain(..) {
            self.cfg.line_to_block.entry(line).or_insert(block);
        }
    }

    /// Place a plain statement into the current block, splitting first when
    /// the statement's line is a registered jump target.
    fn place_stmt(&mut self, current: &mut BlockId, stmt: &'ast Stmt) {
        if let StmtKind::Rem { .. } = stmt.kind {
            // REM never creates or splits a block; its line attaches to the
            // next real statement's block.
            if let Some(line) = stmt.line {
                self.pending_rem_lines.push(line);
            }
            return;
        }
        if let Some(line) = stmt.line {
            if self.jump_lines.contains(&line) {
                if self.block_is_fresh(*current) {
                    if self.cfg.blocks[*current].label.is_none() {
                        self.cfg.blocks[*current].label = Some(format!("Line_{}", line));
                    }
                } else {
                    let nb = self.cfg.add_block(Some(format!("Line_{}", line)));
                    if !self.is_terminated(*current) {
                        self.cfg.add_edge(*current, nb, EdgeType::Fallthrough);
                    }
                    *current = nb;
                }
            }
        }
        self.register_stmt_lines(*current, stmt);
        self.cfg.blocks[*current].statements.push(stmt);
    }

    /// Open a construct in a fresh block of its own: wire the fallthrough
    /// in, register lines, attach the construct statement.
    fn begin_construct_block(
        &mut self,
        current: &mut BlockId,
        stmt: &'ast Stmt,
        label: &str,
    ) -> BlockId {
        let b = self.cfg.add_block(Some(label.to_string()));
        if !self.is_terminated(*current) {
            self.cfg.add_edge(*current, b, EdgeType::Fallthrough);
        }
        self.register_stmt_lines(b, stmt);
        self.cfg.blocks[b].statements.push(stmt);
        b
    }

    /// Continuation block after a terminator statement; unreachable unless
    /// a jump lands on it later.
    fn fresh_block(&mut self, label: &str) -> BlockId {
        self.cfg.add_block(Some(label.to_string()))
    }

    // ------------------------------------------------------------------
    // Jump wiring
    // ------------------------------------------------------------------

    fn lookup_target(&self, target: &JumpTarget) -> Option<BlockId> {
        match target {
            JumpTarget::Line(n) => self.cfg.line_to_block.get(n).copied(),
            JumpTarget::Label(s) => self
                .cfg
                .label_to_block
                .get(&s.to_ascii_lowercase())
                .copied(),
        }
    }

    /// Wire `from` to the target, deferring when the target block does not
    /// exist yet (forward reference).
    fn jump_to_target(&mut self, from: BlockId, target: &JumpTarget, kind: EdgeType, line: u32) {
        match self.lookup_target(target) {
            Some(to) => self.cfg.add_edge(from, to, kind),
            None => self.deferred.push(DeferredJump {
                from,
                target: target.clone(),
                kind,
                line,
            }),
        }
    }

    fn resolve_deferred(&mut self) -> Result<(), CompileError> {
        let deferred = std::mem::take(&mut self.deferred);
        for d in deferred {
            match self.lookup_target(&d.target) {
                Some(to) => self.cfg.add_edge(d.from, to, d.kind),
                None => {
                    return Err(CompileError::UnresolvedTarget {
                        target: d.target.to_string(),
                        line: d.line,
                    })
                }
            }
        }
        Ok(())
    }

    fn wire_on_sites(&mut self) -> Result<(), CompileError> {
        let sites = std::mem::take(&mut self.on_sites);
        for site in sites {
            let (targets, line) = match &site.stmt.kind {
                StmtKind::OnGoto { targets, .. } | StmtKind::OnGosub { targets, .. } => {
                    (targets, site.stmt.line_or_zero())
                }
                _ => continue,
            };
            for (i, target) in targets.iter().enumerate() {
                let to = self.lookup_target(target).ok_or_else(|| {
                    CompileError::UnresolvedTarget {
                        target: target.to_string(),
                        line,
                    }
                })?;
                let kind = if site.is_gosub {
                    EdgeType::Call
                } else {
                    EdgeType::Jump
                };
                self.cfg
                    .add_labeled_edge(site.block, to, kind, Some((i + 1).to_string()));
            }
        }
        Ok(())
    }

    /// RETURN with no GOSUB anywhere in the callable can never find a
    /// continuation; reject it while the source location is still known.
    fn check_returns(&self) -> Result<(), CompileError> {
        if self.cfg.gosub_return_blocks.is_empty() {
            for edge in &self.cfg.edges {
                if edge.kind == EdgeType::Return {
                    let line = self.cfg.blocks[edge.from]
                        .last_stmt()
                        .and_then(|s| s.line)
                        .unwrap_or(0);
                    return Err(CompileError::malformed(
                        "RETURN outside any reachable GOSUB",
                        line,
                    ));
                }
            }
        }
        Ok(())
    }

    fn compute_unreachable(&mut self) {
        let mut seen = vec![false; self.cfg.blocks.len()];
        let mut stack = vec![self.cfg.entry];
        seen[self.cfg.entry] = true;
        while let Some(b) = stack.pop() {
            for &s in &self.cfg.blocks[b].successors {
                if !seen[s] {
                    seen[s] = true;
                    stack.push(s);
                }
            }
        }
        self.cfg.unreachable = (0..self.cfg.blocks.len()).filter(|&b| !seen[b]).collect();
    }

    // ------------------------------------------------------------------
    // Context stack
    // ------------------------------------------------------------------

    fn innermost_catch(&self) -> Option<BlockId> {
        self.ctx.iter().rev().find_map(|c| match c {
            Ctx::Try(t) => Some(t.catch),
            _ => None,
        })
    }

    /// Index of the innermost loop context matching `kind` (None matches
    /// any loop). EXIT DO also closes REPEAT loops, which are a post-test
    /// DO shape in this dialect.
    fn find_loop_ctx(&self, kind: Option<LoopKind>) -> Option<usize> {
        self.ctx.iter().enumerate().rev().find_map(|(i, c)| match c {
            Ctx::Loop(lc) => {
                let matches = match kind {
                    None => true,
                    Some(LoopKind::Do) => matches!(lc.kind, LoopKind::Do | LoopKind::Repeat),
                    Some(k) => lc.kind == k,
                };
                if matches {
                    Some(i)
                } else {
                    None
                }
            }
            _ => None,
        })
    }

    fn route_loop_exit(&mut self, from: BlockId, ctx_idx: usize) {
        let exit = match &self.ctx[ctx_idx] {
            Ctx::Loop(lc) => lc.exit,
            _ => unreachable!(),
        };
        match exit {
            Some(e) => self.cfg.add_edge(from, e, EdgeType::Jump),
            None => {
                if let Ctx::Loop(lc) = &mut self.ctx[ctx_idx] {
                    lc.pending_exits.push(from);
                }
            }
        }
    }

    fn route_loop_continue(&mut self, from: BlockId, ctx_idx: usize) {
        let target = match &self.ctx[ctx_idx] {
            Ctx::Loop(lc) => lc.continue_target,
            _ => unreachable!(),
        };
        match target {
            Some(t) => self.cfg.add_edge(from, t, EdgeType::Jump),
            None => {
                if let Ctx::Loop(lc) = &mut self.ctx[ctx_idx] {
                    lc.pending_continues.push(from);
                }
            }
        }
    }

    fn pop_loop_ctx(&mut self) -> LoopCtx {
        match self.ctx.pop() {
            Some(Ctx::Loop(lc)) => lc,
            _ => unreachable!("loop context stack imbalance"),
        }
    }

    // ------------------------------------------------------------------
    // Phase 1: recursive composition
    // ------------------------------------------------------------------

    /// Iterate a statement list, threading the current block through every
    /// construct. Returns the block control falls out of.
    fn build_range(
        &mut self,
        stmts: &'ast [Stmt],
        mut current: BlockId,
    ) -> Result<BlockId, CompileError> {
        for stmt in stmts {
            current = self.build_stmt(stmt, current)?;
        }
        Ok(current)
    }

    fn build_stmt(&mut self, stmt: &'ast Stmt, mut current: BlockId) -> Result<BlockId, CompileError> {
        match &stmt.kind {
            // Straight-line statements accumulate in the current block.
            StmtKind::Let { .. }
            | StmtKind::Print { .. }
            | StmtKind::Input { .. }
            | StmtKind::Read { .. }
            | StmtKind::Restore { .. }
            | StmtKind::Data { .. }
            | StmtKind::Dim { .. }
            | StmtKind::Redim { .. }
            | StmtKind::Erase { .. }
            | StmtKind::Local { .. }
            | StmtKind::Shared { .. }
            | StmtKind::Global { .. }
            | StmtKind::Call { .. }
            | StmtKind::Rem { .. } => {
                self.place_stmt(&mut current, stmt);
                Ok(current)
            }

            StmtKind::Label { name } => {
                let folded = name.to_ascii_lowercase();
                if self.jump_labels.contains(&folded) && !self.block_is_fresh(current) {
                    let nb = self
                        .cfg
                        .add_block(Some(format!("Label_{}", mangle::label(name))));
                    if !self.is_terminated(current) {
                        self.cfg.add_edge(current, nb, EdgeType::Fallthrough);
                    }
                    current = nb;
                }
                self.cfg.label_to_block.entry(folded).or_insert(current);
                self.register_stmt_lines(current, stmt);
                Ok(current)
            }

            StmtKind::If {
                cond: _,
                then_body,
                else_body,
            } => {
                self.place_stmt(&mut current, stmt);
                let then_entry = self.cfg.add_block(Some("If_Then".to_string()));
                let else_entry = self.cfg.add_block(Some("If_Else".to_string()));
                let merge = self.cfg.add_block(Some("If_Merge".to_string()));
                self.cfg.add_edge(current, then_entry, EdgeType::TrueBranch);
                self.cfg.add_edge(current, else_entry, EdgeType::FalseBranch);

                let then_exit = self.build_range(then_body, then_entry)?;
                if !self.is_terminated(then_exit) {
                    self.cfg.add_edge(then_exit, merge, EdgeType::Fallthrough);
                }
                let else_exit = self.build_range(else_body, else_entry)?;
                if !self.is_terminated(else_exit) {
                    self.cfg.add_edge(else_exit, merge, EdgeType::Fallthrough);
                }
                Ok(merge)
            }

            StmtKind::While { cond, body } => {
                let header = self.begin_construct_block(&mut current, stmt, "While_Header");
                self.cfg.blocks[header].role = BlockRole::CondHeader { cond };
                self.cfg.blocks[header].is_loop_header = true;
                self.build_pre_test_loop(header, body, true, LoopKind::While, LoopShape::While, "While")
            }

            StmtKind::Do { test, body } => {
                if test.is_pre_test() {
                    let header = self.begin_construct_block(&mut current, stmt, "Do_Header");
                    self.cfg.blocks[header].role = BlockRole::CondHeader {
                        cond: test.condition(),
                    };
                    self.cfg.blocks[header].is_loop_header = true;
                    self.build_pre_test_loop(
                        header,
                        body,
                        test.loops_while_true(),
                        LoopKind::Do,
                        LoopShape::DoPreTest,
                        "Do",
                    )
                } else {
                    self.build_post_test_loop(
                        &mut current,
                        stmt,
                        body,
                        test.condition(),
                        test.loops_while_true(),
                        LoopKind::Do,
                        LoopShape::DoPostTest,
                        "Do",
                    )
                }
            }

            StmtKind::Repeat { body, until } => self.build_post_test_loop(
                &mut current,
                stmt,
                body,
                until,
                false,
                LoopKind::Repeat,
                LoopShape::Repeat,
                "Repeat",
            ),

            StmtKind::For { var, body, .. } => self.build_for(&mut current, stmt, var, body),

            StmtKind::Next { .. } => Err(CompileError::malformed(
                "NEXT without matching FOR",
                stmt.line_or_zero(),
            )),

            StmtKind::Select {
                selector: _,
                arms,
                otherwise,
            } => self.build_select(&mut current, stmt, arms, otherwise),

            StmtKind::Try {
                body,
                catch_var,
                catch_body,
                finally_body,
            } => self.build_try(&mut current, stmt, body, catch_var.as_deref(), catch_body, finally_body),

            StmtKind::Goto { target } => {
                self.place_stmt(&mut current, stmt);
                self.jump_to_target(current, target, EdgeType::Jump, stmt.line_or_zero());
                self.cfg.blocks[current].is_terminated = true;
                Ok(self.fresh_block("After_Goto"))
            }

            StmtKind::Gosub { target } => {
                self.place_stmt(&mut current, stmt);
                // The continuation block is created immediately; the CALL
                // edge and the paired fallthrough give the emitter both the
                // destination and the return-point id to push.
                let cont = self.fresh_block("Gosub_Return");
                self.jump_to_target(current, target, EdgeType::Call, stmt.line_or_zero());
                self.cfg.add_edge(current, cont, EdgeType::Fallthrough);
                self.cfg.gosub_return_blocks.insert(cont);
                self.cfg.gosub_return_map.insert(current, cont);
                Ok(cont)
            }

            StmtKind::Return => {
                self.place_stmt(&mut current, stmt);
                // Target is the top of the runtime GOSUB stack; the stored
                // self-id is a placeholder.
                self.cfg.add_edge(current, current, EdgeType::Return);
                self.cfg.blocks[current].is_terminated = true;
                Ok(self.fresh_block("After_Return"))
            }

            StmtKind::OnGoto { .. } | StmtKind::OnGosub { .. } => {
                let is_gosub = matches!(stmt.kind, StmtKind::OnGosub { .. });
                self.place_stmt(&mut current, stmt);
                self.cfg.blocks[current].role = BlockRole::OnDispatch { stmt };
                self.on_sites.push(OnSite {
                    block: current,
                    stmt,
                    is_gosub,
                });
                // Selector 0 or > n falls through to the next statement.
                let next = self.fresh_block("On_Fallthrough");
                self.cfg.add_edge(current, next, EdgeType::Fallthrough);
                if is_gosub {
                    // One continuation block shared by all n call sites.
                    self.cfg.gosub_return_blocks.insert(next);
                    self.cfg.gosub_return_map.insert(current, next);
                }
                Ok(next)
            }

            StmtKind::Exit { kind } => {
                self.place_stmt(&mut current, stmt);
                match kind {
                    ExitKind::Function | ExitKind::Sub => {
                        // Function return; zero out-edges, emitter rets.
                        self.cfg.blocks[current].is_terminated = true;
                    }
                    ExitKind::Select => {
                        let found = self.ctx.iter_mut().rev().find_map(|c| match c {
                            Ctx::Select(sc) => Some(sc),
                            _ => None,
                        });
                        match found {
                            Some(sc) => sc.pending_exits.push(current),
                            None => {
                                return Err(CompileError::malformed(
                                    "EXIT SELECT outside SELECT CASE",
                                    stmt.line_or_zero(),
                                ))
                            }
                        }
                        self.cfg.blocks[current].is_terminated = true;
                    }
                    ExitKind::For | ExitKind::While | ExitKind::Do => {
                        let kind = match kind {
                            ExitKind::For => LoopKind::For,
                            ExitKind::While => LoopKind::While,
                            _ => LoopKind::Do,
                        };
                        let keyword = match kind {
                            LoopKind::For => "FOR",
                            LoopKind::While => "WHILE",
                            _ => "DO",
                        };
                        let idx = self.find_loop_ctx(Some(kind)).ok_or_else(|| {
                            CompileError::malformed(
                                format!("EXIT {} outside a matching loop", keyword),
                                stmt.line_or_zero(),
                            )
                        })?;
                        self.route_loop_exit(current, idx);
                        self.cfg.blocks[current].is_terminated = true;
                    }
                }
                Ok(self.fresh_block("After_Exit"))
            }

            StmtKind::Continue { kind } => {
                self.place_stmt(&mut current, stmt);
                let idx = self.find_loop_ctx(*kind).ok_or_else(|| {
                    CompileError::malformed("CONTINUE outside a loop", stmt.line_or_zero())
                })?;
                self.route_loop_continue(current, idx);
                self.cfg.blocks[current].is_terminated = true;
                Ok(self.fresh_block("After_Continue"))
            }

            StmtKind::End => {
                self.place_stmt(&mut current, stmt);
                self.cfg.blocks[current].is_terminated = true;
                Ok(self.fresh_block("After_End"))
            }

            StmtKind::Throw { .. } => {
                self.place_stmt(&mut current, stmt);
                if let Some(catch) = self.innermost_catch() {
                    self.cfg.add_edge(current, catch, EdgeType::Exception);
                }
                self.cfg.blocks[current].is_terminated = true;
                Ok(self.fresh_block("After_Throw"))
            }

            StmtKind::Function { .. } | StmtKind::Sub { .. } => {
                if self.skip_definitions {
                    Ok(current)
                } else {
                    Err(CompileError::malformed(
                        "nested FUNCTION/SUB definition",
                        stmt.line_or_zero(),
                    ))
                }
            }
        }
    }

    /// Shared shape of WHILE and pre-test DO: header already created and
    /// roled by the caller.
    fn build_pre_test_loop(
        &mut self,
        header: BlockId,
        body: &'ast [Stmt],
        loops_while_true: bool,
        kind: LoopKind,
        shape: LoopShape,
        name: &str,
    ) -> Result<BlockId, CompileError> {
        let body_entry = self.cfg.add_block(Some(format!("{}_Body", name)));
        let exit = self.cfg.add_block(Some(format!("{}_Exit", name)));
        self.cfg.blocks[exit].is_loop_exit = true;
        let (body_kind, exit_kind) = if loops_while_true {
            (EdgeType::TrueBranch, EdgeType::FalseBranch)
        } else {
            (EdgeType::FalseBranch, EdgeType::TrueBranch)
        };
        self.cfg.add_edge(header, body_entry, body_kind);
        self.cfg.add_edge(header, exit, exit_kind);

        self.ctx.push(Ctx::Loop(LoopCtx {
            kind,
            continue_target: Some(header),
            exit: Some(exit),
            pending_exits: Vec::new(),
            pending_continues: Vec::new(),
        }));
        let tail = self.build_range(body, body_entry)?;
        if !self.is_terminated(tail) {
            self.cfg.add_edge(tail, header, EdgeType::Jump);
        }
        let lc = self.pop_loop_ctx();
        for b in lc.pending_exits {
            self.cfg.add_edge(b, exit, EdgeType::Jump);
        }
        for b in lc.pending_continues {
            self.cfg.add_edge(b, header, EdgeType::Jump);
        }
        self.cfg.loops.push(LoopInfo {
            shape,
            header,
            init: None,
            increment: None,
            exit,
        });
        Ok(exit)
    }

    /// REPEAT/UNTIL and the post-test DO shapes: no pre-header branch, the
    /// predicate lives in a condition block after the body.
    #[allow(clippy::too_many_arguments)]
    fn build_post_test_loop(
        &mut self,
        current: &mut BlockId,
        stmt: &'ast Stmt,
        body: &'ast [Stmt],
        cond: &'ast crate::ast::Expr,
        loops_while_true: bool,
        kind: LoopKind,
        shape: LoopShape,
        name: &str,
    ) -> Result<BlockId, CompileError> {
        let body_entry = self.begin_construct_block(current, stmt, &format!("{}_Body", name));
        self.cfg.blocks[body_entry].is_loop_header = true;

        self.ctx.push(Ctx::Loop(LoopCtx {
            kind,
            continue_target: None,
            exit: None,
            pending_exits: Vec::new(),
            pending_continues: Vec::new(),
        }));
        let tail = self.build_range(body, body_entry)?;

        let cond_block = self.cfg.add_block(Some(format!("{}_Cond", name)));
        self.cfg.blocks[cond_block].role = BlockRole::PostTest { cond };
        if !self.is_terminated(tail) {
            self.cfg.add_edge(tail, cond_block, EdgeType::Fallthrough);
        }
        let exit = self.cfg.add_block(Some(format!("{}_Exit", name)));
        self.cfg.blocks[exit].is_loop_exit = true;
        let (back_kind, exit_kind) = if loops_while_true {
            (EdgeType::TrueBranch, EdgeType::FalseBranch)
        } else {
            (EdgeType::FalseBranch, EdgeType::TrueBranch)
        };
        self.cfg.add_edge(cond_block, body_entry, back_kind);
        self.cfg.add_edge(cond_block, exit, exit_kind);

        let lc = self.pop_loop_ctx();
        for b in lc.pending_exits {
            self.cfg.add_edge(b, exit, EdgeType::Jump);
        }
        for b in lc.pending_continues {
            self.cfg.add_edge(b, cond_block, EdgeType::Jump);
        }
        self.cfg.loops.push(LoopInfo {
            shape,
            header: body_entry,
            init: None,
            increment: None,
            exit,
        });
        Ok(exit)
    }

    /// FOR/NEXT. The exit block is created only when the construct closes
    /// at NEXT, so its id follows every block of the body; EXIT FOR sites
    /// wait in the pending list until then.
    fn build_for(
        &mut self,
        current: &mut BlockId,
        stmt: &'ast Stmt,
        var: &str,
        body: &'ast [Stmt],
    ) -> Result<BlockId, CompileError> {
        let (next_stmt, inner) = split_for_body(body, var, stmt.line_or_zero())?;

        let init = self.begin_construct_block(current, stmt, "For_Init");
        self.cfg.blocks[init].role = BlockRole::ForInit { stmt };
        let header = self.cfg.add_block(Some("For_Header".to_string()));
        self.cfg.blocks[header].role = BlockRole::ForHeader { stmt };
        self.cfg.blocks[header].is_loop_header = true;
        self.cfg.add_edge(init, header, EdgeType::Fallthrough);
        let body_entry = self.cfg.add_block(Some("For_Body".to_string()));
        self.cfg.add_edge(header, body_entry, EdgeType::TrueBranch);
        // The CONDITIONAL_FALSE edge from the header is deferred until the
        // exit block exists.

        self.ctx.push(Ctx::Loop(LoopCtx {
            kind: LoopKind::For,
            continue_target: None,
            exit: None,
            pending_exits: Vec::new(),
            pending_continues: Vec::new(),
        }));
        let tail = self.build_range(inner, body_entry)?;

        // Closing at NEXT: increment, then exit, in that order.
        let increment = self.cfg.add_block(Some("For_Increment".to_string()));
        self.cfg.blocks[increment].role = BlockRole::ForIncrement { stmt };
        self.register_stmt_lines(increment, next_stmt);
        self.cfg.blocks[increment].statements.push(next_stmt);
        if !self.is_terminated(tail) {
            self.cfg.add_edge(tail, increment, EdgeType::Fallthrough);
        }
        self.cfg.add_edge(increment, header, EdgeType::Jump);

        let exit = self.cfg.add_block(Some("For_Exit".to_string()));
        self.cfg.blocks[exit].is_loop_exit = true;
        self.cfg.add_edge(header, exit, EdgeType::FalseBranch);

        let lc = self.pop_loop_ctx();
        for b in lc.pending_exits {
            self.cfg.add_edge(b, exit, EdgeType::Jump);
        }
        for b in lc.pending_continues {
            self.cfg.add_edge(b, increment, EdgeType::Jump);
        }
        self.cfg.loops.push(LoopInfo {
            shape: LoopShape::For,
            header,
            init: Some(init),
            increment: Some(increment),
            exit,
        });
        Ok(exit)
    }

    fn build_select(
        &mut self,
        current: &mut BlockId,
        stmt: &'ast Stmt,
        arms: &'ast [crate::ast::CaseArm],
        otherwise: &'ast [Stmt],
    ) -> Result<BlockId, CompileError> {
        let dispatch = self.begin_construct_block(current, stmt, "Select_Dispatch");
        self.cfg.blocks[dispatch].role = BlockRole::SelectDispatch { stmt };
        self.ctx.push(Ctx::Select(SelectCtx {
            pending_exits: Vec::new(),
        }));

        let mut tails = Vec::with_capacity(arms.len() + 1);
        for (i, arm) in arms.iter().enumerate() {
            let entry = self.cfg.add_block(Some(format!("Case_{}", i)));
            self.cfg
                .add_labeled_edge(dispatch, entry, EdgeType::Jump, Some(case_label_text(&arm.labels)));
            tails.push(self.build_range(&arm.body, entry)?);
        }
        let other_entry = self.cfg.add_block(Some("Case_Otherwise".to_string()));
        self.cfg
            .add_labeled_edge(dispatch, other_entry, EdgeType::Jump, Some("default".to_string()));
        tails.push(self.build_range(otherwise, other_entry)?);

        let merge = self.cfg.add_block(Some("Select_Merge".to_string()));
        for t in tails {
            if !self.is_terminated(t) {
                self.cfg.add_edge(t, merge, EdgeType::Fallthrough);
            }
        }
        let sc = match self.ctx.pop() {
            Some(Ctx::Select(sc)) => sc,
            _ => unreachable!("select context stack imbalance"),
        };
        for b in sc.pending_exits {
            self.cfg.add_edge(b, merge, EdgeType::Jump);
        }
        Ok(merge)
    }

    fn build_try(
        &mut self,
        current: &mut BlockId,
        stmt: &'ast Stmt,
        body: &'ast [Stmt],
        catch_var: Option<&'ast str>,
        catch_body: &'ast [Stmt],
        finally_body: &'ast [Stmt],
    ) -> Result<BlockId, CompileError> {
        let try_entry = self.begin_construct_block(current, stmt, "Try_Body");
        // Catch (and finally) ids are allocated before the protected body
        // so THROW sites can wire exception edges as they are met.
        let catch = self.cfg.add_block(Some("Catch".to_string()));
        self.cfg.blocks[catch].role = BlockRole::CatchEntry { var: catch_var };
        let finally = if finally_body.is_empty() {
            None
        } else {
            Some(self.cfg.add_block(Some("Finally".to_string())))
        };

        self.ctx.push(Ctx::Try(TryCtx { catch }));
        let try_tail = self.build_range(body, try_entry)?;
        self.ctx.pop();
        // The catch body is not protected by its own TRY.
        let catch_tail = self.build_range(catch_body, catch)?;

        // Both the normal path and the catch path flow through FINALLY.
        let merge = if let Some(fin) = finally {
            if !self.is_terminated(try_tail) {
                self.cfg.add_edge(try_tail, fin, EdgeType::Fallthrough);
            }
            if !self.is_terminated(catch_tail) {
                self.cfg.add_edge(catch_tail, fin, EdgeType::Fallthrough);
            }
            let fin_tail = self.build_range(finally_body, fin)?;
            let merge = self.cfg.add_block(Some("Try_Merge".to_string()));
            if !self.is_terminated(fin_tail) {
                self.cfg.add_edge(fin_tail, merge, EdgeType::Fallthrough);
            }
            merge
        } else {
            let merge = self.cfg.add_block(Some("Try_Merge".to_string()));
            if !self.is_terminated(try_tail) {
                self.cfg.add_edge(try_tail, merge, EdgeType::Fallthrough);
            }
            if !self.is_terminated(catch_tail) {
                self.cfg.add_edge(catch_tail, merge, EdgeType::Fallthrough);
            }
            merge
        };
        Ok(merge)
    }
}

/// Render a CASE arm's labels for the dispatch edge.
fn case_label_text(labels: &[CaseLabel]) -> String {
    labels
        .iter()
        .map(|l| match l {
            CaseLabel::Value(e) => e.to_string(),
            CaseLabel::Range(a, b) => format!("{}..{}", a, b),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Split a FOR body into its trailing NEXT and the statements before it.
fn split_for_body<'ast>(
    body: &'ast [Stmt],
    var: &str,
    for_line: u32,
) -> Result<(&'ast Stmt, &'ast [Stmt]), CompileError> {
    let (next_stmt, inner) = match body.split_last() {
        Some((last, inner)) if matches!(last.kind, StmtKind::Next { .. }) => (last, inner),
        _ => {
            return Err(CompileError::malformed(
                format!("FOR {} without matching NEXT", var),
                for_line,
            ))
        }
    };
    if let StmtKind::Next { var: Some(n) } = &next_stmt.kind {
        if !n.eq_ignore_ascii_case(var) {
            return Err(CompileError::malformed(
                format!("NEXT {} does not match FOR {}", n, var),
                next_stmt.line_or_zero(),
            ));
        }
    }
    Ok((next_stmt, inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{DoTest, Expr, Target};

    fn let_stmt(line: u32, var: &str, value: i64) -> Stmt {
        Stmt::new(
            Some(line),
            StmtKind::Let {
                target: Target::Var(var.to_string()),
                value: Expr::IntLit(value),
            },
        )
    }

    fn next_stmt(line: u32, var: &str) -> Stmt {
        Stmt::new(
            Some(line),
            StmtKind::Next {
                var: Some(var.to_string()),
            },
        )
    }

    fn for_stmt(line: u32, var: &str, from: i64, to: i64, body: Vec<Stmt>) -> Stmt {
        Stmt::new(
            Some(line),
            StmtKind::For {
                var: var.to_string(),
                from: Expr::IntLit(from),
                to: Expr::IntLit(to),
                step: None,
                body,
            },
        )
    }

    fn edge_kinds(cfg: &ControlFlowGraph<'_>, from: BlockId) -> Vec<EdgeType> {
        cfg.out_edges(from).iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_empty_program_single_block() {
        let cfg = CfgBuilder::build(&[]).unwrap();
        assert_eq!(cfg.blocks.len(), 1);
        assert_eq!(cfg.entry, 0);
        assert!(cfg.edges.is_empty());
    }

    #[test]
    fn test_block_ids_match_indices() {
        let stmts = vec![
            let_stmt(10, "A", 1),
            for_stmt(20, "K", 1, 3, vec![let_stmt(30, "B", 2), next_stmt(40, "K")]),
            let_stmt(50, "C", 3),
        ];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        for (i, block) in cfg.blocks.iter().enumerate() {
            assert_eq!(block.id, i);
        }
    }

    #[test]
    fn test_if_creates_then_else_merge() {
        let stmts = vec![Stmt::new(
            Some(10),
            StmtKind::If {
                cond: Expr::IntLit(1),
                then_body: vec![let_stmt(20, "A", 1)],
                else_body: vec![],
            },
        )];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        let kinds = edge_kinds(&cfg, cfg.entry);
        assert!(kinds.contains(&EdgeType::TrueBranch));
        assert!(kinds.contains(&EdgeType::FalseBranch));

        // The empty else block falls straight through to the merge; the
        // then branch joins it there.
        let out = cfg.out_edges(cfg.entry);
        let then_entry = out
            .iter()
            .find(|e| e.kind == EdgeType::TrueBranch)
            .unwrap()
            .to;
        let else_entry = out
            .iter()
            .find(|e| e.kind == EdgeType::FalseBranch)
            .unwrap()
            .to;
        let then_out = cfg.out_edges(then_entry);
        let else_out = cfg.out_edges(else_entry);
        assert_eq!(then_out.len(), 1);
        assert_eq!(then_out[0].kind, EdgeType::Fallthrough);
        assert_eq!(else_out.len(), 1);
        assert_eq!(then_out[0].to, else_out[0].to);
    }

    #[test]
    fn test_while_shape() {
        let stmts = vec![Stmt::new(
            Some(10),
            StmtKind::While {
                cond: Expr::Var("X".to_string()),
                body: vec![let_stmt(20, "X", 0)],
            },
        )];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        let header = cfg
            .blocks
            .iter()
            .find(|b| b.is_loop_header)
            .expect("loop header");
        let kinds = edge_kinds(&cfg, header.id);
        assert!(kinds.contains(&EdgeType::TrueBranch));
        assert!(kinds.contains(&EdgeType::FalseBranch));

        // Body tail jumps back to the header.
        let back = cfg
            .edges
            .iter()
            .find(|e| e.to == header.id && e.kind == EdgeType::Jump);
        assert!(back.is_some(), "missing back-edge");
    }

    #[test]
    fn test_for_exit_block_created_last() {
        let stmts = vec![for_stmt(
            10,
            "K",
            1,
            3,
            vec![let_stmt(20, "A", 1), next_stmt(30, "K")],
        )];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        let info = &cfg.loops[0];
        // Exit id follows every block of the loop, increment included.
        assert!(info.exit > info.header);
        assert!(info.exit > info.increment.unwrap());
        assert!(cfg.blocks[info.exit].is_loop_exit);
        // Deferred CONDITIONAL_FALSE edge resolved to the exit.
        let false_edge = cfg
            .out_edges(info.header)
            .into_iter()
            .find(|e| e.kind == EdgeType::FalseBranch)
            .expect("header false edge");
        assert_eq!(false_edge.to, info.exit);
    }

    #[test]
    fn test_for_next_moved_to_increment_block() {
        let stmts = vec![for_stmt(
            10,
            "K",
            1,
            3,
            vec![let_stmt(20, "A", 1), next_stmt(30, "K")],
        )];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        let info = &cfg.loops[0];
        let inc = cfg.block(info.increment.unwrap());
        assert!(matches!(
            inc.last_stmt().map(|s| &s.kind),
            Some(StmtKind::Next { .. })
        ));
        // GOTO to the NEXT line lands in the increment block.
        assert_eq!(cfg.line_to_block[&30], inc.id);
    }

    #[test]
    fn test_next_without_for_rejected() {
        let stmts = vec![next_stmt(10, "K")];
        let err = CfgBuilder::build(&stmts).unwrap_err();
        assert!(err.to_string().contains("NEXT without matching FOR"));
    }

    #[test]
    fn test_next_var_mismatch_rejected() {
        let stmts = vec![for_stmt(
            10,
            "K",
            1,
            3,
            vec![next_stmt(20, "J")],
        )];
        let err = CfgBuilder::build(&stmts).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_exit_while_does_not_exit_for() {
        let body = vec![
            Stmt::new(
                Some(20),
                StmtKind::Exit {
                    kind: ExitKind::While,
                },
            ),
            next_stmt(30, "K"),
        ];
        let stmts = vec![for_stmt(10, "K", 1, 3, body)];
        let err = CfgBuilder::build(&stmts).unwrap_err();
        assert!(err.to_string().contains("EXIT WHILE"));
    }

    #[test]
    fn test_exit_do_closes_repeat() {
        let stmts = vec![Stmt::new(
            Some(10),
            StmtKind::Repeat {
                body: vec![Stmt::new(
                    Some(20),
                    StmtKind::Exit { kind: ExitKind::Do },
                )],
                until: Expr::IntLit(0),
            },
        )];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        let info = &cfg.loops[0];
        let exit_jump = cfg
            .edges
            .iter()
            .any(|e| e.to == info.exit && e.kind == EdgeType::Jump);
        assert!(exit_jump, "EXIT DO should jump to the REPEAT exit");
    }

    #[test]
    fn test_do_shapes_polarity() {
        // DO UNTIL is a pre-test loop entered while the predicate is false.
        let stmts = vec![Stmt::new(
            Some(10),
            StmtKind::Do {
                test: DoTest::PreUntil(Expr::Var("X".to_string())),
                body: vec![let_stmt(20, "X", 1)],
            },
        )];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        let header = cfg.blocks.iter().find(|b| b.is_loop_header).unwrap();
        let body_edge = cfg
            .out_edges(header.id)
            .into_iter()
            .find(|e| e.kind == EdgeType::FalseBranch)
            .expect("false edge");
        // The false edge enters the body, not the exit.
        assert!(!cfg.blocks[body_edge.to].is_loop_exit);
    }

    #[test]
    fn test_post_test_do_has_no_preheader_branch() {
        let stmts = vec![Stmt::new(
            Some(10),
            StmtKind::Do {
                test: DoTest::PostWhile(Expr::Var("X".to_string())),
                body: vec![let_stmt(20, "X", 1)],
            },
        )];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        // Entry flows into the body unconditionally.
        let entry_out = cfg.out_edges(cfg.entry);
        assert_eq!(entry_out.len(), 1);
        assert_eq!(entry_out[0].kind, EdgeType::Fallthrough);
        // The condition block branches back to the body and out to the exit.
        let info = &cfg.loops[0];
        let back = cfg
            .edges
            .iter()
            .find(|e| e.to == info.header && e.kind == EdgeType::TrueBranch);
        assert!(back.is_some(), "post-test back-edge should be TrueBranch");
    }

    #[test]
    fn test_gosub_pairs_call_with_continuation() {
        let stmts = vec![
            Stmt::new(
                Some(10),
                StmtKind::Gosub {
                    target: JumpTarget::Line(100),
                },
            ),
            Stmt::new(Some(20), StmtKind::End),
            let_stmt(100, "S", 1),
            Stmt::new(Some(110), StmtKind::Return),
        ];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        let call_edge = cfg
            .edges
            .iter()
            .find(|e| e.kind == EdgeType::Call)
            .expect("call edge");
        assert_eq!(call_edge.to, cfg.line_to_block[&100]);
        let cont = cfg.gosub_return_map[&call_edge.from];
        assert!(cfg.gosub_return_blocks.contains(&cont));
        let paired = cfg
            .out_edges(call_edge.from)
            .into_iter()
            .any(|e| e.kind == EdgeType::Fallthrough && e.to == cont);
        assert!(paired, "call edge must pair with a fallthrough to the continuation");
    }

    #[test]
    fn test_return_without_gosub_rejected() {
        let stmts = vec![Stmt::new(Some(10), StmtKind::Return)];
        let err = CfgBuilder::build(&stmts).unwrap_err();
        assert!(err.to_string().contains("RETURN outside"));
    }

    #[test]
    fn test_goto_forward_reference_resolved() {
        let stmts = vec![
            Stmt::new(
                Some(10),
                StmtKind::Goto {
                    target: JumpTarget::Line(40),
                },
            ),
            let_stmt(20, "A", 1),
            let_stmt(40, "B", 2),
        ];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        let jump = cfg
            .edges
            .iter()
            .find(|e| e.kind == EdgeType::Jump)
            .expect("jump edge");
        assert_eq!(jump.to, cfg.line_to_block[&40]);
        // Line 20 is skipped over but still represented.
        assert!(cfg.line_to_block.contains_key(&20));
    }

    #[test]
    fn test_goto_unresolved_is_fatal() {
        let stmts = vec![Stmt::new(
            Some(10),
            StmtKind::Goto {
                target: JumpTarget::Line(999),
            },
        )];
        let err = CfgBuilder::build(&stmts).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedTarget { .. }));
    }

    #[test]
    fn test_on_gosub_shares_continuation() {
        let stmts = vec![
            Stmt::new(
                Some(10),
                StmtKind::OnGosub {
                    selector: Expr::IntLit(3),
                    targets: vec![JumpTarget::Line(100), JumpTarget::Line(200)],
                },
            ),
            Stmt::new(Some(20), StmtKind::End),
            let_stmt(100, "A", 1),
            Stmt::new(Some(110), StmtKind::Return),
            let_stmt(200, "B", 2),
            Stmt::new(Some(210), StmtKind::Return),
        ];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        let dispatch = cfg.line_to_block[&10];
        let out = cfg.out_edges(dispatch);
        let calls: Vec<_> = out.iter().filter(|e| e.kind == EdgeType::Call).collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].label.as_deref(), Some("1"));
        assert_eq!(calls[1].label.as_deref(), Some("2"));
        let ft = out
            .iter()
            .find(|e| e.kind == EdgeType::Fallthrough)
            .expect("fallthrough edge");
        assert!(cfg.gosub_return_blocks.contains(&ft.to));
    }

    #[test]
    fn test_rem_does_not_split_but_registers_line() {
        let stmts = vec![
            let_stmt(10, "A", 1),
            Stmt::new(
                Some(20),
                StmtKind::Rem {
                    text: "comment".to_string(),
                },
            ),
            let_stmt(30, "B", 2),
            Stmt::new(
                Some(40),
                StmtKind::Goto {
                    target: JumpTarget::Line(20),
                },
            ),
        ];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        // The REM line points at the block of the next real statement.
        assert_eq!(cfg.line_to_block[&20], cfg.line_to_block[&30]);
    }

    #[test]
    fn test_numbered_line_after_end_starts_fresh_block() {
        let stmts = vec![
            Stmt::new(
                Some(10),
                StmtKind::Gosub {
                    target: JumpTarget::Line(100),
                },
            ),
            Stmt::new(Some(20), StmtKind::End),
            let_stmt(100, "S", 1),
            Stmt::new(Some(110), StmtKind::Return),
        ];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        let sub_entry = cfg.line_to_block[&100];
        // The subroutine entry is not fused into the END block.
        assert_ne!(sub_entry, cfg.line_to_block[&20]);
        assert!(cfg.unreachable.contains(&sub_entry) || !cfg.blocks[sub_entry].statements.is_empty());
    }

    #[test]
    fn test_select_dispatch_edges_labeled() {
        use crate::ast::{CaseArm, CaseLabel};
        let stmts = vec![Stmt::new(
            Some(10),
            StmtKind::Select {
                selector: Expr::Var("X".to_string()),
                arms: vec![
                    CaseArm {
                        labels: vec![CaseLabel::Value(Expr::IntLit(1))],
                        body: vec![let_stmt(20, "A", 1)],
                    },
                    CaseArm {
                        labels: vec![CaseLabel::Range(Expr::IntLit(5), Expr::IntLit(9))],
                        body: vec![let_stmt(30, "B", 2)],
                    },
                ],
                otherwise: vec![let_stmt(40, "C", 3)],
            },
        )];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        let dispatch = cfg.line_to_block[&10];
        let out = cfg.out_edges(dispatch);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].label.as_deref(), Some("1"));
        assert_eq!(out[1].label.as_deref(), Some("5..9"));
        assert_eq!(out[2].label.as_deref(), Some("default"));
    }

    #[test]
    fn test_throw_routes_to_catch() {
        let stmts = vec![Stmt::new(
            Some(10),
            StmtKind::Try {
                body: vec![Stmt::new(
                    Some(20),
                    StmtKind::Throw {
                        code: Expr::IntLit(7),
                    },
                )],
                catch_var: Some("E".to_string()),
                catch_body: vec![let_stmt(30, "A", 1)],
                finally_body: vec![let_stmt(40, "B", 2)],
            },
        )];
        let cfg = CfgBuilder::build(&stmts).unwrap();
        let exc = cfg
            .edges
            .iter()
            .find(|e| e.kind == EdgeType::Exception)
            .expect("exception edge");
        let catch = cfg.block(exc.to);
        assert!(matches!(catch.role, BlockRole::CatchEntry { var: Some("E") }));
        // Both the try tail and the catch tail flow through FINALLY.
        let finally = cfg
            .blocks
            .iter()
            .find(|b| b.label.as_deref() == Some("Finally"))
            .expect("finally block");
        assert!(cfg.blocks[finally.id].predecessors.len() >= 2);
    }

    #[test]
    fn test_nested_function_rejected_in_callable_body() {
        let stmts = vec![Stmt::new(
            None,
            StmtKind::Sub {
                name: "INNER".to_string(),
                params: vec![],
                body: vec![],
            },
        )];
        let err = CfgBuilder::build(&stmts).unwrap_err();
        assert!(err.to_string().contains("nested FUNCTION/SUB"));
    }

    #[test]
    fn test_build_program_separates_callables() {
        let program = Program {
            statements: vec![
                let_stmt(10, "A", 1),
                Stmt::new(
                    None,
                    StmtKind::Sub {
                        name: "Greet".to_string(),
                        params: vec![],
                        body: vec![let_stmt(100, "B", 2)],
                    },
                ),
                Stmt::new(Some(20), StmtKind::End),
            ],
            symbols: Default::default(),
        };
        let pcfg = CfgBuilder::build_program(&program).unwrap();
        assert_eq!(pcfg.functions.len(), 1);
        assert_eq!(pcfg.functions[0].name, "Greet");
        assert!(pcfg.function("greet").is_some());
        // The SUB body is not part of main's CFG.
        assert!(!pcfg.main.line_to_block.contains_key(&100));
    }
}
