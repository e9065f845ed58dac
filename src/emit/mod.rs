//! IR emitter: CFG to textual SSA
//!
//! The emitter walks each function's blocks in ascending id and derives
//! every terminator from the block's typed out-edges. It never re-examines
//! source order; the CFG is ground truth. Unreachable blocks are emitted
//! like any other, since GOSUB and ON targets reach them by id at runtime.

pub mod data;
mod expr;
mod runtime;
mod stmt;

pub use expr::Value;

use std::collections::HashMap;
use std::fmt::Write;

use tracing::debug;

use crate::ast::{Program, Stmt, StmtKind};
use crate::cfg::{BasicBlock, BlockId, BlockRole, CfgEdge, ControlFlowGraph, EdgeType, ProgramCfg};
use crate::diag::Diagnostic;
use crate::mangle;
use crate::symbols::BasicType;
use crate::types::{abi_type, convert_op, ir_type, IrType};

use data::DataSection;

/// Emitter knobs.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    /// REDIM without PRESERVE zero-initializes the new contents.
    pub redim_zeroes: bool,
    /// Capacity (entries) of the generated GOSUB return stack.
    pub gosub_stack_depth: usize,
}

impl Default for EmitOptions {
    fn default() -> Self {
        EmitOptions {
            redim_zeroes: true,
            gosub_stack_depth: 256,
        }
    }
}

/// Result of emitting a whole program.
#[derive(Debug)]
pub struct EmitResult {
    pub ir: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Where a variable's storage lives during the current function.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    /// `%v_name` for stack slots, `$g_name` for globals.
    pub loc: String,
    pub basic: BasicType,
    pub is_array: bool,
}

impl Slot {
    pub fn ty(&self) -> IrType {
        if self.is_array {
            IrType::L
        } else {
            ir_type(&self.basic)
        }
    }
}

/// Emits the IR for one program; holds the shared data section and the
/// per-function state (temp counter, variable slots, output buffer).
pub struct Emitter<'a> {
    program: &'a Program,
    pcfg: &'a ProgramCfg<'a>,
    opts: EmitOptions,
    pub(crate) data: DataSection,
    pub(crate) diags: Vec<Diagnostic>,

    buf: String,
    tmp_counter: usize,
    aux_counter: usize,
    pub(crate) iif_counter: usize,
    /// Folded variable name -> storage. FOR init rebinds the control
    /// variable to the loop's var slot.
    slots: HashMap<String, Slot>,
    /// Stack slots of local strings, released before each `ret`.
    local_strings: Vec<String>,
    current_fn: Option<String>,
}

impl<'a> Emitter<'a> {
    pub fn new(program: &'a Program, pcfg: &'a ProgramCfg<'a>, opts: EmitOptions) -> Self {
        let mut data = DataSection::new(opts.gosub_stack_depth);
        data.collect_data(program);
        // Globals get their data slots up front, in declaration order, so
        // they exist (zeroed) whether or not any block touches them.
        for rec in program.symbols.globals() {
            data.ensure_global(
                &data::global_symbol(&rec.name),
                data::global_slot_type(&rec.ty, rec.array.is_some()),
            );
        }
        Emitter {
            program,
            pcfg,
            opts,
            data,
            diags: Vec::new(),
            buf: String::new(),
            tmp_counter: 0,
            aux_counter: 0,
            iif_counter: 0,
            slots: HashMap::new(),
            local_strings: Vec::new(),
            current_fn: None,
        }
    }

    /// Emit the IR fragment for one callable. `name` is None for main.
    pub fn emit_function(&mut self, name: Option<&str>, cfg: &ControlFlowGraph<'a>) -> String {
        self.buf.clear();
        self.tmp_counter = 0;
        self.aux_counter = 0;
        self.slots.clear();
        self.local_strings.clear();
        self.current_fn = name.map(|s| s.to_string());
        debug!(function = name.unwrap_or("main"), blocks = cfg.blocks.len(), "emitting");

        self.emit_signature(name);
        for block in &cfg.blocks {
            self.emit_block(block, cfg);
        }
        let _ = writeln!(self.buf, "}}");
        std::mem::take(&mut self.buf)
    }

    /// Emit the whole program: main, every callable, then the data section.
    pub fn emit_program(mut self) -> EmitResult {
        let mut ir = String::new();
        let pcfg = self.pcfg;
        ir.push_str(&self.emit_function(None, &pcfg.main));
        ir.push('\n');
        for f in &pcfg.functions {
            ir.push_str(&self.emit_function(Some(&f.name), &f.cfg));
            ir.push('\n');
        }
        ir.push_str(&self.data.render());
        EmitResult {
            ir,
            diagnostics: self.diags,
        }
    }

    // ------------------------------------------------------------------
    // Low-level output helpers
    // ------------------------------------------------------------------

    pub(crate) fn ins(&mut self, text: impl AsRef<str>) {
        let _ = writeln!(self.buf, "\t{}", text.as_ref());
    }

    pub(crate) fn comment(&mut self, text: impl AsRef<str>) {
        let _ = writeln!(self.buf, "\t# {}", text.as_ref());
    }

    pub(crate) fn put_label(&mut self, text: impl AsRef<str>) {
        let _ = writeln!(self.buf, "{}", text.as_ref());
    }

    pub(crate) fn tmp(&mut self) -> String {
        let t = format!("%t{}", self.tmp_counter);
        self.tmp_counter += 1;
        t
    }

    /// Label for an emitter-internal chain step; unique per function.
    pub(crate) fn aux_label(&mut self, tag: &str) -> String {
        let l = format!("@x{}_{}", self.aux_counter, tag);
        self.aux_counter += 1;
        l
    }

    pub(crate) fn block_ref(id: BlockId) -> String {
        format!("@b{}", id)
    }

    pub(crate) fn diag_note(&mut self, message: impl Into<String>, line: u32) {
        self.diags.push(Diagnostic::note(message, line));
    }

    // ------------------------------------------------------------------
    // Variable storage
    // ------------------------------------------------------------------

    fn sigil_type(name: &str) -> BasicType {
        match name.chars().last() {
            Some('$') => BasicType::Str,
            Some('%') => BasicType::Integer,
            Some('&') => BasicType::Long,
            Some('!') => BasicType::Single,
            Some('#') => BasicType::Double,
            _ => BasicType::Double,
        }
    }

    /// Resolve a variable to its storage. Locals were registered at the
    /// function prologue; FOR init may have rebound the control variable.
    /// Anything the symbol table does not know becomes a global with a
    /// sigil-inferred type and a note diagnostic.
    pub(crate) fn slot_of(&mut self, name: &str) -> Slot {
        let key = mangle::label(name);
        if let Some(slot) = self.slots.get(&key) {
            return slot.clone();
        }
        let current_fn = self.current_fn.clone();
        if let Some(rec) = self.program.symbols.lookup(name, current_fn.as_deref()) {
            let slot = Slot {
                loc: format!("${}", data::global_symbol(&rec.name)),
                basic: rec.ty.clone(),
                is_array: rec.array.is_some(),
            };
            self.data
                .ensure_global(&data::global_symbol(&rec.name), data::global_slot_type(&rec.ty, rec.array.is_some()));
            self.slots.insert(key, slot.clone());
            return slot;
        }
        let basic = Self::sigil_type(name);
        self.diag_note(format!("undeclared variable {} treated as global", name), 0);
        let slot = Slot {
            loc: format!("${}", data::global_symbol(name)),
            basic: basic.clone(),
            is_array: false,
        };
        self.data
            .ensure_global(&data::global_symbol(name), ir_type(&basic));
        self.slots.insert(key, slot.clone());
        slot
    }

    /// Rebind a variable to a new storage location (FOR control slot).
    pub(crate) fn rebind_slot(&mut self, name: &str, slot: Slot) {
        self.slots.insert(mangle::label(name), slot);
    }

    // ------------------------------------------------------------------
    // Function shell
    // ------------------------------------------------------------------

    fn emit_signature(&mut self, name: Option<&str>) {
        match name {
            None => self.put_label("export function w $main() {"),
            Some(fn_name) => {
                let sig = self.program.symbols.function(fn_name).cloned();
                let mut params_text = String::new();
                if let Some(sig) = &sig {
                    for (i, p) in sig.params.iter().enumerate() {
                        if i > 0 {
                            params_text.push_str(", ");
                        }
                        let _ = write!(
                            params_text,
                            "{} %p_{}",
                            abi_type(&p.ty).as_str(),
                            mangle::label(&p.name)
                        );
                    }
                }
                let ret = sig.as_ref().and_then(|s| s.ret.as_ref());
                match ret {
                    Some(ty) => {
                        let line = format!(
                            "function {} ${}({}) {{",
                            abi_type(ty).as_str(),
                            mangle::function(fn_name),
                            params_text
                        );
                        self.put_label(line);
                    }
                    None => {
                        let line =
                            format!("function ${}({}) {{", mangle::function(fn_name), params_text);
                        self.put_label(line);
                    }
                }
            }
        }
    }

    /// Stack allocations and zero-initialization for every scalar local of
    /// the current scope, plus parameter spills and the return-value slot.
    fn emit_prologue(&mut self) {
        let current_fn = self.current_fn.clone();
        let sig = current_fn
            .as_deref()
            .and_then(|n| self.program.symbols.function(n))
            .cloned();

        let locals: Vec<_> = self
            .program
            .symbols
            .locals_of(current_fn.as_deref())
            .into_iter()
            .cloned()
            .collect();
        for rec in &locals {
            let slot_ty = data::global_slot_type(&rec.ty, rec.array.is_some());
            let loc = format!("%{}", mangle::local(&rec.name));
            self.ins(format!("{} =l {} {}", loc, slot_ty.alloc_op(), slot_ty.slot_size()));
            self.ins(format!("{} {}, {}", slot_ty.store_op(), slot_ty.zero(), loc));
            if rec.ty.is_string() && rec.array.is_none() {
                self.local_strings.push(loc.clone());
            }
            self.slots.insert(
                mangle::label(&rec.name),
                Slot {
                    loc,
                    basic: rec.ty.clone(),
                    is_array: rec.array.is_some(),
                },
            );
        }

        if let Some(sig) = &sig {
            // Spill incoming parameters into their slots; Singles arrive
            // widened to d and are truncated on the way in.
            for p in &sig.params {
                let key = mangle::label(&p.name);
                if !self.slots.contains_key(&key) {
                    let slot_ty = ir_type(&p.ty);
                    let loc = format!("%{}", mangle::local(&p.name));
                    self.ins(format!("{} =l {} {}", loc, slot_ty.alloc_op(), slot_ty.slot_size()));
                    self.slots.insert(
                        key.clone(),
                        Slot {
                            loc,
                            basic: p.ty.clone(),
                            is_array: false,
                        },
                    );
                }
                let slot = self.slots[&key].clone();
                let incoming = format!("%p_{}", mangle::label(&p.name));
                let from_ty = abi_type(&p.ty);
                let to_ty = ir_type(&p.ty);
                let value = match convert_op(from_ty, to_ty) {
                    Some(op) => {
                        let t = self.tmp();
                        self.ins(format!("{} ={} {} {}", t, to_ty.as_str(), op, incoming));
                        t
                    }
                    None => incoming,
                };
                self.ins(format!("{} {}, {}", to_ty.store_op(), value, slot.loc));
            }

            // Return-value slot, named after the function itself.
            if let Some(ret) = &sig.ret {
                let key = mangle::label(&sig.name);
                if !self.slots.contains_key(&key) {
                    let slot_ty = ir_type(ret);
                    let loc = format!("%{}", mangle::local(&sig.name));
                    self.ins(format!("{} =l {} {}", loc, slot_ty.alloc_op(), slot_ty.slot_size()));
                    self.ins(format!("{} {}, {}", slot_ty.store_op(), slot_ty.zero(), loc));
                    if ret.is_string() {
                        self.local_strings.push(loc.clone());
                    }
                    self.slots.insert(
                        key,
                        Slot {
                            loc,
                            basic: ret.clone(),
                            is_array: false,
                        },
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Per-block emission
    // ------------------------------------------------------------------

    fn emit_block(&mut self, block: &BasicBlock<'a>, cfg: &ControlFlowGraph<'a>) {
        match (&block.label, block.first_line()) {
            (Some(l), Some(n)) => self.put_label(format!("@b{} # {} (line {})", block.id, l, n)),
            (Some(l), None) => self.put_label(format!("@b{} # {}", block.id, l)),
            (None, Some(n)) => self.put_label(format!("@b{} # line {}", block.id, n)),
            (None, None) => self.put_label(format!("@b{}", block.id)),
        }

        if block.id == cfg.entry {
            self.emit_prologue();
        }

        if let BlockRole::CatchEntry { var: Some(var) } = block.role {
            let code = self.tmp();
            self.ins(format!("{} =w loadw ${}", code, runtime::ERR_CODE));
            let slot = self.slot_of(var);
            let to_ty = slot.ty();
            let value = match convert_op(IrType::W, to_ty) {
                Some(op) => {
                    let t = self.tmp();
                    self.ins(format!("{} ={} {} {}", t, to_ty.as_str(), op, code));
                    t
                }
                None => code,
            };
            self.ins(format!("{} {}, {}", to_ty.store_op(), value, slot.loc));
        }

        for stmt in block.statements.iter().copied() {
            self.emit_stmt(stmt, block, cfg);
        }

        self.emit_terminator(block, cfg);
    }

    // ------------------------------------------------------------------
    // Terminators
    // ------------------------------------------------------------------

    fn emit_terminator(&mut self, block: &BasicBlock<'a>, cfg: &ControlFlowGraph<'a>) {
        let out: Vec<CfgEdge> = cfg.out_edges(block.id).into_iter().cloned().collect();

        if out.iter().any(|e| e.kind == EdgeType::Return) {
            self.emit_return_dispatch(block, cfg);
            return;
        }
        match block.role {
            BlockRole::OnDispatch { stmt } => {
                self.emit_on_dispatch(stmt, &out);
                return;
            }
            BlockRole::SelectDispatch { stmt } => {
                self.emit_select_dispatch(stmt, &out);
                return;
            }
            _ => {}
        }

        let true_edge = out.iter().find(|e| e.kind == EdgeType::TrueBranch);
        let false_edge = out.iter().find(|e| e.kind == EdgeType::FalseBranch);
        if let (Some(t), Some(f)) = (true_edge, false_edge) {
            let cond = self.block_condition(block, cfg);
            self.ins(format!(
                "jnz {}, {}, {}",
                cond,
                Self::block_ref(t.to),
                Self::block_ref(f.to)
            ));
            return;
        }

        if let Some(call) = out.iter().find(|e| e.kind == EdgeType::Call) {
            // GOSUB: push the continuation block id, then jump to the
            // subroutine entry.
            let cont = out
                .iter()
                .find(|e| matches!(e.kind, EdgeType::Fallthrough | EdgeType::Jump))
                .map(|e| e.to);
            if let Some(cont) = cont {
                self.emit_gosub_push(cont);
                self.ins(format!("jmp {}", Self::block_ref(call.to)));
            } else {
                self.comment("gosub call site missing continuation edge");
                self.ins(format!("jmp {}", Self::block_ref(call.to)));
            }
            return;
        }

        if let Some(exc) = out.iter().find(|e| e.kind == EdgeType::Exception) {
            self.ins(format!("jmp {}", Self::block_ref(exc.to)));
            return;
        }

        if let Some(edge) = out
            .iter()
            .find(|e| matches!(e.kind, EdgeType::Fallthrough | EdgeType::Jump))
        {
            self.ins(format!("jmp {}", Self::block_ref(edge.to)));
            return;
        }

        // Zero out-edges: end of the callable, one way or another.
        self.emit_function_exit(block);
    }

    fn emit_function_exit(&mut self, block: &BasicBlock<'a>) {
        match block.last_stmt().map(|s| &s.kind) {
            Some(StmtKind::End) => {
                if self.current_fn.is_none() {
                    self.ins("ret 0");
                } else {
                    // END inside a callable terminates the whole program.
                    self.ins(format!("call ${}(w 0)", runtime::BASIC_END));
                    self.ins("hlt");
                }
                return;
            }
            Some(StmtKind::Throw { .. }) => {
                // No enclosing CATCH; the stored code reaches the runtime
                // error routine, which terminates the program.
                let code = self.tmp();
                self.ins(format!("{} =w loadw ${}", code, runtime::ERR_CODE));
                self.ins(format!("call ${}(w {})", runtime::BASIC_ERROR, code));
                self.ins("hlt");
                return;
            }
            _ => {}
        }

        self.emit_ret()
    }

    /// Release local strings, then return the function's value (or 0 from
    /// main, or nothing from a SUB).
    pub(crate) fn emit_ret(&mut self) {
        for loc in self.local_strings.clone() {
            let v = self.tmp();
            self.ins(format!("{} =l loadl {}", v, loc));
            self.ins(format!("call ${}(l {})", runtime::STRING_RELEASE, v));
        }
        let current_fn = self.current_fn.clone();
        match current_fn {
            None => self.ins("ret 0"),
            Some(name) => {
                let ret = self
                    .program
                    .symbols
                    .function(&name)
                    .and_then(|s| s.ret.clone());
                match ret {
                    Some(ty) => {
                        let slot = self.slot_of(&name);
                        let v = self.tmp();
                        let slot_ty = ir_type(&ty);
                        self.ins(format!("{} ={} {} {}", v, slot_ty.as_str(), slot_ty.load_op(), slot.loc));
                        let out_ty = abi_type(&ty);
                        let v = match convert_op(slot_ty, out_ty) {
                            Some(op) => {
                                let t = self.tmp();
                                self.ins(format!("{} ={} {} {}", t, out_ty.as_str(), op, v));
                                t
                            }
                            None => v,
                        };
                        self.ins(format!("ret {}", v));
                    }
                    None => self.ins("ret"),
                }
            }
        }
    }

    fn emit_gosub_push(&mut self, cont: BlockId) {
        let sp = self.tmp();
        self.ins(format!("{} =w loadw ${}", sp, runtime::GOSUB_SP));
        let idx = self.tmp();
        self.ins(format!("{} =l extsw {}", idx, sp));
        let off = self.tmp();
        self.ins(format!("{} =l mul {}, 4", off, idx));
        let addr = self.tmp();
        self.ins(format!("{} =l add ${}, {}", addr, runtime::GOSUB_STACK, off));
        self.ins(format!("storew {}, {}", cont, addr));
        let next = self.tmp();
        self.ins(format!("{} =w add {}, 1", next, sp));
        self.ins(format!("storew {}, ${}", next, runtime::GOSUB_SP));
    }

    /// RETURN: pop the continuation id and dispatch over the registered
    /// return points only. The dialect has no indirect jumps, so this is a
    /// comparison chain over `gosub_return_blocks`.
    fn emit_return_dispatch(&mut self, _block: &BasicBlock<'a>, cfg: &ControlFlowGraph<'a>) {
        let sp = self.tmp();
        self.ins(format!("{} =w loadw ${}", sp, runtime::GOSUB_SP));
        let under = self.tmp();
        self.ins(format!("{} =w csltw {}, 1", under, sp));
        let uf_label = self.aux_label("underflow");
        let pop_label = self.aux_label("pop");
        self.ins(format!("jnz {}, {}, {}", under, uf_label, pop_label));
        self.put_label(uf_label);
        self.ins(format!(
            "call ${}(w {})",
            runtime::BASIC_ERROR,
            runtime::ERR_RETURN_WITHOUT_GOSUB
        ));
        self.ins("hlt");
        self.put_label(pop_label);
        let top = self.tmp();
        self.ins(format!("{} =w sub {}, 1", top, sp));
        self.ins(format!("storew {}, ${}", top, runtime::GOSUB_SP));
        let idx = self.tmp();
        self.ins(format!("{} =l extsw {}", idx, top));
        let off = self.tmp();
        self.ins(format!("{} =l mul {}, 4", off, idx));
        let addr = self.tmp();
        self.ins(format!("{} =l add ${}, {}", addr, runtime::GOSUB_STACK, off));
        let rid = self.tmp();
        self.ins(format!("{} =w loadw {}", rid, addr));

        for &target in cfg.gosub_return_blocks.iter() {
            let hit = self.tmp();
            self.ins(format!("{} =w ceqw {}, {}", hit, rid, target));
            let next = self.aux_label("retchk");
            self.ins(format!("jnz {}, {}, {}", hit, Self::block_ref(target), next));
            self.put_label(next);
        }
        // Corrupt stack entry: terminate.
        self.ins(format!(
            "call ${}(w {})",
            runtime::BASIC_ERROR,
            runtime::ERR_RETURN_WITHOUT_GOSUB
        ));
        self.ins("hlt");
    }

    fn emit_on_dispatch(&mut self, stmt: &'a Stmt, out: &[CfgEdge]) {
        let (selector, is_gosub) = match &stmt.kind {
            StmtKind::OnGoto { selector, .. } => (selector, false),
            StmtKind::OnGosub { selector, .. } => (selector, true),
            _ => return,
        };
        let value = self.emit_expr(selector);
        let sel = self.to_int_w(value);

        let fallthrough = out
            .iter()
            .find(|e| e.kind == EdgeType::Fallthrough)
            .map(|e| e.to);
        let mut numbered: Vec<(usize, BlockId)> = out
            .iter()
            .filter_map(|e| {
                e.label
                    .as_deref()
                    .and_then(|l| l.parse::<usize>().ok())
                    .map(|n| (n, e.to))
            })
            .collect();
        numbered.sort_unstable();

        let mut stubs: Vec<(String, BlockId)> = Vec::new();
        for (n, target) in &numbered {
            let hit = self.tmp();
            self.ins(format!("{} =w ceqw {}, {}", hit, sel, n));
            let next = self.aux_label("oncase");
            if is_gosub {
                let stub = self.aux_label("oncall");
                self.ins(format!("jnz {}, {}, {}", hit, stub, next));
                stubs.push((stub, *target));
            } else {
                self.ins(format!("jnz {}, {}, {}", hit, Self::block_ref(*target), next));
            }
            self.put_label(next);
        }
        // Selector 0 or out of range: fall through without calling.
        match fallthrough {
            Some(ft) => self.ins(format!("jmp {}", Self::block_ref(ft))),
            None => self.ins("hlt"),
        }
        // ON GOSUB stubs share one continuation: push it, then jump.
        if let Some(cont) = fallthrough {
            for (stub, target) in stubs {
                self.put_label(stub);
                self.emit_gosub_push(cont);
                self.ins(format!("jmp {}", Self::block_ref(target)));
            }
        }
    }

    fn emit_select_dispatch(&mut self, stmt: &'a Stmt, out: &[CfgEdge]) {
        let (selector, arms) = match &stmt.kind {
            StmtKind::Select { selector, arms, .. } => (selector, arms),
            _ => return,
        };
        let sel = self.emit_expr(selector);

        let jump_targets: Vec<&CfgEdge> = out.iter().filter(|e| e.kind == EdgeType::Jump).collect();
        let default = jump_targets
            .iter()
            .find(|e| e.label.as_deref() == Some("default"))
            .map(|e| e.to);
        let arm_edges: Vec<&CfgEdge> = jump_targets
            .iter()
            .filter(|e| e.label.as_deref() != Some("default"))
            .copied()
            .collect();

        for (arm, edge) in arms.iter().zip(arm_edges.iter()) {
            let matched = self.emit_case_match(&sel, arm);
            let next = self.aux_label("case");
            self.ins(format!(
                "jnz {}, {}, {}",
                matched,
                Self::block_ref(edge.to),
                next
            ));
            self.put_label(next);
        }
        match default {
            Some(d) => self.ins(format!("jmp {}", Self::block_ref(d))),
            None => self.ins("hlt"),
        }
    }

    /// The condition value feeding a block's paired conditional edges.
    fn block_condition(&mut self, block: &BasicBlock<'a>, cfg: &ControlFlowGraph<'a>) -> String {
        match block.role {
            BlockRole::ForHeader { stmt } => self.emit_for_predicate(stmt, block.id, cfg),
            BlockRole::CondHeader { cond } | BlockRole::PostTest { cond } => {
                let v = self.emit_expr(cond);
                self.to_bool(v)
            }
            _ => {
                if let Some(stmt) = block.last_stmt() {
                    if let StmtKind::If { cond, .. } = &stmt.kind {
                        let v = self.emit_expr(cond);
                        return self.to_bool(v);
                    }
                }
                self.comment("conditional block without a condition source");
                self.diag_note("conditional block without a condition source", 0);
                "0".to_string()
            }
        }
    }
}
