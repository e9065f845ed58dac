//! Statement lowering
//!
//! Statements whose semantics are purely control flow (IF, WHILE, GOTO,
//! GOSUB, ON, EXIT, ...) emit nothing here; their effect is entirely in the
//! block's terminator. FOR is the exception twice over: the FOR statement
//! itself emits the init triple in its init block, and the NEXT statement
//! emits the step addition in the increment block.

use crate::ast::{Expr, PrintSep, Stmt, StmtKind, Target};
use crate::cfg::{BasicBlock, BlockId, BlockRole, ControlFlowGraph};
use crate::emit::{runtime, Emitter, Slot, Value};
use crate::symbols::BasicType;
use crate::types::{abi_type, ir_type, IrType};

impl<'a> Emitter<'a> {
    pub(crate) fn emit_stmt(
        &mut self,
        stmt: &'a Stmt,
        block: &BasicBlock<'a>,
        cfg: &ControlFlowGraph<'a>,
    ) {
        match &stmt.kind {
            StmtKind::Let { target, value } => self.emit_let(target, value),
            StmtKind::Print { items } => self.emit_print(stmt, items),
            StmtKind::Input { prompt, targets } => self.emit_input(prompt.as_deref(), targets),
            StmtKind::Read { targets } => self.emit_read(targets),
            StmtKind::Restore { line } => self.emit_restore(*line),
            StmtKind::Dim { name, bounds } => self.emit_dim(name, bounds),
            StmtKind::Redim {
                name,
                bounds,
                preserve,
            } => self.emit_redim(name, bounds, *preserve),
            StmtKind::Erase { names } => self.emit_erase(names),
            StmtKind::Call { name, args } => self.emit_call_stmt(stmt, name, args),
            StmtKind::Throw { code } => {
                let v = self.emit_expr(code);
                let c = self.to_int_w(v);
                self.ins(format!("storew {}, ${}", c, runtime::ERR_CODE));
            }
            StmtKind::For { .. } => self.emit_for_init(stmt, block, cfg),
            StmtKind::Next { .. } => self.emit_for_increment(block, cfg),
            // Declarations and markers carry no code.
            StmtKind::Data { .. }
            | StmtKind::Local { .. }
            | StmtKind::Shared { .. }
            | StmtKind::Global { .. }
            | StmtKind::Label { .. }
            | StmtKind::Rem { .. } => {}
            // Control flow lives in the terminator.
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    fn emit_let(&mut self, target: &Target, value: &Expr) {
        let v = self.emit_expr(value);
        match target {
            Target::Var(name) => {
                let slot = self.slot_of(name);
                self.store_to(&slot.loc, &slot.basic, v, true);
            }
            Target::ArrayElem { name, indices } => {
                let slot = self.slot_of(name);
                let addr = self.emit_array_address(name, indices);
                self.store_to(&addr, &slot.basic, v, true);
            }
        }
    }

    /// Store a value into a typed location. String targets follow the
    /// reference-counting protocol: load old, retain new, store new,
    /// release old — old is released after the store so self-assignment is
    /// safe. `retain` is false for values the runtime hands over already
    /// retained (INPUT, READ).
    pub(crate) fn store_to(&mut self, loc: &str, basic: &BasicType, v: Value, retain: bool) {
        if basic.is_string() {
            if !v.basic.is_string() {
                self.comment("numeric value stored into string target");
                self.diag_note("numeric value stored into string target", 0);
                return;
            }
            let old = self.tmp();
            self.ins(format!("{} =l loadl {}", old, loc));
            if retain {
                self.ins(format!("call ${}(l {})", runtime::STRING_RETAIN, v.op));
            }
            self.ins(format!("storel {}, {}", v.op, loc));
            self.ins(format!("call ${}(l {})", runtime::STRING_RELEASE, old));
            return;
        }
        let ty = ir_type(basic);
        let converted = self.convert(&v, ty);
        self.ins(format!("{} {}, {}", ty.store_op(), converted, loc));
    }

    // ------------------------------------------------------------------
    // Console I/O
    // ------------------------------------------------------------------

    fn emit_print(&mut self, stmt: &Stmt, items: &[crate::ast::PrintItem]) {
        if items.is_empty() {
            self.ins(format!("call ${}()", runtime::PRINT_NEWLINE));
            return;
        }
        for item in items {
            let v = self.emit_expr(&item.expr);
            let basic = v.basic.clone();
            match basic {
                BasicType::Str => self.ins(format!("call ${}(l {})", runtime::PRINT_STR, v.op)),
                BasicType::Integer => {
                    let w = self.to_int_w(v);
                    self.ins(format!("call ${}(w {})", runtime::PRINT_INT, w));
                }
                BasicType::Long => {
                    let l = self.convert(&v, IrType::L);
                    self.ins(format!("call ${}(l {})", runtime::PRINT_LONG, l));
                }
                BasicType::Single | BasicType::Double => {
                    let d = self.convert(&v, IrType::D);
                    self.ins(format!("call ${}(d {})", runtime::PRINT_DOUBLE, d));
                }
                BasicType::Record(name) => {
                    self.comment(format!("PRINT of record type {}", name));
                    self.diag_note(
                        format!("PRINT of record type {}", name),
                        stmt.line_or_zero(),
                    );
                }
            }
            match item.sep {
                PrintSep::Comma => self.ins(format!("call ${}()", runtime::PRINT_TAB)),
                PrintSep::Semicolon => {}
                PrintSep::End => self.ins(format!("call ${}()", runtime::PRINT_NEWLINE)),
            }
        }
    }

    fn emit_input(&mut self, prompt: Option<&str>, targets: &[Target]) {
        if let Some(p) = prompt {
            let sym = self.data.intern(p);
            let s = self.tmp();
            self.ins(format!(
                "{} =l call ${}(l {})",
                s,
                runtime::STRING_FROM_LITERAL,
                sym
            ));
            self.ins(format!("call ${}(l {})", runtime::PRINT_STR, s));
        }
        for target in targets {
            let basic = self.target_basic(target);
            let v = self.emit_runtime_fetch(&basic, true);
            self.store_into_target(target, v);
        }
    }

    fn emit_read(&mut self, targets: &[Target]) {
        for target in targets {
            let basic = self.target_basic(target);
            let v = self.emit_runtime_fetch(&basic, false);
            self.store_into_target(target, v);
        }
    }

    /// One INPUT or READ fetch of the given type. READ performs a
    /// type-tagged read from the DATA pool and errors on exhaustion or
    /// mismatch inside the runtime.
    fn emit_runtime_fetch(&mut self, basic: &BasicType, from_input: bool) -> Value {
        let t = self.tmp();
        match basic {
            BasicType::Integer => {
                let callee = if from_input {
                    runtime::INPUT_INT
                } else {
                    runtime::READ_DATA_INT
                };
                self.ins(format!("{} =w call ${}()", t, callee));
                Value {
                    op: t,
                    ty: IrType::W,
                    basic: BasicType::Integer,
                }
            }
            BasicType::Long => {
                let callee = if from_input {
                    runtime::INPUT_LONG
                } else {
                    runtime::READ_DATA_LONG
                };
                self.ins(format!("{} =l call ${}()", t, callee));
                Value {
                    op: t,
                    ty: IrType::L,
                    basic: BasicType::Long,
                }
            }
            BasicType::Str => {
                let callee = if from_input {
                    runtime::INPUT_STRING
                } else {
                    runtime::READ_DATA_STRING
                };
                self.ins(format!("{} =l call ${}()", t, callee));
                Value {
                    op: t,
                    ty: IrType::L,
                    basic: BasicType::Str,
                }
            }
            _ => {
                let callee = if from_input {
                    runtime::INPUT_DOUBLE
                } else {
                    runtime::READ_DATA_DOUBLE
                };
                self.ins(format!("{} =d call ${}()", t, callee));
                Value {
                    op: t,
                    ty: IrType::D,
                    basic: BasicType::Double,
                }
            }
        }
    }

    fn target_basic(&mut self, target: &Target) -> BasicType {
        self.slot_of(target.name()).basic
    }

    fn store_into_target(&mut self, target: &Target, v: Value) {
        match target {
            Target::Var(name) => {
                let slot = self.slot_of(name);
                // Runtime results arrive already retained.
                self.store_to(&slot.loc, &slot.basic, v, false);
            }
            Target::ArrayElem { name, indices } => {
                let slot = self.slot_of(name);
                let addr = self.emit_array_address(name, indices);
                self.store_to(&addr, &slot.basic, v, false);
            }
        }
    }

    fn emit_restore(&mut self, line: Option<u32>) {
        let index = match line {
            Some(n) => self.data.restore_index(n),
            None => 0,
        };
        self.ins(format!("storew {}, ${}", index, runtime::DATA_PTR));
    }

    // ------------------------------------------------------------------
    // Array lifecycle
    // ------------------------------------------------------------------

    fn emit_dim(&mut self, name: &str, bounds: &[Expr]) {
        let slot = self.slot_of(name);
        let suffix = slot.basic.suffix_byte();
        let rendered: Vec<String> = bounds
            .iter()
            .map(|e| {
                let v = self.emit_expr(e);
                self.to_int_w(v)
            })
            .collect();
        let b1 = rendered.first().cloned().unwrap_or_else(|| "0".to_string());
        let b2 = rendered.get(1).cloned().unwrap_or_else(|| "0".to_string());
        let desc = self.tmp();
        self.ins(format!(
            "{} =l call ${}(w {}, w {}, w {}, w {}, w 0)",
            desc,
            runtime::ARRAY_NEW,
            suffix,
            rendered.len(),
            b1,
            b2
        ));
        self.ins(format!("storel {}, {}", desc, slot.loc));
    }

    fn emit_redim(&mut self, name: &str, bounds: &[Expr], preserve: bool) {
        let slot = self.slot_of(name);
        let rendered: Vec<String> = bounds
            .iter()
            .map(|e| {
                let v = self.emit_expr(e);
                self.to_int_w(v)
            })
            .collect();
        let b1 = rendered.first().cloned().unwrap_or_else(|| "0".to_string());
        let b2 = rendered.get(1).cloned().unwrap_or_else(|| "0".to_string());
        let old = self.tmp();
        self.ins(format!("{} =l loadl {}", old, slot.loc));
        let zero = if !preserve && self.opts.redim_zeroes {
            1
        } else {
            0
        };
        let desc = self.tmp();
        self.ins(format!(
            "{} =l call ${}(l {}, w {}, w {}, w {}, w {}, w {})",
            desc,
            runtime::ARRAY_REDIM,
            old,
            preserve as u32,
            zero,
            rendered.len(),
            b1,
            b2
        ));
        self.ins(format!("storel {}, {}", desc, slot.loc));
    }

    fn emit_erase(&mut self, names: &[String]) {
        for name in names {
            let slot = self.slot_of(name);
            let desc = self.tmp();
            self.ins(format!("{} =l loadl {}", desc, slot.loc));
            self.ins(format!("call ${}(l {})", runtime::ARRAY_ERASE, desc));
            self.ins(format!("storel 0, {}", slot.loc));
        }
    }

    // ------------------------------------------------------------------
    // SUB invocation
    // ------------------------------------------------------------------

    fn emit_call_stmt(&mut self, stmt: &Stmt, name: &str, args: &[Expr]) {
        let sig = self.program.symbols.function(name).cloned();
        match sig {
            Some(sig) => {
                let mut rendered = Vec::with_capacity(args.len());
                for (i, arg) in args.iter().enumerate() {
                    let v = self.emit_expr(arg);
                    let target = sig.params.get(i).map(|p| abi_type(&p.ty)).unwrap_or(v.ty);
                    let converted = self.convert(&v, target);
                    rendered.push(format!("{} {}", target.as_str(), converted));
                }
                self.ins(format!(
                    "call ${}({})",
                    crate::mangle::function(name),
                    rendered.join(", ")
                ));
            }
            None => {
                self.comment(format!("unknown SUB {}", name));
                self.diag_note(format!("unknown SUB {}", name), stmt.line_or_zero());
            }
        }
    }

    // ------------------------------------------------------------------
    // FOR machinery
    // ------------------------------------------------------------------

    fn for_slots(header: BlockId) -> (String, String, String) {
        (
            format!("%f{}_var", header),
            format!("%f{}_limit", header),
            format!("%f{}_step", header),
        )
    }

    /// The init triple: allocate the loop-variable, limit and step slots,
    /// evaluate the three expressions exactly once, store them. The control
    /// variable is rebound to the loop slot so body reads and writes (and
    /// reads after the loop) see the counted value.
    fn emit_for_init(&mut self, stmt: &'a Stmt, block: &BasicBlock<'a>, cfg: &ControlFlowGraph<'a>) {
        let (var, from, to, step) = match &stmt.kind {
            StmtKind::For {
                var,
                from,
                to,
                step,
                ..
            } => (var, from, to, step),
            _ => return,
        };
        let header = match cfg.loops.iter().find(|l| l.init == Some(block.id)) {
            Some(l) => l.header,
            None => {
                self.comment("FOR init block without loop metadata");
                return;
            }
        };
        let basic = self.slot_of(var).basic;
        let vt = ir_type(&basic);
        let (var_slot, limit_slot, step_slot) = Self::for_slots(header);

        self.ins(format!("{} =l {} {}", var_slot, vt.alloc_op(), vt.slot_size()));
        self.ins(format!("{} =l {} {}", limit_slot, vt.alloc_op(), vt.slot_size()));
        self.ins(format!("{} =l {} {}", step_slot, vt.alloc_op(), vt.slot_size()));

        let start = self.emit_expr(from);
        let start = self.convert(&start, vt);
        self.ins(format!("{} {}, {}", vt.store_op(), start, var_slot));
        let limit = self.emit_expr(to);
        let limit = self.convert(&limit, vt);
        self.ins(format!("{} {}, {}", vt.store_op(), limit, limit_slot));
        let step_value = match step {
            Some(e) => {
                let v = self.emit_expr(e);
                self.convert(&v, vt)
            }
            None => match vt {
                IrType::S => "s_1".to_string(),
                IrType::D => "d_1".to_string(),
                _ => "1".to_string(),
            },
        };
        self.ins(format!("{} {}, {}", vt.store_op(), step_value, step_slot));

        self.rebind_slot(
            var,
            Slot {
                loc: var_slot,
                basic,
                is_array: false,
            },
        );
    }

    /// Continuation predicate at the header: limit and step are reloaded on
    /// every pass; continue while (step >= 0 and var <= limit) or
    /// (step < 0 and var >= limit).
    pub(crate) fn emit_for_predicate(
        &mut self,
        stmt: &'a Stmt,
        header: BlockId,
        _cfg: &ControlFlowGraph<'a>,
    ) -> String {
        let var = match &stmt.kind {
            StmtKind::For { var, .. } => var,
            _ => return "0".to_string(),
        };
        let basic = self.slot_of(var).basic;
        let vt = ir_type(&basic);
        let (var_slot, limit_slot, step_slot) = Self::for_slots(header);

        let v = self.tmp();
        self.ins(format!("{} ={} {} {}", v, vt.as_str(), vt.load_op(), var_slot));
        let limit = self.tmp();
        self.ins(format!("{} ={} {} {}", limit, vt.as_str(), vt.load_op(), limit_slot));
        let step = self.tmp();
        self.ins(format!("{} ={} {} {}", step, vt.as_str(), vt.load_op(), step_slot));

        let up = self.tmp();
        self.ins(format!(
            "{} =w {} {}, {}",
            up,
            crate::types::cmp_op("ge", vt),
            step,
            vt.zero()
        ));
        let within_up = self.tmp();
        self.ins(format!(
            "{} =w {} {}, {}",
            within_up,
            crate::types::cmp_op("le", vt),
            v,
            limit
        ));
        let cont_up = self.tmp();
        self.ins(format!("{} =w and {}, {}", cont_up, up, within_up));

        let down = self.tmp();
        self.ins(format!(
            "{} =w {} {}, {}",
            down,
            crate::types::cmp_op("lt", vt),
            step,
            vt.zero()
        ));
        let within_down = self.tmp();
        self.ins(format!(
            "{} =w {} {}, {}",
            within_down,
            crate::types::cmp_op("ge", vt),
            v,
            limit
        ));
        let cont_down = self.tmp();
        self.ins(format!("{} =w and {}, {}", cont_down, down, within_down));

        let cond = self.tmp();
        self.ins(format!("{} =w or {}, {}", cond, cont_up, cont_down));
        cond
    }

    /// The step addition, placed in the increment block the builder moved
    /// NEXT into.
    fn emit_for_increment(&mut self, block: &BasicBlock<'a>, cfg: &ControlFlowGraph<'a>) {
        let for_stmt = match block.role {
            BlockRole::ForIncrement { stmt } => stmt,
            _ => {
                self.comment("NEXT outside an increment block");
                return;
            }
        };
        let var = match &for_stmt.kind {
            StmtKind::For { var, .. } => var,
            _ => return,
        };
        let header = match cfg.loop_by_increment(block.id) {
            Some(l) => l.header,
            None => {
                self.comment("increment block without loop metadata");
                return;
            }
        };
        let basic = self.slot_of(var).basic;
        let vt = ir_type(&basic);
        let (var_slot, _, step_slot) = Self::for_slots(header);

        let v = self.tmp();
        self.ins(format!("{} ={} {} {}", v, vt.as_str(), vt.load_op(), var_slot));
        let step = self.tmp();
        self.ins(format!("{} ={} {} {}", step, vt.as_str(), vt.load_op(), step_slot));
        let next = self.tmp();
        self.ins(format!("{} ={} add {}, {}", next, vt.as_str(), v, step));
        self.ins(format!("{} {}, {}", vt.store_op(), next, var_slot));
    }
}
