//! Expression lowering
//!
//! Every expression evaluates to an operand string (temporary or constant)
//! plus its IR class and BASIC type. Binary arithmetic promotes to a common
//! class through the type mapper; string operations and most intrinsics go
//! through the runtime. Comparisons always produce a machine word.

use crate::ast::{BinaryOp, CaseArm, CaseLabel, Expr, UnaryOp};
use crate::emit::{data, runtime, Emitter};
use crate::symbols::BasicType;
use crate::types::{abi_type, cmp_op, convert_op, ir_type, promote, IrType};

/// An evaluated expression: operand text, IR class, BASIC type.
#[derive(Debug, Clone)]
pub struct Value {
    pub op: String,
    pub ty: IrType,
    pub basic: BasicType,
}

impl Value {
    fn new(op: impl Into<String>, ty: IrType, basic: BasicType) -> Self {
        Value {
            op: op.into(),
            ty,
            basic,
        }
    }

    fn int_w(op: impl Into<String>) -> Self {
        Value::new(op, IrType::W, BasicType::Integer)
    }
}

impl<'a> Emitter<'a> {
    pub(crate) fn emit_expr(&mut self, expr: &Expr) -> Value {
        match expr {
            Expr::IntLit(v) => {
                if i32::try_from(*v).is_ok() {
                    Value::new(v.to_string(), IrType::W, BasicType::Integer)
                } else {
                    Value::new(v.to_string(), IrType::L, BasicType::Long)
                }
            }
            Expr::FloatLit(v) => Value::new(data::float_literal(*v), IrType::D, BasicType::Double),
            Expr::StringLit(s) => {
                let sym = self.data.intern(s);
                let t = self.tmp();
                self.ins(format!(
                    "{} =l call ${}(l {})",
                    t,
                    runtime::STRING_FROM_LITERAL,
                    sym
                ));
                Value::new(t, IrType::L, BasicType::Str)
            }
            Expr::Var(name) => {
                let slot = self.slot_of(name);
                let ty = slot.ty();
                let t = self.tmp();
                self.ins(format!("{} ={} {} {}", t, ty.as_str(), ty.load_op(), slot.loc));
                Value::new(t, ty, slot.basic)
            }
            Expr::ArrayRef { name, indices } => {
                let addr = self.emit_array_address(name, indices);
                let slot = self.slot_of(name);
                let elem_ty = ir_type(&slot.basic);
                let t = self.tmp();
                self.ins(format!("{} ={} {} {}", t, elem_ty.as_str(), elem_ty.load_op(), addr));
                Value::new(t, elem_ty, slot.basic)
            }
            Expr::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs),
            Expr::Unary { op, operand } => self.emit_unary(*op, operand),
            Expr::Call { name, args } => self.emit_call_expr(name, args),
            Expr::Iif {
                cond,
                then_val,
                else_val,
            } => self.emit_iif(cond, then_val, else_val),
        }
    }

    /// Bounds-checked element address of an array reference.
    pub(crate) fn emit_array_address(&mut self, name: &str, indices: &[Expr]) -> String {
        let slot = self.slot_of(name);
        let desc = self.tmp();
        self.ins(format!("{} =l loadl {}", desc, slot.loc));
        let idx: Vec<String> = indices
            .iter()
            .map(|e| {
                let v = self.emit_expr(e);
                self.to_int_w(v)
            })
            .collect();
        let addr = self.tmp();
        match idx.len() {
            1 => self.ins(format!(
                "{} =l call ${}(l {}, w {})",
                addr,
                runtime::ARRAY_GET_ADDRESS,
                desc,
                idx[0]
            )),
            2 => self.ins(format!(
                "{} =l call ${}(l {}, w {}, w {})",
                addr,
                runtime::ARRAY_GET_ADDRESS_2D,
                desc,
                idx[0],
                idx[1]
            )),
            n => {
                self.comment(format!("array {} with unsupported rank {}", name, n));
                self.diag_note(format!("array {} with unsupported rank {}", name, n), 0);
                self.ins(format!("{} =l copy 0", addr));
            }
        }
        addr
    }

    fn emit_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Value {
        let l = self.emit_expr(lhs);
        let r = self.emit_expr(rhs);

        if l.basic.is_string() || r.basic.is_string() {
            return self.emit_string_binary(op, l, r);
        }

        if op.is_comparison() {
            let common = promote(l.ty, r.ty);
            let lv = self.convert(&l, common);
            let rv = self.convert(&r, common);
            let mnemonic = cmp_op(cmp_name(op), common);
            let t = self.tmp();
            self.ins(format!("{} =w {} {}, {}", t, mnemonic, lv, rv));
            return Value::int_w(t);
        }

        if op.is_bitwise() {
            // Logical AND/OR/XOR are bitwise over integers.
            let common = if l.ty == IrType::L || r.ty == IrType::L {
                IrType::L
            } else {
                IrType::W
            };
            let lv = self.convert(&l, common);
            let rv = self.convert(&r, common);
            let mnemonic = match op {
                BinaryOp::And => "and",
                BinaryOp::Or => "or",
                _ => "xor",
            };
            let t = self.tmp();
            self.ins(format!("{} ={} {} {}, {}", t, common.as_str(), mnemonic, lv, rv));
            let basic = if common == IrType::L {
                BasicType::Long
            } else {
                BasicType::Integer
            };
            return Value::new(t, common, basic);
        }

        match op {
            BinaryOp::Pow => {
                let lv = self.convert(&l, IrType::D);
                let rv = self.convert(&r, IrType::D);
                let t = self.tmp();
                self.ins(format!(
                    "{} =d call ${}(d {}, d {})",
                    t,
                    runtime::MATH_POW,
                    lv,
                    rv
                ));
                Value::new(t, IrType::D, BasicType::Double)
            }
            BinaryOp::Mod => {
                let common = promote(l.ty, r.ty);
                if common.is_float() {
                    let lv = self.convert(&l, IrType::D);
                    let rv = self.convert(&r, IrType::D);
                    let t = self.tmp();
                    self.ins(format!(
                        "{} =d call ${}(d {}, d {})",
                        t,
                        runtime::MATH_FMOD,
                        lv,
                        rv
                    ));
                    Value::new(t, IrType::D, BasicType::Double)
                } else {
                    let lv = self.convert(&l, common);
                    let rv = self.convert(&r, common);
                    let t = self.tmp();
                    self.ins(format!("{} ={} rem {}, {}", t, common.as_str(), lv, rv));
                    Value::new(t, common, basic_of(common))
                }
            }
            _ => {
                let common = promote(l.ty, r.ty);
                let lv = self.convert(&l, common);
                let rv = self.convert(&r, common);
                let mnemonic = match op {
                    BinaryOp::Add => "add",
                    BinaryOp::Sub => "sub",
                    BinaryOp::Mul => "mul",
                    _ => "div",
                };
                let t = self.tmp();
                self.ins(format!("{} ={} {} {}, {}", t, common.as_str(), mnemonic, lv, rv));
                Value::new(t, common, basic_of(common))
            }
        }
    }

    fn emit_string_binary(&mut self, op: BinaryOp, l: Value, r: Value) -> Value {
        if !(l.basic.is_string() && r.basic.is_string()) {
            self.comment("mixed string/numeric operands");
            self.diag_note("mixed string/numeric operands", 0);
            return Value::int_w("0");
        }
        match op {
            BinaryOp::Add => {
                let t = self.tmp();
                self.ins(format!(
                    "{} =l call ${}(l {}, l {})",
                    t,
                    runtime::STRING_CONCAT,
                    l.op,
                    r.op
                ));
                Value::new(t, IrType::L, BasicType::Str)
            }
            op if op.is_comparison() => {
                let c = self.tmp();
                self.ins(format!(
                    "{} =w call ${}(l {}, l {})",
                    c,
                    runtime::STRING_COMPARE,
                    l.op,
                    r.op
                ));
                let mnemonic = cmp_op(cmp_name(op), IrType::W);
                let t = self.tmp();
                self.ins(format!("{} =w {} {}, 0", t, mnemonic, c));
                Value::int_w(t)
            }
            _ => {
                self.comment("unsupported string operator");
                self.diag_note("unsupported string operator", 0);
                Value::int_w("0")
            }
        }
    }

    fn emit_unary(&mut self, op: UnaryOp, operand: &Expr) -> Value {
        let v = self.emit_expr(operand);
        match op {
            UnaryOp::Neg => {
                let t = self.tmp();
                self.ins(format!("{} ={} neg {}", t, v.ty.as_str(), v.op));
                Value::new(t, v.ty, v.basic)
            }
            UnaryOp::Not => {
                let iv = self.to_int_w(v);
                let t = self.tmp();
                self.ins(format!("{} =w xor {}, -1", t, iv));
                Value::int_w(t)
            }
        }
    }

    fn emit_iif(&mut self, cond: &Expr, then_val: &Expr, else_val: &Expr) -> Value {
        let c = self.emit_expr(cond);
        let c = self.to_bool(c);
        let n = self.iif_counter;
        self.iif_counter += 1;

        let slot = self.tmp();
        self.ins(format!("{} =l alloc8 8", slot));
        let (tl, fl, el) = (
            format!("@iif{}_t", n),
            format!("@iif{}_f", n),
            format!("@iif{}_end", n),
        );
        self.ins(format!("jnz {}, {}, {}", c, tl, fl));
        self.put_label(&tl);
        let tv = self.emit_expr(then_val);
        self.ins(format!("{} {}, {}", tv.ty.store_op(), tv.op, slot));
        self.ins(format!("jmp {}", el));
        self.put_label(&fl);
        let ev = self.emit_expr(else_val);
        let converted = self.convert(&ev, tv.ty);
        self.ins(format!("{} {}, {}", tv.ty.store_op(), converted, slot));
        self.put_label(&el);
        let out = self.tmp();
        self.ins(format!("{} ={} {} {}", out, tv.ty.as_str(), tv.ty.load_op(), slot));
        Value::new(out, tv.ty, tv.basic)
    }

    fn emit_call_expr(&mut self, name: &str, args: &[Expr]) -> Value {
        if let Some(v) = self.emit_intrinsic(name, args) {
            return v;
        }

        let sig = self.program.symbols.function(name).cloned();
        match sig {
            Some(sig) => {
                let mut rendered = Vec::with_capacity(args.len());
                for (i, arg) in args.iter().enumerate() {
                    let v = self.emit_expr(arg);
                    let target = sig
                        .params
                        .get(i)
                        .map(|p| abi_type(&p.ty))
                        .unwrap_or(v.ty);
                    let converted = self.convert(&v, target);
                    rendered.push(format!("{} {}", target.as_str(), converted));
                }
                match &sig.ret {
                    Some(ret) => {
                        let out_ty = abi_type(ret);
                        let t = self.tmp();
                        self.ins(format!(
                            "{} ={} call ${}({})",
                            t,
                            out_ty.as_str(),
                            crate::mangle::function(name),
                            rendered.join(", ")
                        ));
                        Value::new(t, out_ty, ret.clone())
                    }
                    None => {
                        self.ins(format!(
                            "call ${}({})",
                            crate::mangle::function(name),
                            rendered.join(", ")
                        ));
                        self.diag_note(format!("SUB {} used in an expression", name), 0);
                        Value::int_w("0")
                    }
                }
            }
            None => {
                // Unknown function: marker comment plus a safe default.
                self.comment(format!("unknown function {}", name));
                self.diag_note(format!("unknown function {}", name), 0);
                if self.pcfg.function(name).is_some() {
                    self.diag_note(
                        format!("callable {} has a CFG but no signature", name),
                        0,
                    );
                }
                Value::int_w("0")
            }
        }
    }

    /// Intrinsics; returns None when `name` is not one.
    fn emit_intrinsic(&mut self, name: &str, args: &[Expr]) -> Option<Value> {
        let upper = name.to_ascii_uppercase();
        let v = match upper.as_str() {
            "ABS" => {
                let v = self.arg(args, 0)?;
                if v.ty.is_float() {
                    self.call_d1(runtime::MATH_FABS, &v)
                } else {
                    let iv = self.to_int_w(v);
                    let t = self.tmp();
                    self.ins(format!("{} =w call ${}(w {})", t, runtime::MATH_ABS_INT, iv));
                    Value::int_w(t)
                }
            }
            "SGN" => {
                let v = self.arg(args, 0)?;
                let t = self.tmp();
                if v.ty.is_float() {
                    let dv = self.convert(&v, IrType::D);
                    self.ins(format!("{} =w call ${}(d {})", t, runtime::MATH_SGN_DOUBLE, dv));
                } else {
                    let iv = self.to_int_w(v);
                    self.ins(format!("{} =w call ${}(w {})", t, runtime::MATH_SGN_INT, iv));
                }
                Value::int_w(t)
            }
            "INT" => {
                let v = self.arg(args, 0)?;
                self.call_d1(runtime::MATH_FLOOR, &v)
            }
            "SQR" => {
                let v = self.arg(args, 0)?;
                self.call_d1(runtime::MATH_SQRT, &v)
            }
            "SIN" => {
                let v = self.arg(args, 0)?;
                self.call_d1(runtime::MATH_SIN, &v)
            }
            "COS" => {
                let v = self.arg(args, 0)?;
                self.call_d1(runtime::MATH_COS, &v)
            }
            "TAN" => {
                let v = self.arg(args, 0)?;
                self.call_d1(runtime::MATH_TAN, &v)
            }
            "ATN" => {
                let v = self.arg(args, 0)?;
                self.call_d1(runtime::MATH_ATN, &v)
            }
            "LOG" => {
                let v = self.arg(args, 0)?;
                self.call_d1(runtime::MATH_LOG, &v)
            }
            "EXP" => {
                let v = self.arg(args, 0)?;
                self.call_d1(runtime::MATH_EXP, &v)
            }
            "RND" => {
                let t = self.tmp();
                self.ins(format!("{} =d call ${}()", t, runtime::MATH_RND));
                Value::new(t, IrType::D, BasicType::Double)
            }
            "LEN" => {
                let v = self.arg(args, 0)?;
                let t = self.tmp();
                self.ins(format!("{} =w call ${}(l {})", t, runtime::STRING_LENGTH, v.op));
                Value::int_w(t)
            }
            "ASC" => {
                let v = self.arg(args, 0)?;
                let t = self.tmp();
                self.ins(format!("{} =w call ${}(l {})", t, runtime::STRING_ASC, v.op));
                Value::int_w(t)
            }
            "CHR$" => {
                let v = self.arg(args, 0)?;
                let iv = self.to_int_w(v);
                let t = self.tmp();
                self.ins(format!("{} =l call ${}(w {})", t, runtime::STRING_CHR, iv));
                Value::new(t, IrType::L, BasicType::Str)
            }
            "MID$" => {
                let s = self.arg(args, 0)?;
                let start = self.arg(args, 1)?;
                let start = self.to_int_w(start);
                let count = match args.get(2) {
                    Some(e) => {
                        let v = self.emit_expr(e);
                        self.to_int_w(v)
                    }
                    None => "-1".to_string(),
                };
                let t = self.tmp();
                self.ins(format!(
                    "{} =l call ${}(l {}, w {}, w {})",
                    t,
                    runtime::STRING_MID,
                    s.op,
                    start,
                    count
                ));
                Value::new(t, IrType::L, BasicType::Str)
            }
            "LEFT$" | "RIGHT$" => {
                let s = self.arg(args, 0)?;
                let n = self.arg(args, 1)?;
                let n = self.to_int_w(n);
                let callee = if upper == "LEFT$" {
                    runtime::STRING_LEFT
                } else {
                    runtime::STRING_RIGHT
                };
                let t = self.tmp();
                self.ins(format!("{} =l call ${}(l {}, w {})", t, callee, s.op, n));
                Value::new(t, IrType::L, BasicType::Str)
            }
            "STR$" => {
                let v = self.arg(args, 0)?;
                let t = self.tmp();
                if v.ty.is_float() {
                    let dv = self.convert(&v, IrType::D);
                    self.ins(format!(
                        "{} =l call ${}(d {})",
                        t,
                        runtime::STRING_FROM_DOUBLE,
                        dv
                    ));
                } else {
                    let iv = self.to_int_w(v);
                    self.ins(format!("{} =l call ${}(w {})", t, runtime::STRING_FROM_INT, iv));
                }
                Value::new(t, IrType::L, BasicType::Str)
            }
            "VAL" => {
                let v = self.arg(args, 0)?;
                let t = self.tmp();
                self.ins(format!("{} =d call ${}(l {})", t, runtime::STRING_VAL, v.op));
                Value::new(t, IrType::D, BasicType::Double)
            }
            _ => return None,
        };
        Some(v)
    }

    fn arg(&mut self, args: &[Expr], i: usize) -> Option<Value> {
        match args.get(i) {
            Some(e) => Some(self.emit_expr(e)),
            None => {
                self.comment("missing intrinsic argument");
                self.diag_note("missing intrinsic argument", 0);
                Some(Value::int_w("0"))
            }
        }
    }

    fn call_d1(&mut self, callee: &str, v: &Value) -> Value {
        let dv = self.convert(v, IrType::D);
        let t = self.tmp();
        self.ins(format!("{} =d call ${}(d {})", t, callee, dv));
        Value::new(t, IrType::D, BasicType::Double)
    }

    /// CASE arm match: any of the arm's labels matching the selector.
    pub(crate) fn emit_case_match(&mut self, sel: &Value, arm: &CaseArm) -> String {
        let mut acc: Option<String> = None;
        for label in &arm.labels {
            let m = match label {
                CaseLabel::Value(e) => self.emit_case_compare(sel, e, "eq"),
                CaseLabel::Range(lo, hi) => {
                    let ge = self.emit_case_compare(sel, lo, "ge");
                    let le = self.emit_case_compare(sel, hi, "le");
                    let t = self.tmp();
                    self.ins(format!("{} =w and {}, {}", t, ge, le));
                    t
                }
            };
            acc = Some(match acc {
                None => m,
                Some(prev) => {
                    let t = self.tmp();
                    self.ins(format!("{} =w or {}, {}", t, prev, m));
                    t
                }
            });
        }
        acc.unwrap_or_else(|| "0".to_string())
    }

    fn emit_case_compare(&mut self, sel: &Value, label: &Expr, op: &str) -> String {
        let v = self.emit_expr(label);
        if sel.basic.is_string() && v.basic.is_string() {
            let c = self.tmp();
            self.ins(format!(
                "{} =w call ${}(l {}, l {})",
                c,
                runtime::STRING_COMPARE,
                sel.op,
                v.op
            ));
            let t = self.tmp();
            self.ins(format!("{} =w {} {}, 0", t, cmp_op(op, IrType::W), c));
            return t;
        }
        let common = promote(sel.ty, v.ty);
        let sv = self.convert(sel, common);
        let lv = self.convert(&v, common);
        let t = self.tmp();
        self.ins(format!("{} =w {} {}, {}", t, cmp_op(op, common), sv, lv));
        t
    }

    // ------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------

    /// Convert a value to the given IR class, emitting at most one
    /// conversion instruction.
    pub(crate) fn convert(&mut self, v: &Value, to: IrType) -> String {
        match convert_op(v.ty, to) {
            None => v.op.clone(),
            Some(op) => {
                let t = self.tmp();
                self.ins(format!("{} ={} {} {}", t, to.as_str(), op, v.op));
                t
            }
        }
    }

    /// Machine-word boolean: nonzero means true.
    pub(crate) fn to_bool(&mut self, v: Value) -> String {
        match v.ty {
            IrType::W => v.op,
            IrType::L => {
                let t = self.tmp();
                self.ins(format!("{} =w cnel {}, 0", t, v.op));
                t
            }
            IrType::S => {
                let t = self.tmp();
                self.ins(format!("{} =w cnes {}, s_0", t, v.op));
                t
            }
            IrType::D => {
                let t = self.tmp();
                self.ins(format!("{} =w cned {}, d_0", t, v.op));
                t
            }
        }
    }

    /// Narrow/convert to a w operand (array indices, ON selectors).
    pub(crate) fn to_int_w(&mut self, v: Value) -> String {
        self.convert(&v, IrType::W)
    }
}

fn cmp_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "eq",
        BinaryOp::Ne => "ne",
        BinaryOp::Lt => "lt",
        BinaryOp::Le => "le",
        BinaryOp::Gt => "gt",
        BinaryOp::Ge => "ge",
        _ => unreachable!("not a comparison"),
    }
}

fn basic_of(ty: IrType) -> BasicType {
    match ty {
        IrType::W => BasicType::Integer,
        IrType::L => BasicType::Long,
        IrType::S => BasicType::Single,
        IrType::D => BasicType::Double,
    }
}
