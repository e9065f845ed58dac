//! Data section: string pool, globals, DATA pool, GOSUB stack
//!
//! Everything here is rendered once, after all functions have been emitted,
//! so the string pool is complete. Interning is by encounter order, which
//! keeps emission byte-for-byte deterministic for a fixed AST.

use std::collections::HashMap;
use std::fmt::Write;

use crate::ast::{DataValue, Program, Stmt, StmtKind};
use crate::emit::runtime;
use crate::mangle;
use crate::symbols::BasicType;
use crate::types::{ir_type, IrType};

/// Accumulates the generated program's data section.
pub struct DataSection {
    strings: Vec<String>,
    string_index: HashMap<String, usize>,
    /// DATA literals with their source lines, in source order.
    data_items: Vec<(u32, DataValue)>,
    /// Global scalars and array descriptor slots: (symbol, ir type).
    globals: Vec<(String, IrType)>,
    gosub_stack_depth: usize,
}

impl DataSection {
    pub fn new(gosub_stack_depth: usize) -> Self {
        DataSection {
            strings: Vec::new(),
            string_index: HashMap::new(),
            data_items: Vec::new(),
            globals: Vec::new(),
            gosub_stack_depth,
        }
    }

    /// Intern a string literal, returning its pool symbol (`$str_N`).
    pub fn intern(&mut self, s: &str) -> String {
        let idx = match self.string_index.get(s) {
            Some(&i) => i,
            None => {
                let i = self.strings.len();
                self.strings.push(s.to_string());
                self.string_index.insert(s.to_string(), i);
                i
            }
        };
        format!("$str_{}", idx)
    }

    /// Register a global variable slot; idempotent per symbol.
    pub fn ensure_global(&mut self, symbol: &str, ty: IrType) {
        if !self.globals.iter().any(|(s, _)| s == symbol) {
            self.globals.push((symbol.to_string(), ty));
        }
    }

    /// Collect every DATA statement of the main program in source order.
    /// DATA inside FUNCTION/SUB bodies is not part of the pool.
    pub fn collect_data(&mut self, program: &Program) {
        collect_data_stmts(&program.statements, &mut self.data_items);
    }

    /// Pool index RESTORE should reset the cursor to: the first item whose
    /// source line is at or after the requested line.
    pub fn restore_index(&self, line: u32) -> usize {
        self.data_items
            .iter()
            .position(|(l, _)| *l >= line)
            .unwrap_or(self.data_items.len())
    }

    pub fn data_len(&self) -> usize {
        self.data_items.len()
    }

    /// Render the whole data section.
    pub fn render(&mut self) -> String {
        let mut out = String::new();

        // DATA pool entries are (tag word, pad, 8-byte payload); string
        // payloads point into the string pool, so intern them first.
        let items = std::mem::take(&mut self.data_items);
        let mut pool_body = String::new();
        for (i, (_, value)) in items.iter().enumerate() {
            if i > 0 {
                pool_body.push_str(", ");
            }
            match value {
                DataValue::Int(v) => {
                    let _ = write!(pool_body, "w 1, w 0, l {}", v);
                }
                DataValue::Number(v) => {
                    let _ = write!(pool_body, "w 3, w 0, d {}", float_literal(*v));
                }
                DataValue::Str(s) => {
                    let sym = self.intern(s);
                    let _ = write!(pool_body, "w 4, w 0, l {}", sym);
                }
            }
        }

        for (i, s) in self.strings.iter().enumerate() {
            let _ = writeln!(out, "data $str_{} = {{ {} }}", i, string_bytes(s));
        }
        if !self.strings.is_empty() {
            out.push('\n');
        }

        for (symbol, ty) in &self.globals {
            let init = match ty {
                IrType::W => "w 0",
                IrType::L => "l 0",
                IrType::S => "s s_0",
                IrType::D => "d d_0",
            };
            let _ = writeln!(out, "data ${} = {{ {} }}", symbol, init);
        }
        if !self.globals.is_empty() {
            out.push('\n');
        }

        if items.is_empty() {
            let _ = writeln!(out, "data ${} = {{ w 0 }}", runtime::DATA_POOL);
        } else {
            let _ = writeln!(out, "data ${} = {{ {} }}", runtime::DATA_POOL, pool_body);
        }
        let _ = writeln!(out, "data ${} = {{ w 0 }}", runtime::DATA_PTR);
        let _ = writeln!(out, "data ${} = {{ w {} }}", runtime::DATA_COUNT, items.len());
        let _ = writeln!(
            out,
            "data ${} = {{ z {} }}",
            runtime::GOSUB_STACK,
            self.gosub_stack_depth * 4
        );
        let _ = writeln!(out, "data ${} = {{ w 0 }}", runtime::GOSUB_SP);
        let _ = writeln!(out, "data ${} = {{ w 0 }}", runtime::ERR_CODE);
        out
    }
}

fn collect_data_stmts(stmts: &[Stmt], items: &mut Vec<(u32, DataValue)>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Data { values } => {
                for v in values {
                    items.push((stmt.line_or_zero(), v.clone()));
                }
            }
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                collect_data_stmts(then_body, items);
                collect_data_stmts(else_body, items);
            }
            StmtKind::While { body, .. }
            | StmtKind::For { body, .. }
            | StmtKind::Repeat { body, .. }
            | StmtKind::Do { body, .. } => collect_data_stmts(body, items),
            StmtKind::Select {
                arms, otherwise, ..
            } => {
                for arm in arms {
                    collect_data_stmts(&arm.body, items);
                }
                collect_data_stmts(otherwise, items);
            }
            StmtKind::Try {
                body,
                catch_body,
                finally_body,
                ..
            } => {
                collect_data_stmts(body, items);
                collect_data_stmts(catch_body, items);
                collect_data_stmts(finally_body, items);
            }
            // FUNCTION/SUB bodies do not contribute to the pool.
            _ => {}
        }
    }
}

/// Global symbol for a program variable (without the `$` sigil).
pub fn global_symbol(name: &str) -> String {
    mangle::global(name)
}

/// IR slot class for a variable's global: arrays hold a descriptor pointer.
pub fn global_slot_type(ty: &BasicType, is_array: bool) -> IrType {
    if is_array {
        IrType::L
    } else {
        ir_type(ty)
    }
}

/// Render a float constant in operand syntax.
pub fn float_literal(v: f64) -> String {
    if v == v.trunc() && v.is_finite() && v.abs() < 1e15 {
        format!("d_{:.1}", v)
    } else {
        format!("d_{}", v)
    }
}

/// Render a string as data-section bytes with a NUL terminator.
/// Printable runs use quoted form; everything else is emitted numerically.
fn string_bytes(s: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut run = String::new();
    for &b in s.as_bytes() {
        let printable = (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\';
        if printable {
            run.push(b as char);
        } else {
            if !run.is_empty() {
                parts.push(format!("b \"{}\"", run));
                run.clear();
            }
            parts.push(format!("b {}", b));
        }
    }
    if !run.is_empty() {
        parts.push(format!("b \"{}\"", run));
    }
    parts.push("b 0".to_string());
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_deduplicates() {
        let mut data = DataSection::new(256);
        let a = data.intern("HELLO");
        let b = data.intern("WORLD");
        let c = data.intern("HELLO");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(a, "$str_0");
        assert_eq!(b, "$str_1");
    }

    #[test]
    fn test_string_bytes_escaping() {
        assert_eq!(string_bytes("AB"), "b \"AB\", b 0");
        assert_eq!(string_bytes("A\"B"), "b \"A\", b 34, b \"B\", b 0");
        assert_eq!(string_bytes(""), "b 0");
    }

    #[test]
    fn test_render_contains_runtime_globals() {
        let mut data = DataSection::new(16);
        data.intern("X");
        data.ensure_global("g_speed", IrType::D);
        let text = data.render();
        assert!(text.contains("data $str_0 = { b \"X\", b 0 }"));
        assert!(text.contains("data $g_speed = { d d_0 }"));
        assert!(text.contains("data $gosub_return_stack = { z 64 }"));
        assert!(text.contains("data $gosub_return_sp = { w 0 }"));
    }

    #[test]
    fn test_restore_index_by_line() {
        let mut data = DataSection::new(16);
        data.data_items.push((100, DataValue::Int(1)));
        data.data_items.push((100, DataValue::Int(2)));
        data.data_items.push((200, DataValue::Int(3)));
        assert_eq!(data.restore_index(0), 0);
        assert_eq!(data.restore_index(150), 2);
        assert_eq!(data.restore_index(300), 3);
    }

    #[test]
    fn test_float_literal_forms() {
        assert_eq!(float_literal(1.0), "d_1.0");
        assert_eq!(float_literal(1.5), "d_1.5");
    }
}
