//! Symbol table interface from the semantic analyzer
//!
//! The analyzer resolves every name before the middle-end runs; this module
//! is the record shape the emitter consults for declared types, scopes and
//! function signatures.

use serde::{Deserialize, Serialize};

/// Declared base type of a variable, array element or function return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasicType {
    Integer,
    Long,
    Single,
    Double,
    Str,
    /// User-defined record type, by name.
    Record(String),
}

impl BasicType {
    pub fn is_string(&self) -> bool {
        matches!(self, BasicType::Str)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, BasicType::Single | BasicType::Double)
    }

    /// Type-suffix byte passed to the array runtime (`%` `&` `!` `#` `$`).
    pub fn suffix_byte(&self) -> u8 {
        match self {
            BasicType::Integer => b'%',
            BasicType::Long => b'&',
            BasicType::Single => b'!',
            BasicType::Double => b'#',
            BasicType::Str => b'$',
            BasicType::Record(_) => b'@',
        }
    }
}

/// Where a variable lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarScope {
    /// Program-wide; main-program variables default here so GOSUB bodies and
    /// SHARED subs see them.
    Global,
    /// Local to the named FUNCTION/SUB (or to main when declared LOCAL there).
    Local { owner: String },
    /// A global explicitly shared into the named FUNCTION/SUB.
    Shared { owner: String },
}

/// Array shape: dimension count and declared upper bounds (base 0).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayInfo {
    pub dims: u8,
    pub bounds: Vec<u32>,
}

/// Per-variable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarRecord {
    pub name: String,
    pub ty: BasicType,
    pub scope: VarScope,
    /// Present when the variable is an array; `ty` is then the element type.
    pub array: Option<ArrayInfo>,
    pub is_param: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: BasicType,
}

/// Signature of a user-defined FUNCTION or SUB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSig {
    pub name: String,
    pub params: Vec<Param>,
    /// None for SUBs.
    pub ret: Option<BasicType>,
}

/// The analyzer's symbol table: flat variable and function lists with
/// name-keyed lookup. Names compare case-insensitively, as in the source
/// dialect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    pub variables: Vec<VarRecord>,
    pub functions: Vec<FunctionSig>,
}

impl SymbolTable {
    /// Look up a variable visible inside `function` (None = main).
    ///
    /// Locals of the function shadow globals of the same name.
    pub fn lookup(&self, name: &str, function: Option<&str>) -> Option<&VarRecord> {
        let local = self.variables.iter().find(|v| {
            v.name.eq_ignore_ascii_case(name)
                && match (&v.scope, function) {
                    (VarScope::Local { owner }, Some(f)) => owner.eq_ignore_ascii_case(f),
                    (VarScope::Local { owner }, None) => owner.is_empty(),
                    _ => false,
                }
        });
        local.or_else(|| {
            self.variables
                .iter()
                .find(|v| v.name.eq_ignore_ascii_case(name) && matches!(v.scope, VarScope::Global | VarScope::Shared { .. }))
        })
    }

    /// All locals owned by `function` (None = main LOCALs), in declaration
    /// order. The emitter stack-allocates these in the entry block.
    pub fn locals_of(&self, function: Option<&str>) -> Vec<&VarRecord> {
        self.variables
            .iter()
            .filter(|v| match (&v.scope, function) {
                (VarScope::Local { owner }, Some(f)) => owner.eq_ignore_ascii_case(f),
                (VarScope::Local { owner }, None) => owner.is_empty(),
                _ => false,
            })
            .collect()
    }

    /// All globals, in declaration order; emitted into the data section.
    pub fn globals(&self) -> Vec<&VarRecord> {
        self.variables
            .iter()
            .filter(|v| matches!(v.scope, VarScope::Global | VarScope::Shared { .. }))
            .collect()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSig> {
        self.functions.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Register a variable, replacing an earlier record for the same
    /// name/scope pair (test helper and front-end convenience).
    pub fn define_var(&mut self, rec: VarRecord) {
        if let Some(existing) = self
            .variables
            .iter_mut()
            .find(|v| v.name.eq_ignore_ascii_case(&rec.name) && v.scope == rec.scope)
        {
            *existing = rec;
        } else {
            self.variables.push(rec);
        }
    }

    /// Convenience: register a global scalar.
    pub fn global_scalar(&mut self, name: &str, ty: BasicType) {
        self.define_var(VarRecord {
            name: name.to_string(),
            ty,
            scope: VarScope::Global,
            array: None,
            is_param: false,
        });
    }

    /// Convenience: register a global array.
    pub fn global_array(&mut self, name: &str, ty: BasicType, bounds: &[u32]) {
        self.define_var(VarRecord {
            name: name.to_string(),
            ty,
            scope: VarScope::Global,
            array: Some(ArrayInfo {
                dims: bounds.len() as u8,
                bounds: bounds.to_vec(),
            }),
            is_param: false,
        });
    }
}
