//! Type mapper: BASIC declared types to IR scalar classes
//!
//! The backend dialect has four scalar classes: `w` (32-bit int), `l`
//! (64-bit int/pointer), `s` (32-bit float), `d` (64-bit float). Strings and
//! record values travel as pointers (`l`).

use crate::symbols::BasicType;

/// IR scalar class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    W,
    L,
    S,
    D,
}

impl IrType {
    pub fn as_str(self) -> &'static str {
        match self {
            IrType::W => "w",
            IrType::L => "l",
            IrType::S => "s",
            IrType::D => "d",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, IrType::S | IrType::D)
    }

    pub fn is_int(self) -> bool {
        matches!(self, IrType::W | IrType::L)
    }

    /// Byte size of a stack slot for this class.
    pub fn slot_size(self) -> u32 {
        match self {
            IrType::W | IrType::S => 4,
            IrType::L | IrType::D => 8,
        }
    }

    /// `alloc4`/`alloc8` mnemonic for a slot of this class.
    pub fn alloc_op(self) -> &'static str {
        match self {
            IrType::W | IrType::S => "alloc4",
            IrType::L | IrType::D => "alloc8",
        }
    }

    pub fn load_op(self) -> &'static str {
        match self {
            IrType::W => "loadw",
            IrType::L => "loadl",
            IrType::S => "loads",
            IrType::D => "loadd",
        }
    }

    pub fn store_op(self) -> &'static str {
        match self {
            IrType::W => "storew",
            IrType::L => "storel",
            IrType::S => "stores",
            IrType::D => "stored",
        }
    }

    /// Zero constant in operand syntax.
    pub fn zero(self) -> &'static str {
        match self {
            IrType::W | IrType::L => "0",
            IrType::S => "s_0",
            IrType::D => "d_0",
        }
    }
}

/// Map a declared BASIC type to its IR class.
pub fn ir_type(ty: &BasicType) -> IrType {
    match ty {
        BasicType::Integer => IrType::W,
        BasicType::Long => IrType::L,
        BasicType::Single => IrType::S,
        BasicType::Double => IrType::D,
        BasicType::Str | BasicType::Record(_) => IrType::L,
    }
}

/// IR class a value of this type crosses a call boundary as.
///
/// Floats always travel at 64-bit width; everything else keeps its class.
pub fn abi_type(ty: &BasicType) -> IrType {
    match ir_type(ty) {
        IrType::S => IrType::D,
        t => t,
    }
}

/// Common type for a binary arithmetic operation.
///
/// Mixing a float with a 64-bit int promotes to `d` so no bits are lost;
/// all other mixes promote to the wider operand.
pub fn promote(a: IrType, b: IrType) -> IrType {
    use IrType::*;
    match (a, b) {
        (D, _) | (_, D) => D,
        (S, L) | (L, S) => D,
        (S, _) | (_, S) => S,
        (L, _) | (_, L) => L,
        (W, W) => W,
    }
}

/// Conversion instruction taking a `from`-classed operand to `to`.
///
/// Returns `None` when the classes match (no instruction needed). Narrowing
/// an `l` to `w` uses `copy`, which reads the low 32 bits.
pub fn convert_op(from: IrType, to: IrType) -> Option<&'static str> {
    use IrType::*;
    if from == to {
        return None;
    }
    Some(match (from, to) {
        (W, L) => "extsw",
        (W, S) | (W, D) => "swtof",
        (L, S) | (L, D) => "sltof",
        (L, W) => "copy",
        (S, D) => "exts",
        (D, S) => "truncd",
        (S, W) | (S, L) => "stosi",
        (D, W) | (D, L) => "dtosi",
        _ => unreachable!(),
    })
}

/// Comparison mnemonic for `op` over class `ty` (result is always `w`).
///
/// `op` is one of `eq ne lt le gt ge`; integer orderings are signed.
pub fn cmp_op(op: &str, ty: IrType) -> String {
    let signed = ty.is_int();
    let core = match op {
        "eq" | "ne" => op.to_string(),
        _ if signed => format!("s{}", op),
        _ => op.to_string(),
    };
    format!("c{}{}", core, ty.as_str())
}
