// basc: batch BASIC compiler middle-end
//
// Takes the typed AST of a line-numbered BASIC dialect, builds per-function
// control-flow graphs, and emits textual SSA IR for a native backend.

pub mod ast;
pub mod cfg;
pub mod cli;
pub mod diag;
pub mod emit;
pub mod mangle;
pub mod output;
pub mod symbols;
pub mod types;

pub use cfg::{CfgBuilder, ControlFlowGraph, ProgramCfg};
pub use diag::{CompileError, Diagnostic};
pub use emit::{EmitOptions, EmitResult, Emitter};
