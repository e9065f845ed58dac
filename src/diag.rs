//! Compile-error taxonomy and non-fatal diagnostics

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal errors raised by the CFG builder or the emitter.
///
/// Structural errors abort the compilation of the whole program; the driver
/// prints them with source line information and exits non-zero. Non-fatal
/// anomalies are collected as [`Diagnostic`]s instead.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The AST violates the documented shape (e.g. NEXT without a matching
    /// FOR, WEND closing a FOR, nested FUNCTION definitions).
    #[error("malformed AST at line {line}: {message}")]
    MalformedAst { message: String, line: u32 },

    /// A GOTO/GOSUB/ON target could not be resolved after the deferred-edge
    /// pass.
    #[error("unresolved jump target `{target}` referenced at line {line}")]
    UnresolvedTarget { target: String, line: u32 },
}

impl CompileError {
    pub fn malformed(message: impl Into<String>, line: u32) -> Self {
        CompileError::MalformedAst {
            message: message.into(),
            line,
        }
    }

    /// Source line the error points at.
    pub fn line(&self) -> u32 {
        match self {
            CompileError::MalformedAst { line, .. }
            | CompileError::UnresolvedTarget { line, .. } => *line,
        }
    }
}

/// Severity of a non-fatal diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Note,
}

/// A non-fatal anomaly recorded during building or emission.
///
/// Unreachable code and unknown intrinsics land here; the compilation
/// continues and the IR file is still produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Source line, 0 when unknown.
    pub line: u32,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>, line: u32) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            line,
        }
    }

    pub fn note(message: impl Into<String>, line: u32) -> Self {
        Diagnostic {
            severity: Severity::Note,
            message: message.into(),
            line,
        }
    }
}
