// CLI command definitions

use clap::{Parser, Subcommand, ValueEnum};

/// basc - batch BASIC compiler middle-end
///
/// Consumes the typed AST produced by the front-end (as JSON), builds
/// per-function control-flow graphs, and emits textual SSA IR for the
/// native backend.
#[derive(Parser, Debug, Clone)]
#[command(name = "basc")]
#[command(author, version, about)]
pub struct Cli {
    /// Output format for diagnostics and query commands
    #[arg(global = true, long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Human,
    /// Compact JSON for programmatic consumption
    Json,
    /// Formatted JSON with indentation
    Pretty,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Compile an AST to SSA IR
    Compile(CompileArgs),

    /// Export the control-flow graph of one function
    Cfg(CfgArgs),

    /// Build CFGs and report invariant violations and unreachable code
    Check(CheckArgs),
}

// ============================================================================
// Command arguments
// ============================================================================

#[derive(Parser, Debug, Clone)]
pub struct CompileArgs {
    /// Path to the AST JSON produced by the front-end
    pub input: String,

    /// Output path for the IR; defaults to the input with a .ssa extension
    #[arg(short, long)]
    pub out: Option<String>,

    /// Leave REDIM'd (non-PRESERVE) array contents undefined
    #[arg(long)]
    pub no_redim_zero: bool,

    /// Capacity of the generated GOSUB return stack
    #[arg(long, default_value_t = 256)]
    pub gosub_stack_depth: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct CfgArgs {
    /// Path to the AST JSON produced by the front-end
    pub input: String,

    /// Function name; defaults to the main program
    #[arg(long)]
    pub function: Option<String>,

    /// Export format
    #[arg(long, value_enum, default_value_t = CfgFormat::Dot)]
    pub format: CfgFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgFormat {
    Dot,
    Json,
}

#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    /// Path to the AST JSON produced by the front-end
    pub input: String,
}

// ============================================================================
// Command implementations
// ============================================================================

pub mod cmds {
    use std::path::Path;

    use anyhow::{Context, Result};

    use super::{CfgArgs, CfgFormat, CheckArgs, Cli, CompileArgs, OutputFormat};
    use crate::ast::Program;
    use crate::cfg::{self, CfgBuilder};
    use crate::diag::Severity;
    use crate::emit::{EmitOptions, Emitter};
    use crate::output;

    fn load_program(path: &str) -> Result<Program> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read AST file {}", path))?;
        serde_json::from_str(&text).with_context(|| format!("cannot parse AST file {}", path))
    }

    pub fn compile(args: &CompileArgs, cli: &Cli) -> Result<()> {
        let program = load_program(&args.input)?;
        let pcfg = CfgBuilder::build_program(&program)?;

        let opts = EmitOptions {
            redim_zeroes: !args.no_redim_zero,
            gosub_stack_depth: args.gosub_stack_depth,
        };
        let emitter = Emitter::new(&program, &pcfg, opts);
        let result = emitter.emit_program();

        let out_path = match &args.out {
            Some(p) => p.clone(),
            None => Path::new(&args.input)
                .with_extension("ssa")
                .to_string_lossy()
                .into_owned(),
        };
        std::fs::write(&out_path, &result.ir)
            .with_context(|| format!("cannot write IR file {}", out_path))?;

        match cli.output {
            OutputFormat::Human => {
                for d in &result.diagnostics {
                    match d.severity {
                        Severity::Warning => output::warn(&d.message),
                        Severity::Note => output::note(d.line, &d.message),
                    }
                }
                output::info(&format!("wrote {}", out_path));
            }
            OutputFormat::Json | OutputFormat::Pretty => {
                let payload = serde_json::json!({
                    "output": out_path,
                    "diagnostics": result.diagnostics,
                });
                print_json(&payload, cli.output)?;
            }
        }
        Ok(())
    }

    pub fn cfg(args: &CfgArgs, cli: &Cli) -> Result<()> {
        let program = load_program(&args.input)?;
        let pcfg = CfgBuilder::build_program(&program)?;

        let (name, graph) = match &args.function {
            None => ("main".to_string(), &pcfg.main),
            Some(f) => {
                let graph = pcfg
                    .function(f)
                    .with_context(|| format!("no FUNCTION or SUB named {}", f))?;
                (f.clone(), graph)
            }
        };

        match args.format {
            CfgFormat::Dot => print!("{}", cfg::export_dot(graph, &name)),
            CfgFormat::Json => {
                let export = cfg::export_json(graph, &name);
                print_json(&serde_json::to_value(&export)?, cli.output)?;
            }
        }
        Ok(())
    }

    pub fn check(args: &CheckArgs, cli: &Cli) -> Result<()> {
        let program = load_program(&args.input)?;
        let pcfg = CfgBuilder::build_program(&program)?;

        let mut all: Vec<(String, Vec<cfg::InvariantViolation>, Vec<usize>)> = Vec::new();
        all.push((
            "main".to_string(),
            cfg::verify_cfg(&pcfg.main),
            pcfg.main.unreachable.clone(),
        ));
        for f in &pcfg.functions {
            all.push((
                f.name.clone(),
                cfg::verify_cfg(&f.cfg),
                f.cfg.unreachable.clone(),
            ));
        }

        let violation_count: usize = all.iter().map(|(_, v, _)| v.len()).sum();
        match cli.output {
            OutputFormat::Human => {
                for (name, violations, unreachable) in &all {
                    output::header(name);
                    if violations.is_empty() && unreachable.is_empty() {
                        output::info("ok");
                        continue;
                    }
                    for v in violations {
                        output::error(&format!("block {}: {}", v.block, v.message));
                    }
                    for b in unreachable {
                        output::warn(&format!("block {} is unreachable", b));
                    }
                }
            }
            OutputFormat::Json | OutputFormat::Pretty => {
                let payload: Vec<_> = all
                    .iter()
                    .map(|(name, violations, unreachable)| {
                        serde_json::json!({
                            "function": name,
                            "violations": violations,
                            "unreachable": unreachable,
                        })
                    })
                    .collect();
                print_json(&serde_json::Value::Array(payload), cli.output)?;
            }
        }
        if violation_count > 0 {
            anyhow::bail!("{} invariant violation(s)", violation_count);
        }
        Ok(())
    }

    fn print_json(value: &serde_json::Value, format: OutputFormat) -> Result<()> {
        if format == OutputFormat::Pretty {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", serde_json::to_string(value)?);
        }
        Ok(())
    }
}
