//! CFG export to DOT and JSON formats

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::cfg::{analysis, ControlFlowGraph, EdgeType};

/// Export a CFG to DOT format for Graphviz.
pub fn export_dot(cfg: &ControlFlowGraph<'_>, function_name: &str) -> String {
    let mut dot = format!("digraph \"{}\" {{\n", function_name);
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=rounded];\n\n");

    let unreachable: std::collections::HashSet<_> = cfg.unreachable.iter().copied().collect();
    for block in &cfg.blocks {
        let mut text = format!("b{}", block.id);
        if let Some(label) = &block.label {
            text.push_str(&format!("\\n{}", label));
        }
        for stmt in &block.statements {
            match stmt.line {
                Some(line) => text.push_str(&format!("\\n{} {}", line, stmt.kind.keyword())),
                None => text.push_str(&format!("\\n{}", stmt.kind.keyword())),
            }
        }

        let style = if block.id == cfg.entry {
            "fillcolor=lightgreen, style=filled"
        } else if unreachable.contains(&block.id) {
            "fillcolor=lightgray, style=filled"
        } else if block.is_loop_header {
            "fillcolor=lightblue, style=filled"
        } else {
            ""
        };
        writeln!(
            dot,
            "  \"{}\" [label=\"{}\" {}];",
            block.id,
            escape_dot_string(&text),
            style
        )
        .ok();
    }

    dot.push('\n');
    for edge in &cfg.edges {
        let color = edge.kind.dot_color();
        let label = match &edge.label {
            Some(l) => l.clone(),
            None => edge.kind.dot_label().to_string(),
        };
        let label_attr = if label.is_empty() {
            String::new()
        } else {
            format!(", label=\"{}\"", escape_dot_string(&label))
        };
        writeln!(
            dot,
            "  \"{}\" -> \"{}\" [color={}, style={}{}];",
            edge.from,
            edge.to,
            color,
            if edge.kind == EdgeType::Fallthrough {
                "dashed"
            } else {
                "solid"
            },
            label_attr
        )
        .ok();
    }

    dot.push_str("}\n");
    dot
}

fn escape_dot_string(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Complete CFG export for JSON serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfgExport {
    pub function_name: String,
    pub entry: usize,
    pub blocks: Vec<BlockExport>,
    pub edges: Vec<EdgeExport>,
    pub line_to_block: BTreeMap<u32, usize>,
    pub gosub_return_blocks: Vec<usize>,
    pub unreachable: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockExport {
    pub id: usize,
    pub label: Option<String>,
    pub statements: Vec<String>,
    pub is_loop_header: bool,
    pub is_loop_exit: bool,
    pub is_terminated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeExport {
    pub from: usize,
    pub to: usize,
    pub kind: String,
    pub label: Option<String>,
}

/// Export a CFG to JSON-serializable form.
pub fn export_json(cfg: &ControlFlowGraph<'_>, function_name: &str) -> CfgExport {
    let blocks = cfg
        .blocks
        .iter()
        .map(|b| BlockExport {
            id: b.id,
            label: b.label.clone(),
            statements: b
                .statements
                .iter()
                .map(|s| match s.line {
                    Some(line) => format!("{} {}", line, s.kind.keyword()),
                    None => s.kind.keyword().to_string(),
                })
                .collect(),
            is_loop_header: b.is_loop_header,
            is_loop_exit: b.is_loop_exit,
            is_terminated: b.is_terminated,
        })
        .collect();

    let edges = cfg
        .edges
        .iter()
        .map(|e| EdgeExport {
            from: e.from,
            to: e.to,
            kind: format!("{:?}", e.kind),
            label: e.label.clone(),
        })
        .collect();

    CfgExport {
        function_name: function_name.to_string(),
        entry: cfg.entry,
        blocks,
        edges,
        line_to_block: cfg.line_to_block.iter().map(|(&l, &b)| (l, b)).collect(),
        gosub_return_blocks: cfg.gosub_return_blocks.iter().copied().collect(),
        unreachable: analysis::find_unreachable(cfg),
    }
}
