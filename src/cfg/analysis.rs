//! CFG analysis: reachability, natural loops, invariant verification
//!
//! The arena CFG is the ground truth; this module derives a petgraph view
//! from it for the graph algorithms (DFS reachability, dominator-based
//! loop detection). RETURN placeholder edges are excluded from the view:
//! their runtime target is the GOSUB stack, not the stored id.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::algo::dominators::simple_fast;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::cfg::{BlockId, ControlFlowGraph, EdgeType};

/// Petgraph view of a CFG. Node weights are block ids; node indices equal
/// block ids because blocks are inserted in arena order.
pub fn to_petgraph(cfg: &ControlFlowGraph<'_>) -> DiGraph<BlockId, EdgeType> {
    let mut graph = DiGraph::new();
    for block in &cfg.blocks {
        graph.add_node(block.id);
    }
    for edge in &cfg.edges {
        if edge.kind != EdgeType::Return {
            graph.add_edge(NodeIndex::new(edge.from), NodeIndex::new(edge.to), edge.kind);
        }
    }
    graph
}

/// All blocks reachable from the entry block.
pub fn find_reachable(cfg: &ControlFlowGraph<'_>) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    if cfg.blocks.is_empty() {
        return seen;
    }
    let mut stack = vec![cfg.entry];
    seen.insert(cfg.entry);
    while let Some(b) = stack.pop() {
        for &s in &cfg.blocks[b].successors {
            if seen.insert(s) {
                stack.push(s);
            }
        }
    }
    seen
}

/// Blocks with no path from entry, in id order.
pub fn find_unreachable(cfg: &ControlFlowGraph<'_>) -> Vec<BlockId> {
    let reachable = find_reachable(cfg);
    (0..cfg.blocks.len())
        .filter(|b| !reachable.contains(b))
        .collect()
}

/// Exit blocks: terminated by END/RETURN/EXIT or simply nothing to flow to.
pub fn find_exits(cfg: &ControlFlowGraph<'_>) -> Vec<BlockId> {
    cfg.blocks
        .iter()
        .filter(|b| b.is_terminated || cfg.out_edges(b.id).is_empty())
        .map(|b| b.id)
        .collect()
}

/// A natural loop: a back-edge whose target dominates its source, plus the
/// body that can reach the source without passing the header.
#[derive(Debug, Clone)]
pub struct NaturalLoop {
    pub header: BlockId,
    pub back_edge: (BlockId, BlockId),
    pub body: HashSet<BlockId>,
}

impl NaturalLoop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.contains(&block)
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// Detect all natural loops using dominance analysis.
///
/// Back-edges are edges (N -> H) where H dominates N; the loop body is H
/// plus every node that reaches N without passing through H.
pub fn detect_natural_loops(cfg: &ControlFlowGraph<'_>) -> Vec<NaturalLoop> {
    if cfg.blocks.is_empty() {
        return vec![];
    }
    let graph = to_petgraph(cfg);
    let entry = NodeIndex::new(cfg.entry);
    let dominators = simple_fast(&graph, entry);

    let mut loops = Vec::new();
    for edge in graph.edge_references() {
        let tail = edge.source();
        let header = edge.target();
        if let Some(mut tail_dominators) = dominators.dominators(tail) {
            if tail_dominators.any(|d| d == header) {
                let body = compute_loop_body(cfg, header.index(), tail.index());
                loops.push(NaturalLoop {
                    header: header.index(),
                    back_edge: (tail.index(), header.index()),
                    body,
                });
            }
        }
    }
    loops
}

fn compute_loop_body(cfg: &ControlFlowGraph<'_>, header: BlockId, tail: BlockId) -> HashSet<BlockId> {
    let mut body = HashSet::new();
    let mut worklist = vec![tail];
    while let Some(node) = worklist.pop() {
        if node == header || !body.insert(node) {
            continue;
        }
        for &pred in &cfg.blocks[node].predecessors {
            if pred != header && !body.contains(&pred) {
                worklist.push(pred);
            }
        }
    }
    body.insert(header);
    body
}

/// One violated structural invariant, for `check` output and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub block: BlockId,
    pub message: String,
}

/// Check the CFG's structural invariants, returning every violation found.
///
/// Verified here:
/// - conditional out-edges come in TRUE/FALSE pairs;
/// - adjacency lists agree exactly with the edge list;
/// - every GOSUB call site pairs its CALL edge with one fallthrough/jump
///   edge into a registered return-continuation block;
/// - `gosub_return_blocks` matches the continuation map exactly;
/// - every block is reachable, or is a registered jump target or GOSUB
///   continuation, or is an empty structural filler block.
pub fn verify_cfg(cfg: &ControlFlowGraph<'_>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for block in &cfg.blocks {
        let out = cfg.out_edges(block.id);
        let trues = out.iter().filter(|e| e.kind == EdgeType::TrueBranch).count();
        let falses = out.iter().filter(|e| e.kind == EdgeType::FalseBranch).count();
        if trues != falses || trues > 1 {
            violations.push(InvariantViolation {
                block: block.id,
                message: format!(
                    "conditional edges not paired: {} true, {} false",
                    trues, falses
                ),
            });
        }

        let calls = out.iter().filter(|e| e.kind == EdgeType::Call).count();
        if calls > 0 {
            let plain: Vec<_> = out
                .iter()
                .filter(|e| matches!(e.kind, EdgeType::Fallthrough | EdgeType::Jump))
                .collect();
            if plain.len() != 1 {
                violations.push(InvariantViolation {
                    block: block.id,
                    message: format!(
                        "call site needs exactly one continuation edge, found {}",
                        plain.len()
                    ),
                });
            } else if !cfg.gosub_return_blocks.contains(&plain[0].to) {
                violations.push(InvariantViolation {
                    block: block.id,
                    message: format!(
                        "continuation block {} not in gosub_return_blocks",
                        plain[0].to
                    ),
                });
            }
        }
    }

    // Adjacency lists must mirror the edge list (Return placeholders
    // excluded) as multisets.
    let mut succ_expected: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    let mut pred_expected: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for edge in &cfg.edges {
        if edge.kind == EdgeType::Return {
            continue;
        }
        succ_expected.entry(edge.from).or_default().push(edge.to);
        pred_expected.entry(edge.to).or_default().push(edge.from);
    }
    for block in &cfg.blocks {
        let mut succ = block.successors.clone();
        let mut expected = succ_expected.remove(&block.id).unwrap_or_default();
        succ.sort_unstable();
        expected.sort_unstable();
        if succ != expected {
            violations.push(InvariantViolation {
                block: block.id,
                message: "successor list out of sync with edges".to_string(),
            });
        }
        let mut pred = block.predecessors.clone();
        let mut expected = pred_expected.remove(&block.id).unwrap_or_default();
        pred.sort_unstable();
        expected.sort_unstable();
        if pred != expected {
            violations.push(InvariantViolation {
                block: block.id,
                message: "predecessor list out of sync with edges".to_string(),
            });
        }
    }

    // gosub_return_blocks is exactly the continuation map's value set.
    let mapped: BTreeSet<BlockId> = cfg.gosub_return_map.values().copied().collect();
    if mapped != cfg.gosub_return_blocks {
        violations.push(InvariantViolation {
            block: cfg.entry,
            message: "gosub_return_blocks does not match the continuation map".to_string(),
        });
    }

    // Coverage: every block is reachable, a registered jump target, a GOSUB
    // continuation, or an empty filler created after a terminator.
    let reachable = find_reachable(cfg);
    let line_targets: HashSet<BlockId> = cfg.line_to_block.values().copied().collect();
    let label_targets: HashSet<BlockId> = cfg.label_to_block.values().copied().collect();
    for block in &cfg.blocks {
        if reachable.contains(&block.id)
            || cfg.gosub_return_blocks.contains(&block.id)
            || line_targets.contains(&block.id)
            || label_targets.contains(&block.id)
            || block.statements.is_empty()
        {
            continue;
        }
        violations.push(InvariantViolation {
            block: block.id,
            message: "non-empty block neither reachable nor a jump target".to_string(),
        });
    }

    violations
}
