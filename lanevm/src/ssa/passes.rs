//! Graph-level optimizations run between building an [`super::SsaGraph`]
//! and lowering it to bytecode (spec §4.4): common subexpression
//! elimination, constant folding, a handful of algebraic simplifications,
//! and dead code elimination.

use std::collections::HashMap;

use lanevm_asm::Opcode;

use super::{SsaGraph, SsaNode, SsaOp, SsaType, SsaValue};
use crate::interpreter::exec::{float_binop, int_binop};

/// The constant value of `v`, if it's an `Int`-typed `Const` node.
fn const_int(graph: &SsaGraph, v: SsaValue) -> Option<i64> {
    let node = &graph.nodes[v];
    (node.op == SsaOp::Const && node.ty == SsaType::Int).then(|| node.immediate.expect("Const node without an immediate"))
}

/// The constant value of `v`, if it's a `Float`-typed `Const` node.
fn const_float(graph: &SsaGraph, v: SsaValue) -> Option<f64> {
    let node = &graph.nodes[v];
    (node.op == SsaOp::Const && node.ty == SsaType::Float)
        .then(|| f64::from_bits(node.immediate.expect("Const node without an immediate") as u64))
}

/// Rewrite every node's arguments to point at the earliest structurally
/// identical node, so duplicate expressions collapse onto one value.
/// Leaves now-unreferenced duplicates in place; [`dce`] removes them.
pub fn cse(graph: &mut SsaGraph) {
    let mut seen: HashMap<SsaNode, SsaValue> = HashMap::new();
    let mut canonical: Vec<SsaValue> = (0..graph.nodes.len()).collect();

    for i in 0..graph.nodes.len() {
        let remapped_args: Vec<SsaValue> =
            graph.nodes[i].args.iter().map(|&a| canonical[a]).collect();
        graph.nodes[i].args = remapped_args;
        let key = graph.nodes[i].clone();
        if let Some(&existing) = seen.get(&key) {
            canonical[i] = existing;
        } else {
            seen.insert(key, i);
        }
    }

    if let Some(r) = graph.ret {
        graph.ret = Some(canonical[r]);
    }
}

/// Fold integer and float arithmetic over constant arguments into a fresh
/// `ConstInt`/`ConstFloat` node, in place of the original opcode node.
/// Nodes with non-constant arguments are left untouched.
pub fn constant_fold(graph: &mut SsaGraph) {
    for i in 0..graph.nodes.len() {
        let SsaOp::Op(op) = graph.nodes[i].op else { continue };
        let args = graph.nodes[i].args.clone();
        if let (Some(f), [a, b]) = (int_binop(op), args.as_slice()) {
            if let (Some(x), Some(y)) = (const_int(graph, *a), const_int(graph, *b)) {
                graph.nodes[i] = SsaNode { op: SsaOp::Const, ty: SsaType::Int, args: vec![], immediate: Some(f(x, y)) };
                continue;
            }
        }
        if let (Some(f), [a, b]) = (float_binop(op), args.as_slice()) {
            if let (Some(x), Some(y)) = (const_float(graph, *a), const_float(graph, *b)) {
                let folded = f(x, y);
                graph.nodes[i] = SsaNode { op: SsaOp::Const, ty: SsaType::Float, args: vec![], immediate: Some(folded.to_bits() as i64) };
            }
        }
    }
}

/// Algebraic identities that turn one opcode into its inverse rather than
/// computing it directly, e.g. `is-not-null(x)` lowers as `!is-null(x)`
/// using [`Opcode::inverse`] instead of carrying a separate `IsNotNull`
/// opcode through the whole pipeline.
pub fn algebraic_simplify(graph: &mut SsaGraph) {
    for i in 0..graph.nodes.len() {
        let SsaOp::Op(op) = graph.nodes[i].op else { continue };
        if matches!(op, Opcode::CmpNeInt | Opcode::CmpNeFloat | Opcode::IsFalse) {
            if let Some(inverse) = op.inverse() {
                // A double inversion normalizes back to the positive
                // form; only rewrite when that actually shortens the
                // dependency chain (the argument is itself an inverted
                // comparison of the same family).
                let arg_is_same_inverse_pair = graph.nodes[i]
                    .args
                    .first()
                    .is_some_and(|&a| matches!(&graph.nodes[a].op, SsaOp::Op(inner) if inner.inverse() == Some(op)));
                if arg_is_same_inverse_pair {
                    let arg = graph.nodes[i].args[0];
                    let inner_args = graph.nodes[arg].args.clone();
                    let ty = graph.nodes[i].ty;
                    graph.nodes[i] = SsaNode { op: SsaOp::Op(inverse), ty, args: inner_args, immediate: None };
                }
            }
        }
    }
}

/// Remove every node not reachable from `ret`, producing a compacted
/// graph with remapped indices. A graph with no `ret` set is left as an
/// empty shell (the caller hasn't finished building it).
pub fn dce(graph: &SsaGraph) -> SsaGraph {
    let Some(ret) = graph.ret else {
        return SsaGraph::new();
    };

    let mut live = vec![false; graph.nodes.len()];
    let mut stack = vec![ret, graph.init_mem, graph.valid_lanes];
    while let Some(v) = stack.pop() {
        if live[v] {
            continue;
        }
        live[v] = true;
        stack.extend(graph.nodes[v].args.iter().copied());
    }

    let mut remap: Vec<Option<SsaValue>> = vec![None; graph.nodes.len()];
    let mut new_graph = SsaGraph { nodes: Vec::new(), init_mem: 0, valid_lanes: 0, ret: None };
    new_graph.nodes.clear();

    for (old_idx, node) in graph.nodes.iter().enumerate() {
        if !live[old_idx] {
            continue;
        }
        let new_args = node.args.iter().map(|&a| remap[a].expect("args precede their users")).collect();
        new_graph.nodes.push(SsaNode { op: node.op, ty: node.ty, args: new_args, immediate: node.immediate });
        remap[old_idx] = Some(new_graph.nodes.len() - 1);
    }

    new_graph.init_mem = remap[graph.init_mem].unwrap();
    new_graph.valid_lanes = remap[graph.valid_lanes].unwrap();
    new_graph.ret = Some(remap[ret].unwrap());
    new_graph
}

/// Run the standard pipeline: CSE, constant folding, algebraic
/// simplification, then DCE. Order matters — CSE before folding lets
/// folding see already-deduplicated constant arguments, and DCE runs last
/// so it can drop everything the earlier passes orphaned.
pub fn optimize(mut graph: SsaGraph) -> SsaGraph {
    cse(&mut graph);
    constant_fold(&mut graph);
    algebraic_simplify(&mut graph);
    dce(&graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cse_collapses_duplicate_constants() {
        let mut graph = SsaGraph::new();
        let a = graph.const_int(7);
        let b = graph.const_int(7);
        let sum = graph.op(Opcode::AddInt, SsaType::Int, vec![a, b]);
        graph.set_return(sum);
        cse(&mut graph);
        assert_eq!(graph.nodes[sum].args[0], graph.nodes[sum].args[1]);
    }

    #[test]
    fn constant_fold_reduces_add_to_a_single_const() {
        let mut graph = SsaGraph::new();
        let a = graph.const_int(2);
        let b = graph.const_int(3);
        let sum = graph.op(Opcode::AddInt, SsaType::Int, vec![a, b]);
        graph.set_return(sum);
        constant_fold(&mut graph);
        assert_eq!(graph.nodes[sum].op, SsaOp::Const);
        assert_eq!(graph.nodes[sum].immediate, Some(5));
    }

    #[test]
    fn dce_drops_unreachable_nodes() {
        let mut graph = SsaGraph::new();
        let used = graph.const_int(1);
        let _unused = graph.const_int(2);
        graph.set_return(used);
        let compacted = dce(&graph);
        // init_mem, valid_lanes, and the one live const.
        assert_eq!(compacted.nodes.len(), 3);
    }
}
