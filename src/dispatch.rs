// dispatch.rs - Dispatch-tree synthesis
//
// The target has no indexed jump; control reaches a unit procedure through a
// binary tree of range-guarded invocations. Construction is a pure recursion
// over the sorted address set; serialization orders each node's two guarded
// tests so the heavier half (by summed address weight) is evaluated first,
// and emits every invocation in tail form so a match skips the sibling test
// without growing the call stack.

use crate::blocks::WeightMap;
use crate::command::{Artifact, Command, Slot, Test};
use log::debug;

/// A node of the dispatch tree. Leaves invoke a unit procedure directly;
/// internal nodes split a contiguous address range at its midpoint.
#[derive(Debug, Clone)]
pub enum DispatchNode {
    Leaf {
        address: u32,
    },
    Split {
        left: Box<DispatchNode>,
        right: Box<DispatchNode>,
    },
}

impl DispatchNode {
    /// Smallest and largest address covered by this subtree.
    pub fn bounds(&self) -> (u32, u32) {
        match self {
            DispatchNode::Leaf { address } => (*address, *address),
            DispatchNode::Split { left, right } => (left.bounds().0, right.bounds().1),
        }
    }

    /// Maximum number of range decisions from the root to any leaf.
    pub fn depth(&self) -> u32 {
        match self {
            DispatchNode::Leaf { .. } => 0,
            DispatchNode::Split { left, right } => 1 + left.depth().max(right.depth()),
        }
    }

    /// Follow the tree the way the generated guards would route `value`.
    /// Returns the invoked address, or None when the value falls outside
    /// every covered range.
    pub fn resolve(&self, value: u32) -> Option<u32> {
        match self {
            DispatchNode::Leaf { address } => (*address == value).then_some(*address),
            DispatchNode::Split { left, right } => {
                let (llo, lhi) = left.bounds();
                let (rlo, rhi) = right.bounds();
                if value >= llo && value <= lhi {
                    left.resolve(value)
                } else if value >= rlo && value <= rhi {
                    right.resolve(value)
                } else {
                    None
                }
            }
        }
    }

    fn weight(&self, weights: &WeightMap) -> i64 {
        match self {
            DispatchNode::Leaf { address } => *weights.get(address).unwrap_or(&1),
            DispatchNode::Split { left, right } => left.weight(weights) + right.weight(weights),
        }
    }
}

/// Build the dispatch tree over a sorted, deduplicated address set.
/// Returns None for an empty set.
pub fn build_tree(addresses: &[u32]) -> Option<DispatchNode> {
    match addresses {
        [] => None,
        [address] => Some(DispatchNode::Leaf { address: *address }),
        _ => {
            let mid = addresses.len() / 2;
            let left = build_tree(&addresses[..mid]).expect("non-empty half");
            let right = build_tree(&addresses[mid..]).expect("non-empty half");
            Some(DispatchNode::Split {
                left: Box::new(left),
                right: Box::new(right),
            })
        }
    }
}

/// The serialized dispatcher: its maximum decision depth and the procedure
/// artifacts, one per tree node plus the root entry.
#[derive(Debug)]
pub struct DispatchOutput {
    pub depth: u32,
    pub artifacts: Vec<Artifact>,
}

/// Dispatch scratch slot the value under test is cached into at the root.
pub const DISPATCH_SLOT: Slot = Slot::Tmp("current_pc");

/// Generate the dispatcher for `addresses`, routing each matched value to
/// `<unit_prefix>_<hex address>`. An empty address set yields no artifacts
/// and depth 0.
pub fn generate(
    addresses: &[u32],
    weights: &WeightMap,
    unit_prefix: &str,
    ns: &str,
) -> DispatchOutput {
    let Some(tree) = build_tree(addresses) else {
        return DispatchOutput {
            depth: 0,
            artifacts: Vec::new(),
        };
    };

    let mut artifacts = Vec::new();

    // The root caches the dispatch value once; every node below tests the
    // cached copy.
    let root = vec![
        Command::copy(DISPATCH_SLOT, Slot::Pc),
        Command::call("dispatch/tree_root"),
    ];
    artifacts.push(Artifact::render("dispatch/root", &root, ns));

    serialize(&tree, "tree_root", weights, unit_prefix, ns, &mut artifacts);

    let depth = tree.depth();
    debug!(
        "dispatch tree: {} addresses, depth {}, {} procedures",
        addresses.len(),
        depth,
        artifacts.len()
    );
    DispatchOutput { depth, artifacts }
}

fn serialize(
    node: &DispatchNode,
    name: &str,
    weights: &WeightMap,
    unit_prefix: &str,
    ns: &str,
    artifacts: &mut Vec<Artifact>,
) {
    match node {
        DispatchNode::Leaf { address } => {
            let body = vec![Command::TailCall {
                path: format!("{unit_prefix}_{address:x}"),
            }];
            artifacts.push(Artifact::render(format!("dispatch/{name}"), &body, ns));
        }
        DispatchNode::Split { left, right } => {
            // Child names stay positional (left = _0) so the emitted test
            // order can follow weight without renaming subtrees.
            let halves = [(&**left, format!("{name}_0")), (&**right, format!("{name}_1"))];
            let mut order = [0usize, 1usize];
            if halves[1].0.weight(weights) > halves[0].0.weight(weights) {
                order = [1, 0];
            }

            let mut body = Vec::with_capacity(2);
            for idx in order {
                let (child, child_name) = &halves[idx];
                let (lo, hi) = child.bounds();
                body.push(Command::iff(
                    Test::range(DISPATCH_SLOT, lo as i32, hi as i32),
                    Command::TailCall {
                        path: format!("dispatch/{child_name}"),
                    },
                ));
            }
            artifacts.push(Artifact::render(format!("dispatch/{name}"), &body, ns));

            for (child, child_name) in &halves {
                serialize(*child, child_name, weights, unit_prefix, ns, artifacts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn addrs(n: u32) -> Vec<u32> {
        (0..n).map(|i| i * 4).collect()
    }

    #[test]
    fn empty_set_is_valid() {
        let out = generate(&[], &BTreeMap::new(), "instr", "rv32");
        assert_eq!(out.depth, 0);
        assert!(out.artifacts.is_empty());
    }

    #[test]
    fn every_address_resolves_to_itself() {
        for n in [1u32, 2, 3, 5, 8, 13, 64] {
            let set = addrs(n);
            let tree = build_tree(&set).unwrap();
            for &a in &set {
                assert_eq!(tree.resolve(a), Some(a));
            }
            assert_eq!(tree.resolve(2), None); // unaligned, between leaves
        }
    }

    #[test]
    fn depth_is_logarithmic() {
        for n in [1u32, 2, 3, 5, 8, 13, 64, 100] {
            let tree = build_tree(&addrs(n)).unwrap();
            let bound = (n as f64).log2().ceil() as u32;
            assert!(
                tree.depth() <= bound,
                "n={} depth={} bound={}",
                n,
                tree.depth(),
                bound
            );
        }
    }

    #[test]
    fn single_address_invokes_directly() {
        let out = generate(&[0x40], &BTreeMap::new(), "instr", "rv32");
        assert_eq!(out.depth, 0);
        let leaf = out
            .artifacts
            .iter()
            .find(|a| a.name == "dispatch/tree_root")
            .unwrap();
        assert_eq!(leaf.content, "return run function rv32:instr_40\n");
    }

    #[test]
    fn root_caches_dispatch_value() {
        let out = generate(&addrs(4), &BTreeMap::new(), "instr", "rv32");
        let root = out
            .artifacts
            .iter()
            .find(|a| a.name == "dispatch/root")
            .unwrap();
        assert!(root
            .content
            .starts_with("scoreboard players operation #current_pc rv_temp = pc rv32_pc"));
        assert!(root.content.contains("function rv32:dispatch/tree_root"));
    }

    #[test]
    fn heavier_half_tested_first() {
        // Equal-size halves {0,4} and {8,12}; 8 carries a symbol-grade
        // weight, so the right half's range test must come first.
        let mut weights = BTreeMap::new();
        weights.insert(8u32, 100i64);
        let out = generate(&addrs(4), &weights, "block", "rv32");
        let node = out
            .artifacts
            .iter()
            .find(|a| a.name == "dispatch/tree_root")
            .unwrap();
        let first = node.content.lines().next().unwrap();
        assert!(
            first.contains("matches 8..12"),
            "expected heavy half first, got: {first}"
        );
        assert!(node.content.lines().nth(1).unwrap().contains("matches 0..4"));
    }

    #[test]
    fn ties_keep_left_first() {
        let out = generate(&addrs(4), &BTreeMap::new(), "instr", "rv32");
        let node = out
            .artifacts
            .iter()
            .find(|a| a.name == "dispatch/tree_root")
            .unwrap();
        assert!(node.content.lines().next().unwrap().contains("matches 0..4"));
    }

    #[test]
    fn invocations_are_tail_form() {
        let out = generate(&addrs(8), &BTreeMap::new(), "instr", "rv32");
        for artifact in &out.artifacts {
            if artifact.name == "dispatch/root" {
                continue;
            }
            for line in artifact.content.lines() {
                assert!(
                    line.contains("return run function"),
                    "non-tail invocation in {}: {line}",
                    artifact.name
                );
            }
        }
    }
}
