use bytemuck::{Pod, Zeroable};

use crate::dot::DIM;

/// Side of a cut. Dots at or below the cut value lie on the low side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Low,
    High,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::Low => 0,
            Side::High => 1,
        }
    }

    pub fn is_high(self) -> bool {
        self == Side::High
    }
}

/// What hangs below one side of a cut.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Child {
    /// A final partition.
    Part(usize),
    /// Another cut, by tree slot.
    Node(usize),
}

/// Where a cut hangs in the tree: the slot of its parent and the side it refines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParentLink {
    pub node: usize,
    pub side: Side,
}

impl ParentLink {
    /// Link of the topmost cut, below the sentinel root.
    pub const ROOT: ParentLink = ParentLink { node: 0, side: Side::High };
}

/// One slot of the cut tree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreeNode {
    /// Cut axis; `None` while the slot is unset.
    pub dim: Option<usize>,
    pub cut: f64,
    pub parent: Option<ParentLink>,
    pub left: Child,
    pub right: Child,
}

impl TreeNode {
    const UNSET: TreeNode = TreeNode {
        dim: None,
        cut: 0.0,
        parent: None,
        left: Child::Part(0),
        right: Child::Part(0),
    };
}

/// A recorded cut as plain data, gathered from every process before assembly.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct CutRecord {
    slot: u64,
    dim: u64,
    cut: f64,
    parent: u64,
    parent_side: u64,
    left: [u64; 2],
    right: [u64; 2],
}

fn pack_child(child: Child) -> [u64; 2] {
    match child {
        Child::Part(p) => [0, p as u64],
        Child::Node(n) => [1, n as u64],
    }
}

fn unpack_child([kind, value]: [u64; 2]) -> Child {
    if kind == 0 { Child::Part(value as usize) } else { Child::Node(value as usize) }
}

impl CutRecord {
    /// Flattens a set slot; unset slots have nothing to record.
    pub fn pack(slot: usize, node: &TreeNode) -> Option<CutRecord> {
        let dim = node.dim?;
        let parent = node.parent.unwrap_or(ParentLink::ROOT);
        Some(CutRecord {
            slot: slot as u64,
            dim: dim as u64,
            cut: node.cut,
            parent: parent.node as u64,
            parent_side: parent.side.index() as u64,
            left: pack_child(node.left),
            right: pack_child(node.right),
        })
    }

    pub fn unpack(self) -> (usize, TreeNode) {
        let side = if self.parent_side == 0 { Side::Low } else { Side::High };
        let node = TreeNode {
            dim: Some(self.dim as usize),
            cut: self.cut,
            parent: Some(ParentLink { node: self.parent as usize, side }),
            left: unpack_child(self.left),
            right: unpack_child(self.right),
        };
        (self.slot as usize, node)
    }
}

/// Binary tree of the cuts that produced a partitioning.
///
/// Slot 0 is a sentinel root whose high child is the topmost cut. Every other cut is
/// stored in the slot named by the first partition of its high side, so a tree over
/// `N` partitions uses slots `1..N` exactly once. The tree is usable for point and box
/// location only after [`CutTree::assemble`] linked it.
#[derive(Clone, Debug, PartialEq)]
pub struct CutTree {
    nodes: Vec<TreeNode>,
}

impl CutTree {
    /// An unlinked tree for `num_parts` partitions.
    pub fn new(num_parts: usize) -> Self {
        let mut nodes = vec![TreeNode::UNSET; num_parts.max(1)];
        nodes[0].right = Child::Part(0);
        Self { nodes }
    }

    pub fn num_parts(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, slot: usize) -> Option<&TreeNode> {
        self.nodes.get(slot)
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// The sentinel carries axis 0 once the tree has been assembled.
    pub fn is_valid(&self) -> bool {
        self.nodes[0].dim.is_some()
    }

    /// Axis and value of the cut stored at `slot`, if any.
    pub fn cut_at(&self, slot: usize) -> Option<(usize, f64)> {
        let node = self.nodes.get(slot)?;
        node.dim.map(|d| (d, node.cut))
    }

    /// Records a cut splitting partitions `partlower..` at `partmid`.
    ///
    /// Until linked, each side points at the first partition it covers.
    pub(crate) fn record(
        &mut self,
        partmid: usize,
        dim: usize,
        cut: f64,
        parent: ParentLink,
        partlower: usize,
    ) {
        if let Some(node) = self.nodes.get_mut(partmid) {
            *node = TreeNode {
                dim: Some(dim),
                cut,
                parent: Some(parent),
                left: Child::Part(partlower),
                right: Child::Part(partmid),
            };
        }
    }

    /// Cuts recorded so far, with their slots.
    pub(crate) fn recorded(&self) -> Vec<(usize, TreeNode)> {
        self.nodes
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, n)| n.dim.is_some())
            .map(|(i, n)| (i, *n))
            .collect()
    }

    /// Cuts recorded so far, flattened for exchange.
    pub(crate) fn records(&self) -> Vec<CutRecord> {
        self.recorded().iter().filter_map(|(slot, node)| CutRecord::pack(*slot, node)).collect()
    }

    /// Builds a linked tree from cuts recorded on all processes.
    ///
    /// Each cut is attached below its parent on the side it refines; leaf pointers of
    /// sides that are never refined keep naming their partition.
    pub fn assemble<I>(num_parts: usize, recorded: I) -> CutTree
    where
        I: IntoIterator<Item = (usize, TreeNode)>,
    {
        let mut tree = CutTree::new(num_parts);
        for (slot, node) in recorded {
            if slot > 0 && slot < tree.nodes.len() {
                tree.nodes[slot] = node;
            }
        }
        for slot in 1..tree.nodes.len() {
            let Some(link) = tree.nodes[slot].parent else { continue };
            let Some(parent) = tree.nodes.get_mut(link.node) else { continue };
            match link.side {
                Side::Low => parent.left = Child::Node(slot),
                Side::High => parent.right = Child::Node(slot),
            }
        }
        tree.nodes[0].dim = Some(0);
        log::trace!("{}", tree.describe());
        tree
    }

    fn top(&self) -> Child {
        self.nodes[0].right
    }

    /// Partition containing `point`, following the cuts from the root.
    ///
    /// Returns `None` if the tree has not been assembled.
    pub fn point_assign(&self, point: &[f64; DIM]) -> Option<usize> {
        if !self.is_valid() {
            return None;
        }
        let mut child = self.top();
        // A linked tree has depth below N.
        for _ in 0..=self.nodes.len() {
            match child {
                Child::Part(p) => return Some(p),
                Child::Node(slot) => {
                    let node = self.nodes.get(slot)?;
                    let dim = node.dim?;
                    child = if point[dim] <= node.cut { node.left } else { node.right };
                }
            }
        }
        None
    }

    /// Sorted partitions whose region intersects the box `min..max`.
    pub fn box_assign(&self, min: &[f64; DIM], max: &[f64; DIM]) -> Vec<usize> {
        let mut parts = Vec::new();
        if !self.is_valid() {
            return parts;
        }
        let mut stack = vec![self.top()];
        while let Some(child) = stack.pop() {
            match child {
                Child::Part(p) => parts.push(p),
                Child::Node(slot) => {
                    let Some(node) = self.nodes.get(slot) else { continue };
                    let Some(dim) = node.dim else { continue };
                    if min[dim] <= node.cut { stack.push(node.left); }
                    if max[dim] > node.cut { stack.push(node.right); }
                }
            }
            if stack.len() > 2 * self.nodes.len() {
                break;
            }
        }
        parts.sort_unstable();
        parts.dedup();
        parts
    }

    /// Partitions in the order of a low-to-high walk over the tree.
    pub fn leaves(&self) -> Vec<usize> {
        let mut out = Vec::new();
        if !self.is_valid() {
            return out;
        }
        let mut stack = vec![self.top()];
        while let Some(child) = stack.pop() {
            match child {
                Child::Part(p) => out.push(p),
                Child::Node(slot) => {
                    if let Some(node) = self.nodes.get(slot) {
                        stack.push(node.right);
                        stack.push(node.left);
                    }
                }
            }
            if out.len() > self.nodes.len() {
                break;
            }
        }
        out
    }

    /// Checks that slots `1..N` all hold a cut and every partition is reached exactly once.
    pub fn is_consistent(&self) -> bool {
        if !self.is_valid() || self.nodes[1..].iter().any(|n| n.dim.is_none()) {
            return false;
        }
        let mut leaves = self.leaves();
        leaves.sort_unstable();
        leaves == (0..self.nodes.len()).collect::<Vec<_>>()
    }

    fn describe(&self) -> String {
        let mut out = format!("cut tree over {} partitions:", self.nodes.len());
        for (slot, node) in self.nodes.iter().enumerate().skip(1) {
            out.push_str(&format!(
                "\n  [{}] dim {:?} cut {} parent {:?} left {:?} right {:?}",
                slot, node.dim, node.cut, node.parent, node.left, node.right
            ));
        }
        out
    }
}
