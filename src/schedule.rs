//! Dependency ordered traversal over any node type.

use indexmap::IndexSet;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

/// Outcome of `topological_order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopoResult<N: Hash + Eq> {
    /// Every reachable node exactly once, each after all of its dependencies except those that
    /// close a cycle.
    pub order: Vec<N>,
    /// Nodes reached again while their own dependencies were still being visited, in the order
    /// they were found.
    pub cycle_nodes: IndexSet<N>,
}

impl<N: Hash + Eq> TopoResult<N> {
    pub fn has_cycles(&self) -> bool {
        !self.cycle_nodes.is_empty()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

struct Visitor<N, F> {
    dependencies: F,
    marks: HashMap<N, Mark>,
    order: Vec<N>,
    cycle_nodes: IndexSet<N>,
}

impl<N, F, D> Visitor<N, F>
where
    N: Clone + Eq + Hash,
    F: FnMut(&N) -> D,
    D: IntoIterator<Item = N>,
{
    /// Marks `node` as in progress, false when it was already reached.
    fn enter(&mut self, node: &N) -> bool {
        match self.marks.get(node) {
            Some(Mark::Done) => false,
            Some(Mark::InProgress) => {
                self.cycle_nodes.insert(node.clone());
                false
            }
            None => {
                self.marks.insert(node.clone(), Mark::InProgress);
                true
            }
        }
    }

    fn dependencies_of(&mut self, node: &N) -> std::vec::IntoIter<N> {
        let dependencies: Vec<N> = (self.dependencies)(node).into_iter().collect();
        dependencies.into_iter()
    }

    /// Depth first with an explicit stack, so long chains don't exhaust the thread stack.
    fn visit(&mut self, root: N) {
        if !self.enter(&root) {
            return;
        }
        let pending = self.dependencies_of(&root);
        let mut stack = vec![(root, pending)];

        loop {
            let next = match stack.last_mut() {
                Some((_, pending)) => pending.next(),
                None => break,
            };
            match next {
                Some(dependency) => {
                    if self.enter(&dependency) {
                        let pending = self.dependencies_of(&dependency);
                        stack.push((dependency, pending));
                    }
                }
                None => {
                    if let Some((node, _)) = stack.pop() {
                        self.marks.insert(node.clone(), Mark::Done);
                        self.order.push(node);
                    }
                }
            }
        }
    }
}

/// Orders the nodes reachable from `roots` so that every node comes after what it depends on.
///
/// `dependencies` lists the nodes a node depends on. Cycles don't stop the traversal: a node
/// found again while it is still being visited goes into `cycle_nodes` and the edge that led to
/// it is ignored. With the same inputs in the same order the result is always the same.
pub fn topological_order<N, I, F, D>(roots: I, dependencies: F) -> TopoResult<N>
where
    N: Clone + Eq + Hash,
    I: IntoIterator<Item = N>,
    F: FnMut(&N) -> D,
    D: IntoIterator<Item = N>,
{
    let mut visitor = Visitor {
        dependencies,
        marks: HashMap::new(),
        order: Vec::new(),
        cycle_nodes: IndexSet::new(),
    };

    for root in roots {
        visitor.visit(root);
    }

    TopoResult {
        order: visitor.order,
        cycle_nodes: visitor.cycle_nodes,
    }
}

/// Nodes reachable from `start`, nearest first. Each node is returned once.
pub fn breadth_first<N, I, F, D>(start: I, mut neighbors: F) -> Vec<N>
where
    N: Clone + Eq + Hash,
    I: IntoIterator<Item = N>,
    F: FnMut(&N) -> D,
    D: IntoIterator<Item = N>,
{
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    for node in start {
        if seen.insert(node.clone()) {
            queue.push_back(node);
        }
    }

    let mut visited = Vec::new();
    while let Some(node) = queue.pop_front() {
        for next in neighbors(&node) {
            if seen.insert(next.clone()) {
                queue.push_back(next);
            }
        }
        visited.push(node);
    }
    visited
}
