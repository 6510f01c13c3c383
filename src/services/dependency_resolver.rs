//! Cycle detection over the task dependency edge set.
//!
//! Edges are `(task, depends_on)` pairs. The graph must stay a DAG; the
//! scheduler consults `would_create_cycle` inside the add-dependency path.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

type Graph = HashMap<Uuid, Vec<Uuid>>;

fn build_graph(edges: &[(Uuid, Uuid)]) -> Graph {
    let mut graph: Graph = HashMap::new();
    for &(task, depends_on) in edges {
        graph.entry(task).or_default().push(depends_on);
        graph.entry(depends_on).or_default();
    }
    graph
}

fn dfs_cycle(
    node: Uuid,
    graph: &Graph,
    visited: &mut HashSet<Uuid>,
    rec_stack: &mut HashSet<Uuid>,
    path: &mut Vec<Uuid>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(&node) {
        for &neighbor in neighbors {
            if !visited.contains(&neighbor) {
                if dfs_cycle(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(&neighbor) {
                if let Some(start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..start);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(&node);
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Find any cycle in the edge set, returning the nodes on it.
    pub fn detect_cycle(&self, edges: &[(Uuid, Uuid)]) -> Option<Vec<Uuid>> {
        let graph = build_graph(edges);
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for &node in graph.keys() {
            if !visited.contains(&node)
                && dfs_cycle(node, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path);
            }
        }
        None
    }

    /// Would adding `task -> depends_on` close a cycle? True when a path
    /// `depends_on -> ... -> task` already exists (or the edge is a
    /// self-loop).
    pub fn would_create_cycle(
        &self,
        edges: &[(Uuid, Uuid)],
        task: Uuid,
        depends_on: Uuid,
    ) -> bool {
        if task == depends_on {
            return true;
        }
        let graph = build_graph(edges);
        let mut stack = vec![depends_on];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == task {
                return true;
            }
            if seen.insert(node) {
                if let Some(neighbors) = graph.get(&node) {
                    stack.extend(neighbors.iter().copied());
                }
            }
        }
        false
    }

    /// Longest dependency chain below `task`.
    pub fn dependency_depth(&self, edges: &[(Uuid, Uuid)], task: Uuid) -> u32 {
        let graph = build_graph(edges);
        fn depth(node: Uuid, graph: &Graph, memo: &mut HashMap<Uuid, u32>) -> u32 {
            if let Some(&d) = memo.get(&node) {
                return d;
            }
            // Mark before recursing so a cycle cannot loop forever.
            memo.insert(node, 0);
            let d = graph
                .get(&node)
                .map(|deps| deps.iter().map(|&n| depth(n, graph, memo) + 1).max().unwrap_or(0))
                .unwrap_or(0);
            memo.insert(node, d);
            d
        }
        depth(task, &graph, &mut HashMap::new())
    }
}
