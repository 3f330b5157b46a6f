use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;

use crate::{LinkIndex, VaultPath};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub path: VaultPath,
    pub title: String,
    pub depth: usize,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct GraphEdge {
    pub source: VaultPath,
    pub target: VaultPath,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphView {
    pub center: Option<VaultPath>,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Set when `max_nodes` cut the traversal short.
    pub truncated: bool,
}

impl LinkIndex {
    /// Link neighbourhood of `center` up to `depth` hops, following links in
    /// both directions. Without a center, the first `max_nodes` notes by path.
    pub fn graph(&self, center: Option<&VaultPath>, depth: usize, max_nodes: usize) -> GraphView {
        let mut included: Vec<(VaultPath, usize)> = Vec::new();
        let mut truncated = false;

        match center {
            Some(start) if self.contains(start) => {
                let mut seen: BTreeSet<VaultPath> = BTreeSet::new();
                let mut queue = VecDeque::from([(start.clone(), 0usize)]);
                seen.insert(start.clone());

                while let Some((path, d)) = queue.pop_front() {
                    if included.len() >= max_nodes {
                        truncated = true;
                        break;
                    }
                    included.push((path.clone(), d));
                    if d >= depth {
                        continue;
                    }
                    let neighbours = self.outgoing_of(&path).into_iter().chain(self.backlinks_of(&path));
                    for next in neighbours {
                        if seen.insert(next.clone()) {
                            queue.push_back((next, d + 1));
                        }
                    }
                }
            }
            Some(_) => {}
            None => {
                for note in self.notes() {
                    if included.len() >= max_nodes {
                        truncated = true;
                        break;
                    }
                    included.push((note.path.clone(), 0));
                }
            }
        }

        let members: BTreeSet<&VaultPath> = included.iter().map(|(p, _)| p).collect();
        let mut edges = Vec::new();
        for (source, _) in &included {
            for target in self.outgoing_of(source) {
                if members.contains(&target) {
                    edges.push(GraphEdge {
                        source: source.clone(),
                        target,
                    });
                }
            }
        }
        edges.sort();

        let nodes = included
            .into_iter()
            .filter_map(|(path, depth)| {
                let note = self.note(&path)?;
                Some(GraphNode {
                    title: note.title.clone(),
                    tags: note.tags.iter().cloned().collect(),
                    path,
                    depth,
                })
            })
            .collect();

        GraphView {
            center: center.cloned(),
            nodes,
            edges,
            truncated,
        }
    }
}
