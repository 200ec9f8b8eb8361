use crate::pipeline::PipelineDescriptor;
use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// What to do with a dependency that is neither in the batch nor already ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDependencyPolicy {
    /// The dependent never becomes ready and is reported as unresolved.
    #[default]
    Block,
    /// The edge is dropped with a warning.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraphNode {
    pub name: String,
    /// Dependencies that exist nowhere; only kept under the blocking policy.
    pub missing: Vec<String>,
}

/// Dependency edges of one initialization batch. An edge points from a
/// dependency to its dependent.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<DependencyGraphNode, ()>,
    // Registration order.
    index: IndexMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn build<'a>(
        descriptors: impl IntoIterator<Item = &'a PipelineDescriptor>,
        already_ready: &HashSet<String>,
        policy: MissingDependencyPolicy,
    ) -> Self {
        let descriptors: Vec<&PipelineDescriptor> = descriptors.into_iter().collect();
        let mut graph = DiGraph::new();
        let mut index = IndexMap::new();

        for descriptor in &descriptors {
            let node = graph.add_node(DependencyGraphNode {
                name: descriptor.name.clone(),
                missing: Vec::new(),
            });
            index.insert(descriptor.name.clone(), node);
        }

        for descriptor in &descriptors {
            let Some(&dependent) = index.get(&descriptor.name) else {
                continue;
            };
            for dependency in &descriptor.dependencies {
                if let Some(&source) = index.get(dependency) {
                    graph.update_edge(source, dependent, ());
                } else if already_ready.contains(dependency) {
                    continue;
                } else {
                    match policy {
                        MissingDependencyPolicy::Block => graph[dependent].missing.push(dependency.clone()),
                        MissingDependencyPolicy::BestEffort => warn!(
                            pipeline = %descriptor.name,
                            dependency = %dependency,
                            "Ignoring unknown dependency"
                        ),
                    }
                }
            }
        }

        Self { graph, index }
    }

    pub fn get(&self, name: &str) -> Option<&DependencyGraphNode> {
        self.index.get(name).map(|&node| &self.graph[node])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyGraphNode> {
        self.index.values().map(|&node| &self.graph[node])
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// In-batch dependencies of `name`.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Direct dependents of `name`.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
        let Some(&node) = self.index.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<(NodeIndex, String)> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| (n, self.graph[n].name.clone()))
            .collect();
        names.sort_by_key(|(n, _)| *n);
        names.into_iter().map(|(_, name)| name).collect()
    }

    /// Pending nodes whose every dependency is in `satisfied`.
    pub fn ready(&self, is_pending: impl Fn(&str) -> bool, satisfied: &HashSet<String>) -> Vec<String> {
        self.index
            .iter()
            .filter(|(name, _)| is_pending(name))
            .filter(|&(_, &node)| self.graph[node].missing.is_empty())
            .filter(|&(_, &node)| {
                self.graph
                    .neighbors_directed(node, Direction::Incoming)
                    .all(|dependency| satisfied.contains(&self.graph[dependency].name))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every node reachable along dependent edges, breadth first.
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut out = Vec::new();
        while let Some(node) = bfs.next(&self.graph) {
            if node != start {
                out.push(self.graph[node].name.clone());
            }
        }
        out
    }

    /// Members of dependency cycles, self-dependencies included, one group
    /// per strongly connected component.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<NodeIndex>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1 || self.graph.contains_edge(component[0], component[0])
            })
            .map(|mut component| {
                component.sort();
                component
            })
            .collect();
        cycles.sort();
        cycles
            .into_iter()
            .map(|component| component.into_iter().map(|n| self.graph[n].name.clone()).collect())
            .collect()
    }
}
