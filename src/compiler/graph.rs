// ABOUTME: Import dependency graph built from import directives
// ABOUTME: Detects cyclic imports and yields a leaves-first resolution order

use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::{Direction, Graph};
use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;

use super::error::{CompileError, Result};
use super::imports::scan_directives;

/// Templates reachable from a source through `<import>` directives.
///
/// Edges point from a dependency to the template that imports it.
#[derive(Debug, Clone)]
pub struct ImportGraph {
    graph: Graph<String, ()>,
    template_indices: HashMap<String, NodeIndex>,
    roots: Vec<String>,
}

impl ImportGraph {
    /// Walk every import reachable from `source`. Fails on the first target
    /// that has no registered content.
    pub fn from_source(source: &str, imports: &IndexMap<String, String>) -> Result<Self> {
        let mut graph = Graph::new();
        let mut template_indices: HashMap<String, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::new();

        let mut roots = Vec::new();
        for directive in scan_directives(source) {
            if !roots.contains(&directive.target_name) {
                roots.push(directive.target_name);
            }
        }

        for root in &roots {
            let node = graph.add_node(root.clone());
            template_indices.insert(root.clone(), node);
            queue.push_back(root.clone());
        }

        while let Some(name) = queue.pop_front() {
            let content = imports
                .get(&name)
                .ok_or_else(|| CompileError::UnresolvedImport { name: name.clone() })?;
            let template_node = template_indices[&name];

            for directive in scan_directives(content) {
                let dependency = directive.target_name;
                let dependency_node = match template_indices.get(&dependency) {
                    Some(&node) => node,
                    None => {
                        let node = graph.add_node(dependency.clone());
                        template_indices.insert(dependency.clone(), node);
                        queue.push_back(dependency);
                        node
                    }
                };
                if graph.find_edge(dependency_node, template_node).is_none() {
                    graph.add_edge(dependency_node, template_node, ());
                }
            }
        }

        Ok(Self {
            graph,
            template_indices,
            roots,
        })
    }

    /// Resolution order with every dependency before its importers.
    pub fn resolution_order(&self) -> Result<Vec<String>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let name = self.graph[cycle.node_id()].clone();
            let chain = self.cycle_path(&name);
            CompileError::cyclic(&name, &chain)
        })?;

        Ok(sorted
            .into_iter()
            .map(|node| self.graph[node].clone())
            .collect())
    }

    /// Import names used directly by the top-level source, in first-occurrence order.
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn templates(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .map(|node| self.graph[node].clone())
            .collect()
    }

    /// Templates that `name` imports directly.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Templates that import `name` directly.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Outgoing)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
        let Some(&node) = self.template_indices.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|neighbor| self.graph[neighbor].clone())
            .collect();
        // petgraph walks edges newest first
        names.reverse();
        names
    }

    /// Import chain from `name` back to itself, for error reporting.
    fn cycle_path(&self, name: &str) -> Vec<String> {
        let Some(&start) = self.template_indices.get(name) else {
            return Vec::new();
        };

        let mut previous: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for dependency in self.graph.neighbors_directed(node, Direction::Incoming) {
                if dependency == start {
                    let mut path = vec![self.graph[node].clone()];
                    let mut cursor = node;
                    while let Some(&before) = previous.get(&cursor) {
                        path.push(self.graph[before].clone());
                        cursor = before;
                    }
                    path.reverse();
                    return path;
                }
                if dependency != start && !previous.contains_key(&dependency) {
                    previous.insert(dependency, node);
                    queue.push_back(dependency);
                }
            }
        }
        vec![name.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imports(entries: &[(&str, &str)]) -> IndexMap<String, String> {
        entries
            .iter()
            .map(|(name, content)| (name.to_string(), content.to_string()))
            .collect()
    }

    #[test]
    fn test_resolution_order_is_leaves_first() {
        let table = imports(&[
            ("page", "<import template=\"header\">\n<import template=\"footer\">"),
            ("header", "<import template=\"logo\">"),
            ("footer", "bye"),
            ("logo", "*"),
        ]);
        let graph = ImportGraph::from_source("<import template=\"page\">", &table).unwrap();
        let order = graph.resolution_order().unwrap();

        let position = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(position("logo") < position("header"));
        assert!(position("header") < position("page"));
        assert!(position("footer") < position("page"));
        assert_eq!(graph.dependencies("page"), vec!["header", "footer"]);
        assert_eq!(graph.dependents("logo"), vec!["header"]);
        assert_eq!(graph.roots(), ["page".to_string()]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let table = imports(&[
            ("a", "<import template=\"b\">"),
            ("b", "<import template=\"a\">"),
        ]);
        let graph = ImportGraph::from_source("<import template=\"a\">", &table).unwrap();
        match graph.resolution_order() {
            Err(CompileError::CyclicImport { name, chain }) => {
                assert!(name == "a" || name == "b");
                assert!(chain.contains("a") && chain.contains("b"));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_import_is_a_cycle() {
        let table = imports(&[("loop", "again <import template=\"loop\">")]);
        let graph = ImportGraph::from_source("<import template=\"loop\">", &table).unwrap();
        assert!(matches!(
            graph.resolution_order(),
            Err(CompileError::CyclicImport { .. })
        ));
    }

    #[test]
    fn test_missing_import_fails_fast() {
        let table = imports(&[("a", "<import template=\"ghost\">")]);
        let error = ImportGraph::from_source("<import template=\"a\">", &table).unwrap_err();
        assert_eq!(
            error,
            CompileError::UnresolvedImport {
                name: "ghost".to_string()
            }
        );
    }
}
