//! Upstream/downstream lookups over a scene's connection list.

use crate::plug;
use crate::scene::{ConnectionRecord, SceneGraph};
use std::collections::HashMap;

/// Bidirectional indices over a connection list, built once.
///
/// Every query returns results in connection order. Unknown plugs and nodes give empty
/// results.
#[derive(Debug, Clone)]
pub struct ConnectionResolver<'a> {
    connections: &'a [ConnectionRecord],
    by_source: HashMap<&'a str, Vec<usize>>,
    by_destination: HashMap<&'a str, Vec<usize>>,
    by_source_node: NodeIndex<'a>,
    by_destination_node: NodeIndex<'a>,
}

/// Connections by node key, with the first key seen for each leaf name. Sources and
/// destinations keep separate leaf maps so a name only resolves to a node on the side queried.
#[derive(Debug, Clone, Default)]
struct NodeIndex<'a> {
    by_key: HashMap<&'a str, Vec<usize>>,
    first_by_leaf: HashMap<&'a str, &'a str>,
}

impl<'a> NodeIndex<'a> {
    fn insert(&mut self, node: &'a str, connection: usize) {
        self.by_key.entry(node).or_default().push(connection);
        self.first_by_leaf.entry(plug::leaf_name(node)).or_insert(node);
    }

    /// `name` itself when indexed, otherwise the first indexed node with the same leaf name.
    fn get(&self, name: &str) -> Option<&Vec<usize>> {
        self.by_key.get(name).or_else(|| {
            self.first_by_leaf
                .get(plug::leaf_name(name))
                .and_then(|key| self.by_key.get(key))
        })
    }
}

impl<'a> ConnectionResolver<'a> {
    pub fn new(connections: &'a [ConnectionRecord]) -> Self {
        let mut resolver = ConnectionResolver {
            connections,
            by_source: HashMap::new(),
            by_destination: HashMap::new(),
            by_source_node: NodeIndex::default(),
            by_destination_node: NodeIndex::default(),
        };

        for (i, c) in connections.iter().enumerate() {
            let source_node = plug::node_name(&c.source);
            let destination_node = plug::node_name(&c.destination);

            resolver.by_source.entry(&c.source).or_default().push(i);
            resolver
                .by_destination
                .entry(&c.destination)
                .or_default()
                .push(i);
            resolver.by_source_node.insert(source_node, i);
            resolver.by_destination_node.insert(destination_node, i);
        }

        resolver
    }

    pub fn from_scene(scene: &'a SceneGraph) -> Self {
        Self::new(&scene.connections)
    }

    pub fn connections(&self) -> &'a [ConnectionRecord] {
        self.connections
    }

    fn records(&self, indices: Option<&Vec<usize>>) -> Vec<&'a ConnectionRecord> {
        let connections = self.connections;
        indices
            .map(|ids| ids.iter().map(|&i| &connections[i]).collect())
            .unwrap_or_default()
    }

    /// Every plug connected into `destination`.
    pub fn sources_of(&self, destination: &str) -> Vec<&'a str> {
        self.records(self.by_destination.get(destination))
            .into_iter()
            .map(|c| c.source.as_str())
            .collect()
    }

    /// Every plug `source` is connected to.
    pub fn destinations_of(&self, source: &str) -> Vec<&'a str> {
        self.records(self.by_source.get(source))
            .into_iter()
            .map(|c| c.destination.as_str())
            .collect()
    }

    /// The first source connected into `destination`. When a plug has several incoming
    /// connections this is just the one that came first in the document.
    pub fn try_single_source(&self, destination: &str) -> Option<&'a str> {
        self.by_destination
            .get(destination)
            .and_then(|ids| ids.first())
            .map(|&i| self.connections[i].source.as_str())
    }

    /// Connections whose destination plug belongs to the node `name`.
    pub fn incoming_to_node(&self, name: &str) -> Vec<&'a ConnectionRecord> {
        self.records(self.by_destination_node.get(name))
    }

    /// Connections whose source plug belongs to the node `name`.
    pub fn outgoing_from_node(&self, name: &str) -> Vec<&'a ConnectionRecord> {
        self.records(self.by_source_node.get(name))
    }

    /// Names of the nodes feeding `name`, deduplicated, in connection order.
    pub fn upstream_nodes(&self, name: &str) -> Vec<&'a str> {
        let mut nodes: Vec<&'a str> = Vec::new();
        for c in self.incoming_to_node(name) {
            let node = plug::node_name(&c.source);
            if !nodes.contains(&node) {
                nodes.push(node);
            }
        }
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connections() -> Vec<ConnectionRecord> {
        vec![
            ConnectionRecord::new("curve1.o", "pCube1.tx"),
            ConnectionRecord::new("curve2.o", "pCube1.tx"),
            ConnectionRecord::new("curve1.o", "pCube1.ty"),
            ConnectionRecord::new("pCube1.wm", "|rig|ctrl.pm").forced(),
            ConnectionRecord::new("groupId1.id", "shape1.iog[0].og[1].gid"),
        ]
    }

    #[test]
    fn test_plug_queries() {
        let list = connections();
        let resolver = ConnectionResolver::new(&list);

        assert_eq!(resolver.sources_of("pCube1.tx"), vec!["curve1.o", "curve2.o"]);
        assert_eq!(
            resolver.destinations_of("curve1.o"),
            vec!["pCube1.tx", "pCube1.ty"]
        );
        assert_eq!(resolver.try_single_source("pCube1.tx"), Some("curve1.o"));
        assert_eq!(resolver.try_single_source("pCube1.tz"), None);
        assert!(resolver.sources_of("nothing.here").is_empty());
        assert!(resolver.destinations_of("").is_empty());
    }

    #[test]
    fn test_node_queries() {
        let list = connections();
        let resolver = ConnectionResolver::new(&list);

        assert_eq!(resolver.incoming_to_node("pCube1").len(), 3);
        assert_eq!(resolver.outgoing_from_node("pCube1").len(), 1);
        assert_eq!(resolver.upstream_nodes("pCube1"), vec!["curve1", "curve2"]);
        assert_eq!(resolver.incoming_to_node("shape1").len(), 1);
        assert!(resolver.incoming_to_node("curve1").is_empty());
        assert!(resolver.outgoing_from_node("missing").is_empty());
    }

    #[test]
    fn test_node_queries_by_leaf_name() {
        let list = connections();
        let resolver = ConnectionResolver::new(&list);

        let incoming = resolver.incoming_to_node("ctrl");
        assert_eq!(incoming.len(), 1);
        assert!(incoming[0].force);
        assert_eq!(resolver.incoming_to_node("|other|ctrl").len(), 1);
        assert_eq!(resolver.incoming_to_node("|rig|ctrl").len(), 1);
    }

    #[test]
    fn test_first_leaf_match_wins() {
        let list = vec![
            ConnectionRecord::new("a.o", "|g1|n.i"),
            ConnectionRecord::new("b.o", "|g2|n.i"),
        ];
        let resolver = ConnectionResolver::new(&list);
        let incoming = resolver.incoming_to_node("n");
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source, "a.o");
        assert_eq!(resolver.incoming_to_node("|g2|n")[0].source, "b.o");
    }

    #[test]
    fn test_leaf_name_resolves_on_the_queried_side() {
        let list = vec![
            ConnectionRecord::new("|g1|n.o", "x.i"),
            ConnectionRecord::new("y.o", "|g2|n.i"),
        ];
        let resolver = ConnectionResolver::new(&list);

        let incoming = resolver.incoming_to_node("n");
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source, "y.o");
        assert_eq!(resolver.upstream_nodes("n"), vec!["y"]);

        let outgoing = resolver.outgoing_from_node("n");
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].destination, "x.i");
    }
}
