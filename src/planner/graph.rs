//! Dependency graph over resource descriptors.
//!
//! Edges come from explicit dependencies and from every deferred reference
//! in a descriptor's inputs. The creation order is computed once with
//! Kahn's algorithm, taking the smallest ready id first so the order is
//! stable across runs.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::GraphError;
use crate::resource::ResourceDescriptor;

/// A validated, acyclic set of descriptors.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    descriptors: BTreeMap<String, ResourceDescriptor>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
    order: Vec<String>,
}

impl DependencyGraph {
    /// Builds and validates the graph.
    ///
    /// # Errors
    ///
    /// - [`GraphError::DuplicateId`] if two descriptors share an id
    /// - [`GraphError::DanglingReference`] if a reference or explicit
    ///   dependency names an absent id
    /// - [`GraphError::CycleDetected`] if no topological order exists
    pub fn build(descriptors: Vec<ResourceDescriptor>) -> Result<Self, GraphError> {
        let mut by_id = BTreeMap::new();
        for descriptor in descriptors {
            if by_id.contains_key(&descriptor.id) {
                return Err(GraphError::DuplicateId { id: descriptor.id });
            }
            by_id.insert(descriptor.id.clone(), descriptor);
        }

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, BTreeSet<String>> =
            by_id.keys().map(|id| (id.clone(), BTreeSet::new())).collect();

        for (id, descriptor) in &by_id {
            let deps = descriptor.dependency_ids();
            for dep in &deps {
                if !by_id.contains_key(*dep) {
                    return Err(GraphError::DanglingReference {
                        resource: id.clone(),
                        target: (*dep).to_string(),
                    });
                }
                if let Some(set) = dependents.get_mut(*dep) {
                    set.insert(id.clone());
                }
            }
            dependencies.insert(id.clone(), deps.into_iter().map(str::to_string).collect());
        }

        let order = topological_order(&dependencies, &dependents)?;
        debug!("Resolved creation order: {}", order.join(" -> "));

        Ok(Self {
            descriptors: by_id,
            dependencies,
            dependents,
            order,
        })
    }

    /// Creation order. Every resource appears after all of its dependencies.
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the descriptor with the given id.
    #[must_use]
    pub fn descriptor(&self, id: &str) -> Option<&ResourceDescriptor> {
        self.descriptors.get(id)
    }

    /// Descriptors in creation order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.order.iter().filter_map(|id| self.descriptors.get(id))
    }

    /// Direct dependencies of `id`.
    pub fn dependencies(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Direct dependents of `id`.
    pub fn dependents(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Every resource that transitively depends on `id`.
    #[must_use]
    pub fn descendants(&self, id: &str) -> BTreeSet<&str> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents(id).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Groups resources by depth: level 0 has no dependencies, level n
    /// depends on something at level n-1.
    #[must_use]
    pub fn levels(&self) -> Vec<Vec<&str>> {
        let mut depth: BTreeMap<&str, usize> = BTreeMap::new();
        let mut levels: Vec<Vec<&str>> = Vec::new();

        for id in &self.order {
            let level = self
                .dependencies(id)
                .filter_map(|dep| depth.get(dep))
                .max()
                .map_or(0, |d| d + 1);
            depth.insert(id, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(id);
        }

        for level in &mut levels {
            level.sort_unstable();
        }
        levels
    }
}

fn topological_order(
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    dependents: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<String>, GraphError> {
    let mut in_degree: BTreeMap<&str, usize> = dependencies
        .iter()
        .map(|(id, deps)| (id.as_str(), deps.len()))
        .collect();

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(dependent.as_str());
                }
            }
        }
    }

    if order.len() == in_degree.len() {
        return Ok(order);
    }

    // Whatever is left is on a cycle or wedged between cycles. Only members
    // of a strongly connected component are reported.
    let remaining: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg > 0)
        .map(|(id, _)| *id)
        .collect();

    Err(GraphError::CycleDetected {
        ids: cycle_members(&remaining, dependencies)
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

/// Returns the nodes of `nodes` that lie on a cycle: members of a strongly
/// connected component with more than one node, and self-dependent nodes.
fn cycle_members<'a>(
    nodes: &BTreeSet<&'a str>,
    dependencies: &'a BTreeMap<String, BTreeSet<String>>,
) -> BTreeSet<&'a str> {
    let mut tarjan = Tarjan {
        nodes,
        dependencies,
        next_index: 0,
        index: BTreeMap::new(),
        low_link: BTreeMap::new(),
        stack: Vec::new(),
        on_stack: BTreeSet::new(),
        members: BTreeSet::new(),
    };
    for &node in nodes {
        if !tarjan.index.contains_key(node) {
            tarjan.visit(node);
        }
    }
    tarjan.members
}

/// Tarjan's strongly connected components, restricted to a node subset.
struct Tarjan<'g, 'a> {
    nodes: &'g BTreeSet<&'a str>,
    dependencies: &'a BTreeMap<String, BTreeSet<String>>,
    next_index: usize,
    index: BTreeMap<&'a str, usize>,
    low_link: BTreeMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: BTreeSet<&'a str>,
    members: BTreeSet<&'a str>,
}

impl<'a> Tarjan<'_, 'a> {
    fn visit(&mut self, node: &'a str) {
        self.index.insert(node, self.next_index);
        self.low_link.insert(node, self.next_index);
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        let dependencies = self.dependencies;
        let mut self_loop = false;
        for dep in dependencies.get(node).into_iter().flatten() {
            let dep = dep.as_str();
            if dep == node {
                self_loop = true;
            }
            if !self.nodes.contains(dep) {
                continue;
            }
            if !self.index.contains_key(dep) {
                self.visit(dep);
                let low = self.low_link[node].min(self.low_link[dep]);
                self.low_link.insert(node, low);
            } else if self.on_stack.contains(dep) {
                let low = self.low_link[node].min(self.index[dep]);
                self.low_link.insert(node, low);
            }
        }

        if self.low_link[node] != self.index[node] {
            return;
        }
        let mut component = Vec::new();
        while let Some(member) = self.stack.pop() {
            self.on_stack.remove(member);
            component.push(member);
            if member == node {
                break;
            }
        }
        if component.len() > 1 || self_loop {
            self.members.extend(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    fn node(id: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(id, ResourceKind::RemoteCommand)
    }

    fn position(graph: &DependencyGraph, id: &str) -> usize {
        graph.order().iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_order_respects_references_and_explicit_edges() {
        let graph = DependencyGraph::build(vec![
            node("container").depends_on("ready").with_reference("image", "image", "image_name"),
            node("image").with_reference("host", "server", "ipv4_address"),
            node("ready").with_reference("host", "server", "ipv4_address"),
            node("server").with_reference("ssh_key_id", "key", "id"),
            node("key"),
        ])
        .unwrap();

        for descriptor in graph.descriptors() {
            for dep in graph.dependencies(&descriptor.id) {
                assert!(position(&graph, dep) < position(&graph, &descriptor.id));
            }
        }
        assert_eq!(graph.order(), ["key", "server", "image", "ready", "container"]);
    }

    #[test]
    fn test_server_firewall_dns_scenario() {
        let graph = DependencyGraph::build(vec![
            ResourceDescriptor::new("dns-record", ResourceKind::DnsRecord)
                .with_reference("content", "server", "ipv4_address"),
            ResourceDescriptor::new("firewall-attachment", ResourceKind::FirewallAttachment)
                .with_reference("server_id", "server", "id")
                .with_reference("firewall_id", "firewall", "id"),
            ResourceDescriptor::new("server", ResourceKind::Server)
                .with_reference("ssh_key_id", "ssh-key", "id"),
            ResourceDescriptor::new("firewall", ResourceKind::Firewall),
            ResourceDescriptor::new("ssh-key", ResourceKind::SshKey),
        ])
        .unwrap();

        assert!(position(&graph, "ssh-key") < position(&graph, "server"));
        assert!(position(&graph, "firewall") < position(&graph, "server"));
        assert!(position(&graph, "server") < position(&graph, "firewall-attachment"));
        assert!(position(&graph, "server") < position(&graph, "dns-record"));
        assert_eq!(
            graph.order(),
            ["firewall", "ssh-key", "server", "dns-record", "firewall-attachment"]
        );
    }

    #[test]
    fn test_independent_resources_sorted_by_id() {
        let graph =
            DependencyGraph::build(vec![node("zeta"), node("alpha"), node("mid")]).unwrap();
        assert_eq!(graph.order(), ["alpha", "mid", "zeta"]);

        let again =
            DependencyGraph::build(vec![node("mid"), node("zeta"), node("alpha")]).unwrap();
        assert_eq!(graph.order(), again.order());
    }

    #[test]
    fn test_cycle_names_only_members() {
        let err = DependencyGraph::build(vec![
            node("a").depends_on("c"),
            node("b").depends_on("a"),
            node("c").depends_on("b"),
            node("downstream").depends_on("a"),
            node("root"),
        ])
        .unwrap_err();

        match err {
            GraphError::CycleDetected { ids } => assert_eq!(ids, ["a", "b", "c"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_node_between_two_cycles_is_not_a_member() {
        let err = DependencyGraph::build(vec![
            node("a").depends_on("b"),
            node("b").depends_on("a"),
            node("x").depends_on("a"),
            node("c").depends_on("d").depends_on("x"),
            node("d").depends_on("c"),
        ])
        .unwrap_err();

        match err {
            GraphError::CycleDetected { ids } => assert_eq!(ids, ["a", "b", "c", "d"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = DependencyGraph::build(vec![node("a").with_reference("x", "a", "out")]).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { ids } if ids == ["a"]));
    }

    #[test]
    fn test_dangling_reference() {
        let err = DependencyGraph::build(vec![node("dns").with_reference("content", "server", "ipv4_address")])
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::DanglingReference { resource, target } if resource == "dns" && target == "server"
        ));

        let err = DependencyGraph::build(vec![node("a").depends_on("ghost")]).unwrap_err();
        assert!(matches!(err, GraphError::DanglingReference { .. }));
    }

    #[test]
    fn test_duplicate_id() {
        let err = DependencyGraph::build(vec![node("a"), node("a")]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateId { id } if id == "a"));
    }

    #[test]
    fn test_descendants_and_levels() {
        let graph = DependencyGraph::build(vec![
            node("key"),
            node("server").depends_on("key"),
            node("dns").depends_on("server"),
            node("ready").depends_on("server"),
            node("container").depends_on("ready"),
            node("other"),
        ])
        .unwrap();

        let descendants: Vec<_> = graph.descendants("server").into_iter().collect();
        assert_eq!(descendants, ["container", "dns", "ready"]);
        assert!(graph.descendants("other").is_empty());

        assert_eq!(
            graph.levels(),
            vec![vec!["key", "other"], vec!["server"], vec!["dns", "ready"], vec!["container"]]
        );
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::build(Vec::new()).unwrap();
        assert!(graph.is_empty());
        assert!(graph.levels().is_empty());
    }
}
