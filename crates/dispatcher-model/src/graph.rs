use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::slots::NodeAssets;

pub type NodeId = u64;

/// Node-level configuration (`name`, `executor`, `executor_data`, ...).
///
/// Kept as an opaque JSON object so it round-trips structurally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeMetadata(Map<String, Value>);

impl NodeMetadata {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.0.insert(key.into(), value.into());
    self
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn name(&self) -> Option<&str> {
    self.0.get("name").and_then(Value::as_str)
  }

  pub fn executor(&self) -> Option<&str> {
    self.0.get("executor").and_then(Value::as_str)
  }
}

impl From<Map<String, Value>> for NodeMetadata {
  fn from(map: Map<String, Value>) -> Self {
    Self(map)
  }
}

/// A task node in the transport graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub id: NodeId,
  #[serde(default)]
  pub metadata: NodeMetadata,
  #[serde(default)]
  pub assets: NodeAssets,
}

impl Node {
  pub fn new(id: NodeId, metadata: NodeMetadata) -> Self {
    Self {
      id,
      metadata,
      assets: NodeAssets::default(),
    }
  }
}

/// A dependency edge. Identity is the `(source, target)` pair; `metadata`
/// (edge name, parameter type, argument index) is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
  pub source: NodeId,
  pub target: NodeId,
  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub metadata: Value,
}

impl Link {
  pub fn new(source: NodeId, target: NodeId) -> Self {
    Self {
      source,
      target,
      metadata: Value::Null,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportGraph {
  pub nodes: Vec<Node>,
  #[serde(default)]
  pub links: Vec<Link>,
}

impl TransportGraph {
  pub fn node(&self, id: NodeId) -> Option<&Node> {
    self.nodes.iter().find(|node| node.id == id)
  }

  pub fn node_ids(&self) -> Vec<NodeId> {
    self.nodes.iter().map(|node| node.id).collect()
  }

  /// Links as an unordered set of `(source, target)` pairs.
  pub fn link_set(&self) -> BTreeSet<(NodeId, NodeId)> {
    self
      .links
      .iter()
      .map(|link| (link.source, link.target))
      .collect()
  }

  pub fn view(&self) -> GraphView {
    GraphView::new(self)
  }
}

/// Adjacency view of a transport graph for traversal and analysis.
#[derive(Debug, Clone)]
pub struct GraphView {
  /// Node ids in submitted order.
  order: Vec<NodeId>,
  /// Adjacency list: node_id -> list of downstream node_ids.
  adjacency: HashMap<NodeId, Vec<NodeId>>,
  /// Reverse adjacency: node_id -> list of upstream node_ids.
  reverse_adjacency: HashMap<NodeId, Vec<NodeId>>,
  /// Nodes with no incoming edges.
  entry_points: Vec<NodeId>,
}

impl GraphView {
  pub fn new(graph: &TransportGraph) -> Self {
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut reverse_adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let order = graph.node_ids();

    for id in &order {
      adjacency.entry(*id).or_default();
      reverse_adjacency.entry(*id).or_default();
    }

    for link in &graph.links {
      adjacency.entry(link.source).or_default().push(link.target);
      reverse_adjacency
        .entry(link.target)
        .or_default()
        .push(link.source);
    }

    let entry_points = order
      .iter()
      .copied()
      .filter(|id| reverse_adjacency.get(id).is_none_or(|v| v.is_empty()))
      .collect();

    Self {
      order,
      adjacency,
      reverse_adjacency,
      entry_points,
    }
  }

  pub fn entry_points(&self) -> &[NodeId] {
    &self.entry_points
  }

  pub fn downstream(&self, id: NodeId) -> &[NodeId] {
    self.adjacency.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
  }

  pub fn upstream(&self, id: NodeId) -> &[NodeId] {
    self
      .reverse_adjacency
      .get(&id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Kahn's algorithm. Returns `None` if the graph has a cycle.
  ///
  /// Parallel edges count once per occurrence on both sides, so they never
  /// look like a cycle.
  pub fn topological_order(&self) -> Option<Vec<NodeId>> {
    let sorted = self.sorted_prefix();
    (sorted.len() == self.reverse_adjacency.len()).then_some(sorted)
  }

  /// Nodes left unsorted by [`Self::topological_order`], in submitted order.
  /// These are the nodes on or downstream of a cycle.
  pub fn unsorted(&self) -> Vec<NodeId> {
    let sorted: HashSet<NodeId> = self.sorted_prefix().into_iter().collect();
    self
      .order
      .iter()
      .copied()
      .filter(|id| !sorted.contains(id))
      .collect()
  }

  fn sorted_prefix(&self) -> Vec<NodeId> {
    let mut in_degree: HashMap<NodeId, usize> = self
      .reverse_adjacency
      .iter()
      .map(|(id, upstream)| (*id, upstream.len()))
      .collect();

    let mut queue: VecDeque<NodeId> = self.entry_points.iter().copied().collect();
    let mut sorted = Vec::with_capacity(self.order.len());

    while let Some(id) = queue.pop_front() {
      sorted.push(id);
      for next in self.downstream(id) {
        if let Some(degree) = in_degree.get_mut(next) {
          *degree -= 1;
          if *degree == 0 {
            queue.push_back(*next);
          }
        }
      }
    }

    sorted
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn graph(ids: &[NodeId], links: &[(NodeId, NodeId)]) -> TransportGraph {
    TransportGraph {
      nodes: ids
        .iter()
        .map(|id| Node::new(*id, NodeMetadata::new().with("name", format!("task_{id}"))))
        .collect(),
      links: links.iter().map(|(s, t)| Link::new(*s, *t)).collect(),
    }
  }

  #[test]
  fn test_entry_points_and_neighbours() {
    let view = graph(&[0, 1, 2], &[(0, 2), (1, 2)]).view();

    assert_eq!(view.entry_points(), &[0, 1]);
    assert_eq!(view.upstream(2), &[0, 1]);
    assert_eq!(view.downstream(0), &[2]);
    assert!(view.downstream(2).is_empty());
  }

  #[test]
  fn test_topological_order_of_dag() {
    let view = graph(&[3, 1, 2], &[(1, 2), (2, 3)]).view();
    assert_eq!(view.topological_order(), Some(vec![1, 2, 3]));
  }

  #[test]
  fn test_cycle_has_no_topological_order() {
    let view = graph(&[0, 1, 2], &[(0, 1), (1, 2), (2, 1)]).view();
    assert_eq!(view.topological_order(), None);
  }

  #[test]
  fn test_unsorted_reports_cycle_members() {
    let view = graph(&[0, 1, 2, 3], &[(0, 1), (1, 2), (2, 1), (2, 3)]).view();
    assert_eq!(view.unsorted(), vec![1, 2, 3]);
  }

  #[test]
  fn test_self_loop_is_a_cycle() {
    let view = graph(&[0], &[(0, 0)]).view();
    assert_eq!(view.topological_order(), None);
  }

  #[test]
  fn test_parallel_edges_are_not_a_cycle() {
    let view = graph(&[0, 1], &[(0, 1), (0, 1)]).view();
    assert_eq!(view.topological_order(), Some(vec![0, 1]));
  }

  #[test]
  fn test_link_set_ignores_order() {
    let a = graph(&[0, 1, 2], &[(0, 1), (1, 2)]);
    let b = graph(&[0, 1, 2], &[(1, 2), (0, 1)]);
    assert_eq!(a.link_set(), b.link_set());
  }

  #[test]
  fn test_link_metadata_round_trips() {
    let json = serde_json::json!({
      "source": 0,
      "target": 1,
      "metadata": { "edge_name": "x", "param_type": "arg", "arg_index": 0 }
    });
    let link: Link = serde_json::from_value(json.clone()).unwrap();
    assert_eq!(serde_json::to_value(&link).unwrap(), json);

    let bare: Link = serde_json::from_value(serde_json::json!({ "source": 0, "target": 1 })).unwrap();
    assert_eq!(
      serde_json::to_value(&bare).unwrap(),
      serde_json::json!({ "source": 0, "target": 1 })
    );
  }
}
