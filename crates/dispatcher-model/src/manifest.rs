use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::asset::AssetDetails;
use crate::error::ModelError;
use crate::graph::{NodeId, TransportGraph};
use crate::lifecycle::Lifecycle;
use crate::slots::{AssetSlots, DispatchAssets, LatticeAssets};
use crate::status::DispatchStatus;

/// Dispatch identity, status and lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DispatchMetadataWire", into = "DispatchMetadataWire")]
pub struct DispatchMetadata {
  pub dispatch_id: String,
  pub root_dispatch_id: String,
  pub status: DispatchStatus,
  pub lifecycle: Lifecycle,
}

impl DispatchMetadata {
  /// Metadata for a freshly created top-level dispatch.
  pub fn created(dispatch_id: impl Into<String>) -> Self {
    let dispatch_id = dispatch_id.into();
    Self {
      root_dispatch_id: dispatch_id.clone(),
      dispatch_id,
      status: DispatchStatus::NewObject,
      lifecycle: Lifecycle::NotStarted,
    }
  }

  pub fn start_time(&self) -> Option<DateTime<Utc>> {
    self.lifecycle.start_time()
  }

  pub fn end_time(&self) -> Option<DateTime<Utc>> {
    self.lifecycle.end_time()
  }
}

#[derive(Serialize, Deserialize)]
struct DispatchMetadataWire {
  #[serde(default)]
  dispatch_id: String,
  #[serde(default)]
  root_dispatch_id: String,
  #[serde(default)]
  status: DispatchStatus,
  #[serde(default)]
  start_time: Option<DateTime<Utc>>,
  #[serde(default)]
  end_time: Option<DateTime<Utc>>,
}

impl TryFrom<DispatchMetadataWire> for DispatchMetadata {
  type Error = ModelError;

  fn try_from(wire: DispatchMetadataWire) -> Result<Self, Self::Error> {
    Ok(Self {
      dispatch_id: wire.dispatch_id,
      root_dispatch_id: wire.root_dispatch_id,
      status: wire.status,
      lifecycle: Lifecycle::from_times(wire.start_time, wire.end_time)?,
    })
  }
}

impl From<DispatchMetadata> for DispatchMetadataWire {
  fn from(metadata: DispatchMetadata) -> Self {
    Self {
      start_time: metadata.lifecycle.start_time(),
      end_time: metadata.lifecycle.end_time(),
      status: metadata.status,
      dispatch_id: metadata.dispatch_id,
      root_dispatch_id: metadata.root_dispatch_id,
    }
  }
}

/// Workflow-level configuration (`name`, `executor`, `executor_data`,
/// `workflow_executor`, `workflow_executor_data`, ...).
///
/// Kept as an opaque JSON object so it round-trips structurally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LatticeMetadata(Map<String, Value>);

impl LatticeMetadata {
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
}

impl From<Map<String, Value>> for LatticeMetadata {
  fn from(map: Map<String, Value>) -> Self {
    Self(map)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
  #[serde(default)]
  pub metadata: LatticeMetadata,
  #[serde(default)]
  pub assets: LatticeAssets,
  pub transport_graph: TransportGraph,
}

/// The full document describing one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
  #[serde(default)]
  pub metadata: DispatchMetadata,
  pub lattice: Lattice,
  #[serde(default)]
  pub assets: DispatchAssets,
}

/// Where an asset slot lives inside a manifest.
///
/// Displays as the key suffix under the dispatch id: `result`, `doc`,
/// `node_3/stdout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotPath {
  /// Dispatch- or lattice-level slot.
  Workflow { slot: &'static str },
  Node { node_id: NodeId, slot: &'static str },
}

impl SlotPath {
  pub fn slot(&self) -> &'static str {
    match self {
      Self::Workflow { slot } | Self::Node { slot, .. } => *slot,
    }
  }

  pub fn node_id(&self) -> Option<NodeId> {
    match self {
      Self::Workflow { .. } => None,
      Self::Node { node_id, .. } => Some(*node_id),
    }
  }

  /// Asset store key for this slot within a dispatch.
  pub fn key(&self, dispatch_id: &str) -> String {
    format!("{dispatch_id}/{self}")
  }

  /// Location of the slot in the manifest document, used in error reports.
  pub fn location(&self) -> String {
    match self {
      Self::Workflow { slot } if DispatchAssets::NAMES.contains(slot) => format!("assets.{slot}"),
      Self::Workflow { slot } => format!("lattice.assets.{slot}"),
      Self::Node { node_id, slot } => {
        format!("lattice.transport_graph.nodes[id={node_id}].assets.{slot}")
      }
    }
  }
}

impl fmt::Display for SlotPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Workflow { slot } => write!(f, "{slot}"),
      Self::Node { node_id, slot } => write!(f, "node_{node_id}/{slot}"),
    }
  }
}

impl Manifest {
  pub fn dispatch_id(&self) -> &str {
    &self.metadata.dispatch_id
  }

  pub fn name(&self) -> Option<&str> {
    self.lattice.metadata.name()
  }

  pub fn transport_graph(&self) -> &TransportGraph {
    &self.lattice.transport_graph
  }

  /// Every asset slot: dispatch slots, lattice slots, then each node's slots
  /// in node order.
  pub fn slots(&self) -> Vec<(SlotPath, Option<&AssetDetails>)> {
    let workflow = self
      .assets
      .slots()
      .into_iter()
      .chain(self.lattice.assets.slots())
      .map(|(slot, details)| (SlotPath::Workflow { slot }, details));

    let nodes = self.lattice.transport_graph.nodes.iter().flat_map(|node| {
      node
        .assets
        .slots()
        .into_iter()
        .map(move |(slot, details)| (SlotPath::Node { node_id: node.id, slot }, details))
    });

    workflow.chain(nodes).collect()
  }

  /// Mutable slot walk, same order as [`Manifest::slots`].
  pub fn slots_mut(&mut self) -> Vec<(SlotPath, &mut Option<AssetDetails>)> {
    let mut walked = Vec::new();

    for (slot, details) in self.assets.slots_mut() {
      walked.push((SlotPath::Workflow { slot }, details));
    }
    for (slot, details) in self.lattice.assets.slots_mut() {
      walked.push((SlotPath::Workflow { slot }, details));
    }
    for node in self.lattice.transport_graph.nodes.iter_mut() {
      let node_id = node.id;
      for (slot, details) in node.assets.slots_mut() {
        walked.push((SlotPath::Node { node_id, slot }, details));
      }
    }

    walked
  }
}
