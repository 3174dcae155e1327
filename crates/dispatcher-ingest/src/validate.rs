use std::collections::HashSet;

use dispatcher_model::{DispatchAssets, DispatchMetadata, Lattice, Manifest};
use serde::Deserialize;

use crate::error::{ValidationDetail, ValidationError};

/// A manifest as submitted. Client `metadata` is replaced on ingestion, so
/// it is skipped rather than parsed.
#[derive(Deserialize)]
struct Submission {
  lattice: Lattice,
  #[serde(default)]
  assets: DispatchAssets,
}

/// Parse a submitted manifest. Unknown asset slots and malformed asset
/// details are rejected here. Submitted metadata is not read.
pub fn decode(body: &[u8]) -> Result<Manifest, ValidationError> {
  let submission: Submission = serde_json::from_slice(body).map_err(|e| {
    ValidationError::single(ValidationDetail::new(
      "body",
      "",
      format!("{e} (line {}, column {})", e.line(), e.column()),
    ))
  })?;

  Ok(Manifest {
    metadata: DispatchMetadata::default(),
    lattice: submission.lattice,
    assets: submission.assets,
  })
}

/// Check the structural integrity of a manifest.
///
/// Every problem found is reported, not just the first one.
pub fn validate(manifest: &Manifest) -> Result<(), ValidationError> {
  let graph = manifest.transport_graph();
  let mut details = Vec::new();

  let mut node_ids = HashSet::new();
  for (i, node) in graph.nodes.iter().enumerate() {
    if !node_ids.insert(node.id) {
      details.push(ValidationDetail::new(
        format!("lattice.transport_graph.nodes[{i}]"),
        "id",
        format!("duplicate node id {}", node.id),
      ));
    }
  }

  let mut links_valid = true;
  for (i, link) in graph.links.iter().enumerate() {
    for (attr, id) in [("source", link.source), ("target", link.target)] {
      if !node_ids.contains(&id) {
        links_valid = false;
        details.push(ValidationDetail::new(
          format!("lattice.transport_graph.links[{i}]"),
          attr,
          format!("node {id} does not exist"),
        ));
      }
    }
  }

  // Cycle detection is only meaningful once every link resolves.
  if links_valid && details.is_empty() {
    let view = graph.view();
    if view.topological_order().is_none() {
      details.push(ValidationDetail::new(
        "lattice.transport_graph",
        "links",
        format!("graph has a cycle through nodes {:?}", view.unsorted()),
      ));
    }
  }

  if details.is_empty() {
    Ok(())
  } else {
    Err(ValidationError { details })
  }
}

/// Stamp a validated manifest with its server-assigned identity.
///
/// The dispatch becomes its own root and starts in the not-started state.
/// Everything else passes through untouched.
pub fn normalize(mut manifest: Manifest, dispatch_id: &str) -> Manifest {
  manifest.metadata = DispatchMetadata::created(dispatch_id);
  manifest
}
