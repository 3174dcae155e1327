//! Dispatcher Model
//!
//! This crate contains the serializable types shared by every part of the
//! dispatcher: the manifest a client submits, the transport graph inside it,
//! the execution status and lifecycle of a dispatch, the asset slots attached to the workflow and to each node, and the asset
//! records kept by the asset store.
//!
//! Asset slots are declared as fixed structs rather than open maps. A slot
//! walk ([`Manifest::slots_mut`]) visits every slot in a deterministic order:
//! dispatch slots, lattice slots, then each node's slots in graph order.

mod asset;
mod error;
mod graph;
mod lifecycle;
mod manifest;
mod slots;
mod status;

pub use asset::{Asset, AssetDescriptor, AssetDetails};
pub use error::ModelError;
pub use graph::{GraphView, Link, Node, NodeId, NodeMetadata, TransportGraph};
pub use lifecycle::Lifecycle;
pub use manifest::{DispatchMetadata, Lattice, LatticeMetadata, Manifest, SlotPath};
pub use slots::{AssetSlots, DispatchAssets, LatticeAssets, NodeAssets};
pub use status::DispatchStatus;
