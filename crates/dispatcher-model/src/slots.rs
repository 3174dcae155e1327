use serde::{Deserialize, Serialize};

use crate::asset::AssetDetails;

/// A fixed, enumerable set of asset slots.
pub trait AssetSlots {
  /// Slot names in walk order.
  const NAMES: &'static [&'static str];

  fn slots(&self) -> Vec<(&'static str, Option<&AssetDetails>)>;

  fn slots_mut(&mut self) -> Vec<(&'static str, &mut Option<AssetDetails>)>;

  fn get(&self, name: &str) -> Option<&AssetDetails> {
    self
      .slots()
      .into_iter()
      .find(|(slot, _)| *slot == name)
      .and_then(|(_, details)| details)
  }
}

// Every slot is an optional field; absent slots read as null and are always
// written back, so the key set never changes. Unknown slot names fail to parse.
macro_rules! asset_slots {
  ($(#[$meta:meta])* $name:ident { $($slot:ident),+ $(,)? }) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct $name {
      $(
        #[serde(default)]
        pub $slot: Option<AssetDetails>,
      )+
    }

    impl AssetSlots for $name {
      const NAMES: &'static [&'static str] = &[$(stringify!($slot)),+];

      fn slots(&self) -> Vec<(&'static str, Option<&AssetDetails>)> {
        vec![$((stringify!($slot), self.$slot.as_ref())),+]
      }

      fn slots_mut(&mut self) -> Vec<(&'static str, &mut Option<AssetDetails>)> {
        vec![$((stringify!($slot), &mut self.$slot)),+]
      }
    }
  };
}

asset_slots! {
  /// Dispatch-level slots written by the execution engine.
  DispatchAssets { result, error }
}

asset_slots! {
  /// Workflow definition slots.
  LatticeAssets { workflow_function, workflow_function_string, doc, inputs, hooks }
}

asset_slots! {
  /// Per-node slots.
  NodeAssets { function, function_string, value, output, error, stdout, stderr, hooks }
}
