//! The persisted run state and the `CheckpointStore` trait.
//!
//! A checkpoint is written once the tree is assembled. During upload only the
//! tree part is rewritten, after every accepted submission. Implemented by
//! `labsync-store-sqlite`.

use std::{collections::BTreeMap, future::Future};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  normalize::CollectionDateSummary,
  sequence::AlertSummary,
  tree::PersonFormEventTree,
};

/// Bumped whenever the persisted shape changes.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
  pub version:          u32,
  pub created_at:       DateTime<Utc>,
  pub tree:             PersonFormEventTree,
  pub alerts:           AlertSummary,
  pub rule_errors:      Vec<String>,
  pub collection_dates: CollectionDateSummary,
  /// Local ids dropped during remap, with their record counts.
  pub bad_ids:          BTreeMap<String, usize>,
}

impl Checkpoint {
  pub fn new(tree: PersonFormEventTree) -> Self {
    Self {
      version: CHECKPOINT_VERSION,
      created_at: Utc::now(),
      tree,
      alerts: AlertSummary::default(),
      rule_errors: Vec::new(),
      collection_dates: CollectionDateSummary::default(),
      bad_ids: BTreeMap::new(),
    }
  }
}

/// Durable storage for a single checkpoint.
pub trait CheckpointStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Replace any stored checkpoint with `checkpoint`.
  fn save_checkpoint<'a>(
    &'a self,
    checkpoint: &'a Checkpoint,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// The stored checkpoint, or `None` if there is none.
  fn load_checkpoint(
    &self,
  ) -> impl Future<Output = Result<Option<Checkpoint>, Self::Error>> + Send + '_;

  /// Overwrite the tree of the stored checkpoint, atomically.
  fn save_tree<'a>(
    &'a self,
    tree: &'a PersonFormEventTree,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Remove the stored checkpoint.
  fn clear(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
