//! Replace local subject ids with the canonical ids held by a remote
//! registry.

use std::{
  collections::{BTreeMap, HashMap},
  future::Future,
};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{Error, Result, record::LabRecord};

/// Names of the registry fields holding the local and canonical ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdFieldNames {
  pub local:     String,
  pub canonical: String,
}

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdPair {
  pub local:     String,
  pub canonical: String,
}

/// A source of local → canonical id pairs (e.g. a REDCap project).
pub trait IdRegistry: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch every pair the registry knows about.
  fn fetch_id_pairs<'a>(
    &'a self,
    fields: &'a IdFieldNames,
  ) -> impl Future<Output = Result<Vec<IdPair>, Self::Error>> + Send + 'a;
}

/// What happened to the records during a remap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapOutcome {
  /// Local ids with no canonical counterpart, with how many records each
  /// had. Those records were dropped.
  pub bad_ids:     BTreeMap<String, usize>,
  /// Records skipped for an empty subject id; not counted as bad ids.
  pub invalid_ids: usize,
  pub remapped:    usize,
}

impl RemapOutcome {
  pub fn dropped(&self) -> usize { self.bad_ids.values().sum() }
}

/// Rewrite subject ids in place, dropping records whose id is empty or
/// unknown.
pub fn remap_subjects(
  records: &mut Vec<LabRecord>,
  pairs: &[IdPair],
) -> RemapOutcome {
  let lookup: HashMap<&str, &str> = pairs
    .iter()
    .filter(|p| !p.local.trim().is_empty() && !p.canonical.trim().is_empty())
    .map(|p| (p.local.trim(), p.canonical.trim()))
    .collect();

  let mut outcome = RemapOutcome::default();
  records.retain_mut(|record| {
    if record.subject_id.is_empty() {
      error!(
        component = %record.component_code,
        "record has an empty subject id, skipping it"
      );
      outcome.invalid_ids += 1;
      return false;
    }
    match lookup.get(record.subject_id.as_str()) {
      Some(canonical) => {
        record.subject_id = (*canonical).to_owned();
        outcome.remapped += 1;
        true
      }
      None => {
        *outcome.bad_ids.entry(record.subject_id.clone()).or_default() += 1;
        false
      }
    }
  });

  for (id, count) in &outcome.bad_ids {
    warn!(id = %id, count, "subject id has no canonical id, dropping its records");
  }
  info!(
    remapped = outcome.remapped,
    dropped = outcome.dropped(),
    invalid = outcome.invalid_ids,
    "remapped subject ids"
  );
  outcome
}

/// Fetch pairs from `registry` and remap. A registry failure is fatal.
pub async fn remap_with_registry<R: IdRegistry>(
  registry: &R,
  fields: &IdFieldNames,
  records: &mut Vec<LabRecord>,
) -> Result<RemapOutcome> {
  let pairs = registry
    .fetch_id_pairs(fields)
    .await
    .map_err(|e| Error::Registry(Box::new(e)))?;
  info!(pairs = pairs.len(), "fetched id pairs");
  Ok(remap_subjects(records, &pairs))
}
