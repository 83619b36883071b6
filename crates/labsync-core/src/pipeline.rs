//! From raw rows to an assembled, rule-checked checkpoint.

use tracing::info;

use crate::{
  Error, Result,
  assemble::{build_skeleton, mark_not_done, merge_records},
  checkpoint::Checkpoint,
  enrich::enrich_all,
  normalize::{backfill_collection_dates, format_timestamps},
  record::{ComponentRecode, FieldRename, LabRecord, RawRow, apply_recodes, apply_renames},
  reference::ReferenceIndex,
  remap::{IdFieldNames, IdRegistry, remap_with_registry},
  rules::{Rule, run_rules},
  sequence::assign_events,
  sort::sort_records,
};

/// Raw extract rows plus the documents that rewrite them before typing.
#[derive(Debug, Clone, Default)]
pub struct SourceData {
  pub rows:     Vec<RawRow>,
  pub renames:  Vec<FieldRename>,
  pub recodes:  Vec<ComponentRecode>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
  /// strftime format of dates in the raw extract.
  pub input_date_format:  String,
  /// strftime format of dates written to the tree.
  pub output_date_format: String,
}

impl Default for PipelineOptions {
  fn default() -> Self {
    Self {
      input_date_format:  "%Y-%m-%d".to_owned(),
      output_date_format: "%Y-%m-%d".to_owned(),
    }
  }
}

/// Run every stage and return the checkpoint to persist.
pub async fn build_checkpoint<R: IdRegistry>(
  source: SourceData,
  index: &ReferenceIndex,
  registry: &R,
  id_fields: &IdFieldNames,
  rules: &[Box<dyn Rule>],
  options: &PipelineOptions,
) -> Result<Checkpoint> {
  let SourceData {
    mut rows,
    renames,
    recodes,
  } = source;
  if rows.is_empty() {
    return Err(Error::EmptyExtract);
  }
  info!(rows = rows.len(), "loaded raw extract");

  apply_renames(&mut rows, &renames);
  let recoded = apply_recodes(&mut rows, &recodes);
  info!(recoded, "applied component recodes");

  let mut records = rows
    .iter()
    .map(|row| LabRecord::from_row(row, &options.input_date_format))
    .collect::<Result<Vec<_>>>()?;
  drop(rows);

  let collection_dates = backfill_collection_dates(&mut records);
  format_timestamps(&mut records, &options.output_date_format)?;
  enrich_all(&mut records, index);
  sort_records(&mut records);
  let alerts = assign_events(&mut records, index);
  let remap = remap_with_registry(registry, id_fields, &mut records).await?;

  let mut tree = build_skeleton(&records, index)?;
  merge_records(&mut tree, &records, index)?;
  mark_not_done(&mut tree, index);
  let rule_errors = run_rules(rules, &mut tree);

  let mut checkpoint = Checkpoint::new(tree);
  checkpoint.alerts = alerts;
  checkpoint.rule_errors = rule_errors;
  checkpoint.collection_dates = collection_dates;
  checkpoint.bad_ids = remap.bad_ids;
  info!(
    persons = checkpoint.tree.persons.len(),
    pending = checkpoint.tree.pending(),
    "assembled checkpoint"
  );
  Ok(checkpoint)
}
