//! One end-to-end run: batch log, pipeline, checkpoint, upload, report.

use std::{path::Path, time::Duration};

use anyhow::{Context as _, Result};
use chrono::{Local, Utc};
use labsync_core::{
  checkpoint::CheckpointStore,
  pipeline::{PipelineOptions, SourceData, build_checkpoint},
  reference::ReferenceIndex,
  report::RunReport,
  rules::build_rules,
  upload::{UploadEngine, UploadOptions, UploadReport},
};
use labsync_redcap::{RedcapClient, RedcapConfig};
use labsync_store_sqlite::SqliteStore;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::settings::Settings;

/// Command-line switches that shape a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunFlags {
  pub dry_run:     bool,
  pub resume:      bool,
  pub skip_blanks: bool,
  pub keep:        bool,
}

/// What a run did, for the caller to log.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
  pub upload:  Option<UploadReport>,
  /// Unsent events with data left in the tree after the upload.
  pub pending: usize,
}

pub async fn run(settings: &Settings, flags: RunFlags) -> Result<RunSummary> {
  tokio::fs::create_dir_all(&settings.data_directory)
    .await
    .with_context(|| {
      format!("failed to create {}", settings.data_directory.display())
    })?;
  let db_path = settings.database_path();
  let store = SqliteStore::open(&db_path)
    .await
    .with_context(|| format!("failed to open store at {db_path:?}"))?;

  let raw = read(&settings.raw_xml_file).await?;
  let input_hash = hex::encode(Sha256::digest(&raw));
  check_batches(&store, &input_hash, settings.batch_warning_days).await?;
  let batch = store.begin_batch(&input_hash).await?;
  info!(batch = %batch.batch_id, hash = %input_hash, "started batch");

  let client = RedcapClient::new(RedcapConfig {
    url:        settings.redcap_uri.clone(),
    token:      settings.token.clone(),
    timeout:    Duration::from_secs(settings.request_timeout_secs),
    verify_ssl: settings.verify_ssl,
  })?;

  let resumed = if flags.resume {
    store.load_checkpoint().await?
  } else {
    None
  };
  let checkpoint = match resumed {
    Some(checkpoint) => {
      info!(
        created_at = %checkpoint.created_at,
        pending = checkpoint.tree.pending(),
        "resuming from checkpoint"
      );
      checkpoint
    }
    None => {
      if flags.resume {
        warn!("no checkpoint to resume from, starting over");
      }
      store.clear().await?;
      let checkpoint = prepare(settings, &raw, &client).await?;
      store.save_checkpoint(&checkpoint).await?;
      store
        .load_checkpoint()
        .await?
        .context("checkpoint missing right after it was saved")?
    }
  };

  if flags.dry_run {
    write(&settings.tree_path(), &labsync_xml::write_tree(&checkpoint.tree)?).await?;
    info!(path = %settings.tree_path().display(), "dry run, wrote tree export");
    return Ok(RunSummary {
      upload:  None,
      pending: checkpoint.tree.pending(),
    });
  }

  let options = UploadOptions {
    rate_per_minute: settings.rate_limiter_value_in_redcap,
    skip_blanks:     flags.skip_blanks || settings.skip_blanks,
    record_id_field: settings.record_id_field.clone(),
    event_field:     settings.event_field.clone(),
  };
  let mut tree = checkpoint.tree.clone();
  let upload = UploadEngine::new(&client, &store, options)
    .run(&mut tree)
    .await?;
  info!(
    subjects = upload.total_subjects,
    requests = upload.requests_sent,
    errors = upload.errors.len(),
    "upload finished"
  );

  let pending = tree.pending();
  if pending > 0 {
    warn!(pending, "events with data are still unsent");
  }

  let report = RunReport::new(
    settings.project.clone(),
    client.url(),
    Local::now().date_naive(),
    upload.clone(),
    &checkpoint,
    settings.include_rule_errors_in_report,
  );
  write(&settings.report_file_path, &labsync_xml::write_report(&report)?).await?;
  info!(path = %settings.report_file_path.display(), "wrote report");

  if flags.keep {
    write(&settings.tree_path(), &labsync_xml::write_tree(&tree)?).await?;
    info!(path = %settings.tree_path().display(), "kept tree export");
  }

  store.complete_batch(batch.batch_id).await?;
  Ok(RunSummary {
    upload: Some(upload),
    pending,
  })
}

/// Read the reference documents and run the pipeline over `raw`.
async fn prepare(
  settings: &Settings,
  raw: &[u8],
  client: &RedcapClient,
) -> Result<labsync_core::checkpoint::Checkpoint> {
  let components =
    labsync_xml::read_translation_table(&read(&settings.translation_table_file).await?)?;
  let forms = labsync_xml::read_form_events(&read(&settings.form_events_file).await?)?;
  let id_fields =
    labsync_xml::read_id_fields(&read(&settings.research_id_to_redcap_id).await?)?;
  let index = ReferenceIndex::new(components, forms);

  let renames = match &settings.replace_fields_in_raw_data_xml {
    Some(path) => labsync_xml::read_field_renames(&read(path).await?)?,
    None => Vec::new(),
  };
  let recodes = match &settings.component_to_loinc_code_xml {
    Some(path) => labsync_xml::read_component_recodes(&read(path).await?)?,
    None => Vec::new(),
  };
  let source = SourceData {
    rows: labsync_xml::read_raw_rows(raw)?,
    renames,
    recodes,
  };

  let rules = build_rules(&settings.rules, &index, &settings.output_date_format)?;
  let options = PipelineOptions {
    input_date_format:  settings.input_date_format.clone(),
    output_date_format: settings.output_date_format.clone(),
  };
  let checkpoint =
    build_checkpoint(source, &index, client, &id_fields, &rules, &options).await?;
  Ok(checkpoint)
}

/// Warn about a re-submitted extract and about a long gap since the last
/// completed batch.
async fn check_batches(
  store: &SqliteStore,
  input_hash: &str,
  warning_days: u32,
) -> Result<()> {
  if let Some(previous) = store.completed_batch_for(input_hash).await? {
    warn!(
      batch = %previous.batch_id,
      started_at = %previous.started_at,
      "this extract was already processed by a completed batch"
    );
  }
  if let Some(last) = store.last_completed_batch().await?
    && let Some(completed_at) = last.completed_at
  {
    let age = Utc::now() - completed_at;
    if age.num_days() > i64::from(warning_days) {
      warn!(
        days = age.num_days(),
        limit = warning_days,
        "last completed batch is older than the warning limit"
      );
    }
  }
  Ok(())
}

async fn read(path: &Path) -> Result<Vec<u8>> {
  tokio::fs::read(path)
    .await
    .with_context(|| format!("failed to read {}", path.display()))
}

async fn write(path: &Path, bytes: &[u8]) -> Result<()> {
  tokio::fs::write(path, bytes)
    .await
    .with_context(|| format!("failed to write {}", path.display()))
}
