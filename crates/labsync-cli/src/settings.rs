//! Run settings: a TOML file layered with `LABSYNC_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use labsync_core::{normalize::validate_date_format, rules::BUILTIN_RULES};
use serde::Deserialize;

/// Everything a run needs besides the command-line flags.
///
/// File paths are relative to the configuration file's directory until
/// [`Settings::resolve_paths`] has run.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  #[serde(default)]
  pub project:    String,
  pub redcap_uri: String,
  pub token:      String,
  #[serde(default = "default_true")]
  pub verify_ssl: bool,
  #[serde(default = "default_timeout_secs")]
  pub request_timeout_secs: u64,
  /// Maximum import requests per minute.
  #[serde(default = "default_rate")]
  pub rate_limiter_value_in_redcap: f64,
  #[serde(default)]
  pub skip_blanks: bool,
  #[serde(default = "default_record_id_field")]
  pub record_id_field: String,
  #[serde(default = "default_event_field")]
  pub event_field: String,

  #[serde(default = "default_date_format")]
  pub input_date_format:  String,
  #[serde(default = "default_date_format")]
  pub output_date_format: String,

  #[serde(default = "default_raw_xml_file")]
  pub raw_xml_file:             PathBuf,
  #[serde(default = "default_translation_table_file")]
  pub translation_table_file:   PathBuf,
  #[serde(default = "default_form_events_file")]
  pub form_events_file:         PathBuf,
  #[serde(default = "default_research_id_to_redcap_id")]
  pub research_id_to_redcap_id: PathBuf,
  #[serde(default)]
  pub replace_fields_in_raw_data_xml: Option<PathBuf>,
  #[serde(default)]
  pub component_to_loinc_code_xml:    Option<PathBuf>,

  #[serde(default)]
  pub rules: Vec<String>,
  #[serde(default)]
  pub include_rule_errors_in_report: bool,

  #[serde(default = "default_data_directory")]
  pub data_directory:      PathBuf,
  #[serde(default = "default_batch_info_database")]
  pub batch_info_database: PathBuf,
  #[serde(default = "default_batch_warning_days")]
  pub batch_warning_days:  u32,
  #[serde(default = "default_report_file_path")]
  pub report_file_path:    PathBuf,
  #[serde(default = "default_tree_file")]
  pub tree_file:           PathBuf,
}

fn default_true() -> bool { true }
fn default_timeout_secs() -> u64 { 30 }
fn default_rate() -> f64 { 600.0 }
fn default_record_id_field() -> String { "record_id".into() }
fn default_event_field() -> String { "redcap_event_name".into() }
fn default_date_format() -> String { "%Y-%m-%d".into() }
fn default_raw_xml_file() -> PathBuf { "raw.xml".into() }
fn default_translation_table_file() -> PathBuf { "translationTable.xml".into() }
fn default_form_events_file() -> PathBuf { "formEvents.xml".into() }
fn default_research_id_to_redcap_id() -> PathBuf {
  "researchId_to_redcapId_map.xml".into()
}
fn default_data_directory() -> PathBuf { "data".into() }
fn default_batch_info_database() -> PathBuf { "labsync.db".into() }
fn default_batch_warning_days() -> u32 { 13 }
fn default_report_file_path() -> PathBuf { "report.xml".into() }
fn default_tree_file() -> PathBuf { "person_form_event_tree.xml".into() }

impl Settings {
  /// Read `path` (if it exists) and the environment, then resolve paths
  /// against the file's directory.
  pub fn load(path: &Path) -> Result<Self> {
    let raw = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("LABSYNC"))
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;
    let settings: Self = raw
      .try_deserialize()
      .context("failed to deserialise settings")?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let settings = settings.resolve_paths(base);
    settings.validate()?;
    Ok(settings)
  }

  /// Join every relative path onto `base`; the database and tree export
  /// live in the data directory.
  pub fn resolve_paths(mut self, base: &Path) -> Self {
    let join = |p: &Path| -> PathBuf {
      if p.is_absolute() { p.to_path_buf() } else { base.join(p) }
    };
    self.raw_xml_file = join(&self.raw_xml_file);
    self.translation_table_file = join(&self.translation_table_file);
    self.form_events_file = join(&self.form_events_file);
    self.research_id_to_redcap_id = join(&self.research_id_to_redcap_id);
    self.replace_fields_in_raw_data_xml =
      self.replace_fields_in_raw_data_xml.as_deref().map(join);
    self.component_to_loinc_code_xml =
      self.component_to_loinc_code_xml.as_deref().map(join);
    self.data_directory = join(&self.data_directory);
    self.report_file_path = join(&self.report_file_path);
    self
  }

  /// Path of the SQLite file holding the checkpoint and batch log.
  pub fn database_path(&self) -> PathBuf {
    self.data_directory.join(&self.batch_info_database)
  }

  pub fn tree_path(&self) -> PathBuf { self.data_directory.join(&self.tree_file) }

  /// Reject configuration errors before any work starts.
  pub fn validate(&self) -> Result<()> {
    if self.redcap_uri.trim().is_empty() {
      bail!("redcap_uri must not be empty");
    }
    if self.token.trim().is_empty() {
      bail!("token must not be empty");
    }
    let rate = self.rate_limiter_value_in_redcap;
    if rate.is_nan() || rate <= 0.0 {
      bail!("rate_limiter_value_in_redcap must be positive, got {rate}");
    }
    validate_date_format(&self.input_date_format)?;
    validate_date_format(&self.output_date_format)?;
    if let Some(unknown) = self
      .rules
      .iter()
      .find(|r| !BUILTIN_RULES.contains(&r.as_str()))
    {
      bail!(
        "unknown rule {unknown:?}; available rules: {}",
        BUILTIN_RULES.join(", ")
      );
    }
    Ok(())
  }
}
