//! Async HTTP client for the REDCap API.

use std::time::Duration;

use labsync_core::{
  remap::{IdFieldNames, IdPair, IdRegistry},
  upload::{Payload, SubmissionService, SubmitOutcome},
};
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
  error::{Error, Result},
  rejection,
};

/// Connection settings for one REDCap project.
#[derive(Debug, Clone)]
pub struct RedcapConfig {
  /// API endpoint, e.g. `https://redcap.example.org/api/`.
  pub url:        String,
  pub token:      String,
  pub timeout:    Duration,
  pub verify_ssl: bool,
}

/// Async client for a REDCap project's record API.
///
/// Clones share the inner [`reqwest::Client`] pool.
#[derive(Clone)]
pub struct RedcapClient {
  client: Client,
  config: RedcapConfig,
}

impl RedcapClient {
  pub fn new(config: RedcapConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(config.timeout)
      .danger_accept_invalid_certs(!config.verify_ssl)
      .build()?;
    info!(url = %config.url, "initialised REDCap client");
    Ok(Self { client, config })
  }

  pub fn url(&self) -> &str { &self.config.url }

  async fn post(&self, params: &[(&str, &str)]) -> Result<reqwest::Response> {
    let mut form = vec![("token", self.config.token.as_str())];
    form.extend_from_slice(params);
    Ok(self.client.post(&self.config.url).form(&form).send().await?)
  }
}

// ── Record import ───────────────────────────────────────────────────────────

impl SubmissionService for RedcapClient {
  type Error = Error;

  async fn submit<'a>(&'a self, payload: &'a Payload) -> Result<SubmitOutcome> {
    let data = serde_json::to_string(&[payload])?;
    let resp = self
      .post(&[
        ("content", "record"),
        ("format", "json"),
        ("type", "flat"),
        ("overwriteBehavior", "overwrite"),
        ("data", data.as_str()),
      ])
      .await?;

    let status = resp.status();
    let body = resp.text().await?;
    if status.is_success() {
      debug!(%status, "import accepted");
      return Ok(SubmitOutcome::Accepted);
    }
    // Auth failures would repeat on every later request.
    let auth_failure =
      matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN);
    if status.is_client_error()
      && !auth_failure
      && let Some(errors) = rejection::decode(&body)
    {
      warn!(%status, count = errors.len(), "import rejected");
      return Ok(SubmitOutcome::Rejected(errors));
    }
    Err(Error::Api {
      status:  status.as_u16(),
      message: rejection::message(&body),
    })
  }
}

// ── Record export ───────────────────────────────────────────────────────────

impl IdRegistry for RedcapClient {
  type Error = Error;

  async fn fetch_id_pairs<'a>(&'a self, fields: &'a IdFieldNames) -> Result<Vec<IdPair>> {
    let resp = self
      .post(&[
        ("content", "record"),
        ("format", "json"),
        ("type", "flat"),
        ("fields[0]", fields.canonical.as_str()),
        ("fields[1]", fields.local.as_str()),
      ])
      .await?;

    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
      return Err(Error::Api {
        status:  status.as_u16(),
        message: rejection::message(&body),
      });
    }

    let rows: Vec<Value> = serde_json::from_str(&body)?;
    let pairs = rows
      .iter()
      .map(|row| {
        let row: &Map<String, Value> = row
          .as_object()
          .ok_or_else(|| Error::UnexpectedRow(row.to_string()))?;
        Ok(IdPair {
          local:     rejection::text(row, &fields.local),
          canonical: rejection::text(row, &fields.canonical),
        })
      })
      .collect::<Result<Vec<_>>>()?;
    info!(pairs = pairs.len(), "fetched id pairs from REDCap");
    Ok(pairs)
  }
}
