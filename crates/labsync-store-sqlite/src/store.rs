//! [`SqliteStore`]: the SQLite [`CheckpointStore`] plus the batch log.

use std::path::Path;

use chrono::{DateTime, Utc};
use labsync_core::{
  checkpoint::{CHECKPOINT_VERSION, Checkpoint, CheckpointStore},
  tree::PersonFormEventTree,
};
use rusqlite::{OptionalExtension as _, Transaction, params};
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{RawCheckpoint, RawTree, decode_dt, encode_dt, encode_status},
  schema::SCHEMA,
};

/// One run of the tool, keyed by the hash of its raw extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
  pub batch_id:     Uuid,
  pub input_hash:   String,
  pub started_at:   DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

struct RawBatch {
  batch_id:     String,
  input_hash:   String,
  started_at:   String,
  completed_at: Option<String>,
}

impl RawBatch {
  fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      batch_id:     row.get(0)?,
      input_hash:   row.get(1)?,
      started_at:   row.get(2)?,
      completed_at: row.get(3)?,
    })
  }

  fn into_batch(self) -> Result<Batch> {
    Ok(Batch {
      batch_id:     Uuid::parse_str(&self.batch_id)?,
      input_hash:   self.input_hash,
      started_at:   decode_dt(&self.started_at)?,
      completed_at: self.completed_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

const BATCH_COLUMNS: &str = "batch_id, input_hash, started_at, completed_at";

// ─── Store ───────────────────────────────────────────────────────────────────

/// Checkpoint and batch log backed by a single SQLite file.
///
/// Clones share the same connection thread.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Batch log ─────────────────────────────────────────────────────────────

  /// Record the start of a run over an extract with hash `input_hash`.
  pub async fn begin_batch(&self, input_hash: &str) -> Result<Batch> {
    let batch = Batch {
      batch_id:     Uuid::new_v4(),
      input_hash:   input_hash.to_owned(),
      started_at:   Utc::now(),
      completed_at: None,
    };
    let id_str = batch.batch_id.hyphenated().to_string();
    let hash = batch.input_hash.clone();
    let at_str = encode_dt(batch.started_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO batches (batch_id, input_hash, started_at) VALUES (?1, ?2, ?3)",
          params![id_str, hash, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(batch)
  }

  /// Stamp a batch as completed now.
  pub async fn complete_batch(&self, batch_id: Uuid) -> Result<DateTime<Utc>> {
    let now = Utc::now();
    let id_str = batch_id.hyphenated().to_string();
    let at_str = encode_dt(now);
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE batches SET completed_at = ?2 WHERE batch_id = ?1",
          params![id_str, at_str],
        )?)
      })
      .await?;
    if updated == 0 {
      return Err(Error::BatchNotFound(batch_id));
    }
    Ok(now)
  }

  /// The most recent completed batch for the same extract, if any.
  pub async fn completed_batch_for(&self, input_hash: &str) -> Result<Option<Batch>> {
    let hash = input_hash.to_owned();
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {BATCH_COLUMNS} FROM batches
                 WHERE input_hash = ?1 AND completed_at IS NOT NULL
                 ORDER BY completed_at DESC LIMIT 1"
              ),
              params![hash],
              RawBatch::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawBatch::into_batch).transpose()
  }

  /// The most recently completed batch of any extract.
  pub async fn last_completed_batch(&self) -> Result<Option<Batch>> {
    let raw = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {BATCH_COLUMNS} FROM batches
                 WHERE completed_at IS NOT NULL
                 ORDER BY completed_at DESC LIMIT 1"
              ),
              [],
              RawBatch::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawBatch::into_batch).transpose()
  }
}

// ─── Tree rows ───────────────────────────────────────────────────────────────

/// Replace every tree row with the contents of `tree`.
fn write_tree(tx: &Transaction<'_>, tree: &PersonFormEventTree) -> rusqlite::Result<()> {
  tx.execute("DELETE FROM fields", [])?;
  tx.execute("DELETE FROM events", [])?;
  tx.execute("DELETE FROM forms", [])?;
  tx.execute("DELETE FROM persons", [])?;

  let mut insert_person =
    tx.prepare_cached("INSERT INTO persons (position, person_id) VALUES (?1, ?2)")?;
  let mut insert_form = tx.prepare_cached(
    "INSERT INTO forms (person_pos, position, name) VALUES (?1, ?2, ?3)",
  )?;
  let mut insert_event = tx.prepare_cached(
    "INSERT INTO events (person_pos, form_pos, position, name, status)
     VALUES (?1, ?2, ?3, ?4, ?5)",
  )?;
  let mut insert_field = tx.prepare_cached(
    "INSERT INTO fields (person_pos, form_pos, event_pos, position, name, value)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
  )?;

  for (p, person) in tree.persons.iter().enumerate() {
    insert_person.execute(params![p as i64, person.id])?;
    for (f, form) in person.forms.iter().enumerate() {
      insert_form.execute(params![p as i64, f as i64, form.name])?;
      for (e, event) in form.events.iter().enumerate() {
        insert_event.execute(params![
          p as i64,
          f as i64,
          e as i64,
          event.name,
          encode_status(event.status)
        ])?;
        for (i, field) in event.fields.iter().enumerate() {
          insert_field.execute(params![
            p as i64,
            f as i64,
            e as i64,
            i as i64,
            field.name,
            field.value
          ])?;
        }
      }
    }
  }
  Ok(())
}

fn read_tree(conn: &rusqlite::Connection) -> rusqlite::Result<RawTree> {
  let mut raw = RawTree::default();

  let mut stmt = conn.prepare("SELECT person_id FROM persons ORDER BY position")?;
  raw.persons = stmt
    .query_map([], |r| r.get(0))?
    .collect::<rusqlite::Result<_>>()?;

  let mut stmt =
    conn.prepare("SELECT person_pos, name FROM forms ORDER BY person_pos, position")?;
  raw.forms = stmt
    .query_map([], |r| Ok((r.get::<_, i64>(0)? as usize, r.get(1)?)))?
    .collect::<rusqlite::Result<_>>()?;

  let mut stmt = conn.prepare(
    "SELECT person_pos, form_pos, name, status FROM events
     ORDER BY person_pos, form_pos, position",
  )?;
  raw.events = stmt
    .query_map([], |r| {
      Ok((
        r.get::<_, i64>(0)? as usize,
        r.get::<_, i64>(1)? as usize,
        r.get(2)?,
        r.get(3)?,
      ))
    })?
    .collect::<rusqlite::Result<_>>()?;

  let mut stmt = conn.prepare(
    "SELECT person_pos, form_pos, event_pos, name, value FROM fields
     ORDER BY person_pos, form_pos, event_pos, position",
  )?;
  raw.fields = stmt
    .query_map([], |r| {
      Ok((
        r.get::<_, i64>(0)? as usize,
        r.get::<_, i64>(1)? as usize,
        r.get::<_, i64>(2)? as usize,
        r.get(3)?,
        r.get(4)?,
      ))
    })?
    .collect::<rusqlite::Result<_>>()?;

  Ok(raw)
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

impl CheckpointStore for SqliteStore {
  type Error = Error;

  async fn save_checkpoint<'a>(&'a self, checkpoint: &'a Checkpoint) -> Result<()> {
    let header = RawCheckpoint::encode(checkpoint)?;
    let tree = checkpoint.tree.clone();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM checkpoint", [])?;
        tx.execute(
          "INSERT INTO checkpoint
             (id, version, created_at, alerts, rule_errors,
              collection_total, collection_blank, bad_ids)
           VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          params![
            header.version,
            header.created_at,
            header.alerts,
            header.rule_errors,
            header.collection_total,
            header.collection_blank,
            header.bad_ids
          ],
        )?;
        write_tree(&tx, &tree)?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    debug!(persons = checkpoint.tree.persons.len(), "saved checkpoint");
    Ok(())
  }

  async fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
    let loaded = self
      .conn
      .call(|conn| {
        let header = conn
          .query_row(
            "SELECT version, created_at, alerts, rule_errors,
                    collection_total, collection_blank, bad_ids
             FROM checkpoint WHERE id = 1",
            [],
            |r| {
              Ok(RawCheckpoint {
                version:          r.get(0)?,
                created_at:       r.get(1)?,
                alerts:           r.get(2)?,
                rule_errors:      r.get(3)?,
                collection_total: r.get(4)?,
                collection_blank: r.get(5)?,
                bad_ids:          r.get(6)?,
              })
            },
          )
          .optional()?;
        let Some(header) = header else {
          return Ok(None);
        };
        Ok(Some((header, read_tree(conn)?)))
      })
      .await?;

    let Some((header, raw_tree)) = loaded else {
      return Ok(None);
    };
    if header.version != CHECKPOINT_VERSION {
      return Err(Error::UnsupportedVersion {
        found:    header.version,
        expected: CHECKPOINT_VERSION,
      });
    }
    let tree = raw_tree.into_tree()?;
    Ok(Some(header.into_checkpoint(tree)?))
  }

  async fn save_tree<'a>(&'a self, tree: &'a PersonFormEventTree) -> Result<()> {
    let tree = tree.clone();
    let saved = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let exists = tx
          .query_row("SELECT 1 FROM checkpoint WHERE id = 1", [], |_| Ok(()))
          .optional()?
          .is_some();
        if !exists {
          return Ok(false);
        }
        write_tree(&tx, &tree)?;
        tx.commit()?;
        Ok(true)
      })
      .await?;
    if saved {
      Ok(())
    } else {
      Err(Error::NoCheckpoint)
    }
  }

  async fn clear(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM checkpoint", [])?;
        write_tree(&tx, &PersonFormEventTree::default())?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
