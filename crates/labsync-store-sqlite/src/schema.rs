//! SQL schema for the labsync SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema revision.

/// Schema revision written to `PRAGMA user_version`.
pub const SCHEMA_VERSION: u32 = 1;

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- At most one checkpoint; the tree lives in the four tables below.
CREATE TABLE IF NOT EXISTS checkpoint (
    id               INTEGER PRIMARY KEY CHECK (id = 1),
    version          INTEGER NOT NULL,
    created_at       TEXT    NOT NULL,   -- RFC 3339 UTC
    alerts           TEXT    NOT NULL,   -- JSON AlertSummary
    rule_errors      TEXT    NOT NULL DEFAULT '[]',
    collection_total INTEGER NOT NULL DEFAULT 0,
    collection_blank INTEGER NOT NULL DEFAULT 0,
    bad_ids          TEXT    NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS persons (
    position  INTEGER PRIMARY KEY,
    person_id TEXT    NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS forms (
    person_pos INTEGER NOT NULL REFERENCES persons(position) ON DELETE CASCADE,
    position   INTEGER NOT NULL,
    name       TEXT    NOT NULL,
    PRIMARY KEY (person_pos, position)
);

CREATE TABLE IF NOT EXISTS events (
    person_pos INTEGER NOT NULL,
    form_pos   INTEGER NOT NULL,
    position   INTEGER NOT NULL,
    name       TEXT    NOT NULL,
    status     TEXT    NOT NULL CHECK (status IN ('unsent', 'sent')),
    PRIMARY KEY (person_pos, form_pos, position),
    FOREIGN KEY (person_pos, form_pos)
        REFERENCES forms(person_pos, position) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS fields (
    person_pos INTEGER NOT NULL,
    form_pos   INTEGER NOT NULL,
    event_pos  INTEGER NOT NULL,
    position   INTEGER NOT NULL,
    name       TEXT    NOT NULL,
    value      TEXT    NOT NULL DEFAULT '',
    PRIMARY KEY (person_pos, form_pos, event_pos, position),
    FOREIGN KEY (person_pos, form_pos, event_pos)
        REFERENCES events(person_pos, form_pos, position) ON DELETE CASCADE
);

-- One row per run; completed_at stays NULL until the run finishes.
CREATE TABLE IF NOT EXISTS batches (
    batch_id     TEXT PRIMARY KEY,
    input_hash   TEXT NOT NULL,
    started_at   TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS batches_hash_idx ON batches(input_hash);

PRAGMA user_version = 1;
";
