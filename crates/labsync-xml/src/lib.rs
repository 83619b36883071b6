//! XML codec for labsync.
//!
//! Reads the raw lab extract and the reference documents into
//! [`labsync_core`] types, and writes the tree export and the run report.
//! Pure synchronous; callers do their own file I/O.
//!
//! ```no_run
//! let rows = labsync_xml::read_raw_rows(b"<study><subject><STUDY_ID>1</STUDY_ID></subject></study>")
//!   .unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

pub mod element;
pub mod error;
mod read;
mod write;

pub use error::{Error, Result};
pub use read::{
  read_component_recodes,
  read_field_renames,
  read_form_events,
  read_id_fields,
  read_raw_rows,
  read_translation_table,
};
pub use write::{write_report, write_tree};
