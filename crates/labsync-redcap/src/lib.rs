//! REDCap API client for labsync.
//!
//! [`RedcapClient`] implements the core [`SubmissionService`] (record
//! import) and [`IdRegistry`] (record export) traits over the REDCap HTTP
//! API.
//!
//! [`SubmissionService`]: labsync_core::upload::SubmissionService
//! [`IdRegistry`]: labsync_core::remap::IdRegistry

mod client;
mod rejection;

pub mod error;

pub use client::{RedcapClient, RedcapConfig};
pub use error::{Error, Result};
