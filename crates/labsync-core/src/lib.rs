//! Core types and the aggregation pipeline for labsync.
//!
//! This crate is free of HTTP, XML and database dependencies. Readers,
//! stores and remote services plug in through the traits defined in
//! [`remap`], [`upload`] and [`checkpoint`].

pub mod assemble;
pub mod checkpoint;
pub mod enrich;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod reference;
pub mod remap;
pub mod report;
pub mod rules;
pub mod sequence;
pub mod sort;
pub mod tree;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};
