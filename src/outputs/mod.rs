//! Reporting of an ingestion pass and of the store contents.
//!
//! # Submodules
//!
//! - [`json`]: writes the [`BatchReport`](crate::report::BatchReport) to a JSON file
//! - [`text`]: renders the terminal summary and article listings

pub mod json;
pub mod text;
